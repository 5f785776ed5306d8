//! Precondition checks run before any command touches a collaborator.

use crate::error::Rejection;
use crate::session::SessionState;

pub struct CommandGate;

impl CommandGate {
    /// Pure and synchronous. A missing identity wins over a missing device.
    pub fn check(session: &SessionState, requires_device: bool) -> Result<(), Rejection> {
        if session.identity().is_none() {
            return Err(Rejection::NoIdentity);
        }
        if requires_device && session.bound_device().is_none() {
            return Err(Rejection::NoDevice);
        }
        Ok(())
    }
}
