//! Per-conversation identity and device binding.
//!
//! A `SessionState` is owned by exactly one conversation and mutated by one
//! command at a time; callers provide the serialization (the daemon keeps
//! each session behind its own mutex).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::DeviceCatalog;
use crate::error::{BandError, Rejection, TransportError};
use crate::gate::CommandGate;
use crate::types::{DeviceRef, UserId};

/// What happens to the bound device when a conversation re-identifies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReidentifyPolicy {
    /// Drop the selection when the new identity differs from the old one.
    #[default]
    ClearSelection,
    /// Keep whatever device was bound, even across identities.
    PreserveSelection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    identity: Option<UserId>,
    bound_device: Option<DeviceRef>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<&UserId> {
        self.identity.as_ref()
    }

    pub fn bound_device(&self) -> Option<&DeviceRef> {
        self.bound_device.as_ref()
    }

    /// Commits `user` as the conversation identity if the catalog knows them.
    ///
    /// An empty device list leaves the session untouched, including any
    /// previous identity, and yields `NoSuchUser`.
    pub fn identify(
        &mut self,
        user: &str,
        catalog: &dyn DeviceCatalog,
        policy: ReidentifyPolicy,
    ) -> Result<Vec<DeviceRef>, BandError> {
        let candidate = UserId::parse(user).ok_or_else(|| Rejection::NoSuchUser {
            user: user.trim().to_string(),
        })?;

        let devices = catalog
            .lookup(candidate.as_str())
            .map_err(|err| TransportError::Catalog {
                operation: "identify",
                detail: err.to_string(),
            })?;

        if devices.is_empty() {
            return Err(Rejection::NoSuchUser {
                user: candidate.to_string(),
            }
            .into());
        }

        let changed = self.identity.as_ref() != Some(&candidate);
        if changed && policy == ReidentifyPolicy::ClearSelection && self.bound_device.is_some() {
            debug!(user = %candidate, "Clearing device selection on identity change");
            self.bound_device = None;
        }
        self.identity = Some(candidate);

        Ok(devices)
    }

    /// Binds the device whose nickname matches, case-insensitively, among the
    /// current identity's devices. A miss leaves the selection unchanged.
    pub fn select_device(
        &mut self,
        nickname: &str,
        catalog: &dyn DeviceCatalog,
    ) -> Result<DeviceRef, BandError> {
        CommandGate::check(self, false)?;
        let user = match self.identity.as_ref() {
            Some(user) => user,
            None => return Err(Rejection::NoIdentity.into()),
        };

        let devices = catalog
            .lookup(user.as_str())
            .map_err(|err| TransportError::Catalog {
                operation: "select_device",
                detail: err.to_string(),
            })?;

        let selected = devices
            .into_iter()
            .find(|device| device.nickname_matches(nickname))
            .ok_or_else(|| Rejection::NoSuchDevice {
                nickname: nickname.trim().to_string(),
            })?;

        self.bound_device = Some(selected.clone());
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::error::CatalogError;

    struct BrokenCatalog;

    impl DeviceCatalog for BrokenCatalog {
        fn lookup(&self, _user: &str) -> Result<Vec<DeviceRef>, CatalogError> {
            Err(CatalogError("table unavailable".to_string()))
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_device("ana", DeviceRef::new("band1", "SN-1"))
            .with_device("ana", DeviceRef::new("band2", "SN-2"))
            .with_device("luis", DeviceRef::new("wrist", "SN-9"))
    }

    fn bound_to_band1() -> SessionState {
        let catalog = catalog();
        let mut session = SessionState::new();
        session
            .identify("ana", &catalog, ReidentifyPolicy::default())
            .expect("identify");
        session.select_device("band1", &catalog).expect("select");
        session
    }

    #[test]
    fn identify_commits_normalized_identity() {
        let mut session = SessionState::new();
        let devices = session
            .identify("ANA", &catalog(), ReidentifyPolicy::default())
            .expect("identify");
        assert_eq!(devices.len(), 2);
        assert_eq!(session.identity().map(UserId::as_str), Some("ana"));
        assert!(session.bound_device().is_none());
    }

    #[test]
    fn identify_unknown_user_leaves_state_unchanged_every_time() {
        let mut session = bound_to_band1();
        let before = session.clone();
        for _ in 0..3 {
            let err = session
                .identify("ghost", &catalog(), ReidentifyPolicy::default())
                .expect_err("unknown user");
            assert_eq!(
                err,
                BandError::Rejected(Rejection::NoSuchUser {
                    user: "ghost".to_string()
                })
            );
            assert_eq!(session, before);
        }
    }

    #[test]
    fn identify_blank_user_is_no_such_user() {
        let mut session = SessionState::new();
        let err = session
            .identify("  ", &catalog(), ReidentifyPolicy::default())
            .expect_err("blank");
        assert_eq!(err.code(), "no_such_user");
        assert!(session.identity().is_none());
    }

    #[test]
    fn identify_catalog_failure_is_transport_error() {
        let mut session = SessionState::new();
        let err = session
            .identify("ana", &BrokenCatalog, ReidentifyPolicy::default())
            .expect_err("broken catalog");
        assert!(matches!(err, BandError::Failed(TransportError::Catalog { .. })));
        assert!(session.identity().is_none());
    }

    #[test]
    fn reidentify_as_other_user_clears_selection_by_default() {
        let mut session = bound_to_band1();
        session
            .identify("luis", &catalog(), ReidentifyPolicy::ClearSelection)
            .expect("identify luis");
        assert_eq!(session.identity().map(UserId::as_str), Some("luis"));
        assert!(session.bound_device().is_none());
    }

    #[test]
    fn reidentify_as_other_user_keeps_selection_when_preserving() {
        let mut session = bound_to_band1();
        session
            .identify("luis", &catalog(), ReidentifyPolicy::PreserveSelection)
            .expect("identify luis");
        assert_eq!(session.identity().map(UserId::as_str), Some("luis"));
        assert_eq!(
            session.bound_device().map(|d| d.nickname.as_str()),
            Some("band1")
        );
    }

    #[test]
    fn reidentify_as_same_user_keeps_selection_under_both_policies() {
        for policy in [
            ReidentifyPolicy::ClearSelection,
            ReidentifyPolicy::PreserveSelection,
        ] {
            let mut session = bound_to_band1();
            session
                .identify("Ana", &catalog(), policy)
                .expect("identify again");
            assert!(session.bound_device().is_some(), "policy {:?}", policy);
        }
    }

    #[test]
    fn select_requires_identity() {
        let mut session = SessionState::new();
        let err = session
            .select_device("band1", &catalog())
            .expect_err("no identity");
        assert_eq!(err, BandError::Rejected(Rejection::NoIdentity));
    }

    #[test]
    fn select_is_case_insensitive() {
        let catalog = catalog();
        let mut upper = SessionState::new();
        let mut lower = SessionState::new();
        for session in [&mut upper, &mut lower] {
            session
                .identify("ana", &catalog, ReidentifyPolicy::default())
                .expect("identify");
        }

        let a = upper.select_device("Band1", &catalog).expect("Band1");
        let b = lower.select_device("band1", &catalog).expect("band1");
        assert_eq!(a, b);
        assert_eq!(a.physical_id, "SN-1");
    }

    #[test]
    fn select_miss_keeps_previous_binding() {
        let mut session = bound_to_band1();
        let err = session
            .select_device("bandX", &catalog())
            .expect_err("missing device");
        assert_eq!(
            err,
            BandError::Rejected(Rejection::NoSuchDevice {
                nickname: "bandX".to_string()
            })
        );
        assert_eq!(
            session.bound_device().map(|d| d.physical_id.as_str()),
            Some("SN-1")
        );
    }

    #[test]
    fn select_cannot_reach_other_users_devices() {
        let mut session = SessionState::new();
        session
            .identify("ana", &catalog(), ReidentifyPolicy::default())
            .expect("identify");
        let err = session
            .select_device("wrist", &catalog())
            .expect_err("luis's device");
        assert_eq!(err.code(), "no_such_device");
        assert!(session.bound_device().is_none());
    }
}
