//! Command execution: route, gate, dispatch, and fold the outcome into a reply.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::catalog::DeviceCatalog;
use crate::config::BandConfig;
use crate::error::{BandError, Rejection, TransportError};
use crate::gate::CommandGate;
use crate::messages::Phrasebook;
use crate::request::ShadowRequester;
use crate::router::{IntentRouter, RouteError, Routed};
use crate::session::{ReidentifyPolicy, SessionState};
use crate::shadow::{DeviceKey, ShadowStore};
use crate::types::{Command, DeviceRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok,
    Rejected,
    Failed,
}

/// What the front end speaks back. One reply per inbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub message: String,
    pub reprompt: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Reply {
    fn ok(message: String) -> Self {
        Self {
            reprompt: message.clone(),
            message,
            outcome: Outcome::Ok,
            code: None,
        }
    }

    fn not_ok(message: String, outcome: Outcome, code: &str) -> Self {
        Self {
            reprompt: message.clone(),
            message,
            outcome,
            code: Some(code.to_string()),
        }
    }
}

pub struct CommandEngine {
    catalog: Arc<dyn DeviceCatalog>,
    requester: ShadowRequester,
    phrasebook: Phrasebook,
    policy: ReidentifyPolicy,
    deadline: Duration,
}

impl CommandEngine {
    pub fn new(
        catalog: Arc<dyn DeviceCatalog>,
        store: Arc<dyn ShadowStore>,
        config: &BandConfig,
    ) -> Self {
        Self {
            catalog,
            requester: ShadowRequester::new(store, config.shadow.quiescence()),
            phrasebook: Phrasebook::new(config.speech.locale),
            policy: config.session.on_reidentify,
            deadline: config.shadow.deadline(),
        }
    }

    pub fn phrasebook(&self) -> &Phrasebook {
        &self.phrasebook
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Routes and executes inline, on the caller's thread.
    pub fn handle(
        &self,
        session: &mut SessionState,
        operation: &str,
        value: Option<&str>,
    ) -> Reply {
        match IntentRouter::route(operation, value) {
            Ok(Routed::Launch) => Reply::ok(self.phrasebook.welcome()),
            Ok(Routed::Command(command)) => self.execute(session, &command),
            Err(err) => self.route_reply(&err),
        }
    }

    /// Like `handle`, but bounded by the configured deadline.
    ///
    /// The command runs on a worker thread that holds the session lock for its
    /// whole duration, so commands within one conversation stay serialized.
    /// The worker mutates a copy of the session and writes it back only if the
    /// caller is still waiting; a command that misses the deadline leaves the
    /// session as it was. A worker that cannot take the lock before the
    /// deadline gives up without running.
    pub fn handle_with_deadline(
        self: &Arc<Self>,
        session: Arc<Mutex<SessionState>>,
        operation: &str,
        value: Option<&str>,
    ) -> Reply {
        let command = match IntentRouter::route(operation, value) {
            Ok(Routed::Launch) => return Reply::ok(self.phrasebook.welcome()),
            Ok(Routed::Command(command)) => command,
            Err(err) => return self.route_reply(&err),
        };

        let started = Instant::now();
        let expires_at = started + self.deadline;
        let (tx, rx) = mpsc::channel();
        let handoff = Arc::new(AtomicU8::new(PENDING));
        let worker_handoff = Arc::clone(&handoff);
        let engine = Arc::clone(self);
        let worker_command = command.clone();
        thread::spawn(move || {
            let Some(mut guard) = lock_until(&session, expires_at) else {
                return;
            };
            let mut working = (*guard).clone();
            let reply = engine.execute(&mut working, &worker_command);
            if worker_handoff
                .compare_exchange(PENDING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                *guard = working;
                let _ = tx.send(reply);
            }
        });

        match rx.recv_timeout(self.deadline) {
            Ok(reply) => reply,
            Err(_) => {
                if handoff
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // The worker committed just before the deadline; its reply is in flight.
                    if let Ok(reply) = rx.recv() {
                        return reply;
                    }
                }
                let failure = TransportError::DeadlineExceeded {
                    operation: command.operation(),
                    elapsed_ms: started.elapsed().as_millis(),
                };
                warn!(
                    operation = command.operation(),
                    deadline_ms = self.deadline.as_millis() as u64,
                    error = %failure,
                    "Command abandoned at deadline"
                );
                let err = BandError::Failed(failure);
                Reply::not_ok(
                    self.phrasebook.error(Some(&command), &err),
                    Outcome::Failed,
                    err.code(),
                )
            }
        }
    }

    pub fn execute(&self, session: &mut SessionState, command: &Command) -> Reply {
        let operation = command.operation();
        match self.run(session, command) {
            Ok(message) => {
                info!(operation, outcome = "ok", "Command handled");
                Reply::ok(message)
            }
            Err(err) => {
                let device_key = session
                    .bound_device()
                    .map(|device| DeviceKey::for_physical_id(&device.physical_id).to_string());
                let outcome = match &err {
                    BandError::Rejected(_) => {
                        info!(operation, code = err.code(), "Command rejected");
                        Outcome::Rejected
                    }
                    BandError::Failed(failure) => {
                        warn!(
                            operation,
                            device_key = ?device_key,
                            error = %failure,
                            "Command failed"
                        );
                        Outcome::Failed
                    }
                };
                Reply::not_ok(self.phrasebook.error(Some(command), &err), outcome, err.code())
            }
        }
    }

    fn run(&self, session: &mut SessionState, command: &Command) -> Result<String, BandError> {
        match command {
            Command::Identify(user) => {
                let devices = session.identify(user, self.catalog.as_ref(), self.policy)?;
                let nicknames: Vec<&str> = devices.iter().map(|d| d.nickname.as_str()).collect();
                let name = session
                    .identity()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| user.clone());
                Ok(self.phrasebook.greeting(&name, &nicknames))
            }
            Command::SelectDevice(nickname) => {
                CommandGate::check(session, false)?;
                let device = session.select_device(nickname, self.catalog.as_ref())?;
                Ok(self.phrasebook.device_selected(&device.nickname))
            }
            Command::ReadField(field) => {
                CommandGate::check(session, true)?;
                let device = bound(session)?;
                let value = self.requester.fetch_field(&device, *field)?;
                Ok(self.phrasebook.field_value(*field, &value))
            }
            Command::WriteThreshold(field, raw) => {
                CommandGate::check(session, true)?;
                let device = bound(session)?;
                let value = self.requester.set_threshold(&device, *field, raw)?;
                Ok(self.phrasebook.threshold_set(*field, value))
            }
        }
    }

    fn route_reply(&self, err: &RouteError) -> Reply {
        let code = match err {
            RouteError::UnknownOperation(_) => "unknown_operation",
            RouteError::MissingSlot { .. } => "missing_slot",
        };
        info!(code, error = %err, "Command not routed");
        Reply::not_ok(self.phrasebook.route_error(err), Outcome::Rejected, code)
    }
}

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const ABANDONED: u8 = 2;
const LOCK_POLL: Duration = Duration::from_millis(5);

fn lock_until(
    session: &Mutex<SessionState>,
    expires_at: Instant,
) -> Option<MutexGuard<'_, SessionState>> {
    loop {
        match session.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                if Instant::now() >= expires_at {
                    return None;
                }
                thread::sleep(LOCK_POLL);
            }
        }
    }
}

fn bound(session: &SessionState) -> Result<DeviceRef, BandError> {
    session
        .bound_device()
        .cloned()
        .ok_or_else(|| Rejection::NoDevice.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::error::{CatalogError, StoreError};
    use crate::shadow::{DesiredPatch, MemoryShadowStore, ReportedSnapshot};
    use serde_json::json;

    fn quick_config() -> BandConfig {
        let mut config = BandConfig::default();
        config.shadow.quiescence_ms = 5;
        config.shadow.deadline_margin_ms = 2000;
        config
    }

    fn catalog() -> Arc<StaticCatalog> {
        Arc::new(
            StaticCatalog::new()
                .with_device("ana", DeviceRef::new("band1", "SN-1"))
                .with_device("ana", DeviceRef::new("band2", "SN-2")),
        )
    }

    fn engine_with(store: Arc<MemoryShadowStore>, config: &BandConfig) -> CommandEngine {
        CommandEngine::new(catalog(), store, config)
    }

    #[test]
    fn launch_greets_without_touching_session() {
        let engine = engine_with(Arc::new(MemoryShadowStore::new()), &quick_config());
        let mut session = SessionState::new();
        let reply = engine.handle(&mut session, "launch", None);
        assert_eq!(reply.outcome, Outcome::Ok);
        assert!(reply.message.contains("username"));
        assert_eq!(session, SessionState::new());
    }

    #[test]
    fn read_before_identify_is_no_identity() {
        let store = Arc::new(MemoryShadowStore::new());
        let engine = engine_with(Arc::clone(&store), &quick_config());
        let mut session = SessionState::new();

        let reply = engine.handle(&mut session, "read-heart-rate", None);
        assert_eq!(reply.outcome, Outcome::Rejected);
        assert_eq!(reply.code.as_deref(), Some("no_identity"));
        assert!(store.desired_writes().is_empty());
    }

    #[test]
    fn read_without_device_is_no_device() {
        let engine = engine_with(Arc::new(MemoryShadowStore::new()), &quick_config());
        let mut session = SessionState::new();
        engine.handle(&mut session, "identify-user", Some("ana"));

        let reply = engine.handle(&mut session, "read-steps", None);
        assert_eq!(reply.code.as_deref(), Some("no_device"));
    }

    #[test]
    fn unknown_operation_replies_instead_of_failing() {
        let engine = engine_with(Arc::new(MemoryShadowStore::new()), &quick_config());
        let mut session = SessionState::new();
        let reply = engine.handle(&mut session, "dance", None);
        assert_eq!(reply.outcome, Outcome::Rejected);
        assert_eq!(reply.code.as_deref(), Some("unknown_operation"));
    }

    #[test]
    fn reply_reprompt_defaults_to_message() {
        let engine = engine_with(Arc::new(MemoryShadowStore::new()), &quick_config());
        let mut session = SessionState::new();
        let reply = engine.handle(&mut session, "identify-user", Some("ana"));
        assert_eq!(reply.message, reply.reprompt);
        assert!(reply.message.contains("band1, band2"));
    }

    #[test]
    fn deadline_bounds_a_hung_store() {
        struct HangingStore;
        impl ShadowStore for HangingStore {
            fn set_desired(&self, _: &DeviceKey, _: &DesiredPatch) -> Result<(), StoreError> {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            }
            fn get_reported(&self, _: &DeviceKey) -> Result<ReportedSnapshot, StoreError> {
                Ok(ReportedSnapshot::default())
            }
        }

        let mut config = quick_config();
        config.shadow.deadline_margin_ms = 50;
        let engine = Arc::new(CommandEngine::new(catalog(), Arc::new(HangingStore), &config));

        let session = Arc::new(Mutex::new(SessionState::new()));
        engine.handle_with_deadline(Arc::clone(&session), "identify-user", Some("ana"));
        engine.handle_with_deadline(Arc::clone(&session), "select-device", Some("band1"));

        let started = Instant::now();
        let reply = engine.handle_with_deadline(Arc::clone(&session), "read-heart-rate", None);
        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(reply.outcome, Outcome::Failed);
        assert_eq!(reply.code.as_deref(), Some("deadline_exceeded"));
    }

    #[test]
    fn deadline_path_returns_worker_reply_when_fast() {
        let store = Arc::new(MemoryShadowStore::new());
        store.publish_reported(
            &DeviceKey::for_physical_id("SN-2"),
            json!({"steps": 4200}).as_object().expect("object"),
        );
        let engine = Arc::new(engine_with(Arc::clone(&store), &quick_config()));
        let session = Arc::new(Mutex::new(SessionState::new()));

        engine.handle_with_deadline(Arc::clone(&session), "identify-user", Some("Ana"));
        engine.handle_with_deadline(Arc::clone(&session), "select-device", Some("BAND2"));
        let reply = engine.handle_with_deadline(Arc::clone(&session), "read-steps", None);

        assert_eq!(reply.outcome, Outcome::Ok);
        assert!(reply.message.contains("4200"));
        assert_eq!(store.desired_writes().len(), 1);
    }

    struct SlowCatalog {
        delay: Duration,
        inner: Arc<StaticCatalog>,
    }

    impl DeviceCatalog for SlowCatalog {
        fn lookup(&self, user: &str) -> Result<Vec<DeviceRef>, CatalogError> {
            thread::sleep(self.delay);
            self.inner.lookup(user)
        }
    }

    fn slow_engine(delay_ms: u64) -> Arc<CommandEngine> {
        let mut config = quick_config();
        config.shadow.deadline_margin_ms = 50;
        let slow = Arc::new(SlowCatalog {
            delay: Duration::from_millis(delay_ms),
            inner: catalog(),
        });
        Arc::new(CommandEngine::new(
            slow,
            Arc::new(MemoryShadowStore::new()),
            &config,
        ))
    }

    #[test]
    fn identify_past_deadline_leaves_session_unchanged() {
        let engine = slow_engine(300);
        let session = Arc::new(Mutex::new(SessionState::new()));

        let reply =
            engine.handle_with_deadline(Arc::clone(&session), "identify-user", Some("ana"));
        assert_eq!(reply.outcome, Outcome::Failed);
        assert_eq!(reply.code.as_deref(), Some("deadline_exceeded"));

        thread::sleep(Duration::from_millis(500));
        let state = session.lock().expect("session");
        assert_eq!(state.identity(), None);
        assert_eq!(*state, SessionState::new());
    }

    #[test]
    fn queued_command_gives_up_while_session_is_busy() {
        let engine = slow_engine(300);
        let session = Arc::new(Mutex::new(SessionState::new()));

        let first =
            engine.handle_with_deadline(Arc::clone(&session), "identify-user", Some("ana"));
        let second =
            engine.handle_with_deadline(Arc::clone(&session), "identify-user", Some("ana"));
        assert_eq!(first.outcome, Outcome::Failed);
        assert_eq!(second.outcome, Outcome::Failed);

        // Neither abandoned command may land once the slow lookup finishes.
        thread::sleep(Duration::from_millis(700));
        assert_eq!(session.lock().expect("session").identity(), None);
    }
}
