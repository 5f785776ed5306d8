//! State shared by every daemon connection.
//!
//! The SQLite store backs both the device catalog and the shadow store; the
//! command engine and the conversation registry sit on top of it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smartband_core::{BandConfig, CommandEngine, DeviceCatalog, DeviceKey, Reply, ShadowStore};
use smartband_daemon_protocol::{CommandParams, RegisterDeviceParams, ReportParams};

use crate::conversations::ConversationRegistry;
use crate::db::{Db, ShadowDocument};

pub const MAX_ACTIVE_CONNECTIONS: usize = 64;

pub struct SharedState {
    db: Arc<Db>,
    engine: Arc<CommandEngine>,
    conversations: ConversationRegistry,
    connections: Arc<ConnectionLimiter>,
    quiescence_ms: u64,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub started_at: String,
    pub active_conversations: usize,
    pub idle_ttl_secs: u64,
    pub quiescence_ms: u64,
    pub deadline_ms: u64,
    pub security: SecuritySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecuritySnapshot {
    pub active_connections: usize,
    pub max_active_connections: usize,
    pub rejected_connections: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub conversation_id: String,
    #[serde(flatten)]
    pub reply: Reply,
}

impl SharedState {
    pub fn new(db: Db, config: &BandConfig) -> Self {
        let db = Arc::new(db);
        let catalog: Arc<dyn DeviceCatalog> = Arc::clone(&db) as Arc<dyn DeviceCatalog>;
        let store: Arc<dyn ShadowStore> = Arc::clone(&db) as Arc<dyn ShadowStore>;
        let engine = Arc::new(CommandEngine::new(catalog, store, config));
        Self {
            db,
            engine,
            conversations: ConversationRegistry::new(Duration::from_secs(
                config.session.idle_ttl_secs,
            )),
            connections: Arc::new(ConnectionLimiter::new(MAX_ACTIVE_CONNECTIONS)),
            quiescence_ms: config.shadow.quiescence_ms,
            started_at: Utc::now(),
        }
    }

    pub fn handle_command(&self, params: &CommandParams) -> CommandResult {
        let session = self.conversations.get_or_create(&params.conversation_id);
        let reply = self.engine.handle_with_deadline(
            session,
            &params.operation,
            params.value.as_deref(),
        );
        tracing::info!(
            conversation_id = %params.conversation_id,
            operation = %params.operation,
            outcome = ?reply.outcome,
            code = ?reply.code,
            "Command replied"
        );
        CommandResult {
            conversation_id: params.conversation_id.clone(),
            reply,
        }
    }

    /// Discards the conversation's session. Returns whether it existed and the farewell.
    pub fn end_conversation(&self, conversation_id: &str) -> (bool, String) {
        let ended = self.conversations.end(conversation_id);
        tracing::info!(conversation_id, ended, "Conversation ended");
        (ended, self.engine.phrasebook().goodbye())
    }

    pub fn report_state(&self, params: &ReportParams) -> Result<ShadowDocument, String> {
        let key = DeviceKey::for_physical_id(&params.physical_id);
        let document = self.db.merge_reported(&key, &params.reported)?;
        tracing::info!(
            device_key = %key,
            recorded_at = %params.recorded_at,
            fields = params.reported.len(),
            version = document.version,
            "Reported state merged"
        );
        Ok(document)
    }

    pub fn register_device(&self, params: &RegisterDeviceParams) -> Result<(), String> {
        self.db
            .register_device(&params.user, &params.nickname, &params.physical_id)?;
        tracing::info!(
            user = %params.user,
            nickname = %params.nickname,
            physical_id = %params.physical_id,
            "Device registered"
        );
        Ok(())
    }

    pub fn shadow(&self, physical_id: &str) -> Result<Option<ShadowDocument>, String> {
        self.db
            .load_shadow(&DeviceKey::for_physical_id(physical_id))
            .map_err(|err| err.to_string())
    }

    pub fn prune_idle_conversations(&self) -> usize {
        let pruned = self.conversations.prune_idle(Instant::now());
        if pruned > 0 {
            tracing::info!(pruned, "Pruned idle conversations");
        }
        pruned
    }

    pub fn try_acquire_connection(&self) -> Option<ConnectionPermit> {
        ConnectionLimiter::try_acquire(&self.connections)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            started_at: self.started_at.to_rfc3339(),
            active_conversations: self.conversations.len(),
            idle_ttl_secs: self.conversations.idle_ttl().as_secs(),
            quiescence_ms: self.quiescence_ms,
            deadline_ms: self.engine.deadline().as_millis() as u64,
            security: self.connections.snapshot(),
        }
    }
}

/// Caps concurrently served connections.
pub struct ConnectionLimiter {
    active: AtomicUsize,
    rejected: AtomicU64,
    max: usize,
}

/// Releases its slot on drop.
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
            max,
        }
    }

    pub fn try_acquire(limiter: &Arc<Self>) -> Option<ConnectionPermit> {
        let mut current = limiter.active.load(Ordering::Acquire);
        loop {
            if current >= limiter.max {
                limiter.rejected.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match limiter.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ConnectionPermit {
                        limiter: Arc::clone(limiter),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn snapshot(&self) -> SecuritySnapshot {
        SecuritySnapshot {
            active_connections: self.active.load(Ordering::Acquire),
            max_active_connections: self.max,
            rejected_connections: self.rejected.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.active.fetch_sub(1, Ordering::AcqRel);
    }
}
