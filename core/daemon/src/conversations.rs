//! Per-conversation session registry.
//!
//! Each conversation id owns one `SessionState` behind its own mutex, so
//! commands within a conversation run one at a time while separate
//! conversations proceed in parallel.

use smartband_core::SessionState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Conversation {
    session: Arc<Mutex<SessionState>>,
    last_seen: Instant,
}

pub struct ConversationRegistry {
    conversations: Mutex<HashMap<String, Conversation>>,
    idle_ttl: Duration,
}

impl ConversationRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Returns the session for `conversation_id`, creating an empty one on first use.
    pub fn get_or_create(&self, conversation_id: &str) -> Arc<Mutex<SessionState>> {
        let mut conversations = self.lock();
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation {
                session: Arc::new(Mutex::new(SessionState::new())),
                last_seen: Instant::now(),
            });
        entry.last_seen = Instant::now();
        Arc::clone(&entry.session)
    }

    /// Drops the conversation. Returns false if it was unknown.
    pub fn end(&self, conversation_id: &str) -> bool {
        self.lock().remove(conversation_id).is_some()
    }

    /// Removes conversations untouched for longer than the idle TTL.
    pub fn prune_idle(&self, now: Instant) -> usize {
        let mut conversations = self.lock();
        let before = conversations.len();
        let ttl = self.idle_ttl;
        conversations.retain(|_, conversation| now.duration_since(conversation.last_seen) <= ttl);
        before - conversations.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
