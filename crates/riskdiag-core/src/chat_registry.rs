//! Chat Registry: user id -> chat binding, built from inbound bot updates.
//!
//! Memory-resident only; rebuilt from live traffic after a restart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Where to reach a user, as last observed from one of their messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatBinding {
    pub user_id: i64,
    pub chat_id: i64,
    pub last_seen_at: DateTime<Utc>,
}

/// Shared, cheaply cloneable registry. Clones see the same bindings.
///
/// Per-key `record`/`lookup` are linearizable (DashMap shard locks). A lookup that races a
/// record for the same user may miss it; callers treat `None` as a normal outcome.
#[derive(Debug, Clone, Default)]
pub struct ChatRegistry {
    bindings: Arc<DashMap<i64, ChatBinding>>,
}

impl ChatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the binding for `user_id` and refreshes `last_seen_at`.
    pub fn record(&self, user_id: i64, chat_id: i64) -> ChatBinding {
        let now = Utc::now();
        let entry = self
            .bindings
            .entry(user_id)
            .and_modify(|binding| {
                if binding.chat_id != chat_id {
                    tracing::debug!(
                        user_id,
                        old_chat_id = binding.chat_id,
                        new_chat_id = chat_id,
                        "chat binding moved"
                    );
                }
                binding.chat_id = chat_id;
                binding.last_seen_at = now;
            })
            .or_insert_with(|| {
                tracing::info!(user_id, chat_id, "new chat binding");
                ChatBinding {
                    user_id,
                    chat_id,
                    last_seen_at: now,
                }
            });
        entry.value().clone()
    }

    pub fn lookup(&self, user_id: i64) -> Option<i64> {
        self.bindings.get(&user_id).map(|b| b.chat_id)
    }

    /// Read-only copy of the full binding.
    pub fn binding(&self, user_id: i64) -> Option<ChatBinding> {
        self.bindings.get(&user_id).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
