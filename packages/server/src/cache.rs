use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use common::EntityKind;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process key/value cache with per-entry TTL plus a presence set.
///
/// Everything here is advisory: callers fall back to the database on a miss
/// and ignore failures.
pub struct Cache {
    entries: DashMap<String, Entry>,
    /// user id -> number of live sessions.
    presence: DashMap<String, usize>,
    ttl: Duration,
}

impl Cache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            presence: DashMap::new(),
            ttl,
        }
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        match serde_json::from_str(&entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "Dropping undecodable cache entry");
                drop(entry);
                self.entries.remove(key);
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        let Ok(value) = serde_json::to_string(value) else {
            return;
        };
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn mark_online(&self, user_id: &str) {
        *self.presence.entry(user_id.to_string()).or_insert(0) += 1;
    }

    /// Release one session of `user_id`; the user goes offline with the last.
    pub fn mark_offline(&self, user_id: &str) {
        self.presence.remove_if_mut(user_id, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.contains_key(user_id)
    }
}

/// Key of the cached ticket list of an event.
pub fn ticket_list_key(event_id: &str) -> String {
    format!("{}{event_id}:tickets", EntityKind::Event.cache_prefix())
}
