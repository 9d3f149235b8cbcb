//! Bounded per-instance session cache.

use moka::{future::Cache, policy::EvictionPolicy};
use std::time::Duration;
use tokio::time::Instant;

use crate::models::session::Session;

#[derive(Debug, Clone)]
struct LocalEntry {
    session: Session,
    expires_at: Option<Instant>,
}

/// Size-bounded cache with per-entry expiry measured on the tokio clock.
///
/// Least recently used entries are evicted at capacity. Expiry mirrors the
/// authoritative TTL so a replica never serves a session past its lifetime.
#[derive(Clone)]
pub struct LocalCache {
    entries: Cache<String, LocalEntry>,
}

impl LocalCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Session> {
        let entry = self.entries.get(key).await?;
        if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
            self.entries.invalidate(key).await;
            return None;
        }
        Some(entry.session)
    }

    pub async fn insert(&self, key: &str, session: Session, ttl: Option<Duration>) {
        let entry = LocalEntry {
            session,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry).await;
    }

    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate entry count after pending maintenance has run.
    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}
