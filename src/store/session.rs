//! Replicated session store.
//!
//! The external KV store holds the authoritative copy of every session with a
//! per-key TTL matching its kind. Each instance keeps a bounded local cache,
//! fed by a change feed, that `get` consults before the KV store.
//!
//! Writes take the per-key lock, write the KV store, update the local cache,
//! publish on the feed and release the lock. A failed publish is logged and
//! the write stands.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::session::{Session, SessionKind};
use crate::store::feed::{FeedEvent, SessionFeed};
use crate::store::kv::KeyValueStore;
use crate::store::local::LocalCache;
use crate::store::lock::{DistributedLock, LockManager};
use crate::validation::session::{validate_meeting_key, validate_session};

pub const KEY_PREFIX: &str = "session:";
const SCAN_PATTERN: &str = "session:*";
const HYDRATION_ATTEMPTS: u32 = 3;

fn storage_key(meeting_key: &str) -> String {
    format!("{}{}", KEY_PREFIX, meeting_key)
}

fn encode_session(session: &Session) -> Result<String> {
    sonic_rs::to_string(session)
        .map_err(|e| AppError::Internal(format!("Could not encode session: {}", e)))
}

fn decode_session(value: &str) -> Result<Session> {
    sonic_rs::from_str(value).map_err(|e| AppError::Backend(format!("Corrupt session: {}", e)))
}

/// Tuning for a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub local_capacity: u64,
    pub page_size: usize,
    pub lock_wait: Duration,
    pub lock_ttl: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            local_capacity: 10_000,
            page_size: 100,
            lock_wait: Duration::from_millis(1500),
            lock_ttl: Duration::from_secs(5),
        }
    }
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            local_capacity: config.local_cache_capacity,
            page_size: config.hydration_page_size.max(1),
            lock_wait: config.lock_wait,
            lock_ttl: config.lock_ttl,
        }
    }
}

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    feed: Arc<dyn SessionFeed>,
    locks: LockManager,
    local: LocalCache,
    page_size: usize,
    hydrated: watch::Sender<bool>,
    /// Bumped before every local cache mutation other than a backfill.
    changes: AtomicU64,
}

impl SessionStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        feed: Arc<dyn SessionFeed>,
        lock: Arc<dyn DistributedLock>,
        options: StoreOptions,
    ) -> Arc<Self> {
        let (hydrated, _) = watch::channel(false);
        Arc::new(Self {
            kv,
            feed,
            locks: LockManager::new(lock, options.lock_wait, options.lock_ttl),
            local: LocalCache::new(options.local_capacity),
            page_size: options.page_size,
            hydrated,
            changes: AtomicU64::new(0),
        })
    }

    /// Subscribes to the feed, then hydrates and starts applying feed events.
    ///
    /// Events received while hydration runs wait in the subscription buffer
    /// and are applied afterwards, in receipt order.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let events = self.feed.subscribe().await?;
        let store = Arc::clone(self);
        Ok(tokio::spawn(async move { store.run(events).await }))
    }

    async fn run(self: Arc<Self>, mut events: mpsc::Receiver<FeedEvent>) {
        self.hydrate_with_retry().await;
        self.hydrated.send_replace(true);

        while let Some(event) = events.recv().await {
            self.apply(event).await;
        }
        tracing::warn!("Session feed closed, local cache no longer receives updates");
    }

    /// Resolves once cold-start hydration has finished.
    pub async fn wait_hydrated(&self) {
        let mut rx = self.hydrated.subscribe();
        // the sender lives as long as self
        let _ = rx.wait_for(|done| *done).await;
    }

    async fn hydrate_with_retry(&self) {
        let mut backoff = Duration::from_millis(200);
        for attempt in 1..=HYDRATION_ATTEMPTS {
            match self.hydrate().await {
                Ok(count) => {
                    tracing::info!("✅ Session cache hydrated with {} sessions", count);
                    return;
                }
                Err(e) if attempt < HYDRATION_ATTEMPTS => {
                    tracing::warn!("Hydration attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    tracing::error!(
                        "❌ Hydration failed after {} attempts, serving from the store: {}",
                        attempt,
                        e
                    );
                }
            }
        }
    }

    /// Pages through the whole keyspace and fills the local cache.
    pub async fn hydrate(&self) -> Result<usize> {
        let mut cursor = 0;
        let mut loaded = 0;

        loop {
            let page = self.kv.scan(cursor, SCAN_PATTERN, self.page_size).await?;

            for key in page.keys {
                let Some(meeting_key) = key.strip_prefix(KEY_PREFIX) else {
                    continue;
                };
                let Some((value, ttl)) = self.kv.get_with_ttl(&key).await? else {
                    continue;
                };
                match decode_session(&value) {
                    Ok(session) => {
                        self.local.insert(meeting_key, session, ttl).await;
                        loaded += 1;
                    }
                    Err(e) => tracing::warn!("Skipping session {}: {}", meeting_key, e),
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                return Ok(loaded);
            }
        }
    }

    fn changed(&self) {
        self.changes.fetch_add(1, Ordering::AcqRel);
    }

    async fn apply(&self, event: FeedEvent) {
        self.changed();
        match event {
            FeedEvent::Updated {
                key,
                session,
                ttl_ms,
            } => {
                tracing::debug!("Applying session update for {}", key);
                self.local
                    .insert(&key, session, ttl_ms.map(Duration::from_millis))
                    .await;
            }
            FeedEvent::Removed { key } => {
                tracing::debug!("Applying session removal for {}", key);
                self.local.remove(&key).await;
            }
            FeedEvent::Resync => {
                tracing::warn!("Session feed resync, rebuilding local cache");
                self.local.clear();
                self.hydrate_with_retry().await;
            }
        }
    }

    async fn locked<T, F, Fut>(&self, meeting_key: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.locks.acquire(meeting_key).await?;
        let result = work().await;
        if let Err(e) = guard.release().await {
            tracing::warn!("Failed to release lock for session {}: {}", meeting_key, e);
        }
        result
    }

    async fn publish(&self, event: FeedEvent) {
        if let Err(e) = self.feed.publish(&event).await {
            tracing::error!("Session written but feed publish failed: {}", e);
        }
    }

    async fn written(&self, meeting_key: &str, session: &Session) {
        let ttl = session.ttl();
        self.changed();
        self.local.insert(meeting_key, session.clone(), Some(ttl)).await;
        self.publish(FeedEvent::Updated {
            key: meeting_key.to_string(),
            session: session.clone(),
            ttl_ms: u64::try_from(ttl.as_millis()).ok(),
        })
        .await;
    }

    /// Inserts `session` only if no live session exists for `meeting_key`.
    ///
    /// The session is stored as given; a later `get` returns it unchanged.
    pub async fn create(&self, meeting_key: &str, session: Session) -> Result<Session> {
        validate_meeting_key(meeting_key)?;
        validate_session(&session)?;

        self.locked(meeting_key, || async {
            let value = encode_session(&session)?;
            let written = self
                .kv
                .set_if_absent(&storage_key(meeting_key), &value, Some(session.ttl()))
                .await?;
            if !written {
                return Err(AppError::AlreadyExists);
            }
            self.written(meeting_key, &session).await;
            tracing::info!("Session created for {}", meeting_key);
            Ok(session.clone())
        })
        .await
    }

    /// Writes `session` whether or not one exists.
    pub async fn upsert(&self, meeting_key: &str, session: Session) -> Result<Session> {
        validate_meeting_key(meeting_key)?;
        validate_session(&session)?;

        self.locked(meeting_key, || async {
            self.store(meeting_key, &session).await?;
            Ok(session.clone())
        })
        .await
    }

    async fn store(&self, meeting_key: &str, session: &Session) -> Result<()> {
        let value = encode_session(session)?;
        self.kv
            .set(&storage_key(meeting_key), &value, Some(session.ttl()))
            .await?;
        self.written(meeting_key, session).await;
        Ok(())
    }

    /// Promotes a session to confirmed, extending it to the long TTL.
    ///
    /// Reads the authoritative copy under the lock, so the document key is
    /// carried over unchanged.
    pub async fn confirm(&self, meeting_key: &str) -> Result<Session> {
        validate_meeting_key(meeting_key)?;

        self.locked(meeting_key, || async {
            let value = self
                .kv
                .get(&storage_key(meeting_key))
                .await?
                .ok_or(AppError::NotFound)?;
            let current = decode_session(&value)?;

            let confirmed = current.confirmed();
            self.store(meeting_key, &confirmed).await?;
            if current.kind == SessionKind::Provisional {
                tracing::info!("Session confirmed for {}", meeting_key);
            }
            Ok(confirmed)
        })
        .await
    }

    /// Local copy first, then the KV store.
    ///
    /// A KV read backfills the local cache unless a feed event or a local
    /// write landed while it was in flight, in which case the backfilled
    /// entry is dropped again and the next read goes to the store.
    pub async fn get(&self, meeting_key: &str) -> Result<Session> {
        validate_meeting_key(meeting_key)?;

        if let Some(session) = self.local.get(meeting_key).await {
            return Ok(session);
        }

        let seen = self.changes.load(Ordering::Acquire);
        let (value, ttl) = self
            .kv
            .get_with_ttl(&storage_key(meeting_key))
            .await?
            .ok_or(AppError::NotFound)?;
        let session = decode_session(&value)?;

        self.local.insert(meeting_key, session.clone(), ttl).await;
        if self.changes.load(Ordering::Acquire) != seen {
            tracing::debug!("Session {} changed during backfill, dropping local copy", meeting_key);
            self.local.remove(meeting_key).await;
        }
        Ok(session)
    }

    pub async fn delete(&self, meeting_key: &str) -> Result<()> {
        validate_meeting_key(meeting_key)?;

        self.locked(meeting_key, || async {
            let removed = self.kv.delete(&storage_key(meeting_key)).await?;
            self.changed();
            self.local.remove(meeting_key).await;
            if !removed {
                return Err(AppError::NotFound);
            }
            self.publish(FeedEvent::Removed {
                key: meeting_key.to_string(),
            })
            .await;
            tracing::info!("Session removed for {}", meeting_key);
            Ok(())
        })
        .await
    }

    /// The locally cached copy, without touching the KV store.
    pub async fn cached(&self, meeting_key: &str) -> Option<Session> {
        self.local.get(meeting_key).await
    }
}
