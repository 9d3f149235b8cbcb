//! Durable queue for credentials that could not be persisted in-line.
//!
//! Records are queued sealed, so the queue never holds plaintext tokens.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::credential::SealedCredential;
use crate::services::token_cache::TokenCache;
use crate::tasks::with_deadline;

pub const FALLBACK_QUEUE: &str = "insert-auth";

#[async_trait]
pub trait FallbackQueue: Send + Sync {
    async fn publish(&self, record: &SealedCredential) -> Result<()>;

    /// Oldest queued record, if any.
    async fn pop(&self) -> Result<Option<SealedCredential>>;
}

#[derive(Clone)]
pub struct RedisFallbackQueue {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisFallbackQueue {
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl FallbackQueue for RedisFallbackQueue {
    async fn publish(&self, record: &SealedCredential) -> Result<()> {
        let payload = sonic_rs::to_string(record)
            .map_err(|e| AppError::Internal(format!("Could not encode credential: {}", e)))?;
        let mut conn = self.conn.clone();

        with_deadline(self.timeout, "fallback publish", async move {
            let _: i64 = redis::cmd("LPUSH")
                .arg(FALLBACK_QUEUE)
                .arg(payload)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn pop(&self) -> Result<Option<SealedCredential>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = with_deadline(self.timeout, "fallback pop", async move {
            let payload: Option<String> = redis::cmd("RPOP")
                .arg(FALLBACK_QUEUE)
                .query_async(&mut conn)
                .await?;
            Ok(payload)
        })
        .await?;

        match payload {
            Some(payload) => sonic_rs::from_str(&payload)
                .map(Some)
                .map_err(|e| AppError::Backend(format!("Corrupt queued credential: {}", e))),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryFallbackQueue {
    records: Arc<Mutex<VecDeque<SealedCredential>>>,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryFallbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl FallbackQueue for MemoryFallbackQueue {
    async fn publish(&self, record: &SealedCredential) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::Backend("fallback queue unavailable".into()));
        }
        self.records.lock().push_back(record.clone());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<SealedCredential>> {
        Ok(self.records.lock().pop_front())
    }
}

/// Moves up to `limit` queued records into the token cache.
///
/// Expired records, and records older than what the cache already holds,
/// are dropped. A record that still cannot be stored goes back on the queue
/// and the drain stops, leaving the rest for the next run. Returns the
/// number of records written.
pub async fn drain_once(
    queue: &dyn FallbackQueue,
    cache: &TokenCache,
    limit: usize,
) -> Result<usize> {
    let mut stored = 0;
    let mut dropped = 0;

    for _ in 0..limit {
        let Some(record) = queue.pop().await? else {
            break;
        };

        match cache.restore(&record).await {
            Ok(true) => stored += 1,
            Ok(false) => dropped += 1,
            Err(AppError::Validation(msg)) => {
                tracing::warn!("Discarding queued credential for user {}: {}", record.user_id, msg);
                dropped += 1;
            }
            Err(e) => {
                tracing::warn!(
                    "Queued credential for user {} still not stored: {}",
                    record.user_id,
                    e
                );
                queue.publish(&record).await?;
                return Err(e);
            }
        }
    }

    if stored > 0 || dropped > 0 {
        tracing::info!("Stored {} queued credentials, dropped {} stale", stored, dropped);
    }
    Ok(stored)
}
