//! Per-key mutual exclusion across instances.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::crypto::digest::lock_name;
use crate::error::{AppError, Result};
use crate::tasks::with_deadline;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A lease-based lock backend. A lease expires on its own after `ttl`.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// One attempt. Returns the holder token when the lease was taken.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>>;

    /// Releases the lease if `token` still holds it.
    async fn release(&self, name: &str, token: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct RedisLock {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisLock {
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let token = uuid::Uuid::new_v4().to_string();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();

        with_deadline(self.timeout, "lock acquire", async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(name)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(reply.map(|_| token))
        })
        .await
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "lock release", async move {
            let released: i64 = redis::Script::new(RELEASE_SCRIPT)
                .key(name)
                .arg(token)
                .invoke_async(&mut conn)
                .await?;
            Ok(released > 0)
        })
        .await
    }
}

/// Process-local lease table on the tokio clock.
#[derive(Clone, Default)]
pub struct MemoryLock {
    leases: Arc<Mutex<HashMap<String, (String, Instant)>>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        let now = Instant::now();
        self.leases
            .lock()
            .get(name)
            .is_some_and(|(_, expires_at)| *expires_at > now)
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let now = Instant::now();
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(|(_, expires_at)| *expires_at > now) {
            return Ok(None);
        }
        let token = uuid::Uuid::new_v4().to_string();
        leases.insert(name.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, name: &str, token: &str) -> Result<bool> {
        let mut leases = self.leases.lock();
        match leases.get(name) {
            Some((holder, _)) if holder == token => {
                leases.remove(name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Acquires session locks with a bounded wait.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn DistributedLock>,
    wait: Duration,
    ttl: Duration,
}

impl LockManager {
    pub fn new(backend: Arc<dyn DistributedLock>, wait: Duration, ttl: Duration) -> Self {
        Self { backend, wait, ttl }
    }

    /// Takes the lock for one meeting key, polling until the wait budget runs out.
    pub async fn acquire(&self, meeting_key: &str) -> Result<LockGuard> {
        let name = lock_name(meeting_key);
        let deadline = Instant::now() + self.wait;

        loop {
            if let Some(token) = self.backend.try_acquire(&name, self.ttl).await? {
                return Ok(LockGuard {
                    backend: Arc::clone(&self.backend),
                    name,
                    token,
                    released: false,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::Lock(format!(
                    "Timed out waiting for session lock after {}ms",
                    self.wait.as_millis()
                )));
            }

            let pause = Duration::from_millis(rand::thread_rng().gen_range(10..=40));
            tokio::time::sleep(pause.min(deadline - now)).await;
        }
    }
}

/// A held session lock. Dropping it without [`LockGuard::release`] still
/// releases it in the background.
#[must_use]
pub struct LockGuard {
    backend: Arc<dyn DistributedLock>,
    name: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.backend.release(&self.name, &self.token).await? {
            tracing::warn!("Session lock {} expired before release", self.name);
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Session lock {} dropped outside a runtime", self.name);
            return;
        };

        let backend = Arc::clone(&self.backend);
        let name = std::mem::take(&mut self.name);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = backend.release(&name, &token).await {
                tracing::error!("Failed to release session lock {}: {}", name, e);
            }
        });
    }
}
