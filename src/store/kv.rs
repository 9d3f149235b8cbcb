//! The authoritative key-value store behind the session replicas.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;
use crate::tasks::with_deadline;

/// One page of a cursor scan. A returned cursor of `0` ends the scan.
#[derive(Debug, Default)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Get, set-with-TTL, delete and cursor scan over string values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// The value together with its remaining time to live, if it has one.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Writes only when `key` is absent. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis-backed store. Every call runs under the configured deadline.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisKv {
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl KeyValueStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "kv get", async move {
            let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "kv get with ttl", async move {
            let (value, pttl): (Option<String>, i64) = redis::pipe()
                .cmd("GET")
                .arg(key)
                .cmd("PTTL")
                .arg(key)
                .query_async(&mut conn)
                .await?;

            // PTTL is -1 without expiry and -2 when the key vanished in between
            Ok(value.map(|v| {
                let ttl = u64::try_from(pttl).ok().map(Duration::from_millis);
                (v, ttl)
            }))
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "kv set", async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            let _: () = cmd.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "kv set nx", async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value).arg("NX");
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            let reply: Option<String> = cmd.query_async(&mut conn).await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "kv delete", async move {
            let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "kv scan", async move {
            let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;
            Ok(ScanPage { cursor, keys })
        })
        .await
    }
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local store with TTLs on the tokio clock.
///
/// Shared between replicas in tests to stand in for one Redis deployment.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<BTreeMap<String, MemoryEntry>>>,
    reads: Arc<AtomicUsize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` and `get_with_ttl` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Live contents, for assertions.
    pub fn snapshot(&self) -> HashMap<String, String> {
        let now = Instant::now();
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        Ok(self.live(key).map(|entry| {
            let ttl = entry.expires_at.map(|at| at.saturating_duration_since(now));
            (entry.value, ttl)
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let entry = MemoryEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self.entries.lock().remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(now)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let now = Instant::now();
        let entries = self.entries.lock();
        let count = count.max(1);
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);

        let live: Vec<&String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && matches_pattern(pattern, key))
            .map(|(key, _)| key)
            .collect();

        let keys: Vec<String> = live.iter().skip(start).take(count).map(|k| k.to_string()).collect();
        let next = start + keys.len();
        let cursor = if next >= live.len() { 0 } else { next as u64 };

        Ok(ScanPage { cursor, keys })
    }
}
