mod common;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use common::eventually;
use huddle::crypto::digest::{lock_name, meeting_key};
use huddle::error::{AppError, Result};
use huddle::models::session::{Session, SessionKind, CONFIRMED_TTL};
use huddle::store::feed::MemoryFeed;
use huddle::store::kv::{KeyValueStore, MemoryKv, ScanPage};
use huddle::store::lock::{DistributedLock, MemoryLock};
use huddle::store::session::{SessionStore, StoreOptions, KEY_PREFIX};

const SCAN: &str = "scan";

/// Parks the first matching call after it has read the store, until released.
struct Gate {
    target: String,
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

impl Gate {
    fn take(&self, call: &str) -> bool {
        call == self.target && self.armed.swap(false, Ordering::SeqCst)
    }

    async fn hold(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

/// A shared store whose first scan, or first read of one key, can be held open.
#[derive(Clone)]
struct GatedKv {
    inner: MemoryKv,
    gate: Arc<Gate>,
}

impl GatedKv {
    fn new(inner: MemoryKv, target: &str) -> Self {
        Self {
            inner,
            gate: Arc::new(Gate {
                target: target.to_string(),
                armed: AtomicBool::new(true),
                reached: Notify::new(),
                release: Notify::new(),
            }),
        }
    }

    async fn reached(&self) {
        self.gate.reached.notified().await;
    }

    fn release(&self) {
        self.gate.release.notify_one();
    }
}

#[async_trait]
impl KeyValueStore for GatedKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn get_with_ttl(&self, key: &str) -> Result<Option<(String, Option<Duration>)>> {
        let value = self.inner.get_with_ttl(key).await?;
        if self.gate.take(key) {
            self.gate.hold().await;
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let page = self.inner.scan(cursor, pattern, count).await?;
        if self.gate.take(SCAN) {
            self.gate.hold().await;
        }
        Ok(page)
    }
}

struct Cluster {
    kv: MemoryKv,
    feed: MemoryFeed,
    lock: MemoryLock,
}

impl Cluster {
    fn new() -> Self {
        Self {
            kv: MemoryKv::new(),
            feed: MemoryFeed::new(),
            lock: MemoryLock::new(),
        }
    }

    fn replica(&self) -> Arc<SessionStore> {
        self.replica_over(Arc::new(self.kv.clone()))
    }

    fn replica_over(&self, kv: Arc<dyn KeyValueStore>) -> Arc<SessionStore> {
        SessionStore::new(
            kv,
            Arc::new(self.feed.clone()),
            Arc::new(self.lock.clone()),
            StoreOptions {
                page_size: 3,
                ..StoreOptions::default()
            },
        )
    }

    async fn started(&self) -> Arc<SessionStore> {
        let store = self.replica();
        store.start().await.unwrap();
        store.wait_hydrated().await;
        store
    }
}

fn session(owner: &str, filename: &str) -> Session {
    Session::provisional(owner, filename, &format!("https://files.example.com/{}", filename))
}

#[tokio::test]
async fn replicas_converge_on_create_and_delete() {
    let cluster = Cluster::new();
    let a = cluster.started().await;
    let b = cluster.started().await;
    let key = meeting_key("85412345678");

    let created = a.create(&key, session("alice", "plan.docx")).await.unwrap();

    assert!(
        eventually(|| async { b.cached(&key).await.as_ref() == Some(&created) }).await,
        "replica b never saw the create"
    );

    a.delete(&key).await.unwrap();

    assert!(
        eventually(|| async { b.cached(&key).await.is_none() }).await,
        "replica b never saw the delete"
    );
    assert!(matches!(b.get(&key).await, Err(AppError::NotFound)));
}

#[tokio::test]
async fn only_one_replica_wins_a_concurrent_create() {
    let cluster = Cluster::new();
    let a = cluster.started().await;
    let b = cluster.started().await;
    let key = meeting_key("race");

    let (left, right) = tokio::join!(
        a.create(&key, session("alice", "a.docx")),
        b.create(&key, session("bob", "b.docx"))
    );

    let winners = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if left.is_ok() { right } else { left };
    assert!(matches!(loser, Err(AppError::AlreadyExists) | Err(AppError::Lock(_))));

    let seen_a = a.get(&key).await.unwrap();
    let seen_b = b.get(&key).await.unwrap();
    assert_eq!(seen_a.doc_key, seen_b.doc_key);
}

#[tokio::test]
async fn confirmation_reaches_other_replicas() {
    let cluster = Cluster::new();
    let a = cluster.started().await;
    let b = cluster.started().await;
    let key = meeting_key("confirm-me");

    let created = a.create(&key, session("alice", "deck.pptx")).await.unwrap();
    b.confirm(&key).await.unwrap();

    assert!(
        eventually(|| async {
            a.cached(&key)
                .await
                .is_some_and(|s| s.kind == SessionKind::Confirmed && s.doc_key == created.doc_key)
        })
        .await
    );
}

#[tokio::test]
async fn late_replica_hydrates_existing_sessions() {
    let cluster = Cluster::new();
    let writer = cluster.started().await;

    let mut keys = Vec::new();
    for n in 0..10 {
        let key = meeting_key(&format!("meeting-{}", n));
        writer
            .create(&key, session("alice", &format!("file-{}.xlsx", n)))
            .await
            .unwrap();
        keys.push(key);
    }

    let late = cluster.started().await;
    for key in &keys {
        assert!(late.cached(key).await.is_some(), "{} was not hydrated", key);
    }
}

#[tokio::test]
async fn events_during_hydration_are_applied_afterwards() {
    let cluster = Cluster::new();
    let writer = cluster.started().await;

    let stale = meeting_key("stale");
    let early = meeting_key("early");
    writer.create(&stale, session("alice", "old.docx")).await.unwrap();
    let created = writer.create(&early, session("alice", "deck.pptx")).await.unwrap();

    let gated = GatedKv::new(cluster.kv.clone(), SCAN);
    let late = cluster.replica_over(Arc::new(gated.clone()));
    late.start().await.unwrap();
    gated.reached().await;

    // the scan page is already read; these land while hydration is parked
    let fresh = meeting_key("fresh");
    writer.create(&fresh, session("bob", "new.docx")).await.unwrap();
    writer.confirm(&early).await.unwrap();
    writer.delete(&stale).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(late.cached(&fresh).await.is_none(), "feed applied during hydration");

    gated.release();
    late.wait_hydrated().await;

    assert!(eventually(|| async { late.cached(&fresh).await.is_some() }).await);
    assert!(eventually(|| async { late.cached(&stale).await.is_none() }).await);
    assert!(
        eventually(|| async {
            late.cached(&early)
                .await
                .is_some_and(|s| s.kind == SessionKind::Confirmed && s.doc_key == created.doc_key)
        })
        .await
    );
}

#[tokio::test]
async fn removal_during_hydration_read_is_not_undone() {
    let cluster = Cluster::new();
    let writer = cluster.started().await;
    let key = meeting_key("ending");
    writer.create(&key, session("alice", "old.docx")).await.unwrap();

    let gated = GatedKv::new(cluster.kv.clone(), &format!("{}{}", KEY_PREFIX, key));
    let late = cluster.replica_over(Arc::new(gated.clone()));
    late.start().await.unwrap();
    gated.reached().await;

    writer.delete(&key).await.unwrap();
    gated.release();
    late.wait_hydrated().await;

    assert!(eventually(|| async { late.cached(&key).await.is_none() }).await);
    assert!(matches!(late.get(&key).await, Err(AppError::NotFound)));
}

#[tokio::test]
async fn delete_during_a_backfill_read_is_not_undone() {
    let cluster = Cluster::new();
    let a = cluster.started().await;
    let key = meeting_key("backfill");
    let storage = format!("{}{}", KEY_PREFIX, key);

    let gated = GatedKv::new(cluster.kv.clone(), &storage);
    let b = cluster.replica_over(Arc::new(gated.clone()));
    b.start().await.unwrap();
    b.wait_hydrated().await;

    // written behind the replicas so b has no local copy
    let confirmed = session("alice", "plan.docx").confirmed();
    cluster
        .kv
        .set(&storage, &serde_json::to_string(&confirmed).unwrap(), Some(CONFIRMED_TTL))
        .await
        .unwrap();

    let reader = {
        let b = Arc::clone(&b);
        let key = key.clone();
        tokio::spawn(async move { b.get(&key).await })
    };
    gated.reached().await;

    a.delete(&key).await.unwrap();
    // give b time to apply the removal while its read is still parked
    tokio::time::sleep(Duration::from_millis(100)).await;
    gated.release();

    assert_eq!(reader.await.unwrap().unwrap(), confirmed);
    assert!(cluster.kv.get(&storage).await.unwrap().is_none());
    assert!(b.cached(&key).await.is_none());
    assert!(matches!(b.get(&key).await, Err(AppError::NotFound)));
}

#[tokio::test]
async fn held_lock_on_another_replica_aborts_the_write() {
    let cluster = Cluster::new();
    let a = cluster.started().await;
    let key = meeting_key("busy");

    let name = lock_name(&key);
    let token = cluster
        .lock
        .try_acquire(&name, Duration::from_secs(10))
        .await
        .unwrap()
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = a.create(&key, session("alice", "x.docx")).await;
    assert!(matches!(result, Err(AppError::Lock(_))));
    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(cluster.kv.get(&format!("session:{}", key)).await.unwrap(), None);

    cluster.lock.release(&name, &token).await.unwrap();
    assert!(a.create(&key, session("alice", "x.docx")).await.is_ok());
}
