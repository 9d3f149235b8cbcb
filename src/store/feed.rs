//! Change feed that keeps replica caches in step with the authoritative store.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::tasks::with_deadline;

pub const UPDATED_TOPIC: &str = "session-updated";
pub const REMOVED_TOPIC: &str = "session-removed";

const SUBSCRIBER_BUFFER: usize = 4096;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A change observed on the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Updated {
        key: String,
        session: Session,
        /// Remaining lifetime at publish time.
        ttl_ms: Option<u64>,
    },
    Removed {
        key: String,
    },
    /// Messages may have been missed. Local state must be rebuilt.
    Resync,
}

#[derive(Serialize, Deserialize)]
struct UpdatedPayload {
    key: String,
    session: Session,
    #[serde(default)]
    ttl_ms: Option<u64>,
}

/// Topic and payload for an event, or `None` for local-only events.
pub fn encode(event: &FeedEvent) -> Result<Option<(&'static str, String)>> {
    match event {
        FeedEvent::Updated {
            key,
            session,
            ttl_ms,
        } => {
            let payload = sonic_rs::to_string(&UpdatedPayload {
                key: key.clone(),
                session: session.clone(),
                ttl_ms: *ttl_ms,
            })
            .map_err(|e| AppError::Internal(format!("Could not encode feed event: {}", e)))?;
            Ok(Some((UPDATED_TOPIC, payload)))
        }
        FeedEvent::Removed { key } => Ok(Some((REMOVED_TOPIC, key.clone()))),
        FeedEvent::Resync => Ok(None),
    }
}

pub fn decode(topic: &str, payload: &str) -> Result<FeedEvent> {
    match topic {
        UPDATED_TOPIC => {
            let update: UpdatedPayload = sonic_rs::from_str(payload)
                .map_err(|e| AppError::Validation(format!("Malformed update: {}", e)))?;
            Ok(FeedEvent::Updated {
                key: update.key,
                session: update.session,
                ttl_ms: update.ttl_ms,
            })
        }
        REMOVED_TOPIC if !payload.trim().is_empty() => Ok(FeedEvent::Removed {
            key: payload.to_string(),
        }),
        other => Err(AppError::Validation(format!(
            "Unexpected feed message on {}",
            other
        ))),
    }
}

/// Publish/subscribe transport for session changes.
#[async_trait]
pub trait SessionFeed: Send + Sync {
    async fn publish(&self, event: &FeedEvent) -> Result<()>;

    /// Returns once the subscription is live. Events arrive in receipt order.
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>>;
}

/// Redis pub/sub feed.
#[derive(Clone)]
pub struct RedisFeed {
    client: redis::Client,
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisFeed {
    pub fn new(client: redis::Client, conn: ConnectionManager, timeout: Duration) -> Self {
        Self {
            client,
            conn,
            timeout,
        }
    }

    async fn connect(client: &redis::Client) -> Result<redis::aio::PubSub> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(UPDATED_TOPIC).await?;
        pubsub.subscribe(REMOVED_TOPIC).await?;
        Ok(pubsub)
    }

    /// Forwards messages until the connection drops or the receiver goes away.
    /// Returns `false` when the receiver is gone.
    async fn pump(pubsub: redis::aio::PubSub, tx: &mpsc::Sender<FeedEvent>) -> bool {
        let mut stream = pubsub.into_on_message();
        while let Some(msg) = stream.next().await {
            let topic = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Dropping unreadable feed payload on {}: {}", topic, e);
                    continue;
                }
            };

            match decode(&topic, &payload) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        return false;
                    }
                }
                Err(e) => tracing::warn!("Dropping feed message: {}", e),
            }
        }
        true
    }
}

#[async_trait]
impl SessionFeed for RedisFeed {
    async fn publish(&self, event: &FeedEvent) -> Result<()> {
        let Some((topic, payload)) = encode(event)? else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "feed publish", async move {
            let _: i64 = redis::cmd("PUBLISH")
                .arg(topic)
                .arg(payload)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>> {
        let first = Self::connect(&self.client).await?;
        tracing::info!("Subscribed to {} and {}", UPDATED_TOPIC, REMOVED_TOPIC);

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let client = self.client.clone();

        tokio::spawn(async move {
            if !Self::pump(first, &tx).await {
                return;
            }

            let mut backoff = Duration::from_millis(250);
            loop {
                tracing::warn!("Session feed disconnected, reconnecting in {:?}", backoff);
                tokio::time::sleep(backoff).await;

                match Self::connect(&client).await {
                    Ok(pubsub) => {
                        tracing::info!("Session feed resubscribed");
                        backoff = Duration::from_millis(250);
                        if tx.send(FeedEvent::Resync).await.is_err() {
                            return;
                        }
                        if !Self::pump(pubsub, &tx).await {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Session feed reconnect failed: {}", e);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// In-process broadcast feed shared by replicas in tests.
#[derive(Clone)]
pub struct MemoryFeed {
    tx: broadcast::Sender<FeedEvent>,
    fail_publish: Arc<AtomicBool>,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            tx,
            fail_publish: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionFeed for MemoryFeed {
    async fn publish(&self, event: &FeedEvent) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::Backend("feed unavailable".into()));
        }
        if matches!(event, FeedEvent::Resync) {
            return Ok(());
        }
        // no subscribers is not an error
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>> {
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        tokio::spawn(async move {
            loop {
                let event = match source.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Session feed lagged, {} messages missed", missed);
                        FeedEvent::Resync
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
