//! Session removal requests published by the editor callback and by peers.
//!
//! Every instance receives every request. Removal is idempotent, so an
//! instance that finds the session already gone treats it as done.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::error::{AppError, Result};
use crate::services::sessions::SessionService;
use crate::tasks::with_deadline;

pub const REMOVE_SESSION_TOPIC: &str = "remove-session";
pub const REMOVE_OWNER_SESSION_TOPIC: &str = "remove-owner-session";

const SUBSCRIBER_BUFFER: usize = 1024;
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const REMOVAL_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalRequest {
    /// Remove the session stored under an already hashed meeting key.
    Session { meeting_key: String },
    /// Remove the session of a raw meeting id, only if `user_id` owns it.
    Owner { user_id: String, meeting_id: String },
}

#[derive(Serialize, Deserialize)]
struct OwnerPayload {
    uid: String,
    mid: String,
}

pub fn encode(request: &RemovalRequest) -> Result<(&'static str, String)> {
    match request {
        RemovalRequest::Session { meeting_key } => Ok((REMOVE_SESSION_TOPIC, meeting_key.clone())),
        RemovalRequest::Owner {
            user_id,
            meeting_id,
        } => {
            let payload = sonic_rs::to_string(&OwnerPayload {
                uid: user_id.clone(),
                mid: meeting_id.clone(),
            })
            .map_err(|e| AppError::Internal(format!("Could not encode removal: {}", e)))?;
            Ok((REMOVE_OWNER_SESSION_TOPIC, payload))
        }
    }
}

pub fn decode(topic: &str, payload: &str) -> Result<RemovalRequest> {
    match topic {
        REMOVE_SESSION_TOPIC if !payload.trim().is_empty() => Ok(RemovalRequest::Session {
            meeting_key: payload.trim().to_string(),
        }),
        REMOVE_OWNER_SESSION_TOPIC => {
            let owner: OwnerPayload = sonic_rs::from_str(payload)
                .map_err(|e| AppError::Validation(format!("Malformed owner removal: {}", e)))?;
            Ok(RemovalRequest::Owner {
                user_id: owner.uid,
                meeting_id: owner.mid,
            })
        }
        other => Err(AppError::Validation(format!(
            "Unexpected removal message on {}",
            other
        ))),
    }
}

#[async_trait]
pub trait RemovalQueue: Send + Sync {
    async fn publish(&self, request: &RemovalRequest) -> Result<()>;

    async fn subscribe(&self) -> Result<mpsc::Receiver<RemovalRequest>>;
}

/// Redis pub/sub channel for removal requests.
#[derive(Clone)]
pub struct RedisRemovalQueue {
    client: redis::Client,
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisRemovalQueue {
    pub fn new(client: redis::Client, conn: ConnectionManager, timeout: Duration) -> Self {
        Self {
            client,
            conn,
            timeout,
        }
    }

    async fn connect(client: &redis::Client) -> Result<redis::aio::PubSub> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(REMOVE_SESSION_TOPIC).await?;
        pubsub.subscribe(REMOVE_OWNER_SESSION_TOPIC).await?;
        Ok(pubsub)
    }

    /// Returns `false` once the receiver is gone.
    async fn pump(pubsub: redis::aio::PubSub, tx: &mpsc::Sender<RemovalRequest>) -> bool {
        let mut stream = pubsub.into_on_message();
        while let Some(msg) = stream.next().await {
            let topic = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Dropping unreadable removal on {}: {}", topic, e);
                    continue;
                }
            };

            match decode(&topic, &payload) {
                Ok(request) => {
                    if tx.send(request).await.is_err() {
                        return false;
                    }
                }
                Err(e) => tracing::warn!("Dropping removal message: {}", e),
            }
        }
        true
    }
}

#[async_trait]
impl RemovalQueue for RedisRemovalQueue {
    async fn publish(&self, request: &RemovalRequest) -> Result<()> {
        let (topic, payload) = encode(request)?;
        let mut conn = self.conn.clone();
        with_deadline(self.timeout, "removal publish", async move {
            let _: i64 = redis::cmd("PUBLISH")
                .arg(topic)
                .arg(payload)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<RemovalRequest>> {
        let first = Self::connect(&self.client).await?;
        tracing::info!(
            "Subscribed to {} and {}",
            REMOVE_SESSION_TOPIC,
            REMOVE_OWNER_SESSION_TOPIC
        );

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let client = self.client.clone();

        tokio::spawn(async move {
            if !Self::pump(first, &tx).await {
                return;
            }

            let mut backoff = Duration::from_millis(250);
            loop {
                tracing::warn!("Removal channel disconnected, reconnecting in {:?}", backoff);
                tokio::time::sleep(backoff).await;

                match Self::connect(&client).await {
                    Ok(pubsub) => {
                        backoff = Duration::from_millis(250);
                        if !Self::pump(pubsub, &tx).await {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Removal channel reconnect failed: {}", e);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// In-process broadcast channel shared by instances in tests.
#[derive(Clone)]
pub struct MemoryRemovalQueue {
    tx: broadcast::Sender<RemovalRequest>,
}

impl Default for MemoryRemovalQueue {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }
}

impl MemoryRemovalQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemovalQueue for MemoryRemovalQueue {
    async fn publish(&self, request: &RemovalRequest) -> Result<()> {
        // no subscribers is not an error
        let _ = self.tx.send(request.clone());
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<RemovalRequest>> {
        let mut source = self.tx.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        tokio::spawn(async move {
            loop {
                let request = match source.recv().await {
                    Ok(request) => request,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Removal channel lagged, {} requests missed", missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if tx.send(request).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}

async fn handle(sessions: &SessionService, request: RemovalRequest) -> Result<()> {
    match request {
        RemovalRequest::Session { meeting_key } => {
            match sessions.delete(&meeting_key).await {
                Ok(()) => tracing::info!("Session {} removed on request", meeting_key),
                Err(AppError::NotFound) => {
                    tracing::debug!("Session {} already removed", meeting_key)
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }
        RemovalRequest::Owner {
            user_id,
            meeting_id,
        } => {
            if sessions.owner_remove(&user_id, &meeting_id).await? {
                tracing::info!("Session removed on request of owner {}", user_id);
            }
            Ok(())
        }
    }
}

/// Applies removal requests until the channel closes.
pub async fn consume(sessions: Arc<SessionService>, mut requests: mpsc::Receiver<RemovalRequest>) {
    while let Some(request) = requests.recv().await {
        let removal = handle(&sessions, request);
        if let Err(e) = with_deadline(REMOVAL_DEADLINE, "session removal", removal).await {
            tracing::error!("❌ Session removal failed: {}", e);
        }
    }
    tracing::warn!("Removal channel closed, no longer removing sessions on request");
}
