//! Persistence adapters for sealed credentials.
//!
//! Adapters only ever see [`SealedCredential`]; sealing happens above them.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::credential::SealedCredential;
use crate::store::kv::KeyValueStore;

const KEY_PREFIX: &str = "credential:";

fn encode(record: &SealedCredential) -> Result<String> {
    sonic_rs::to_string(record)
        .map_err(|e| AppError::Internal(format!("Could not encode credential: {}", e)))
}

fn decode(value: &str) -> Result<SealedCredential> {
    sonic_rs::from_str(value).map_err(|e| AppError::Backend(format!("Corrupt credential: {}", e)))
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Replaces the whole record for its user.
    async fn put(&self, record: &SealedCredential) -> Result<()>;

    async fn get(&self, user_id: &str) -> Result<Option<SealedCredential>>;

    /// Returns whether a record was removed.
    async fn delete(&self, user_id: &str) -> Result<bool>;
}

#[derive(Clone, Default)]
pub struct MemoryCredentialRepository {
    records: Arc<RwLock<HashMap<String, SealedCredential>>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn put(&self, record: &SealedCredential) -> Result<()> {
        self.records
            .write()
            .insert(record.user_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<SealedCredential>> {
        Ok(self.records.read().get(user_id).cloned())
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        Ok(self.records.write().remove(user_id).is_some())
    }
}

/// Records kept in the external KV store without expiry.
#[derive(Clone)]
pub struct KvCredentialRepository {
    kv: Arc<dyn KeyValueStore>,
}

impl KvCredentialRepository {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl CredentialRepository for KvCredentialRepository {
    async fn put(&self, record: &SealedCredential) -> Result<()> {
        let value = encode(record)?;
        self.kv
            .set(&format!("{}{}", KEY_PREFIX, record.user_id), &value, None)
            .await
    }

    async fn get(&self, user_id: &str) -> Result<Option<SealedCredential>> {
        match self.kv.get(&format!("{}{}", KEY_PREFIX, user_id)).await? {
            Some(value) => decode(&value).map(Some),
            None => Ok(None),
        }
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        self.kv.delete(&format!("{}{}", KEY_PREFIX, user_id)).await
    }
}

/// Records stored as JSONB documents in Postgres.
#[derive(Clone)]
pub struct PostgresCredentialRepository {
    pool: Pool,
}

impl PostgresCredentialRepository {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn put(&self, record: &SealedCredential) -> Result<()> {
        let document = encode(record)?;
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached(
                r#"
                INSERT INTO credentials (user_id, document, updated_at)
                VALUES ($1, $2::text::jsonb, NOW())
                ON CONFLICT (user_id)
                DO UPDATE SET document = EXCLUDED.document, updated_at = NOW()
                "#,
            )
            .await?;
        client
            .execute(&statement, &[&record.user_id, &document])
            .await?;
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<SealedCredential>> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("SELECT document::text AS document FROM credentials WHERE user_id = $1")
            .await?;
        let row = client.query_opt(&statement, &[&user_id]).await?;

        match row {
            Some(row) => {
                let document: String = row.try_get("document")?;
                decode(&document).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, user_id: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let statement = client
            .prepare_cached("DELETE FROM credentials WHERE user_id = $1")
            .await?;
        let removed = client.execute(&statement, &[&user_id]).await?;
        Ok(removed > 0)
    }
}
