use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, CredentialBackend};
use crate::crypto::aes::{Encryptor, SecureKey};
use crate::crypto::context::ContextDecoder;
use crate::crypto::jwt::ConfigSigner;
use crate::error::Result;
use crate::repositories::credential::{
    CredentialRepository, KvCredentialRepository, MemoryCredentialRepository,
    PostgresCredentialRepository,
};
use crate::services::config::ConfigAssembler;
use crate::services::fallback::{FallbackQueue, RedisFallbackQueue};
use crate::services::identity::IdentityResolver;
use crate::services::removal::{self, RedisRemovalQueue, RemovalQueue};
use crate::services::sessions::SessionService;
use crate::services::token_cache::TokenCache;
use crate::services::zoom::{UpstreamIdentity, ZoomClient};
use crate::store::feed::{RedisFeed, SessionFeed};
use crate::store::kv::{KeyValueStore, RedisKv};
use crate::store::lock::{DistributedLock, RedisLock};
use crate::store::session::{SessionStore, StoreOptions};

/// Deadline for a whole inbound request.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for a single upstream API call.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);

/// The external collaborators the state is built over.
pub struct Backends {
    pub kv: Arc<dyn KeyValueStore>,
    pub feed: Arc<dyn SessionFeed>,
    pub lock: Arc<dyn DistributedLock>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub fallback: Arc<dyn FallbackQueue>,
    pub removals: Arc<dyn RemovalQueue>,
    pub upstream: Arc<dyn UpstreamIdentity>,
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    pub sessions: Arc<SessionService>,
    /// The encrypted credential cache.
    pub tokens: TokenCache,
    pub identity: Arc<IdentityResolver>,
    pub assembler: Arc<ConfigAssembler>,
    pub decoder: Arc<ContextDecoder>,
    /// Signs editor configs and verifies editor callbacks.
    pub signer: ConfigSigner,
    /// Session removal requests, consumed by every instance.
    pub removals: Arc<dyn RemovalQueue>,
    /// Durable queue for credentials that could not be stored in-line.
    pub fallback: Arc<dyn FallbackQueue>,
}

impl AppState {
    /// Connects to Redis (and Postgres when selected) and builds the state.
    pub async fn new(config: &Config) -> Result<Self> {
        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client.clone()).await?;
        tracing::info!("✅ Redis Connection Manager initialized");

        let timeout = config.store_timeout;
        let kv: Arc<dyn KeyValueStore> = Arc::new(RedisKv::new(redis.clone(), timeout));
        let feed = Arc::new(RedisFeed::new(redis_client.clone(), redis.clone(), timeout));
        let removals = Arc::new(RedisRemovalQueue::new(redis_client, redis.clone(), timeout));
        let lock = Arc::new(RedisLock::new(redis.clone(), timeout));

        let credentials: Arc<dyn CredentialRepository> = match config.credential_backend {
            CredentialBackend::Memory => {
                tracing::warn!("Credentials are kept in process memory only");
                Arc::new(MemoryCredentialRepository::new())
            }
            CredentialBackend::Redis => Arc::new(KvCredentialRepository::new(Arc::clone(&kv))),
            CredentialBackend::Postgres => {
                let url = config.database_url.as_deref().unwrap_or_default();
                let pool = crate::db::create_pool(url)?;
                crate::db::ensure_schema(&pool).await?;
                tracing::info!("✅ PostgreSQL pool initialized for credentials");
                Arc::new(PostgresCredentialRepository::new(pool))
            }
        };
        tracing::info!("✅ Credential adapter selected: {:?}", config.credential_backend);

        let upstream = Arc::new(ZoomClient::new(
            &config.zoom_api_url,
            &config.zoom_client_id,
            config.zoom_client_secret.clone(),
            UPSTREAM_TIMEOUT,
        )?);

        let backends = Backends {
            kv,
            feed,
            lock,
            credentials,
            fallback: Arc::new(RedisFallbackQueue::new(redis, timeout)),
            removals,
            upstream,
        };
        Self::with_backends(config, backends).await
    }

    /// Builds the state over already constructed backends and starts the
    /// session store's feed consumer and the removal consumer.
    pub async fn with_backends(config: &Config, backends: Backends) -> Result<Self> {
        let store = SessionStore::new(
            backends.kv,
            backends.feed,
            backends.lock,
            StoreOptions::from_config(config),
        );
        store.start().await?;
        tracing::info!("✅ Session store subscribed, hydration started");

        let encryptor = Encryptor::new(SecureKey::from_slice(&config.encryption_key)?);
        let tokens = TokenCache::new(backends.credentials, encryptor, config.store_timeout);
        tracing::info!("✅ Token cache initialized");

        let identity = Arc::new(IdentityResolver::new(
            tokens.clone(),
            backends.upstream,
            Arc::clone(&backends.fallback),
            config.refresh_lead,
        ));

        let sessions = Arc::new(SessionService::new(store));
        let requests = backends.removals.subscribe().await?;
        tokio::spawn(removal::consume(Arc::clone(&sessions), requests));
        tracing::info!("✅ Session removal consumer started");

        let signer = ConfigSigner::new(&config.doc_secret)?;
        let assembler = ConfigAssembler::new(
            Arc::clone(&identity),
            Arc::clone(&sessions),
            signer.clone(),
            &config.callback_url,
        )?;
        tracing::info!("✅ Config assembler initialized");

        Ok(AppState {
            config: config.clone(),
            sessions,
            tokens,
            identity,
            assembler: Arc::new(assembler),
            decoder: Arc::new(ContextDecoder::new(&config.app_secret)),
            signer,
            removals: backends.removals,
            fallback: backends.fallback,
        })
    }
}
