#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use zeroize::Zeroizing;

use huddle::clock::now_ms;
use huddle::config::{Config, CredentialBackend};
use huddle::error::{AppError, Result};
use huddle::models::credential::{Credential, UpstreamUser};
use huddle::repositories::credential::MemoryCredentialRepository;
use huddle::services::fallback::MemoryFallbackQueue;
use huddle::services::removal::MemoryRemovalQueue;
use huddle::services::zoom::{TokenGrant, UpstreamIdentity};
use huddle::state::{AppState, Backends};
use huddle::store::feed::MemoryFeed;
use huddle::store::kv::MemoryKv;
use huddle::store::lock::MemoryLock;

pub const APP_SECRET: &str = "test-app-secret";
pub const DOC_SECRET: &str = "test-doc-secret";
pub const INTERNAL_TOKEN: &str = "test-internal-token";
pub const CALLBACK_URL: &str = "https://callback.example.com/callback";

pub fn config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        redis_url: "redis://127.0.0.1:6379".into(),
        database_url: None,
        credential_backend: CredentialBackend::Memory,
        encryption_key: Zeroizing::new(vec![7u8; 32]),
        app_secret: Zeroizing::new(APP_SECRET.into()),
        doc_secret: Zeroizing::new(DOC_SECRET.into()),
        zoom_client_id: "client-id".into(),
        zoom_client_secret: Zeroizing::new("client-secret".into()),
        zoom_api_url: "http://127.0.0.1:9".into(),
        callback_url: CALLBACK_URL.into(),
        internal_api_token: Some(Zeroizing::new(INTERNAL_TOKEN.into())),
        local_cache_capacity: 1_000,
        hydration_page_size: 10,
        store_timeout: Duration::from_secs(2),
        lock_wait: Duration::from_millis(500),
        lock_ttl: Duration::from_secs(5),
        context_skew: Duration::from_secs(30),
        refresh_lead: Duration::from_secs(300),
    }
}

/// Upstream double whose users are derived from the access token.
#[derive(Default)]
pub struct FakeUpstream {
    pub user_lookups: AtomicUsize,
    pub refreshes: AtomicUsize,
}

impl FakeUpstream {
    pub fn lookups(&self) -> usize {
        self.user_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamIdentity for FakeUpstream {
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let user = refresh_token.trim_start_matches("refresh-");
        Ok(TokenGrant {
            access_token: format!("access-{}", user),
            refresh_token: format!("refresh-{}", user),
            token_type: "bearer".into(),
            scope: "user:read".into(),
            expires_in: 3600,
        })
    }

    async fn get_user(&self, access_token: &str) -> Result<UpstreamUser> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let Some(user) = access_token.strip_prefix("access-") else {
            return Err(AppError::Upstream("unknown token".into()));
        };
        Ok(UpstreamUser {
            id: user.to_string(),
            first_name: "Test".into(),
            last_name: user.to_uppercase(),
            email: format!("{}@example.com", user),
            language: String::new(),
        })
    }
}

pub fn credential(user_id: &str) -> Credential {
    Credential {
        user_id: user_id.to_string(),
        access_token: format!("access-{}", user_id),
        refresh_token: format!("refresh-{}", user_id),
        token_type: "bearer".into(),
        scope: "user:read".into(),
        expires_at: now_ms() + 3_600_000,
    }
}

pub struct Harness {
    pub state: AppState,
    pub kv: MemoryKv,
    pub feed: MemoryFeed,
    pub lock: MemoryLock,
    pub upstream: Arc<FakeUpstream>,
    pub fallback: MemoryFallbackQueue,
    pub removals: MemoryRemovalQueue,
}

/// A fully wired state over in-memory backends, hydrated and ready.
pub async fn harness() -> Harness {
    let kv = MemoryKv::new();
    let feed = MemoryFeed::new();
    let lock = MemoryLock::new();
    let upstream = Arc::new(FakeUpstream::default());
    let fallback = MemoryFallbackQueue::new();
    let removals = MemoryRemovalQueue::new();

    let backends = Backends {
        kv: Arc::new(kv.clone()),
        feed: Arc::new(feed.clone()),
        lock: Arc::new(lock.clone()),
        credentials: Arc::new(MemoryCredentialRepository::new()),
        fallback: Arc::new(fallback.clone()),
        removals: Arc::new(removals.clone()),
        upstream: upstream.clone(),
    };

    let state = AppState::with_backends(&config(), backends).await.unwrap();
    state.sessions.store().wait_hydrated().await;

    Harness {
        state,
        kv,
        feed,
        lock,
        upstream,
        fallback,
        removals,
    }
}

/// Polls `check` until it holds or a second passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
