use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::clock::now_ms;
use crate::coalesce::Coalescer;
use crate::error::Result;
use crate::models::credential::{Credential, UpstreamUser};
use crate::services::fallback::FallbackQueue;
use crate::services::token_cache::TokenCache;
use crate::services::zoom::UpstreamIdentity;

struct Resolver {
    cache: TokenCache,
    upstream: Arc<dyn UpstreamIdentity>,
    fallback: Arc<dyn FallbackQueue>,
    refresh_lead: Duration,
}

impl Resolver {
    async fn load(&self, user_id: &str) -> Result<Credential> {
        let current = self.cache.get(user_id).await?;
        let now = now_ms();
        if !current.expires_within(now, self.refresh_lead) {
            return Ok(current);
        }

        tracing::debug!("Refreshing credential for user {}", user_id);
        let grant = match self.upstream.refresh_token(&current.refresh_token).await {
            Ok(grant) => grant,
            Err(e) if !current.is_expired(now) => {
                tracing::warn!(
                    "Refresh failed for user {}, serving the current token: {}",
                    user_id,
                    e
                );
                return Ok(current);
            }
            Err(e) => return Err(e),
        };

        let fresh = grant.into_credential(user_id, now_ms());
        if let Err(e) = self.cache.put(&fresh).await {
            tracing::warn!("Could not store refreshed credential for user {}: {}", user_id, e);
            self.queue(&fresh).await;
        }
        Ok(fresh)
    }

    async fn queue(&self, credential: &Credential) {
        let sealed = match self.cache.seal(credential).await {
            Ok(sealed) => sealed,
            Err(e) => {
                tracing::error!("Could not seal credential for user {}: {}", credential.user_id, e);
                return;
            }
        };
        match self.fallback.publish(&sealed).await {
            Ok(()) => tracing::info!("Queued credential for user {}", credential.user_id),
            Err(e) => tracing::error!(
                "Credential for user {} lost after refresh: {}",
                credential.user_id,
                e
            ),
        }
    }
}

/// Resolves a user's usable credential, refreshing it lazily.
///
/// Concurrent lookups for one user share a single load and refresh, and
/// concurrent profile fetches for one user share a single upstream call.
pub struct IdentityResolver {
    resolver: Arc<Resolver>,
    lookups: Coalescer<Credential>,
    profiles: Coalescer<UpstreamUser>,
}

impl IdentityResolver {
    pub fn new(
        cache: TokenCache,
        upstream: Arc<dyn UpstreamIdentity>,
        fallback: Arc<dyn FallbackQueue>,
        refresh_lead: Duration,
    ) -> Self {
        Self {
            resolver: Arc::new(Resolver {
                cache,
                upstream,
                fallback,
                refresh_lead,
            }),
            lookups: Coalescer::new(),
            profiles: Coalescer::new(),
        }
    }

    pub async fn resolve(&self, user_id: &str) -> Result<Credential> {
        let resolver = Arc::clone(&self.resolver);
        let owned = user_id.to_string();
        let (result, shared) = self
            .lookups
            .run(user_id, move || async move { resolver.load(&owned).await })
            .await;
        if shared {
            tracing::debug!("Identity lookup for user {} was shared", user_id);
        }
        result
    }

    /// The upstream profile behind `credential`.
    pub async fn profile(&self, credential: &Credential) -> Result<UpstreamUser> {
        let upstream = Arc::clone(&self.resolver.upstream);
        let access_token = Zeroizing::new(credential.access_token.clone());
        let (result, shared) = self
            .profiles
            .run(&credential.user_id, move || async move {
                upstream.get_user(&access_token).await
            })
            .await;
        if shared {
            tracing::debug!("Profile fetch for user {} was shared", credential.user_id);
        }
        result
    }
}
