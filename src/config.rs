use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use zeroize::{Zeroize, Zeroizing};

/// Which persistence adapter backs the identity token cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialBackend {
    /// Process-local map. Only for tests and local development.
    Memory,
    /// The same Redis deployment as the session store.
    Redis,
    /// Postgres, storing each record as a JSONB document.
    Postgres,
}

impl CredentialBackend {
    /// Parses a backend name (case-insensitive).
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => anyhow::bail!(
                "CREDENTIAL_BACKEND must be one of memory, redis, postgres (got {})",
                other
            ),
        }
    }
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the HTTP server listens on.
    pub bind_addr: SocketAddr,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The URL of the PostgreSQL database, if the postgres backend is selected.
    pub database_url: Option<String>,
    /// The credential persistence adapter.
    pub credential_backend: CredentialBackend,
    /// The AES-256 key used to seal OAuth tokens at rest.
    pub encryption_key: Zeroizing<Vec<u8>>,
    /// The shared secret the host platform uses for context tokens.
    pub app_secret: Zeroizing<String>,
    /// The secret used to sign editor configs.
    pub doc_secret: Zeroizing<String>,
    /// The OAuth client id.
    pub zoom_client_id: String,
    /// The OAuth client secret.
    pub zoom_client_secret: Zeroizing<String>,
    /// The base URL of the upstream identity API.
    pub zoom_api_url: String,
    /// The document editor callback URL.
    pub callback_url: String,
    /// Optional token guarding the internal identity endpoints.
    pub internal_api_token: Option<Zeroizing<String>>,
    /// Maximum number of sessions held in the local cache.
    pub local_cache_capacity: u64,
    /// Keys fetched per page during cold-start hydration.
    pub hydration_page_size: usize,
    /// Deadline for a single authoritative-store call.
    pub store_timeout: Duration,
    /// Bounded wait when acquiring a session lock.
    pub lock_wait: Duration,
    /// Expiry of a held session lock.
    pub lock_ttl: Duration,
    /// Clock-skew allowance applied to context expiry.
    pub context_skew: Duration,
    /// Lead window before token expiry that triggers a refresh.
    pub refresh_lead: Duration,
}

fn parse_var<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", name))
}

fn required_secret(name: &str) -> Result<Zeroizing<String>> {
    let value = env::var(name).with_context(|| format!("{} must be set", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} must not be empty", name);
    }
    Ok(Zeroizing::new(value))
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let mut encryption_key_hex = env::var("ENCRYPTION_KEY")
            .context("ENCRYPTION_KEY must be set (generate with: openssl rand -hex 32)")?;

        let encryption_key_bytes = hex::decode(encryption_key_hex.trim())
            .context("ENCRYPTION_KEY must be valid hexadecimal")?;

        encryption_key_hex.zeroize();

        if encryption_key_bytes.len() != 32 {
            anyhow::bail!("ENCRYPTION_KEY must be exactly 32 bytes (64 hex characters)");
        }

        let credential_backend = CredentialBackend::parse(
            &env::var("CREDENTIAL_BACKEND").unwrap_or_else(|_| "redis".to_string()),
        )?;

        let database_url = env::var("DATABASE_URL").ok();
        if credential_backend == CredentialBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL must be set when CREDENTIAL_BACKEND=postgres");
        }

        let internal_api_token = env::var("INTERNAL_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty())
            .map(Zeroizing::new);

        Ok(Self {
            bind_addr: parse_var("BIND_ADDR", "127.0.0.1:3000")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            database_url,
            credential_backend,
            encryption_key: Zeroizing::new(encryption_key_bytes),
            app_secret: required_secret("ZOOM_APP_SECRET")?,
            doc_secret: required_secret("DOC_SECRET")?,
            zoom_client_id: env::var("ZOOM_CLIENT_ID").context("ZOOM_CLIENT_ID must be set")?,
            zoom_client_secret: required_secret("ZOOM_CLIENT_SECRET")?,
            zoom_api_url: env::var("ZOOM_API_URL")
                .unwrap_or_else(|_| "https://zoom.us".to_string()),
            callback_url: env::var("CALLBACK_URL").context("CALLBACK_URL must be set")?,
            internal_api_token,
            local_cache_capacity: parse_var("LOCAL_CACHE_CAPACITY", "10000")?,
            hydration_page_size: parse_var("HYDRATION_PAGE_SIZE", "100")?,
            store_timeout: Duration::from_millis(parse_var("STORE_TIMEOUT_MS", "2000")?),
            lock_wait: Duration::from_millis(parse_var("LOCK_WAIT_MS", "1500")?),
            lock_ttl: Duration::from_millis(parse_var("LOCK_TTL_MS", "5000")?),
            context_skew: Duration::from_secs(parse_var("CONTEXT_SKEW_SECS", "30")?),
            refresh_lead: Duration::from_secs(parse_var("REFRESH_LEAD_SECS", "300")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!(CredentialBackend::parse("memory").unwrap(), CredentialBackend::Memory);
        assert_eq!(CredentialBackend::parse(" Redis ").unwrap(), CredentialBackend::Redis);
        assert_eq!(CredentialBackend::parse("postgresql").unwrap(), CredentialBackend::Postgres);
        assert!(CredentialBackend::parse("mongo").is_err());
    }
}
