use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::clock::now_ms;
use crate::crypto::aes::Encryptor;
use crate::error::{AppError, Result};
use crate::models::credential::{Credential, SealedCredential};
use crate::repositories::credential::CredentialRepository;
use crate::tasks::join_pair;
use crate::validation::credential::{validate_credential, validate_sealed};

/// Encrypted-at-rest credential cache over a swappable adapter.
///
/// Both tokens are sealed or opened as two concurrent units under one
/// deadline. A deadline yields [`AppError::Timeout`] and never a partial record.
#[derive(Clone)]
pub struct TokenCache {
    repository: Arc<dyn CredentialRepository>,
    encryptor: Encryptor,
    deadline: Duration,
}

impl TokenCache {
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        encryptor: Encryptor,
        deadline: Duration,
    ) -> Self {
        Self {
            repository,
            encryptor,
            deadline,
        }
    }

    /// Encrypts both tokens of `credential`.
    pub async fn seal(&self, credential: &Credential) -> Result<SealedCredential> {
        let access = Zeroizing::new(credential.access_token.clone());
        let refresh = Zeroizing::new(credential.refresh_token.clone());
        let left = self.encryptor.clone();
        let right = self.encryptor.clone();

        let (access_token, refresh_token) = join_pair(
            self.deadline,
            move || left.encrypt_to_string(&access),
            move || right.encrypt_to_string(&refresh),
        )
        .await?;

        Ok(SealedCredential {
            user_id: credential.user_id.clone(),
            access_token,
            refresh_token,
            token_type: credential.token_type.clone(),
            scope: credential.scope.clone(),
            expires_at: credential.expires_at,
        })
    }

    /// Decrypts both tokens of `sealed`.
    pub async fn open(&self, sealed: &SealedCredential) -> Result<Credential> {
        let access = sealed.access_token.clone();
        let refresh = sealed.refresh_token.clone();
        let left = self.encryptor.clone();
        let right = self.encryptor.clone();

        let (access_token, refresh_token) = join_pair(
            self.deadline,
            move || left.decrypt_from_string(&access),
            move || right.decrypt_from_string(&refresh),
        )
        .await?;

        Ok(Credential {
            user_id: sealed.user_id.clone(),
            access_token,
            refresh_token,
            token_type: sealed.token_type.clone(),
            scope: sealed.scope.clone(),
            expires_at: sealed.expires_at,
        })
    }

    /// Seals and stores `credential`, replacing any previous record.
    pub async fn put(&self, credential: &Credential) -> Result<()> {
        validate_credential(credential, now_ms())?;
        let sealed = self.seal(credential).await?;
        self.repository.put(&sealed).await?;
        tracing::debug!("Credential stored for user {}", sealed.user_id);
        Ok(())
    }

    /// Stores a record that was sealed earlier, unless it is stale.
    ///
    /// Returns `false` without writing when the record has expired or the
    /// current record for the user expires no earlier than it does.
    pub async fn restore(&self, sealed: &SealedCredential) -> Result<bool> {
        validate_sealed(sealed)?;
        if sealed.expires_at <= now_ms() {
            tracing::debug!("Dropping expired credential for user {}", sealed.user_id);
            return Ok(false);
        }

        let current = self.repository.get(&sealed.user_id).await?;
        if current.is_some_and(|current| current.expires_at >= sealed.expires_at) {
            tracing::debug!("Keeping newer credential for user {}", sealed.user_id);
            return Ok(false);
        }

        self.repository.put(sealed).await?;
        tracing::debug!("Credential restored for user {}", sealed.user_id);
        Ok(true)
    }

    pub async fn get(&self, user_id: &str) -> Result<Credential> {
        let sealed = self
            .repository
            .get(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        self.open(&sealed).await
    }

    pub async fn delete(&self, user_id: &str) -> Result<()> {
        if !self.repository.delete(user_id).await? {
            return Err(AppError::NotFound);
        }
        tracing::info!("Credential removed for user {}", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes::SecureKey;
    use crate::repositories::credential::MemoryCredentialRepository;

    fn cache(repo: &MemoryCredentialRepository) -> TokenCache {
        TokenCache::new(
            Arc::new(repo.clone()),
            Encryptor::new(SecureKey::new([3u8; 32])),
            Duration::from_secs(2),
        )
    }

    fn credential() -> Credential {
        Credential {
            user_id: "u1".into(),
            access_token: "plain-access-token".into(),
            refresh_token: "plain-refresh-token".into(),
            token_type: "bearer".into(),
            scope: "user:read".into(),
            expires_at: now_ms() + 3_600_000,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let repo = MemoryCredentialRepository::new();
        let cache = cache(&repo);
        let original = credential();
        cache.put(&original).await.unwrap();
        assert_eq!(cache.get("u1").await.unwrap(), original);
    }

    #[tokio::test]
    async fn stored_bytes_never_contain_plaintext() {
        let repo = MemoryCredentialRepository::new();
        cache(&repo).put(&credential()).await.unwrap();

        let stored = repo.get("u1").await.unwrap().unwrap();
        let raw = sonic_rs::to_string(&stored).unwrap();
        assert!(!raw.contains("plain-access-token"));
        assert!(!raw.contains("plain-refresh-token"));
        assert_ne!(stored.access_token, stored.refresh_token);
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let repo = MemoryCredentialRepository::new();
        let cache = cache(&repo);
        assert!(matches!(cache.get("nobody").await, Err(AppError::NotFound)));
        assert!(matches!(cache.delete("nobody").await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn expired_credentials_are_rejected_on_put() {
        let repo = MemoryCredentialRepository::new();
        let mut stale = credential();
        stale.expires_at = now_ms() - 1;
        assert!(matches!(cache(&repo).put(&stale).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn restore_skips_expired_and_older_records() {
        let repo = MemoryCredentialRepository::new();
        let cache = cache(&repo);

        let mut older = credential();
        older.access_token = "old-access".into();
        older.expires_at = now_ms() + 60_000;
        let older = cache.seal(&older).await.unwrap();

        let mut expired = older.clone();
        expired.expires_at = now_ms() - 60_000;
        assert!(!cache.restore(&expired).await.unwrap());
        assert!(repo.get("u1").await.unwrap().is_none());

        cache.put(&credential()).await.unwrap();
        assert!(!cache.restore(&older).await.unwrap());
        assert_eq!(cache.get("u1").await.unwrap().access_token, "plain-access-token");

        cache.delete("u1").await.unwrap();
        assert!(cache.restore(&older).await.unwrap());
        assert_eq!(cache.get("u1").await.unwrap().access_token, "old-access");
    }

    #[tokio::test]
    async fn tampered_record_fails_to_open() {
        let repo = MemoryCredentialRepository::new();
        let cache = cache(&repo);
        cache.put(&credential()).await.unwrap();

        let mut stored = repo.get("u1").await.unwrap().unwrap();
        stored.access_token = stored.refresh_token.clone();
        stored.refresh_token = "bm90LXZhbGlk".into();
        repo.put(&stored).await.unwrap();

        assert!(matches!(cache.get("u1").await, Err(AppError::Encryption(_))));
    }
}
