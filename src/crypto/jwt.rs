use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, Result};

/// HS256 signer for editor configs.
#[derive(Clone)]
pub struct ConfigSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl ConfigSigner {
    pub fn new(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(AppError::Validation("Signing secret must not be empty".into()));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Signs `claims`. Editor configs carry an `exp` in epoch seconds.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("Could not sign config: {}", e)))
    }

    /// Verifies signature and expiry, returning the decoded claims.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Decode(format!("Invalid config token: {}", e)))
    }

    /// Verifies the signature of a token that may carry no `exp`.
    ///
    /// Expiry is still enforced when the claim is present.
    pub fn verify_unexpiring<T: DeserializeOwned>(&self, token: &str) -> Result<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Decode(format!("Invalid callback token: {}", e)))
    }
}
