use crate::error::{AppError, Result};
use crate::models::credential::{Credential, SealedCredential};

/// Validates a credential before it is sealed and stored.
pub fn validate_credential(credential: &Credential, now_ms: i64) -> Result<()> {
    if credential.user_id.trim().is_empty() {
        return Err(AppError::Validation("User id must not be empty".to_string()));
    }

    if credential.access_token.trim().is_empty() {
        return Err(AppError::Validation("Access token must not be empty".to_string()));
    }

    if credential.refresh_token.trim().is_empty() {
        return Err(AppError::Validation("Refresh token must not be empty".to_string()));
    }

    if credential.expires_at <= now_ms {
        return Err(AppError::Validation(
            "Credential expiry must be in the future".to_string(),
        ));
    }

    Ok(())
}

/// Validates the shape of an already sealed record.
pub fn validate_sealed(sealed: &SealedCredential) -> Result<()> {
    if sealed.user_id.trim().is_empty() {
        return Err(AppError::Validation("User id must not be empty".to_string()));
    }

    if sealed.access_token.is_empty() || sealed.refresh_token.is_empty() {
        return Err(AppError::Validation("Sealed tokens must not be empty".to_string()));
    }

    Ok(())
}
