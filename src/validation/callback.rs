use crate::error::{AppError, Result};
use crate::models::callback::CallbackRequest;

/// Validates a verified editor callback.
pub fn validate_callback(callback: &CallbackRequest) -> Result<()> {
    if callback.key.trim().is_empty() {
        return Err(AppError::Validation("Callback key must not be empty".to_string()));
    }

    if !(1..=7).contains(&callback.status) {
        return Err(AppError::Validation(format!(
            "Invalid callback status {}, expected 1 to 7",
            callback.status
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback(status: i32) -> CallbackRequest {
        CallbackRequest {
            key: "doc-key".into(),
            status,
            ..CallbackRequest::default()
        }
    }

    #[test]
    fn accepts_known_statuses() {
        assert!(validate_callback(&callback(1)).is_ok());
        assert!(validate_callback(&callback(7)).is_ok());
    }

    #[test]
    fn rejects_blank_key_and_unknown_status() {
        assert!(validate_callback(&callback(0)).is_err());
        assert!(validate_callback(&callback(8)).is_err());

        let blank = CallbackRequest {
            key: " ".into(),
            ..callback(1)
        };
        assert!(validate_callback(&blank).is_err());
    }
}
