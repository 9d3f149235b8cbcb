use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A database pool checkout error.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A database pool construction error.
    #[error("Database pool creation error: {0}")]
    PoolCreate(#[from] deadpool_postgres::CreatePoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The key is absent. Callers may create it.
    #[error("Resource not found")]
    NotFound,

    /// A concurrent creator won the race. Callers should re-read.
    #[error("Resource already exists")]
    AlreadyExists,

    /// A deadline elapsed before the operation could determine an outcome.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The operation was canceled before completion.
    #[error("Operation canceled")]
    Canceled,

    /// A malformed or unauthenticated context token.
    #[error("Context decode error: {0}")]
    Decode(String),

    /// The identity provider or the document host failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// An encryption error.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// The distributed lock could not be acquired.
    #[error("Lock error: {0}")]
    Lock(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A backend failure carried as text, produced when an error is shared.
    #[error("Backend error: {0}")]
    Backend(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Returns an owned copy with the same classification.
    ///
    /// Driver errors are not `Clone`, so they are carried over as
    /// [`AppError::Backend`] with their message.
    pub fn duplicate(&self) -> Self {
        match self {
            AppError::Database(e) => AppError::Backend(format!("database: {}", e)),
            AppError::Pool(e) => AppError::Backend(format!("database pool: {}", e)),
            AppError::PoolCreate(e) => AppError::Backend(format!("database pool: {}", e)),
            AppError::Redis(e) => AppError::Backend(format!("redis: {}", e)),
            AppError::Io(e) => AppError::Backend(format!("io: {}", e)),
            AppError::NotFound => AppError::NotFound,
            AppError::AlreadyExists => AppError::AlreadyExists,
            AppError::Timeout(msg) => AppError::Timeout(msg.clone()),
            AppError::Canceled => AppError::Canceled,
            AppError::Decode(msg) => AppError::Decode(msg.clone()),
            AppError::Upstream(msg) => AppError::Upstream(msg.clone()),
            AppError::Encryption(msg) => AppError::Encryption(msg.clone()),
            AppError::Lock(msg) => AppError::Lock(msg.clone()),
            AppError::Unauthorized => AppError::Unauthorized,
            AppError::Validation(msg) => AppError::Validation(msg.clone()),
            AppError::Backend(msg) => AppError::Backend(msg.clone()),
            AppError::Internal(msg) => AppError::Internal(msg.clone()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound)
    }

    /// Whether a client may retry the same request later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AppError::Timeout(_)
                | AppError::Canceled
                | AppError::Lock(_)
                | AppError::Redis(_)
                | AppError::Pool(_)
                | AppError::Backend(_)
                | AppError::Upstream(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retriable = self.is_retriable();
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Database pool error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Database unavailable".to_string())
            }

            AppError::PoolCreate(ref e) => {
                tracing::error!("Database pool creation error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Store error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "IO error".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::AlreadyExists => {
                tracing::debug!("Resource already exists");
                (StatusCode::CONFLICT, "Resource already exists".to_string())
            }

            AppError::Timeout(ref msg) => {
                tracing::warn!("Operation timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, "Operation timed out".to_string())
            }

            AppError::Canceled => {
                tracing::warn!("Operation canceled");
                (StatusCode::SERVICE_UNAVAILABLE, "Operation canceled".to_string())
            }

            AppError::Decode(ref msg) => {
                tracing::warn!("Context decode error: {}", msg);
                (StatusCode::UNAUTHORIZED, "Invalid context".to_string())
            }

            AppError::Upstream(ref msg) => {
                tracing::error!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Upstream error".to_string())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption error".to_string())
            }

            AppError::Lock(ref msg) => {
                tracing::warn!("Lock error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Resource busy".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Backend(ref msg) => {
                tracing::error!("Backend error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Store error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        let mut response = (status, body).into_response();
        if retriable {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_preserves_classification() {
        assert!(AppError::NotFound.duplicate().is_not_found());
        assert!(matches!(AppError::AlreadyExists.duplicate(), AppError::AlreadyExists));
        assert!(matches!(
            AppError::Timeout("kv get".into()).duplicate(),
            AppError::Timeout(msg) if msg == "kv get"
        ));
        assert!(matches!(
            AppError::Decode("bad tag".into()).duplicate(),
            AppError::Decode(_)
        ));
    }

    #[test]
    fn not_found_is_not_retriable() {
        assert!(!AppError::NotFound.is_retriable());
        assert!(AppError::Timeout("x".into()).is_retriable());
        assert!(AppError::Lock("busy".into()).is_retriable());
    }

    #[test]
    fn retriable_errors_carry_retry_after() {
        let busy = AppError::Lock("busy".into()).into_response();
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(busy.headers().get(header::RETRY_AFTER).unwrap(), "1");

        let timeout = AppError::Timeout("kv get".into()).into_response();
        assert!(timeout.headers().contains_key(header::RETRY_AFTER));

        let missing = AppError::NotFound.into_response();
        assert!(!missing.headers().contains_key(header::RETRY_AFTER));
        let invalid = AppError::Validation("bad".into()).into_response();
        assert!(!invalid.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::NotFound.into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::AlreadyExists.into_response().status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Timeout("x".into()).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::Decode("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Upstream("x".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
