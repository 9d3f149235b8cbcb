use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The authenticated claims carried by every inbound request.
///
/// Decoded per request and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedContext {
    #[serde(rename = "typ", default)]
    pub context_type: String,
    #[serde(rename = "uid")]
    pub user_id: String,
    /// Raw platform meeting id. Absent outside a meeting.
    #[serde(rename = "mid", default, skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    #[serde(rename = "iss", default)]
    pub issuer: String,
    #[serde(rename = "aud", default)]
    pub audience: String,
    /// Epoch millis.
    #[serde(rename = "ts")]
    pub issued_at: i64,
    /// Epoch millis.
    #[serde(rename = "exp")]
    pub expires_at: i64,
}

impl AuthenticatedContext {
    /// Whether the context is still valid at `now_ms` given a clock-skew allowance.
    pub fn is_fresh_at(&self, now_ms: i64, skew: Duration) -> bool {
        let skew_ms = i64::try_from(skew.as_millis()).unwrap_or(i64::MAX);
        self.expires_at >= now_ms.saturating_sub(skew_ms)
    }

    /// The raw meeting id, treating an empty string as absent.
    pub fn meeting(&self) -> Option<&str> {
        self.meeting_id.as_deref().filter(|mid| !mid.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(expires_at: i64) -> AuthenticatedContext {
        AuthenticatedContext {
            context_type: "meeting".into(),
            user_id: "u1".into(),
            meeting_id: Some(String::new()),
            issuer: "marketplace.zoom.us".into(),
            audience: "app".into(),
            issued_at: expires_at - 120_000,
            expires_at,
        }
    }

    #[test]
    fn freshness_honours_skew() {
        let ctx = context(1_000_000);
        assert!(ctx.is_fresh_at(999_000, Duration::ZERO));
        assert!(!ctx.is_fresh_at(1_010_000, Duration::from_secs(5)));
        assert!(ctx.is_fresh_at(1_010_000, Duration::from_secs(30)));
    }

    #[test]
    fn empty_meeting_id_means_no_meeting() {
        let mut ctx = context(0);
        assert_eq!(ctx.meeting(), None);
        ctx.meeting_id = Some("85412345678".into());
        assert_eq!(ctx.meeting(), Some("85412345678"));
    }
}
