use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime of a session nobody has opened yet.
pub const PROVISIONAL_TTL: Duration = Duration::from_secs(30);
/// Lifetime of a session whose document has been opened.
pub const CONFIRMED_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Provisional,
    Confirmed,
}

/// A co-editing session for one meeting.
///
/// The meeting key is the storage key and is not repeated in the value.
/// `doc_key` is fixed for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub owner: String,
    pub filename: String,
    pub file_url: String,
    pub doc_key: String,
    pub kind: SessionKind,
}

impl Session {
    /// A new provisional session with a fresh document key.
    pub fn provisional(owner: &str, filename: &str, file_url: &str) -> Self {
        Self {
            owner: owner.to_string(),
            filename: filename.to_string(),
            file_url: file_url.to_string(),
            doc_key: uuid::Uuid::new_v4().to_string(),
            kind: SessionKind::Provisional,
        }
    }

    /// The same session promoted to confirmed.
    pub fn confirmed(&self) -> Self {
        Self {
            kind: SessionKind::Confirmed,
            ..self.clone()
        }
    }

    pub fn ttl(&self) -> Duration {
        match self.kind {
            SessionKind::Provisional => PROVISIONAL_TTL,
            SessionKind::Confirmed => CONFIRMED_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_follows_kind() {
        let session = Session::provisional("u1", "report.docx", "https://files.example/report.docx");
        assert_eq!(session.ttl(), PROVISIONAL_TTL);

        let confirmed = session.confirmed();
        assert_eq!(confirmed.ttl(), CONFIRMED_TTL);
        assert_eq!(confirmed.doc_key, session.doc_key);
    }

    #[test]
    fn serializes_kind_in_lowercase() {
        let session = Session::provisional("u1", "a.xlsx", "https://x/a.xlsx");
        let json = sonic_rs::to_string(&session).unwrap();
        assert!(json.contains(r#""kind":"provisional""#));
        let back: Session = sonic_rs::from_str(&json).unwrap();
        assert_eq!(back, session);
    }
}
