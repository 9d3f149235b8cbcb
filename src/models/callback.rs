use serde::{Deserialize, Serialize};

/// Document opened by its first editor.
pub const STATUS_EDITING: i32 = 1;
/// Document ready for saving after the last editor left.
pub const STATUS_READY_FOR_SAVE: i32 = 2;
/// Document closed with no changes.
pub const STATUS_CLOSED: i32 = 4;

/// Body the document editor posts to the callback URL.
///
/// The `token` field carries the same fields signed with the document secret;
/// only the verified copy is trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

impl CallbackQuery {
    /// The hashed meeting key, treating blank as absent.
    pub fn meeting_key(&self) -> Option<&str> {
        self.mid.as_deref().map(str::trim).filter(|mid| !mid.is_empty())
    }
}

/// The editor treats any non-zero `error` as a failed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub error: i32,
}

impl CallbackResponse {
    pub const OK: Self = Self { error: 0 };
    pub const FAILED: Self = Self { error: 1 };
}
