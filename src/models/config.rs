use serde::{Deserialize, Serialize};

use crate::models::document::DocumentType;

/// Body of a config build request. Identity and meeting come from the context.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigRequest {
    pub file_name: String,
    pub file_url: String,
    #[serde(default)]
    pub language: Option<String>,
}

/// Everything the assembler needs for one build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub user_id: String,
    /// Raw platform meeting id, if the request came from inside a meeting.
    pub meeting_id: Option<String>,
    pub user_agent: String,
    pub file_name: String,
    pub file_url: String,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub edit: bool,
    pub download: bool,
    pub print: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "fileType")]
    pub file_type: String,
    pub key: String,
    pub title: String,
    pub url: String,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorUser {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goback {
    #[serde(rename = "requestClose")]
    pub request_close: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customization {
    pub goback: Goback,
    pub plugins: bool,
    #[serde(rename = "hideRightMenu")]
    pub hide_right_menu: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorSettings {
    pub user: EditorUser,
    #[serde(rename = "callbackUrl")]
    pub callback_url: String,
    pub customization: Customization,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lang: Option<String>,
}

/// A signed document editor config.
///
/// `token` is the HS256 signature over every other field and is empty while
/// the config is being signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorConfig {
    pub document: Document,
    #[serde(rename = "documentType")]
    pub document_type: DocumentType,
    #[serde(rename = "editorConfig")]
    pub editor_config: EditorSettings,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub token: String,
    #[serde(default)]
    pub is_session: bool,
    #[serde(default)]
    pub is_owner: bool,
    /// Epoch seconds.
    pub iat: i64,
    /// Epoch seconds.
    pub exp: i64,
}
