use crate::error::{AppError, Result};
use crate::models::session::Session;

/// Validates a meeting key.
pub fn validate_meeting_key(meeting_key: &str) -> Result<()> {
    if meeting_key.trim().is_empty() {
        return Err(AppError::Validation("Meeting key must not be empty".to_string()));
    }

    if meeting_key.len() > 256 {
        return Err(AppError::Validation(
            "Meeting key must be at most 256 characters".to_string(),
        ));
    }

    Ok(())
}

/// Normalizes a file name the way the editor host expects.
///
/// Path separators are replaced so the name cannot address another location.
pub fn sanitize_filename(filename: &str) -> String {
    filename.trim().replace(['\\', '/'], ":")
}

fn required(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("Session {} must not be empty", field)));
    }
    if value.trim() != value {
        return Err(AppError::Validation(format!(
            "Session {} must not have surrounding whitespace",
            field
        )));
    }
    Ok(())
}

/// Validates a session before it is written.
///
/// Sessions are stored exactly as given, so fields with surrounding
/// whitespace are rejected rather than rewritten.
pub fn validate_session(session: &Session) -> Result<()> {
    required(&session.owner, "owner")?;
    required(&session.filename, "filename")?;
    required(&session.doc_key, "document key")?;
    required(&session.file_url, "file URL")?;

    let parsed = reqwest::Url::parse(&session.file_url)
        .map_err(|_| AppError::Validation("Session file URL must be an absolute URL".to_string()))?;
    if parsed.cannot_be_a_base() {
        return Err(AppError::Validation("Session file URL must be an absolute URL".to_string()));
    }

    Ok(())
}
