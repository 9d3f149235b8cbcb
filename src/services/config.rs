//! Assembly of signed document editor configs.
//!
//! A build resolves the caller's credential and profile, resolves or creates
//! the meeting's session when the caller is inside a meeting, composes the
//! editor config and signs it.

use reqwest::Url;
use std::sync::Arc;

use crate::clock::now_ms;
use crate::coalesce::Coalescer;
use crate::crypto::digest::meeting_key;
use crate::crypto::jwt::ConfigSigner;
use crate::error::{AppError, Result};
use crate::models::config::{
    BuildConfig, Customization, Document, EditorConfig, EditorSettings, EditorUser, Goback,
    Permissions,
};
use crate::models::credential::UpstreamUser;
use crate::models::document::{DocumentType, document_type, extension, is_editable};
use crate::models::session::Session;
use crate::services::identity::IdentityResolver;
use crate::services::sessions::SessionService;

/// Lifetime of a signed config.
pub const CONFIG_TTL_SECS: i64 = 180;

const MOBILE_MARKERS: &[&str] = &["mobile", "android", "iphone", "ipad", "tablet"];

/// `mobile` for phone and tablet user agents, `desktop` otherwise.
pub fn device_type(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if MOBILE_MARKERS.iter().any(|marker| ua.contains(marker)) {
        "mobile"
    } else {
        "desktop"
    }
}

fn file_kind(filename: &str) -> Result<(String, DocumentType)> {
    let ext = extension(filename)
        .ok_or_else(|| AppError::Validation(format!("File {} has no extension", filename)))?;
    let kind = document_type(&ext)
        .ok_or_else(|| AppError::Validation(format!("Unsupported file type: {}", ext)))?;
    Ok((ext, kind))
}

#[derive(Debug, Clone)]
struct ResolvedSession {
    session: Session,
    existing: bool,
}

struct Composer {
    identity: Arc<IdentityResolver>,
    sessions: Arc<SessionService>,
    signer: ConfigSigner,
    callback_url: Url,
    resolutions: Coalescer<ResolvedSession>,
}

impl Composer {
    async fn build(self: Arc<Self>, request: BuildConfig) -> Result<EditorConfig> {
        file_kind(&request.file_name)?;

        let credential = self.identity.resolve(&request.user_id).await?;
        let user = self.identity.profile(&credential).await?;

        let resolved = match request.meeting_id.as_deref().filter(|m| !m.trim().is_empty()) {
            Some(raw) => {
                let key = meeting_key(raw);
                let resolved = self.resolve_session(&key, &request).await?;
                Some((key, resolved))
            }
            None => None,
        };

        let mut config = self.compose(&request, &user, resolved.as_ref())?;
        config.token = self.signer.sign(&config)?;
        tracing::debug!(
            "Config signed for user {} (session: {})",
            request.user_id,
            config.is_session
        );
        Ok(config)
    }

    async fn resolve_session(
        self: &Arc<Self>,
        key: &str,
        request: &BuildConfig,
    ) -> Result<ResolvedSession> {
        let this = Arc::clone(self);
        let owned = key.to_string();
        let draft = Session::provisional(&request.user_id, &request.file_name, &request.file_url);

        let (result, _) = self
            .resolutions
            .run(key, move || async move { this.resolve_or_create(&owned, draft).await })
            .await;
        result
    }

    async fn resolve_or_create(&self, key: &str, draft: Session) -> Result<ResolvedSession> {
        match self.sessions.get(key).await {
            Ok(session) => {
                return Ok(ResolvedSession {
                    session,
                    existing: true,
                });
            }
            Err(AppError::NotFound) => {}
            Err(e) => return Err(e),
        }

        tracing::debug!("No session for {}, creating one", key);
        match self.sessions.store().create(key, draft).await {
            Ok(session) => Ok(ResolvedSession {
                session,
                existing: false,
            }),
            Err(AppError::AlreadyExists) => {
                let session = self.sessions.store().get(key).await?;
                Ok(ResolvedSession {
                    session,
                    existing: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn callback(&self, meeting_key: Option<&str>, filename: &str) -> String {
        let mut url = self.callback_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(key) = meeting_key {
                pairs.append_pair("mid", key);
            }
            pairs.append_pair("filename", filename);
        }
        url.into()
    }

    fn compose(
        &self,
        request: &BuildConfig,
        user: &UpstreamUser,
        resolved: Option<&(String, ResolvedSession)>,
    ) -> Result<EditorConfig> {
        let (title, url, key, callback, is_session, is_owner) = match resolved {
            Some((meeting_key, resolved)) => {
                let session = &resolved.session;
                (
                    session.filename.clone(),
                    session.file_url.clone(),
                    session.doc_key.clone(),
                    self.callback(Some(meeting_key), &session.filename),
                    resolved.existing,
                    session.owner == request.user_id,
                )
            }
            None => (
                request.file_name.clone(),
                request.file_url.clone(),
                uuid::Uuid::new_v4().to_string(),
                self.callback(None, &request.file_name),
                false,
                true,
            ),
        };

        let (ext, kind) = file_kind(&title)?;
        let lang = request
            .language
            .clone()
            .or_else(|| Some(user.language.clone()).filter(|lang| !lang.is_empty()));
        let iat = now_ms() / 1000;

        Ok(EditorConfig {
            document: Document {
                permissions: Permissions {
                    edit: is_editable(&ext),
                    download: false,
                    print: false,
                },
                file_type: ext,
                key,
                title,
                url,
            },
            document_type: kind,
            editor_config: EditorSettings {
                user: EditorUser {
                    id: user.id.clone(),
                    name: user.display_name(),
                },
                callback_url: callback,
                customization: Customization {
                    goback: Goback {
                        request_close: true,
                    },
                    plugins: false,
                    hide_right_menu: true,
                },
                lang,
            },
            device_type: device_type(&request.user_agent).to_string(),
            token: String::new(),
            is_session,
            is_owner,
            iat,
            exp: iat + CONFIG_TTL_SECS,
        })
    }
}

/// Builds signed editor configs.
///
/// Concurrent builds of the same request by one user share a single
/// assembly, and concurrent session resolutions for one meeting share a
/// single lookup or creation.
pub struct ConfigAssembler {
    composer: Arc<Composer>,
    builds: Coalescer<EditorConfig>,
}

impl ConfigAssembler {
    pub fn new(
        identity: Arc<IdentityResolver>,
        sessions: Arc<SessionService>,
        signer: ConfigSigner,
        callback_url: &str,
    ) -> Result<Self> {
        let callback_url = Url::parse(callback_url.trim())
            .map_err(|e| AppError::Validation(format!("Invalid callback URL: {}", e)))?;

        Ok(Self {
            composer: Arc::new(Composer {
                identity,
                sessions,
                signer,
                callback_url,
                resolutions: Coalescer::new(),
            }),
            builds: Coalescer::new(),
        })
    }

    pub async fn assemble(&self, request: BuildConfig) -> Result<EditorConfig> {
        let key = format!(
            "{}|{}|{}|{}",
            request.user_id,
            request.meeting_id.as_deref().unwrap_or_default(),
            request.file_name,
            request.file_url
        );
        let user_id = request.user_id.clone();
        let composer = Arc::clone(&self.composer);

        let (result, shared) = self
            .builds
            .run(&key, move || composer.build(request))
            .await;
        if shared {
            tracing::debug!("Config build for user {} was shared", user_id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_mobile_agents() {
        assert_eq!(
            device_type("Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) Mobile/15E148"),
            "mobile"
        );
        assert_eq!(device_type("Mozilla/5.0 (Linux; Android 13; Pixel 7)"), "mobile");
        assert_eq!(device_type("Mozilla/5.0 (iPad; CPU OS 16_0 like Mac OS X)"), "mobile");
        assert_eq!(
            device_type("Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0"),
            "desktop"
        );
        assert_eq!(device_type(""), "desktop");
    }

    #[test]
    fn file_kind_rejects_unknown_types() {
        assert_eq!(file_kind("a.pptx").unwrap().1, DocumentType::Slide);
        assert!(matches!(file_kind("archive.zip"), Err(AppError::Validation(_))));
        assert!(matches!(file_kind("README"), Err(AppError::Validation(_))));
    }
}
