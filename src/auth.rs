//! Credential provider seam.
//!
//! The core never acquires credentials itself. It asks an [`AuthProvider`] for
//! a short-lived [`Credential`] before each remote call and, when the store
//! rejects it, for exactly one refresh. Handles are never cached past the call
//! that needed them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No credential available: {0}")]
    Missing(String),

    #[error("Credential expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("Credential refresh is not supported by this provider")]
    RefreshUnsupported,

    #[error("Failed to read token file {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Malformed token file: {0}")]
    Malformed(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Opaque bearer credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(****)")
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Return a credential believed to be valid right now.
    async fn ensure_valid_credential(&self) -> AuthResult<Credential>;

    /// Obtain a fresh credential after the store rejected the current one.
    /// Fails with [`AuthError::RefreshUnsupported`] when there is no way to refresh.
    async fn refresh_credential(&self) -> AuthResult<Credential>;
}

/// Token file written by an external login helper.
///
/// ```json
/// { "access_token": "ya29...", "expires_at": "2026-01-01T00:00:00Z" }
/// ```
#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Reads credentials from a JSON token file kept current by an external
/// OAuth helper. Refreshing re-reads the file, picking up a token the helper
/// renewed in the meantime.
#[derive(Debug, Clone)]
pub struct TokenFileAuth {
    path: PathBuf,
}

impl TokenFileAuth {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> AuthResult<Credential> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AuthError::Missing(format!(
                    "token file {} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => return Err(AuthError::Io(e, self.path.clone())),
        };

        let token: TokenFile =
            serde_json::from_str(&raw).map_err(|e| AuthError::Malformed(e.to_string()))?;

        if token.access_token.trim().is_empty() {
            return Err(AuthError::Missing("token file has an empty access_token".into()));
        }
        if let Some(expires_at) = token.expires_at
            && expires_at <= Utc::now()
        {
            return Err(AuthError::Expired(expires_at));
        }

        Ok(Credential::new(token.access_token))
    }
}

#[async_trait]
impl AuthProvider for TokenFileAuth {
    async fn ensure_valid_credential(&self) -> AuthResult<Credential> {
        self.load().await
    }

    async fn refresh_credential(&self) -> AuthResult<Credential> {
        tracing::info!(path = %self.path.display(), "Reloading credential from token file");
        self.load().await
    }
}

/// A fixed credential. Cannot refresh.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    credential: Credential,
}

impl StaticAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn ensure_valid_credential(&self) -> AuthResult<Credential> {
        Ok(self.credential.clone())
    }

    async fn refresh_credential(&self) -> AuthResult<Credential> {
        Err(AuthError::RefreshUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert_eq!(format!("{:?}", credential), "Credential(****)");
    }

    #[tokio::test]
    async fn test_token_file_loads_valid_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"access_token": "abc", "expires_at": "2999-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let auth = TokenFileAuth::new(&path);
        let credential = auth.ensure_valid_credential().await.unwrap();
        assert_eq!(credential.token(), "abc");
    }

    #[tokio::test]
    async fn test_token_file_rejects_expired_token() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(
            &path,
            r#"{"access_token": "abc", "expires_at": "2000-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let err = TokenFileAuth::new(&path)
            .ensure_valid_credential()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Expired(_)));
    }

    #[tokio::test]
    async fn test_refresh_picks_up_rewritten_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, r#"{"access_token": "old"}"#).unwrap();
        let auth = TokenFileAuth::new(&path);
        assert_eq!(auth.ensure_valid_credential().await.unwrap().token(), "old");

        std::fs::write(&path, r#"{"access_token": "new"}"#).unwrap();
        assert_eq!(auth.refresh_credential().await.unwrap().token(), "new");
    }

    #[tokio::test]
    async fn test_missing_token_file() {
        let dir = TempDir::new().unwrap();
        let err = TokenFileAuth::new(dir.path().join("absent.json"))
            .ensure_valid_credential()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Missing(_)));
    }

    #[tokio::test]
    async fn test_static_auth_cannot_refresh() {
        let auth = StaticAuth::new("t");
        assert!(auth.ensure_valid_credential().await.is_ok());
        assert!(matches!(
            auth.refresh_credential().await,
            Err(AuthError::RefreshUnsupported)
        ));
    }
}
