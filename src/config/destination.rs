//! Upload destination configuration.
//!
//! # Example
//!
//! ```toml
//! [destination]
//! folder_id = "nightly"
//! root = "/mnt/drive/backups"
//! oauth_client_id = "${OAUTH_CLIENT_ID}"
//! oauth_client_secret = "${OAUTH_CLIENT_SECRET}"
//! token_file = "/var/lib/stowaway/token.json"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::store::Destination;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    /// Folder id inside the store that receives uploads and is subject to
    /// retention. Required for a backup run.
    #[serde(default)]
    pub folder_id: Option<String>,

    /// Root directory of the filesystem store.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// OAuth client id of the login helper that maintains `token_file`.
    #[serde(default)]
    pub oauth_client_id: Option<String>,

    /// OAuth client secret. Never logged.
    #[serde(default)]
    pub oauth_client_secret: Option<String>,

    /// JSON token file kept current by the login helper.
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            root: default_root(),
            oauth_client_id: None,
            oauth_client_secret: None,
            token_file: default_token_file(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("remote")
}

fn default_token_file() -> PathBuf {
    PathBuf::from("token.json")
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl DestinationConfig {
    /// Check that credentials and folder are configured before a run starts.
    /// Returns the destination to upload to.
    pub fn preflight(&self) -> Result<Destination, String> {
        if is_blank(&self.oauth_client_id) || is_blank(&self.oauth_client_secret) {
            return Err("destination.oauth_client_id and destination.oauth_client_secret must be configured".into());
        }
        match self.folder_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(Destination::folder(id)),
            _ => Err("destination.folder_id must be configured".into()),
        }
    }
}
