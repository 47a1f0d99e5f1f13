//! Runtime configuration and the service-account document.
//!
//! # Design
//! Every section deserializes with defaults filled in, so a settings file only
//! has to name what differs from a deployed device talking to Google over the
//! modem. The service-account document is not part of the settings: it is read
//! from disk each time a token is requested and dropped after signing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{IdentityProvider, ServiceIdentity, SHEETS_SCOPE, TOKEN_URL};
use crate::error::ApiError;

/// Knobs for `RetryingClient`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Port used when the URL does not name one.
    pub port: u16,
    /// Ask the transport for its secure channel.
    pub secure: bool,
    pub max_attempts: u32,
    /// Window for each transport read.
    pub receive_timeout_ms: u64,
    /// Reads per attempt before giving up on a JSON body.
    pub max_receives: u32,
}

impl ClientConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: 443,
            secure: true,
            max_attempts: 5,
            receive_timeout_ms: 20_000,
            max_receives: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Where the JWT assertion is posted.
    pub token_url: String,
    /// The `aud` claim. Google requires the canonical token URL here even
    /// when the request itself goes elsewhere.
    pub audience: String,
    pub scope: String,
    pub token_lifetime_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: TOKEN_URL.to_string(),
            audience: TOKEN_URL.to_string(),
            scope: SHEETS_SCOPE.to_string(),
            token_lifetime_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub base_url: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: String::new(),
            base_url: "https://sheets.googleapis.com".to_string(),
        }
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("service_account.json")
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ApiError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ApiError::Config(format!("invalid settings in {}: {e}", path.display())))
    }

    pub fn service_account(&self) -> ServiceAccountFile {
        ServiceAccountFile::new(&self.credentials_path)
    }
}

/// Service-account JSON on disk, read on every token request.
#[derive(Debug, Clone)]
pub struct ServiceAccountFile {
    path: PathBuf,
}

impl ServiceAccountFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityProvider for ServiceAccountFile {
    fn identity(&self) -> Result<ServiceIdentity, ApiError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| ApiError::Config(format!("cannot read {}: {e}", self.path.display())))?;
        let identity: ServiceIdentity = serde_json::from_str(&raw).map_err(|e| {
            ApiError::Config(format!("invalid service account {}: {e}", self.path.display()))
        })?;
        if identity.client_email.is_empty() || identity.private_key.is_empty() {
            return Err(ApiError::Config(format!(
                "service account {} lacks client_email or private_key",
                self.path.display()
            )));
        }
        Ok(identity)
    }
}
