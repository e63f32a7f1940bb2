//! Persistence of OAuth tokens between runs.

use eyre::Context;
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// The tokens stored on disk.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(
        rename = "ACCESS_TOKEN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<String>,
    #[serde(
        rename = "REFRESH_TOKEN",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn from_token(token: &BasicTokenResponse) -> Self {
        Self {
            access_token: Some(token.access_token().secret().clone()),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    /// Fields set in `self` win; the rest come from `stored`.
    fn merged_over(self, stored: Credentials) -> Credentials {
        Credentials {
            access_token: self.access_token.or(stored.access_token),
            refresh_token: self.refresh_token.or(stored.refresh_token),
        }
    }
}

/// A JSON file holding [`Credentials`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored credentials. A missing or empty file holds no credentials.
    pub async fn load(&self) -> eyre::Result<Credentials> {
        let exists = tokio::fs::try_exists(&self.path)
            .await
            .with_context(|| format!("check for credentials at {}", self.path.display()))?;
        if !exists {
            tracing::debug!(path = %self.path.display(), "no stored credentials");
            return Ok(Credentials::default());
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("read credentials from {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Credentials::default());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("parse credentials in {}", self.path.display()))
    }

    /// Merges `credentials` into what is stored and writes the result back.
    ///
    /// Returns what is now stored.
    pub async fn save(&self, credentials: Credentials) -> eyre::Result<Credentials> {
        let stored = self.load().await.context("load existing credentials")?;
        let merged = credentials.merged_over(stored);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&merged).context("serialize credentials")?;
        tokio::fs::write(&self.path, json)
            .await
            .with_context(|| format!("write credentials to {}", self.path.display()))?;

        tracing::info!(path = %self.path.display(), "saved credentials");
        Ok(merged)
    }
}
