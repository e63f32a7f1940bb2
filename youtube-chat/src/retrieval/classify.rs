//! Turns fetch failures into typed, retry-aware error records.

use crate::retrieval::transport::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of error categories the poll loop distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum YouTubeApiErrorCode {
    #[serde(rename = "quotaExceeded")]
    QuotaExceeded,
    #[serde(rename = "rateLimitExceeded")]
    RateLimitExceeded,
    #[serde(rename = "authenticationError")]
    AuthenticationError,
    #[serde(rename = "invalidParameter")]
    InvalidParameter,
    #[serde(rename = "notFound")]
    NotFound,
    #[serde(rename = "unknown")]
    Unknown,
}

impl YouTubeApiErrorCode {
    /// Whether the poll loop should retry after an error of this kind.
    ///
    /// Only provider throttling is transient; everything else is a caller or configuration
    /// defect, or unknown.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QuotaExceeded | Self::RateLimitExceeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuotaExceeded => "quotaExceeded",
            Self::RateLimitExceeded => "rateLimitExceeded",
            Self::AuthenticationError => "authenticationError",
            Self::InvalidParameter => "invalidParameter",
            Self::NotFound => "notFound",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for YouTubeApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YouTubeApiErrorInfo {
    pub code: YouTubeApiErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl fmt::Display for YouTubeApiErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for YouTubeApiErrorInfo {}

/// Maps a provider status and reason onto an error code.
pub fn code_for(status: Option<u16>, reason: Option<&str>) -> YouTubeApiErrorCode {
    match (status, reason) {
        (Some(403), Some("quotaExceeded")) => YouTubeApiErrorCode::QuotaExceeded,
        (Some(403), _) => YouTubeApiErrorCode::RateLimitExceeded,
        (Some(401), _) => YouTubeApiErrorCode::AuthenticationError,
        (Some(400), _) => YouTubeApiErrorCode::InvalidParameter,
        (Some(404), _) => YouTubeApiErrorCode::NotFound,
        _ => YouTubeApiErrorCode::Unknown,
    }
}

/// Classifies a failure raised by a [`crate::retrieval::ChatTransport`].
///
/// The provider signal is the first [`ProviderError`] in the failure's cause chain, so transports
/// are free to wrap it in additional context.
pub fn classify(error: &eyre::Report) -> YouTubeApiErrorInfo {
    let provider = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProviderError>());

    let code = code_for(
        provider.map(|p| p.status),
        provider.and_then(|p| p.reason.as_deref()),
    );
    let message = provider
        .and_then(|p| p.message.clone())
        .unwrap_or_else(|| format!("{error:#}"));

    YouTubeApiErrorInfo {
        code,
        message,
        retryable: code.is_retryable(),
    }
}
