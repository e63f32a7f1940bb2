//! The narrow capability the poll loop needs from whatever talks to the chat provider.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// A resource part requested from the `liveChatMessages.list` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePart {
    Snippet,
    AuthorDetails,
}

impl MessagePart {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePart::Snippet => "snippet",
            MessagePart::AuthorDetails => "authorDetails",
        }
    }

    /// Joins parts into the comma-separated form the API expects.
    pub fn join(parts: &[MessagePart]) -> String {
        parts
            .iter()
            .map(MessagePart::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parameters for one page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest<'a> {
    pub live_chat_id: &'a str,
    /// Cursor from the previous page, or `None` to start at the beginning of the stream.
    pub page_token: Option<&'a str>,
    pub max_results: u32,
    pub parts: &'a [MessagePart],
}

/// One page of raw results.
///
/// Items are kept as untyped JSON so that a single malformed record does not fail the whole page;
/// they are validated individually by [`crate::retrieval::normalize`].
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveChatMessages/list#response>
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatPage {
    #[serde(default)]
    pub items: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    /// How long the provider wants clients to wait before polling again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval_millis: Option<u64>,
}

/// Something that can list live chat messages on behalf of an authenticated user.
///
/// Failures should carry a [`ProviderError`] somewhere in their cause chain when the provider
/// answered with an error status; anything else is treated as an unknown, non-retryable failure.
pub trait ChatTransport: Send + Sync + 'static {
    fn list(
        &self,
        request: ListRequest<'_>,
    ) -> impl Future<Output = eyre::Result<LiveChatPage>> + Send;
}

/// An error status reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// HTTP status code.
    pub status: u16,
    /// Machine-readable reason such as `quotaExceeded`, if the provider sent one.
    pub reason: Option<String>,
    /// Human-readable message from the provider's structured error body.
    pub message: Option<String>,
}

impl ProviderError {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            message: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "provider returned status {}", self.status)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {}
