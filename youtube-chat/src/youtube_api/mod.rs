//! YouTube Data API v3 adapter.
//!
//! [`YouTubeClient`] is the production [`crate::retrieval::ChatTransport`]: it pages through
//! `liveChatMessages.list` with a bearer token and reports error statuses as
//! [`crate::retrieval::ProviderError`]s so the poll loop can classify them.

pub mod broadcasts;
pub mod client;
mod error;

pub use broadcasts::{LiveBroadcast, LiveBroadcastListResponse, LiveBroadcastSnippet};
pub use client::{DEFAULT_BASE_URL, YouTubeClient};
