//! Incremental retrieval of YouTube live chat messages.
//!
//! [`retrieval`] holds the transport-agnostic poll loop; [`youtube_api`] provides the YouTube Data
//! API transport it normally runs against. [`oauth`] and [`credentials`] obtain and persist the
//! access token that transport needs.

pub mod credentials;
pub mod oauth;
pub mod retrieval;
pub mod youtube_api;

pub use retrieval::{
    ChatMessage, ChatRetrieval, ChatRetrievalConfig, ChatRetrievalStatus, MessageHandlerContext,
    RetrievalError, YouTubeApiErrorCode, YouTubeApiErrorInfo,
};
pub use youtube_api::YouTubeClient;
