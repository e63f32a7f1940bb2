//! The slice of the Live Broadcasts API needed to find a broadcast's chat.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Response structure for the `liveBroadcasts.list` API call.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts/list>
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastListResponse {
    /// A list of broadcasts that match the request criteria.
    #[serde(default)]
    pub items: Vec<LiveBroadcast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// A `liveBroadcast` resource, reduced to its snippet.
///
/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts#resource>
#[derive(Debug, Serialize, Deserialize)]
pub struct LiveBroadcast {
    /// The ID that YouTube assigns to uniquely identify the broadcast.
    pub id: String,
    pub snippet: LiveBroadcastSnippet,
}

/// See: <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts#snippet>
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveBroadcastSnippet {
    /// The broadcast's title.
    pub title: String,
    /// The date and time that the broadcast was added to YouTube's live broadcast schedule.
    pub published_at: Timestamp,
    /// The ID for the broadcast's live chat.
    ///
    /// Only present while the broadcast has an enabled chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_chat_id: Option<String>,
    /// Unset until the broadcast has actually started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<Timestamp>,
}
