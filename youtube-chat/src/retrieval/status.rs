use crate::retrieval::classify::YouTubeApiErrorInfo;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A point-in-time view of a retrieval run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRetrievalStatus {
    pub is_running: bool,
    /// When the last successful cycle completed. Unset until the first one does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retrieval_time: Option<Timestamp>,
    /// Messages delivered so far in this run.
    pub total_messages: u64,
    /// The error from the last cycle, if that cycle failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_error: Option<YouTubeApiErrorInfo>,
}

/// Owns the status of one poll loop. Only the loop writes to it; everyone else gets snapshots.
#[derive(Debug, Default)]
pub(crate) struct StatusTracker {
    status: ChatRetrievalStatus,
}

impl StatusTracker {
    /// Resets the tracker for a fresh run.
    pub(crate) fn begin_run(&mut self) {
        self.status = ChatRetrievalStatus {
            is_running: true,
            ..ChatRetrievalStatus::default()
        };
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.status.is_running = false;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status.is_running
    }

    /// Records a successful cycle and returns the new cumulative message count.
    pub(crate) fn record_batch(&mut self, count: usize, at: Timestamp) -> u64 {
        self.status.total_messages = self.status.total_messages.saturating_add(count as u64);
        self.status.last_retrieval_time = Some(at);
        self.status.current_error = None;
        self.status.total_messages
    }

    pub(crate) fn record_error(&mut self, error: YouTubeApiErrorInfo) {
        self.status.current_error = Some(error);
    }

    pub(crate) fn snapshot(&self) -> ChatRetrievalStatus {
        self.status.clone()
    }
}
