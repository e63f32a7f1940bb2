use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default page size requested from the provider.
pub const DEFAULT_MAX_RESULTS: u32 = 200;
/// Default number of consecutive retries allowed before a retryable error becomes fatal.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default wait before retrying a retryable failure.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;

/// Options for one chat retrieval run.
///
/// Deserializes from camelCase JSON. Omitted optional fields take their defaults; an explicit
/// `"maxRetries": null` means retryable failures are retried forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRetrievalConfig {
    /// The live chat to poll.
    pub live_chat_id: String,
    /// Interval between polls when the provider does not send a pacing hint.
    pub polling_interval_ms: u64,
    /// Maximum number of messages per request.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Maximum consecutive retries for retryable errors. `None` is unbounded.
    #[serde(default = "default_max_retries")]
    pub max_retries: Option<u32>,
    /// Delay before retrying a retryable error.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_results() -> u32 {
    DEFAULT_MAX_RESULTS
}

fn default_max_retries() -> Option<u32> {
    Some(DEFAULT_MAX_RETRIES)
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ChatRetrievalConfig {
    /// Creates a config with default page size, retry budget, and retry delay.
    pub fn new(live_chat_id: impl Into<String>, polling_interval: Duration) -> Self {
        Self {
            live_chat_id: live_chat_id.into(),
            polling_interval_ms: saturating_millis(polling_interval),
            max_results: DEFAULT_MAX_RESULTS,
            max_retries: Some(DEFAULT_MAX_RETRIES),
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay_ms = saturating_millis(retry_delay);
        self
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Whether another retry is allowed after `attempts_so_far` consecutive retries.
    pub fn allows_retry(&self, attempts_so_far: u32) -> bool {
        self.max_retries.is_none_or(|max| attempts_so_far < max)
    }

    /// Checks the invariants the poll loop relies on.
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.live_chat_id.trim().is_empty() {
            return Err(InvalidConfig("liveChatId must not be empty"));
        }
        if self.polling_interval_ms == 0 {
            return Err(InvalidConfig("pollingIntervalMs must be positive"));
        }
        if self.max_results == 0 {
            return Err(InvalidConfig("maxResults must be positive"));
        }
        if self.retry_delay_ms == 0 {
            return Err(InvalidConfig("retryDelayMs must be positive"));
        }
        Ok(())
    }
}

/// A [`ChatRetrievalConfig`] that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidConfig(&'static str);

impl InvalidConfig {
    pub fn reason(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid chat retrieval config: {}", self.0)
    }
}

impl std::error::Error for InvalidConfig {}
