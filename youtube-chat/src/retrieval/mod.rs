//! Incremental retrieval of live chat messages.
//!
//! A [`ChatRetrieval`] repeatedly asks a [`ChatTransport`] for the next page of a live chat,
//! validates what comes back, and hands every non-empty batch to the registered
//! [`MessageHandler`]s. It paces itself by the provider's polling hint, retries throttling errors
//! within a budget, and stops on anything else.
//!
//! ```no_run
//! # async fn demo(client: youtube_chat_retrieval::youtube_api::YouTubeClient) -> eyre::Result<()> {
//! use youtube_chat_retrieval::retrieval::{
//!     ChatMessage, ChatRetrieval, ChatRetrievalConfig, MessageHandlerContext,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let retrieval = ChatRetrieval::new(client);
//! retrieval.add_message_handler(|messages: Arc<[ChatMessage]>, _: MessageHandlerContext| async move {
//!     for message in messages.iter() {
//!         println!("{}: {}", message.author_details.display_name, message.snippet.display_message);
//!     }
//!     Ok::<(), eyre::Report>(())
//! });
//! retrieval
//!     .start(ChatRetrievalConfig::new("Cg0KC2xpdmUtY2hhdA", Duration::from_secs(5)))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod classify;
mod config;
mod handlers;
mod message;
mod normalize;
mod status;
mod transport;

pub use classify::{YouTubeApiErrorCode, YouTubeApiErrorInfo, classify, code_for};
pub use config::{
    ChatRetrievalConfig, DEFAULT_MAX_RESULTS, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS,
    InvalidConfig,
};
pub use handlers::{HandlerFuture, HandlerId, MessageHandler, MessageHandlerContext};
pub use message::{
    ChatAuthorDetails, ChatMessage, ChatMessageSnippet, ChatMessageType, MessageKind,
    SuperChatDetails,
};
pub use normalize::{normalize, normalize_message};
pub use status::ChatRetrievalStatus;
pub use transport::{ChatTransport, ListRequest, LiveChatPage, MessagePart, ProviderError};

use handlers::HandlerRegistry;
use jiff::Timestamp;
use status::StatusTracker;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The resource parts every cycle asks for.
const REQUESTED_PARTS: [MessagePart; 2] = [MessagePart::Snippet, MessagePart::AuthorDetails];

/// How many undelivered terminal failures a slow subscriber may fall behind by.
const FAILURE_CHANNEL_CAPACITY: usize = 16;

/// Why [`ChatRetrieval::start`] refused or aborted a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// A run is already in progress; it was left untouched.
    AlreadyRunning,
    InvalidConfig(InvalidConfig),
    /// The first cycle failed in a way that ends the run.
    Fatal(YouTubeApiErrorInfo),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalError::AlreadyRunning => f.write_str("chat retrieval is already running"),
            RetrievalError::InvalidConfig(e) => write!(f, "{e}"),
            RetrievalError::Fatal(e) => write!(f, "chat retrieval failed: {e}"),
        }
    }
}

impl std::error::Error for RetrievalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RetrievalError::AlreadyRunning => None,
            RetrievalError::InvalidConfig(e) => Some(e),
            RetrievalError::Fatal(e) => Some(e),
        }
    }
}

/// What the driver should do once a cycle has resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NextAction {
    /// Poll again after the given delay.
    Poll(Duration),
    /// Retry a failed cycle after the given delay.
    Retry(Duration),
    /// The run was stopped or replaced; exit quietly.
    Halt,
    /// The run ended with an error.
    Fail(YouTubeApiErrorInfo),
}

/// Identity of one `start`..`stop` span.
#[derive(Debug, Clone)]
struct Run {
    generation: u64,
    cancel: CancellationToken,
    config: Arc<ChatRetrievalConfig>,
}

#[derive(Debug, Default)]
struct LoopState {
    status: StatusTracker,
    cursor: Option<String>,
    /// Consecutive retries since the last successful cycle.
    retry_attempts: u32,
    generation: u64,
    run: Option<Run>,
}

impl LoopState {
    /// Whether `run` is still the live run. Stale runs must not touch state.
    fn is_current(&self, run: &Run) -> bool {
        self.status.is_running()
            && self
                .run
                .as_ref()
                .is_some_and(|r| r.generation == run.generation)
    }
}

struct Inner<T> {
    transport: T,
    handlers: HandlerRegistry,
    state: Mutex<LoopState>,
    /// Held by a driver for the whole of each cycle, dispatch included, so that a run started
    /// right after a `stop` waits for the previous run's cycle to drain.
    cycle_lock: tokio::sync::Mutex<()>,
    failures: broadcast::Sender<YouTubeApiErrorInfo>,
}

/// Polls one live chat at a time on behalf of a set of handlers.
///
/// Stops when dropped.
pub struct ChatRetrieval<T: ChatTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: ChatTransport> fmt::Debug for ChatRetrieval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatRetrieval")
            .field("status", &self.status())
            .field("handlers", &self.inner.handlers)
            .finish_non_exhaustive()
    }
}

impl<T: ChatTransport> ChatRetrieval<T> {
    pub fn new(transport: T) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                handlers: HandlerRegistry::default(),
                state: Mutex::new(LoopState::default()),
                cycle_lock: tokio::sync::Mutex::new(()),
                failures,
            }),
        }
    }

    /// Starts retrieving messages for `config.live_chat_id`.
    ///
    /// If a stopped run is still finishing a cycle, the first cycle waits for it.
    ///
    /// Resolves once the first cycle has either succeeded or scheduled a retry; later cycles run
    /// in the background until [`Self::stop`] is called or a fatal error occurs. A fatal error in
    /// the first cycle is returned here; fatal errors after that are only published through
    /// [`Self::subscribe_failures`].
    pub async fn start(&self, config: ChatRetrievalConfig) -> Result<(), RetrievalError> {
        let run = {
            let mut state = self.inner.lock();
            if state.status.is_running() {
                return Err(RetrievalError::AlreadyRunning);
            }
            config.validate().map_err(RetrievalError::InvalidConfig)?;

            state.generation += 1;
            state.status.begin_run();
            state.cursor = None;
            state.retry_attempts = 0;
            let run = Run {
                generation: state.generation,
                cancel: CancellationToken::new(),
                config: Arc::new(config),
            };
            state.run = Some(run.clone());
            run
        };

        tracing::info!(
            live_chat_id = run.config.live_chat_id,
            interval_ms = run.config.polling_interval_ms,
            "starting chat retrieval"
        );

        let span = tracing::info_span!(
            "chat_retrieval",
            live_chat_id = run.config.live_chat_id,
            generation = run.generation
        );
        let (first_tx, first_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.inner).drive(run, first_tx).instrument(span));

        match first_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(RetrievalError::Fatal(error)),
            // the driver went away without reporting, which only happens on runtime shutdown
            Err(_) => Ok(()),
        }
    }

    /// Stops the current run, cancelling any pending or in-flight cycle.
    ///
    /// Does nothing if no run is active.
    pub fn stop(&self) {
        let run = {
            let mut state = self.inner.lock();
            state.status.mark_stopped();
            state.run.take()
        };
        if let Some(run) = run {
            run.cancel.cancel();
            tracing::info!(live_chat_id = run.config.live_chat_id, "stopped chat retrieval");
        }
    }

    /// Registers a handler for subsequent batches.
    pub fn add_message_handler(&self, handler: impl MessageHandler) -> HandlerId {
        self.inner.handlers.add(Arc::new(handler))
    }

    /// Unregisters a handler. Returns `false` if it was not registered.
    pub fn remove_message_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.remove(id)
    }

    pub fn status(&self) -> ChatRetrievalStatus {
        self.inner.lock().status.snapshot()
    }

    /// Subscribes to fatal errors that end a run after [`Self::start`] has returned.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<YouTubeApiErrorInfo> {
        self.inner.failures.subscribe()
    }
}

impl<T: ChatTransport> Drop for ChatRetrieval<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: ChatTransport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs cycles for `run` until it halts or fails.
    ///
    /// The outcome of the first cycle goes to `first`; if nobody is waiting for it any more, a
    /// first-cycle failure is published like any later one.
    async fn drive(
        self: Arc<Self>,
        run: Run,
        first: oneshot::Sender<Result<(), YouTubeApiErrorInfo>>,
    ) {
        let mut first = Some(first);
        loop {
            let slot = tokio::select! {
                biased;
                _ = run.cancel.cancelled() => None,
                guard = self.cycle_lock.lock() => Some(guard),
            };
            let action = match slot {
                Some(_cycle) => self.cycle(&run).await,
                None => NextAction::Halt,
            };
            let report_to = first.take();
            let delay = match action {
                NextAction::Poll(delay) | NextAction::Retry(delay) => {
                    if let Some(tx) = report_to {
                        let _ = tx.send(Ok(()));
                    }
                    delay
                }
                NextAction::Halt => {
                    if let Some(tx) = report_to {
                        let _ = tx.send(Ok(()));
                    }
                    tracing::debug!("run halted");
                    return;
                }
                NextAction::Fail(error) => {
                    let unreported = match report_to {
                        Some(tx) => tx.send(Err(error)).err().and_then(Result::err),
                        None => Some(error),
                    };
                    if let Some(error) = unreported {
                        // no receivers is fine
                        let _ = self.failures.send(error);
                    }
                    return;
                }
            };

            tokio::select! {
                biased;
                _ = run.cancel.cancelled() => {
                    tracing::debug!("pending cycle cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Performs one fetch and folds its outcome into the run's state.
    async fn cycle(&self, run: &Run) -> NextAction {
        let cursor = {
            let state = self.lock();
            if !state.is_current(run) {
                return NextAction::Halt;
            }
            state.cursor.clone()
        };

        let request = ListRequest {
            live_chat_id: &run.config.live_chat_id,
            page_token: cursor.as_deref(),
            max_results: run.config.max_results,
            parts: &REQUESTED_PARTS,
        };

        let result = tokio::select! {
            biased;
            _ = run.cancel.cancelled() => return NextAction::Halt,
            result = self.transport.list(request) => result,
        };

        match result {
            Ok(page) => self.on_page(run, page).await,
            Err(e) => self.on_failure(run, &e),
        }
    }

    async fn on_page(&self, run: &Run, page: LiveChatPage) -> NextAction {
        let LiveChatPage {
            items,
            next_page_token,
            polling_interval_millis,
        } = page;

        let received = items.len();
        let messages = normalize(items);
        let retrieved_at = Timestamp::now();

        let total_messages = {
            let mut state = self.lock();
            if !state.is_current(run) {
                return NextAction::Halt;
            }
            state.retry_attempts = 0;
            state.status.record_batch(messages.len(), retrieved_at)
        };

        tracing::debug!(
            received,
            delivered = messages.len(),
            total_messages,
            has_cursor = next_page_token.is_some(),
            "retrieved chat page"
        );

        if !messages.is_empty() {
            let context = MessageHandlerContext {
                retrieved_at,
                total_messages,
            };
            self.handlers.notify(Arc::from(messages), context).await;
        }

        {
            let mut state = self.lock();
            if !state.is_current(run) {
                return NextAction::Halt;
            }
            state.cursor = next_page_token;
        }

        // a zero hint would mean polling in a tight loop, so it counts as no hint
        let delay = polling_interval_millis
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or_else(|| run.config.polling_interval());
        NextAction::Poll(delay)
    }

    fn on_failure(&self, run: &Run, e: &eyre::Report) -> NextAction {
        let error = classify(e);

        let mut state = self.lock();
        if !state.is_current(run) {
            return NextAction::Halt;
        }
        state.status.record_error(error.clone());

        if error.retryable && run.config.allows_retry(state.retry_attempts) {
            state.retry_attempts = state.retry_attempts.saturating_add(1);
            tracing::warn!(
                code = %error.code,
                attempt = state.retry_attempts,
                max_retries = ?run.config.max_retries,
                delay_ms = run.config.retry_delay_ms,
                error = format!("{e:#}"),
                "chat fetch failed, will retry"
            );
            return NextAction::Retry(run.config.retry_delay());
        }

        state.status.mark_stopped();
        if let Some(run) = state.run.take() {
            run.cancel.cancel();
        }
        drop(state);

        tracing::error!(
            code = %error.code,
            retryable = error.retryable,
            error = format!("{e:#}"),
            "chat retrieval stopped"
        );
        NextAction::Fail(error)
    }
}
