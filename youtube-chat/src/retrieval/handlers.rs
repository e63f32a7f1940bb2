use crate::retrieval::message::ChatMessage;
use jiff::Timestamp;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// The future a [`MessageHandler`] returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = eyre::Result<()>> + Send>>;

/// Information about the cycle that produced a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHandlerContext {
    /// When the batch was retrieved.
    pub retrieved_at: Timestamp,
    /// The run's cumulative message count, including this batch.
    pub total_messages: u64,
}

/// Receives each non-empty batch of chat messages.
///
/// Any async closure of the right shape is a handler:
///
/// ```no_run
/// # use youtube_chat_retrieval::retrieval::{ChatMessage, MessageHandlerContext};
/// # use std::sync::Arc;
/// let _handler = |messages: Arc<[ChatMessage]>, ctx: MessageHandlerContext| async move {
///     println!("{} new ({} total)", messages.len(), ctx.total_messages);
///     Ok::<(), eyre::Report>(())
/// };
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, messages: Arc<[ChatMessage]>, context: MessageHandlerContext)
    -> HandlerFuture;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Arc<[ChatMessage]>, MessageHandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    fn handle(
        &self,
        messages: Arc<[ChatMessage]>,
        context: MessageHandlerContext,
    ) -> HandlerFuture {
        Box::pin(self(messages, context))
    }
}

/// Identifies a registered handler so that it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Handlers in registration order.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(HandlerId, Arc<dyn MessageHandler>)>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}

impl HandlerRegistry {
    pub(crate) fn add(&self, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, handler));
        id
    }

    /// Returns whether a handler was registered under `id`.
    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(HandlerId, Arc<dyn MessageHandler>)>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers a batch to every handler registered at the time of the call, one at a time.
    ///
    /// A handler that fails or panics is logged and skipped over; the remaining handlers still
    /// receive the batch.
    pub(crate) async fn notify(&self, messages: Arc<[ChatMessage]>, context: MessageHandlerContext) {
        let handlers: Vec<_> = self.lock().clone();
        for (id, handler) in handlers {
            let fut = handler.handle(Arc::clone(&messages), context);
            match tokio::spawn(fut).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(handler = id.0, error = format!("{e:#}"), "message handler failed");
                }
                Err(e) => {
                    tracing::error!(handler = id.0, error = %e, "message handler panicked");
                }
            }
        }
    }
}
