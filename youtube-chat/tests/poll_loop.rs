use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use youtube_chat_retrieval::retrieval::{
    ChatMessage, ChatRetrieval, ChatRetrievalConfig, ChatTransport, ListRequest, LiveChatPage,
    MessageHandlerContext, MessagePart, ProviderError, RetrievalError, YouTubeApiErrorCode,
};

type Step = Result<LiveChatPage, ProviderError>;

#[derive(Debug)]
struct Call {
    live_chat_id: String,
    page_token: Option<String>,
    max_results: u32,
    parts: Vec<MessagePart>,
    at: Instant,
}

/// Answers each list call with the next scripted step, and hangs once the script runs out.
struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    calls: mpsc::UnboundedSender<Call>,
    /// How long each answer takes to arrive.
    latency: Duration,
}

impl ChatTransport for Scripted {
    fn list(
        &self,
        request: ListRequest<'_>,
    ) -> impl Future<Output = eyre::Result<LiveChatPage>> + Send {
        let _ = self.calls.send(Call {
            live_chat_id: request.live_chat_id.to_string(),
            page_token: request.page_token.map(str::to_owned),
            max_results: request.max_results,
            parts: request.parts.to_vec(),
            at: Instant::now(),
        });
        let step = self.steps.lock().unwrap().pop_front();
        let latency = self.latency;
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            match step {
                Some(Ok(page)) => Ok(page),
                Some(Err(e)) => Err(eyre::Report::new(e)),
                None => std::future::pending().await,
            }
        }
    }
}

fn scripted(
    steps: impl IntoIterator<Item = Step>,
) -> (ChatRetrieval<Scripted>, mpsc::UnboundedReceiver<Call>) {
    scripted_with_latency(steps, Duration::ZERO)
}

fn scripted_with_latency(
    steps: impl IntoIterator<Item = Step>,
    latency: Duration,
) -> (ChatRetrieval<Scripted>, mpsc::UnboundedReceiver<Call>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Scripted {
        steps: Mutex::new(steps.into_iter().collect()),
        calls: tx,
        latency,
    };
    (ChatRetrieval::new(transport), rx)
}

async fn next_call(calls: &mut mpsc::UnboundedReceiver<Call>) -> Call {
    tokio::time::timeout(Duration::from_secs(600), calls.recv())
        .await
        .expect("no transport call within ten minutes")
        .expect("transport went away")
}

/// Lets the loop run for a while and asserts that it no longer talks to the transport.
async fn assert_quiet(calls: &mut mpsc::UnboundedReceiver<Call>) {
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(calls.try_recv().is_err(), "loop kept polling");
}

fn assert_waited(waited: Duration, expected: Duration) {
    assert!(
        waited >= expected && waited < expected + Duration::from_millis(10),
        "waited {waited:?}, expected {expected:?}"
    );
}

fn record(id: &str) -> serde_json::Value {
    json!({
        "kind": "youtube#liveChatMessage",
        "id": id,
        "snippet": {
            "type": "textMessageEvent",
            "liveChatId": "chat-1",
            "publishedAt": "2024-05-01T12:00:00Z",
            "hasDisplayContent": true,
            "displayMessage": format!("message {id}")
        },
        "authorDetails": {
            "channelId": "UC1",
            "channelUrl": "http://www.youtube.com/channel/UC1",
            "displayName": "Viewer",
            "profileImageUrl": "https://yt3.ggpht.com/a",
            "isVerified": false,
            "isChatOwner": false,
            "isChatSponsor": false,
            "isChatModerator": false
        }
    })
}

fn page(ids: &[&str], next: Option<&str>, hint_ms: Option<u64>) -> Step {
    Ok(LiveChatPage {
        items: ids.iter().map(|id| record(id)).collect(),
        next_page_token: next.map(str::to_owned),
        polling_interval_millis: hint_ms,
    })
}

fn quota() -> Step {
    Err(ProviderError::new(403)
        .with_reason("quotaExceeded")
        .with_message("quota used up"))
}

fn unauthorized() -> Step {
    Err(ProviderError::new(401).with_message("Invalid Credentials"))
}

fn config(interval_ms: u64) -> ChatRetrievalConfig {
    ChatRetrievalConfig::new("chat-1", Duration::from_millis(interval_ms))
}

type Deliveries = Arc<Mutex<Vec<(Vec<String>, u64)>>>;

fn recording_handler(
    retrieval: &ChatRetrieval<Scripted>,
) -> (Deliveries, youtube_chat_retrieval::retrieval::HandlerId) {
    let seen: Deliveries = Arc::default();
    let sink = Arc::clone(&seen);
    let id = retrieval.add_message_handler(
        move |messages: Arc<[ChatMessage]>, ctx: MessageHandlerContext| {
            let sink = Arc::clone(&sink);
            async move {
                let ids = messages.iter().map(|m| m.id.clone()).collect();
                sink.lock().unwrap().push((ids, ctx.total_messages));
                Ok::<(), eyre::Report>(())
            }
        },
    );
    (seen, id)
}

#[tokio::test(start_paused = true)]
async fn first_request_carries_no_cursor() {
    let (retrieval, mut calls) = scripted([page(&["a"], Some("n1"), None)]);
    retrieval
        .start(config(5000).with_max_results(50))
        .await
        .unwrap();

    let first = next_call(&mut calls).await;
    assert_eq!(first.live_chat_id, "chat-1");
    assert_eq!(first.page_token, None);
    assert_eq!(first.max_results, 50);
    assert_eq!(first.parts, [MessagePart::Snippet, MessagePart::AuthorDetails]);
}

#[tokio::test(start_paused = true)]
async fn provider_hint_paces_next_cycle() {
    let (retrieval, mut calls) = scripted([
        page(&["a"], Some("n1"), Some(2000)),
        page(&[], Some("n2"), None),
    ]);
    retrieval.start(config(5000)).await.unwrap();

    let first = next_call(&mut calls).await;
    let second = next_call(&mut calls).await;
    let waited = second.at - first.at;
    assert!(waited >= Duration::from_millis(2000), "waited {waited:?}");
    assert!(waited < Duration::from_millis(5000), "waited {waited:?}");

    // no hint this time, so the configured interval applies
    let third = next_call(&mut calls).await;
    assert_waited(third.at - second.at, Duration::from_millis(5000));
}

#[tokio::test(start_paused = true)]
async fn cursor_follows_next_page_token() {
    let (retrieval, mut calls) = scripted([
        page(&["a"], Some("n1"), Some(1000)),
        page(&["b"], Some("n2"), Some(1000)),
        page(&["c"], None, Some(1000)),
    ]);
    retrieval.start(config(5000)).await.unwrap();

    let mut tokens = Vec::new();
    for _ in 0..4 {
        tokens.push(next_call(&mut calls).await.page_token);
    }
    assert_eq!(
        tokens,
        [None, Some("n1".to_string()), Some("n2".to_string()), None]
    );
}

#[tokio::test(start_paused = true)]
async fn count_is_sum_of_batches_and_empty_batches_are_not_dispatched() {
    let (retrieval, mut calls) = scripted([
        page(&["a", "b"], Some("n1"), Some(1000)),
        page(&[], Some("n2"), Some(1000)),
        page(&["c", "d", "e"], Some("n3"), Some(1000)),
    ]);
    let (seen, _) = recording_handler(&retrieval);
    retrieval.start(config(5000)).await.unwrap();

    for _ in 0..4 {
        next_call(&mut calls).await;
    }

    let status = retrieval.status();
    assert!(status.is_running);
    assert_eq!(status.total_messages, 5);
    assert!(status.last_retrieval_time.is_some());
    assert_eq!(status.current_error, None);
    assert_eq!(
        *seen.lock().unwrap(),
        [
            (vec!["a".to_string(), "b".to_string()], 2),
            (
                vec!["c".to_string(), "d".to_string(), "e".to_string()],
                5
            ),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn quota_error_retries_once_after_retry_delay() {
    let (retrieval, mut calls) = scripted([quota(), page(&["a"], Some("n1"), Some(1000))]);
    retrieval
        .start(config(5000).with_retry_delay(Duration::from_millis(1500)))
        .await
        .unwrap();

    let status = retrieval.status();
    assert!(status.is_running);
    let error = status.current_error.expect("quota error recorded");
    assert_eq!(error.code, YouTubeApiErrorCode::QuotaExceeded);
    assert_eq!(error.message, "quota used up");
    assert!(error.retryable);

    let first = next_call(&mut calls).await;
    let retry = next_call(&mut calls).await;
    assert_waited(retry.at - first.at, Duration::from_millis(1500));
    // the retry reuses the cursor the failed request had
    assert_eq!(retry.page_token, None);

    let after = next_call(&mut calls).await;
    assert_eq!(after.page_token.as_deref(), Some("n1"));
    let status = retrieval.status();
    assert!(status.is_running);
    assert_eq!(status.current_error, None);
    assert_eq!(status.total_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn auth_error_in_first_cycle_fails_start() {
    let (retrieval, mut calls) = scripted([unauthorized()]);
    let err = retrieval.start(config(5000)).await.unwrap_err();
    let info = match err {
        RetrievalError::Fatal(info) => info,
        other => panic!("expected fatal error, got {other:?}"),
    };
    assert_eq!(info.code, YouTubeApiErrorCode::AuthenticationError);
    assert!(!info.retryable);

    let status = retrieval.status();
    assert!(!status.is_running);
    assert_eq!(status.current_error, Some(info));

    next_call(&mut calls).await;
    assert_quiet(&mut calls).await;
}

#[tokio::test(start_paused = true)]
async fn auth_error_in_later_cycle_stops_and_is_published() {
    let (retrieval, mut calls) = scripted([page(&["a"], Some("n1"), Some(1000)), unauthorized()]);
    let mut failures = retrieval.subscribe_failures();
    retrieval.start(config(5000)).await.unwrap();

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.code, YouTubeApiErrorCode::AuthenticationError);
    assert_eq!(failure.message, "Invalid Credentials");

    let status = retrieval.status();
    assert!(!status.is_running);
    assert_eq!(status.current_error, Some(failure));
    assert_eq!(status.total_messages, 1);

    next_call(&mut calls).await;
    next_call(&mut calls).await;
    assert_quiet(&mut calls).await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_budget_is_fatal() {
    let (retrieval, mut calls) = scripted([quota(), quota(), quota(), page(&["a"], None, None)]);
    let mut failures = retrieval.subscribe_failures();
    retrieval
        .start(config(5000).with_max_retries(Some(2)))
        .await
        .unwrap();

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.code, YouTubeApiErrorCode::QuotaExceeded);
    assert!(!retrieval.status().is_running);

    for _ in 0..3 {
        next_call(&mut calls).await;
    }
    assert_quiet(&mut calls).await;
}

#[tokio::test(start_paused = true)]
async fn zero_retry_budget_fails_first_cycle() {
    let (retrieval, _calls) = scripted([quota()]);
    let err = retrieval
        .start(config(5000).with_max_retries(Some(0)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RetrievalError::Fatal(ref info) if info.code == YouTubeApiErrorCode::QuotaExceeded
    ));
}

#[tokio::test(start_paused = true)]
async fn success_resets_retry_budget() {
    let (retrieval, mut calls) = scripted([
        quota(),
        page(&["a"], Some("n1"), Some(1000)),
        quota(),
        page(&["b"], Some("n2"), Some(1000)),
    ]);
    retrieval
        .start(config(5000).with_max_retries(Some(1)))
        .await
        .unwrap();

    for _ in 0..5 {
        next_call(&mut calls).await;
    }
    let status = retrieval.status();
    assert!(status.is_running);
    assert_eq!(status.total_messages, 2);
}

#[tokio::test(start_paused = true)]
async fn unbounded_retries_keep_going() {
    let steps: Vec<Step> = std::iter::repeat_with(quota).take(20).collect();
    let (retrieval, mut calls) = scripted(steps);
    retrieval
        .start(config(5000).with_max_retries(None))
        .await
        .unwrap();

    for _ in 0..21 {
        next_call(&mut calls).await;
    }
    assert!(retrieval.status().is_running);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_without_disturbing_run() {
    let (retrieval, mut calls) = scripted([page(&["a"], Some("n1"), Some(1000))]);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;

    let err = retrieval.start(config(1000)).await.unwrap_err();
    assert_eq!(err, RetrievalError::AlreadyRunning);
    assert!(calls.try_recv().is_err());

    let status = retrieval.status();
    assert!(status.is_running);
    assert_eq!(status.total_messages, 1);

    let next = next_call(&mut calls).await;
    assert_eq!(next.page_token.as_deref(), Some("n1"));
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected() {
    let (retrieval, mut calls) = scripted([]);
    let err = retrieval.start(config(0)).await.unwrap_err();
    assert!(matches!(err, RetrievalError::InvalidConfig(_)));
    assert!(!retrieval.status().is_running);
    assert!(calls.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_cancels_pending_cycle() {
    let (retrieval, mut calls) = scripted([
        page(&["a"], Some("n1"), Some(1000)),
        page(&["b"], Some("n2"), Some(1000)),
    ]);
    retrieval.stop();
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;

    retrieval.stop();
    retrieval.stop();
    assert!(!retrieval.status().is_running);
    assert_quiet(&mut calls).await;
    assert_eq!(retrieval.status().total_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_request() {
    // the second request never resolves
    let (retrieval, mut calls) = scripted([page(&["a"], Some("n1"), Some(1000))]);
    let (seen, _) = recording_handler(&retrieval);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;
    next_call(&mut calls).await;

    retrieval.stop();
    assert!(!retrieval.status().is_running);
    assert_quiet(&mut calls).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn restart_begins_a_fresh_run() {
    let (retrieval, mut calls) = scripted([
        page(&["a", "b"], Some("n1"), Some(1000)),
        quota(),
        page(&["c"], Some("m1"), Some(1000)),
    ]);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;
    next_call(&mut calls).await;
    retrieval.stop();
    assert!(retrieval.status().current_error.is_some());

    retrieval.start(config(5000)).await.unwrap();
    let fresh = next_call(&mut calls).await;
    assert_eq!(fresh.page_token, None);

    let status = retrieval.status();
    assert!(status.is_running);
    assert_eq!(status.total_messages, 1);
    assert_eq!(status.current_error, None);

    let next = next_call(&mut calls).await;
    assert_eq!(next.page_token.as_deref(), Some("m1"));
}

#[tokio::test(start_paused = true)]
async fn restart_during_slow_dispatch_waits_for_previous_cycle() {
    let (retrieval, mut calls) = scripted([
        page(&["a"], Some("n1"), Some(1000)),
        page(&["b"], Some("m1"), Some(1000)),
    ]);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let delivered: Arc<Mutex<Vec<String>>> = Arc::default();
    {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let delivered = Arc::clone(&delivered);
        retrieval.add_message_handler(
            move |messages: Arc<[ChatMessage]>, _: MessageHandlerContext| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                let delivered = Arc::clone(&delivered);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    delivered
                        .lock()
                        .unwrap()
                        .extend(messages.iter().map(|m| m.id.clone()));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), eyre::Report>(())
                }
            },
        );
    }

    let retrieval = Arc::new(retrieval);
    let first_start = tokio::spawn({
        let retrieval = Arc::clone(&retrieval);
        async move { retrieval.start(config(5000)).await }
    });
    next_call(&mut calls).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(active.load(Ordering::SeqCst), 1, "first dispatch under way");

    retrieval.stop();
    let restarted_at = Instant::now();
    retrieval.start(config(5000)).await.unwrap();
    first_start.await.unwrap().unwrap();

    let fresh = next_call(&mut calls).await;
    assert_eq!(fresh.page_token, None);
    let waited = fresh.at - restarted_at;
    assert!(
        waited >= Duration::from_secs(9),
        "new run polled after {waited:?}, before the old dispatch finished"
    );
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(*delivered.lock().unwrap(), ["a", "b"]);
    assert_eq!(retrieval.status().total_messages, 1);
}

#[tokio::test(start_paused = true)]
async fn first_cycle_failure_is_published_when_start_is_abandoned() {
    let (retrieval, mut calls) = scripted_with_latency([unauthorized()], Duration::from_secs(1));
    let mut failures = retrieval.subscribe_failures();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), retrieval.start(config(5000))).await;
    assert!(abandoned.is_err(), "first cycle resolved before the timeout");
    next_call(&mut calls).await;

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.code, YouTubeApiErrorCode::AuthenticationError);
    let status = retrieval.status();
    assert!(!status.is_running);
    assert_eq!(status.current_error, Some(failure));
    assert_quiet(&mut calls).await;
}

#[tokio::test(start_paused = true)]
async fn failing_handler_does_not_starve_later_handlers() {
    let (retrieval, mut calls) = scripted([page(&["a"], Some("n1"), Some(1000))]);
    retrieval.add_message_handler(|_: Arc<[ChatMessage]>, _: MessageHandlerContext| async {
        Err::<(), _>(eyre::eyre!("handler broke"))
    });
    let (seen, _) = recording_handler(&retrieval);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;
    next_call(&mut calls).await;

    assert_eq!(*seen.lock().unwrap(), [(vec!["a".to_string()], 1)]);
    let status = retrieval.status();
    assert!(status.is_running);
    assert_eq!(status.current_error, None);
}

#[tokio::test(start_paused = true)]
async fn removed_handler_receives_nothing() {
    let (retrieval, mut calls) = scripted([
        page(&["a"], Some("n1"), Some(1000)),
        page(&["b"], Some("n2"), Some(1000)),
    ]);
    let (seen, id) = recording_handler(&retrieval);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;

    assert!(retrieval.remove_message_handler(id));
    assert!(!retrieval.remove_message_handler(id));
    next_call(&mut calls).await;
    next_call(&mut calls).await;

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(retrieval.status().total_messages, 2);
}

#[tokio::test(start_paused = true)]
async fn record_without_author_is_dropped_and_siblings_delivered() {
    let mut broken = record("broken");
    broken.as_object_mut().unwrap().remove("authorDetails");
    let (retrieval, mut calls) = scripted([Ok(LiveChatPage {
        items: vec![record("a"), broken, record("b")],
        next_page_token: Some("n1".to_string()),
        polling_interval_millis: Some(1000),
    })]);
    let (seen, _) = recording_handler(&retrieval);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;
    next_call(&mut calls).await;

    assert_eq!(
        *seen.lock().unwrap(),
        [(vec!["a".to_string(), "b".to_string()], 2)]
    );
    assert_eq!(retrieval.status().total_messages, 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_loop_stops_it() {
    let (retrieval, mut calls) = scripted([
        page(&["a"], Some("n1"), Some(1000)),
        page(&["b"], Some("n2"), Some(1000)),
    ]);
    retrieval.start(config(5000)).await.unwrap();
    next_call(&mut calls).await;

    drop(retrieval);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(calls.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn instances_are_independent() {
    let (one, mut one_calls) = scripted([page(&["a"], Some("n1"), Some(1000))]);
    let (two, mut two_calls) = scripted([unauthorized()]);
    one.start(config(5000)).await.unwrap();
    assert!(two.start(config(5000)).await.is_err());

    next_call(&mut one_calls).await;
    next_call(&mut two_calls).await;
    assert!(one.status().is_running);
    assert!(!two.status().is_running);
    let next = next_call(&mut one_calls).await;
    assert_eq!(next.page_token.as_deref(), Some("n1"));
}
