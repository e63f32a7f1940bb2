//! Core YouTube API client functionality.

use crate::retrieval::{ChatTransport, ListRequest, LiveChatPage, MessagePart};
use crate::youtube_api::broadcasts::LiveBroadcastListResponse;
use crate::youtube_api::error::provider_error;
use eyre::Context;
use http::Method;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

/// Where the YouTube Data API v3 lives.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Client for the parts of the YouTube Data API v3 that chat retrieval needs.
///
/// Wraps a bearer access token with at least the `youtube.readonly` or `youtube.force-ssl`
/// scope. The token is used as-is; once it expires every request fails with
/// an authentication error and a new token has to be obtained.
#[derive(Clone)]
pub struct YouTubeClient {
    access_token: Arc<str>,
    /// HTTP client for API requests
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl YouTubeClient {
    pub fn new(access_token: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            access_token: Arc::from(access_token.into()),
            client,
            base_url: Arc::from(DEFAULT_BASE_URL),
        }
    }

    /// Points the client at a different API root, such as a local test server.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Arc::from(base_url.trim_end_matches('/'));
        self
    }

    /// Makes an authenticated HTTP request to the YouTube API with common error handling.
    ///
    /// Non-success statuses are turned into a [`crate::retrieval::ProviderError`] carrying the
    /// status and whatever reason and message the error body provides.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        path: &str,
        query_params: &[(&str, &str)],
    ) -> eyre::Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .query(query_params)
            .send()
            .await
            .with_context(|| format!("send {} request to YouTube API: {}", method, url))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let error = provider_error(status_code.as_u16(), &error_text);
            return Err(eyre::Report::new(error))
                .with_context(|| format!("YouTube API {} {} request failed", method, path));
        }

        Ok(response)
    }

    /// Fetches one page of messages from a live chat.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/live/docs/liveChatMessages/list>
    #[instrument(skip(self, request), fields(live_chat_id = request.live_chat_id, page_token = request.page_token))]
    pub async fn list_live_chat_messages(
        &self,
        request: ListRequest<'_>,
    ) -> eyre::Result<LiveChatPage> {
        let parts = MessagePart::join(request.parts);
        let max_results_string = request.max_results.to_string();
        let mut query_params = vec![
            ("liveChatId", request.live_chat_id),
            ("part", parts.as_str()),
            ("maxResults", max_results_string.as_str()),
        ];

        if let Some(token) = request.page_token {
            query_params.push(("pageToken", token));
        }

        let response = self
            .make_authenticated_request(Method::GET, "liveChat/messages", &query_params)
            .await?;

        let page: LiveChatPage = response
            .json()
            .await
            .context("parse live chat response as JSON")?;

        tracing::debug!(
            items = page.items.len(),
            polling_interval_millis = page.polling_interval_millis,
            "fetched live chat page"
        );

        Ok(page)
    }

    /// Finds the live chat of the authenticated user's currently active broadcast.
    ///
    /// Returns `None` if no broadcast is active, or if the active one has no chat.
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/live/docs/liveBroadcasts/list>
    #[instrument(skip(self), ret)]
    pub async fn active_live_chat_id(&self) -> eyre::Result<Option<String>> {
        let query_params = [
            ("part", "id,snippet"),
            ("broadcastStatus", "active"),
            ("broadcastType", "all"),
        ];

        let response = self
            .make_authenticated_request(Method::GET, "liveBroadcasts", &query_params)
            .await?;

        let broadcasts: LiveBroadcastListResponse = response
            .json()
            .await
            .context("parse YouTube API response as JSON")?;

        let found = broadcasts
            .items
            .into_iter()
            .find_map(|broadcast| {
                let chat = broadcast.snippet.live_chat_id?;
                tracing::debug!(
                    broadcast_id = broadcast.id,
                    title = broadcast.snippet.title,
                    "found active broadcast"
                );
                Some(chat)
            });

        Ok(found)
    }
}

impl ChatTransport for YouTubeClient {
    fn list(
        &self,
        request: ListRequest<'_>,
    ) -> impl Future<Output = eyre::Result<LiveChatPage>> + Send {
        self.list_live_chat_messages(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{YouTubeApiErrorCode, classify};
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    const PARTS: [MessagePart; 2] = [MessagePart::Snippet, MessagePart::AuthorDetails];

    fn client(server: &mockito::ServerGuard) -> YouTubeClient {
        YouTubeClient::new("test-token", reqwest::Client::new()).with_base_url(&server.url())
    }

    #[tokio::test]
    async fn lists_chat_page_with_cursor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/liveChat/messages")
            .match_header("authorization", "Bearer test-token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("liveChatId".into(), "chat-1".into()),
                Matcher::UrlEncoded("part".into(), "snippet,authorDetails".into()),
                Matcher::UrlEncoded("maxResults".into(), "200".into()),
                Matcher::UrlEncoded("pageToken".into(), "cursor-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "kind": "youtube#liveChatMessageListResponse",
                    "pollingIntervalMillis": 3000,
                    "nextPageToken": "cursor-2",
                    "items": [{"id": "m1"}, {"id": "m2"}]
                }"#,
            )
            .create_async()
            .await;

        let page = client(&server)
            .list(ListRequest {
                live_chat_id: "chat-1",
                page_token: Some("cursor-1"),
                max_results: 200,
                parts: &PARTS,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_page_token.as_deref(), Some("cursor-2"));
        assert_eq!(page.polling_interval_millis, Some(3000));
    }

    #[tokio::test]
    async fn error_body_classifies_as_quota() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/liveChat/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error": {"code": 403, "message": "quota used up", "errors": [{"reason": "quotaExceeded"}]}}"#,
            )
            .create_async()
            .await;

        let err = client(&server)
            .list(ListRequest {
                live_chat_id: "chat-1",
                page_token: None,
                max_results: 10,
                parts: &PARTS,
            })
            .await
            .unwrap_err();

        let info = classify(&err);
        assert_eq!(info.code, YouTubeApiErrorCode::QuotaExceeded);
        assert_eq!(info.message, "quota used up");
        assert!(info.retryable);
    }

    #[tokio::test]
    async fn unauthenticated_request_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/liveChat/messages")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let err = client(&server)
            .list(ListRequest {
                live_chat_id: "chat-1",
                page_token: None,
                max_results: 10,
                parts: &PARTS,
            })
            .await
            .unwrap_err();

        let info = classify(&err);
        assert_eq!(info.code, YouTubeApiErrorCode::AuthenticationError);
        assert_eq!(info.message, "unauthorized");
        assert!(!info.retryable);
    }

    #[tokio::test]
    async fn finds_active_chat() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/liveBroadcasts")
            .match_query(Matcher::UrlEncoded("broadcastStatus".into(), "active".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"items": [
                    {"id": "b0", "snippet": {"title": "chatless", "publishedAt": "2024-05-01T10:00:00Z"}},
                    {"id": "b1", "snippet": {"title": "live", "publishedAt": "2024-05-01T10:00:00Z", "liveChatId": "chat-9"}}
                ]}"#,
            )
            .create_async()
            .await;

        let chat = client(&server).active_live_chat_id().await.unwrap();
        mock.assert_async().await;
        assert_eq!(chat.as_deref(), Some("chat-9"));
    }

    #[tokio::test]
    async fn no_active_broadcast_means_no_chat() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/liveBroadcasts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items": []}"#)
            .create_async()
            .await;

        assert_eq!(client(&server).active_live_chat_id().await.unwrap(), None);
    }
}
