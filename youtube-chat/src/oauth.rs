//! OAuth 2.0 authorization for YouTube API access.
//!
//! Implements the installed-application flow: the user's browser is sent to Google's consent
//! page and redirected back to a short-lived server on the loopback interface, which hands the
//! authorization code over for exchange.

use eyre::Context;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope,
    TokenUrl, reqwest,
};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Google OAuth2 token endpoint URL used to exchange authorization codes
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Grants read access to live chat, which is all retrieval needs.
pub const YOUTUBE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";
/// Path on the loopback server that Google redirects back to.
pub const CALLBACK_PATH: &str = "/oauth2callback";

const OAUTH_DONE_HTML: &str = include_str!("../oauth_success.html");

/// The application credentials section of a Google `client_secret.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    #[serde(default)]
    installed: Option<ClientSecret>,
    #[serde(default)]
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Parses a downloaded `client_secret.json`, which nests the credentials under either
    /// `installed` or `web`.
    pub fn from_json(json: &str) -> eyre::Result<Self> {
        let file: ClientSecretFile =
            serde_json::from_str(json).context("parse client secret JSON")?;
        file.installed
            .or(file.web)
            .ok_or_else(|| eyre::eyre!("client secret has neither an `installed` nor a `web` section"))
    }

    pub async fn from_file(path: &Path) -> eyre::Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read client secret from {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("load {}", path.display()))
    }
}

/// Manages the OAuth 2.0 authorization flow for YouTube API access.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    secret: ClientSecret,
    /// Loopback port for the redirect server. 0 picks a free one.
    port: u16,
}

impl OAuthManager {
    pub fn new(secret: ClientSecret) -> Self {
        Self { secret, port: 0 }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn client(
        &self,
        redirect_url: RedirectUrl,
    ) -> eyre::Result<
        BasicClient<
            oauth2::EndpointSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointNotSet,
            oauth2::EndpointSet,
        >,
    > {
        let auth_url = AuthUrl::new(
            self.secret
                .auth_uri
                .clone()
                .unwrap_or_else(|| AUTH_URL.to_string()),
        )
        .context("invalid authorization endpoint URL")?;
        let token_url = TokenUrl::new(
            self.secret
                .token_uri
                .clone()
                .unwrap_or_else(|| TOKEN_URL.to_string()),
        )
        .context("invalid token endpoint URL")?;

        Ok(BasicClient::new(ClientId::new(self.secret.client_id.clone()))
            .set_client_secret(oauth2::ClientSecret::new(self.secret.client_secret.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url))
    }

    /// Performs a complete OAuth 2.0 authorization flow to obtain a new access token.
    ///
    /// This method initiates the full OAuth flow, including:
    /// 1. Setting up a local HTTP server to receive the authorization callback
    /// 2. Opening the user's browser for authorization
    /// 3. Exchanging the authorization code for an access token
    ///
    /// Offline access is requested so that the response includes a refresh token.
    pub async fn authenticate(&self) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = self
            .setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let client = self.client(redirect_url)?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf.clone())
            .add_scope(Scope::new(YOUTUBE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("include_granted_scopes", "true")
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_ref()) {
            // headless machines can still complete the flow by hand
            tracing::warn!(error = %e, "could not open browser; visit the URL above");
        }
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        let http_client = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")?;
        let token_result = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&http_client)
            .await
            .context("exchange authorization code with access token")?;

        tracing::info!("authorization complete");
        Ok(token_result)
    }

    /// Sets up a local HTTP server to receive the OAuth authorization callback.
    ///
    /// The server answers a single connection. A callback whose `state` does not match `csrf`,
    /// or that reports a denial, fails the flow.
    ///
    /// Returns the redirect URL to use in the OAuth flow, and a future that resolves to the
    /// authorization code when the callback is received.
    async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> eyre::Result<(
        RedirectUrl,
        impl Future<Output = eyre::Result<AuthorizationCode>>,
    )> {
        let socket = tokio::net::TcpListener::bind(("127.0.0.1", self.port))
            .await
            .with_context(|| format!("bind to localhost:{}", self.port))?;
        let addr = socket.local_addr().context("get local address")?;
        let url = RedirectUrl::new(format!(
            "http://{}:{}{}",
            addr.ip(),
            addr.port(),
            CALLBACK_PATH
        ))
        .context("construct redirect url")?;
        tracing::debug!(%addr, "listening for OAuth redirect");

        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let r = async move {
                let (conn, _) = socket.accept().await.context("accept")?;
                let conn = hyper_util::rt::TokioIo::new(conn);
                let (got, mut gotten) = tokio::sync::mpsc::channel(1);
                let service = service_fn(move |req: Request<body::Incoming>| {
                    let csrf = csrf.clone();
                    let got = got.clone();
                    async move {
                        if req.uri().path() != CALLBACK_PATH {
                            let mut not_found = Response::new(Full::<Bytes>::from("not found"));
                            *not_found.status_mut() = StatusCode::NOT_FOUND;
                            return Ok(not_found);
                        }
                        let mut presented_state = None;
                        let mut presented_code = None;
                        let mut presented_error = None;
                        for (k, v) in
                            form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                        {
                            match &*k {
                                "state" => presented_state = Some(v),
                                "code" => presented_code = Some(v),
                                "error" => presented_error = Some(v),
                                _ => {}
                            }
                        }
                        if presented_state.as_deref() != Some(csrf.secret().as_str()) {
                            return Err("invalid csrf token");
                        }
                        if let Some(error) = presented_error {
                            tracing::warn!(%error, "user did not grant access");
                            return Err("authorization was denied");
                        }
                        let Some(code) = presented_code else {
                            return Err("no authorization code found");
                        };
                        let code = AuthorizationCode::new(code.into_owned());
                        got.send(code)
                            .await
                            .map_err(|_| "redirect server already shut down")?;
                        Ok(Response::new(Full::<Bytes>::from(OAUTH_DONE_HTML)))
                    }
                });
                let mut serve = std::pin::pin!(
                    hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
                );

                tokio::select! {
                    exit = &mut serve => {
                        if let Err(e) = exit {
                            Err(e).context("redirect server got bad request")
                        } else {
                            eyre::bail!("redirect server exit prematurely");
                        }
                    }
                    code = gotten.recv() => {
                        serve
                            .as_mut()
                            .graceful_shutdown();
                        let code = code.ok_or_else(|| eyre::eyre!("redirect handler went away"))?;
                        // let the success page reach the browser
                        let _ = serve.await;
                        Ok(code)
                    }
                }
            };
            let _ = tx.send(r.await);
        });
        Ok((url, async move {
            rx.await.context("redirect future dropped prematurely")?
        }))
    }
}
