//! OAuth 2.0 management for Twitch API authentication.
//!
//! Two interactive ways of obtaining a user access token are supported, selected through
//! [`AuthStrategy`]:
//!
//! - the device-code grant, where the user types a short code into a Twitch page on any device;
//! - the authorization-code grant, where the user's browser is redirected back to a listener on
//!   localhost carrying the authorization code.
//!
//! Both end in a [`TokenGrant`]. Refreshing a grant is the same for both strategies.

use eyre::Context;
use http_body_util::Full;
use hyper::body::{self, Bytes};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use oauth2::basic::BasicClient;
use oauth2::url::Url;
use oauth2::{
    AccessToken, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    RefreshToken, Scope,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::Instant;

const AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const DEVICE_URL: &str = "https://id.twitch.tv/oauth2/device";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Scopes needed to read followers, subscribers and the bits leaderboard of the broadcaster.
pub const SCOPES: &[&str] = &[
    "moderator:read:followers",
    "channel:read:subscriptions",
    "bits:read",
];

/// Port the authorization-code listener binds to unless configured otherwise.
pub const DEFAULT_REDIRECT_PORT: u16 = 6789;

/// How often the token endpoint is polled while the user completes the device-code flow.
const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Added to the device polling interval whenever the server asks us to slow down.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

const OAUTH_DONE_HTML: &str = "<!DOCTYPE html><html><body>\
    <h1>streamlabels is authorized</h1>\
    <p>You can close this window.</p>\
    </body></html>";

const OAUTH_DENIED_HTML: &str = "<!DOCTYPE html><html><body>\
    <h1>streamlabels was not authorized</h1>\
    <p>You can close this window.</p>\
    </body></html>";

/// A successful response from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    /// Lifetime of the access token in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Scopes the user actually granted.
    #[serde(default)]
    pub scope: Vec<String>,
}

impl TokenGrant {
    /// Requested [`SCOPES`] the grant does not cover.
    ///
    /// A grant that reports no scopes at all is taken to cover everything.
    pub fn missing_scopes(&self) -> Vec<&'static str> {
        if self.scope.is_empty() {
            return Vec::new();
        }
        SCOPES
            .iter()
            .copied()
            .filter(|wanted| !self.scope.iter().any(|granted| granted == wanted))
            .collect()
    }
}

/// How a user access token is obtained when none is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStrategy {
    /// Print a user code and poll until the user has entered it on Twitch.
    DeviceCode,
    /// Send the user's browser to Twitch and receive the code on `http://localhost:<port>/callback`.
    AuthorizationCode { port: u16 },
}

/// Anything able to hand out and renew user access tokens.
pub trait Authenticator: Send + Sync {
    /// Obtains a brand new token, involving the user.
    fn acquire(&self) -> impl Future<Output = eyre::Result<TokenGrant>> + Send;

    /// Exchanges a refresh token for a new token pair.
    fn refresh(
        &self,
        refresh_token: &RefreshToken,
    ) -> impl Future<Output = eyre::Result<TokenGrant>> + Send;
}

/// Manages OAuth 2.0 flows against the Twitch identity service.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    strategy: AuthStrategy,
    http: reqwest::Client,
}

impl OAuthManager {
    pub fn new(
        client_id: ClientId,
        client_secret: Option<ClientSecret>,
        strategy: AuthStrategy,
    ) -> eyre::Result<Self> {
        let http = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build HTTP client for OAuth")?;
        Ok(Self {
            client_id,
            client_secret,
            strategy,
            http,
        })
    }

    /// Builds the URL the user must visit to grant access, redirecting to `redirect_url`.
    fn authorize_url(&self, redirect_url: &RedirectUrl, csrf: CsrfToken) -> eyre::Result<Url> {
        let auth_url =
            AuthUrl::new(AUTHORIZE_URL.to_string()).context("parse authorization endpoint")?;
        let client = BasicClient::new(self.client_id.clone())
            .set_auth_uri(auth_url)
            .set_redirect_uri(redirect_url.clone());
        let (url, _csrf) = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf)
            .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
            .url();
        Ok(url)
    }

    /// Runs the authorization-code flow with a listener on localhost.
    ///
    /// Blocks until Twitch redirects the user back, which may take arbitrarily long. A redirect
    /// carrying no code (the user declined) is an error.
    async fn authenticate_with_redirect(&self, port: u16) -> eyre::Result<TokenGrant> {
        if self.client_secret.is_none() {
            eyre::bail!("the authorization-code flow needs a client_secret");
        }

        let listeners = bind_loopback(port).await?;
        let redirect_url = RedirectUrl::new(format!("http://localhost:{port}/callback"))
            .context("construct redirect url")?;
        let csrf = CsrfToken::new_random();
        let auth_url = self.authorize_url(&redirect_url, csrf.clone())?;

        println!("Authorization URL: {auth_url}");
        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_str()) {
            tracing::debug!(error = %e, "could not open a browser, URL must be visited by hand");
        }

        let code = await_redirect(listeners, csrf)
            .await
            .context("await user authorization code")?;
        self.exchange_code(code, &redirect_url).await
    }

    async fn exchange_code(
        &self,
        code: AuthorizationCode,
        redirect_url: &RedirectUrl,
    ) -> eyre::Result<TokenGrant> {
        let Some(secret) = &self.client_secret else {
            eyre::bail!("the authorization-code flow needs a client_secret");
        };
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret.secret().as_str()),
            ("code", code.secret().as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_url.as_str()),
        ];
        self.token_request(&params)
            .await
            .context("exchange authorization code for access token")
    }

    /// Runs the device-code flow: print a code, then poll until the user has entered it.
    async fn authenticate_with_device_code(&self) -> eyre::Result<TokenGrant> {
        let device = self
            .request_device_code()
            .await
            .context("request device code")?;

        println!(
            "To authorize streamlabels, open {} and enter the code {}",
            device.verification_uri, device.user_code
        );
        tracing::info!(
            url = %device.verification_uri,
            code = %device.user_code,
            expires_in = device.expires_in,
            "waiting for the user to enter the device code"
        );

        let deadline = Instant::now() + Duration::from_secs(device.expires_in);
        let scopes = SCOPES.join(" ");
        poll_device_grant(
            || self.poll_device_token(&device.device_code, &scopes),
            DEVICE_POLL_INTERVAL,
            deadline,
        )
        .await
    }

    async fn request_device_code(&self) -> eyre::Result<DeviceCodeResponse> {
        let scopes = SCOPES.join(" ");
        let params = [
            ("client_id", self.client_id.as_str()),
            ("scopes", scopes.as_str()),
        ];
        let response = self
            .http
            .post(DEVICE_URL)
            .form(&params)
            .send()
            .await
            .context("send device code request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            eyre::bail!(
                "device code request failed with status {}: {}",
                status,
                TokenError::parse(&body).describe(&body)
            );
        }

        response
            .json()
            .await
            .context("parse device code response as JSON")
    }

    async fn poll_device_token(&self, device_code: &str, scopes: &str) -> eyre::Result<DevicePoll> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("scopes", scopes),
            ("device_code", device_code),
            ("grant_type", DEVICE_CODE_GRANT),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.secret().as_str()));
        }

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .context("send device token request")?;
        let status = response.status();
        let body = response
            .text()
            .await
            .context("read device token response")?;
        classify_device_response(status, &body)
    }

    /// Posts `params` to the token endpoint and parses the grant. Any non-2xx is an error.
    async fn token_request(&self, params: &[(&str, &str)]) -> eyre::Result<TokenGrant> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(params)
            .send()
            .await
            .context("send token request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            eyre::bail!(
                "token request failed with status {}: {}",
                status,
                TokenError::parse(&body).describe(&body)
            );
        }

        response
            .json()
            .await
            .context("parse token response as JSON")
    }
}

impl Authenticator for OAuthManager {
    async fn acquire(&self) -> eyre::Result<TokenGrant> {
        match self.strategy {
            AuthStrategy::DeviceCode => self.authenticate_with_device_code().await,
            AuthStrategy::AuthorizationCode { port } => {
                self.authenticate_with_redirect(port).await
            }
        }
    }

    async fn refresh(&self, refresh_token: &RefreshToken) -> eyre::Result<TokenGrant> {
        tracing::debug!("attempting to refresh OAuth token");
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.secret().as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.secret().as_str()));
        }
        let grant = self
            .token_request(&params)
            .await
            .context("exchange refresh token")?;
        tracing::debug!("successfully refreshed OAuth token");
        Ok(grant)
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    /// Seconds until `device_code` becomes unusable.
    expires_in: u64,
}

/// Error body of the Twitch identity endpoints.
///
/// Twitch reports `{"status": 400, "message": "..."}` while RFC 6749 servers report
/// `{"error": "...", "error_description": "..."}`; both shapes are accepted.
#[derive(Debug, Default, Deserialize)]
struct TokenError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenError {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn is(&self, code: &str) -> bool {
        self.message.as_deref() == Some(code) || self.error.as_deref() == Some(code)
    }

    fn describe(&self, raw: &str) -> String {
        match (&self.error, &self.error_description, &self.message) {
            (Some(error), Some(description), _) => format!("{error}: {description}"),
            (Some(error), None, _) => error.clone(),
            (None, _, Some(message)) => message.clone(),
            (None, _, None) => raw.to_string(),
        }
    }
}

/// Result of one poll of the token endpoint during the device-code flow.
#[derive(Debug)]
enum DevicePoll {
    Granted(TokenGrant),
    Pending,
    SlowDown,
}

fn classify_device_response(status: StatusCode, body: &str) -> eyre::Result<DevicePoll> {
    if status.is_success() {
        let grant = serde_json::from_str(body).context("parse device token response as JSON")?;
        return Ok(DevicePoll::Granted(grant));
    }

    let error = TokenError::parse(body);
    if error.is("authorization_pending") {
        Ok(DevicePoll::Pending)
    } else if error.is("slow_down") {
        Ok(DevicePoll::SlowDown)
    } else {
        eyre::bail!(
            "device authorization failed with status {}: {}",
            status,
            error.describe(body)
        )
    }
}

/// Calls `attempt` every `interval` until it yields a grant, fails, or `deadline` passes.
async fn poll_device_grant<F, Fut>(
    mut attempt: F,
    mut interval: Duration,
    deadline: Instant,
) -> eyre::Result<TokenGrant>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<DevicePoll>>,
{
    loop {
        tokio::time::sleep(interval).await;
        if Instant::now() >= deadline {
            eyre::bail!("device code expired before the user authorized it");
        }

        match attempt().await? {
            DevicePoll::Granted(grant) => return Ok(grant),
            DevicePoll::Pending => {
                tracing::trace!("device authorization still pending");
            }
            DevicePoll::SlowDown => {
                interval += SLOW_DOWN_STEP;
                tracing::debug!(?interval, "asked to slow down device polling");
            }
        }
    }
}

/// What a request to the redirect listener told us.
#[derive(Debug)]
enum Callback {
    Code(AuthorizationCode),
    Denied(String),
    /// The `state` parameter did not match, so the request is not ours to act on.
    ForeignState,
}

fn parse_callback(query: &str, csrf: &CsrfToken) -> Callback {
    let mut presented_state = None;
    let mut presented_code = None;
    let mut error = None;
    let mut error_description = None;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match &*k {
            "state" => presented_state = Some(v),
            "code" => presented_code = Some(v),
            "error" => error = Some(v),
            "error_description" => error_description = Some(v),
            _ => {}
        }
    }

    if presented_state.as_deref() != Some(csrf.secret().as_str()) {
        return Callback::ForeignState;
    }
    match presented_code {
        Some(code) if !code.is_empty() => Callback::Code(AuthorizationCode::new(code.into_owned())),
        _ => Callback::Denied(match (error, error_description) {
            (Some(e), Some(d)) => format!("{e}: {d}"),
            (Some(e), None) => e.into_owned(),
            (None, _) => "no authorization code in redirect".to_string(),
        }),
    }
}

fn html(status: StatusCode, page: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::from(page));
    *response.status_mut() = status;
    response
}

/// Binds `port` on the IPv4 loopback address and, where available, the IPv6 one.
///
/// `localhost` in the redirect URI may resolve to either, depending on the host.
async fn bind_loopback(port: u16) -> eyre::Result<Vec<TcpListener>> {
    let v4 = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .with_context(|| format!("bind redirect listener to 127.0.0.1:{port}"))?;
    let mut listeners = vec![v4];
    match TcpListener::bind((Ipv6Addr::LOCALHOST, port)).await {
        Ok(v6) => listeners.push(v6),
        Err(e) => tracing::debug!(error = %e, "no IPv6 loopback, redirect listener uses IPv4 only"),
    }
    Ok(listeners)
}

type RedirectOutcome = Result<AuthorizationCode, String>;

/// Serves `listeners` until a redirect for `csrf` arrives, then stops accepting connections.
async fn await_redirect(
    listeners: Vec<TcpListener>,
    csrf: CsrfToken,
) -> eyre::Result<AuthorizationCode> {
    let (got, mut gotten) = tokio::sync::mpsc::channel::<RedirectOutcome>(1);
    // dropping the set on return stops all acceptors
    let mut acceptors = JoinSet::new();
    for listener in listeners {
        acceptors.spawn(serve_redirects(listener, csrf.clone(), got.clone()));
    }
    drop(got);

    tokio::select! {
        outcome = gotten.recv() => {
            let outcome = outcome.ok_or_else(|| eyre::eyre!("redirect listener stopped"))?;
            outcome.map_err(|reason| eyre::eyre!("user did not authorize access: {reason}"))
        }
        Some(stopped) = acceptors.join_next() => match stopped {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => eyre::bail!("redirect listener stopped"),
            Err(e) => Err(e).context("redirect listener panicked"),
        },
    }
}

/// Accepts connections on `listener` forever, reporting callbacks for `csrf` through `got`.
async fn serve_redirects(
    listener: TcpListener,
    csrf: CsrfToken,
    got: tokio::sync::mpsc::Sender<RedirectOutcome>,
) -> eyre::Result<()> {
    loop {
        let (conn, peer) = listener.accept().await.context("accept")?;
        let conn = hyper_util::rt::TokioIo::new(conn);
        let csrf = csrf.clone();
        let got = got.clone();
        let service = service_fn(move |req: Request<body::Incoming>| {
            let csrf = csrf.clone();
            let got = got.clone();
            async move {
                if req.uri().path() != "/callback" {
                    return Ok::<_, Infallible>(html(StatusCode::NOT_FOUND, "not found"));
                }
                let response = match parse_callback(req.uri().query().unwrap_or(""), &csrf) {
                    Callback::ForeignState => {
                        tracing::warn!("redirect carried an unexpected state parameter");
                        html(StatusCode::BAD_REQUEST, "invalid state")
                    }
                    Callback::Code(code) => {
                        let _ = got.try_send(Ok(code));
                        html(StatusCode::OK, OAUTH_DONE_HTML)
                    }
                    Callback::Denied(reason) => {
                        let _ = got.try_send(Err(reason));
                        html(StatusCode::OK, OAUTH_DENIED_HTML)
                    }
                };
                Ok(response)
            }
        });
        tokio::spawn(async move {
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(conn, service)
                .await
            {
                tracing::debug!(%peer, error = %e, "redirect connection failed");
            }
        });
    }
}
