use std::error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backoff::{ErrorBackoffConfig, ErrorBackoffHandler};
use crate::classify::{classify, ClassifiedToken, ClassifyError};
use crate::clock::{Clock, DurationSecs, System};
use crate::grants::{dto, GrantError, GrantKind, IssuedTokens, TokenEndpoint};
use crate::metrics::TokenMetrics;
use crate::token::{remaining, ClaimTypeError, TokenInfo, TokenParseError};

/// The token endpoint used when none is configured explicitly
pub const DEFAULT_TOKEN_URL: &str =
    "https://sso.sesamo.dev/auth/realms/sesamo/protocol/openid-connect/token";

/// The margin applied by [`TokenManager::tokens`]
const DEFAULT_MARGIN: DurationSecs = DurationSecs(60);

/// Owns the current access/refresh token pair and keeps it usable
///
/// The manager caches the tokens it has been given or has obtained, decides
/// on every call whether they are still good for the requested margin, and
/// picks the appropriate grant to renew them when they are not. Renewals
/// for one manager never overlap: the whole decide-and-refresh sequence
/// runs under a single lock, so concurrent callers blocked on a refresh
/// observe its result rather than the stale cache.
///
/// Cloning the manager is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: TokenEndpoint,
    client_id: Option<String>,
    client_secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
    scope: String,
    backoff: ErrorBackoffConfig,
    metrics: Option<TokenMetrics>,
    state: Mutex<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    access: Option<TokenInfo>,
    refresh: Option<TokenInfo>,
    pull_secret: Option<TokenInfo>,
}

/// The access and refresh tokens returned to a caller
///
/// Either field may be empty when the corresponding token does not exist;
/// a pull secret, for example, comes with no refresh token at all.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// The access token to put on the wire
    pub access: String,
    /// The refresh token, when one is held
    pub refresh: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"***TOKEN***")
            .field("refresh", &"***TOKEN***")
            .finish()
    }
}

impl TokenManager {
    /// Starts building a new token manager
    pub fn builder() -> TokenManagerBuilder {
        TokenManagerBuilder::default()
    }

    /// Returns tokens valid for at least one more minute
    ///
    /// See [`tokens_with_margin`][Self::tokens_with_margin].
    pub async fn tokens(&self) -> Result<TokenPair, TokensError> {
        self.tokens_with_margin(DEFAULT_MARGIN).await
    }

    /// Returns tokens valid for at least `min_remaining`
    ///
    /// The cached pair is returned as-is when the access token is good for
    /// the margin. Otherwise a renewal is attempted, preferring client
    /// credentials, then the refresh token, then the resource-owner
    /// password. Transient endpoint failures are retried with exponential
    /// backoff for a bounded total time; dropping the returned future
    /// cancels the attempt.
    pub async fn tokens_with_margin(
        &self,
        min_remaining: DurationSecs,
    ) -> Result<TokenPair, TokensError> {
        let mut state = self.inner.state.lock().await;
        let started = Instant::now();
        let mut backoff = ErrorBackoffHandler::new(self.inner.backoff);

        loop {
            match self.attempt(&mut state, min_remaining).await {
                Ok(pair) => return Ok(pair),
                Err(err) if err.is_transient() => {
                    let delay = backoff.error();
                    if started.elapsed() + delay >= self.inner.backoff.total_cap() {
                        tracing::warn!(
                            error = (&err as &dyn error::Error),
                            "token refresh retries exhausted"
                        );
                        return Err(err);
                    }
                    tracing::warn!(
                        error = (&err as &dyn error::Error),
                        delay_ms = delay.as_millis() as u64,
                        "transient error requesting tokens, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        state: &mut TokenState,
        min_remaining: DurationSecs,
    ) -> Result<TokenPair, TokensError> {
        // Pull secrets are used verbatim; no expiry logic applies to them.
        if let Some(pull_secret) = &state.pull_secret {
            return Ok(TokenPair {
                access: pull_secret.text().to_owned(),
                refresh: String::new(),
            });
        }

        let now = System.now();
        let access_left = remaining(state.access.as_ref(), now)?;
        let refresh_left = remaining(state.refresh.as_ref(), now)?;

        if state.access.is_some() && access_left.lasts_at_least(min_remaining) {
            return Ok(Self::pair(state));
        }

        let inner = &*self.inner;

        // Client credentials win even over a live refresh token. Old SSO
        // servers hand out refresh tokens that only the original client can
        // redeem, so a client holding its own credentials must keep using
        // them. Deprecated behavior, deliberately preserved.
        if let (Some(id), Some(secret)) = (&inner.client_id, &inner.client_secret) {
            let form = dto::ClientCredentialsRequest::new(id, &inner.scope);
            let issued = self
                .run_grant(
                    GrantKind::ClientCredentials,
                    &form,
                    Some((id.as_str(), secret.as_str())),
                )
                .await?;
            Self::store(state, issued)?;
            return Ok(Self::pair(state));
        }

        let refresh_text = state.refresh.as_ref().map(|t| t.text().to_owned());

        if let Some(text) = &refresh_text {
            if refresh_left.lasts_at_least(min_remaining) {
                return self.refresh_grant(state, text).await;
            }
        }

        if let (Some(username), Some(password)) = (&inner.username, &inner.password) {
            let client_id = inner.client_id.as_deref().unwrap_or_default();
            let form = dto::PasswordRequest::new(client_id, username, password, &inner.scope);
            let issued = self.run_grant(GrantKind::Password, &form, None).await?;
            Self::store(state, issued)?;
            return Ok(Self::pair(state));
        }

        if let Some(text) = &refresh_text {
            if refresh_left.still_valid() {
                tracing::warn!(
                    "refresh token expires in less than the requested margin, \
                     attempting to use it anyway"
                );
                return self.refresh_grant(state, text).await;
            }
        }

        if state.access.is_some() && access_left.still_valid() {
            tracing::warn!(
                "access token expires in less than the requested margin and \
                 no credentials are available to renew it, returning it anyway"
            );
            return Ok(Self::pair(state));
        }

        Err(TokensError::NoUsableCredentials)
    }

    async fn refresh_grant(
        &self,
        state: &mut TokenState,
        refresh_token: &str,
    ) -> Result<TokenPair, TokensError> {
        let client_id = self.inner.client_id.as_deref().unwrap_or_default();
        let form = dto::RefreshTokenRequest::new(client_id, refresh_token);
        let issued = self.run_grant(GrantKind::RefreshToken, &form, None).await?;
        Self::store(state, issued)?;
        Ok(Self::pair(state))
    }

    async fn run_grant<F: Serialize>(
        &self,
        grant: GrantKind,
        form: &F,
        basic: Option<(&str, &str)>,
    ) -> Result<IssuedTokens, GrantError> {
        let started = Instant::now();
        let result = self.inner.endpoint.exchange(grant, form, basic).await;
        if let Some(metrics) = &self.inner.metrics {
            let label = if result.is_ok() { "ok" } else { "error" };
            metrics.observe(grant.as_str(), label, started.elapsed().as_secs_f64());
        }
        result
    }

    fn store(state: &mut TokenState, issued: IssuedTokens) -> Result<(), TokensError> {
        state.access = Some(
            TokenInfo::parsed(issued.access_token).map_err(TokensError::AccessTokenParse)?,
        );
        // Per RFC 6749 §6, a response without a refresh token does not
        // invalidate the one already held.
        if let Some(refresh) = issued.refresh_token {
            state.refresh = Some(TokenInfo::lenient(refresh));
        }
        Ok(())
    }

    fn pair(state: &TokenState) -> TokenPair {
        TokenPair {
            access: state
                .access
                .as_ref()
                .map(|t| t.text().to_owned())
                .unwrap_or_default(),
            refresh: state
                .refresh
                .as_ref()
                .map(|t| t.text().to_owned())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("endpoint", &self.inner.endpoint)
            .field("client_id", &self.inner.client_id)
            .field("scope", &self.inner.scope)
            .finish()
    }
}

/// An error while obtaining tokens from a [`TokenManager`]
#[derive(Debug, Error)]
pub enum TokensError {
    /// The exchange with the token endpoint failed
    #[error("error exchanging credentials for tokens")]
    Grant(#[from] GrantError),
    /// The endpoint issued an access token that would not decode
    #[error("access token issued by the token endpoint can't be decoded")]
    AccessTokenParse(#[source] TokenParseError),
    /// A cached token carries a claim of the wrong type
    #[error(transparent)]
    WrongClaimType(#[from] ClaimTypeError),
    /// Nothing left to try
    #[error(
        "access and refresh tokens are unavailable or expired, and no \
         credentials are configured to request new ones"
    )]
    NoUsableCredentials,
}

impl TokensError {
    fn is_transient(&self) -> bool {
        match self {
            TokensError::Grant(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Builder for a [`TokenManager`]
pub struct TokenManagerBuilder {
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tokens: Vec<String>,
    scopes: Vec<String>,
    agent: Option<String>,
    trusted_cas: Vec<reqwest::Certificate>,
    insecure: bool,
    backoff: ErrorBackoffConfig,
    metrics: Option<(String, prometheus::Registry)>,
}

impl Default for TokenManagerBuilder {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_owned(),
            client_id: None,
            client_secret: None,
            username: None,
            password: None,
            tokens: Vec::new(),
            scopes: Vec::new(),
            agent: None,
            trusted_cas: Vec::new(),
            insecure: false,
            backoff: ErrorBackoffConfig::default(),
            metrics: None,
        }
    }
}

impl TokenManagerBuilder {
    /// Sets the URL of the token endpoint
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Sets the OAuth2 client identifier
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets the OAuth2 client secret
    ///
    /// Configuring both a client identifier and a secret enables the
    /// client-credentials grant, which then takes precedence over every
    /// other renewal strategy.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(client_secret.into());
        self
    }

    /// Sets the resource-owner user name for the password grant
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the resource-owner password for the password grant
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Supplies a previously issued token
    ///
    /// May be called multiple times. Tokens are sorted into access,
    /// refresh, and pull-secret slots by their own claims where possible
    /// and by position otherwise.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.tokens.push(token.into());
        self
    }

    /// Adds a scope to request with each grant
    ///
    /// Defaults to `openid` when no scope is configured.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    /// Overrides the `User-Agent` sent to the token endpoint
    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Adds a trusted certificate authority for the token endpoint
    pub fn trusted_ca(mut self, certificate: reqwest::Certificate) -> Self {
        self.trusted_cas.push(certificate);
        self
    }

    /// Disables certificate verification for the token endpoint
    ///
    /// Intended for development against self-signed endpoints only.
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Overrides the retry backoff configuration
    pub fn backoff(mut self, backoff: ErrorBackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enables metrics under the given subsystem in `registry`
    pub fn metrics(mut self, subsystem: impl Into<String>, registry: &prometheus::Registry) -> Self {
        self.metrics = Some((subsystem.into(), registry.clone()));
        self
    }

    /// Builds the manager, classifying any bootstrap tokens
    pub fn build(self) -> Result<TokenManager, TokenManagerBuilderError> {
        let token_url = reqwest::Url::parse(&self.token_url).map_err(|err| {
            TokenManagerBuilderError::InvalidTokenUrl {
                url: self.token_url.clone(),
                reason: err.to_string(),
            }
        })?;

        let agent = self
            .agent
            .unwrap_or_else(|| concat!("sesamo_tokens/", env!("CARGO_PKG_VERSION")).to_owned());
        let mut client = reqwest::Client::builder().user_agent(agent);
        for certificate in self.trusted_cas {
            client = client.add_root_certificate(certificate);
        }
        if self.insecure {
            client = client.danger_accept_invalid_certs(true);
        }
        let client = client
            .build()
            .map_err(TokenManagerBuilderError::ClientBuild)?;

        let mut state = TokenState::default();
        for (position, raw) in self.tokens.iter().enumerate() {
            match classify(raw, position)? {
                ClassifiedToken::Access(token) => state.access = Some(token),
                ClassifiedToken::Refresh(token) => state.refresh = Some(token),
                ClassifiedToken::PullSecret(token) => state.pull_secret = Some(token),
            }
        }

        let scope = if self.scopes.is_empty() {
            "openid".to_owned()
        } else {
            self.scopes.join(" ")
        };

        let metrics = self
            .metrics
            .map(|(subsystem, registry)| TokenMetrics::new(&subsystem, &registry));

        Ok(TokenManager {
            inner: Arc::new(Inner {
                endpoint: TokenEndpoint::new(client, token_url),
                client_id: non_empty(self.client_id),
                client_secret: non_empty(self.client_secret),
                username: non_empty(self.username),
                password: non_empty(self.password),
                scope,
                backoff: self.backoff,
                metrics,
                state: Mutex::new(state),
            }),
        })
    }
}

impl fmt::Debug for TokenManagerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenManagerBuilder")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("tokens", &format_args!("[{} tokens]", self.tokens.len()))
            .field("scopes", &self.scopes)
            .field("insecure", &self.insecure)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// An error while constructing a [`TokenManager`]
#[derive(Debug, Error)]
pub enum TokenManagerBuilderError {
    /// The configured token URL does not parse
    #[error("invalid token URL `{url}`: {reason}")]
    InvalidTokenUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },
    /// The HTTP client could not be constructed
    #[error("unable to build HTTP client for the token endpoint")]
    ClientBuild(#[source] reqwest::Error),
    /// A bootstrap token could not be classified
    #[error("unable to classify bootstrap token")]
    Classify(#[from] ClassifyError),
}

#[cfg(test)]
mod tests {
    use std::future::IntoFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::routing::post;
    use axum::Router;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use http::header::CONTENT_TYPE;
    use http::{HeaderMap, StatusCode};

    use super::*;

    fn fake_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.")
    }

    fn now() -> i64 {
        crate::clock::System.now().0
    }

    type Responder =
        Arc<dyn Fn(usize) -> (StatusCode, &'static str, String) + Send + Sync>;

    #[derive(Clone)]
    struct Recorded {
        authorization: Option<String>,
        form: String,
    }

    struct MockEndpoint {
        url: String,
        hits: Arc<AtomicUsize>,
        requests: Arc<std::sync::Mutex<Vec<Recorded>>>,
    }

    impl MockEndpoint {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn spawn_endpoint(delay: Duration, responder: Responder) -> MockEndpoint {
        let hits = Arc::new(AtomicUsize::new(0));
        let requests: Arc<std::sync::Mutex<Vec<Recorded>>> = Arc::default();

        let handler = {
            let hits = hits.clone();
            let requests = requests.clone();
            move |headers: HeaderMap, form: String| {
                let hits = hits.clone();
                let requests = requests.clone();
                let responder = responder.clone();
                async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    requests.lock().unwrap().push(Recorded {
                        authorization: headers
                            .get(http::header::AUTHORIZATION)
                            .and_then(|v| v.to_str().ok())
                            .map(ToOwned::to_owned),
                        form,
                    });
                    tokio::time::sleep(delay).await;
                    let (status, content_type, body) = responder(n);
                    (status, [(CONTENT_TYPE, content_type)], body)
                }
            }
        };

        let app = Router::new().route("/token", post(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        tokio::spawn(axum::serve(listener, app).into_future());

        MockEndpoint {
            url,
            hits,
            requests,
        }
    }

    fn ok_tokens(access: &str, refresh: Option<&str>) -> (StatusCode, &'static str, String) {
        let mut body = serde_json::json!({
            "access_token": access,
            "token_type": "Bearer",
        });
        if let Some(refresh) = refresh {
            body["refresh_token"] = serde_json::Value::String(refresh.to_owned());
        }
        (StatusCode::OK, "application/json", body.to_string())
    }

    #[tokio::test]
    async fn pull_secret_is_returned_verbatim() {
        let raw = "3fa85f64-5717-4562-b3fc-2c963f66afa6:aGVsbG8=";
        let manager = TokenManager::builder().token(raw).build().unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, raw);
        assert_eq!(pair.refresh, "");
    }

    #[tokio::test]
    async fn cached_valid_tokens_short_circuit() {
        let access = fake_jwt(serde_json::json!({"exp": now() + 3600}));
        let refresh = fake_jwt(serde_json::json!({"token_use": "refresh"}));
        let endpoint = spawn_endpoint(
            Duration::ZERO,
            Arc::new(|_| ok_tokens("should-not-be-used", None)),
        )
        .await;

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .token(&access)
            .token(&refresh)
            .build()
            .unwrap();

        let first = manager.tokens().await.unwrap();
        let second = manager.tokens().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.access, access);
        assert_eq!(first.refresh, refresh);
        assert_eq!(endpoint.hits(), 0);
    }

    #[tokio::test]
    async fn client_credentials_beat_a_live_refresh_token() {
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 600}));
        let endpoint = {
            let fresh = fresh.clone();
            spawn_endpoint(
                Duration::ZERO,
                Arc::new(move |_| ok_tokens(&fresh, None)),
            )
            .await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .client_id("my-client")
            .client_secret("my-secret")
            .token(fake_jwt(serde_json::json!({"token_use": "access", "exp": now() - 100})))
            .token(fake_jwt(serde_json::json!({"token_use": "refresh", "exp": now() + 3600})))
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, fresh);

        let requests = endpoint.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].form.contains("grant_type=client_credentials"));
        assert!(requests[0]
            .authorization
            .as_deref()
            .is_some_and(|auth| auth.starts_with("Basic ")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 3600}));
        let endpoint = {
            let fresh = fresh.clone();
            spawn_endpoint(
                Duration::from_millis(100),
                Arc::new(move |_| ok_tokens(&fresh, None)),
            )
            .await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .client_id("my-client")
            .client_secret("my-secret")
            .token(fake_jwt(serde_json::json!({"exp": now() - 10})))
            .build()
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.tokens().await.unwrap() }));
        }

        let mut pairs = Vec::new();
        for handle in handles {
            pairs.push(handle.await.unwrap());
        }

        assert_eq!(endpoint.hits(), 1);
        assert!(pairs.iter().all(|p| p.access == fresh));
    }

    #[tokio::test]
    async fn refresh_grant_renews_an_expired_access_token() {
        let old_refresh = fake_jwt(serde_json::json!({"token_use": "refresh", "exp": now() + 3600}));
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 600}));
        let endpoint = {
            let fresh = fresh.clone();
            spawn_endpoint(Duration::ZERO, Arc::new(move |_| ok_tokens(&fresh, None))).await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .token(fake_jwt(serde_json::json!({"token_use": "access", "exp": now() - 100})))
            .token(&old_refresh)
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, fresh);
        // The response carried no refresh token, so the old one is kept.
        assert_eq!(pair.refresh, old_refresh);

        let requests = endpoint.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].form.contains("grant_type=refresh_token"));
    }

    #[tokio::test]
    async fn refresh_token_is_replaced_when_the_response_has_one() {
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 600}));
        let rotated = fake_jwt(serde_json::json!({"token_use": "refresh", "exp": now() + 7200}));
        let endpoint = {
            let fresh = fresh.clone();
            let rotated = rotated.clone();
            spawn_endpoint(
                Duration::ZERO,
                Arc::new(move |_| ok_tokens(&fresh, Some(&rotated))),
            )
            .await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .token(fake_jwt(serde_json::json!({"token_use": "refresh", "exp": now() + 3600})))
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.refresh, rotated);
    }

    #[tokio::test]
    async fn password_grant_is_used_when_only_a_user_is_configured() {
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 600}));
        let endpoint = {
            let fresh = fresh.clone();
            spawn_endpoint(Duration::ZERO, Arc::new(move |_| ok_tokens(&fresh, None))).await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .username("alice")
            .password("opensesame")
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, fresh);

        let requests = endpoint.requests();
        assert!(requests[0].form.contains("grant_type=password"));
        assert!(requests[0].form.contains("username=alice"));
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 600}));
        let endpoint = {
            let fresh = fresh.clone();
            spawn_endpoint(
                Duration::ZERO,
                Arc::new(move |n| {
                    if n < 2 {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "text/plain",
                            "boom".to_owned(),
                        )
                    } else {
                        ok_tokens(&fresh, None)
                    }
                }),
            )
            .await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .client_id("my-client")
            .client_secret("my-secret")
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, fresh);
        assert_eq!(endpoint.hits(), 3);
    }

    #[tokio::test]
    async fn error_responses_are_not_retried() {
        let endpoint = spawn_endpoint(
            Duration::ZERO,
            Arc::new(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    "application/json",
                    serde_json::json!({
                        "error": "invalid_grant",
                        "error_description": "session not active",
                    })
                    .to_string(),
                )
            }),
        )
        .await;

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .client_id("my-client")
            .client_secret("my-secret")
            .build()
            .unwrap();

        let err = manager.tokens().await.unwrap_err();
        assert!(err.to_string().contains("error exchanging credentials"));
        assert!(matches!(
            err,
            TokensError::Grant(GrantError::ErrorResponse { ref error, .. })
                if error == "invalid_grant"
        ));
        assert_eq!(endpoint.hits(), 1);
    }

    #[tokio::test]
    async fn non_json_responses_fail_permanently() {
        let endpoint = spawn_endpoint(
            Duration::ZERO,
            Arc::new(|_| {
                (
                    StatusCode::OK,
                    "text/html",
                    "<html>login page</html>".to_owned(),
                )
            }),
        )
        .await;

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .client_id("my-client")
            .client_secret("my-secret")
            .build()
            .unwrap();

        let err = manager.tokens().await.unwrap_err();
        assert!(matches!(
            err,
            TokensError::Grant(GrantError::UnexpectedContentType { .. })
        ));
        assert_eq!(endpoint.hits(), 1);
    }

    #[tokio::test]
    async fn non_bearer_token_types_are_rejected() {
        let endpoint = spawn_endpoint(
            Duration::ZERO,
            Arc::new(|_| {
                (
                    StatusCode::OK,
                    "application/json",
                    serde_json::json!({
                        "access_token": "abc",
                        "token_type": "mac",
                    })
                    .to_string(),
                )
            }),
        )
        .await;

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .client_id("my-client")
            .client_secret("my-secret")
            .build()
            .unwrap();

        let err = manager.tokens().await.unwrap_err();
        assert!(matches!(
            err,
            TokensError::Grant(GrantError::UnsupportedTokenType { .. })
        ));
    }

    #[tokio::test]
    async fn a_nearly_expired_refresh_token_is_still_tried() {
        let fresh = fake_jwt(serde_json::json!({"exp": now() + 600}));
        let endpoint = {
            let fresh = fresh.clone();
            spawn_endpoint(Duration::ZERO, Arc::new(move |_| ok_tokens(&fresh, None))).await
        };

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .token(fake_jwt(serde_json::json!({"token_use": "refresh", "exp": now() + 30})))
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, fresh);
        assert_eq!(endpoint.hits(), 1);
        assert!(endpoint.requests()[0].form.contains("grant_type=refresh_token"));
    }

    #[tokio::test]
    async fn a_nearly_expired_access_token_is_the_last_resort() {
        let access = fake_jwt(serde_json::json!({"token_use": "access", "exp": now() + 30}));
        let endpoint = spawn_endpoint(
            Duration::ZERO,
            Arc::new(|_| ok_tokens("should-not-be-used", None)),
        )
        .await;

        let manager = TokenManager::builder()
            .token_url(&endpoint.url)
            .token(&access)
            .build()
            .unwrap();

        let pair = manager.tokens().await.unwrap();
        assert_eq!(pair.access, access);
        assert_eq!(endpoint.hits(), 0);
    }

    #[tokio::test]
    async fn nothing_configured_is_an_error() {
        let manager = TokenManager::builder().build().unwrap();

        let err = manager.tokens().await.unwrap_err();
        assert!(matches!(err, TokensError::NoUsableCredentials));
        assert!(err.to_string().contains("no credentials are configured"));
    }
}
