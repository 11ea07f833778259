use std::future::IntoFuture;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::oneshot;

use super::pkce::{generate_state, PkceChallenge};
use super::FlowError;
use crate::grants::{dto, GrantKind, TokenEndpoint};

/// How long the user has to finish authorizing in the browser
const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration for the browser-based authorization-code flow
#[derive(Clone, Debug)]
pub struct AuthCodeConfig {
    /// The OAuth2 client identifier
    pub client_id: String,
    /// The authorization endpoint opened in the browser
    pub authorize_url: String,
    /// The token endpoint used for the final code exchange
    pub token_url: String,
    /// The local port the callback listener binds on
    ///
    /// Must match the redirect URI registered with the authorization
    /// server.
    pub callback_port: u16,
    /// The scopes to request, space-separated
    pub scopes: String,
    /// How long to wait for the user before giving up
    pub timeout: Duration,
}

impl AuthCodeConfig {
    /// Creates a configuration with the default five-minute timeout
    pub fn new(
        client_id: impl Into<String>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        callback_port: u16,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            callback_port,
            scopes: "openid".to_owned(),
            timeout: DEFAULT_FLOW_TIMEOUT,
        }
    }
}

/// The browser-based authorization-code flow with PKCE
///
/// Running the flow binds a one-route HTTP server on the configured local
/// port, opens the system browser on the authorization URL, and waits for
/// the authorization server to redirect back with a code, which is then
/// exchanged for tokens. The callback hands the code over through a
/// one-shot channel owned by the call, so separate flow instances never
/// interfere with each other.
#[derive(Debug)]
pub struct AuthCodeFlow {
    config: AuthCodeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AuthCodeFlow {
    /// Constructs a new flow from its configuration
    pub fn new(config: AuthCodeConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Runs the flow to completion and returns the refresh token
    pub async fn run(&self) -> Result<String, FlowError> {
        self.run_inner(PkceChallenge::generate(), generate_state())
            .await
    }

    pub(crate) async fn run_inner(
        &self,
        pkce: PkceChallenge,
        state: String,
    ) -> Result<String, FlowError> {
        let redirect_uri = format!("http://127.0.0.1:{}/callback", self.config.callback_port);
        let authorize_url = self.authorize_url(&pkce, &state, &redirect_uri)?;

        let (code_tx, code_rx) = oneshot::channel::<CallbackParams>();
        let code_tx = Arc::new(Mutex::new(Some(code_tx)));

        let app = Router::new().route(
            "/callback",
            get(move |Query(params): Query<CallbackParams>| {
                let code_tx = code_tx.clone();
                async move {
                    if let Some(tx) = code_tx.lock().expect("callback lock").take() {
                        let _ = tx.send(params);
                    }
                    Html("<html><body>Authorization received, you may close this window.</body></html>")
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", self.config.callback_port))
            .await
            .map_err(FlowError::Bind)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        tokio::spawn(server.into_future());

        tracing::info!(url = %authorize_url, "opening browser for authorization");
        open_browser(authorize_url.as_str());

        let outcome = tokio::time::timeout(self.config.timeout, code_rx).await;
        let _ = shutdown_tx.send(());

        let params = match outcome {
            Ok(Ok(params)) => params,
            Ok(Err(_)) => return Err(FlowError::CallbackClosed),
            Err(_) => return Err(FlowError::Timeout),
        };

        if let Some(error) = params.error {
            return Err(FlowError::Denied { error });
        }
        if params.state.as_deref() != Some(state.as_str()) {
            return Err(FlowError::StateMismatch);
        }
        let code = params.code.ok_or(FlowError::CallbackClosed)?;

        let token_url = parse_url(&self.config.token_url)?;
        let endpoint = TokenEndpoint::new(self.client.clone(), token_url);
        let form = dto::AuthorizationCodeRequest::new(
            &self.config.client_id,
            &code,
            &redirect_uri,
            pkce.verifier(),
        );
        let issued = endpoint
            .exchange(GrantKind::AuthorizationCode, &form, None)
            .await?;

        issued.refresh_token.ok_or(FlowError::NoRefreshToken)
    }

    fn authorize_url(
        &self,
        pkce: &PkceChallenge,
        state: &str,
        redirect_uri: &str,
    ) -> Result<reqwest::Url, FlowError> {
        let mut url = parse_url(&self.config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("state", state)
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", "S256");
        Ok(url)
    }
}

fn parse_url(url: &str) -> Result<reqwest::Url, FlowError> {
    reqwest::Url::parse(url).map_err(|err| FlowError::InvalidUrl {
        url: url.to_owned(),
        reason: err.to_string(),
    })
}

/// Asks the operating system to open `url` in the default browser
///
/// Failure is not fatal: the URL is always logged, so the user can still
/// open it by hand.
fn open_browser(url: &str) {
    #[cfg(target_os = "macos")]
    let result = Command::new("open").arg(url).spawn();
    #[cfg(target_os = "windows")]
    let result = Command::new("cmd").args(["/C", "start", url]).spawn();
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let result = Command::new("xdg-open").arg(url).spawn();

    if let Err(error) = result {
        tracing::warn!(
            error = (&error as &dyn std::error::Error),
            "unable to open the system browser, please open the URL manually"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::future::IntoFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::routing::post;
    use http::header::CONTENT_TYPE;
    use http::StatusCode;

    use super::*;

    async fn spawn_token_endpoint(
        refresh_token: Option<&'static str>,
    ) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let forms: Arc<Mutex<Vec<String>>> = Arc::default();

        let handler = {
            let hits = hits.clone();
            let forms = forms.clone();
            move |form: String| {
                let hits = hits.clone();
                let forms = forms.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    forms.lock().unwrap().push(form);
                    let mut body = serde_json::json!({"access_token": "at"});
                    if let Some(refresh) = refresh_token {
                        body["refresh_token"] = serde_json::Value::String(refresh.to_owned());
                    }
                    (
                        StatusCode::OK,
                        [(CONTENT_TYPE, "application/json")],
                        body.to_string(),
                    )
                }
            }
        };

        let app = Router::new().route("/token", post(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/token", listener.local_addr().unwrap());
        tokio::spawn(axum::serve(listener, app).into_future());

        (url, hits, forms)
    }

    #[tokio::test]
    async fn authorize_url_carries_the_pkce_parameters() {
        let flow = AuthCodeFlow::new(AuthCodeConfig::new(
            "cli",
            "https://sso.example.com/authorize",
            "https://sso.example.com/token",
            47815,
        ));
        let pkce = PkceChallenge::generate();

        let url = flow
            .authorize_url(&pkce, "the-state", "http://127.0.0.1:47815/callback")
            .unwrap();

        let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "cli");
        assert_eq!(query["state"], "the-state");
        assert_eq!(query["code_challenge"], pkce.challenge());
        assert_eq!(query["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn the_callback_completes_the_flow() {
        let (token_url, hits, forms) = spawn_token_endpoint(Some("the-refresh-token")).await;

        let port = 47816;
        let mut config = AuthCodeConfig::new(
            "cli",
            "https://sso.example.invalid/authorize",
            token_url,
            port,
        );
        config.timeout = Duration::from_secs(5);
        let flow = AuthCodeFlow::new(config);

        let pkce = PkceChallenge::generate();
        let verifier = pkce.verifier().to_owned();
        let run = tokio::spawn(async move {
            flow.run_inner(pkce, "known-state".to_owned()).await
        });

        // Play the part of the redirecting browser.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let callback = format!(
            "http://127.0.0.1:{port}/callback?code=the-code&state=known-state"
        );
        reqwest::get(&callback).await.unwrap().error_for_status().unwrap();

        let refresh = run.await.unwrap().unwrap();
        assert_eq!(refresh, "the-refresh-token");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let form = forms.lock().unwrap()[0].clone();
        assert!(form.contains("grant_type=authorization_code"));
        assert!(form.contains("code=the-code"));
        assert!(form.contains(&format!("code_verifier={verifier}")));
    }

    #[tokio::test]
    async fn a_mismatched_state_is_rejected() {
        let (token_url, hits, _) = spawn_token_endpoint(Some("unused")).await;

        let port = 47817;
        let mut config = AuthCodeConfig::new(
            "cli",
            "https://sso.example.invalid/authorize",
            token_url,
            port,
        );
        config.timeout = Duration::from_secs(5);
        let flow = AuthCodeFlow::new(config);

        let run = tokio::spawn(async move {
            flow.run_inner(PkceChallenge::generate(), "expected".to_owned())
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let callback =
            format!("http://127.0.0.1:{port}/callback?code=the-code&state=forged");
        reqwest::get(&callback).await.unwrap();

        assert!(matches!(
            run.await.unwrap(),
            Err(FlowError::StateMismatch)
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn the_deadline_is_honored() {
        let (token_url, _, _) = spawn_token_endpoint(None).await;

        let mut config = AuthCodeConfig::new(
            "cli",
            "https://sso.example.invalid/authorize",
            token_url,
            47818,
        );
        config.timeout = Duration::from_millis(200);
        let flow = AuthCodeFlow::new(config);

        let result = flow
            .run_inner(PkceChallenge::generate(), "state".to_owned())
            .await;
        assert!(matches!(result, Err(FlowError::Timeout)));
    }
}
