use std::time::{Duration, Instant};

use serde::Deserialize;

use super::FlowError;
use crate::grants::{dto, GrantError, GrantKind, TokenEndpoint};

/// The poll interval used when the server does not suggest one
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the device-code flow, RFC 8628
#[derive(Clone, Debug)]
pub struct DeviceAuthConfig {
    /// The OAuth2 client identifier
    pub client_id: String,
    /// The device-authorization endpoint
    pub device_authorize_url: String,
    /// The token endpoint polled for the result
    pub token_url: String,
    /// The scopes to request, space-separated
    pub scopes: String,
}

/// The server's answer to a device-authorization request
///
/// The caller shows `verification_uri` and `user_code` to the user, who
/// completes the authorization on another device while the flow polls.
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceAuthorization {
    /// The code the user must enter at the verification URI
    pub user_code: String,
    /// Where the user completes the authorization
    pub verification_uri: String,
    /// A verification URI with the user code already embedded, if offered
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// The suggested polling interval in seconds
    #[serde(default)]
    pub interval: Option<u64>,
    /// How many seconds the codes stay valid
    pub expires_in: u64,
    device_code: String,
}

/// The device-code flow
///
/// Step one ([`authorize`][Self::authorize]) obtains a device code and a
/// user code; step two ([`wait_for_tokens`][Self::wait_for_tokens]) polls
/// the token endpoint until the user finishes authorizing out-of-band and
/// returns the refresh token.
#[derive(Debug)]
pub struct DeviceAuthFlow {
    config: DeviceAuthConfig,
    client: reqwest::Client,
}

#[derive(Debug, serde::Serialize)]
struct DeviceAuthorizeRequest<'a> {
    client_id: &'a str,
    scope: &'a str,
}

impl DeviceAuthFlow {
    /// Constructs a new flow from its configuration
    pub fn new(config: DeviceAuthConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Requests a device code and the matching user code
    pub async fn authorize(&self) -> Result<DeviceAuthorization, FlowError> {
        let response = self
            .client
            .post(&self.config.device_authorize_url)
            .form(&DeviceAuthorizeRequest {
                client_id: &self.config.client_id,
                scope: &self.config.scopes,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlowError::DeviceAuthorize {
                status: status.as_u16(),
            });
        }

        let authorization = response.json::<DeviceAuthorization>().await?;
        tracing::info!(
            verification_uri = %authorization.verification_uri,
            user_code = %authorization.user_code,
            "device authorization started, waiting for the user"
        );
        Ok(authorization)
    }

    /// Polls the token endpoint until the user completes the flow
    ///
    /// Returns the refresh token. Polling respects the server-suggested
    /// interval, slows down when told to, and gives up once the codes
    /// expire.
    pub async fn wait_for_tokens(
        &self,
        authorization: &DeviceAuthorization,
    ) -> Result<String, FlowError> {
        let token_url = reqwest::Url::parse(&self.config.token_url).map_err(|err| {
            FlowError::InvalidUrl {
                url: self.config.token_url.clone(),
                reason: err.to_string(),
            }
        })?;
        let endpoint = TokenEndpoint::new(self.client.clone(), token_url);

        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = authorization
            .interval
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        loop {
            if Instant::now() >= deadline {
                return Err(FlowError::Timeout);
            }

            let form = dto::DeviceTokenRequest::new(
                &self.config.client_id,
                &authorization.device_code,
            );
            match endpoint.exchange(GrantKind::DeviceCode, &form, None).await {
                Ok(issued) => {
                    return issued.refresh_token.ok_or(FlowError::NoRefreshToken);
                }
                Err(GrantError::ErrorResponse { ref error, .. })
                    if error == "authorization_pending" =>
                {
                    tracing::debug!("authorization still pending");
                }
                Err(GrantError::ErrorResponse { ref error, .. }) if error == "slow_down" => {
                    interval += Duration::from_secs(5);
                    tracing::debug!(
                        interval_secs = interval.as_secs(),
                        "authorization server asked to slow down"
                    );
                }
                Err(GrantError::ErrorResponse { ref error, .. }) if error == "expired_token" => {
                    return Err(FlowError::Timeout);
                }
                Err(err) => return Err(err.into()),
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Runs both steps, logging the verification details for the user
    pub async fn run(&self) -> Result<String, FlowError> {
        let authorization = self.authorize().await?;
        self.wait_for_tokens(&authorization).await
    }
}
