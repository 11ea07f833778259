//! The wire protocol spoken to an OAuth2 token endpoint

use http::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;

pub(crate) mod dto;

/// The grant type used for an exchange, mostly for logs and metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum GrantKind {
    ClientCredentials,
    Password,
    RefreshToken,
    AuthorizationCode,
    DeviceCode,
}

impl GrantKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            GrantKind::ClientCredentials => "client_credentials",
            GrantKind::Password => "password",
            GrantKind::RefreshToken => "refresh_token",
            GrantKind::AuthorizationCode => "authorization_code",
            GrantKind::DeviceCode => "device_code",
        }
    }
}

/// The tokens issued by a successful exchange
#[derive(Debug)]
pub(crate) struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// A token endpoint reachable over HTTP
#[derive(Clone, Debug)]
pub(crate) struct TokenEndpoint {
    client: reqwest::Client,
    token_url: reqwest::Url,
}

impl TokenEndpoint {
    pub(crate) fn new(client: reqwest::Client, token_url: reqwest::Url) -> Self {
        Self { client, token_url }
    }

    /// Performs a single token exchange
    ///
    /// The request is posted as a URL-encoded form; `basic` adds an
    /// `Authorization: Basic` header carrying the client credentials, as
    /// RFC 6749 §2.3.1 requires for the client-credentials grant.
    #[tracing::instrument(
        err,
        skip(self, form, basic),
        fields(token_url = %self.token_url, grant_type = grant.as_str()),
    )]
    pub(crate) async fn exchange<F: Serialize>(
        &self,
        grant: GrantKind,
        form: &F,
        basic: Option<(&str, &str)>,
    ) -> Result<IssuedTokens, GrantError> {
        tracing::trace!("requesting tokens from the token endpoint");

        let mut request = self
            .client
            .post(self.token_url.clone())
            .header(ACCEPT, "application/json")
            .form(form);
        if let Some((id, secret)) = basic {
            request = request.basic_auth(id, Some(secret));
        }

        let response = request.send().await.map_err(GrantError::RequestSend)?;
        let status = response.status();

        tracing::debug!(
            response.status = status.as_u16(),
            "received response from the token endpoint"
        );

        if status.is_server_error() {
            return Err(GrantError::ServerError {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        if !content_type
            .split(';')
            .next()
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/json"))
        {
            return Err(GrantError::UnexpectedContentType { content_type });
        }

        let body = response.bytes().await.map_err(GrantError::BodyRead)?;
        let body: dto::TokenResponse = serde_json::from_slice(&body)?;

        if let Some(error) = body.error {
            let message = match &body.error_description {
                Some(description) => {
                    format!("token endpoint returned error `{error}`: {description}")
                }
                None => format!("token endpoint returned error `{error}`"),
            };
            return Err(GrantError::ErrorResponse { error, message });
        }

        if status != http::StatusCode::OK {
            return Err(GrantError::BadStatus {
                status: status.as_u16(),
            });
        }

        if let Some(token_type) = &body.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(GrantError::UnsupportedTokenType {
                    token_type: token_type.clone(),
                });
            }
        }

        let access_token = body.access_token.ok_or(GrantError::MissingAccessToken)?;

        tracing::info!(
            has_refresh_token = body.refresh_token.is_some(),
            "received new tokens"
        );

        Ok(IssuedTokens {
            access_token,
            refresh_token: body.refresh_token,
        })
    }
}

/// An error while exchanging credentials for tokens
#[derive(Debug, Error)]
pub enum GrantError {
    /// The request never produced a response
    #[error("error sending request to the token endpoint")]
    RequestSend(#[source] reqwest::Error),
    /// The token endpoint answered with a server error
    #[error("token endpoint responded with status {status}")]
    ServerError {
        /// The HTTP status of the response
        status: u16,
    },
    /// The token endpoint answered with something other than JSON
    #[error("token endpoint responded with unexpected content type `{content_type}`")]
    UnexpectedContentType {
        /// The content type of the response
        content_type: String,
    },
    /// The response body could not be read
    #[error("error reading response body from the token endpoint")]
    BodyRead(#[source] reqwest::Error),
    /// The response body was not the expected JSON document
    #[error("error decoding token response body")]
    ResponseDecode(#[from] serde_json::Error),
    /// The response body carried an OAuth2 error
    #[error("{message}")]
    ErrorResponse {
        /// The OAuth2 error code, such as `invalid_grant`
        error: String,
        /// The rendered message, including the description when present
        message: String,
    },
    /// The token endpoint answered with an unexpected status
    #[error("token endpoint responded with status {status}")]
    BadStatus {
        /// The HTTP status of the response
        status: u16,
    },
    /// The response declared a token type other than `bearer`
    #[error("token endpoint issued unsupported token type `{token_type}`")]
    UnsupportedTokenType {
        /// The declared token type
        token_type: String,
    },
    /// The response carried no access token
    #[error("token endpoint response carries no access token")]
    MissingAccessToken,
}

impl GrantError {
    /// Whether retrying the exchange can be expected to help
    ///
    /// Connection-level failures and 5xx responses are transient; anything
    /// the endpoint said deliberately is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GrantError::RequestSend(_) | GrantError::ServerError { .. }
        )
    }
}
