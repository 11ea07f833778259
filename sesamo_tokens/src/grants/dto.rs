//! Form payloads for the grant types spoken to the token endpoint

use serde::Serialize;

/// The `client_credentials` grant, RFC 6749 §4.4
#[derive(Debug, Serialize)]
pub(crate) struct ClientCredentialsRequest<'a> {
    grant_type: &'static str,
    pub client_id: &'a str,
    pub scope: &'a str,
}

impl<'a> ClientCredentialsRequest<'a> {
    pub fn new(client_id: &'a str, scope: &'a str) -> Self {
        Self {
            grant_type: "client_credentials",
            client_id,
            scope,
        }
    }
}

/// The resource-owner `password` grant, RFC 6749 §4.3
#[derive(Serialize)]
pub(crate) struct PasswordRequest<'a> {
    grant_type: &'static str,
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub scope: &'a str,
}

impl<'a> PasswordRequest<'a> {
    pub fn new(client_id: &'a str, username: &'a str, password: &'a str, scope: &'a str) -> Self {
        Self {
            grant_type: "password",
            client_id,
            username,
            password,
            scope,
        }
    }
}

impl std::fmt::Debug for PasswordRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PasswordRequest")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***PASSWORD***")
            .field("scope", &self.scope)
            .finish()
    }
}

/// The `refresh_token` grant, RFC 6749 §6
#[derive(Debug, Serialize)]
pub(crate) struct RefreshTokenRequest<'a> {
    grant_type: &'static str,
    pub client_id: &'a str,
    pub refresh_token: &'a str,
}

impl<'a> RefreshTokenRequest<'a> {
    pub fn new(client_id: &'a str, refresh_token: &'a str) -> Self {
        Self {
            grant_type: "refresh_token",
            client_id,
            refresh_token,
        }
    }
}

/// The `authorization_code` grant with a PKCE verifier, RFC 7636
#[derive(Debug, Serialize)]
pub(crate) struct AuthorizationCodeRequest<'a> {
    grant_type: &'static str,
    pub client_id: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    pub code_verifier: &'a str,
}

impl<'a> AuthorizationCodeRequest<'a> {
    pub fn new(
        client_id: &'a str,
        code: &'a str,
        redirect_uri: &'a str,
        code_verifier: &'a str,
    ) -> Self {
        Self {
            grant_type: "authorization_code",
            client_id,
            code,
            redirect_uri,
            code_verifier,
        }
    }
}

/// The device-code grant poll, RFC 8628 §3.4
#[derive(Debug, Serialize)]
pub(crate) struct DeviceTokenRequest<'a> {
    grant_type: &'static str,
    pub client_id: &'a str,
    pub device_code: &'a str,
}

impl<'a> DeviceTokenRequest<'a> {
    pub fn new(client_id: &'a str, device_code: &'a str) -> Self {
        Self {
            grant_type: "urn:ietf:params:oauth:grant-type:device_code",
            client_id,
            device_code,
        }
    }
}

/// The token endpoint's response body
///
/// Everything but `access_token` is optional; `error` being present marks
/// the whole exchange as failed regardless of anything else in the body.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}
