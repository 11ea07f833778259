//! Interactive flows for obtaining an initial refresh token
//!
//! Applications that hold no client credentials bootstrap themselves
//! through one of two user-facing flows: [`AuthCodeFlow`] sends the user
//! through the system browser with an authorization-code grant protected
//! by PKCE, while [`DeviceAuthFlow`] displays a short code for the user to
//! enter on another device and polls until the authorization completes.
//! Both return a refresh token suitable for seeding a
//! [`TokenManager`][crate::TokenManager].

use thiserror::Error;

use crate::grants::GrantError;

mod auth_code;
mod device;
mod pkce;

pub use auth_code::{AuthCodeConfig, AuthCodeFlow};
pub use device::{DeviceAuthConfig, DeviceAuthFlow, DeviceAuthorization};
pub use pkce::PkceChallenge;

/// An error while running an interactive authorization flow
#[derive(Debug, Error)]
pub enum FlowError {
    /// A configured URL does not parse
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },
    /// The local callback listener could not be bound
    #[error("unable to bind local callback listener")]
    Bind(#[source] std::io::Error),
    /// The user did not complete the flow in time
    #[error("timed out waiting for the authorization to complete")]
    Timeout,
    /// The callback server went away without delivering a code
    #[error("callback listener closed before delivering an authorization code")]
    CallbackClosed,
    /// The redirect carried a state that we did not send
    #[error("authorization response state does not match the request")]
    StateMismatch,
    /// The authorization server reported a denial
    #[error("authorization was denied: {error}")]
    Denied {
        /// The error code reported by the authorization server
        error: String,
    },
    /// The token response carried no refresh token
    #[error("authorization completed but no refresh token was issued")]
    NoRefreshToken,
    /// The device-authorization request failed
    #[error("device authorization request failed with status {status}")]
    DeviceAuthorize {
        /// The HTTP status of the response
        status: u16,
    },
    /// An HTTP request could not be performed
    #[error("error talking to the authorization server")]
    Http(#[from] reqwest::Error),
    /// The final token exchange failed
    #[error(transparent)]
    Grant(#[from] GrantError),
}
