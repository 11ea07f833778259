//! Facilities for acquiring, caching, and renewing OAuth2 access tokens
//!
//! This library manages the client side of bearer authentication: it keeps a
//! current access/refresh token pair, decides when that pair needs to be
//! renewed, and knows how to obtain fresh tokens through the grant types
//! commonly offered by an OAuth2/OIDC token endpoint.
//!
//! The central type is the [`TokenManager`]. It is constructed once with the
//! credentials available to the application (client credentials, a username
//! and password, previously issued tokens, or a pull secret) and then handed
//! out wherever a token is needed. Every call to [`TokenManager::tokens`]
//! returns a pair that is guaranteed to remain usable for at least the
//! requested margin, refreshing behind a per-manager lock when the cached
//! pair is too close to expiry. Transient token-endpoint failures are
//! retried with exponential backoff for a bounded amount of time.
//!
//! For plain `reqwest` clients, [`TokenMiddleware`] plugs the manager into a
//! [`reqwest_middleware`] stack so that every outbound request carries a
//! current `Authorization` header without the application having to think
//! about token lifetimes at all:
//!
//! ```no_run
//! use sesamo_tokens::{TokenManager, TokenMiddleware};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = TokenManager::builder()
//!     .client_id("my-service")
//!     .client_secret("s3cr3t")
//!     .build()?;
//!
//! let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
//!     .with(TokenMiddleware::new(manager))
//!     .build();
//!
//! client.get("https://api.example.com/v1/things").send().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Interactive applications that have no stored credentials can obtain an
//! initial refresh token through the [`flows`] module, either by sending the
//! user through a browser-based authorization-code flow with PKCE or by
//! using the device-code flow on machines without a browser.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod classify;
pub mod clock;
pub mod flows;
mod grants;
mod manager;
mod metrics;
mod token;
mod transport;

pub use classify::{classify, is_pull_secret, ClassifiedToken, ClassifyError};
pub use grants::GrantError;
pub use manager::{
    TokenManager, TokenManagerBuilder, TokenManagerBuilderError, TokenPair, TokensError,
    DEFAULT_TOKEN_URL,
};
pub use token::{
    remaining, ClaimTypeError, Remaining, TokenClaims, TokenInfo, TokenParseError,
};
pub use transport::TokenMiddleware;
