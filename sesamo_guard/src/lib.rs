//! Middleware for validating inbound bearer tokens
//!
//! This library implements the resource-server side of bearer
//! authentication as a [`tower`](https://docs.rs/tower-service) layer. The
//! [`BearerGuard`] wraps an HTTP service and, for every request that does
//! not match one of the configured public paths:
//!
//! * extracts the bearer credential from the `Authorization` header or,
//!   optionally, from a cookie,
//! * verifies its signature against an RSA key set loaded from local files
//!   or remote JWKS endpoints, reloading lazily when an unknown key
//!   identifier shows up,
//! * checks the standard claims, with an optional tolerance window for
//!   recently expired tokens,
//! * evaluates claim-matching access control lists loaded from YAML files,
//!
//! and then either forwards the request, with the verified
//! [`ValidatedToken`] stored in the request extensions, or answers with a
//! structured `401` JSON body naming the specific reason.
//!
//! ```no_run
//! use sesamo_guard::BearerGuard;
//! use tower_layer::Layer;
//!
//! # fn example<S>(inner: S) -> Result<(), sesamo_guard::GuardError>
//! # where S: Clone {
//! let guard = BearerGuard::builder()
//!     .keys_url("https://sso.example.com/oauth/certs")
//!     .public_path("^/healthz$")
//!     .acl_file("/etc/guard/acl.yml")
//!     .build()?;
//!
//! let service = guard.layer(inner);
//! # Ok(())
//! # }
//! ```

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

mod acl;
mod claims;
mod error;
mod guard;
mod keys;
mod outcome;

pub use acl::{AccessList, AccessRule, AclError};
pub use claims::{ClaimSet, ClaimTypeError};
pub use error::GuardError;
pub use guard::{
    BearerGuard, BearerGuardBuilder, BearerGuardService, OperationIdExtractor, ValidatedToken,
    DEFAULT_COOKIE_NAME,
};
pub use keys::{KeyStore, KeyStoreError};
pub use outcome::ValidationOutcome;
