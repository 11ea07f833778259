use thiserror::Error;

use crate::acl::AclError;

/// An error while constructing a [`BearerGuard`][crate::BearerGuard]
///
/// Configuration problems are caught here, at construction time; nothing
/// in this enum can surface while requests are being served.
#[derive(Debug, Error)]
pub enum GuardError {
    /// No JWKS file or URL was configured
    #[error("at least one keys file or keys URL must be configured")]
    NoKeySources,
    /// A public-path pattern is not a valid regular expression
    #[error("invalid public path pattern `{pattern}`")]
    InvalidPublicPath {
        /// The offending pattern
        pattern: String,
        /// The underlying regex error
        #[source]
        source: regex::Error,
    },
    /// A keys URL does not parse
    #[error("invalid keys URL `{url}`: {reason}")]
    InvalidKeysUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },
    /// An access control list could not be loaded
    #[error("unable to load access control list")]
    Acl(#[from] AclError),
    /// The HTTP client for key fetching could not be constructed
    #[error("unable to build HTTP client for fetching keys")]
    ClientBuild(#[source] reqwest::Error),
}
