use jsonwebtoken::errors::ErrorKind;

use crate::claims::ClaimTypeError;

/// Why a request was rejected
///
/// Every way in which validation can fail maps to exactly one variant, and
/// every variant renders one specific, human-readable reason for the `401`
/// body. Errors reported by the JWT library are translated here, in one
/// place, rather than being inspected wherever they happen to surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Neither an authorization header nor a cookie carried a credential
    MissingCredentials,
    /// The authorization header did not have a `<scheme> <credential>` shape
    MalformedHeader,
    /// The authorization scheme was something other than `Bearer`
    WrongScheme {
        /// The scheme that was presented
        scheme: String,
    },
    /// The credential is not a structurally valid JWT
    Malformed,
    /// The token cannot be verified
    Unverifiable,
    /// The token names no key identifier
    MissingKeyId,
    /// The token names a key identifier that isn't in the key set
    UnknownKey {
        /// The unmatched key identifier
        kid: String,
    },
    /// The signature does not match
    BadSignature,
    /// The token expired longer ago than the tolerance allows
    Expired,
    /// The token claims to have been issued in the future
    IssuedInFuture,
    /// The token is not valid yet
    NotYetValid,
    /// The token declares a type other than `Bearer`
    WrongType {
        /// The declared type
        typ: String,
    },
    /// A required claim is missing
    MissingClaim {
        /// The name of the missing claim
        claim: String,
    },
    /// A claim is present but has the wrong type
    WrongClaimType {
        /// The name of the offending claim
        claim: String,
    },
    /// The token is an impersonation token, which is never allowed through
    Impersonation,
    /// The token is valid but no access rule matches its claims
    AccessDenied,
    /// Anything the other variants don't cover
    Other {
        /// A description of the failure
        message: String,
    },
}

impl ValidationOutcome {
    /// The reason string put into the rejection body
    pub fn reason(&self) -> String {
        match self {
            ValidationOutcome::MissingCredentials => {
                "Request doesn't contain any authorization credentials".to_owned()
            }
            ValidationOutcome::MalformedHeader => "Authorization header is malformed".to_owned(),
            ValidationOutcome::WrongScheme { scheme } => {
                format!("Authentication type '{scheme}' isn't supported")
            }
            ValidationOutcome::Malformed => "Bearer token is malformed".to_owned(),
            ValidationOutcome::Unverifiable => "Bearer token can't be verified".to_owned(),
            ValidationOutcome::MissingKeyId => {
                "Bearer token doesn't name a key identifier".to_owned()
            }
            ValidationOutcome::UnknownKey { kid } => {
                format!("Bearer token is signed with unknown key '{kid}'")
            }
            ValidationOutcome::BadSignature => "Bearer token signature is invalid".to_owned(),
            ValidationOutcome::Expired => "Bearer token is expired".to_owned(),
            ValidationOutcome::IssuedInFuture => {
                "Bearer token was issued in the future".to_owned()
            }
            ValidationOutcome::NotYetValid => "Bearer token isn't valid yet".to_owned(),
            ValidationOutcome::WrongType { typ } => {
                format!("Bearer token type '{typ}' isn't allowed")
            }
            ValidationOutcome::MissingClaim { claim } => {
                format!("Bearer token doesn't contain required claim '{claim}'")
            }
            ValidationOutcome::WrongClaimType { claim } => {
                format!("Bearer token claim '{claim}' contains incorrect type")
            }
            ValidationOutcome::Impersonation => "Impersonation isn't allowed".to_owned(),
            ValidationOutcome::AccessDenied => "Access denied".to_owned(),
            ValidationOutcome::Other { message } => message.clone(),
        }
    }
}

impl From<ClaimTypeError> for ValidationOutcome {
    fn from(err: ClaimTypeError) -> Self {
        ValidationOutcome::WrongClaimType { claim: err.claim }
    }
}

/// Translates a JWT library error into a [`ValidationOutcome`]
pub(crate) fn from_jwt_error(err: &jsonwebtoken::errors::Error) -> ValidationOutcome {
    match err.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => ValidationOutcome::Malformed,
        ErrorKind::InvalidSignature => ValidationOutcome::BadSignature,
        ErrorKind::ExpiredSignature => ValidationOutcome::Expired,
        ErrorKind::ImmatureSignature => ValidationOutcome::NotYetValid,
        ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat
        | ErrorKind::InvalidRsaKey(_) => ValidationOutcome::Unverifiable,
        ErrorKind::MissingRequiredClaim(claim) => ValidationOutcome::MissingClaim {
            claim: claim.clone(),
        },
        _ => ValidationOutcome::Other {
            message: err.to_string(),
        },
    }
}
