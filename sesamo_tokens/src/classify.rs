use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use crate::token::{TokenClaims, TokenInfo};

/// A bootstrap token sorted into the role it should play
#[derive(Clone, Debug)]
pub enum ClassifiedToken {
    /// An access token
    Access(TokenInfo),
    /// A refresh token, possibly opaque
    Refresh(TokenInfo),
    /// A pull secret, used verbatim without any refresh logic
    PullSecret(TokenInfo),
}

/// Determines whether a raw token matches the pull-secret shape
///
/// Pull secrets look like `<uuid>:<base64 blob>`. The first segment must
/// parse as a UUID and the second must decode as base64.
pub fn is_pull_secret(raw: &str) -> bool {
    match raw.split_once(':') {
        Some((id, blob)) => {
            uuid::Uuid::parse_str(id).is_ok() && STANDARD.decode(blob).is_ok()
        }
        None => false,
    }
}

/// Classifies a bootstrap token string supplied at construction time
///
/// The token's own claims take precedence: a decodable JWT is sorted by its
/// `token_use` (or `typ`) claim. A JWT without either claim falls back to
/// its position in the bootstrap list, where the first token is taken as the
/// access token and the second as the refresh token. Text that does not
/// decode as a JWT is either a pull secret or an opaque refresh token.
pub fn classify(raw: &str, position: usize) -> Result<ClassifiedToken, ClassifyError> {
    match TokenClaims::decode(raw) {
        Ok(claims) => match claims.token_use().map(str::to_ascii_lowercase).as_deref() {
            Some("access") | Some("bearer") => {
                Ok(ClassifiedToken::Access(TokenInfo::parsed(raw).map_err(
                    |_| ClassifyError::Undecodable { position },
                )?))
            }
            Some("refresh") | Some("offline") => Ok(ClassifiedToken::Refresh(
                TokenInfo::lenient(raw),
            )),
            Some(value) => Err(ClassifyError::UnknownUse {
                value: value.to_owned(),
            }),
            None => match position {
                0 => Ok(ClassifiedToken::Access(TokenInfo::parsed(raw).map_err(
                    |_| ClassifyError::Undecodable { position },
                )?)),
                1 => Ok(ClassifiedToken::Refresh(TokenInfo::lenient(raw))),
                _ => Err(ClassifyError::Ambiguous { position }),
            },
        },
        Err(_) if is_pull_secret(raw) => {
            Ok(ClassifiedToken::PullSecret(TokenInfo::opaque(raw)))
        }
        Err(_) => Ok(ClassifiedToken::Refresh(TokenInfo::opaque(raw))),
    }
}

/// An error while classifying a bootstrap token
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// The token declared a `token_use`/`typ` value that isn't recognized
    #[error("token declares unknown use `{value}`")]
    UnknownUse {
        /// The unrecognized claim value
        value: String,
    },
    /// The token has no use claim and sits at a position with no meaning
    #[error("can't infer the role of the token at position {position}")]
    Ambiguous {
        /// The position of the token in the bootstrap list
        position: usize,
    },
    /// The token claimed to be an access token but would not decode
    #[error("access token at position {position} can't be decoded")]
    Undecodable {
        /// The position of the token in the bootstrap list
        position: usize,
    },
}
