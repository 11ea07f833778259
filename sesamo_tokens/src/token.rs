use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

use crate::clock::{DurationSecs, UnixTime};

/// A token together with its decoded claims, when it has any
///
/// The raw text is always retained so that the token can be transmitted
/// verbatim; the claims are only present when the text parsed as a JWT.
/// Opaque refresh tokens and pull secrets carry no claims.
#[derive(Clone)]
pub struct TokenInfo {
    text: String,
    claims: Option<TokenClaims>,
}

impl TokenInfo {
    /// Wraps a token without attempting to decode it
    pub fn opaque(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            claims: None,
        }
    }

    /// Wraps a token, requiring that its claims decode successfully
    pub fn parsed(text: impl Into<String>) -> Result<Self, TokenParseError> {
        let text = text.into();
        let claims = TokenClaims::decode(&text)?;
        Ok(Self {
            text,
            claims: Some(claims),
        })
    }

    /// Wraps a token, decoding its claims when possible
    ///
    /// A token that does not decode is kept as opaque. Refresh tokens are
    /// handled this way: many authorities issue opaque refresh tokens, and
    /// an undecodable one simply has no expiry to track.
    pub fn lenient(text: impl Into<String>) -> Self {
        let text = text.into();
        let claims = TokenClaims::decode(&text).ok();
        Self { text, claims }
    }

    /// The raw token text
    #[inline]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The decoded claims, when the token parsed as a JWT
    #[inline]
    pub fn claims(&self) -> Option<&TokenClaims> {
        self.claims.as_ref()
    }
}

impl fmt::Debug for TokenInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenInfo")
            .field("text", &"***TOKEN***")
            .field("claims", &self.claims)
            .finish()
    }
}

/// The claims of interest from an unverified JWT payload
///
/// Accessors are typed: a claim that is present but of the wrong type
/// produces a [`ClaimTypeError`] rather than being silently ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    exp: Option<serde_json::Value>,
    #[serde(default)]
    typ: Option<String>,
    #[serde(default)]
    token_use: Option<String>,
}

impl TokenClaims {
    /// Decodes the payload of a JWT without verifying its signature
    ///
    /// Tokens handled here were received directly from a trusted token
    /// endpoint, so there is nothing to gain from verifying them; the
    /// claims are only used for expiry tracking and classification.
    pub fn decode(text: &str) -> Result<Self, TokenParseError> {
        let mut segments = text.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(TokenParseError::Segments),
        };
        let decoded = URL_SAFE_NO_PAD.decode(payload)?;
        Ok(serde_json::from_slice(&decoded)?)
    }

    /// The instant the token expires
    ///
    /// Returns `None` for tokens without an `exp` claim and for tokens with
    /// `exp` set to zero, the conventional marker for offline tokens that
    /// never expire.
    pub fn expires_at(&self) -> Result<Option<UnixTime>, ClaimTypeError> {
        match &self.exp {
            None => Ok(None),
            Some(value) => {
                let exp = value
                    .as_f64()
                    .ok_or(ClaimTypeError { claim: "exp" })?;
                if exp == 0.0 {
                    Ok(None)
                } else {
                    Ok(Some(UnixTime(exp as i64)))
                }
            }
        }
    }

    /// The declared use of the token, from `token_use` or, failing that, `typ`
    pub fn token_use(&self) -> Option<&str> {
        self.token_use.as_deref().or(self.typ.as_deref())
    }
}

/// The remaining lifetime of a token at some reference instant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Remaining {
    /// The token carries no expiration and never expires
    Never,
    /// The signed time left until expiry; negative once expired
    In(DurationSecs),
}

impl Remaining {
    /// Whether the token will still be valid for at least `margin`
    pub fn lasts_at_least(&self, margin: DurationSecs) -> bool {
        match self {
            Remaining::Never => true,
            Remaining::In(left) => *left >= margin,
        }
    }

    /// Whether the token has any positive lifetime left at all
    pub fn still_valid(&self) -> bool {
        self.lasts_at_least(DurationSecs(1))
    }
}

/// Evaluates how much lifetime a token has left at `now`
///
/// An absent token, a token without decoded claims, and a token whose
/// claims carry no usable `exp` all report [`Remaining::Never`]. An `exp`
/// claim that is present but not numeric is an error.
pub fn remaining(
    token: Option<&TokenInfo>,
    now: UnixTime,
) -> Result<Remaining, ClaimTypeError> {
    let claims = match token.and_then(TokenInfo::claims) {
        Some(claims) => claims,
        None => return Ok(Remaining::Never),
    };
    match claims.expires_at()? {
        None => Ok(Remaining::Never),
        Some(expiry) => Ok(Remaining::In(expiry - now)),
    }
}

/// An error while decoding the payload of a would-be JWT
#[derive(Debug, Error)]
pub enum TokenParseError {
    /// The text does not have the three dot-separated segments of a JWT
    #[error("token does not have the three segments of a JWT")]
    Segments,
    /// The payload segment is not valid base64
    #[error("token payload is not valid base64")]
    Base64(#[from] base64::DecodeError),
    /// The payload segment is not a valid JSON object
    #[error("token payload is not a valid JSON claims object")]
    Json(#[from] serde_json::Error),
}

/// A claim was present but carried a value of the wrong type
#[derive(Clone, Copy, Debug, Error)]
#[error("token claim `{claim}` has the wrong type")]
pub struct ClaimTypeError {
    /// The name of the offending claim
    pub claim: &'static str,
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    use super::*;
    use crate::clock::{Clock, TestClock};

    pub(crate) fn fake_jwt(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.")
    }

    #[test]
    fn token_without_exp_never_expires() {
        let token = TokenInfo::parsed(fake_jwt(serde_json::json!({"sub": "x"}))).unwrap();
        let now = TestClock::new(UnixTime(1_700_000_000)).now();
        assert_eq!(remaining(Some(&token), now).unwrap(), Remaining::Never);
    }

    #[test]
    fn token_with_zero_exp_never_expires() {
        let token = TokenInfo::parsed(fake_jwt(serde_json::json!({"exp": 0}))).unwrap();
        assert_eq!(
            remaining(Some(&token), UnixTime(i64::MAX / 2)).unwrap(),
            Remaining::Never
        );
    }

    #[test]
    fn absent_and_opaque_tokens_never_expire() {
        let now = UnixTime(1_700_000_000);
        assert_eq!(remaining(None, now).unwrap(), Remaining::Never);

        let opaque = TokenInfo::opaque("not-a-jwt");
        assert_eq!(remaining(Some(&opaque), now).unwrap(), Remaining::Never);
    }

    #[test]
    fn remaining_is_signed() {
        let mut clock = TestClock::new(UnixTime(1_700_000_000));
        let token =
            TokenInfo::parsed(fake_jwt(serde_json::json!({"exp": 1_700_000_600}))).unwrap();

        assert_eq!(
            remaining(Some(&token), clock.now()).unwrap(),
            Remaining::In(DurationSecs(600))
        );

        clock.inc(1000);
        assert_eq!(
            remaining(Some(&token), clock.now()).unwrap(),
            Remaining::In(DurationSecs(-400))
        );
    }

    #[test]
    fn non_numeric_exp_is_an_error() {
        let token = TokenInfo::parsed(fake_jwt(serde_json::json!({"exp": "soon"}))).unwrap();
        let err = remaining(Some(&token), UnixTime(0)).unwrap_err();
        assert_eq!(err.claim, "exp");
    }

    #[test]
    fn lasts_at_least_respects_margin() {
        assert!(Remaining::Never.lasts_at_least(DurationSecs(3600)));
        assert!(Remaining::In(DurationSecs(60)).lasts_at_least(DurationSecs(60)));
        assert!(!Remaining::In(DurationSecs(59)).lasts_at_least(DurationSecs(60)));
        assert!(Remaining::In(DurationSecs(1)).still_valid());
        assert!(!Remaining::In(DurationSecs(0)).still_valid());
        assert!(!Remaining::In(DurationSecs(-10)).still_valid());
    }

    #[test]
    fn lenient_parse_tolerates_opaque_text() {
        let token = TokenInfo::lenient("2ce87ba0-d59f-4b05-80b7-3e8b34a9c392");
        assert!(token.claims().is_none());
        assert_eq!(token.text(), "2ce87ba0-d59f-4b05-80b7-3e8b34a9c392");
    }

    #[test]
    fn parsed_rejects_garbage() {
        assert!(TokenInfo::parsed("garbage").is_err());
        assert!(TokenInfo::parsed("a.!!!.c").is_err());
    }
}
