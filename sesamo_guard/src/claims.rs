use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::outcome::ValidationOutcome;

/// The verified claims of a token, with typed access
///
/// Claims arrive as a JSON object; the accessors here return a typed value,
/// `None` when the claim is absent, or a [`ClaimTypeError`] when the claim
/// is present with the wrong type. This keeps "wrong type" distinct from
/// "missing" everywhere it matters.
#[derive(Clone, Debug)]
pub struct ClaimSet {
    map: serde_json::Map<String, Value>,
}

impl ClaimSet {
    /// Wraps a decoded claims value, which must be a JSON object
    pub fn from_value(value: Value) -> Result<Self, ValidationOutcome> {
        match value {
            Value::Object(map) => Ok(Self { map }),
            _ => Err(ValidationOutcome::Malformed),
        }
    }

    /// The raw value of a claim
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.map.get(claim)
    }

    /// A claim as a string
    pub fn string(&self, claim: &str) -> Result<Option<&str>, ClaimTypeError> {
        match self.map.get(claim) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(ClaimTypeError {
                claim: claim.to_owned(),
            }),
        }
    }

    /// A claim as a number
    pub fn number(&self, claim: &str) -> Result<Option<f64>, ClaimTypeError> {
        match self.map.get(claim) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| ClaimTypeError {
                    claim: claim.to_owned(),
                }),
        }
    }

    /// A claim as a boolean
    pub fn boolean(&self, claim: &str) -> Result<Option<bool>, ClaimTypeError> {
        match self.map.get(claim) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ClaimTypeError {
                claim: claim.to_owned(),
            }),
        }
    }
}

/// A claim was present but carried a value of the wrong type
#[derive(Clone, Debug, Error)]
#[error("claim `{claim}` has the wrong type")]
pub struct ClaimTypeError {
    /// The name of the offending claim
    pub claim: String,
}

/// Applies the claim rules that go beyond signature verification
///
/// The JWT library is configured to check only the signature, so the
/// temporal claims are enforced here: `iat` and `exp` must be present and
/// numeric even though the library would tolerate their absence, an
/// expired token is accepted only within the configured tolerance, and an
/// `impersonated` claim set to anything but `false` is always rejected.
pub(crate) fn check_standard_claims(
    claims: &ClaimSet,
    now: f64,
    tolerance: Duration,
) -> Result<(), ValidationOutcome> {
    if let Some(typ) = claims.string("typ")? {
        if !typ.eq_ignore_ascii_case("Bearer") {
            return Err(ValidationOutcome::WrongType {
                typ: typ.to_owned(),
            });
        }
    }

    let iat = claims
        .number("iat")?
        .ok_or(ValidationOutcome::MissingClaim {
            claim: "iat".to_owned(),
        })?;
    let exp = claims
        .number("exp")?
        .ok_or(ValidationOutcome::MissingClaim {
            claim: "exp".to_owned(),
        })?;

    if iat > now {
        return Err(ValidationOutcome::IssuedInFuture);
    }

    if let Some(nbf) = claims.number("nbf")? {
        if nbf > now {
            return Err(ValidationOutcome::NotYetValid);
        }
    }

    // Expired tokens get a grace window: accepted while they have been
    // expired for no longer than the tolerance, rejected after that.
    if now - exp > tolerance.as_secs_f64() {
        return Err(ValidationOutcome::Expired);
    }

    match claims.get("impersonated") {
        None | Some(Value::Bool(false)) => {}
        Some(Value::Bool(true)) => return Err(ValidationOutcome::Impersonation),
        Some(_) => {
            return Err(ValidationOutcome::WrongClaimType {
                claim: "impersonated".to_owned(),
            })
        }
    }

    Ok(())
}
