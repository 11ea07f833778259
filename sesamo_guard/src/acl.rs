use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::claims::ClaimSet;

/// One access rule: a claim name and a pattern its value must match
#[derive(Clone, Debug)]
pub struct AccessRule {
    claim: String,
    pattern: Regex,
}

impl AccessRule {
    /// Compiles a rule from a claim name and a regular expression
    pub fn new(claim: impl Into<String>, pattern: &str) -> Result<Self, AclError> {
        let regex = Regex::new(pattern).map_err(|source| AclError::Pattern {
            pattern: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            claim: claim.into(),
            pattern: regex,
        })
    }

    fn matches(&self, claims: &ClaimSet) -> bool {
        // Only string claims participate; anything else is skipped, not
        // treated as a mismatch.
        match claims.get(&self.claim) {
            Some(Value::String(value)) => self.pattern.is_match(value),
            _ => false,
        }
    }
}

/// An access control list over token claims
///
/// An empty list allows everyone: access control is an explicit,
/// administrative opt-in. A non-empty list allows a token when *any* rule
/// matches, so the evaluation order of the rules doesn't matter.
#[derive(Clone, Debug, Default)]
pub struct AccessList {
    rules: Vec<AccessRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    claim: String,
    pattern: String,
}

impl AccessList {
    /// Parses rules from YAML text
    ///
    /// The expected shape is a list of `{claim, pattern}` mappings:
    ///
    /// ```yaml
    /// - claim: email
    ///   pattern: ^.*@example\.com$
    /// - claim: org_id
    ///   pattern: ^acme$
    /// ```
    pub fn from_yaml(text: &str) -> Result<Self, AclError> {
        let raw: Vec<RawRule> = serde_yaml::from_str(text)?;
        let mut rules = Vec::with_capacity(raw.len());
        for rule in raw {
            rules.push(AccessRule::new(rule.claim, &rule.pattern)?);
        }
        Ok(Self { rules })
    }

    /// Reads and parses rules from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, AclError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AclError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Appends the rules of another list to this one
    pub fn extend(&mut self, other: AccessList) {
        self.rules.extend(other.rules);
    }

    /// Whether the list contains no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluates the list against a set of verified claims
    pub fn allows(&self, claims: &ClaimSet) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(claims))
    }
}

/// An error while loading an access control list
#[derive(Debug, Error)]
pub enum AclError {
    /// The file could not be read
    #[error("unable to read ACL file `{path}`")]
    Read {
        /// The path of the file
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The YAML did not parse as a list of rules
    #[error("unable to parse ACL items")]
    Parse(#[from] serde_yaml::Error),
    /// A rule's pattern is not a valid regular expression
    #[error("invalid ACL pattern `{pattern}`")]
    Pattern {
        /// The offending pattern
        pattern: String,
        /// The underlying regex error
        #[source]
        source: regex::Error,
    },
}
