use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

/// Reload at most this often, no matter how many unknown kids show up
const RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// A lazily-reloaded set of token verification keys
///
/// Keys come from any mix of local JWKS files and remote JWKS endpoints
/// and are looked up by key identifier. A lookup that misses triggers a
/// reload of every source, but at most once per minute, so a flood of
/// requests carrying unknown kids cannot hammer the key sources.
///
/// The map only ever grows: keys for kids that disappear from the sources
/// are kept, and a reload replaces entries only when the same kid appears
/// again. That is acceptable for the small, slowly-rotating key sets this
/// store is meant for, and worth knowing before pointing it at anything
/// else.
#[derive(Clone)]
pub struct KeyStore {
    inner: Arc<KeyStoreInner>,
}

struct KeyStoreInner {
    keys: ArcSwap<HashMap<String, DecodingKey>>,
    last_reload: Mutex<Option<Instant>>,
    sources: Vec<KeySource>,
    client: reqwest::Client,
}

#[derive(Clone, Debug)]
pub(crate) enum KeySource {
    File(PathBuf),
    Url(reqwest::Url),
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeySource::File(path) => write!(f, "{}", path.display()),
            KeySource::Url(url) => write!(f, "{url}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeySet {
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    kty: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

impl KeyStore {
    pub(crate) fn new(sources: Vec<KeySource>, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(KeyStoreInner {
                keys: ArcSwap::from_pointee(HashMap::new()),
                last_reload: Mutex::new(None),
                sources,
                client,
            }),
        }
    }

    /// Finds the verification key for a key identifier
    ///
    /// A miss triggers a rate-limited reload of the key sources and one
    /// retry of the lookup.
    pub async fn resolve(&self, kid: &str) -> Result<DecodingKey, KeyStoreError> {
        if let Some(key) = self.lookup(kid) {
            return Ok(key);
        }

        self.reload_if_due().await;

        self.lookup(kid).ok_or_else(|| KeyStoreError::NoMatchingKey {
            kid: kid.to_owned(),
        })
    }

    fn lookup(&self, kid: &str) -> Option<DecodingKey> {
        self.inner.keys.load().get(kid).cloned()
    }

    async fn reload_if_due(&self) {
        let mut last_reload = self.inner.last_reload.lock().await;
        if let Some(at) = *last_reload {
            if at.elapsed() < RELOAD_INTERVAL {
                tracing::trace!("key reload attempted too recently, skipping");
                return;
            }
        }
        *last_reload = Some(Instant::now());
        self.reload().await;
    }

    /// Fetches every configured source and merges the keys in
    ///
    /// Individual source failures and individual malformed entries are
    /// logged and skipped; only what parses cleanly makes it into the map.
    pub async fn reload(&self) {
        let current = self.inner.keys.load_full();
        let mut merged = HashMap::clone(&current);

        for source in &self.inner.sources {
            match self.fetch(source).await {
                Ok(set) => add_keys(set, &mut merged),
                Err(error) => {
                    tracing::error!(
                        source = %source,
                        error = (&error as &dyn std::error::Error),
                        "unable to load token verification keys from source"
                    );
                }
            }
        }

        tracing::info!(keys = merged.len(), "token verification keys reloaded");
        self.inner.keys.store(Arc::new(merged));
    }

    async fn fetch(&self, source: &KeySource) -> Result<KeySet, KeyLoadError> {
        let bytes = match source {
            KeySource::File(path) => tokio::fs::read(path).await?,
            KeySource::Url(url) => {
                let response = self.inner.client.get(url.clone()).send().await?;
                response.error_for_status_ref()?;
                response.bytes().await?.to_vec()
            }
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn add_keys(set: KeySet, into: &mut HashMap<String, DecodingKey>) {
    for entry in set.keys {
        let (kid, kty, _alg, n, e) = match (entry.kid, entry.kty, entry.alg, entry.n, entry.e) {
            (Some(kid), Some(kty), Some(alg), Some(n), Some(e)) => (kid, kty, alg, n, e),
            _ => {
                tracing::error!("skipping key entry with missing fields");
                continue;
            }
        };

        if kty != "RSA" {
            tracing::error!(kid = %kid, kty = %kty, "skipping key with unsupported type");
            continue;
        }

        match DecodingKey::from_rsa_components(&n, &e) {
            Ok(key) => {
                into.insert(kid, key);
            }
            Err(error) => {
                tracing::error!(
                    kid = %kid,
                    error = (&error as &dyn std::error::Error),
                    "skipping key with unusable RSA components"
                );
            }
        }
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("sources", &self.inner.sources)
            .field("keys", &self.inner.keys.load().len())
            .finish()
    }
}

/// An error while resolving a verification key
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No source offers a key with the requested identifier
    #[error("no key for key identifier '{kid}'")]
    NoMatchingKey {
        /// The unmatched key identifier
        kid: String,
    },
}

#[derive(Debug, Error)]
enum KeyLoadError {
    #[error("unable to read keys file")]
    Read(#[from] std::io::Error),
    #[error("unable to fetch keys")]
    Fetch(#[from] reqwest::Error),
    #[error("unable to decode key set")]
    Decode(#[from] serde_json::Error),
}
