//! Key acquisition from a locally managed key set
//!
//! Keys are registered and removed by hand; nothing is fetched. With a
//! static map of keys the issuer allow-list is not a vital security
//! feature, so the default construction accepts any issuer.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use regex::Regex;

use crate::{
    error::{JwksError, NoValidIssuerPatterns},
    jwks::{compile_issuer_patterns, issuer_matches, JwksHandler},
    Jwk,
};

// Separates issuer from kid in the backing map key.
const SENTINEL: char = '^';

/// A key-set handler backed by an in-memory map of issuer and key ID
#[derive(Debug)]
pub struct StaticJwksHandler {
    acceptable_issuers: Vec<Regex>,
    keys: RwLock<HashMap<String, Arc<Jwk>>>,
}

impl Default for StaticJwksHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticJwksHandler {
    /// Constructs a handler that accepts any issuer
    #[must_use]
    pub fn new() -> Self {
        Self::with_issuers([".*"]).unwrap_or_else(|_| unreachable!("'.*' always compiles"))
    }

    /// Constructs a handler restricted to issuers matching the given
    /// patterns
    ///
    /// # Errors
    ///
    /// Fails if no valid issuer pattern remains after compilation.
    pub fn with_issuers<I, S>(acceptable_issuer_patterns: I) -> Result<Self, NoValidIssuerPatterns>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            acceptable_issuers: compile_issuer_patterns(acceptable_issuer_patterns)?,
            keys: RwLock::new(HashMap::new()),
        })
    }

    /// Adds a key to the known set
    pub fn add_key(&self, issuer: &str, key: impl Into<Arc<Jwk>>) -> &Self {
        let key = key.into();
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(format!("{issuer}{SENTINEL}{}", key.key_id()), key);
        self
    }

    /// Removes a key from the known set
    pub fn remove_key(&self, issuer: &str, kid: &str) -> &Self {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&format!("{issuer}{SENTINEL}{kid}"));
        self
    }
}

#[async_trait]
impl JwksHandler for StaticJwksHandler {
    fn validate_issuer(&self, issuer: &str) -> Result<(), JwksError> {
        if issuer_matches(&self.acceptable_issuers, issuer) {
            return Ok(());
        }

        tracing::warn!(
            issuer,
            patterns = ?self
                .acceptable_issuers
                .iter()
                .map(Regex::as_str)
                .collect::<Vec<_>>(),
            "failed to find issuer in acceptable issuers"
        );
        Err(JwksError::UntrustedIssuer {
            issuer: issuer.to_owned(),
        })
    }

    async fn find_jwk(&self, issuer: &str, kid: &str) -> Result<Arc<Jwk>, JwksError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        match keys.get(&format!("{issuer}{SENTINEL}{kid}")) {
            Some(jwk) => Ok(Arc::clone(jwk)),
            None => {
                tracing::error!(kid, issuer, "failed to find key in static store");
                Err(JwksError::KeyNotFound {
                    kid: kid.to_owned(),
                })
            }
        }
    }
}
