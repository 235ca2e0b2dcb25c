//! Acquisition of JSON Web Key Sets
//!
//! Two handlers implement the same capability: [`OidcJwksHandler`] resolves
//! keys dynamically through OpenID Connect Discovery, and
//! [`StaticJwksHandler`] serves keys from an in-memory map. Both police an
//! issuer allow-list expressed as regular expressions.

use std::sync::Arc;

use aliri_clock::DurationSecs;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{self, HeaderMap};

use crate::{
    error::{self, JwksError, NoValidIssuerPatterns},
    Jwk,
};

mod local;
mod remote;

pub use local::StaticJwksHandler;
pub use remote::OidcJwksHandler;

/// A source of issuer-scoped JSON Web Keys
///
/// It is vital for the security of any system resolving keys through OpenID
/// Connect Discovery that only trusted issuers are consulted; any party with
/// an RFC-compliant discovery endpoint can mint keys for itself.
#[async_trait]
pub trait JwksHandler: Send + Sync {
    /// Confirms that `issuer` is acceptable to this handler
    ///
    /// # Errors
    ///
    /// Returns [`JwksError::UntrustedIssuer`] if the issuer is not
    /// acceptable.
    fn validate_issuer(&self, issuer: &str) -> Result<(), JwksError>;

    /// Finds the JWK identified by `issuer` and `kid`
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer is untrusted, the key cannot be
    /// retrieved, or no key with the given ID exists.
    async fn find_jwk(&self, issuer: &str, kid: &str) -> Result<Arc<Jwk>, JwksError>;
}

/// Compiles an issuer allow-list, dropping unusable patterns with a warning
///
/// Patterns must match the whole issuer, so each is compiled anchored.
pub(crate) fn compile_issuer_patterns<I, S>(patterns: I) -> Result<Vec<Regex>, NoValidIssuerPatterns>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut compiled = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        if pattern.trim().is_empty() {
            tracing::warn!("null or empty issuer pattern cannot be used");
            continue;
        }

        match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => {
                tracing::trace!(pattern = re.as_str(), "compiled acceptable issuer regex");
                compiled.push(re);
            }
            Err(err) => {
                tracing::warn!(pattern, %err, "issuer pattern cannot be compiled");
            }
        }
    }

    if compiled.is_empty() {
        Err(error::no_valid_issuer_patterns())
    } else {
        Ok(compiled)
    }
}

pub(crate) fn issuer_matches(patterns: &[Regex], issuer: &str) -> bool {
    patterns.iter().any(|re| re.is_match(issuer))
}

/// Computes the absolute expiry of an HTTP response from its `Cache-Control`
/// headers
///
/// Every `max-age` directive across every `Cache-Control` header is
/// considered; the smallest positive value wins. Directives whose value is
/// missing, non-numeric, negative, or zero are logged and ignored. When no
/// usable directive is present, `default_duration` applies.
pub(crate) fn expiry_from_headers(
    request_time_ms: u64,
    headers: &HeaderMap,
    default_duration: DurationSecs,
) -> u64 {
    let mut max_age: Option<u64> = None;

    for value in headers.get_all(header::CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };

        for directive in value.split(',') {
            let mut parts = directive.splitn(2, '=');
            let name = parts.next().unwrap_or_default().trim();
            if name != "max-age" {
                continue;
            }

            let raw = parts.next().unwrap_or_default();
            let cleaned: String = raw
                .chars()
                .filter(|&c| c != '"')
                .collect::<String>()
                .trim()
                .to_lowercase();
            match cleaned.parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    max_age = Some(max_age.map_or(secs, |prev| prev.min(secs)));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(value = raw, %err, "invalid max-age cache-control directive");
                }
            }
        }
    }

    let secs = max_age.unwrap_or(default_duration.0);
    request_time_ms + secs * 1000
}
