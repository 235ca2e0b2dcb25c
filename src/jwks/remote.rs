//! Key acquisition through OpenID Connect Discovery
//!
//! Discovery as specified by [openid-connect-discovery-1_0][]: the issuer's
//! `/.well-known/openid-configuration` document advertises a `jwks_uri`,
//! which is fetched and mined for keys. Both documents are cached with
//! single-flight semantics, honouring `Cache-Control: max-age`.
//!
//! [openid-connect-discovery-1_0]: https://openid.net/specs/openid-connect-discovery-1_0.html

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use aliri_clock::DurationSecs;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};

use crate::{
    cache::{epoch_ms, AsyncCache},
    error::{JwksError, NoValidIssuerPatterns},
    jwks::{compile_issuer_patterns, expiry_from_headers, issuer_matches, JwksHandler},
    oidc::DiscoveryData,
    Jwk,
};

type KidCache = AsyncCache<String, Arc<Jwk>, JwksError>;

/// A JSON response body paired with the expiry computed from its headers
struct TimedJson {
    expires_at_ms: u64,
    json: Map<String, Value>,
}

/// A key-set handler that discovers signing keys through OpenID Connect
///
/// Holds one discovery cache keyed by issuer and one kid-cache per
/// `jwks_uri`. All outbound requests go through the `reqwest::Client`
/// provided at construction; timeouts and TLS policy are the client's
/// concern.
#[derive(Debug)]
pub struct OidcJwksHandler {
    client: reqwest::Client,
    default_jwk_cache_duration: DurationSecs,
    acceptable_issuers: Vec<Regex>,
    discovery_cache: AsyncCache<String, Arc<DiscoveryData>, JwksError>,
    kid_caches: Mutex<HashMap<String, KidCache>>,
}

impl OidcJwksHandler {
    /// Constructs a handler from an HTTP client, an issuer allow-list, and
    /// the cache duration applied when a response carries no usable
    /// `Cache-Control: max-age`
    ///
    /// Blank or uncompilable patterns are dropped with a warning.
    ///
    /// # Errors
    ///
    /// Fails if no valid issuer pattern remains.
    pub fn new<I, S>(
        client: reqwest::Client,
        acceptable_issuer_patterns: I,
        default_jwk_cache_duration: DurationSecs,
    ) -> Result<Self, NoValidIssuerPatterns>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let acceptable_issuers = compile_issuer_patterns(acceptable_issuer_patterns)?;

        Ok(Self {
            client,
            default_jwk_cache_duration,
            acceptable_issuers,
            discovery_cache: AsyncCache::new(),
            kid_caches: Mutex::new(HashMap::new()),
        })
    }

    /// Obtains the discovery data for an issuer
    ///
    /// On a cache miss this requests
    /// `{issuer}/.well-known/openid-configuration` and caches the result
    /// against the issuer until the expiry its response headers allow.
    ///
    /// # Errors
    ///
    /// Fails if the issuer is untrusted, the request fails, or the response
    /// is not a JSON object.
    pub async fn perform_openid_discovery(
        &self,
        issuer: &str,
    ) -> Result<Arc<DiscoveryData>, JwksError> {
        self.validate_issuer(issuer)?;

        let discovery_url = if issuer.ends_with('/') {
            format!("{issuer}.well-known/openid-configuration")
        } else {
            format!("{issuer}/.well-known/openid-configuration")
        };

        let client = self.client.clone();
        let default_duration = self.default_jwk_cache_duration;

        self.discovery_cache
            .get(issuer.to_owned(), move || async move {
                let timed = fetch_json(&client, &discovery_url, default_duration).await?;
                Ok(Arc::new(DiscoveryData::new(timed.expires_at_ms, timed.json)))
            })
            .await
    }

    /// Finds a JWK through the `jwks_uri` of previously obtained discovery
    /// data
    ///
    /// The resulting key is cached against the `jwks_uri`, as is every
    /// other key parsed out of the same response.
    ///
    /// # Errors
    ///
    /// Fails if the discovery data carries no `jwks_uri`, the request
    /// fails, or the key set does not contain `kid`.
    pub async fn find_jwk_with(
        &self,
        discovery_data: &DiscoveryData,
        kid: &str,
    ) -> Result<Arc<Jwk>, JwksError> {
        let jwks_uri = match discovery_data.jwks_uri() {
            Some(uri) if !uri.trim().is_empty() => uri.to_owned(),
            _ => return Err(JwksError::MissingJwksUri),
        };

        let kid_cache = {
            let mut caches = self
                .kid_caches
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            caches.entry(jwks_uri.clone()).or_default().clone()
        };

        let client = self.client.clone();
        let default_duration = self.default_jwk_cache_duration;
        let loader_cache = kid_cache.clone();
        let wanted = kid.to_owned();

        kid_cache
            .get(kid.to_owned(), move || async move {
                let timed = fetch_json(&client, &jwks_uri, default_duration).await?;
                process_jwk_set(&loader_cache, &timed, &wanted)
            })
            .await
    }
}

#[async_trait]
impl JwksHandler for OidcJwksHandler {
    /// An issuer is accepted if discovery data has already been cached for
    /// it, or if it matches one of the configured patterns
    ///
    /// The cache short-circuit means a once-accepted issuer stays accepted
    /// until its discovery entry leaves the cache, even if the pattern that
    /// admitted it is no longer configured.
    fn validate_issuer(&self, issuer: &str) -> Result<(), JwksError> {
        if self.discovery_cache.contains(&issuer.to_owned()) {
            return Ok(());
        }

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
        let discovery_data = self.perform_openid_discovery(issuer).await?;
        self.find_jwk_with(&discovery_data, kid).await
    }
}

async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    default_duration: DurationSecs,
) -> Result<TimedJson, JwksError> {
    if let Err(err) = reqwest::Url::parse(url) {
        tracing::error!(url, %err, "the JWKS URI is not a valid URL");
        return Err(JwksError::InvalidUrl {
            url: url.to_owned(),
        });
    }

    let request_time_ms = epoch_ms();
    let response = client.get(url).send().await.map_err(|err| {
        tracing::warn!(url, %err, "request failed");
        JwksError::RequestFailed {
            url: url.to_owned(),
            source: Arc::new(err),
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        tracing::debug!(url, status = status.as_u16(), "request returned an error status");
        return Err(JwksError::UpstreamStatus {
            url: url.to_owned(),
            status: status.as_u16(),
        });
    }

    let expires_at_ms = expiry_from_headers(
        request_time_ms,
        response.headers(),
        default_duration,
    );

    let body: Value = response.json().await.map_err(|err| {
        tracing::warn!(url, %err, "response body was not valid JSON");
        JwksError::InvalidResponseBody {
            url: url.to_owned(),
        }
    })?;

    match body {
        Value::Object(json) => Ok(TimedJson {
            expires_at_ms,
            json,
        }),
        _ => Err(JwksError::InvalidResponseBody {
            url: url.to_owned(),
        }),
    }
}

fn process_jwk_set(
    kid_cache: &KidCache,
    data: &TimedJson,
    kid: &str,
) -> Result<Arc<Jwk>, JwksError> {
    let Some(Value::Array(keys)) = data.json.get("keys") else {
        tracing::error!(kid, "failed to get key from JWKS: response has no keys array");
        return Err(JwksError::KeyNotFound {
            kid: kid.to_owned(),
        });
    };

    let mut result = None;

    for key_data in keys {
        if !key_data.is_object() {
            continue;
        }

        match Jwk::from_value(data.expires_at_ms, key_data) {
            Ok(jwk) => {
                if jwk.key_id() == kid {
                    result = Some(Arc::new(jwk));
                } else {
                    kid_cache.put(jwk.key_id().to_owned(), Arc::new(jwk));
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to parse JWKS entry as a JWK");
            }
        }
    }

    match result {
        Some(jwk) => {
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(kid, kty = jwk.key_type(), "got new public key");
            } else {
                tracing::info!(kid, "got new public key");
            }
            Ok(jwk)
        }
        None => {
            tracing::error!(kid, "failed to find key in JWKS");
            Err(JwksError::KeyNotFound {
                kid: kid.to_owned(),
            })
        }
    }
}
