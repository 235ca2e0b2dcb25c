//! Common errors

use std::sync::Arc;

use thiserror::Error;

/// The compact serialization could not be decomposed into a JWT
#[derive(Debug, Error)]
pub enum JwtParseError {
    /// The token did not have the expected number of dot-separated segments
    #[error("expected 3 dot-separated segments, found {found}")]
    WrongSegmentCount {
        /// The number of segments found
        found: usize,
    },

    /// A segment was not valid base64url data
    #[error("JWT {section} segment is not valid base64url")]
    InvalidEncoding {
        /// The offending segment
        section: &'static str,
        /// The underlying decoding failure
        #[source]
        source: aliri_base64::InvalidBase64Data,
    },

    /// A segment did not decode to valid JSON
    #[error("JWT {section} is not valid JSON")]
    InvalidJson {
        /// The offending segment
        section: &'static str,
        /// The underlying parse failure
        #[source]
        source: serde_json::Error,
    },

    /// A segment decoded to JSON that was not an object
    #[error("JWT {section} is not a JSON object")]
    NotAnObject {
        /// The offending segment
        section: &'static str,
    },
}

/// The JSON Web Key was rejected during construction or use
#[derive(Debug, Error)]
pub enum KeyError {
    /// The `kid` member was absent or blank
    #[error("key ID (kid) not specified in JWK")]
    MissingKeyId,

    /// The `kty` member was absent or blank
    #[error("key type (kty) not specified in JWK")]
    MissingKeyType,

    /// The `kty` member was not a recognized key type
    #[error("unsupported key type: {kty}")]
    UnsupportedKeyType {
        /// The unrecognized key type
        kty: String,
    },

    /// The JWK was not shaped like a key object
    #[error("JWK is not a valid key object")]
    InvalidShape(#[from] serde_json::Error),

    /// The JWK `alg` member was not a known algorithm
    #[error("unrecognized JOSE algorithm: {name}")]
    UnknownAlgorithm {
        /// The unrecognized algorithm name
        name: String,
    },

    /// The JWK `alg` member belongs to a different family than the key type
    #[error("algorithm ({alg}) does not match key type ({kty})")]
    AlgorithmMismatch {
        /// The declared algorithm
        alg: crate::jwa::Algorithm,
        /// The declared key type
        kty: String,
    },

    /// Required public key material was absent for the declared key type
    #[error("JWK does not contain a valid {kty} public key")]
    IncompleteKey {
        /// The key type lacking its material
        kty: &'static str,
    },

    /// The named curve is not usable with the declared key type
    #[error("JWK specifies unsupported curve: {crv}")]
    UnsupportedCurve {
        /// The unsupported curve name
        crv: String,
    },

    /// The key material was rejected by the cryptography provider
    #[error("key rejected")]
    Rejected(#[from] openssl::error::ErrorStack),
}

impl From<crate::jwa::UnrecognizedAlgorithm> for KeyError {
    fn from(err: crate::jwa::UnrecognizedAlgorithm) -> Self {
        Self::UnknownAlgorithm { name: err.name }
    }
}

/// Key acquisition failed
///
/// These errors are broadcast to every awaiter of a single-flight cache
/// entry, so the type is cheaply cloneable.
#[derive(Debug, Clone, Error)]
pub enum JwksError {
    /// The issuer did not match the configured allow-list
    #[error("issuer '{issuer}' is not trusted")]
    UntrustedIssuer {
        /// The rejected issuer
        issuer: String,
    },

    /// The discovery document carried no usable `jwks_uri`
    #[error("discovery document does not contain jwks_uri")]
    MissingJwksUri,

    /// A discovery or JWKS URL failed to parse
    #[error("'{url}' is not a valid URL")]
    InvalidUrl {
        /// The malformed URL
        url: String,
    },

    /// The outbound request could not be completed
    #[error("request to {url} failed")]
    RequestFailed {
        /// The URL that was requested
        url: String,
        /// The underlying transport failure
        #[source]
        source: Arc<reqwest::Error>,
    },

    /// The upstream responded with a non-2xx status
    #[error("request to {url} returned {status}")]
    UpstreamStatus {
        /// The URL that was requested
        url: String,
        /// The response status code
        status: u16,
    },

    /// The upstream response body was not a JSON object
    #[error("response from {url} was not a JSON object")]
    InvalidResponseBody {
        /// The URL that was requested
        url: String,
    },

    /// The key set did not contain the requested key
    #[error("failed to find key '{kid}'")]
    KeyNotFound {
        /// The key ID that was sought
        kid: String,
    },

    /// The in-flight key lookup was abandoned before it resolved
    #[error("key lookup was aborted")]
    LookupAborted,
}

impl From<crate::cache::LoaderAborted> for JwksError {
    fn from(_: crate::cache::LoaderAborted) -> Self {
        Self::LookupAborted
    }
}

/// No valid issuer pattern remained after compilation
#[derive(Debug, Error)]
#[error("acceptable issuer regular expressions must be provided")]
pub struct NoValidIssuerPatterns {
    _p: (),
}

pub(crate) const fn no_valid_issuer_patterns() -> NoValidIssuerPatterns {
    NoValidIssuerPatterns { _p: () }
}

/// A token was rejected by the validator
///
/// The displayed messages are intentionally coarse so that they can be
/// returned to remote callers without disclosing validator configuration;
/// the nested source carries the specific cause for local logging.
#[derive(Debug, Error)]
pub enum TokenValidationError {
    /// The token structure, encoding, JSON shape, or declared algorithm
    /// was unacceptable
    #[error("parse of signed JWT failed")]
    Malformed(#[source] Option<Box<dyn std::error::Error + Send + Sync + 'static>>),

    /// The token declared `alg: none`
    #[error("algorithm \"none\" not allowed")]
    AlgorithmNone,

    /// The token issuer did not match the configured allow-list
    #[error("token issuer is not trusted")]
    UntrustedIssuer,

    /// Key material could not be retrieved from the upstream authority
    #[error("unable to retrieve key material")]
    Upstream(#[source] JwksError),

    /// No key matching the token header was available
    #[error("no matching key found to validate JWT")]
    KeyNotFound(#[source] JwksError),

    /// The signature did not verify under the resolved key
    #[error("signature verification failed")]
    SignatureInvalid,

    /// A required claim was absent
    #[error("required {0} claim missing")]
    MissingClaim(&'static str),

    /// The token `nbf` claim lies in the future
    #[error("token is not yet valid")]
    NotYetValid,

    /// The token `exp` claim lies in the past
    #[error("token expired")]
    Expired,

    /// The token audience shares no member with the required audiences
    #[error("required audience not found in token")]
    AudienceMismatch,

    /// The validator was invoked or constructed with an invalid configuration
    #[error("validator configuration invalid: {0}")]
    Configuration(&'static str),
}

impl TokenValidationError {
    pub(crate) fn malformed(
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self::Malformed(Some(source.into()))
    }
}

impl From<JwtParseError> for TokenValidationError {
    fn from(err: JwtParseError) -> Self {
        Self::malformed(err)
    }
}

impl From<JwksError> for TokenValidationError {
    fn from(err: JwksError) -> Self {
        match err {
            JwksError::UntrustedIssuer { .. } => Self::UntrustedIssuer,
            JwksError::KeyNotFound { .. } => Self::KeyNotFound(err),
            JwksError::MissingJwksUri
            | JwksError::InvalidUrl { .. }
            | JwksError::InvalidResponseBody { .. } => Self::malformed(err),
            JwksError::RequestFailed { .. }
            | JwksError::UpstreamStatus { .. }
            | JwksError::LookupAborted => Self::Upstream(err),
        }
    }
}
