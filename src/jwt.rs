//! Implementations of the JSON Web Tokens (JWT) standard
//!
//! The specifications for this standard can be found in [RFC7519][].
//!
//! Unencrypted JWTs appear as a three-part base64url-encoded string, where
//! each part is separated by a `.`. The first section is the header in JSON
//! format, providing metadata used to elect the key that verifies the
//! token. The second is the payload, carrying the claims. The third is the
//! binary signature over the first two sections.
//!
//! Nothing read from a [`Jwt`] should be trusted until the token has been
//! validated; an adversary can place arbitrary data in both the header and
//! the payload.
//!
//! [RFC7519]: https://tools.ietf.org/html/rfc7519

use std::sync::Arc;

use aliri_base64::Base64Url;
use serde_json::{Map, Value};

use crate::{error::JwtParseError, Jwk};

/// A parsed JWT in compact serialization form
///
/// The internal representation is the two decoded JSON objects, the exact
/// `header.payload` string the signature was computed over, and the raw
/// base64url signature segment. Claims are not extracted eagerly; they are
/// read from the payload on demand.
#[derive(Debug, Clone)]
pub struct Jwt {
    header: Map<String, Value>,
    payload: Map<String, Value>,
    signature_base: String,
    signature: String,
    jwk: Option<Arc<Jwk>>,
}

fn decode_object(section: &'static str, segment: &str) -> Result<Map<String, Value>, JwtParseError> {
    let raw = Base64Url::from_encoded(segment)
        .map_err(|source| JwtParseError::InvalidEncoding { section, source })?;

    let value: Value = serde_json::from_slice(raw.as_slice())
        .map_err(|source| JwtParseError::InvalidJson { section, source })?;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(JwtParseError::NotAnObject { section }),
    }
}

impl Jwt {
    /// Parses a JWT from its compact serialization
    ///
    /// The token must consist of exactly three dot-separated base64url
    /// segments. The signature segment may be empty; whether an empty
    /// signature is acceptable is the validator's decision, not the
    /// parser's.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment count is wrong, a segment is not
    /// valid base64url, or the header or payload is not a JSON object.
    pub fn parse(token: &str) -> Result<Self, JwtParseError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(JwtParseError::WrongSegmentCount {
                found: segments.len(),
            });
        }

        let header = decode_object("header", segments[0])?;
        let payload = decode_object("payload", segments[1])?;

        Ok(Self {
            header,
            payload,
            signature_base: format!("{}.{}", segments[0], segments[1]),
            signature: segments[2].to_owned(),
            jwk: None,
        })
    }

    /// The value the signature was computed over: `base64(header).base64(payload)`
    #[must_use]
    pub fn signature_base(&self) -> &str {
        &self.signature_base
    }

    /// The raw base64url signature segment, possibly empty
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The decoded token header
    #[must_use]
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// The decoded token payload
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// A single payload claim, by name
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// The number of claims in the payload
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// The `alg` declared in the token header
    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }

    /// The `kid` declared in the token header
    #[must_use]
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// The `iss` claim
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.payload.get("iss").and_then(Value::as_str)
    }

    /// The `sub` claim
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }

    /// The `aud` claim, normalized to a sequence of strings
    ///
    /// A scalar string audience yields a one-element sequence; an array
    /// yields its string-valued entries in order; any other shape yields
    /// `None`.
    #[must_use]
    pub fn audience(&self) -> Option<Vec<&str>> {
        match self.payload.get("aud") {
            Some(Value::String(aud)) => Some(vec![aud.as_str()]),
            Some(Value::Array(auds)) => {
                Some(auds.iter().filter_map(Value::as_str).collect())
            }
            _ => None,
        }
    }

    /// The `exp` claim, in seconds since the Unix epoch
    #[must_use]
    pub fn expiration(&self) -> Option<u64> {
        self.payload.get("exp").and_then(Value::as_u64)
    }

    /// The `nbf` claim, in seconds since the Unix epoch
    #[must_use]
    pub fn not_before(&self) -> Option<u64> {
        self.payload.get("nbf").and_then(Value::as_u64)
    }

    /// The key that verified this token's signature
    ///
    /// Populated by the validator on successful validation.
    #[must_use]
    pub fn jwk(&self) -> Option<&Arc<Jwk>> {
        self.jwk.as_ref()
    }

    pub(crate) fn set_jwk(&mut self, jwk: Arc<Jwk>) {
        self.jwk = Some(jwk);
    }
}
