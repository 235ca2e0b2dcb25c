//! OpenID Connect discovery metadata
//!
//! The discovery document is specified by [OpenID Connect Discovery 1.0][].
//! The response is retained as parsed JSON and fields are extracted on
//! demand; only `jwks_uri` is consumed by this crate, but the remaining
//! documented metadata is exposed for callers that want it.
//!
//! [OpenID Connect Discovery 1.0]: https://openid.net/specs/openid-connect-discovery-1_0.html

use serde_json::{Map, Value};

use crate::cache::Expires;

/// The data returned in an OpenID Connect discovery response
#[derive(Debug, Clone)]
pub struct DiscoveryData {
    expires_at_ms: u64,
    json: Map<String, Value>,
}

impl DiscoveryData {
    /// Wraps a discovery response body with its computed expiry
    ///
    /// `expires_at_ms` is the absolute time, in milliseconds since the Unix
    /// epoch, at which this document should be discarded, derived from the
    /// response's `Cache-Control` headers.
    pub fn new(expires_at_ms: u64, json: Map<String, Value>) -> Self {
        Self {
            expires_at_ms,
            json,
        }
    }

    /// The absolute expiry of this document, in milliseconds since the Unix epoch
    #[must_use]
    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// A raw value from the response, by key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.json.get(key)
    }

    fn string(&self, key: &str) -> Option<&str> {
        self.json.get(key).and_then(Value::as_str)
    }

    fn array(&self, key: &str) -> Option<&[Value]> {
        self.json.get(key).and_then(Value::as_array).map(Vec::as_slice)
    }

    /// The issuer identifier the provider asserts for itself
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.string("issuer")
    }

    /// URL of the provider's OAuth 2.0 authorization endpoint
    #[must_use]
    pub fn authorization_endpoint(&self) -> Option<&str> {
        self.string("authorization_endpoint")
    }

    /// URL of the provider's OAuth 2.0 token endpoint
    #[must_use]
    pub fn token_endpoint(&self) -> Option<&str> {
        self.string("token_endpoint")
    }

    /// URL of the provider's UserInfo endpoint
    #[must_use]
    pub fn userinfo_endpoint(&self) -> Option<&str> {
        self.string("userinfo_endpoint")
    }

    /// URL of the provider's JSON Web Key Set document
    ///
    /// This is the only member the token validation pipeline consumes.
    #[must_use]
    pub fn jwks_uri(&self) -> Option<&str> {
        self.string("jwks_uri")
    }

    /// URL of the provider's dynamic client registration endpoint
    #[must_use]
    pub fn registration_endpoint(&self) -> Option<&str> {
        self.string("registration_endpoint")
    }

    /// The OAuth 2.0 scope values the provider supports
    #[must_use]
    pub fn scopes_supported(&self) -> Option<&[Value]> {
        self.array("scopes_supported")
    }

    /// The OAuth 2.0 `response_type` values the provider supports
    #[must_use]
    pub fn response_types_supported(&self) -> Option<&[Value]> {
        self.array("response_types_supported")
    }

    /// The OAuth 2.0 `response_mode` values the provider supports
    #[must_use]
    pub fn response_modes_supported(&self) -> Option<&[Value]> {
        self.array("response_modes_supported")
    }

    /// The OAuth 2.0 grant type values the provider supports
    #[must_use]
    pub fn grant_types_supported(&self) -> Option<&[Value]> {
        self.array("grant_types_supported")
    }

    /// The authentication context class references the provider supports
    #[must_use]
    pub fn acr_values_supported(&self) -> Option<&[Value]> {
        self.array("acr_values_supported")
    }

    /// The subject identifier types the provider supports
    #[must_use]
    pub fn subject_types_supported(&self) -> Option<&[Value]> {
        self.array("subject_types_supported")
    }

    /// The JWS signing algorithms the provider supports for ID tokens
    #[must_use]
    pub fn id_token_signing_alg_values_supported(&self) -> Option<&[Value]> {
        self.array("id_token_signing_alg_values_supported")
    }
}

impl Expires for DiscoveryData {
    fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> DiscoveryData {
        let doc = json!({
            "issuer": "https://issuer.example",
            "jwks_uri": "https://issuer.example/jwks",
            "token_endpoint": "https://issuer.example/token",
            "authorization_endpoint": "https://issuer.example/authorize",
            "subject_types_supported": ["public"],
            "response_types_supported": ["code", "id_token"],
            "id_token_signing_alg_values_supported": ["RS256", "ES256"],
        });

        let Value::Object(map) = doc else { unreachable!() };
        DiscoveryData::new(1_000, map)
    }

    #[test]
    fn present_fields_are_returned() {
        let dd = sample();
        assert_eq!(dd.issuer(), Some("https://issuer.example"));
        assert_eq!(dd.jwks_uri(), Some("https://issuer.example/jwks"));
        assert_eq!(dd.token_endpoint(), Some("https://issuer.example/token"));
        assert_eq!(
            dd.authorization_endpoint(),
            Some("https://issuer.example/authorize")
        );
        assert_eq!(dd.subject_types_supported().unwrap().len(), 1);
        assert_eq!(dd.response_types_supported().unwrap().len(), 2);
        assert_eq!(
            dd.id_token_signing_alg_values_supported().unwrap()[0],
            json!("RS256")
        );
        assert_eq!(dd.expires_at_ms(), 1_000);
    }

    #[test]
    fn absent_fields_are_none() {
        let dd = sample();
        assert_eq!(dd.userinfo_endpoint(), None);
        assert_eq!(dd.registration_endpoint(), None);
        assert_eq!(dd.scopes_supported(), None);
        assert_eq!(dd.get("end_session_endpoint"), None);
    }
}
