//! Token validation
//!
//! The validator decomposes a compact JWT, enforces the configured
//! algorithm, time, issuer, audience, and subject policies, and verifies
//! the signature against a key resolved through its key-set handler.

use std::collections::HashSet;

use aliri_base64::Base64Url;
use aliri_clock::{Clock, DurationSecs, System};

use crate::{
    error::{NoValidIssuerPatterns, TokenValidationError},
    jwa::Algorithm,
    jwks::{JwksHandler, OidcJwksHandler},
    Jwk, Jwt,
};

const DEFAULT_PERMITTED_ALGORITHMS: [Algorithm; 3] =
    [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Validates JWTs, resolving signing keys through a key-set handler
///
/// A validator owns exactly one handler for its lifetime. Its policy
/// defaults are deliberately conservative: only the RSA PKCS#1 v1.5
/// algorithms are permitted, `exp` and `nbf` are required, and no clock
/// leeway is granted.
#[derive(Debug)]
pub struct TokenValidator<H, C = System> {
    handler: H,
    permitted_algorithms: HashSet<Algorithm>,
    require_exp: bool,
    require_nbf: bool,
    time_leeway: DurationSecs,
    clock: C,
}

impl TokenValidator<OidcJwksHandler> {
    /// Constructs a validator whose keys are resolved through OpenID
    /// Connect Discovery
    ///
    /// # Errors
    ///
    /// Fails if no valid issuer pattern remains after compilation.
    pub fn from_discovery<I, S>(
        client: reqwest::Client,
        acceptable_issuer_patterns: I,
        default_jwk_cache_duration: DurationSecs,
    ) -> Result<Self, NoValidIssuerPatterns>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handler = OidcJwksHandler::new(
            client,
            acceptable_issuer_patterns,
            default_jwk_cache_duration,
        )?;
        Ok(Self::new(handler))
    }
}

impl<H> TokenValidator<H> {
    /// Constructs a validator around an existing key-set handler
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            permitted_algorithms: DEFAULT_PERMITTED_ALGORITHMS.into_iter().collect(),
            require_exp: true,
            require_nbf: true,
            time_leeway: DurationSecs(0),
            clock: System,
        }
    }
}

impl<H, C> TokenValidator<H, C> {
    /// Replaces the clock used for temporal claim checks
    pub fn with_clock<C2: Clock>(self, clock: C2) -> TokenValidator<H, C2> {
        TokenValidator {
            handler: self.handler,
            permitted_algorithms: self.permitted_algorithms,
            require_exp: self.require_exp,
            require_nbf: self.require_nbf,
            time_leeway: self.time_leeway,
            clock,
        }
    }

    /// The key-set handler backing this validator
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// A copy of the current set of permitted algorithms
    #[must_use]
    pub fn permitted_algorithms(&self) -> HashSet<Algorithm> {
        self.permitted_algorithms.clone()
    }

    /// Replaces the set of permitted algorithms
    pub fn set_permitted_algorithms(
        &mut self,
        algorithms: impl IntoIterator<Item = Algorithm>,
    ) -> &mut Self {
        self.permitted_algorithms = algorithms.into_iter().collect();
        self
    }

    /// Adds a single algorithm to the permitted set
    pub fn add_permitted_algorithm(&mut self, algorithm: Algorithm) -> &mut Self {
        self.permitted_algorithms.insert(algorithm);
        self
    }

    /// Whether tokens are required to carry an `exp` claim
    pub fn set_require_exp(&mut self, require_exp: bool) -> &mut Self {
        self.require_exp = require_exp;
        self
    }

    /// Whether tokens are required to carry an `nbf` claim
    pub fn set_require_nbf(&mut self, require_nbf: bool) -> &mut Self {
        self.require_nbf = require_nbf;
        self
    }

    /// The leeway granted on either side of the `exp` and `nbf` comparisons
    pub fn set_time_leeway_seconds(&mut self, leeway_seconds: u64) -> &mut Self {
        self.time_leeway = DurationSecs(leeway_seconds);
        self
    }
}

impl<H: JwksHandler, C: Clock> TokenValidator<H, C> {
    /// Validates a token in compact serialization form
    ///
    /// `required_audiences` lists the audiences of which the token must
    /// claim at least one. Passing `None` is a configuration error, as is
    /// an empty list unless `ignore_required_aud` is set.
    ///
    /// On success the returned token carries the JWK that verified its
    /// signature.
    ///
    /// # Errors
    ///
    /// Returns the first failed check, mapped per the crate error
    /// taxonomy. The displayed messages are intentionally coarse; log the
    /// nested source for the specific cause.
    pub async fn validate_token(
        &self,
        token: &str,
        required_audiences: Option<&[String]>,
        ignore_required_aud: bool,
    ) -> Result<Jwt, TokenValidationError> {
        let mut jwt = Jwt::parse(token).map_err(|err| {
            tracing::error!(%err, "parse of JWT failed");
            TokenValidationError::from(err)
        })?;

        let alg = self.validate_algorithm(jwt.algorithm())?;

        if jwt.payload_size() == 0 {
            tracing::error!("no payload claims found in JWT");
            return Err(TokenValidationError::Malformed(None));
        }

        let issuer = jwt.issuer().unwrap_or_default();
        self.handler
            .validate_issuer(issuer)
            .map_err(TokenValidationError::from)?;

        let kid = jwt.key_id().unwrap_or_default();
        let jwk = self.handler.find_jwk(issuer, kid).await?;

        let outcome = (|| {
            self.verify_signature(alg, &jwk, &jwt)?;

            let now = self.clock.now().0;
            self.validate_nbf(&jwt, now)?;
            self.validate_exp(&jwt, now)?;
            self.validate_aud(&jwt, required_audiences, ignore_required_aud)?;
            self.validate_sub(&jwt)
        })();

        if let Err(err) = outcome {
            tracing::info!(%alg, %err, "validation of signed JWT failed");
            return Err(err);
        }

        jwt.set_jwk(jwk);
        Ok(jwt)
    }

    fn validate_algorithm(&self, alg: Option<&str>) -> Result<Algorithm, TokenValidationError> {
        let Some(name) = alg else {
            tracing::warn!("no signature algorithm in token");
            return Err(TokenValidationError::Malformed(None));
        };

        let alg: Algorithm = name.parse().map_err(|err| {
            tracing::warn!(alg = name, "failed to parse algorithm");
            TokenValidationError::malformed(err)
        })?;

        // Unknown and unpermitted algorithms surface identically so that a
        // probe cannot distinguish the configured set.
        if !self.permitted_algorithms.contains(&alg) {
            tracing::warn!(%alg, "algorithm is not in the permitted set");
            return Err(TokenValidationError::Malformed(None));
        }

        if alg == Algorithm::None {
            return Err(TokenValidationError::AlgorithmNone);
        }

        Ok(alg)
    }

    fn verify_signature(
        &self,
        alg: Algorithm,
        jwk: &Jwk,
        jwt: &Jwt,
    ) -> Result<(), TokenValidationError> {
        if jwt.signature().is_empty() {
            tracing::warn!("no signature in token");
            return Err(TokenValidationError::Malformed(None));
        }

        let signature = match Base64Url::from_encoded(jwt.signature()) {
            Ok(sig) => sig,
            Err(err) => {
                tracing::warn!(%err, "signature verification failed");
                return Err(TokenValidationError::SignatureInvalid);
            }
        };

        match jwk.verify(alg, signature.as_slice(), jwt.signature_base().as_bytes()) {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!("signature verification failed");
                Err(TokenValidationError::SignatureInvalid)
            }
            Err(err) => {
                tracing::warn!(%err, "signature verification failed");
                Err(TokenValidationError::SignatureInvalid)
            }
        }
    }

    fn validate_nbf(&self, jwt: &Jwt, now: u64) -> Result<(), TokenValidationError> {
        if let Some(nbf) = jwt.not_before() {
            let target = now.saturating_add(self.time_leeway.0);
            if nbf > target {
                tracing::warn!(nbf, now, target, "token is not yet valid");
                return Err(TokenValidationError::NotYetValid);
            }
        } else if self.require_nbf {
            return Err(TokenValidationError::MissingClaim("nbf"));
        }

        Ok(())
    }

    fn validate_exp(&self, jwt: &Jwt, now: u64) -> Result<(), TokenValidationError> {
        if let Some(exp) = jwt.expiration() {
            let target = now.saturating_sub(self.time_leeway.0);
            if exp < target {
                tracing::warn!(exp, now, target, "token expired");
                return Err(TokenValidationError::Expired);
            }
        } else if self.require_exp {
            return Err(TokenValidationError::MissingClaim("exp"));
        }

        Ok(())
    }

    fn validate_aud(
        &self,
        jwt: &Jwt,
        required_audiences: Option<&[String]>,
        ignore_required_aud: bool,
    ) -> Result<(), TokenValidationError> {
        let Some(required) = required_audiences else {
            return Err(TokenValidationError::Configuration("required audience not set"));
        };

        if required.is_empty() {
            if ignore_required_aud {
                return Ok(());
            }
            return Err(TokenValidationError::Configuration("required audience not set"));
        }

        let Some(audiences) = jwt.audience() else {
            tracing::warn!("token does not include aud claim");
            return Err(TokenValidationError::AudienceMismatch);
        };

        let found = audiences
            .iter()
            .any(|aud| required.iter().any(|req| req == aud));
        if !found {
            tracing::warn!(
                required = ?required,
                claimed = ?audiences,
                "required audience not found in token aud claim"
            );
            return Err(TokenValidationError::AudienceMismatch);
        }

        Ok(())
    }

    fn validate_sub(&self, jwt: &Jwt) -> Result<(), TokenValidationError> {
        match jwt.subject() {
            Some(sub) if !sub.trim().is_empty() => Ok(()),
            _ => Err(TokenValidationError::MissingClaim("sub")),
        }
    }
}

#[cfg(test)]
mod tests {
    use aliri_clock::{TestClock, UnixTime};
    use openssl::{
        hash::MessageDigest,
        pkey::{PKey, Private},
        rsa::Rsa,
        sign::Signer,
    };
    use serde_json::{json, Value};

    use super::*;
    use crate::jwks::StaticJwksHandler;

    const ISSUER: &str = "https://issuer.example";
    const KID: &str = "test-key";
    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        pkey: PKey<Private>,
        validator: TokenValidator<StaticJwksHandler, TestClock>,
    }

    fn b64(bytes: &[u8]) -> String {
        Base64Url::from_raw(bytes.to_vec()).to_string()
    }

    fn fixture() -> Fixture {
        let rsa = Rsa::generate(2048).unwrap();
        let jwk = Jwk::from_value(
            u64::MAX,
            &json!({
                "kid": KID,
                "kty": "RSA",
                "use": "sig",
                "n": b64(&rsa.n().to_vec()),
                "e": b64(&rsa.e().to_vec()),
            }),
        )
        .unwrap();

        let handler = StaticJwksHandler::new();
        handler.add_key(ISSUER, jwk);

        Fixture {
            pkey: PKey::from_rsa(rsa).unwrap(),
            validator: TokenValidator::new(handler).with_clock(TestClock::new(UnixTime(NOW))),
        }
    }

    impl Fixture {
        fn sign(&self, header: &Value, payload: &Value) -> String {
            let base = format!(
                "{}.{}",
                b64(&serde_json::to_vec(header).unwrap()),
                b64(&serde_json::to_vec(payload).unwrap()),
            );
            let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey).unwrap();
            let sig = signer.sign_oneshot_to_vec(base.as_bytes()).unwrap();
            format!("{base}.{}", b64(&sig))
        }

        fn token(&self, payload: Value) -> String {
            self.sign(&json!({"alg": "RS256", "kid": KID}), &payload)
        }
    }

    fn claims() -> Value {
        json!({
            "iss": ISSUER,
            "sub": "sub",
            "aud": "aud",
            "nbf": NOW,
            "exp": NOW + 100,
        })
    }

    fn aud() -> Vec<String> {
        vec!["aud".to_owned()]
    }

    #[tokio::test]
    async fn a_good_token_validates_and_carries_its_key() {
        let f = fixture();
        let token = f.token(claims());

        let jwt = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap();

        assert_eq!(jwt.subject(), Some("sub"));
        assert_eq!(jwt.jwk().unwrap().key_id(), KID);
    }

    #[tokio::test]
    async fn default_permitted_algorithms_are_the_rsa_pkcs1_set() {
        let f = fixture();
        let algs = f.validator.permitted_algorithms();
        assert_eq!(
            algs,
            HashSet::from([Algorithm::RS256, Algorithm::RS384, Algorithm::RS512])
        );
    }

    #[tokio::test]
    async fn unpermitted_algorithm_is_malformed() {
        let mut f = fixture();
        f.validator.set_permitted_algorithms([Algorithm::RS384]);
        let token = f.token(claims());

        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[tokio::test]
    async fn unknown_algorithm_is_malformed() {
        let f = fixture();
        let token = f.sign(&json!({"alg": "RS1024", "kid": KID}), &claims());

        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[tokio::test]
    async fn alg_none_is_rejected_even_when_permitted() {
        let mut f = fixture();
        f.validator.add_permitted_algorithm(Algorithm::None);

        let header = b64(&serde_json::to_vec(&json!({"alg": "none"})).unwrap());
        let payload = b64(&serde_json::to_vec(&claims()).unwrap());
        let token = format!("{header}.{payload}.");

        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::AlgorithmNone));
    }

    #[tokio::test]
    async fn empty_payload_is_malformed() {
        let f = fixture();
        let token = f.token(json!({}));

        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[tokio::test]
    async fn unknown_issuer_fails_key_lookup() {
        let f = fixture();
        let mut payload = claims();
        payload["iss"] = json!("https://unregistered.example");
        let token = f.token(payload);

        // the static handler accepts any issuer, but holds no key for it
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::KeyNotFound(_)));
    }

    #[tokio::test]
    async fn untrusted_issuer_is_rejected() {
        let f = fixture();
        let restricted = StaticJwksHandler::with_issuers(["https://issuer\\.example"]).unwrap();
        let validator = TokenValidator::new(restricted).with_clock(TestClock::new(UnixTime(NOW)));

        let mut payload = claims();
        payload["iss"] = json!("https://other.example");
        let token = f.token(payload);

        let err = validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::UntrustedIssuer));
    }

    #[tokio::test]
    async fn tampered_signature_is_invalid() {
        let f = fixture();
        let token = f.token(claims());
        let truncated = &token[..token.len() - 2];

        let err = f
            .validator
            .validate_token(truncated, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::SignatureInvalid));
    }

    #[tokio::test]
    async fn empty_signature_is_malformed() {
        let f = fixture();
        let token = f.token(claims());
        let without_signature = &token[..=token.rfind('.').unwrap()];

        let err = f
            .validator
            .validate_token(without_signature, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Malformed(_)));
    }

    #[tokio::test]
    async fn exp_boundary_honors_leeway_exactly() {
        let mut f = fixture();
        f.validator.set_time_leeway_seconds(5);

        let mut payload = claims();
        payload["exp"] = json!(NOW - 5);
        let accepted = f.token(payload);
        assert!(f
            .validator
            .validate_token(&accepted, Some(&aud()), false)
            .await
            .is_ok());

        let mut payload = claims();
        payload["exp"] = json!(NOW - 6);
        let rejected = f.token(payload);
        let err = f
            .validator
            .validate_token(&rejected, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Expired));
    }

    #[tokio::test]
    async fn nbf_boundary_honors_leeway_exactly() {
        let mut f = fixture();
        f.validator.set_time_leeway_seconds(5);

        let mut payload = claims();
        payload["nbf"] = json!(NOW + 5);
        let accepted = f.token(payload);
        assert!(f
            .validator
            .validate_token(&accepted, Some(&aud()), false)
            .await
            .is_ok());

        let mut payload = claims();
        payload["nbf"] = json!(NOW + 6);
        let rejected = f.token(payload);
        let err = f
            .validator
            .validate_token(&rejected, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::NotYetValid));
    }

    #[tokio::test]
    async fn missing_temporal_claims_follow_the_require_flags() {
        let f = fixture();

        let mut payload = claims();
        payload.as_object_mut().unwrap().remove("exp");
        let token = f.token(payload);
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::MissingClaim("exp")));

        let mut payload = claims();
        payload.as_object_mut().unwrap().remove("nbf");
        let token = f.token(payload);
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::MissingClaim("nbf")));

        let mut f = fixture();
        f.validator.set_require_exp(false).set_require_nbf(false);
        let mut payload = claims();
        payload.as_object_mut().unwrap().remove("exp");
        payload.as_object_mut().unwrap().remove("nbf");
        let token = f.token(payload);
        assert!(f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn audience_configuration_is_enforced() {
        let f = fixture();
        let token = f.token(claims());

        let err = f.validator.validate_token(&token, None, false).await.unwrap_err();
        assert!(matches!(err, TokenValidationError::Configuration(_)));

        let err = f
            .validator
            .validate_token(&token, Some(&[]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::Configuration(_)));

        // an empty requirement is skippable only explicitly
        assert!(f
            .validator
            .validate_token(&token, Some(&[]), true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn audience_mismatch_is_rejected() {
        let f = fixture();

        let mut payload = claims();
        payload["aud"] = json!(["bad"]);
        let token = f.token(payload);
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::AudienceMismatch));

        let mut payload = claims();
        payload.as_object_mut().unwrap().remove("aud");
        let token = f.token(payload);
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::AudienceMismatch));
    }

    #[tokio::test]
    async fn missing_or_blank_subject_is_rejected() {
        let f = fixture();

        let mut payload = claims();
        payload.as_object_mut().unwrap().remove("sub");
        let token = f.token(payload);
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::MissingClaim("sub")));

        let mut payload = claims();
        payload["sub"] = json!("   ");
        let token = f.token(payload);
        let err = f
            .validator
            .validate_token(&token, Some(&aud()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TokenValidationError::MissingClaim("sub")));
    }
}
