//! Shared support for the end-to-end validation tests: per-algorithm key
//! generation, JWK serialization, and compact token signing.

#![allow(dead_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use aliri_base64::Base64Url;
use openssl::{
    bn::{BigNum, BigNumContext},
    ec::EcKey,
    ecdsa::EcdsaSig,
    hash::hash,
    pkey::{PKey, Private},
    rsa::{Padding, Rsa},
    sign::{RsaPssSaltlen, Signer},
};
use serde_json::{json, Value};
use tokenvet::jwa::{Algorithm, Curve, Family};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub fn b64(bytes: &[u8]) -> String {
    Base64Url::from_raw(bytes.to_vec()).to_string()
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

enum SigningKey {
    Rsa(PKey<Private>),
    EllipticCurve { curve: Curve, key: EcKey<Private> },
    Ed25519(PKey<Private>),
}

/// A signing keypair for one algorithm, able to publish its public half as
/// a JWK and to sign compact tokens
pub struct KeyPair {
    pub kid: String,
    pub alg: Algorithm,
    key: SigningKey,
}

impl KeyPair {
    pub fn generate(alg: Algorithm, kid: &str) -> Self {
        let key = match alg.family() {
            Family::Rsa => {
                let rsa = Rsa::generate(2048).unwrap();
                SigningKey::Rsa(PKey::from_rsa(rsa).unwrap())
            }
            Family::Ecdsa => {
                let curve = alg.ec_curve().unwrap();
                SigningKey::EllipticCurve {
                    curve,
                    key: EcKey::generate(curve.to_group()).unwrap(),
                }
            }
            Family::EdDsa => SigningKey::Ed25519(PKey::generate_ed25519().unwrap()),
            Family::None | Family::Hmac => panic!("{alg} has no JWKS-served key"),
        };

        Self {
            kid: kid.to_owned(),
            alg,
            key,
        }
    }

    pub fn public_jwk(&self) -> Value {
        match &self.key {
            SigningKey::Rsa(pkey) => {
                let rsa = pkey.rsa().unwrap();
                json!({
                    "kid": self.kid,
                    "kty": "RSA",
                    "use": "sig",
                    "n": b64(&rsa.n().to_vec()),
                    "e": b64(&rsa.e().to_vec()),
                })
            }
            SigningKey::EllipticCurve { curve, key } => {
                let mut ctx = BigNumContext::new().unwrap();
                let mut x = BigNum::new().unwrap();
                let mut y = BigNum::new().unwrap();
                key.public_key()
                    .affine_coordinates_gfp(curve.to_group(), &mut x, &mut y, &mut ctx)
                    .unwrap();

                let size = curve.coordinate_size() as i32;
                json!({
                    "kid": self.kid,
                    "kty": "EC",
                    "use": "sig",
                    "crv": match curve {
                        Curve::P256 => "P-256",
                        Curve::P384 => "P-384",
                        Curve::P521 => "P-521",
                    },
                    "x": b64(&x.to_vec_padded(size).unwrap()),
                    "y": b64(&y.to_vec_padded(size).unwrap()),
                })
            }
            SigningKey::Ed25519(pkey) => json!({
                "kid": self.kid,
                "kty": "OKP",
                "use": "sig",
                "crv": "Ed25519",
                "x": b64(&pkey.raw_public_key().unwrap()),
            }),
        }
    }

    fn raw_signature(&self, data: &[u8]) -> Vec<u8> {
        match &self.key {
            SigningKey::Rsa(pkey) => {
                let md = self.alg.digest().unwrap();
                let mut signer = Signer::new(md, pkey).unwrap();
                if let Some(pss) = self.alg.pss_parameters() {
                    signer.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
                    signer
                        .set_rsa_pss_saltlen(RsaPssSaltlen::custom(pss.salt_len as i32))
                        .unwrap();
                    signer.set_rsa_mgf1_md(md).unwrap();
                }
                signer.sign_oneshot_to_vec(data).unwrap()
            }
            SigningKey::EllipticCurve { curve, key } => {
                let digest = hash(self.alg.digest().unwrap(), data).unwrap();
                let sig = EcdsaSig::sign(&digest, key).unwrap();

                // JOSE wants the fixed-width r‖s form, not DER
                let size = curve.coordinate_size() as i32;
                let mut out = sig.r().to_vec_padded(size).unwrap();
                out.extend(sig.s().to_vec_padded(size).unwrap());
                out
            }
            SigningKey::Ed25519(pkey) => {
                let mut signer = Signer::new_without_digest(pkey).unwrap();
                signer.sign_oneshot_to_vec(data).unwrap()
            }
        }
    }

    pub fn sign_with_header(&self, header: &Value, claims: &Value) -> String {
        let base = format!(
            "{}.{}",
            b64(&serde_json::to_vec(header).unwrap()),
            b64(&serde_json::to_vec(claims).unwrap()),
        );
        let signature = b64(&self.raw_signature(base.as_bytes()));
        format!("{base}.{signature}")
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_header(
            &json!({"alg": self.alg.to_string(), "kid": self.kid}),
            claims,
        )
    }
}

/// A wiremock-backed issuer serving a discovery document and a key set
pub struct TestIssuer {
    pub server: MockServer,
    pub issuer: String,
}

impl TestIssuer {
    pub async fn start(keys: &[&KeyPair]) -> Self {
        let server = MockServer::start().await;
        let port = server.address().port();
        let issuer = format!("http://localhost:{port}/bob");

        Mock::given(method("GET"))
            .and(path("/bob/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "jwks_uri": format!("http://localhost:{port}/jwks"),
            })))
            .mount(&server)
            .await;

        let jwks: Vec<Value> = keys.iter().map(|k| k.public_jwk()).collect();
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": jwks })))
            .mount(&server)
            .await;

        Self { server, issuer }
    }
}
