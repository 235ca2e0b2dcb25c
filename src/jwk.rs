//! Implementations of the JSON Web Keys (JWK) standard
//!
//! The specifications for JSON Web Keys can be found in [RFC7517][].
//!
//! Only public signing keys are modeled. A [`Jwk`] is constructed from the
//! JSON member of a JWKS response together with the absolute expiry computed
//! from that response's HTTP caching headers, and is immutable thereafter.
//!
//! [RFC7517]: https://tools.ietf.org/html/rfc7517

use std::fmt;

use aliri_base64::Base64Url;
use openssl::{
    bn::BigNum,
    ec::EcKey,
    ecdsa::EcdsaSig,
    hash::hash,
    pkey::{PKey, Public},
    rsa::{Padding, Rsa},
    sign::{RsaPssSaltlen, Verifier},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    cache::Expires,
    error::KeyError,
    jwa::{Algorithm, Curve, Family, OkpCurve},
};

/// An identified JSON Web Key with an expiry
#[must_use]
pub struct Jwk {
    kid: String,
    usage: Option<String>,
    key: PublicKey,
    expires_at_ms: u64,
}

enum PublicKey {
    Rsa(PKey<Public>),
    EllipticCurve { curve: Curve, key: EcKey<Public> },
    Okp { curve: OkpCurve, key: PKey<Public> },
}

#[derive(Debug, Deserialize)]
struct JwkDto {
    #[serde(default)]
    kid: Option<String>,

    #[serde(rename = "use", default)]
    usage: Option<String>,

    #[serde(default)]
    alg: Option<String>,

    #[serde(default)]
    kty: Option<String>,

    #[serde(default)]
    n: Option<Base64Url>,

    #[serde(default)]
    e: Option<Base64Url>,

    #[serde(default)]
    crv: Option<String>,

    #[serde(default)]
    x: Option<Base64Url>,

    #[serde(default)]
    y: Option<Base64Url>,
}

fn has_value(s: &Option<String>) -> bool {
    s.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn material<'a>(field: &'a Option<Base64Url>) -> Option<&'a [u8]> {
    field
        .as_ref()
        .map(|b| b.as_slice())
        .filter(|b| !b.is_empty())
}

fn check_alg_family(dto: &JwkDto, required: Family, kty: &str) -> Result<(), KeyError> {
    // From RFC 7515 alg is optional on a key. When present it must at
    // least belong to the same family as the key type.
    if let Some(alg) = dto.alg.as_deref().filter(|a| !a.trim().is_empty()) {
        let alg: Algorithm = alg.parse()?;
        if alg.family() != required {
            tracing::warn!(%alg, kty, "algorithm does not match key type");
            return Err(KeyError::AlgorithmMismatch {
                alg,
                kty: kty.to_owned(),
            });
        }
    }
    Ok(())
}

impl Jwk {
    /// Constructs a JWK from the JSON member of a key set response
    ///
    /// `expires_at_ms` is the absolute time, in milliseconds since the Unix
    /// epoch, at which this key should be discarded; it is derived from the
    /// `Cache-Control` headers of the response that carried the key.
    ///
    /// # Errors
    ///
    /// Returns an error if `kid` or `kty` is absent or blank, the key type
    /// is unrecognized, a declared `alg` is unknown or belongs to a
    /// different family than the key type, required public key material is
    /// missing, or the material is rejected by the cryptography provider.
    pub fn from_value(expires_at_ms: u64, json: &Value) -> Result<Self, KeyError> {
        let dto: JwkDto = serde_json::from_value(json.clone())?;

        if !has_value(&dto.kid) {
            return Err(KeyError::MissingKeyId);
        }

        if !has_value(&dto.kty) {
            return Err(KeyError::MissingKeyType);
        }

        let kty = dto.kty.as_deref().unwrap_or_default();
        let key = match kty {
            "RSA" | "RSASSA" => {
                check_alg_family(&dto, Family::Rsa, kty)?;
                Self::rsa_key(&dto)?
            }
            "EC" => {
                check_alg_family(&dto, Family::Ecdsa, kty)?;
                Self::ec_key(&dto)?
            }
            "OKP" => {
                check_alg_family(&dto, Family::EdDsa, kty)?;
                Self::okp_key(&dto)?
            }
            other => {
                return Err(KeyError::UnsupportedKeyType {
                    kty: other.to_owned(),
                })
            }
        };

        Ok(Self {
            kid: dto.kid.unwrap_or_default(),
            usage: dto.usage,
            key,
            expires_at_ms,
        })
    }

    fn rsa_key(dto: &JwkDto) -> Result<PublicKey, KeyError> {
        let (n, e) = match (material(&dto.n), material(&dto.e)) {
            (Some(n), Some(e)) => (n, e),
            _ => return Err(KeyError::IncompleteKey { kty: "RSA" }),
        };

        let rsa = Rsa::from_public_components(BigNum::from_slice(n)?, BigNum::from_slice(e)?)?;

        Ok(PublicKey::Rsa(PKey::from_rsa(rsa)?))
    }

    fn ec_key(dto: &JwkDto) -> Result<PublicKey, KeyError> {
        let curve = match dto.crv.as_deref() {
            Some("P-256") => Curve::P256,
            Some("P-384") => Curve::P384,
            Some("P-521") => Curve::P521,
            Some(other) if !other.trim().is_empty() => {
                return Err(KeyError::UnsupportedCurve {
                    crv: other.to_owned(),
                })
            }
            _ => return Err(KeyError::IncompleteKey { kty: "EC" }),
        };

        let (x, y) = match (material(&dto.x), material(&dto.y)) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(KeyError::IncompleteKey { kty: "EC" }),
        };

        let key = EcKey::from_public_key_affine_coordinates(
            curve.to_group(),
            &*BigNum::from_slice(x)?,
            &*BigNum::from_slice(y)?,
        )?;

        Ok(PublicKey::EllipticCurve { curve, key })
    }

    fn okp_key(dto: &JwkDto) -> Result<PublicKey, KeyError> {
        let curve = match dto.crv.as_deref() {
            Some("Ed25519") => OkpCurve::Ed25519,
            Some("Ed448") => OkpCurve::Ed448,
            Some(other) if !other.trim().is_empty() => {
                return Err(KeyError::UnsupportedCurve {
                    crv: other.to_owned(),
                })
            }
            _ => return Err(KeyError::IncompleteKey { kty: "OKP" }),
        };

        let x = material(&dto.x).ok_or(KeyError::IncompleteKey { kty: "OKP" })?;

        let key = PKey::public_key_from_raw_bytes(x, curve.to_pkey_id())?;

        Ok(PublicKey::Okp { curve, key })
    }

    /// The key identifier
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// The `use` member of the JWK, if present
    ///
    /// This should be `sig` for every key this crate consumes, but its
    /// presence is optional and it is not enforced.
    #[must_use]
    pub fn usage(&self) -> Option<&str> {
        self.usage.as_deref()
    }

    /// The key type of the underlying material
    #[must_use]
    pub fn key_type(&self) -> &'static str {
        match self.key {
            PublicKey::Rsa(_) => "RSA",
            PublicKey::EllipticCurve { .. } => "EC",
            PublicKey::Okp { .. } => "OKP",
        }
    }

    /// The absolute expiry of this key, in milliseconds since the Unix epoch
    #[must_use]
    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// Verifies `signature` over `data` under this key
    ///
    /// The algorithm descriptor selects the verification primitive and any
    /// parameters it requires (PSS salt length and MGF1 digest). ECDSA
    /// signatures are expected in the fixed-width `r‖s` form used by JOSE,
    /// not DER.
    ///
    /// Returns `Ok(true)` iff the signature is valid for this key over the
    /// data.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm family is incompatible with the
    /// key material or the cryptography provider rejects the operation.
    pub fn verify(
        &self,
        alg: Algorithm,
        signature: &[u8],
        data: &[u8],
    ) -> Result<bool, KeyError> {
        let incompatible = || KeyError::AlgorithmMismatch {
            alg,
            kty: self.key_type().to_owned(),
        };

        match (&self.key, alg.family()) {
            (PublicKey::Rsa(pkey), Family::Rsa) => {
                let md = alg.digest().ok_or_else(incompatible)?;
                let mut verifier = Verifier::new(md, pkey)?;
                if let Some(pss) = alg.pss_parameters() {
                    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::custom(pss.salt_len as i32))?;
                    verifier.set_rsa_mgf1_md(md)?;
                }
                verifier.update(data)?;
                Ok(verifier.verify(signature)?)
            }
            (PublicKey::EllipticCurve { curve, key }, Family::Ecdsa) => {
                let expected = alg.ec_curve().ok_or_else(incompatible)?;
                let md = alg.digest().ok_or_else(incompatible)?;

                let coordinate_size = expected.coordinate_size();
                if expected != *curve || signature.len() != coordinate_size * 2 {
                    return Ok(false);
                }

                let (r, s) = signature.split_at(coordinate_size);
                let sig =
                    EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;

                let digest = hash(md, data)?;

                Ok(sig.verify(&digest, key)?)
            }
            (PublicKey::Okp { key, .. }, Family::EdDsa) => {
                let mut verifier = Verifier::new_without_digest(key)?;
                Ok(verifier.verify_oneshot(signature, data)?)
            }
            _ => Err(incompatible()),
        }
    }
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("Jwk");
        s.field("kid", &self.kid)
            .field("kty", &self.key_type())
            .field("expires_at_ms", &self.expires_at_ms);
        if let PublicKey::EllipticCurve { curve, .. } = &self.key {
            s.field("crv", curve);
        }
        if let PublicKey::Okp { curve, .. } = &self.key {
            s.field("crv", curve);
        }
        s.finish_non_exhaustive()
    }
}

impl Expires for Jwk {
    fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }
}
