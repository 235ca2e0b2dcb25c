//! Implementations of the JSON Web Algorithms (JWA) standard
//!
//! The specifications for this standard can be found in [RFC7518][].
//!
//! [RFC7518]: https://tools.ietf.org/html/rfc7518

use std::{fmt, str::FromStr, sync::OnceLock};

use openssl::{
    ec::{EcGroup, EcGroupRef},
    hash::MessageDigest,
    nid::Nid,
    pkey::Id,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An algorithm name outside the registry
#[derive(Debug, Clone, Error)]
#[error("unrecognized JOSE algorithm: {name}")]
pub struct UnrecognizedAlgorithm {
    /// The name that failed to parse
    pub name: String,
}

/// The family of cryptographic primitives an algorithm belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// HMAC symmetric signatures
    Hmac,
    /// RSA public/private key signatures (PKCS#1 v1.5 and PSS)
    Rsa,
    /// Elliptic curve signatures over the NIST prime curves
    Ecdsa,
    /// Edwards curve signatures
    EdDsa,
    /// No digital signature or MAC performed
    None,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Hmac => "HMAC",
            Self::Rsa => "RSA",
            Self::Ecdsa => "ECDSA",
            Self::EdDsa => "EdDSA",
            Self::None => "None",
        };

        f.write_str(s)
    }
}

/// A named ECC curve
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Curve {
    /// The P-256 curve (prime256v1/secp256r1)
    #[serde(rename = "P-256")]
    P256,

    /// The P-384 curve (secp384r1)
    #[serde(rename = "P-384")]
    P384,

    /// The P-521 curve (secp521r1)
    #[serde(rename = "P-521")]
    P521,
}

impl Curve {
    /// Returns the OpenSSL EC group corresponding to this curve.
    pub fn to_group(self) -> &'static EcGroupRef {
        static GROUPS: OnceLock<[EcGroup; 3]> = OnceLock::new();

        let [p256, p384, p521] = GROUPS.get_or_init(|| {
            let group = |nid| {
                EcGroup::from_curve_name(nid).expect("OpenSSL ships the NIST prime curves")
            };
            [
                group(Nid::X9_62_PRIME256V1),
                group(Nid::SECP384R1),
                group(Nid::SECP521R1),
            ]
        });

        match self {
            Curve::P256 => p256,
            Curve::P384 => p384,
            Curve::P521 => p521,
        }
    }

    /// The size in bytes of a single coordinate on this curve
    #[must_use]
    pub const fn coordinate_size(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }

    /// The canonical (secG) name of the curve
    #[must_use]
    pub const fn secg_name(self) -> &'static str {
        match self {
            Curve::P256 => "secp256r1",
            Curve::P384 => "secp384r1",
            Curve::P521 => "secp521r1",
        }
    }
}

/// A named Edwards curve usable with `OKP` keys
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OkpCurve {
    /// Curve25519
    Ed25519,
    /// Curve448
    Ed448,
}

impl OkpCurve {
    pub(crate) fn to_pkey_id(self) -> Id {
        match self {
            Self::Ed25519 => Id::ED25519,
            Self::Ed448 => Id::ED448,
        }
    }
}

/// The RSASSA-PSS parameters required to instantiate a verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PssParameters {
    /// The salt length in bytes
    pub salt_len: usize,
    /// The digest used by the MGF1 mask generation function
    pub mgf1_digest_len: usize,
}

/// A JOSE signing algorithm
///
/// This is a closed registry: the names recognized are exactly those the
/// validator is prepared to police. Unknown names fail to parse.
#[derive(Debug, Clone, Copy, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum Algorithm {
    /// HMAC using SHA-256
    HS256,
    /// HMAC using SHA-384
    HS384,
    /// HMAC using SHA-512
    HS512,
    /// RSASSA-PKCS1-v1_5 using SHA-256
    RS256,
    /// RSASSA-PKCS1-v1_5 using SHA-384
    RS384,
    /// RSASSA-PKCS1-v1_5 using SHA-512
    RS512,
    /// ECDSA using P-256 and SHA-256
    ES256,
    /// ECDSA using P-384 and SHA-384
    ES384,
    /// ECDSA using P-521 and SHA-512
    ES512,
    /// RSASSA-PSS using SHA-256 and MGF1 with SHA-256
    PS256,
    /// RSASSA-PSS using SHA-384 and MGF1 with SHA-384
    PS384,
    /// RSASSA-PSS using SHA-512 and MGF1 with SHA-512
    PS512,
    /// EdDSA signature over an Edwards curve
    EdDSA,
    /// No digital signature or MAC performed
    ///
    /// Recognized so that it can be named in policy, but the validator
    /// always rejects tokens that declare it.
    #[serde(rename = "none")]
    None,
}

impl Algorithm {
    /// All recognized algorithm names
    pub const ALL: [Algorithm; 14] = [
        Self::HS256,
        Self::HS384,
        Self::HS512,
        Self::RS256,
        Self::RS384,
        Self::RS512,
        Self::ES256,
        Self::ES384,
        Self::ES512,
        Self::PS256,
        Self::PS384,
        Self::PS512,
        Self::EdDSA,
        Self::None,
    ];

    /// The family of primitives this algorithm belongs to
    #[must_use]
    pub const fn family(self) -> Family {
        match self {
            Self::HS256 | Self::HS384 | Self::HS512 => Family::Hmac,
            Self::RS256 | Self::RS384 | Self::RS512 | Self::PS256 | Self::PS384 | Self::PS512 => {
                Family::Rsa
            }
            Self::ES256 | Self::ES384 | Self::ES512 => Family::Ecdsa,
            Self::EdDSA => Family::EdDsa,
            Self::None => Family::None,
        }
    }

    /// The digest underlying this algorithm, if it prehashes its input
    ///
    /// EdDSA and `none` do not use a standalone digest.
    #[must_use]
    pub fn digest(self) -> Option<MessageDigest> {
        match self {
            Self::HS256 | Self::RS256 | Self::ES256 | Self::PS256 => Some(MessageDigest::sha256()),
            Self::HS384 | Self::RS384 | Self::ES384 | Self::PS384 => Some(MessageDigest::sha384()),
            Self::HS512 | Self::RS512 | Self::ES512 | Self::PS512 => Some(MessageDigest::sha512()),
            Self::EdDSA | Self::None => None,
        }
    }

    /// The minimum acceptable key length, in bits
    #[must_use]
    pub const fn min_key_bits(self) -> u32 {
        match self {
            Self::HS256 => 256,
            Self::HS384 => 384,
            Self::HS512 => 512,
            Self::RS256 | Self::RS384 | Self::RS512 | Self::PS256 | Self::PS384 | Self::PS512 => {
                2048
            }
            Self::ES256 => 256,
            Self::ES384 => 384,
            Self::ES512 => 521,
            Self::EdDSA => 256,
            Self::None => 0,
        }
    }

    /// The ECC curve tied to this algorithm, for the ECDSA family
    #[must_use]
    pub const fn ec_curve(self) -> Option<Curve> {
        match self {
            Self::ES256 => Some(Curve::P256),
            Self::ES384 => Some(Curve::P384),
            Self::ES512 => Some(Curve::P521),
            _ => None,
        }
    }

    /// The RSASSA-PSS parameter specification, for the PSS algorithms
    #[must_use]
    pub const fn pss_parameters(self) -> Option<PssParameters> {
        match self {
            Self::PS256 => Some(PssParameters {
                salt_len: 32,
                mgf1_digest_len: 32,
            }),
            Self::PS384 => Some(PssParameters {
                salt_len: 48,
                mgf1_digest_len: 48,
            }),
            Self::PS512 => Some(PssParameters {
                salt_len: 64,
                mgf1_digest_len: 64,
            }),
            _ => None,
        }
    }
}

impl FromStr for Algorithm {
    type Err = UnrecognizedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let alg = match s {
            "HS256" => Self::HS256,
            "HS384" => Self::HS384,
            "HS512" => Self::HS512,
            "RS256" => Self::RS256,
            "RS384" => Self::RS384,
            "RS512" => Self::RS512,
            "ES256" => Self::ES256,
            "ES384" => Self::ES384,
            "ES512" => Self::ES512,
            "PS256" => Self::PS256,
            "PS384" => Self::PS384,
            "PS512" => Self::PS512,
            "EdDSA" => Self::EdDSA,
            "none" => Self::None,
            _ => {
                return Err(UnrecognizedAlgorithm {
                    name: s.to_owned(),
                })
            }
        };

        Ok(alg)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::RS512 => "RS512",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
            Self::PS256 => "PS256",
            Self::PS384 => "PS384",
            Self::PS512 => "PS512",
            Self::EdDSA => "EdDSA",
            Self::None => "none",
        };

        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_round_trips() {
        for alg in Algorithm::ALL {
            let parsed: Algorithm = alg.to_string().parse().unwrap();
            assert_eq!(parsed, alg);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("RS1024".parse::<Algorithm>().is_err());
        assert!("".parse::<Algorithm>().is_err());
        assert!("NONE".parse::<Algorithm>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        for alg in Algorithm::ALL {
            let json = serde_json::to_string(&alg).unwrap();
            assert_eq!(json, format!("\"{}\"", alg));
        }
    }

    #[test]
    fn families() {
        assert_eq!(Algorithm::HS512.family(), Family::Hmac);
        assert_eq!(Algorithm::RS256.family(), Family::Rsa);
        assert_eq!(Algorithm::PS384.family(), Family::Rsa);
        assert_eq!(Algorithm::ES512.family(), Family::Ecdsa);
        assert_eq!(Algorithm::EdDSA.family(), Family::EdDsa);
        assert_eq!(Algorithm::None.family(), Family::None);
    }

    #[test]
    fn pss_parameters_track_digest_length() {
        assert_eq!(Algorithm::PS256.pss_parameters().unwrap().salt_len, 32);
        assert_eq!(Algorithm::PS384.pss_parameters().unwrap().salt_len, 48);
        assert_eq!(Algorithm::PS512.pss_parameters().unwrap().salt_len, 64);
        assert_eq!(Algorithm::RS512.pss_parameters(), None);
    }

    #[test]
    fn es512_uses_p521() {
        let curve = Algorithm::ES512.ec_curve().unwrap();
        assert_eq!(curve, Curve::P521);
        assert_eq!(curve.coordinate_size(), 66);
        assert_eq!(curve.secg_name(), "secp521r1");
    }
}
