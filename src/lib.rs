//! Validation of JSON Web Tokens signed by trusted OpenID Connect issuers,
//! covering:
//!
//! * JSON Web Signature (JWS): [RFC7515][]
//! * JSON Web Key (JWK): [RFC7517][]
//! * JSON Web Algorithms (JWA): [RFC7518][]
//! * JSON Web Token (JWT): [RFC7519][]
//! * OpenID Connect Discovery 1.0: [openid-connect-discovery-1_0][]
//!
//! Signing keys are located asynchronously: the token's issuer is checked
//! against a configured allow-list, its discovery document is fetched and
//! mined for a `jwks_uri`, and the key set behind that URI is fetched and
//! cached per its HTTP caching headers. Concurrent requests for the same
//! document or key are collapsed into a single upstream fetch.
//!
//! JSON Web Encryption (JWE), [RFC7516][], is not supported.
//!
//! [RFC7515]: https://tools.ietf.org/html/rfc7515
//! [RFC7516]: https://tools.ietf.org/html/rfc7516
//! [RFC7517]: https://tools.ietf.org/html/rfc7517
//! [RFC7518]: https://tools.ietf.org/html/rfc7518
//! [RFC7519]: https://tools.ietf.org/html/rfc7519
//! [openid-connect-discovery-1_0]: https://openid.net/specs/openid-connect-discovery-1_0.html
//!
//! # Example
//!
//! ```no_run
//! use aliri_clock::DurationSecs;
//! use tokenvet::TokenValidator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut validator = TokenValidator::from_discovery(
//!     reqwest::Client::new(),
//!     ["https://issuer\\.example(/.*)?"],
//!     DurationSecs(60),
//! )?;
//!
//! validator
//!     .add_permitted_algorithm(tokenvet::jwa::Algorithm::ES256)
//!     .set_time_leeway_seconds(5);
//!
//! let audiences = vec![String::from("my_api")];
//! let token = validator
//!     .validate_token("eyJhb…", Some(&audiences), false)
//!     .await?;
//!
//! println!("authenticated subject: {:?}", token.subject());
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod cache;
pub mod error;
pub mod jwa;
mod jwk;
pub mod jwks;
mod jwt;
pub mod oidc;
mod validator;

#[doc(inline)]
pub use jwk::Jwk;
#[doc(inline)]
pub use jwks::{JwksHandler, OidcJwksHandler, StaticJwksHandler};
#[doc(inline)]
pub use jwt::Jwt;
#[doc(inline)]
pub use validator::TokenValidator;
