//! Signing schemes and the canonicalization layer they share.
//!
//! Three families are supported, dispatched through the [`Credential`]
//! variant carried by the connector config: a derived-key HMAC chain, a
//! shared-secret HMAC over a fixed canonical string, and an RSA private-key
//! signature. All of them consume the byte-stable output of
//! [`canonical`]; none of them perform I/O.
//!
//! [`Credential`]: crate::config::Credential

pub mod canonical;
pub(crate) mod derived_hmac;
pub mod rsa_key;
pub(crate) mod shared_key;

pub use canonical::{canonical_request, SigningContext, UNSIGNED_PAYLOAD};
pub use rsa_key::SignatureEncoding;
