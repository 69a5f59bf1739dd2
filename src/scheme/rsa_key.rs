//! Asymmetric scheme: same canonical request and string-to-sign shape as the
//! derived-key scheme, but the final step is RSA-SHA256 over a
//! service-account private key instead of an HMAC chain.

use base64::{prelude::BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use ring::{rand::SystemRandom, signature::RSA_PKCS1_SHA256};

use crate::{
    config::RsaKeyCredential,
    error::Error,
    scheme::canonical::{format_date_stamp, format_timestamp, hex_encode, sha256_hex},
};

pub(crate) const ALGORITHM: &str = "GOOG4-RSA-SHA256";
const SCOPE_SUFFIX: &str = "goog4_request";

/// Header-carried signatures use base64; query-embedded (presigned URL)
/// signatures use hex. The choice belongs to the call site, not the scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Hex,
    Base64,
}

pub(crate) fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{date_stamp}/{region}/{service}/{SCOPE_SUFFIX}")
}

pub(crate) fn string_to_sign(
    timestamp: &DateTime<Utc>,
    scope: &str,
    canonical_request: &str,
) -> String {
    format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        format_timestamp(timestamp),
        sha256_hex(canonical_request.as_bytes()),
    )
}

/// RSA-PKCS1-SHA256 signature over a canonical request, plus the scope. The
/// key was validated at construction, so a signing failure here is a real
/// runtime fault, not bad configuration.
pub(crate) fn sign(
    credential: &RsaKeyCredential,
    timestamp: &DateTime<Utc>,
    region: &str,
    service: &str,
    canonical_request: &str,
    encoding: SignatureEncoding,
) -> Result<(String, String), Error> {
    let date_stamp = format_date_stamp(timestamp);
    let scope = credential_scope(&date_stamp, region, service);
    let sts = string_to_sign(timestamp, &scope, canonical_request);

    let key_pair = credential.key_pair();
    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &RSA_PKCS1_SHA256,
            &SystemRandom::new(),
            sts.as_bytes(),
            &mut signature,
        )
        .map_err(|e| Error::protocol(format!("RSA signing failed: {e}")))?;

    let encoded = match encoding {
        SignatureEncoding::Hex => hex_encode(&signature),
        SignatureEncoding::Base64 => BASE64_STANDARD.encode(&signature),
    };
    Ok((encoded, scope))
}
