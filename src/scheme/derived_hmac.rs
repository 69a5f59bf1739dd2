//! Derived-key symmetric scheme: a four-stage HMAC chain narrows the
//! long-lived secret into a key bound to one date/region/service scope, then
//! a final HMAC over the string-to-sign produces the hex signature.

use chrono::{DateTime, Utc};
use ring::hmac;

use crate::{
    config::DerivedHmacCredential,
    scheme::canonical::{format_date_stamp, format_timestamp, hex_encode, sha256_hex},
};

pub(crate) const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const KEY_PREFIX: &str = "AWS4";
const SCOPE_SUFFIX: &str = "aws4_request";

/// `date/region/service/aws4_request`, binding a signature to its scope so
/// it cannot be replayed outside that context.
pub(crate) fn credential_scope(date_stamp: &str, region: &str, service: &str) -> String {
    format!("{date_stamp}/{region}/{service}/{SCOPE_SUFFIX}")
}

/// String-to-sign: algorithm, timestamp, scope, and the hex SHA-256 of the
/// canonical request, newline-joined.
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

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data).as_ref().to_vec()
}

/// The key chain. Re-derived per request: the first stage consumes the date
/// stamp, so a cached key would go stale (and silently wrong) at midnight UTC.
pub(crate) fn signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("{KEY_PREFIX}{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, SCOPE_SUFFIX.as_bytes())
}

/// Hex signature over a canonical request, plus the scope it was computed
/// under.
pub(crate) fn sign(
    credential: &DerivedHmacCredential,
    timestamp: &DateTime<Utc>,
    region: &str,
    service: &str,
    canonical_request: &str,
) -> (String, String) {
    let date_stamp = format_date_stamp(timestamp);
    let scope = credential_scope(&date_stamp, region, service);
    let sts = string_to_sign(timestamp, &scope, canonical_request);
    let key = signing_key(&credential.secret_key, &date_stamp, region, service);
    (hex_encode(&hmac_sha256(&key, sts.as_bytes())), scope)
}
