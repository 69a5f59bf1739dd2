//! Shared-secret scheme: one HMAC-SHA256 of a fixed-order canonical string
//! keyed by the account key, base64-encoded. No key-derivation chain.

use std::collections::BTreeMap;

use base64::{prelude::BASE64_STANDARD, Engine};
use http::Method;
use ring::hmac;

use crate::config::SharedKeyCredential;

/// Vendor header prefix included in the canonical header section.
pub(crate) const VENDOR_PREFIX: &str = "x-ms-";
/// The request date rides in this header; the standard `date` slot in the
/// canonical string stays empty.
pub(crate) const DATE_HEADER: &str = "x-ms-date";
pub(crate) const VERSION_HEADER: &str = "x-ms-version";
pub(crate) const API_VERSION: &str = "2021-08-06";

/// Standard headers in their fixed canonical order. Every slot is present in
/// the string-to-sign even when empty.
const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Fixed-order string-to-sign: method, the eleven standard header values,
/// the sorted vendor-prefixed headers as `name:value` lines, then the
/// canonicalized resource.
pub(crate) fn string_to_sign(
    method: &Method,
    headers: &BTreeMap<String, String>,
    account: &str,
    path: &str,
    query: &[(String, String)],
) -> String {
    let mut out = String::new();
    out.push_str(method.as_str());
    for name in STANDARD_HEADERS {
        out.push('\n');
        let value = headers.get(name).map(String::as_str).unwrap_or("");
        // A zero content-length must canonicalize to the empty string, not
        // "0"; GET/HEAD bodies fall out of this naturally.
        if name == "content-length" && value == "0" {
            continue;
        }
        // The date slot stays empty; the timestamp is signed via the
        // vendor-prefixed date header below.
        if name == "date" {
            continue;
        }
        out.push_str(value);
    }
    for (name, value) in headers {
        if name.starts_with(VENDOR_PREFIX) {
            out.push('\n');
            out.push_str(name);
            out.push(':');
            out.push_str(value);
        }
    }
    out.push('\n');
    out.push_str(&canonicalized_resource(account, path, query));
    out
}

/// `/account/path` plus every query parameter as `\nkey:value`, keys
/// lowercased and sorted, multi-value parameters joined with `,`.
fn canonicalized_resource(account: &str, path: &str, query: &[(String, String)]) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut out = format!("/{account}{path}");

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (k, v) in query {
        params
            .entry(k.to_ascii_lowercase())
            .or_default()
            .push(v.clone());
    }
    for (k, mut values) in params {
        values.sort();
        out.push('\n');
        out.push_str(&k);
        out.push(':');
        out.push_str(&values.join(","));
    }
    out
}

/// Base64 HMAC-SHA256 signature over the string-to-sign.
pub(crate) fn sign(credential: &SharedKeyCredential, string_to_sign: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, credential.key());
    let tag = hmac::sign(&key, string_to_sign.as_bytes());
    BASE64_STANDARD.encode(tag.as_ref())
}

/// `SharedKey <account>:<signature>` Authorization value.
pub(crate) fn authorization(credential: &SharedKeyCredential, signature: &str) -> String {
    format!("SharedKey {}:{signature}", credential.account)
}
