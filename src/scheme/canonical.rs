//! Byte-stable canonical request assembly.
//!
//! Correctness of every signature in this crate depends on reproducing these
//! strings byte-for-byte: field order, separators and empty-section handling
//! are all fixed. An empty query string or header set still occupies its line
//! in the join; omitting it silently changes the signature.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use http::Method;
use percent_encoding::utf8_percent_encode;
use ring::digest;

pub(crate) const STRICT_ENCODE_SET: percent_encoding::AsciiSet =
    percent_encoding::NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'.')
        .remove(b'_')
        .remove(b'~');
pub(crate) const STRICT_PATH_ENCODE_SET: percent_encoding::AsciiSet =
    STRICT_ENCODE_SET.remove(b'/');

/// Sentinel used in place of a payload hash when the body is not signed
/// (presigned URLs never sign a body).
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Normalized description of one request, built fresh per request. Timestamps
/// and the signatures derived from them are single-use.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub method: Method,
    /// Absolute resource path, not yet percent-encoded.
    pub path: String,
    /// Query parameters in caller order; canonicalization sorts them.
    pub query: Vec<(String, String)>,
    /// Headers to sign, keyed by lowercased trimmed name.
    pub headers: BTreeMap<String, String>,
    /// Hex SHA-256 of the body, or [`UNSIGNED_PAYLOAD`].
    pub payload_hash: String,
    pub timestamp: DateTime<Utc>,
}

impl SigningContext {
    /// Insert a header, lowercasing the name and normalizing the value the
    /// same way canonicalization will.
    pub fn insert_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.trim().to_ascii_lowercase(), normalize_header_value(value));
    }
}

/// UTC "basic" ISO-8601 timestamp, `YYYYMMDDTHHMMSSZ`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Date-only scope component, `YYYYMMDD`.
pub fn format_date_stamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y%m%d").to_string()
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex_encode(digest::digest(&digest::SHA256, data).as_ref())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

fn normalize_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Percent-encode the resource path, preserving `/`.
pub(crate) fn canonical_path(path: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    utf8_percent_encode(&path, &STRICT_PATH_ENCODE_SET).to_string()
}

/// Sorted, percent-encoded query string. Sort is by key, then value, so the
/// output never depends on insertion order.
pub(crate) fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, &STRICT_ENCODE_SET).to_string(),
                utf8_percent_encode(v, &STRICT_ENCODE_SET).to_string(),
            )
        })
        .collect();
    pairs.sort();
    let mut out = String::new();
    for (i, (k, v)) in pairs.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Canonical header block plus the `;`-joined signed-header name list.
/// The map is keyed by lowercased name, so iteration is already sorted.
pub(crate) fn canonical_headers(headers: &BTreeMap<String, String>) -> (String, String) {
    let mut block = String::new();
    let mut names = String::new();
    for (i, (name, value)) in headers.iter().enumerate() {
        block.push_str(name);
        block.push(':');
        block.push_str(value);
        block.push('\n');
        if i > 0 {
            names.push(';');
        }
        names.push_str(name);
    }
    (block, names)
}

/// The seven-line canonical request shared by the derived-key and asymmetric
/// schemes:
///
/// ```text
/// METHOD
/// PATH
/// SORTED_QUERY
/// SORTED_LOWERCASE_HEADERS
///
/// SIGNED_HEADER_NAMES
/// PAYLOAD_HASH
/// ```
pub fn canonical_request(ctx: &SigningContext) -> String {
    let (header_block, signed_names) = canonical_headers(&ctx.headers);
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        ctx.method,
        canonical_path(&ctx.path),
        canonical_query(&ctx.query),
        header_block,
        signed_names,
        ctx.payload_hash,
    )
}

/// Signed-header names for a context, without building the whole block.
pub(crate) fn signed_header_names(headers: &BTreeMap<String, String>) -> String {
    headers.keys().cloned().collect::<Vec<_>>().join(";")
}
