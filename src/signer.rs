//! Turns a logical operation into a signed, ready-to-send request. Pure
//! value production: no network I/O happens here, which keeps every signing
//! path unit-testable without a transport.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderValue, Method, Request};
use url::Url;

use crate::{
    config::{ConnectorConfig, Credential},
    error::Error,
    scheme::{
        canonical::{self, SigningContext},
        derived_hmac, rsa_key, shared_key, SignatureEncoding,
    },
    transport::HttpError,
};

/// A request with its signature attached, ready for the transport. The body
/// is [`Bytes`], so retries re-send identical payload bytes.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl SignedRequest {
    pub(crate) fn to_http(&self) -> Result<Request<Bytes>, Error> {
        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(self.url.as_str())
            .body(self.body.clone())
            .map_err(|e| Error::Http(HttpError::from(e)))?;
        *request.headers_mut() = self.headers.clone();
        Ok(request)
    }
}

pub struct RequestSigner<'a> {
    config: &'a ConnectorConfig,
}

impl<'a> RequestSigner<'a> {
    pub fn new(config: &'a ConnectorConfig) -> Self {
        Self { config }
    }

    /// Sign a request with the current time.
    pub fn prepare(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<SignedRequest, Error> {
        self.prepare_at(method, path, query, headers, body, Utc::now())
    }

    /// Sign a request at an explicit timestamp. Signatures are single-use;
    /// callers must not replay the result under a different clock.
    pub fn prepare_at(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
        body: &Bytes,
        now: DateTime<Utc>,
    ) -> Result<SignedRequest, Error> {
        let url = self.build_url(path, query)?;
        match self.config.credential() {
            Credential::DerivedHmac(cred) => {
                let mut ctx = self.hash_signed_context(
                    method.clone(),
                    path,
                    query,
                    headers,
                    body,
                    now,
                    "x-amz-date",
                    "x-amz-content-sha256",
                )?;
                if let Some(token) = cred.token.as_deref() {
                    ctx.insert_header("x-amz-security-token", token);
                }
                let canonical = canonical::canonical_request(&ctx);
                let (signature, scope) = derived_hmac::sign(
                    cred,
                    &now,
                    self.config.region(),
                    self.config.service(),
                    &canonical,
                );
                let authorization = format!(
                    "{} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
                    derived_hmac::ALGORITHM,
                    cred.key_id,
                    canonical::signed_header_names(&ctx.headers),
                );
                self.assemble(method, url, &ctx.headers, &authorization, body)
            }
            Credential::RsaKey(cred) => {
                let ctx = self.hash_signed_context(
                    method.clone(),
                    path,
                    query,
                    headers,
                    body,
                    now,
                    "x-goog-date",
                    "x-goog-content-sha256",
                )?;
                let canonical = canonical::canonical_request(&ctx);
                let (signature, scope) = rsa_key::sign(
                    cred,
                    &now,
                    self.config.region(),
                    self.config.service(),
                    &canonical,
                    SignatureEncoding::Base64,
                )?;
                let authorization = format!(
                    "{} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
                    rsa_key::ALGORITHM,
                    cred.principal,
                    canonical::signed_header_names(&ctx.headers),
                );
                self.assemble(method, url, &ctx.headers, &authorization, body)
            }
            Credential::SharedKey(cred) => {
                let mut signed = lowercase_headers(headers)?;
                signed.insert(
                    shared_key::DATE_HEADER.to_string(),
                    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                );
                signed.insert(
                    shared_key::VERSION_HEADER.to_string(),
                    shared_key::API_VERSION.to_string(),
                );
                if !body.is_empty() {
                    signed.insert("content-length".to_string(), body.len().to_string());
                }
                let sts = shared_key::string_to_sign(&method, &signed, &cred.account, path, query);
                let signature = shared_key::sign(cred, &sts);
                let authorization = shared_key::authorization(cred, &signature);
                self.assemble(method, url, &signed, &authorization, body)
            }
        }
    }

    /// Canonical-hash context shared by the derived-key and asymmetric
    /// schemes: caller headers plus the mandatory host/timestamp/payload-hash
    /// set. Caller-supplied values win; mandatory names only fill gaps.
    #[allow(clippy::too_many_arguments)]
    fn hash_signed_context(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        headers: &HeaderMap,
        body: &Bytes,
        now: DateTime<Utc>,
        date_header: &str,
        hash_header: &str,
    ) -> Result<SigningContext, Error> {
        let payload_hash = canonical::sha256_hex(body);
        let mut ctx = SigningContext {
            method,
            path: path.to_string(),
            query: query.to_vec(),
            headers: lowercase_headers(headers)?,
            payload_hash: payload_hash.clone(),
            timestamp: now,
        };
        ctx.insert_header("host", &self.config.host());
        ctx.insert_header(date_header, &canonical::format_timestamp(&now));
        ctx.insert_header(hash_header, &payload_hash);
        Ok(ctx)
    }

    fn build_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, Error> {
        let mut url = self.config.endpoint().clone();
        {
            let base = url.path().trim_end_matches('/').to_string();
            let path = path.trim_start_matches('/');
            url.set_path(&format!("{base}/{path}"));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn assemble(
        &self,
        method: Method,
        url: Url,
        signed_headers: &BTreeMap<String, String>,
        authorization: &str,
        body: &Bytes,
    ) -> Result<SignedRequest, Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in signed_headers {
            // reqwest sets host itself from the URL.
            if name == "host" {
                continue;
            }
            headers.insert(
                http::header::HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| Error::config(format!("invalid header name {name:?}: {e}")))?,
                HeaderValue::from_str(value).map_err(|e| Error::Http(HttpError::from(e)))?,
            );
        }
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(authorization).map_err(|e| Error::Http(HttpError::from(e)))?,
        );
        Ok(SignedRequest {
            method,
            url,
            headers,
            body: body.clone(),
        })
    }
}

fn lowercase_headers(headers: &HeaderMap) -> Result<BTreeMap<String, String>, Error> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let value = value
            .to_str()
            .map_err(|e| Error::config(format!("header {name:?} is not valid UTF-8: {e}")))?;
        out.insert(
            name.as_str().to_ascii_lowercase(),
            value.split_whitespace().collect::<Vec<_>>().join(" "),
        );
    }
    Ok(out)
}
