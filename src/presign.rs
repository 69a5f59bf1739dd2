//! Offline presigned-URL generation. Shares the canonicalization and signing
//! layers with the request signer; no HTTP round trip is involved.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use http::Method;
use url::Url;

use crate::{
    config::{ConnectorConfig, Credential},
    error::Error,
    scheme::{
        canonical::{self, SigningContext},
        derived_hmac, rsa_key, SignatureEncoding,
    },
};

pub struct PresignedUrlGenerator<'a> {
    config: &'a ConnectorConfig,
}

impl<'a> PresignedUrlGenerator<'a> {
    pub fn new(config: &'a ConnectorConfig) -> Self {
        Self { config }
    }

    /// Generate a self-contained URL authorizing `method` on `path` until
    /// `expires_in` from now.
    ///
    /// Vendor-side maximum lifetimes are deliberately not enforced here; the
    /// server rejects an over-long expiry with a clear 4xx. Only a
    /// zero/empty expiry is refused, since it can never produce a usable URL.
    pub fn generate(
        &self,
        method: Method,
        path: &str,
        expires_in: Duration,
        extra_query: &[(String, String)],
    ) -> Result<Url, Error> {
        self.generate_at(method, path, expires_in, extra_query, Utc::now())
    }

    pub fn generate_at(
        &self,
        method: Method,
        path: &str,
        expires_in: Duration,
        extra_query: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<Url, Error> {
        if expires_in.is_zero() {
            return Err(Error::config("presign expiry must be greater than zero"));
        }

        let (prefix, algorithm) = match self.config.credential() {
            Credential::DerivedHmac(_) => ("X-Amz", derived_hmac::ALGORITHM),
            Credential::RsaKey(_) => ("X-Goog", rsa_key::ALGORITHM),
            Credential::SharedKey(_) => {
                return Err(Error::config(
                    "presigned URLs are not supported for the shared-secret scheme",
                ))
            }
        };

        let date_stamp = canonical::format_date_stamp(&now);
        let scope = match self.config.credential() {
            Credential::RsaKey(_) => rsa_key::credential_scope(
                &date_stamp,
                self.config.region(),
                self.config.service(),
            ),
            _ => derived_hmac::credential_scope(
                &date_stamp,
                self.config.region(),
                self.config.service(),
            ),
        };

        // Every parameter the URL will carry, except the signature itself:
        // the signature covers the full sorted query, so it must come last.
        let mut params: Vec<(String, String)> = extra_query.to_vec();
        params.push((format!("{prefix}-Algorithm"), algorithm.to_string()));
        params.push((
            format!("{prefix}-Credential"),
            format!("{}/{scope}", self.config.credential().id()),
        ));
        params.push((
            format!("{prefix}-Date"),
            canonical::format_timestamp(&now),
        ));
        params.push((
            format!("{prefix}-Expires"),
            expires_in.as_secs().to_string(),
        ));
        params.push((format!("{prefix}-SignedHeaders"), "host".to_string()));
        if let Credential::DerivedHmac(cred) = self.config.credential() {
            if let Some(token) = cred.token.as_deref() {
                params.push((format!("{prefix}-Security-Token"), token.to_string()));
            }
        }

        let signature = self.signature_for(&method, path, &params, now)?;

        let mut url = self.config.endpoint().clone();
        {
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        }
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &params {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(&format!("{prefix}-Signature"), &signature);
        }
        Ok(url)
    }

    /// Signature over the canonical request implied by `params`. Split out so
    /// a verifier (and the tests) can recompute it from a parsed URL.
    pub(crate) fn signature_for(
        &self,
        method: &Method,
        path: &str,
        params: &[(String, String)],
        now: DateTime<Utc>,
    ) -> Result<String, Error> {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.config.host());
        let ctx = SigningContext {
            method: method.clone(),
            path: path.to_string(),
            query: params.to_vec(),
            headers,
            payload_hash: canonical::UNSIGNED_PAYLOAD.to_string(),
            timestamp: now,
        };
        let canonical = canonical::canonical_request(&ctx);

        match self.config.credential() {
            Credential::DerivedHmac(cred) => {
                let (signature, _) = derived_hmac::sign(
                    cred,
                    &now,
                    self.config.region(),
                    self.config.service(),
                    &canonical,
                );
                Ok(signature)
            }
            Credential::RsaKey(cred) => {
                let (signature, _) = rsa_key::sign(
                    cred,
                    &now,
                    self.config.region(),
                    self.config.service(),
                    &canonical,
                    // Query-embedded signatures are hex.
                    SignatureEncoding::Hex,
                )?;
                Ok(signature)
            }
            Credential::SharedKey(_) => Err(Error::config(
                "presigned URLs are not supported for the shared-secret scheme",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::config::{DerivedHmacCredential, SharedKeyCredential};

    fn config() -> ConnectorConfig {
        ConnectorConfig::new(
            "https://store.example.com",
            "r1",
            "s3",
            Credential::DerivedHmac(DerivedHmacCredential {
                key_id: "AKID".into(),
                secret_key: "secret".into(),
                token: None,
            }),
        )
        .unwrap()
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn url_params(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn signature_is_the_last_query_parameter() {
        let config = config();
        let generator = PresignedUrlGenerator::new(&config);
        let url = generator
            .generate_at(Method::GET, "/obj.txt", Duration::from_secs(900), &[], ts())
            .unwrap();
        let params = url_params(&url);
        assert_eq!(params.last().unwrap().0, "X-Amz-Signature");
        assert_eq!(
            params.iter().find(|(k, _)| k == "X-Amz-Expires").unwrap().1,
            "900"
        );
        assert_eq!(
            params.iter().find(|(k, _)| k == "X-Amz-Date").unwrap().1,
            "20240101T000000Z"
        );
        assert_eq!(
            params
                .iter()
                .find(|(k, _)| k == "X-Amz-Credential")
                .unwrap()
                .1,
            "AKID/20240101/r1/s3/aws4_request"
        );
    }

    #[test]
    fn signature_verifies_against_url_parameters() {
        let config = config();
        let generator = PresignedUrlGenerator::new(&config);
        let extra = vec![("response-content-type".to_string(), "text/plain".to_string())];
        let url = generator
            .generate_at(Method::GET, "/obj.txt", Duration::from_secs(600), &extra, ts())
            .unwrap();

        let mut params = url_params(&url);
        let (sig_name, signature) = params.pop().unwrap();
        assert_eq!(sig_name, "X-Amz-Signature");

        let recomputed = generator
            .signature_for(&Method::GET, "/obj.txt", &params, ts())
            .unwrap();
        assert_eq!(signature, recomputed);
    }

    #[test]
    fn removing_any_parameter_breaks_the_signature() {
        let config = config();
        let generator = PresignedUrlGenerator::new(&config);
        let extra = vec![("response-content-type".to_string(), "text/plain".to_string())];
        let url = generator
            .generate_at(Method::GET, "/obj.txt", Duration::from_secs(600), &extra, ts())
            .unwrap();

        let mut params = url_params(&url);
        let (_, signature) = params.pop().unwrap();

        for skip in 0..params.len() {
            let mut tampered = params.clone();
            tampered.remove(skip);
            let recomputed = generator
                .signature_for(&Method::GET, "/obj.txt", &tampered, ts())
                .unwrap();
            assert_ne!(signature, recomputed, "parameter {skip} was not covered");
        }
    }

    #[test]
    fn reordering_does_not_break_the_signature() {
        // Canonicalization sorts, so transport-level reordering of the query
        // string must not invalidate the URL.
        let config = config();
        let generator = PresignedUrlGenerator::new(&config);
        let url = generator
            .generate_at(Method::GET, "/obj.txt", Duration::from_secs(600), &[], ts())
            .unwrap();
        let mut params = url_params(&url);
        let (_, signature) = params.pop().unwrap();
        params.reverse();
        let recomputed = generator
            .signature_for(&Method::GET, "/obj.txt", &params, ts())
            .unwrap();
        assert_eq!(signature, recomputed);
    }

    #[test]
    fn zero_expiry_is_rejected() {
        let config = config();
        let generator = PresignedUrlGenerator::new(&config);
        let err = generator
            .generate_at(Method::GET, "/obj.txt", Duration::ZERO, &[], ts())
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn shared_key_scheme_is_refused() {
        let config = ConnectorConfig::new(
            "https://acct.blob.example.com",
            "",
            "blob",
            Credential::SharedKey(SharedKeyCredential::new("acct", "c2VjcmV0").unwrap()),
        )
        .unwrap();
        let generator = PresignedUrlGenerator::new(&config);
        let err = generator
            .generate_at(Method::GET, "/c/b", Duration::from_secs(60), &[], ts())
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
