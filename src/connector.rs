//! The user-facing connector: one configured endpoint plus the transport,
//! signer, and token machinery behind simple object operations.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use url::Url;

use crate::{
    config::ConnectorConfig,
    error::Error,
    presign::PresignedUrlGenerator,
    signer::RequestSigner,
    token::{TokenCache, TokenProvider},
    transport::{HttpClient, RetryingTransport},
    upload::{
        multipart::MultipartUploadCoordinator, resumable::ResumableUploadCoordinator,
        ProgressObserver,
    },
};

/// Head-request view of a stored object.
#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub size: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

pub struct ConnectorBuilder {
    config: ConnectorConfig,
    client: Option<Arc<dyn HttpClient>>,
    tokens: Option<Arc<TokenCache>>,
}

impl ConnectorBuilder {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            client: None,
            tokens: None,
        }
    }

    /// Inject the HTTP client. Without this, `build` falls back to the
    /// default tokio client when that feature is enabled.
    pub fn client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Enable bearer-token flows (resumable sessions) backed by `provider`.
    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(Arc::new(TokenCache::new(provider)));
        self
    }

    pub fn build(self) -> Result<Connector, Error> {
        let client = match self.client {
            Some(client) => client,
            #[cfg(feature = "tokio-http")]
            None => Arc::new(crate::transport::tokio::TokioClient::new()),
            #[cfg(not(feature = "tokio-http"))]
            None => return Err(Error::config("no HTTP client configured")),
        };
        let transport = RetryingTransport::new(client, self.config.retry().clone());
        Ok(Connector {
            inner: Arc::new(Inner {
                config: Arc::new(self.config),
                transport,
                tokens: self.tokens,
            }),
        })
    }
}

struct Inner {
    config: Arc<ConnectorConfig>,
    transport: RetryingTransport,
    tokens: Option<Arc<TokenCache>>,
}

/// Cheaply cloneable handle to one configured storage endpoint.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

impl Connector {
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Write `data` to `path` in a single signed request.
    pub async fn put_object(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> Result<(), Error> {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_str(content_type)
                    .map_err(|e| Error::config(format!("invalid content type: {e}")))?,
            );
        }
        let signer = RequestSigner::new(&self.inner.config);
        let request = signer.prepare(Method::PUT, path, &[], &headers, &data)?;
        self.inner.transport.execute(&request).await?;
        Ok(())
    }

    /// Read the object at `path`. A missing object is `None`, not an error.
    pub async fn get_object(&self, path: &str) -> Result<Option<Bytes>, Error> {
        let signer = RequestSigner::new(&self.inner.config);
        let request = signer.prepare(Method::GET, path, &[], &HeaderMap::new(), &Bytes::new())?;
        match self.inner.transport.execute(&request).await {
            Ok(response) => Ok(Some(response.body)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch object metadata without the body. Missing object is `None`.
    pub async fn head_object(&self, path: &str) -> Result<Option<ObjectMetadata>, Error> {
        let signer = RequestSigner::new(&self.inner.config);
        let request = signer.prepare(Method::HEAD, path, &[], &HeaderMap::new(), &Bytes::new())?;
        match self.inner.transport.execute(&request).await {
            Ok(response) => {
                let header = |name: http::header::HeaderName| {
                    response
                        .headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                Ok(Some(ObjectMetadata {
                    size: header(http::header::CONTENT_LENGTH).and_then(|v| v.parse().ok()),
                    etag: header(http::header::ETAG),
                    last_modified: header(http::header::LAST_MODIFIED),
                }))
            }
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_object(&self, path: &str) -> Result<(), Error> {
        let signer = RequestSigner::new(&self.inner.config);
        let request =
            signer.prepare(Method::DELETE, path, &[], &HeaderMap::new(), &Bytes::new())?;
        self.inner.transport.execute(&request).await?;
        Ok(())
    }

    /// Start a multipart upload for `path`.
    pub async fn multipart_upload(
        &self,
        path: &str,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<MultipartUploadCoordinator, Error> {
        MultipartUploadCoordinator::create(
            self.inner.config.clone(),
            self.inner.transport.clone(),
            path,
            observer,
        )
        .await
    }

    /// Start a resumable upload session for `path`. Requires a token
    /// provider on the builder.
    pub async fn resumable_upload(
        &self,
        path: &str,
        total_size: Option<u64>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<ResumableUploadCoordinator, Error> {
        let tokens = self
            .inner
            .tokens
            .clone()
            .ok_or_else(|| Error::config("resumable uploads require a token provider"))?;
        ResumableUploadCoordinator::create(
            &self.inner.config,
            self.inner.transport.clone(),
            tokens,
            path,
            total_size,
            observer,
        )
        .await
    }

    /// Generate a presigned URL for `path`.
    pub fn presigned_url(
        &self,
        method: Method,
        path: &str,
        expires_in: Duration,
        extra_query: &[(String, String)],
    ) -> Result<Url, Error> {
        PresignedUrlGenerator::new(&self.inner.config).generate(
            method,
            path,
            expires_in,
            extra_query,
        )
    }
}
