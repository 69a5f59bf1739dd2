//! Resumable session uploads: open a server-issued session URI, stream
//! ranged chunks into it, and reconcile local progress against the offset
//! the server has actually committed.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use url::Url;

use super::ProgressObserver;
use crate::{
    config::ConnectorConfig,
    error::{Error, Recovery},
    signer::SignedRequest,
    token::TokenCache,
    transport::RetryingTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Completed,
    Aborted,
}

impl SessionState {
    fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

/// Result of one chunk send.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// The server persisted a prefix of what it has been sent so far;
    /// `committed_offset` is the authoritative next send offset.
    Incomplete { committed_offset: u64 },
    /// The object is finalized; `body` is the server's object description.
    Complete { body: Bytes },
}

struct Progress {
    state: SessionState,
    committed_offset: u64,
}

/// Drives one resumable upload session.
///
/// Chunks are sequential by protocol: each send starts at the committed
/// offset, and the server's acknowledged range, not the bytes sent, decides
/// where the next chunk begins.
pub struct ResumableUploadCoordinator {
    transport: RetryingTransport,
    tokens: Arc<TokenCache>,
    session_uri: Url,
    progress: Mutex<Progress>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl fmt::Debug for ResumableUploadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableUploadCoordinator")
            .field("session_uri", &self.session_uri)
            .field("state", &self.state())
            .field("committed_offset", &self.committed_offset())
            .finish_non_exhaustive()
    }
}

impl ResumableUploadCoordinator {
    /// Open a session for `path`. The server answers with a `Location`
    /// header naming the session URI all further traffic targets.
    pub async fn create(
        config: &ConnectorConfig,
        transport: RetryingTransport,
        tokens: Arc<TokenCache>,
        path: &str,
        total_size: Option<u64>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<Self, Error> {
        let mut url = config.endpoint().clone();
        {
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
        }
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable");

        let mut headers = bearer_headers(&tokens).await?;
        if let Some(total) = total_size {
            headers.insert(
                "x-upload-content-length",
                header_value(&total.to_string())?,
            );
        }

        let request = SignedRequest {
            method: Method::POST,
            url,
            headers,
            body: Bytes::new(),
        };
        let response = transport.execute(&request).await?;

        let session_uri = response
            .headers
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::protocol("session create response carried no location"))?;
        let session_uri = Url::parse(session_uri)
            .map_err(|e| Error::protocol(format!("unparseable session uri: {e}")))?;
        tracing::debug!(path = %path, session = %session_uri, "resumable session created");

        Ok(Self {
            transport,
            tokens,
            session_uri,
            progress: Mutex::new(Progress {
                state: SessionState::Created,
                committed_offset: 0,
            }),
            observer,
        })
    }

    pub fn state(&self) -> SessionState {
        self.progress.lock().unwrap().state
    }

    /// The next offset to send from. Always server-authoritative.
    pub fn committed_offset(&self) -> u64 {
        self.progress.lock().unwrap().committed_offset
    }

    pub fn session_uri(&self) -> &Url {
        &self.session_uri
    }

    /// How a caller should react to `err` raised by this session. While the
    /// session is live, a retryable failure means: re-synchronize with
    /// [`query_status`](Self::query_status) and resume from the committed
    /// offset.
    pub fn recovery(&self, err: &Error) -> Recovery {
        match err.recovery() {
            Recovery::RetryOperation if !self.state().is_terminal() => Recovery::ResumeUpload,
            other => other,
        }
    }

    /// Send one chunk starting at `offset`. `total_size` is the full object
    /// length when known, `None` while still streaming an unbounded source.
    ///
    /// An incomplete response may acknowledge fewer bytes than were sent;
    /// the returned committed offset, not `offset + data.len()`, is where
    /// the next chunk must start.
    pub async fn upload_chunk(
        &self,
        data: Bytes,
        offset: u64,
        total_size: Option<u64>,
    ) -> Result<ChunkOutcome, Error> {
        if data.is_empty() {
            return Err(Error::config("chunks must not be empty"));
        }
        {
            let mut progress = self.progress.lock().unwrap();
            if progress.state.is_terminal() {
                return Err(Error::protocol(format!(
                    "cannot upload a chunk in state {:?}",
                    progress.state
                )));
            }
            if offset != progress.committed_offset {
                return Err(Error::protocol(format!(
                    "chunk offset {offset} does not match committed offset {}",
                    progress.committed_offset
                )));
            }
            progress.state = SessionState::Streaming;
        }

        let end = offset + data.len() as u64 - 1;
        let total = total_size
            .map(|t| t.to_string())
            .unwrap_or_else(|| "*".to_string());
        let sent = data.len() as u64;

        let mut headers = bearer_headers(&self.tokens).await?;
        headers.insert(
            http::header::CONTENT_RANGE,
            header_value(&format!("bytes {offset}-{end}/{total}"))?,
        );

        let request = SignedRequest {
            method: Method::PUT,
            url: self.session_uri.clone(),
            headers,
            body: data,
        };
        let response = self.transport.execute(&request).await?;

        if response.status == StatusCode::PERMANENT_REDIRECT {
            let committed = match parse_acked_end(&response.headers)? {
                Some(acked_end) => acked_end + 1,
                // No range header on an incomplete response: nothing has
                // been persisted yet.
                None => 0,
            };
            let mut progress = self.progress.lock().unwrap();
            let newly_committed = committed.saturating_sub(progress.committed_offset);
            progress.committed_offset = committed;
            drop(progress);
            if newly_committed > 0 {
                if let Some(observer) = &self.observer {
                    observer.on_bytes_transferred(newly_committed, total_size);
                }
            }
            tracing::debug!(committed, sent, "chunk partially committed");
            return Ok(ChunkOutcome::Incomplete {
                committed_offset: committed,
            });
        }

        // Any other transport success finalizes the object.
        let mut progress = self.progress.lock().unwrap();
        progress.committed_offset = end + 1;
        progress.state = SessionState::Completed;
        drop(progress);
        if let Some(observer) = &self.observer {
            observer.on_bytes_transferred(sent, total_size);
        }
        tracing::debug!(bytes = end + 1, "resumable upload completed");
        Ok(ChunkOutcome::Complete {
            body: response.body,
        })
    }

    /// Ask the server for its committed offset without sending bytes. Used
    /// to re-synchronize after a transport failure mid-chunk.
    pub async fn query_status(&self, total_size: Option<u64>) -> Result<u64, Error> {
        {
            let progress = self.progress.lock().unwrap();
            if progress.state.is_terminal() {
                return Err(Error::protocol(format!(
                    "cannot query a session in state {:?}",
                    progress.state
                )));
            }
        }

        let total = total_size
            .map(|t| t.to_string())
            .unwrap_or_else(|| "*".to_string());
        let mut headers = bearer_headers(&self.tokens).await?;
        headers.insert(
            http::header::CONTENT_RANGE,
            header_value(&format!("bytes */{total}"))?,
        );

        let request = SignedRequest {
            method: Method::PUT,
            url: self.session_uri.clone(),
            headers,
            body: Bytes::new(),
        };
        let response = self.transport.execute(&request).await?;

        let committed = match parse_acked_end(&response.headers)? {
            Some(acked_end) => acked_end + 1,
            None => 0,
        };
        self.progress.lock().unwrap().committed_offset = committed;
        Ok(committed)
    }

    /// Cancel the session server-side.
    pub async fn abort(&self) -> Result<(), Error> {
        {
            let progress = self.progress.lock().unwrap();
            if progress.state.is_terminal() {
                return Err(Error::protocol(format!(
                    "cannot abort a session in state {:?}",
                    progress.state
                )));
            }
        }

        let headers = bearer_headers(&self.tokens).await?;
        let request = SignedRequest {
            method: Method::DELETE,
            url: self.session_uri.clone(),
            headers,
            body: Bytes::new(),
        };
        self.transport.execute(&request).await?;

        self.progress.lock().unwrap().state = SessionState::Aborted;
        tracing::debug!(session = %self.session_uri, "resumable upload aborted");
        Ok(())
    }
}

async fn bearer_headers(tokens: &TokenCache) -> Result<HeaderMap, Error> {
    let token = tokens.get().await?;
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::AUTHORIZATION,
        header_value(&format!("Bearer {}", token.value))?,
    );
    Ok(headers)
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::config(format!("invalid header value {value:?}: {e}")))
}

/// Parse the acknowledged range end from a `Range: bytes=0-N` header.
/// Absent header means no bytes committed; a present but unparseable header
/// is a protocol error, since guessing an offset risks corruption.
fn parse_acked_end(headers: &HeaderMap) -> Result<Option<u64>, Error> {
    let Some(raw) = headers.get(http::header::RANGE) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|e| Error::protocol(format!("non-ASCII range header: {e}")))?;
    let end = raw
        .strip_prefix("bytes=")
        .and_then(|range| range.split_once('-'))
        .and_then(|(start, end)| (start == "0").then_some(end))
        .and_then(|end| end.parse::<u64>().ok())
        .ok_or_else(|| Error::protocol(format!("unparseable range header {raw:?}")))?;
    Ok(Some(end))
}

#[cfg(test)]
mod tests {
    use futures_util::future::BoxFuture;

    use super::*;
    use crate::{
        config::{Credential, DerivedHmacCredential, RetryPolicy},
        token::{BearerToken, TokenProvider},
        upload::testing::RecordingClient,
    };

    struct StaticProvider;

    impl TokenProvider for StaticProvider {
        fn fetch(&self) -> BoxFuture<'_, Result<BearerToken, Error>> {
            Box::pin(async {
                Ok(BearerToken::new(
                    "test-token",
                    std::time::Duration::from_secs(3600),
                ))
            })
        }
    }

    fn config() -> ConnectorConfig {
        ConnectorConfig::new(
            "https://upload.example.com",
            "r1",
            "storage",
            Credential::DerivedHmac(DerivedHmacCredential {
                key_id: "AKID".into(),
                secret_key: "secret".into(),
                token: None,
            }),
        )
        .unwrap()
    }

    fn tokens() -> Arc<TokenCache> {
        Arc::new(TokenCache::new(Arc::new(StaticProvider)))
    }

    fn location_headers(uri: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::LOCATION, uri.parse().unwrap());
        headers
    }

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::RANGE, value.parse().unwrap());
        headers
    }

    async fn session(client: &Arc<RecordingClient>) -> ResumableUploadCoordinator {
        client.push_response(
            StatusCode::OK,
            location_headers("https://upload.example.com/session/abc"),
            Bytes::new(),
        );
        ResumableUploadCoordinator::create(
            &config(),
            RetryingTransport::new(client.clone(), RetryPolicy::default()),
            tokens(),
            "/obj.bin",
            Some(1000),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_captures_session_uri_and_bearer_token() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;
        assert_eq!(
            upload.session_uri().as_str(),
            "https://upload.example.com/session/abc"
        );
        assert_eq!(upload.state(), SessionState::Created);
        let debug = format!("{upload:?}");
        assert!(debug.contains("session/abc") && debug.contains("Created"));

        let requests = client.requests.lock().unwrap();
        assert!(requests[0].uri.contains("uploadType=resumable"));
        assert_eq!(
            requests[0].headers[http::header::AUTHORIZATION],
            "Bearer test-token"
        );
        assert_eq!(requests[0].headers["x-upload-content-length"], "1000");
    }

    #[tokio::test]
    async fn create_without_location_is_a_protocol_error() {
        let client =
            RecordingClient::new(vec![(StatusCode::OK, HeaderMap::new(), Bytes::new())]);
        let err = ResumableUploadCoordinator::create(
            &config(),
            RetryingTransport::new(client, RetryPolicy::default()),
            tokens(),
            "/obj.bin",
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn server_acked_range_overrides_bytes_sent() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        // 600 bytes sent, only 400 persisted.
        client.push_response(
            StatusCode::PERMANENT_REDIRECT,
            range_headers("bytes=0-399"),
            Bytes::new(),
        );
        let outcome = upload
            .upload_chunk(Bytes::from(vec![0u8; 600]), 0, Some(1000))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ChunkOutcome::Incomplete {
                committed_offset: 400
            }
        ));
        assert_eq!(upload.committed_offset(), 400);
        assert_eq!(upload.state(), SessionState::Streaming);

        // The remaining 600 bytes resume from the server's offset.
        client.push_response(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"));
        let outcome = upload
            .upload_chunk(Bytes::from(vec![0u8; 600]), 400, Some(1000))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Complete { .. }));
        assert_eq!(upload.committed_offset(), 1000);
        assert_eq!(upload.state(), SessionState::Completed);

        let requests = client.requests.lock().unwrap();
        assert_eq!(
            requests[1].headers[http::header::CONTENT_RANGE],
            "bytes 0-599/1000"
        );
        assert_eq!(
            requests[2].headers[http::header::CONTENT_RANGE],
            "bytes 400-999/1000"
        );
    }

    #[tokio::test]
    async fn stale_offset_is_rejected() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        client.push_response(
            StatusCode::PERMANENT_REDIRECT,
            range_headers("bytes=0-99"),
            Bytes::new(),
        );
        upload
            .upload_chunk(Bytes::from(vec![0u8; 200]), 0, Some(1000))
            .await
            .unwrap();
        assert_eq!(upload.committed_offset(), 100);

        // Naive offset+len bookkeeping would send from 200.
        let err = upload
            .upload_chunk(Bytes::from(vec![0u8; 100]), 200, Some(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn incomplete_without_range_restarts_from_zero() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        client.push_response(StatusCode::PERMANENT_REDIRECT, HeaderMap::new(), Bytes::new());
        let outcome = upload
            .upload_chunk(Bytes::from(vec![0u8; 100]), 0, Some(1000))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ChunkOutcome::Incomplete {
                committed_offset: 0
            }
        ));
    }

    #[tokio::test]
    async fn unparseable_range_is_a_protocol_error() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        client.push_response(
            StatusCode::PERMANENT_REDIRECT,
            range_headers("bytes=banana"),
            Bytes::new(),
        );
        let err = upload
            .upload_chunk(Bytes::from(vec![0u8; 100]), 0, Some(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn query_status_resynchronizes_offset() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        client.push_response(
            StatusCode::PERMANENT_REDIRECT,
            range_headers("bytes=0-499"),
            Bytes::new(),
        );
        let committed = upload.query_status(Some(1000)).await.unwrap();
        assert_eq!(committed, 500);
        assert_eq!(upload.committed_offset(), 500);

        let requests = client.requests.lock().unwrap();
        assert_eq!(
            requests[1].headers[http::header::CONTENT_RANGE],
            "bytes */1000"
        );
        assert!(requests[1].body.is_empty());
    }

    #[tokio::test]
    async fn completed_session_rejects_further_chunks() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        client.push_response(StatusCode::OK, HeaderMap::new(), Bytes::new());
        upload
            .upload_chunk(Bytes::from(vec![0u8; 1000]), 0, Some(1000))
            .await
            .unwrap();
        assert_eq!(upload.state(), SessionState::Completed);

        let err = upload
            .upload_chunk(Bytes::from(vec![0u8; 1]), 1000, Some(1001))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        let err = upload.abort().await.unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn abort_cancels_the_session() {
        let client = RecordingClient::new(vec![]);
        let upload = session(&client).await;

        client.push_response(StatusCode::NO_CONTENT, HeaderMap::new(), Bytes::new());
        upload.abort().await.unwrap();
        assert_eq!(upload.state(), SessionState::Aborted);

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[1].method, Method::DELETE);
    }
}
