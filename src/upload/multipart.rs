//! Multipart upload coordination: initiate a server-side upload, put
//! numbered parts, then commit an ordered part manifest.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use http::{HeaderMap, Method};

use super::{
    CompleteMultipartUploadRequest, CompleteMultipartUploadRequestPart,
    CompleteMultipartUploadResult, ErrorEnvelope, InitiateMultipartUploadResult, PartRecord,
    ProgressObserver,
};
use crate::{
    config::ConnectorConfig,
    error::{Error, Recovery},
    signer::RequestSigner,
    transport::RetryingTransport,
};

/// Lifecycle of one multipart upload. Terminal states reject further
/// operations instead of silently re-sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Created,
    Uploading,
    ReadyToCommit,
    Committed,
    Aborted,
}

impl UploadState {
    fn is_terminal(self) -> bool {
        matches!(self, UploadState::Committed | UploadState::Aborted)
    }
}

/// Server receipt for a committed upload.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub etag: Option<String>,
}

/// Drives one multipart upload against a signed endpoint.
///
/// Methods take `&self`; callers may upload parts concurrently from multiple
/// tasks. Part records and the state flag live behind a mutex that is never
/// held across an await.
pub struct MultipartUploadCoordinator {
    config: Arc<ConnectorConfig>,
    transport: RetryingTransport,
    path: String,
    upload_id: String,
    parts: Mutex<Vec<PartRecord>>,
    state: Mutex<UploadState>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl fmt::Debug for MultipartUploadCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartUploadCoordinator")
            .field("path", &self.path)
            .field("upload_id", &self.upload_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl MultipartUploadCoordinator {
    /// Initiate an upload for `path`. The server-issued upload id scopes
    /// every subsequent part and the final commit.
    pub async fn create(
        config: Arc<ConnectorConfig>,
        transport: RetryingTransport,
        path: impl Into<String>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let signer = RequestSigner::new(&config);
        let request = signer.prepare(
            Method::POST,
            &path,
            &[("uploads".to_string(), String::new())],
            &HeaderMap::new(),
            &Bytes::new(),
        )?;
        let response = transport.execute(&request).await?;

        let result: InitiateMultipartUploadResult =
            quick_xml::de::from_reader(&response.body[..])
                .map_err(|e| Error::protocol(format!("unparseable initiate response: {e}")))?;
        if result.upload_id.is_empty() {
            return Err(Error::protocol("initiate response carried no upload id"));
        }
        tracing::debug!(path = %path, upload_id = %result.upload_id, "multipart upload created");

        Ok(Self {
            config,
            transport,
            path,
            upload_id: result.upload_id,
            parts: Mutex::new(Vec::new()),
            state: Mutex::new(UploadState::Created),
            observer,
        })
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> UploadState {
        *self.state.lock().unwrap()
    }

    /// Parts recorded so far, in upload-completion order.
    pub fn parts(&self) -> Vec<PartRecord> {
        self.parts.lock().unwrap().clone()
    }

    /// How a caller should react to `err` raised by this upload. A retryable
    /// failure against a live session means the failed part (or the commit)
    /// can be re-sent without restarting the upload.
    pub fn recovery(&self, err: &Error) -> Recovery {
        match err.recovery() {
            Recovery::RetryOperation if !self.state().is_terminal() => Recovery::ResumeUpload,
            other => other,
        }
    }

    /// Upload one part. Part numbers start at 1; the server derives object
    /// layout from the numbers, not from arrival order, so parts may be sent
    /// out of order and concurrently.
    pub async fn upload_part(&self, part_number: u32, data: Bytes) -> Result<PartRecord, Error> {
        if part_number == 0 {
            return Err(Error::config("part numbers start at 1"));
        }
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                UploadState::Created | UploadState::Uploading => {
                    *state = UploadState::Uploading;
                }
                other => {
                    return Err(Error::protocol(format!(
                        "cannot upload a part in state {other:?}"
                    )))
                }
            }
        }

        let size = data.len() as u64;
        let signer = RequestSigner::new(&self.config);
        let request = signer.prepare(
            Method::PUT,
            &self.path,
            &[
                ("partNumber".to_string(), part_number.to_string()),
                ("uploadId".to_string(), self.upload_id.clone()),
            ],
            &HeaderMap::new(),
            &data,
        )?;
        let response = self.transport.execute(&request).await?;

        let etag = response
            .headers
            .get(http::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::protocol("part response carried no etag"))?
            .to_string();

        let record = PartRecord {
            number: part_number,
            etag,
            size,
        };
        self.parts.lock().unwrap().push(record.clone());
        if let Some(observer) = &self.observer {
            observer.on_bytes_transferred(size, None);
        }
        Ok(record)
    }

    /// Commit the upload. The manifest lists every recorded part sorted by
    /// part number regardless of the order they finished in.
    pub async fn commit(&self) -> Result<CommitReceipt, Error> {
        let manifest = {
            let mut state = self.state.lock().unwrap();
            if state.is_terminal() {
                return Err(Error::protocol(format!(
                    "cannot commit in state {:?}",
                    *state
                )));
            }
            let mut parts = self.parts.lock().unwrap().clone();
            if parts.is_empty() {
                return Err(Error::protocol("cannot commit an upload with no parts"));
            }
            *state = UploadState::ReadyToCommit;
            parts.sort_by_key(|part| part.number);
            CompleteMultipartUploadRequest {
                part: parts
                    .into_iter()
                    .map(|part| CompleteMultipartUploadRequestPart {
                        part_number: part.number,
                        etag: part.etag,
                    })
                    .collect(),
            }
        };

        let body = quick_xml::se::to_string(&manifest)
            .map_err(|e| Error::protocol(format!("unserializable commit manifest: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/xml"),
        );

        let signer = RequestSigner::new(&self.config);
        let request = signer.prepare(
            Method::POST,
            &self.path,
            &[("uploadId".to_string(), self.upload_id.clone())],
            &headers,
            &Bytes::from(body),
        )?;
        let response = self.transport.execute(&request).await?;

        // A commit can fail inside a 200 response.
        if let Ok(envelope) = quick_xml::de::from_reader::<_, ErrorEnvelope>(&response.body[..]) {
            if !envelope.code.is_empty() {
                return Err(Error::protocol(format!(
                    "commit rejected: {} ({})",
                    envelope.code, envelope.message
                )));
            }
        }
        let etag = quick_xml::de::from_reader::<_, CompleteMultipartUploadResult>(
            &response.body[..],
        )
        .ok()
        .map(|result| result.etag)
        .filter(|etag| !etag.is_empty());

        *self.state.lock().unwrap() = UploadState::Committed;
        tracing::debug!(upload_id = %self.upload_id, "multipart upload committed");
        Ok(CommitReceipt { etag })
    }

    /// Abort the upload, discarding all uploaded parts server-side.
    pub async fn abort(&self) -> Result<(), Error> {
        {
            let state = self.state.lock().unwrap();
            if state.is_terminal() {
                return Err(Error::protocol(format!(
                    "cannot abort in state {:?}",
                    *state
                )));
            }
        }

        let signer = RequestSigner::new(&self.config);
        let request = signer.prepare(
            Method::DELETE,
            &self.path,
            &[("uploadId".to_string(), self.upload_id.clone())],
            &HeaderMap::new(),
            &Bytes::new(),
        )?;
        self.transport.execute(&request).await?;

        *self.state.lock().unwrap() = UploadState::Aborted;
        tracing::debug!(upload_id = %self.upload_id, "multipart upload aborted");
        Ok(())
    }
}
