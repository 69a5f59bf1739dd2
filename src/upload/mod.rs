//! Chunked upload coordination.
//!
//! Two protocols are covered: multipart (initiate, upload numbered parts,
//! commit a part manifest) and resumable sessions (open a session URI, stream
//! ranged chunks, reconcile against the server's acknowledged offset).

pub mod multipart;
pub mod resumable;

use serde::{Deserialize, Serialize};

/// Receipt for one uploaded part, kept until commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub number: u32,
    pub etag: String,
    pub size: u64,
}

/// Byte-level progress callback, invoked after each part or chunk is
/// acknowledged by the server.
pub trait ProgressObserver: Send + Sync {
    fn on_bytes_transferred(&self, bytes: u64, total: Option<u64>);
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct InitiateMultipartUploadResult {
    pub upload_id: String,
}

#[derive(Default, Debug, Serialize)]
#[serde(default, rename = "CompleteMultipartUpload", rename_all = "PascalCase")]
pub(crate) struct CompleteMultipartUploadRequest {
    pub part: Vec<CompleteMultipartUploadRequestPart>,
}

#[derive(Clone, Default, Debug, Serialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct CompleteMultipartUploadRequestPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct CompleteMultipartUploadResult {
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Vendor error envelope. Commit endpoints can return this with a 200
/// status, so the commit path sniffs for it before trusting the receipt.
#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub(crate) struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}
