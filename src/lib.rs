//! Signed access to object-storage endpoints across three credential
//! families, plus the upload machinery large objects need.
//!
//! The crate is layered:
//! - [`scheme`] canonicalizes requests and produces signatures. Pure
//!   functions, no I/O.
//! - [`signer`] turns a logical operation into a [`SignedRequest`].
//! - [`transport`] executes signed requests with timeout, classification
//!   and exponential backoff.
//! - [`upload`] coordinates multipart and resumable uploads on top of the
//!   transport.
//! - [`Connector`] ties the layers together behind object-level operations.
//!
//! ```no_run
//! # async fn run() -> Result<(), cloudsign::Error> {
//! use cloudsign::{ConnectorBuilder, ConnectorConfig, Credential, DerivedHmacCredential};
//!
//! let config = ConnectorConfig::new(
//!     "https://store.example.com",
//!     "us-east-1",
//!     "s3",
//!     Credential::DerivedHmac(DerivedHmacCredential {
//!         key_id: "AKID".into(),
//!         secret_key: "secret".into(),
//!         token: None,
//!     }),
//! )?;
//! let connector = ConnectorBuilder::new(config).build()?;
//! let body = connector.get_object("/data/report.csv").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod presign;
pub mod scheme;
pub mod signer;
pub mod token;
pub mod transport;
pub mod upload;

pub use config::{
    ConnectorConfig, Credential, DerivedHmacCredential, RetryPolicy, RsaKeyCredential,
    SchemeKind, SharedKeyCredential,
};
pub use connector::{Connector, ConnectorBuilder, ObjectMetadata};
pub use error::{Error, Recovery};
pub use presign::PresignedUrlGenerator;
pub use signer::{RequestSigner, SignedRequest};
pub use token::{BearerToken, TokenCache, TokenProvider};
pub use transport::{HttpClient, RetryingTransport, TransportResponse};
pub use upload::{
    multipart::{CommitReceipt, MultipartUploadCoordinator, UploadState},
    resumable::{ChunkOutcome, ResumableUploadCoordinator, SessionState},
    PartRecord, ProgressObserver,
};
