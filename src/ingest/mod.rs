//! # Ingest
//!
//! First pipeline stage. Consumes bucket notifications, expands uploaded
//! policy bundles into per-policy objects and publishes one change event per
//! logical change for the reconcile stage.

pub mod archive;
pub mod pipeline;

pub use archive::{extract_entries, ExtractedFile};
pub use pipeline::{IngestOutcome, IngestPipeline};

use crate::provider::{QueueError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("archive s3://{bucket}/{key} could not be fetched after {attempts} attempts: {message}")]
    ArchiveUnavailable {
        bucket: String,
        key: String,
        attempts: u32,
        message: String,
    },

    #[error("s3://{bucket}/{key} is not a valid archive: {message}")]
    InvalidArchive {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("failed to write extracted object s3://{bucket}/{key}")]
    Extract {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("extracted object s3://{bucket}/{key} could not be read back: {message}")]
    Readback {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("failed to delete archive s3://{bucket}/{key}")]
    CommitFailed {
        bucket: String,
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to publish {action} event for {object}")]
    Publish {
        action: String,
        object: String,
        #[source]
        source: QueueError,
    },
}
