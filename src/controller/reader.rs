//! # Policy Directory Reader
//!
//! Reads a policy's declared documents from `<policy_name>/` in the bucket.
//!
//! A missing object is a valid state ("not declared"), reported as `Ok(None)`.
//! A failed or unparseable read is always an error, so a transient outage can
//! never be mistaken for "all targets removed".

use crate::config::SharedControllerConfig;
use crate::model::{FileKind, PolicyDocument, ProcessingMode, TargetList};
use crate::provider::{ObjectStore, StoreError};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("s3://{bucket}/{key} is not a valid {kind} document: {message}")]
    Malformed {
        bucket: String,
        key: String,
        kind: &'static str,
        message: String,
    },
}

/// A declared document, parsed
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Definition(PolicyDocument),
    TargetList(TargetList),
}

#[derive(Clone)]
pub struct PolicyDirectoryReader {
    store: Arc<dyn ObjectStore>,
    config: SharedControllerConfig,
}

impl std::fmt::Debug for PolicyDirectoryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyDirectoryReader")
            .field("definition", &self.config.policy_definition_file_name)
            .field("target_list", &self.config.target_list_file_name)
            .finish_non_exhaustive()
    }
}

impl PolicyDirectoryReader {
    pub fn new(store: Arc<dyn ObjectStore>, config: SharedControllerConfig) -> Self {
        Self { store, config }
    }

    /// Object key of a declared document
    #[must_use]
    pub fn key(&self, policy_name: &str, kind: FileKind) -> String {
        match kind {
            FileKind::Definition => self.config.definition_key(policy_name),
            FileKind::TargetList => self.config.target_list_key(policy_name),
        }
    }

    /// Read one declared document
    ///
    /// In [`ProcessingMode::Delete`] the target list is reported absent
    /// without touching the store: a read right after the deletion could still
    /// return the old object.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] when the object cannot be fetched or parsed.
    pub async fn read(
        &self,
        bucket: &str,
        policy_name: &str,
        kind: FileKind,
        mode: ProcessingMode,
    ) -> Result<Option<Document>, ReaderError> {
        Ok(match kind {
            FileKind::Definition => self
                .read_definition(bucket, policy_name)
                .await?
                .map(Document::Definition),
            FileKind::TargetList => self
                .read_target_list(bucket, policy_name, mode)
                .await?
                .map(Document::TargetList),
        })
    }

    /// Read `<policy_name>/<definition_file>`
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] when the object cannot be fetched or parsed.
    pub async fn read_definition(
        &self,
        bucket: &str,
        policy_name: &str,
    ) -> Result<Option<PolicyDocument>, ReaderError> {
        self.fetch(bucket, &self.key(policy_name, FileKind::Definition), FileKind::Definition)
            .await
    }

    /// Read `<policy_name>/<target_list_file>`
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] when the object cannot be fetched or parsed.
    pub async fn read_target_list(
        &self,
        bucket: &str,
        policy_name: &str,
        mode: ProcessingMode,
    ) -> Result<Option<TargetList>, ReaderError> {
        let key = self.key(policy_name, FileKind::TargetList);
        if mode == ProcessingMode::Delete {
            info!(
                policy.name = %policy_name,
                key = %key,
                "Target list deleted, treating declared targets as empty"
            );
            return Ok(None);
        }
        self.fetch(bucket, &key, FileKind::TargetList).await
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: &str,
        kind: FileKind,
    ) -> Result<Option<T>, ReaderError> {
        let Some(body) = self.store.get_object(bucket, key).await? else {
            debug!(bucket = %bucket, key = %key, "Declared document not found");
            return Ok(None);
        };

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| ReaderError::Malformed {
                bucket: bucket.to_string(),
                key: key.to_string(),
                kind: kind.as_str(),
                message: e.to_string(),
            })
    }
}
