//! # Reconciler
//!
//! Converges the control plane onto the policies declared in the bucket.
//!
//! The reconciler holds no state between runs. Every entry point re-reads the
//! declared documents, re-resolves the live policy and its attachments, and
//! derives the full diff from scratch, so runs can be repeated, interleaved or
//! interrupted without leaving anything to clean up.
//!
//! ## Entry Points
//!
//! - [`Reconciler::reconcile_policy_object`]: create or update the policy from
//!   its definition, then reconcile attachments
//! - [`Reconciler::reconcile_attachments`]: attach declared targets and detach
//!   the rest
//! - [`Reconciler::delete_policy_lifecycle`]: detach known targets, delete the
//!   policy and confirm it is gone
//!
//! Every control-plane mutation goes through the [`RetryExecutor`]. A
//! sub-operation that cannot complete is counted as degraded in the
//! [`ReconcileReport`] and the run moves on.

pub mod attachments;
pub mod diff;
pub mod finalize;
pub mod policy;
pub mod types;

use crate::config::SharedControllerConfig;
use crate::controller::reader::PolicyDirectoryReader;
use crate::controller::resolver::PolicyStateResolver;
use crate::controller::retry::RetryExecutor;
use crate::provider::{ControlPlane, ObjectStore};
use std::sync::Arc;

// Re-export public API
pub use diff::AttachmentPlan;
pub use types::{PolicyAction, ReconcileReport, ReconcilerError};

#[derive(Clone)]
pub struct Reconciler {
    control_plane: Arc<dyn ControlPlane>,
    reader: PolicyDirectoryReader,
    resolver: PolicyStateResolver,
    executor: RetryExecutor,
    config: SharedControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("policy_type", &self.config.policy_type)
            .field("retry_policy", self.executor.policy())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        store: Arc<dyn ObjectStore>,
        config: SharedControllerConfig,
    ) -> Self {
        let executor = RetryExecutor::new(config.retry_policy());
        Self {
            reader: PolicyDirectoryReader::new(store, Arc::clone(&config)),
            resolver: PolicyStateResolver::new(Arc::clone(&control_plane), executor.clone()),
            control_plane,
            executor,
            config,
        }
    }

    #[must_use]
    pub fn reader(&self) -> &PolicyDirectoryReader {
        &self.reader
    }

    #[must_use]
    pub fn resolver(&self) -> &PolicyStateResolver {
        &self.resolver
    }

    #[must_use]
    pub fn config(&self) -> &SharedControllerConfig {
        &self.config
    }
}
