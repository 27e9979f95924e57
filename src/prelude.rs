//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use backup_policy_controller::prelude::*;
//! ```

// Model types
pub use crate::model::{
    FileKind, Lookup, PolicyDocument, PolicyId, ProcessingMode, TargetId, TargetList, TargetSet,
};

// Provider traits - needed for implementing providers
pub use crate::provider::{
    ControlPlane, ControlPlaneError, ControlPlaneErrorKind, MessageQueue, ObjectStore,
};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    AttachmentPlan, PolicyAction, ReconcileReport, Reconciler, ReconcilerError,
};
pub use crate::controller::retry::{RetryExecutor, RetryOutcome, RetryPolicy};

// Events and stages
pub use crate::controller::event::{ChangeAction, ChangeEvent};
pub use crate::controller::handler::ChangeEventHandler;
pub use crate::ingest::{IngestError, IngestPipeline};
pub use crate::runtime::Stage;

// Config types
pub use crate::config::{ControllerConfig, SharedControllerConfig};
