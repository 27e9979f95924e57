//! Backup Policy Controller Library
//!
//! Event-driven reconciliation of AWS Organizations backup policies against
//! policy directories stored in S3. Tests are included in the module files
//! and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use backup_policy_controller::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod ingest;
pub mod model;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
