//! # Controller
//!
//! Core controller modules for the backup policy controller.
//!
//! - `backoff`: Fibonacci backoff for queue receive failures
//! - `retry`: bounded retry of single control-plane calls
//! - `event`: change events and S3 notifications
//! - `reader`: declared documents in the bucket
//! - `resolver`: live policy ids and attachments
//! - `reconciler`: create/update/delete and attachment convergence
//! - `handler`: reconcile-stage message dispatch
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod event;
pub mod handler;
pub mod reader;
pub mod reconciler;
pub mod resolver;
pub mod retry;
pub mod server;
