//! # Runtime
//!
//! Process wiring: which stages run, how their queues are consumed, and how
//! failures are absorbed.

use clap::ValueEnum;
use std::fmt;

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

/// Pipeline stage(s) a process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Stage {
    /// Consume change events and reconcile policies
    Reconcile,
    /// Consume bucket notifications, extract bundles and publish change events
    Ingest,
    /// Both stages in one process
    All,
}

impl Stage {
    #[must_use]
    pub fn runs_reconcile(self) -> bool {
        matches!(self, Stage::Reconcile | Stage::All)
    }

    #[must_use]
    pub fn runs_ingest(self) -> bool {
        matches!(self, Stage::Ingest | Stage::All)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Reconcile => "reconcile",
            Stage::Ingest => "ingest",
            Stage::All => "all",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
