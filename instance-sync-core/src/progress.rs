//! Abstract progress events. The engine reports counters; rendering them is
//! the caller's business.

use std::fmt;

/// The independent counters a run advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressLevel {
    Workspaces,
    Projects,
    Datasets,
    Items,
    Members,
}

impl fmt::Display for ProgressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProgressLevel::Workspaces => "workspaces",
            ProgressLevel::Projects => "projects",
            ProgressLevel::Datasets => "datasets",
            ProgressLevel::Items => "items",
            ProgressLevel::Members => "members",
        };
        f.write_str(s)
    }
}

/// Receiver for progress events.
///
/// `start` opens a counter with a known total, `advance` moves it forward and
/// `finish` closes it. A level may be started again after it finished (one
/// items counter per dataset, one datasets counter per project, ...).
pub trait ProgressSink: Send + Sync {
    fn start(&self, level: ProgressLevel, message: &str, total: usize);

    fn advance(&self, level: ProgressLevel, n: usize);

    fn finish(&self, level: ProgressLevel);
}

/// Renders progress as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn start(&self, level: ProgressLevel, message: &str, total: usize) {
        tracing::info!(%level, total, "{message}");
    }

    fn advance(&self, level: ProgressLevel, n: usize) {
        tracing::debug!(%level, n, "progress advanced");
    }

    fn finish(&self, level: ProgressLevel) {
        tracing::debug!(%level, "progress finished");
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn start(&self, _level: ProgressLevel, _message: &str, _total: usize) {}

    fn advance(&self, _level: ProgressLevel, _n: usize) {}

    fn finish(&self, _level: ProgressLevel) {}
}
