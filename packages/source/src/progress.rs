//! Progress reporting for the per-city pipeline stages.
//!
//! Stages report through [`ProgressCallback`] so library code stays
//! independent of how (or whether) progress is rendered. The binary plugs
//! in `indicatif` bars; tests and library callers use [`null_progress`].

use std::sync::Arc;

/// Receives progress updates from a running stage.
///
/// Matching calls [`inc`](Self::inc) from rayon worker threads, so
/// implementations must be `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Sets the total expected units of work.
    fn set_total(&self, total: u64);

    /// Advances progress by `delta` units.
    fn inc(&self, delta: u64);

    /// Updates the message shown alongside the indicator.
    fn set_message(&self, msg: String);

    /// Marks the stage complete with a final message.
    fn finish(&self, msg: String);

    /// Marks the stage complete and removes the indicator.
    fn finish_and_clear(&self);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
