//! Progress reporting and cancellation for indexing jobs.
//!
//! Every job carries one [`ProgressIndicator`]. The scheduler polls it for
//! cancellation and pushes the completion fraction into it. Reporters are
//! external code: a panicking reporter must never corrupt job state, so all
//! UI calls go through [`report_fraction`] / [`report_text`].

use std::panic::{self, AssertUnwindSafe};
use tokio_util::sync::CancellationToken;

pub trait ProgressIndicator: Send + Sync {
    fn is_canceled(&self) -> bool;

    fn set_fraction(&self, _fraction: f64) {}

    fn set_text(&self, _text: &str) {}
}

/// Progress handle backed by a [`CancellationToken`] with no UI attached.
#[derive(Debug, Clone, Default)]
pub struct CancellableProgress {
    token: CancellationToken,
}

impl CancellableProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }
}

impl ProgressIndicator for CancellableProgress {
    fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Forward a fraction to the reporter, swallowing panics.
pub(crate) fn report_fraction(progress: &dyn ProgressIndicator, fraction: f64) {
    if panic::catch_unwind(AssertUnwindSafe(|| progress.set_fraction(fraction))).is_err() {
        tracing::debug!(target: "scheduler", "progress reporter panicked in set_fraction");
    }
}

/// Forward a location text to the reporter, swallowing panics.
pub(crate) fn report_text(progress: &dyn ProgressIndicator, text: &str) {
    if panic::catch_unwind(AssertUnwindSafe(|| progress.set_text(text))).is_err() {
        tracing::debug!(target: "scheduler", "progress reporter panicked in set_text");
    }
}

/// Cancellation check that treats a panicking reporter as "not cancelled".
pub(crate) fn is_canceled(progress: &dyn ProgressIndicator) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| progress.is_canceled())).unwrap_or(false)
}
