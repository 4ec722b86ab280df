//! Core clock trait for roost engines.

use async_trait::async_trait;
use std::time::Duration;

/// The time interface used by retrying collaborator wrappers.
///
/// This trait abstracts the clock so that the batch orchestrator runs
/// identically in production (tokio) and in tests (virtual time).
///
/// # Implementations
///
/// - **Production**: `TokioClock` - wraps `tokio::time`
/// - **Tests**: `InstantClock` - virtual clock, records requested sleeps
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since clock creation.
    ///
    /// Used for duration measurements in batch logging.
    /// In tests, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In tests: advances the virtual clock without waiting
    async fn sleep(&self, duration: Duration);
}
