//! Virtual clock for tests.

use crate::Clock;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Test clock that never waits.
///
/// Each `sleep` call advances a virtual clock and is recorded, so tests
/// can assert on a retry policy's backoff schedule without paying the
/// wall-clock cost of the sleeps.
pub struct InstantClock {
    /// Virtual elapsed time plus the log of every sleep requested so far.
    state: Mutex<InstantState>,
}

struct InstantState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl InstantClock {
    /// Creates a new virtual clock at time zero.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InstantState {
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Returns every sleep duration requested so far, in order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.state.lock().unwrap().sleeps.clone()
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for InstantClock {
    fn now(&self) -> Duration {
        self.state.lock().unwrap().elapsed
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}
