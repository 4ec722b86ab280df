//! Roost Environment Abstraction Layer
//!
//! This crate provides the "sans-IO" seam between roost's clustering
//! engines and the real world. The only environmental effect the core
//! needs is time: retry backoff against a flaky address directory has to
//! sleep, and tests have to observe those sleeps without actually waiting.
//!
//! # Implementations
//!
//! - **Production**: [`TokioClock`] - wraps `tokio::time`
//! - **Tests**: [`InstantClock`] - advances a virtual clock and records
//!   every requested sleep, so a 5-attempt backoff schedule can be
//!   asserted in microseconds
//!
//! # Example
//!
//! ```ignore
//! use roost_env::{Clock, TokioClock};
//!
//! async fn backoff<C: Clock>(clock: &C) {
//!     clock.sleep(std::time::Duration::from_secs(1)).await;
//! }
//! ```

mod clock;
mod instant;
mod tokio_impl;

pub use clock::Clock;
pub use instant::InstantClock;
pub use tokio_impl::TokioClock;
