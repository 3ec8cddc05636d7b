//! Pipeline execution primitives.
//!
//! Every pipeline stage (encoder, renderer, media sender, RTP sender)
//! implements [`Executable`]; a [`ThreadedExecutor`](executor::ThreadedExecutor)
//! drives one executable on its own named worker thread, and a
//! [`Pipeline`](pipeline::Pipeline) owns the ordered set of executors.

pub mod executor;
pub mod pipeline;

use std::sync::OnceLock;
use std::time::Instant;

pub use executor::ThreadedExecutor;
pub use pipeline::Pipeline;

use crate::error::Result;

/// Microsecond timestamp on the shared monotonic clock.
pub type TimestampUs = i64;

/// One single-purpose unit of work driven by an executor.
///
/// `execute` runs one bounded iteration (≤ 100 ms) and returns whether
/// the executor should keep going. Returning `false` surrenders the
/// stage: the executor exits its loop and calls [`stop`](Self::stop),
/// but the rest of the pipeline keeps running.
pub trait Executable: Send + Sync {
    /// Stage name; also used as the worker thread name.
    fn name(&self) -> &'static str;

    /// Called once before the first `execute`.
    fn start(&self) -> Result<()>;

    /// Run one iteration. `true` means continue, `false` means stop.
    fn execute(&self) -> bool;

    /// Stop the stage. May run concurrently with a final `execute`
    /// still on the worker; must unblock any wait that `execute` sits
    /// in so the executor's join is bounded.
    fn stop(&self) -> Result<()>;
}

/// Monotonic time in microseconds since the first call in this process.
///
/// All pipeline timestamps (buffer stamps, PCR, PAT/PMT cadence) are
/// derived from this single clock.
pub fn now_us() -> TimestampUs {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as TimestampUs
}
