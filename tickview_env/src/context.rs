//! The clock-and-entropy seam shared by every TickView driver.

use async_trait::async_trait;
use std::time::Duration;

/// Where a driver gets time and randomness from.
///
/// The bridge itself never reads a clock. Drivers that pace ticks or
/// presenter frames go through this trait, so the same loop runs against
/// wall time (`TokioContext`) or a virtual clock (`SimClock` in
/// `tickview_sim`, seeded `ChaCha8Rng`).
///
/// Seeded implementations must return the same values for the same seed
/// and the same call sequence.
#[async_trait]
pub trait TickContext: Send + Sync + 'static {
    /// Monotonic time since the context was created. Virtual in simulation.
    fn now(&self) -> Duration;

    /// Waits `duration`. A virtual clock advances instead of waiting.
    async fn sleep(&self, duration: Duration);

    /// Seed for an independent random stream, keyed by `stream`.
    fn derive_seed(&self, stream: u64) -> u64;

    /// Master seed, 0 when unseeded.
    fn seed(&self) -> u64;
}
