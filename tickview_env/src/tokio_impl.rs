//! Wall-clock `TickContext` for live drivers.

use crate::TickContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tokio-backed context. Time is measured from construction and every
/// derived stream seed is fresh entropy, so runs are not reproducible.
#[derive(Debug, Clone)]
pub struct TokioContext {
    origin: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Shared handle for the sim and presenter tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Whole ticks of `tick_len` elapsed since construction.
    pub fn ticks_elapsed(&self, tick_len: Duration) -> u64 {
        if tick_len.is_zero() {
            return 0;
        }
        (self.origin.elapsed().as_nanos() / tick_len.as_nanos()) as u64
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TickContext for TokioContext {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn derive_seed(&self, _stream: u64) -> u64 {
        rand::random()
    }

    fn seed(&self) -> u64 {
        0
    }
}
