//! TickView Environment Abstraction Layer
//!
//! This crate provides the types and clock abstraction shared by the
//! simulation core and its presentation layers, so the same core can run
//! under a **Production** clock (tokio) or a **Simulation** clock (virtual,
//! seeded).
//!
//! # Core Concept: Simulation Owns Truth
//!
//! The simulation advances in discrete [`Tick`]s. Presentation layers run on
//! their own cadence and only ever observe published state or submit intent.
//! Everything that would introduce non-determinism is reached through
//! [`TickContext`]:
//! - Time (`now()`, `sleep()`)
//! - Randomness (`derive_seed()`)
//!
//! By deriving all entropy from a single 64-bit seed, any run becomes
//! reproducible via its seed number.
//!
//! # Example
//!
//! ```ignore
//! use tickview_env::{TickContext, Tick};
//!
//! async fn drive<Ctx: TickContext>(ctx: &Ctx, tick_len: Duration) {
//!     let mut tick = Tick::ZERO;
//!     loop {
//!         ctx.sleep(tick_len).await;
//!         tick = tick.next();
//!         step(tick);
//!     }
//! }
//! ```

mod context;
mod types;
mod tokio_impl;

pub use context::TickContext;
pub use types::{EntityRef, Tick};
pub use tokio_impl::TokioContext;
