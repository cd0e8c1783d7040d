//! TickView deterministic simulation harness
//!
//! Drives a [`TickBridge`](tickview_core::TickBridge) with a small arena
//! domain and a set of simulated presentation layers, all on one seeded
//! virtual clock. The same seed always produces the same ticks, the same
//! arbitration decisions and the same published frames.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │   SimClock (virtual time + ChaCha8 streams)              │
//! │                                                          │
//! │   Presenter ──RawCommand──► CommandChannel               │
//! │   (cadence,                      │                       │
//! │    contract)                     ▼                       │
//! │      ▲               Arbiter ◄── ArenaDomain             │
//! │      │                  │       (automated intent)       │
//! │      │                  ▼                                │
//! │      └── published ◄── DoubleBuffer ◄── publish          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tickview_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::CooldownOverride);
//! assert!(result.passed);
//! ```

pub mod arena;
mod context;
mod error;
mod exporter;
pub mod live;
pub mod presenter;
mod runner;
pub mod scenarios;
mod world;

pub use arena::{ArenaDomain, Enemy, Executed, Stance};
pub use context::SimClock;
pub use error::{SimError, SimResult};
pub use exporter::{FrameAction, FrameRejection, SimExport, SimFrame, SlotChange};
pub use live::{run_live, LiveSummary};
pub use presenter::{Cadence, Observation, Presenter, ScanMode, ScriptedCommand};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use world::{SimConfig, SimWorld, WorldStats};
