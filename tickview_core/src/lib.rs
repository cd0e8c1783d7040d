//! TickView core: the bridge between a deterministic simulation and its
//! presentation layers.
//!
//! Three pieces with real invariants live here:
//!
//! - **Property store** ([`PropertyStore`], [`DoubleBuffer`]): fixed-size
//!   slots with stable-value suppression, per-slot versions, a dirty bitmask,
//!   a bounded transition ring and a force-resync epoch. Readers only ever
//!   see whole ticks.
//! - **Schema registry** ([`SchemaBuilder`], [`SchemaSnapshot`]): stable ids
//!   for named slots and actions, partitioned by owner tier, validated once
//!   at startup. [`CapabilityContract`] lets a presentation layer degrade
//!   instead of failing when something it wants is absent.
//! - **Command protocol** ([`CommandChannel`], [`Arbiter`], [`TickBridge`]):
//!   a bounded ingress queue stamped once per tick, and a soft-override rule
//!   that picks at most one action per tick from manual and automated
//!   sources through one execution path.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tickview_core::{BridgeConfig, SchemaBuilder, SharedSchema, TickBridge};
//!
//! let schema = SchemaBuilder::new()
//!     .with(&SharedSchema)
//!     .with(&my_domain)
//!     .build()?;
//! let mut bridge = TickBridge::new(BridgeConfig::default(), Arc::new(schema))?;
//! let sender = bridge.sender();          // hand to a presentation layer
//!
//! loop {
//!     let report = bridge.step(&mut my_domain)?;
//!     render(bridge.published());
//! }
//! ```

pub mod arbitration;
pub mod bridge;
pub mod buffer;
pub mod capability;
pub mod command;
pub mod config;
pub mod cycle;
pub mod error;
pub mod ids;
pub mod reader;
pub mod schema;
pub mod shared;
pub mod store;
pub mod value;

pub use arbitration::{
    ActionDomain, Arbiter, ArbitrationOutcome, ControlSwitches, Intent, Ownership, Rejection,
    RejectionReason, SelectedAction, SourceTag,
};
pub use bridge::{FrameWriter, TickBridge, TickReport};
pub use buffer::DoubleBuffer;
pub use capability::{
    Capability, CapabilityContract, CapabilityReport, FeatureState, Requirement, Unsatisfied,
};
pub use command::{
    ChannelStatsSnapshot, CommandChannel, CommandSender, OverflowPolicy, RawCommand,
    StampedCommand, SubmitStatus,
};
pub use config::BridgeConfig;
pub use cycle::{TickCycle, TickPhase};
pub use error::{CoreError, CoreResult};
pub use ids::{ActionId, SlotId};
pub use reader::VersionCursor;
pub use schema::{
    EnumLabel, LineageViolation, Namespace, OwnerTier, ProviderInfo, Registrar, SchemaBuildReport,
    SchemaBuilder, SchemaEntry, SchemaError, SchemaKind, SchemaProvider, SchemaSnapshot,
    TableProvider,
};
pub use shared::{SharedSchema, SharedSlots};
pub use store::{DirtySlots, PropertyStore, TransitionEntry, TransitionRing};
pub use value::{PropertyValue, ShortText, ValueType, TEXT_CAPACITY};
