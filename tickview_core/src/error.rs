//! Error types for the TickView core.
//!
//! Schema build diagnostics live in [`crate::schema::SchemaError`]; command
//! rejections are not errors at all (see [`crate::RejectionReason`]). What
//! remains here are faults of the core itself.

use thiserror::Error;
use tickview_env::Tick;

use crate::cycle::TickPhase;
use crate::ids::SlotId;
use crate::value::ValueType;

/// Faults raised by the store, the tick cycle and the bridge.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Slot index beyond the store's allocated capacity.
    #[error("{slot} is out of range (capacity {capacity})")]
    OutOfRange { slot: SlotId, capacity: usize },

    /// A tick phase was skipped or revisited.
    #[error("tick {tick}: illegal phase transition {from:?} -> {to:?}")]
    PhaseOrder {
        tick: Tick,
        from: TickPhase,
        to: TickPhase,
    },

    /// A tick was started that does not follow the current one.
    #[error("tick regression: current {current}, requested {requested}")]
    TickRegression { current: Tick, requested: Tick },

    /// Path not present in the schema snapshot.
    #[error("unknown slot path '{0}'")]
    UnknownPath(String),

    /// Slot id the schema snapshot never registered.
    #[error("{0} is not registered in the schema")]
    UnregisteredSlot(SlotId),

    /// Written value does not match the slot's declared type.
    #[error("slot '{path}' expects {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// The snapshot lacks a slot the core publishes itself.
    #[error("schema is missing shared slot '{0}' (was the shared provider registered?)")]
    MissingSharedSchema(String),

    /// The bridge stopped after an invariant violation.
    #[error("bridge halted: {0}")]
    Halted(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Creates an invalid-config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Result alias used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;
