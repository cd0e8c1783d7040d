//! Error types for the simulation harness.

use thiserror::Error;
use tickview_core::{CoreError, SchemaBuildReport};

/// Errors raised while setting up or driving a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// The bridge or one of its parts failed
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Strict schema build rejected the providers
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaBuildReport),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Export error: {0}")]
    Export(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;
