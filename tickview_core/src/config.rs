//! Bridge configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::OverflowPolicy;
use crate::error::{CoreError, CoreResult};

/// Runtime knobs for a [`TickBridge`](crate::TickBridge).
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Minimum slots per store; grown to the schema's capacity if smaller
    pub slot_capacity: usize,
    /// Transition ring size per store
    pub transition_capacity: usize,
    /// Bound of the command queue
    pub command_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Ticks between forced resyncs; 0 disables the heartbeat
    pub heartbeat_interval_ticks: u64,
    pub manual_enabled: bool,
    pub automation_enabled: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            slot_capacity: 0,
            transition_capacity: 256,
            command_capacity: 64,
            overflow_policy: OverflowPolicy::DropOldest,
            heartbeat_interval_ticks: 300,
            manual_enabled: true,
            automation_enabled: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.transition_capacity == 0 {
            return Err(CoreError::config("transition_capacity must be at least 1"));
        }
        if self.command_capacity == 0 {
            return Err(CoreError::config("command_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = BridgeConfig::from_json_str(
            r#"{ "command_capacity": 4, "overflow_policy": "reject_newest" }"#,
        )
        .unwrap();
        assert_eq!(config.command_capacity, 4);
        assert_eq!(config.overflow_policy, OverflowPolicy::RejectNewest);
        assert_eq!(config.heartbeat_interval_ticks, 300);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            BridgeConfig::from_json_str(r#"{ "command_capacity": 0 }"#),
            Err(CoreError::InvalidConfig(_))
        ));
        assert!(matches!(
            BridgeConfig::from_json_str("{ not json"),
            Err(CoreError::ConfigParse(_))
        ));
    }
}
