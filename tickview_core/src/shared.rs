//! Framework-tier schema owned by the core itself.
//!
//! These slots carry the bridge's own state (tick, control ownership, block
//! reasons, channel counters, heartbeat) so every presentation layer can
//! show them without knowing the domain.

use crate::arbitration::{RejectionReason, SourceTag};
use crate::error::{CoreError, CoreResult};
use crate::ids::SlotId;
use crate::schema::{Namespace, Registrar, SchemaProvider, SchemaSnapshot};
use crate::value::ValueType;

pub const NAMESPACE: &str = "shared";

/// Enum namespace for `shared.control.block_reason`.
pub const BLOCK_REASON_ENUM: &str = "shared.block_reason";
/// Enum namespace for `shared.control.last_actor`.
pub const SOURCE_ENUM: &str = "shared.source";

pub const TICK: &str = "shared.tick";
pub const LAST_ACTOR: &str = "shared.control.last_actor";
pub const LAST_ACTOR_SINCE: &str = "shared.control.last_actor_since";
pub const LAST_ACTION: &str = "shared.control.last_action";
pub const BLOCK_REASON: &str = "shared.control.block_reason";
pub const BLOCK_TICK: &str = "shared.control.block_tick";
pub const MANUAL_ENABLED: &str = "shared.control.manual_enabled";
pub const AUTOMATION_ENABLED: &str = "shared.control.automation_enabled";
pub const COMMANDS_DROPPED: &str = "shared.commands.dropped";
pub const COMMANDS_REJECTED: &str = "shared.commands.rejected";
pub const HEARTBEAT_EPOCH: &str = "shared.heartbeat.epoch";

const SLOTS: [(&str, u32, ValueType); 11] = [
    (TICK, 0, ValueType::Int),
    (LAST_ACTOR, 1, ValueType::Int),
    (LAST_ACTOR_SINCE, 2, ValueType::Int),
    (LAST_ACTION, 3, ValueType::Int),
    (BLOCK_REASON, 4, ValueType::Int),
    (BLOCK_TICK, 5, ValueType::Int),
    (MANUAL_ENABLED, 6, ValueType::Bool),
    (AUTOMATION_ENABLED, 7, ValueType::Bool),
    (COMMANDS_DROPPED, 8, ValueType::Int),
    (COMMANDS_REJECTED, 9, ValueType::Int),
    (HEARTBEAT_EPOCH, 10, ValueType::Int),
];

/// Registers the shared slots and enums. Must be part of every schema the
/// bridge runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedSchema;

impl SchemaProvider for SharedSchema {
    fn namespace(&self) -> Namespace {
        Namespace::shared(NAMESPACE)
    }

    fn layer_order(&self) -> i32 {
        i32::MIN
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        for (path, id, value_type) in SLOTS {
            registrar.slot(path, id, value_type);
        }
        for reason in RejectionReason::ALL {
            registrar.enum_code(BLOCK_REASON_ENUM, reason.code(), reason.label());
        }
        registrar.enum_code(SOURCE_ENUM, 0, "none");
        for source in [SourceTag::Manual, SourceTag::Automated] {
            registrar.enum_code(SOURCE_ENUM, source.code(), source.label());
        }
    }
}

/// Resolved ids of the shared slots.
#[derive(Debug, Clone, Copy)]
pub struct SharedSlots {
    pub tick: SlotId,
    pub last_actor: SlotId,
    pub last_actor_since: SlotId,
    pub last_action: SlotId,
    pub block_reason: SlotId,
    pub block_tick: SlotId,
    pub manual_enabled: SlotId,
    pub automation_enabled: SlotId,
    pub commands_dropped: SlotId,
    pub commands_rejected: SlotId,
    pub heartbeat_epoch: SlotId,
}

impl SharedSlots {
    pub fn resolve(schema: &SchemaSnapshot) -> CoreResult<Self> {
        let get = |path: &str| {
            schema
                .slot(path)
                .ok_or_else(|| CoreError::MissingSharedSchema(path.to_string()))
        };
        Ok(Self {
            tick: get(TICK)?,
            last_actor: get(LAST_ACTOR)?,
            last_actor_since: get(LAST_ACTOR_SINCE)?,
            last_action: get(LAST_ACTION)?,
            block_reason: get(BLOCK_REASON)?,
            block_tick: get(BLOCK_TICK)?,
            manual_enabled: get(MANUAL_ENABLED)?,
            automation_enabled: get(AUTOMATION_ENABLED)?,
            commands_dropped: get(COMMANDS_DROPPED)?,
            commands_rejected: get(COMMANDS_REJECTED)?,
            heartbeat_epoch: get(HEARTBEAT_EPOCH)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaBuilder;

    #[test]
    fn test_shared_schema_resolves() {
        let schema = SchemaBuilder::new().with(&SharedSchema).build().unwrap();
        let slots = SharedSlots::resolve(&schema).unwrap();
        assert_eq!(slots.tick, SlotId(0));
        assert_eq!(slots.heartbeat_epoch, SlotId(10));
        assert_eq!(schema.enum_label(BLOCK_REASON_ENUM, 1).to_string(), "cooldown");
        assert_eq!(schema.enum_label(SOURCE_ENUM, 2).to_string(), "automated");
    }
}
