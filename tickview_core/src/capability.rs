//! Capability negotiation between presentation layers and the registry.
//!
//! A presentation module declares what it depends on as a
//! [`CapabilityContract`] and validates it against the built snapshot before
//! binding. Unsatisfied capabilities are a degraded-mode signal, never an
//! error: the feature is disabled (required missing) or partially hidden
//! (optional missing), and the simulation keeps running.

use serde::Serialize;
use tracing::{info, warn};

use crate::ids::{ActionId, SlotId};
use crate::schema::{SchemaKind, SchemaSnapshot};
use crate::value::ValueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Required,
    Optional,
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub path: String,
    pub kind: SchemaKind,
    pub requirement: Requirement,
    /// Checked for slots only
    pub expected_type: Option<ValueType>,
}

/// Named set of capabilities a presentation feature needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityContract {
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl CapabilityContract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
        }
    }

    fn with(mut self, path: &str, kind: SchemaKind, requirement: Requirement, expected_type: Option<ValueType>) -> Self {
        self.capabilities.push(Capability {
            path: path.to_string(),
            kind,
            requirement,
            expected_type,
        });
        self
    }

    pub fn require_slot(self, path: &str, expected_type: ValueType) -> Self {
        self.with(path, SchemaKind::Slot, Requirement::Required, Some(expected_type))
    }

    pub fn optional_slot(self, path: &str, expected_type: ValueType) -> Self {
        self.with(path, SchemaKind::Slot, Requirement::Optional, Some(expected_type))
    }

    pub fn require_action(self, path: &str) -> Self {
        self.with(path, SchemaKind::Action, Requirement::Required, None)
    }

    pub fn optional_action(self, path: &str) -> Self {
        self.with(path, SchemaKind::Action, Requirement::Optional, None)
    }

    /// Checks every capability for existence, kind and (for slots) type.
    pub fn validate(&self, schema: &SchemaSnapshot) -> CapabilityReport {
        let outcomes = self
            .capabilities
            .iter()
            .map(|cap| check(cap, schema))
            .collect();
        CapabilityReport {
            contract: self.name.clone(),
            capabilities: self.capabilities.clone(),
            outcomes,
        }
    }
}

fn check(cap: &Capability, schema: &SchemaSnapshot) -> Result<u32, Unsatisfied> {
    if let Some(entry) = schema.entry(cap.kind, &cap.path) {
        return match (cap.expected_type, entry.value_type) {
            (Some(expected), Some(actual)) if expected != actual => {
                Err(Unsatisfied::TypeMismatch { expected, actual })
            }
            _ => Ok(entry.id),
        };
    }

    // Registered, but under the other kind
    let other = match cap.kind {
        SchemaKind::Slot => SchemaKind::Action,
        SchemaKind::Action => SchemaKind::Slot,
    };
    if schema.entry(other, &cap.path).is_some() {
        return Err(Unsatisfied::WrongKind { found: other });
    }
    Err(Unsatisfied::Missing)
}

/// Why a capability is not satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unsatisfied {
    Missing,
    WrongKind { found: SchemaKind },
    TypeMismatch { expected: ValueType, actual: ValueType },
}

impl std::fmt::Display for Unsatisfied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unsatisfied::Missing => f.write_str("not registered"),
            Unsatisfied::WrongKind { found } => write!(f, "registered as {found}"),
            Unsatisfied::TypeMismatch { expected, actual } => {
                write!(f, "expected {expected}, registered as {actual}")
            }
        }
    }
}

/// What a presentation feature may do after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    Enabled,
    /// Optional pieces hidden
    Degraded,
    /// A required capability is missing
    Disabled,
}

/// Per-capability validation outcome.
#[derive(Debug, Clone)]
pub struct CapabilityReport {
    contract: String,
    capabilities: Vec<Capability>,
    outcomes: Vec<Result<u32, Unsatisfied>>,
}

impl CapabilityReport {
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// One boolean per declared capability, in declaration order.
    pub fn results(&self) -> Vec<bool> {
        self.outcomes.iter().map(Result::is_ok).collect()
    }

    pub fn is_satisfied(&self, path: &str) -> bool {
        self.capabilities
            .iter()
            .zip(&self.outcomes)
            .any(|(cap, outcome)| cap.path == path && outcome.is_ok())
    }

    /// Unsatisfied capabilities with their reason.
    pub fn unsatisfied(&self) -> impl Iterator<Item = (&Capability, Unsatisfied)> + '_ {
        self.capabilities
            .iter()
            .zip(&self.outcomes)
            .filter_map(|(cap, outcome)| outcome.err().map(|why| (cap, why)))
    }

    pub fn missing_required(&self) -> Vec<&str> {
        self.missing(Requirement::Required)
    }

    pub fn missing_optional(&self) -> Vec<&str> {
        self.missing(Requirement::Optional)
    }

    fn missing(&self, requirement: Requirement) -> Vec<&str> {
        self.unsatisfied()
            .filter(|(cap, _)| cap.requirement == requirement)
            .map(|(cap, _)| cap.path.as_str())
            .collect()
    }

    pub fn feature_state(&self) -> FeatureState {
        if !self.missing_required().is_empty() {
            FeatureState::Disabled
        } else if !self.missing_optional().is_empty() {
            FeatureState::Degraded
        } else {
            FeatureState::Enabled
        }
    }

    /// Applies the logging policy and returns the resulting state.
    pub fn log(&self) -> FeatureState {
        for (cap, why) in self.unsatisfied() {
            match cap.requirement {
                Requirement::Required => warn!(
                    "Contract '{}': required {} '{}' {} - feature disabled",
                    self.contract, cap.kind, cap.path, why
                ),
                Requirement::Optional => info!(
                    "Contract '{}': optional {} '{}' {} - hidden",
                    self.contract, cap.kind, cap.path, why
                ),
            }
        }
        self.feature_state()
    }

    pub fn resolved_slot(&self, path: &str) -> Option<SlotId> {
        self.resolved(SchemaKind::Slot, path).map(SlotId)
    }

    pub fn resolved_action(&self, path: &str) -> Option<ActionId> {
        self.resolved(SchemaKind::Action, path).map(ActionId)
    }

    fn resolved(&self, kind: SchemaKind, path: &str) -> Option<u32> {
        self.capabilities
            .iter()
            .zip(&self.outcomes)
            .find(|(cap, _)| cap.kind == kind && cap.path == path)
            .and_then(|(_, outcome)| outcome.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Namespace, SchemaBuilder, TableProvider};

    fn schema() -> SchemaSnapshot {
        let x = TableProvider::new(Namespace::domain("x"))
            .slot("x.health", 256, ValueType::Int)
            .slot("x.name", 257, ValueType::Text)
            .action("x.cast", 256);
        SchemaBuilder::new().with(&x).build().unwrap()
    }

    #[test]
    fn test_missing_required_disables_only_that_capability() {
        let contract = CapabilityContract::new("hud")
            .require_slot("x.health", ValueType::Int)
            .require_slot("x.mana", ValueType::Int)
            .optional_slot("x.name", ValueType::Text)
            .require_action("x.cast");

        let report = contract.validate(&schema());
        assert_eq!(report.results(), vec![true, false, true, true]);
        assert_eq!(report.missing_required(), vec!["x.mana"]);
        assert!(report.missing_optional().is_empty());
        assert_eq!(report.feature_state(), FeatureState::Disabled);
        assert_eq!(report.resolved_slot("x.health"), Some(SlotId(256)));
        assert_eq!(report.resolved_slot("x.mana"), None);
        assert_eq!(report.resolved_action("x.cast"), Some(ActionId(256)));
    }

    #[test]
    fn test_optional_missing_degrades() {
        let report = CapabilityContract::new("hud")
            .require_slot("x.health", ValueType::Int)
            .optional_action("x.dance")
            .validate(&schema());
        assert_eq!(report.log(), FeatureState::Degraded);
        assert!(!report.is_satisfied("x.dance"));
    }

    #[test]
    fn test_kind_and_type_are_checked() {
        let report = CapabilityContract::new("hud")
            .require_slot("x.cast", ValueType::Int)
            .require_slot("x.name", ValueType::Int)
            .validate(&schema());

        let reasons: Vec<Unsatisfied> = report.unsatisfied().map(|(_, why)| why).collect();
        assert_eq!(
            reasons,
            vec![
                Unsatisfied::WrongKind { found: SchemaKind::Action },
                Unsatisfied::TypeMismatch {
                    expected: ValueType::Int,
                    actual: ValueType::Text
                },
            ]
        );
    }

    #[test]
    fn test_all_satisfied() {
        let report = CapabilityContract::new("hud")
            .require_slot("x.health", ValueType::Int)
            .validate(&schema());
        assert_eq!(report.feature_state(), FeatureState::Enabled);
    }
}
