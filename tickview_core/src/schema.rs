//! Schema registry - stable integer addresses for named slots and actions.
//!
//! Registration happens once at startup. Every owning module implements
//! [`SchemaProvider`] and declares its paths, numeric ids and enum codes
//! through a [`Registrar`]. [`SchemaBuilder::build`] validates everything in
//! one pass and produces an immutable [`SchemaSnapshot`].
//!
//! # Id discipline
//!
//! Ids are chosen by the providers, not allocated by the registry, and are
//! partitioned by owner tier:
//!
//! ```text
//! Shared     0    .. 256     framework slots owned by the core
//! Domain     256  .. 4096    the simulation's own properties/actions
//! Extension  4096 .. 65536   add-on modules
//! ```
//!
//! A published id is never reused. Deprecated entries are declared with
//! `retire_slot` / `retire_action` and stay reserved forever. Validation is
//! the backstop; the ranges are the primary defense.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ids::{ActionId, SlotId};
use crate::value::ValueType;

// =============================================================================
// VOCABULARY
// =============================================================================

/// The two id spaces. Paths and ids are unique per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Slot,
    Action,
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaKind::Slot => f.write_str("slot"),
            SchemaKind::Action => f.write_str("action"),
        }
    }
}

/// Ownership tier of a namespace, each with a reserved id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerTier {
    Shared,
    Domain,
    Extension,
}

impl OwnerTier {
    pub fn id_range(self) -> Range<u32> {
        match self {
            OwnerTier::Shared => 0..256,
            OwnerTier::Domain => 256..4096,
            OwnerTier::Extension => 4096..65536,
        }
    }
}

impl std::fmt::Display for OwnerTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OwnerTier::Shared => f.write_str("shared"),
            OwnerTier::Domain => f.write_str("domain"),
            OwnerTier::Extension => f.write_str("extension"),
        }
    }
}

/// Path prefix owned by one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub name: String,
    pub tier: OwnerTier,
}

impl Namespace {
    pub fn new(name: impl Into<String>, tier: OwnerTier) -> Self {
        Self {
            name: name.into(),
            tier,
        }
    }

    pub fn shared(name: impl Into<String>) -> Self {
        Self::new(name, OwnerTier::Shared)
    }

    pub fn domain(name: impl Into<String>) -> Self {
        Self::new(name, OwnerTier::Domain)
    }

    pub fn extension(name: impl Into<String>) -> Self {
        Self::new(name, OwnerTier::Extension)
    }

    /// True if `path` is `<name>.<something>`.
    pub fn contains(&self, path: &str) -> bool {
        path.strip_prefix(self.name.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|rest| !rest.is_empty())
    }
}

/// One published slot or action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaEntry {
    pub path: String,
    pub kind: SchemaKind,
    pub id: u32,
    /// Declared type; always `Some` for slots, `None` for actions
    pub value_type: Option<ValueType>,
    pub namespace: String,
    /// Diagnostic ordering only
    pub layer_order: i32,
}

impl SchemaEntry {
    pub fn slot_id(&self) -> Option<SlotId> {
        (self.kind == SchemaKind::Slot).then_some(SlotId(self.id))
    }

    pub fn action_id(&self) -> Option<ActionId> {
        (self.kind == SchemaKind::Action).then_some(ActionId(self.id))
    }
}

/// Metadata of a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub tier: OwnerTier,
    pub layer_order: i32,
}

// =============================================================================
// PROVIDERS
// =============================================================================

/// Implemented by every module that owns schema entries.
pub trait SchemaProvider {
    /// Namespace all of this provider's paths live under.
    fn namespace(&self) -> Namespace;

    /// Ordering for diagnostics. Never used to resolve conflicts.
    fn layer_order(&self) -> i32 {
        0
    }

    fn register(&self, registrar: &mut Registrar<'_>);
}

#[derive(Debug, Clone)]
struct PendingEntry {
    entry: SchemaEntry,
    provider: usize,
}

#[derive(Debug, Clone)]
struct PendingEnum {
    namespace: String,
    code: i64,
    label: String,
    provider: usize,
}

#[derive(Debug, Clone)]
struct PendingRetired {
    kind: SchemaKind,
    id: u32,
    path: String,
    provider: usize,
}

/// Registration handle scoped to one provider.
pub struct Registrar<'a> {
    builder: &'a mut SchemaBuilder,
    provider: usize,
}

impl Registrar<'_> {
    fn info(&self) -> &ProviderInfo {
        &self.builder.providers[self.provider]
    }

    fn push(&mut self, path: &str, kind: SchemaKind, id: u32, value_type: Option<ValueType>) {
        let info = self.info();
        let entry = SchemaEntry {
            path: path.to_string(),
            kind,
            id,
            value_type,
            namespace: info.name.clone(),
            layer_order: info.layer_order,
        };
        self.builder.entries.push(PendingEntry {
            entry,
            provider: self.provider,
        });
    }

    pub fn slot(&mut self, path: &str, id: u32, value_type: ValueType) -> &mut Self {
        self.push(path, SchemaKind::Slot, id, Some(value_type));
        self
    }

    pub fn action(&mut self, path: &str, id: u32) -> &mut Self {
        self.push(path, SchemaKind::Action, id, None);
        self
    }

    /// Declares `code -> label` inside the enum namespace `namespace`.
    pub fn enum_code(&mut self, namespace: &str, code: i64, label: &str) -> &mut Self {
        self.builder.enums.push(PendingEnum {
            namespace: namespace.to_string(),
            code,
            label: label.to_string(),
            provider: self.provider,
        });
        self
    }

    /// Declares a deprecated slot whose id stays reserved.
    pub fn retire_slot(&mut self, path: &str, id: u32) -> &mut Self {
        self.retire(SchemaKind::Slot, path, id)
    }

    /// Declares a deprecated action whose id stays reserved.
    pub fn retire_action(&mut self, path: &str, id: u32) -> &mut Self {
        self.retire(SchemaKind::Action, path, id)
    }

    fn retire(&mut self, kind: SchemaKind, path: &str, id: u32) -> &mut Self {
        self.builder.retired.push(PendingRetired {
            kind,
            id,
            path: path.to_string(),
            provider: self.provider,
        });
        self
    }
}

/// Data-driven provider, for extensions whose layout is declared as tables.
#[derive(Debug, Clone)]
pub struct TableProvider {
    namespace: Namespace,
    layer_order: i32,
    slots: Vec<(String, u32, ValueType)>,
    actions: Vec<(String, u32)>,
    enums: Vec<(String, i64, String)>,
    retired: Vec<(SchemaKind, String, u32)>,
}

impl TableProvider {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            layer_order: 0,
            slots: Vec::new(),
            actions: Vec::new(),
            enums: Vec::new(),
            retired: Vec::new(),
        }
    }

    pub fn with_layer_order(mut self, layer_order: i32) -> Self {
        self.layer_order = layer_order;
        self
    }

    pub fn slot(mut self, path: &str, id: u32, value_type: ValueType) -> Self {
        self.slots.push((path.to_string(), id, value_type));
        self
    }

    pub fn action(mut self, path: &str, id: u32) -> Self {
        self.actions.push((path.to_string(), id));
        self
    }

    pub fn enum_code(mut self, namespace: &str, code: i64, label: &str) -> Self {
        self.enums.push((namespace.to_string(), code, label.to_string()));
        self
    }

    pub fn retired(mut self, kind: SchemaKind, path: &str, id: u32) -> Self {
        self.retired.push((kind, path.to_string(), id));
        self
    }
}

impl SchemaProvider for TableProvider {
    fn namespace(&self) -> Namespace {
        self.namespace.clone()
    }

    fn layer_order(&self) -> i32 {
        self.layer_order
    }

    fn register(&self, registrar: &mut Registrar<'_>) {
        for (path, id, value_type) in &self.slots {
            registrar.slot(path, *id, *value_type);
        }
        for (path, id) in &self.actions {
            registrar.action(path, *id);
        }
        for (namespace, code, label) in &self.enums {
            registrar.enum_code(namespace, *code, label);
        }
        for (kind, path, id) in &self.retired {
            registrar.retire(*kind, path, *id);
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// A registry build violation. Each names the provider(s) at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("duplicate {kind} path '{path}' registered by '{first_provider}' and '{second_provider}'")]
    DuplicatePath {
        kind: SchemaKind,
        path: String,
        first_provider: String,
        second_provider: String,
    },

    #[error("{kind} id {id} claimed by '{first_path}' ({first_provider}) and '{second_path}' ({second_provider})")]
    IdCollision {
        kind: SchemaKind,
        id: u32,
        first_path: String,
        first_provider: String,
        second_path: String,
        second_provider: String,
    },

    #[error("enum '{namespace}' code {code} used for '{first_label}' ({first_provider}) and '{second_label}' ({second_provider})")]
    EnumCodeCollision {
        namespace: String,
        code: i64,
        first_label: String,
        first_provider: String,
        second_label: String,
        second_provider: String,
    },

    #[error("{kind} id {id} for '{path}' ({provider}) is retired (was '{retired_path}')")]
    RetiredId {
        kind: SchemaKind,
        id: u32,
        path: String,
        provider: String,
        retired_path: String,
    },

    #[error("'{path}' is outside namespace '{namespace}'")]
    ForeignPath { path: String, namespace: String },

    #[error("{kind} id {id} for '{path}' ({provider}) lies outside the {tier} range {start}..{end}")]
    IdOutOfTierRange {
        kind: SchemaKind,
        id: u32,
        path: String,
        provider: String,
        tier: OwnerTier,
        start: u32,
        end: u32,
    },
}

impl SchemaError {
    /// Paths (or enum namespaces) named by this error.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            SchemaError::DuplicatePath { path, .. } => vec![path],
            SchemaError::IdCollision {
                first_path,
                second_path,
                ..
            } => vec![first_path, second_path],
            SchemaError::EnumCodeCollision { namespace, .. } => vec![namespace],
            SchemaError::RetiredId { path, .. } => vec![path],
            SchemaError::ForeignPath { path, .. } => vec![path],
            SchemaError::IdOutOfTierRange { path, .. } => vec![path],
        }
    }

    /// Providers at fault.
    pub fn providers(&self) -> Vec<&str> {
        match self {
            SchemaError::DuplicatePath {
                first_provider,
                second_provider,
                ..
            }
            | SchemaError::IdCollision {
                first_provider,
                second_provider,
                ..
            }
            | SchemaError::EnumCodeCollision {
                first_provider,
                second_provider,
                ..
            } => vec![first_provider, second_provider],
            SchemaError::RetiredId { provider, .. } => vec![provider],
            SchemaError::ForeignPath { namespace, .. } => vec![namespace],
            SchemaError::IdOutOfTierRange { provider, .. } => vec![provider],
        }
    }
}

/// Every violation found by a strict build.
#[derive(Debug, Clone, Error)]
#[error("schema build failed with {} error(s)", .errors.len())]
pub struct SchemaBuildReport {
    pub errors: Vec<SchemaError>,
}

impl SchemaBuildReport {
    pub fn contains_path(&self, path: &str) -> bool {
        self.errors.iter().any(|e| e.paths().contains(&path))
    }

    /// Distinct offending providers, in first-reported order.
    pub fn providers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for name in self.errors.iter().flat_map(|e| e.providers()) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }
}

/// A previously published id that a newer snapshot no longer honors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineageViolation {
    #[error("{kind} '{path}' moved from id {previous} to {current}")]
    IdChanged {
        kind: SchemaKind,
        path: String,
        previous: u32,
        current: u32,
    },

    #[error("{kind} '{path}' (id {id}) disappeared without being retired")]
    Vanished {
        kind: SchemaKind,
        path: String,
        id: u32,
    },
}

// =============================================================================
// BUILDER
// =============================================================================

/// Accumulates provider registrations and validates them into a snapshot.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    providers: Vec<ProviderInfo>,
    entries: Vec<PendingEntry>,
    enums: Vec<PendingEnum>,
    retired: Vec<PendingRetired>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `provider.register` and records its entries.
    pub fn add(&mut self, provider: &dyn SchemaProvider) -> &mut Self {
        let namespace = provider.namespace();
        self.providers.push(ProviderInfo {
            name: namespace.name,
            tier: namespace.tier,
            layer_order: provider.layer_order(),
        });
        let index = self.providers.len() - 1;
        let mut registrar = Registrar {
            builder: self,
            provider: index,
        };
        provider.register(&mut registrar);
        self
    }

    /// Chaining form of [`add`](Self::add).
    pub fn with(mut self, provider: &dyn SchemaProvider) -> Self {
        self.add(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Validates all registrations. Any violation means no snapshot.
    pub fn build(&self) -> Result<SchemaSnapshot, SchemaBuildReport> {
        let included = vec![true; self.providers.len()];
        let findings = self.validate(&included);
        if findings.is_empty() {
            let snapshot = self.assemble(&included);
            info!(
                "Schema built: {} slots, {} actions, {} providers",
                snapshot.slots.len(),
                snapshot.actions.len(),
                snapshot.providers.len()
            );
            return Ok(snapshot);
        }

        for (error, _) in &findings {
            warn!("Schema error: {}", error);
        }
        Err(SchemaBuildReport {
            errors: findings.into_iter().map(|(e, _)| e).collect(),
        })
    }

    /// Builds from every provider not involved in a violation.
    ///
    /// Offending providers are excluded as a whole; the returned errors
    /// describe why. The snapshot is always valid.
    pub fn build_isolating(&self) -> (SchemaSnapshot, Vec<SchemaError>) {
        let mut included = vec![true; self.providers.len()];
        let mut errors = Vec::new();

        loop {
            let findings = self.validate(&included);
            if findings.is_empty() {
                break;
            }
            for (error, offenders) in findings {
                warn!("Schema error (provider excluded): {}", error);
                for index in offenders {
                    included[index] = false;
                }
                errors.push(error);
            }
        }

        for (info, kept) in self.providers.iter().zip(&included) {
            if !kept {
                warn!("Schema provider '{}' excluded from snapshot", info.name);
            }
        }

        let snapshot = self.assemble(&included);
        info!(
            "Schema built (isolating): {} slots, {} actions, {}/{} providers",
            snapshot.slots.len(),
            snapshot.actions.len(),
            snapshot.providers.len(),
            self.providers.len()
        );
        (snapshot, errors)
    }

    /// Provider indices in diagnostic order: layer order, then name, then
    /// registration order.
    fn provider_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.providers.len()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (&self.providers[a], &self.providers[b]);
            pa.layer_order
                .cmp(&pb.layer_order)
                .then_with(|| pa.name.cmp(&pb.name))
                .then_with(|| a.cmp(&b))
        });
        order
    }

    fn ranked<'a, T>(
        &self,
        items: &'a [T],
        provider_of: impl Fn(&T) -> usize,
        included: &[bool],
    ) -> Vec<&'a T> {
        let order = self.provider_order();
        let mut rank = vec![0usize; self.providers.len()];
        for (position, index) in order.into_iter().enumerate() {
            rank[index] = position;
        }
        let mut out: Vec<&T> = items
            .iter()
            .filter(|item| included[provider_of(item)])
            .collect();
        // Stable: registration order within a provider is preserved
        out.sort_by_key(|item| rank[provider_of(item)]);
        out
    }

    /// One pass over all included registrations.
    fn validate(&self, included: &[bool]) -> Vec<(SchemaError, Vec<usize>)> {
        let mut findings = Vec::new();
        let name = |index: usize| self.providers[index].name.clone();

        let mut by_path: HashMap<(SchemaKind, &str), &PendingEntry> = HashMap::new();
        let mut by_id: HashMap<(SchemaKind, u32), &PendingEntry> = HashMap::new();
        let mut retired: HashMap<(SchemaKind, u32), &PendingRetired> = HashMap::new();

        // Retirements obey the same ownership rules as live entries
        for r in self.ranked(&self.retired, |r| r.provider, included) {
            let info = &self.providers[r.provider];
            let namespace = Namespace::new(info.name.clone(), info.tier);

            if !namespace.contains(&r.path) {
                findings.push((
                    SchemaError::ForeignPath {
                        path: r.path.clone(),
                        namespace: info.name.clone(),
                    },
                    vec![r.provider],
                ));
                continue;
            }

            let range = info.tier.id_range();
            if !range.contains(&r.id) {
                findings.push((
                    SchemaError::IdOutOfTierRange {
                        kind: r.kind,
                        id: r.id,
                        path: r.path.clone(),
                        provider: info.name.clone(),
                        tier: info.tier,
                        start: range.start,
                        end: range.end,
                    },
                    vec![r.provider],
                ));
                continue;
            }

            if let Some(first) = retired.get(&(r.kind, r.id)) {
                findings.push((
                    SchemaError::IdCollision {
                        kind: r.kind,
                        id: r.id,
                        first_path: first.path.clone(),
                        first_provider: name(first.provider),
                        second_path: r.path.clone(),
                        second_provider: info.name.clone(),
                    },
                    vec![first.provider, r.provider],
                ));
                continue;
            }

            retired.insert((r.kind, r.id), r);
        }

        for pending in self.ranked(&self.entries, |p| p.provider, included) {
            let entry = &pending.entry;
            let info = &self.providers[pending.provider];
            let namespace = Namespace::new(info.name.clone(), info.tier);

            if !namespace.contains(&entry.path) {
                findings.push((
                    SchemaError::ForeignPath {
                        path: entry.path.clone(),
                        namespace: info.name.clone(),
                    },
                    vec![pending.provider],
                ));
                continue;
            }

            let range = info.tier.id_range();
            if !range.contains(&entry.id) {
                findings.push((
                    SchemaError::IdOutOfTierRange {
                        kind: entry.kind,
                        id: entry.id,
                        path: entry.path.clone(),
                        provider: info.name.clone(),
                        tier: info.tier,
                        start: range.start,
                        end: range.end,
                    },
                    vec![pending.provider],
                ));
                continue;
            }

            if let Some(r) = retired.get(&(entry.kind, entry.id)) {
                // Another owner's tombstone on a live id is a collision of two owners
                if r.provider != pending.provider {
                    findings.push((
                        SchemaError::IdCollision {
                            kind: entry.kind,
                            id: entry.id,
                            first_path: r.path.clone(),
                            first_provider: name(r.provider),
                            second_path: entry.path.clone(),
                            second_provider: info.name.clone(),
                        },
                        vec![r.provider, pending.provider],
                    ));
                    continue;
                }
                findings.push((
                    SchemaError::RetiredId {
                        kind: entry.kind,
                        id: entry.id,
                        path: entry.path.clone(),
                        provider: info.name.clone(),
                        retired_path: r.path.clone(),
                    },
                    vec![pending.provider],
                ));
                continue;
            }

            if let Some(first) = by_path.get(&(entry.kind, entry.path.as_str())) {
                findings.push((
                    SchemaError::DuplicatePath {
                        kind: entry.kind,
                        path: entry.path.clone(),
                        first_provider: name(first.provider),
                        second_provider: info.name.clone(),
                    },
                    vec![first.provider, pending.provider],
                ));
                continue;
            }

            if let Some(first) = by_id.get(&(entry.kind, entry.id)) {
                findings.push((
                    SchemaError::IdCollision {
                        kind: entry.kind,
                        id: entry.id,
                        first_path: first.entry.path.clone(),
                        first_provider: name(first.provider),
                        second_path: entry.path.clone(),
                        second_provider: info.name.clone(),
                    },
                    vec![first.provider, pending.provider],
                ));
                continue;
            }

            by_path.insert((entry.kind, entry.path.as_str()), pending);
            by_id.insert((entry.kind, entry.id), pending);
        }

        let mut codes: HashMap<(&str, i64), &PendingEnum> = HashMap::new();
        for pending in self.ranked(&self.enums, |e| e.provider, included) {
            let info = &self.providers[pending.provider];
            let namespace = Namespace::new(info.name.clone(), info.tier);
            if !namespace.contains(&pending.namespace) {
                findings.push((
                    SchemaError::ForeignPath {
                        path: pending.namespace.clone(),
                        namespace: info.name.clone(),
                    },
                    vec![pending.provider],
                ));
                continue;
            }

            match codes.get(&(pending.namespace.as_str(), pending.code)) {
                Some(first) => findings.push((
                    SchemaError::EnumCodeCollision {
                        namespace: pending.namespace.clone(),
                        code: pending.code,
                        first_label: first.label.clone(),
                        first_provider: name(first.provider),
                        second_label: pending.label.clone(),
                        second_provider: info.name.clone(),
                    },
                    vec![first.provider, pending.provider],
                )),
                None => {
                    codes.insert((pending.namespace.as_str(), pending.code), pending);
                }
            }
        }

        for (_, offenders) in &mut findings {
            offenders.dedup();
        }
        debug!("Schema validation: {} finding(s)", findings.len());
        findings
    }

    /// Builds the snapshot from included providers. Assumes validation passed.
    fn assemble(&self, included: &[bool]) -> SchemaSnapshot {
        let mut snapshot = SchemaSnapshot::default();

        for pending in self.ranked(&self.entries, |p| p.provider, included) {
            let entry = pending.entry.clone();
            match entry.kind {
                SchemaKind::Slot => {
                    snapshot.slot_paths.insert(entry.path.clone(), entry.id);
                    snapshot.slots.insert(entry.id, entry);
                }
                SchemaKind::Action => {
                    snapshot.action_paths.insert(entry.path.clone(), entry.id);
                    snapshot.actions.insert(entry.id, entry);
                }
            }
        }

        for pending in self.ranked(&self.enums, |e| e.provider, included) {
            snapshot
                .enums
                .entry(pending.namespace.clone())
                .or_default()
                .insert(pending.code, pending.label.clone());
        }

        for r in self.ranked(&self.retired, |r| r.provider, included) {
            snapshot
                .retired
                .entry((r.kind, r.id))
                .or_insert_with(|| r.path.clone());
        }

        for index in self.provider_order() {
            if included[index] {
                snapshot.providers.push(self.providers[index].clone());
            }
        }

        snapshot
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Result of interpreting an integer as an enum code.
///
/// Codes the reader was not built against are expected (extensions add new
/// ones) and always have a printable fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumLabel<'a> {
    Known(&'a str),
    Unrecognized { namespace: &'a str, code: i64 },
}

impl EnumLabel<'_> {
    pub fn is_known(&self) -> bool {
        matches!(self, EnumLabel::Known(_))
    }
}

impl std::fmt::Display for EnumLabel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnumLabel::Known(label) => f.write_str(label),
            EnumLabel::Unrecognized { namespace, code } => write!(f, "{namespace}#{code}"),
        }
    }
}

/// Immutable, validated registry contents.
///
/// Built once during startup and shared by reference (typically `Arc`) with
/// every consumer; safe to read from any number of threads.
#[derive(Debug, Clone, Default)]
pub struct SchemaSnapshot {
    slots: BTreeMap<u32, SchemaEntry>,
    actions: BTreeMap<u32, SchemaEntry>,
    slot_paths: HashMap<String, u32>,
    action_paths: HashMap<String, u32>,
    enums: BTreeMap<String, BTreeMap<i64, String>>,
    retired: BTreeMap<(SchemaKind, u32), String>,
    providers: Vec<ProviderInfo>,
}

impl SchemaSnapshot {
    pub fn slot(&self, path: &str) -> Option<SlotId> {
        self.slot_paths.get(path).map(|id| SlotId(*id))
    }

    pub fn action(&self, path: &str) -> Option<ActionId> {
        self.action_paths.get(path).map(|id| ActionId(*id))
    }

    pub fn slot_path(&self, slot: SlotId) -> Option<&str> {
        self.slots.get(&slot.0).map(|e| e.path.as_str())
    }

    pub fn action_path(&self, action: ActionId) -> Option<&str> {
        self.actions.get(&action.0).map(|e| e.path.as_str())
    }

    pub fn slot_type(&self, slot: SlotId) -> Option<ValueType> {
        self.slots.get(&slot.0).and_then(|e| e.value_type)
    }

    pub fn entry(&self, kind: SchemaKind, path: &str) -> Option<&SchemaEntry> {
        match kind {
            SchemaKind::Slot => self.slot_paths.get(path).and_then(|id| self.slots.get(id)),
            SchemaKind::Action => self
                .action_paths
                .get(path)
                .and_then(|id| self.actions.get(id)),
        }
    }

    /// All slot entries, ascending by id.
    pub fn slots(&self) -> impl Iterator<Item = &SchemaEntry> + '_ {
        self.slots.values()
    }

    /// All action entries, ascending by id.
    pub fn actions(&self) -> impl Iterator<Item = &SchemaEntry> + '_ {
        self.actions.values()
    }

    /// Registered paths of one kind, ascending by id.
    pub fn paths(&self, kind: SchemaKind) -> impl Iterator<Item = &str> + '_ {
        let map = match kind {
            SchemaKind::Slot => &self.slots,
            SchemaKind::Action => &self.actions,
        };
        map.values().map(|e| e.path.as_str())
    }

    /// Slots a store must hold: one past the highest live or retired slot id.
    pub fn slot_capacity(&self) -> usize {
        let live = self.slots.keys().next_back().map_or(0, |id| *id as usize + 1);
        let retired = self
            .retired
            .keys()
            .filter(|(kind, _)| *kind == SchemaKind::Slot)
            .map(|(_, id)| *id as usize + 1)
            .max()
            .unwrap_or(0);
        live.max(retired)
    }

    /// Interprets `code` within enum namespace `namespace`.
    pub fn enum_label<'a>(&'a self, namespace: &'a str, code: i64) -> EnumLabel<'a> {
        match self.enums.get(namespace).and_then(|codes| codes.get(&code)) {
            Some(label) => EnumLabel::Known(label),
            None => EnumLabel::Unrecognized { namespace, code },
        }
    }

    /// All codes of one enum namespace, ascending.
    pub fn enum_codes<'a>(&'a self, namespace: &str) -> impl Iterator<Item = (i64, &'a str)> + 'a {
        self.enums
            .get(namespace)
            .into_iter()
            .flat_map(|codes| codes.iter().map(|(code, label)| (*code, label.as_str())))
    }

    pub fn is_retired(&self, kind: SchemaKind, id: u32) -> bool {
        self.retired.contains_key(&(kind, id))
    }

    /// Providers included in this snapshot, in diagnostic order.
    pub fn providers(&self) -> &[ProviderInfo] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.slots.len() + self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every path `previous` published keeps its id here, or is
    /// retired under that id.
    pub fn check_lineage(&self, previous: &SchemaSnapshot) -> Vec<LineageViolation> {
        let mut violations = Vec::new();
        for entry in previous.slots().chain(previous.actions()) {
            match self.entry(entry.kind, &entry.path) {
                Some(current) if current.id != entry.id => {
                    violations.push(LineageViolation::IdChanged {
                        kind: entry.kind,
                        path: entry.path.clone(),
                        previous: entry.id,
                        current: current.id,
                    });
                }
                Some(_) => {}
                None if self.is_retired(entry.kind, entry.id) => {}
                None => violations.push(LineageViolation::Vanished {
                    kind: entry.kind,
                    path: entry.path.clone(),
                    id: entry.id,
                }),
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arena() -> TableProvider {
        TableProvider::new(Namespace::domain("arena"))
            .slot("arena.hero.health", 256, ValueType::Int)
            .slot("arena.hero.name", 257, ValueType::Text)
            .action("arena.attack", 256)
            .enum_code("arena.stance", 0, "idle")
            .enum_code("arena.stance", 1, "guarding")
    }

    #[test]
    fn test_build_and_lookup() {
        let snapshot = SchemaBuilder::new().with(&arena()).build().unwrap();

        assert_eq!(snapshot.slot("arena.hero.health"), Some(SlotId(256)));
        assert_eq!(snapshot.slot_path(SlotId(257)), Some("arena.hero.name"));
        assert_eq!(snapshot.slot_type(SlotId(257)), Some(ValueType::Text));
        assert_eq!(snapshot.action("arena.attack"), Some(ActionId(256)));
        // Kinds are separate id spaces
        assert_eq!(snapshot.slot("arena.attack"), None);
        assert_eq!(snapshot.slot_capacity(), 258);
        assert_eq!(
            snapshot.paths(SchemaKind::Slot).collect::<Vec<_>>(),
            vec!["arena.hero.health", "arena.hero.name"]
        );
    }

    #[test]
    fn test_two_providers_claiming_same_slot_id() {
        let a = TableProvider::new(Namespace::domain("arena")).slot("arena.hero.health", 300, ValueType::Int);
        let b = TableProvider::new(Namespace::domain("loot")).slot("loot.gold", 300, ValueType::Int);

        let report = SchemaBuilder::new().with(&a).with(&b).build().unwrap_err();
        assert_eq!(report.errors.len(), 1);
        assert!(report.contains_path("arena.hero.health"));
        assert!(report.contains_path("loot.gold"));
        assert_eq!(report.providers(), vec!["arena", "loot"]);
    }

    #[test]
    fn test_same_id_different_kinds_is_fine() {
        let p = TableProvider::new(Namespace::domain("arena"))
            .slot("arena.x", 300, ValueType::Int)
            .action("arena.y", 300);
        assert!(SchemaBuilder::new().with(&p).build().is_ok());
    }

    #[test]
    fn test_duplicate_path() {
        let p = TableProvider::new(Namespace::domain("arena"))
            .slot("arena.x", 300, ValueType::Int)
            .slot("arena.x", 301, ValueType::Int);
        let report = SchemaBuilder::new().with(&p).build().unwrap_err();
        assert!(matches!(report.errors[0], SchemaError::DuplicatePath { .. }));
    }

    #[test]
    fn test_enum_code_collision_and_fallback() {
        let clash = TableProvider::new(Namespace::domain("arena")).enum_code("arena.stance", 1, "charging");
        let report = SchemaBuilder::new().with(&arena()).with(&clash).build().unwrap_err();
        assert!(matches!(
            report.errors[0],
            SchemaError::EnumCodeCollision { code: 1, .. }
        ));

        let snapshot = SchemaBuilder::new().with(&arena()).build().unwrap();
        assert_eq!(snapshot.enum_label("arena.stance", 1), EnumLabel::Known("guarding"));
        let unknown = snapshot.enum_label("arena.stance", 9);
        assert!(!unknown.is_known());
        assert_eq!(unknown.to_string(), "arena.stance#9");
        assert_eq!(snapshot.enum_label("nowhere", 0).to_string(), "nowhere#0");
    }

    #[test]
    fn test_retired_id_cannot_be_reused() {
        let p = TableProvider::new(Namespace::domain("arena"))
            .retired(SchemaKind::Slot, "arena.hero.mana", 260)
            .slot("arena.hero.focus", 260, ValueType::Int);
        let report = SchemaBuilder::new().with(&p).build().unwrap_err();
        assert!(matches!(report.errors[0], SchemaError::RetiredId { id: 260, .. }));

        let ok = TableProvider::new(Namespace::domain("arena"))
            .retired(SchemaKind::Slot, "arena.hero.mana", 260)
            .slot("arena.hero.focus", 261, ValueType::Int);
        let snapshot = SchemaBuilder::new().with(&ok).build().unwrap();
        assert!(snapshot.is_retired(SchemaKind::Slot, 260));
        assert_eq!(snapshot.slot_capacity(), 262);
    }

    #[test]
    fn test_namespace_and_tier_enforced() {
        let foreign = TableProvider::new(Namespace::domain("arena")).slot("loot.gold", 300, ValueType::Int);
        let report = SchemaBuilder::new().with(&foreign).build().unwrap_err();
        assert!(matches!(report.errors[0], SchemaError::ForeignPath { .. }));

        let low = TableProvider::new(Namespace::extension("mod")).slot("mod.x", 300, ValueType::Int);
        let report = SchemaBuilder::new().with(&low).build().unwrap_err();
        assert!(matches!(
            report.errors[0],
            SchemaError::IdOutOfTierRange { tier: OwnerTier::Extension, .. }
        ));

        assert!(!Namespace::domain("arena").contains("arenas.x"));
        assert!(!Namespace::domain("arena").contains("arena."));
        assert!(Namespace::domain("arena").contains("arena.hero.x"));
    }

    #[test]
    fn test_build_isolating_excludes_only_offenders() {
        let a = TableProvider::new(Namespace::domain("arena")).slot("arena.hero.health", 300, ValueType::Int);
        let b = TableProvider::new(Namespace::domain("loot")).slot("loot.gold", 300, ValueType::Int);
        let c = TableProvider::new(Namespace::extension("quest")).slot("quest.step", 4096, ValueType::Int);

        let (snapshot, errors) = SchemaBuilder::new().with(&a).with(&b).with(&c).build_isolating();
        assert_eq!(errors.len(), 1);
        assert_eq!(snapshot.slot("quest.step"), Some(SlotId(4096)));
        assert_eq!(snapshot.slot("arena.hero.health"), None);
        assert_eq!(snapshot.slot("loot.gold"), None);
        assert_eq!(snapshot.providers().len(), 1);
    }

    #[test]
    fn test_retiring_another_tiers_id_excludes_the_retirer() {
        let owner = TableProvider::new(Namespace::domain("arena")).slot("arena.hp", 256, ValueType::Int);
        let rogue = TableProvider::new(Namespace::extension("mod")).retired(SchemaKind::Slot, "mod.hp_old", 256);

        let (snapshot, errors) = SchemaBuilder::new().with(&owner).with(&rogue).build_isolating();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            SchemaError::IdOutOfTierRange { id: 256, tier: OwnerTier::Extension, .. }
        ));
        assert_eq!(errors[0].providers(), vec!["mod"]);
        assert_eq!(snapshot.slot("arena.hp"), Some(SlotId(256)));
        assert!(!snapshot.is_retired(SchemaKind::Slot, 256));
        let names: Vec<&str> = snapshot.providers().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["arena"]);
    }

    #[test]
    fn test_retiring_a_foreign_path_excludes_the_retirer() {
        let owner = TableProvider::new(Namespace::domain("arena")).slot("arena.hp", 256, ValueType::Int);
        let rogue = TableProvider::new(Namespace::extension("mod")).retired(SchemaKind::Slot, "arena.hp_old", 4100);

        let report = SchemaBuilder::new().with(&owner).with(&rogue).build().unwrap_err();
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], SchemaError::ForeignPath { .. }));
        assert_eq!(report.providers(), vec!["mod"]);

        let (snapshot, _) = SchemaBuilder::new().with(&owner).with(&rogue).build_isolating();
        assert_eq!(snapshot.slot("arena.hp"), Some(SlotId(256)));
        assert!(!snapshot.is_retired(SchemaKind::Slot, 4100));
    }

    #[test]
    fn test_two_owners_retiring_one_id_collide() {
        let a = TableProvider::new(Namespace::domain("arena")).retired(SchemaKind::Slot, "arena.old", 300);
        let b = TableProvider::new(Namespace::domain("loot")).retired(SchemaKind::Slot, "loot.old", 300);
        let c = TableProvider::new(Namespace::domain("quest")).slot("quest.step", 301, ValueType::Int);

        let report = SchemaBuilder::new().with(&a).with(&b).build().unwrap_err();
        assert!(matches!(report.errors[0], SchemaError::IdCollision { id: 300, .. }));
        assert_eq!(report.providers(), vec!["arena", "loot"]);

        let (snapshot, errors) = SchemaBuilder::new().with(&a).with(&b).with(&c).build_isolating();
        assert_eq!(errors.len(), 1);
        assert!(!snapshot.is_retired(SchemaKind::Slot, 300));
        assert_eq!(snapshot.slot("quest.step"), Some(SlotId(301)));
    }

    #[test]
    fn test_live_id_on_another_owners_tombstone_blames_both() {
        let a = TableProvider::new(Namespace::domain("arena")).retired(SchemaKind::Slot, "arena.old", 300);
        let b = TableProvider::new(Namespace::domain("loot")).slot("loot.gold", 300, ValueType::Int);

        let report = SchemaBuilder::new().with(&a).with(&b).build().unwrap_err();
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], SchemaError::IdCollision { id: 300, .. }));
        assert_eq!(report.providers(), vec!["arena", "loot"]);
    }

    #[test]
    fn test_lineage_detects_moves_and_vanishing() {
        let v1 = SchemaBuilder::new().with(&arena()).build().unwrap();

        let moved = TableProvider::new(Namespace::domain("arena"))
            .slot("arena.hero.health", 300, ValueType::Int)
            .retired(SchemaKind::Slot, "arena.hero.name", 257)
            .action("arena.attack", 256);
        let v2 = SchemaBuilder::new().with(&moved).build().unwrap();

        let violations = v2.check_lineage(&v1);
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            &violations[0],
            LineageViolation::IdChanged { previous: 256, current: 300, .. }
        ));

        let dropped = TableProvider::new(Namespace::domain("arena")).slot("arena.hero.health", 256, ValueType::Int);
        let v3 = SchemaBuilder::new().with(&dropped).build().unwrap();
        assert_eq!(v3.check_lineage(&v1).len(), 2);
    }

    #[test]
    fn test_diagnostic_order_follows_layer_order() {
        let late = TableProvider::new(Namespace::domain("zeta"))
            .with_layer_order(-1)
            .slot("zeta.x", 300, ValueType::Int);
        let early = TableProvider::new(Namespace::domain("alpha")).slot("alpha.x", 300, ValueType::Int);

        let report = SchemaBuilder::new().with(&early).with(&late).build().unwrap_err();
        match &report.errors[0] {
            SchemaError::IdCollision { first_provider, .. } => assert_eq!(first_provider, "zeta"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    proptest! {
        /// Adding a provider never moves an id that was already published.
        #[test]
        fn prop_registry_append_only(
            counts in proptest::collection::vec(1usize..6, 1..6),
            extra in 1usize..6,
        ) {
            let providers: Vec<TableProvider> = counts
                .iter()
                .enumerate()
                .map(|(p, count)| {
                    let base = 4096 + (p as u32) * 100;
                    (0..*count).fold(
                        TableProvider::new(Namespace::extension(format!("ext{p}"))),
                        |prov, i| prov.slot(&format!("ext{p}.s{i}"), base + i as u32, ValueType::Int),
                    )
                })
                .collect();

            let mut before = SchemaBuilder::new();
            for p in &providers {
                before.add(p);
            }
            let v1 = before.build().unwrap();

            let newcomer = (0..extra).fold(
                TableProvider::new(Namespace::extension("late")),
                |prov, i| prov.slot(&format!("late.s{i}"), 9000 + i as u32, ValueType::Int),
            );
            let mut after = SchemaBuilder::new();
            for p in &providers {
                after.add(p);
            }
            after.add(&newcomer);
            let v2 = after.build().unwrap();

            prop_assert!(v2.check_lineage(&v1).is_empty());
            for entry in v1.slots() {
                prop_assert_eq!(v2.slot(&entry.path), Some(SlotId(entry.id)));
            }
        }
    }
}
