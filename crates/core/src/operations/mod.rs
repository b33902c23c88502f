//! Workflow operations.
//!
//! Each operation wraps one transformation step with what the workflow
//! needs to drive it: field roles that decide which change event a
//! parameter edit raises, predicates that decide whether an event forces
//! a re-apply or discards the cached estimate, and notebook code
//! generation.
//!
//! Parameters are changed through explicit setters (or [`WorkflowOperation::set_param`]
//! for dynamic callers). A setter records exactly one change event in the
//! operation's [`ChangeQueue`] when the value actually changes; the owning
//! workflow drains the queue after every edit.

/// Names of the listed fields that differ between `$this` and `$before`,
/// where `$before` is a `&dyn WorkflowOperation` of the same type.
macro_rules! changed_fields {
    ($this:expr, $before:expr, [$($field:ident),+ $(,)?]) => {{
        let mut changed: Vec<&'static str> = Vec::new();
        if let Some(before) = $before.as_any().downcast_ref::<Self>() {
            $(
                if $this.$field != before.$field {
                    changed.push(stringify!($field));
                }
            )+
        }
        changed
    }};
}

mod category;
mod channel_stat;
mod hierarchy;
mod import;
mod kmeans;
mod polygon;
mod range;
mod threshold;

pub use category::{CategoryOp, CategoryRule};
pub use channel_stat::{ChannelStatisticOp, StatisticFunction};
pub use hierarchy::{HierarchyGate, HierarchyOp};
pub use import::ImportOp;
pub use kmeans::{KMeansOp, KMeansView};
pub use polygon::{PolygonOp, PolygonSelectionView};
pub use range::{RangeOp, RangeSelectionView};
pub use threshold::{ThresholdOp, ThresholdSelectionView};

use cf_protocol::{ChangeEvent, ChangePayload, Changed, Diagnostic};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::fmt::Debug;
use std::path::Path;

use crate::error::{OpError, ParamError};
use crate::experiment::Experiment;
use crate::serialization::Registry;
use crate::views::WorkflowView;

pub const TRACING_TARGET: &str = "cf_core::operations";

/// How the workflow treats a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Read by `apply`; editing it raises [`Changed::Apply`].
    Apply,
    /// Read by `estimate`; editing it raises [`Changed::Estimate`].
    Estimate,
    /// Written by `estimate`; never serialized.
    EstimateResult,
    /// Status reported back to the user.
    Status,
    /// Scratch state, never serialized and never announced.
    Transient,
}

impl FieldRole {
    /// The change event raised when a field with this role is edited.
    pub fn change_kind(self) -> Option<Changed> {
        match self {
            FieldRole::Apply => Some(Changed::Apply),
            FieldRole::Estimate => Some(Changed::Estimate),
            FieldRole::EstimateResult => Some(Changed::EstimateResult),
            FieldRole::Status => Some(Changed::OpStatus),
            FieldRole::Transient => None,
        }
    }
}

/// A field name and its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub role: FieldRole,
}

impl FieldSpec {
    pub const fn new(name: &'static str, role: FieldRole) -> Self {
        Self { name, role }
    }
}

/// Change events recorded by setters, waiting for the workflow to drain them.
///
/// The queue is notification plumbing, not state: it never takes part in
/// equality, so two operations with the same parameters compare equal no
/// matter what is pending.
#[derive(Debug, Clone, Default)]
pub struct ChangeQueue(Vec<ChangeEvent>);

impl ChangeQueue {
    pub fn push(&mut self, event: ChangeEvent) {
        self.0.push(event);
    }

    /// Record an edit of `field`, with the event kind given by its role in `fields`.
    pub fn field(&mut self, fields: &[FieldSpec], field: &str) {
        let role = fields.iter().find(|f| f.name == field).map(|f| f.role);
        if let Some(kind) = role.and_then(FieldRole::change_kind) {
            self.0.push(ChangeEvent::new(kind, ChangePayload::operation_field(field)));
        }
    }

    /// Record an edit of a view field.
    pub fn view_field(&mut self, view_id: &str, field: &str) {
        self.0
            .push(ChangeEvent::new(Changed::View, ChangePayload::view_field(view_id, field)));
    }

    /// Record an edit of `field` unless one is already pending.
    pub fn field_once(&mut self, fields: &[FieldSpec], field: &str) {
        if !self.0.iter().any(|e| e.payload.field() == Some(field)) {
            self.field(fields, field);
        }
    }

    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for ChangeQueue {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Wrapper for state that is neither serialized nor compared: interactive
/// flags, fitted models and other scratch values.
#[derive(Debug, Clone, Default)]
pub struct Transient<T>(pub T);

impl<T> PartialEq for Transient<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Collects non-fatal problems raised while estimating, applying or plotting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Warnings(Vec<Diagnostic>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, field: Option<&str>, message: impl Into<String>) {
        self.0
            .push(Diagnostic::new(message, field.map(str::to_string)));
    }

    /// The most recent warning; that is the one an item displays.
    pub fn last(&self) -> Option<&Diagnostic> {
        self.0.last()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// An operation as seen by the workflow.
pub trait WorkflowOperation: Debug + Send + Sync {
    /// Stable identifier of the operation type.
    fn id(&self) -> &'static str;

    /// Human-readable operation type name.
    fn friendly_id(&self) -> &'static str;

    /// The name of the column or statistic this operation adds, if any.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Every parameter with its role.
    fn fields(&self) -> &'static [FieldSpec];

    fn role_of(&self, field: &str) -> Option<FieldRole> {
        self.fields()
            .iter()
            .find(|f| f.name == field)
            .map(|f| f.role)
    }

    /// Set a parameter from a JSON value, raising its change event.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is unknown or the value has the wrong shape.
    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError>;

    /// Pending change events.
    fn changes(&mut self) -> &mut ChangeQueue;

    /// Parameters whose values differ from `before`, an earlier copy of
    /// this operation.
    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str>;

    /// Record a change event for every parameter edited since `before`
    /// that no setter has announced yet.
    fn announce_changes(&mut self, before: &dyn WorkflowOperation) {
        let fields = self.fields();
        for field in self.changed_fields(before) {
            self.changes().field_once(fields, field);
        }
    }

    /// Whether `apply` needs a successful `estimate` first.
    fn requires_estimate(&self) -> bool {
        false
    }

    /// Fit the operation's model to `experiment`.
    fn estimate(
        &mut self,
        _experiment: &Experiment,
        _warnings: &mut Warnings,
    ) -> Result<(), OpError> {
        Ok(())
    }

    /// Produce a new experiment. `experiment` is `None` only for the first
    /// item of a workflow.
    fn apply(
        &self,
        experiment: Option<&Experiment>,
        warnings: &mut Warnings,
    ) -> Result<Experiment, OpError>;

    /// Should the owning item re-run `apply` for this event?
    fn should_apply(&self, kind: Changed, _payload: &ChangePayload) -> bool {
        matches!(
            kind,
            Changed::Apply | Changed::PrevResult | Changed::EstimateResult
        )
    }

    /// Should the owning item discard the cached estimate for this event?
    fn should_clear_estimate(&self, kind: Changed, _payload: &ChangePayload) -> bool {
        kind == Changed::Estimate
    }

    /// Reset the cached estimate to its empty form.
    fn clear_estimate(&mut self) {}

    /// Resolve relative file paths against the directory of the document
    /// the operation was loaded from.
    fn resolve_paths(&mut self, _base_dir: &Path) {}

    /// The view created alongside the operation.
    fn default_view(&self) -> Option<Box<dyn WorkflowView>> {
        None
    }

    /// Notebook code reproducing this operation. `prev_idx` is the index of
    /// the upstream item, if any.
    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn clone_box(&self) -> Box<dyn WorkflowOperation>;

    /// Field-wise equality of non-transient state.
    fn eq_dyn(&self, other: &dyn WorkflowOperation) -> bool;
}

impl Clone for Box<dyn WorkflowOperation> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl PartialEq for Box<dyn WorkflowOperation> {
    fn eq(&self, other: &Self) -> bool {
        self.eq_dyn(other.as_ref())
    }
}

/// Deserialize a parameter value.
pub(crate) fn param<T: DeserializeOwned>(field: &str, value: JsonValue) -> Result<T, ParamError> {
    serde_json::from_value(value).map_err(|e| ParamError::invalid(field, e))
}

/// Assign `value` to `slot`, returning whether it changed.
pub(crate) fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

pub(crate) fn eq_concrete<T: PartialEq + 'static>(this: &T, other: &dyn WorkflowOperation) -> bool {
    other
        .as_any()
        .downcast_ref::<T>()
        .is_some_and(|other| this == other)
}

/// Whether `name` is a usable column name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check the `name` parameter of an operation that adds a column.
pub(crate) fn validate_new_column(name: &str, experiment: &Experiment) -> Result<(), OpError> {
    if name.is_empty() {
        return Err(OpError::new("name", "You have to set the gate's name before applying it!"));
    }
    if !is_identifier(name) {
        return Err(OpError::new(
            "name",
            format!("Name can only contain letters, numbers and underscores: '{name}'"),
        ));
    }
    if experiment.has_column(name) {
        return Err(OpError::new(
            "name",
            format!("Experiment already has a column named {name}"),
        ));
    }
    Ok(())
}

/// The upstream experiment, or the error every gate raises without one.
pub(crate) fn require_experiment(experiment: Option<&Experiment>) -> Result<&Experiment, OpError> {
    experiment.ok_or_else(|| OpError::general("No experiment specified"))
}

pub(crate) fn register(registry: &mut Registry) {
    import::register(registry);
    threshold::register(registry);
    range::register(registry);
    polygon::register(registry);
    hierarchy::register(registry);
    category::register(registry);
    channel_stat::register(registry);
    kmeans::register(registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIELDS: &[FieldSpec] = &[
        FieldSpec::new("name", FieldRole::Apply),
        FieldSpec::new("xchannel", FieldRole::Estimate),
        FieldSpec::new("_centroids", FieldRole::Transient),
    ];

    #[test]
    fn test_change_queue_uses_field_roles() {
        let mut queue = ChangeQueue::default();
        queue.field(FIELDS, "name");
        queue.field(FIELDS, "xchannel");
        queue.field(FIELDS, "_centroids");
        queue.field(FIELDS, "missing");
        let events = queue.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, Changed::Apply);
        assert_eq!(events[1].kind, Changed::Estimate);
        assert_eq!(events[1].payload.field(), Some("xchannel"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_field_once_skips_pending_fields() {
        let mut queue = ChangeQueue::default();
        queue.field(FIELDS, "name");
        queue.field_once(FIELDS, "name");
        queue.field_once(FIELDS, "xchannel");
        let kinds: Vec<Changed> = queue.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![Changed::Apply, Changed::Estimate]);
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("T"));
        assert!(is_identifier("_gate_2"));
        assert!(!is_identifier("2gate"));
        assert!(!is_identifier("my gate"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_warnings_keep_last() {
        let mut warnings = Warnings::new();
        warnings.warn(None, "first");
        warnings.warn(Some("events"), "second");
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings.last().unwrap().message, "second");
        assert_eq!(warnings.last().unwrap().field.as_deref(), Some("events"));
    }
}
