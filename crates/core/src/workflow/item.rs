//! A single step of a workflow: one operation, its views, and the cached
//! result of applying it.
//!
//! All state transitions of an item happen here. Each transition reports
//! itself by pushing [`Event`]s to the caller's outbox; deciding what runs
//! next is the workflow's job.

use cf_protocol::{ChangeEvent, Diagnostic, DiagnosticKind, Event, ItemStatus, ItemSummary};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use uuid::Uuid;

use super::TRACING_TARGET;
use crate::error::{OpError, ViewError, WorkflowError};
use crate::experiment::{ConditionKind, Experiment, StatisticKey};
use crate::operations::{Warnings, WorkflowOperation};
use crate::views::{Figure, WorkflowView};

/// One node of a workflow.
#[derive(Debug)]
pub struct WorkflowItem {
    id: Uuid,
    operation: Box<dyn WorkflowOperation>,
    views: Vec<Box<dyn WorkflowView>>,
    current_view: Option<String>,

    result: Option<Arc<Experiment>>,
    /// The result being recomputed, kept to tell whether recomputing changed it.
    superseded: Option<Arc<Experiment>>,
    status: ItemStatus,
    diagnostics: HashMap<DiagnosticKind, Diagnostic>,

    channels: Vec<String>,
    conditions: BTreeMap<String, ConditionKind>,
    metadata: BTreeMap<String, JsonValue>,
    statistics: Vec<StatisticKey>,
    plot_names: Vec<String>,
    plot_names_label: Option<String>,

    in_flight: Arc<Mutex<()>>,
}

impl WorkflowItem {
    /// Wrap an operation, together with its default view if it has one.
    pub fn new(operation: Box<dyn WorkflowOperation>) -> Self {
        let views: Vec<_> = operation.default_view().into_iter().collect();
        let current_view = views.first().map(|v| v.id().to_string());
        Self::from_parts(operation, views, current_view, ItemStatus::Waiting)
    }

    pub(crate) fn from_parts(
        operation: Box<dyn WorkflowOperation>,
        views: Vec<Box<dyn WorkflowView>>,
        current_view: Option<String>,
        status: ItemStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            views,
            current_view,
            result: None,
            superseded: None,
            status,
            diagnostics: HashMap::new(),
            channels: Vec::new(),
            conditions: BTreeMap::new(),
            metadata: BTreeMap::new(),
            statistics: Vec::new(),
            plot_names: Vec::new(),
            plot_names_label: None,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Add a view, replacing any view with the same id.
    pub fn with_view(mut self, view: Box<dyn WorkflowView>) -> Self {
        self.put_view(view);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn friendly_id(&self) -> &'static str {
        self.operation.friendly_id()
    }

    pub fn operation(&self) -> &dyn WorkflowOperation {
        self.operation.as_ref()
    }

    pub(crate) fn operation_mut(&mut self) -> &mut dyn WorkflowOperation {
        self.operation.as_mut()
    }

    pub fn views(&self) -> &[Box<dyn WorkflowView>] {
        &self.views
    }

    pub fn view(&self, view_id: &str) -> Option<&dyn WorkflowView> {
        self.views
            .iter()
            .find(|v| v.id() == view_id)
            .map(|v| v.as_ref())
    }

    pub(crate) fn view_mut(&mut self, view_id: &str) -> Option<&mut Box<dyn WorkflowView>> {
        self.views.iter_mut().find(|v| v.id() == view_id)
    }

    pub(crate) fn put_view(&mut self, view: Box<dyn WorkflowView>) {
        match self.views.iter_mut().find(|v| v.id() == view.id()) {
            Some(slot) => *slot = view,
            None => self.views.push(view),
        }
    }

    pub fn current_view(&self) -> Option<&str> {
        self.current_view.as_deref()
    }

    pub(crate) fn set_current_view(&mut self, view_id: &str) -> Result<bool, WorkflowError> {
        if self.view(view_id).is_none() {
            return Err(WorkflowError::ViewNotFound(self.id, view_id.to_string()));
        }
        if self.current_view.as_deref() == Some(view_id) {
            return Ok(false);
        }
        self.current_view = Some(view_id.to_string());
        Ok(true)
    }

    /// The cached result. `None` unless the item is valid.
    pub fn result(&self) -> Option<&Arc<Experiment>> {
        self.result.as_ref()
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn diagnostic(&self, kind: DiagnosticKind) -> Option<&Diagnostic> {
        self.diagnostics.get(&kind)
    }

    pub fn op_error(&self) -> Option<&Diagnostic> {
        self.diagnostic(DiagnosticKind::OpError)
    }

    pub fn estimate_error(&self) -> Option<&Diagnostic> {
        self.diagnostic(DiagnosticKind::EstimateError)
    }

    pub fn view_error(&self) -> Option<&Diagnostic> {
        self.diagnostic(DiagnosticKind::ViewError)
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn conditions(&self) -> &BTreeMap<String, ConditionKind> {
        &self.conditions
    }

    pub fn metadata(&self) -> &BTreeMap<String, JsonValue> {
        &self.metadata
    }

    pub fn statistics(&self) -> &[StatisticKey] {
        &self.statistics
    }

    /// Plots the current view can show, as of its last plot.
    pub fn plot_names(&self) -> &[String] {
        &self.plot_names
    }

    pub fn plot_names_label(&self) -> Option<&str> {
        self.plot_names_label.as_deref()
    }

    /// The mutex held while an estimate or apply runs on this item.
    ///
    /// Holding it from outside makes the workflow refuse to start new work
    /// on the item.
    pub fn lock_handle(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.in_flight)
    }

    pub fn summary(&self, index: usize) -> ItemSummary {
        let operation = crate::serialization::registry()
            .tag_of(self.operation.as_any())
            .unwrap_or(self.operation.id())
            .to_string();
        ItemSummary {
            id: self.id,
            index,
            operation,
            name: self.operation.name().map(str::to_string),
            status: self.status,
            events: self.result.as_ref().map(|r| r.len()),
            channels: self.channels.clone(),
            conditions: self
                .conditions
                .iter()
                .map(|(name, kind)| (name.clone(), kind.as_str().to_string()))
                .collect(),
            statistics: self.statistics.clone(),
            current_view: self.current_view.clone(),
            diagnostics: self
                .diagnostics
                .iter()
                .map(|(kind, d)| (diagnostic_key(*kind).to_string(), d.clone()))
                .collect(),
        }
    }

    /// Notebook cells for this item: the operation, then each view.
    pub fn notebook_cells(&self, idx: usize, prev_idx: Option<usize>) -> Vec<String> {
        std::iter::once(self.operation.notebook_code(idx, prev_idx))
            .chain(self.views.iter().map(|v| v.notebook_code(idx, prev_idx)))
            .collect()
    }

    /// Pending change events from the operation and every view.
    pub(crate) fn drain_changes(&mut self) -> Vec<ChangeEvent> {
        let mut events = self.operation.changes().drain();
        for view in &mut self.views {
            events.extend(view.changes().drain());
        }
        events
    }

    pub(crate) fn restore_status_fields(
        &mut self,
        channels: Vec<String>,
        conditions: BTreeMap<String, ConditionKind>,
        metadata: BTreeMap<String, JsonValue>,
        statistics: Vec<StatisticKey>,
    ) {
        self.channels = channels;
        self.conditions = conditions;
        self.metadata = metadata;
        self.statistics = statistics;
    }

    fn set_status(&mut self, status: ItemStatus, events: &mut Vec<Event>) {
        if self.status == status {
            return;
        }
        tracing::debug!(
            target: TRACING_TARGET,
            item = %self.id,
            from = %self.status,
            to = %status,
            "item status changed"
        );
        self.status = status;
        events.push(Event::ItemStatusUpdate {
            item_id: self.id,
            status,
        });
    }

    fn set_diagnostic(
        &mut self,
        kind: DiagnosticKind,
        diagnostic: Option<Diagnostic>,
        events: &mut Vec<Event>,
    ) {
        if self.diagnostics.get(&kind) == diagnostic.as_ref() {
            return;
        }
        events.push(Event::ItemDiagnostic {
            item_id: self.id,
            kind,
            message: diagnostic.as_ref().map(|d| d.message.clone()),
            field: diagnostic.as_ref().and_then(|d| d.field.clone()),
        });
        match diagnostic {
            Some(d) => {
                self.diagnostics.insert(kind, d);
            }
            None => {
                self.diagnostics.remove(&kind);
            }
        }
    }

    fn op_failure(&mut self, kind: DiagnosticKind, err: OpError, events: &mut Vec<Event>) {
        tracing::warn!(
            target: TRACING_TARGET,
            item = %self.id,
            field = err.field.as_deref().unwrap_or(""),
            "{}",
            err.message
        );
        self.set_diagnostic(kind, Some(Diagnostic::new(err.message, err.field)), events);
    }

    fn view_failure(&mut self, err: ViewError, events: &mut Vec<Event>) {
        tracing::warn!(
            target: TRACING_TARGET,
            item = %self.id,
            field = err.field.as_deref().unwrap_or(""),
            "{}",
            err.message
        );
        self.set_diagnostic(
            DiagnosticKind::ViewError,
            Some(Diagnostic::new(err.message, err.field)),
            events,
        );
    }

    /// Set aside the current result because it is about to be recomputed.
    fn stash_result(&mut self) {
        if let Some(result) = self.result.take() {
            self.superseded = Some(result);
        }
    }

    /// Forget the stashed result. Returns whether there was one.
    pub(crate) fn drop_superseded(&mut self) -> bool {
        self.superseded.take().is_some()
    }

    /// Mark the item as needing an apply.
    pub(crate) fn mark_waiting(&mut self, events: &mut Vec<Event>) {
        self.stash_result();
        self.set_status(ItemStatus::Waiting, events);
    }

    /// Discard the estimate and everything computed from it. Returns whether
    /// a result was thrown away.
    pub(crate) fn clear_estimate(&mut self, events: &mut Vec<Event>) -> bool {
        self.operation.clear_estimate();
        let had_result = self.result.take().is_some();
        let had_superseded = self.superseded.take().is_some();
        self.set_status(ItemStatus::Waiting, events);
        had_result || had_superseded
    }

    /// Fit the operation to the upstream result. Returns whether it succeeded.
    pub(crate) fn run_estimate(
        &mut self,
        previous: Option<&Experiment>,
        events: &mut Vec<Event>,
    ) -> bool {
        self.stash_result();
        self.set_status(ItemStatus::Estimating, events);

        let Some(experiment) = previous else {
            self.op_failure(
                DiagnosticKind::EstimateError,
                OpError::general("No previous result to estimate from"),
                events,
            );
            self.set_status(ItemStatus::Invalid, events);
            return false;
        };

        let mut warnings = Warnings::new();
        match self.operation.estimate(experiment, &mut warnings) {
            Ok(()) => {
                self.set_diagnostic(DiagnosticKind::EstimateError, None, events);
                self.set_diagnostic(
                    DiagnosticKind::EstimateWarning,
                    warnings.last().cloned(),
                    events,
                );
                self.set_status(ItemStatus::Waiting, events);
                true
            }
            Err(err) => {
                self.op_failure(DiagnosticKind::EstimateError, err, events);
                self.set_status(ItemStatus::Invalid, events);
                false
            }
        }
    }

    /// Apply the operation to the upstream result. Returns whether the
    /// item's result changed.
    ///
    /// `has_previous` is false only for the first item, which is the only
    /// one allowed to run without an upstream result.
    pub(crate) fn run_apply(
        &mut self,
        previous: Option<&Experiment>,
        has_previous: bool,
        events: &mut Vec<Event>,
    ) -> bool {
        self.stash_result();
        self.set_status(ItemStatus::Applying, events);
        let before = self.superseded.take();

        if has_previous && previous.is_none() {
            self.op_failure(
                DiagnosticKind::OpError,
                OpError::general("Previous operation has no result"),
                events,
            );
            self.invalidate(events);
            return before.is_some();
        }

        let mut warnings = Warnings::new();
        match self.operation.apply(previous, &mut warnings) {
            Ok(experiment) => {
                self.set_diagnostic(DiagnosticKind::OpError, None, events);
                self.set_diagnostic(DiagnosticKind::OpWarning, warnings.last().cloned(), events);
                let (result, changed) = match before {
                    Some(old) if *old == experiment => (old, false),
                    _ => (Arc::new(experiment), true),
                };
                self.refresh_status_fields(&result);
                self.result = Some(result);
                self.set_status(ItemStatus::Valid, events);
                changed
            }
            Err(err) => {
                self.op_failure(DiagnosticKind::OpError, err, events);
                self.invalidate(events);
                before.is_some()
            }
        }
    }

    fn invalidate(&mut self, events: &mut Vec<Event>) {
        self.result = None;
        self.channels.clear();
        self.conditions.clear();
        self.metadata.clear();
        self.statistics.clear();
        self.set_status(ItemStatus::Invalid, events);
    }

    fn refresh_status_fields(&mut self, experiment: &Experiment) {
        self.channels = experiment.channels().to_vec();
        self.conditions = experiment.conditions();
        self.metadata = experiment.metadata().clone();
        self.statistics = experiment.statistics().keys().cloned().collect();
    }

    /// Plot the current view. Returns the view id and figure on success.
    ///
    /// Selection views draw `previous`. Other views draw this item's result,
    /// falling back to `previous` with a warning when there is none.
    pub(crate) fn run_plot(
        &mut self,
        previous: Option<Arc<Experiment>>,
        events: &mut Vec<Event>,
    ) -> Option<(String, Figure)> {
        let view_id = self.current_view.clone()?;
        let slot = self.views.iter().position(|v| v.id() == view_id)?;

        let mut warnings = Warnings::new();
        let source = if self.views[slot].plots_previous_result() {
            previous
        } else if let Some(own) = self.result.clone() {
            Some(own)
        } else {
            if previous.is_some() {
                warnings.warn(None, "Plotting previous operation's result");
            }
            previous
        };
        let Some(experiment) = source else {
            self.view_failure(ViewError::general("Nothing to plot!"), events);
            return None;
        };

        let names = match self.views[slot].enum_plots(&experiment, self.operation.as_ref()) {
            Ok(names) => names,
            Err(err) => {
                self.view_failure(err, events);
                return None;
            }
        };
        let view = &mut self.views[slot];
        let current_is_valid = view
            .current_plot()
            .is_some_and(|p| names.iter().any(|n| n == p));
        if !current_is_valid {
            view.set_current_plot(names.first().cloned());
        }
        self.plot_names_label = view.plot_facet().map(str::to_string);
        self.plot_names = names;

        match self.views[slot].plot(&experiment, self.operation.as_ref(), &mut warnings) {
            Ok(figure) => {
                self.set_diagnostic(DiagnosticKind::ViewError, None, events);
                self.set_diagnostic(DiagnosticKind::ViewWarning, warnings.last().cloned(), events);
                events.push(Event::Plotted {
                    item_id: self.id,
                    view_id: view_id.clone(),
                    plot_name: self.views[slot].current_plot().map(str::to_string),
                });
                Some((view_id, figure))
            }
            Err(err) => {
                self.view_failure(err, events);
                None
            }
        }
    }

    /// Lock the item for an estimate or apply.
    pub(crate) fn try_begin<'a>(
        id: Uuid,
        lock: &'a Mutex<()>,
    ) -> Result<MutexGuard<'a, ()>, WorkflowError> {
        match lock.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(WorkflowError::ItemBusy(id)),
        }
    }
}

/// Items compare by what gets saved: operation, views and current view.
impl PartialEq for WorkflowItem {
    fn eq(&self, other: &Self) -> bool {
        self.operation.eq_dyn(other.operation.as_ref())
            && self.views.len() == other.views.len()
            && self
                .views
                .iter()
                .zip(&other.views)
                .all(|(a, b)| a.eq_dyn(b.as_ref()))
            && self.current_view == other.current_view
    }
}

pub(crate) fn diagnostic_key(kind: DiagnosticKind) -> &'static str {
    match kind {
        DiagnosticKind::OpError => "op_error",
        DiagnosticKind::OpWarning => "op_warning",
        DiagnosticKind::EstimateError => "estimate_error",
        DiagnosticKind::EstimateWarning => "estimate_warning",
        DiagnosticKind::ViewError => "view_error",
        DiagnosticKind::ViewWarning => "view_warning",
    }
}
