//! The workflow: an ordered chain of items where each item's operation is
//! applied to the result of the item before it.
//!
//! Every mutating call first applies the edit, then turns the change
//! events it raised into pending tasks, then runs those tasks until none
//! are left. Tasks run front to back and, within one item, estimate before
//! apply before plot, so an item is never computed from a stale upstream
//! result. When the call returns the workflow is quiescent.
//!
//! # Event routing
//!
//! | Event on an item | Effect |
//! |---|---|
//! | `Apply` | re-apply if the operation asks for it |
//! | `Estimate` | drop the estimate if the operation asks for it |
//! | `EstimateResult` | re-apply, re-plot |
//! | `PrevResult` | maybe drop the estimate, re-apply, re-plot |
//! | `Result` | re-plot |
//! | `View` | re-plot if it is the current view |
//!
//! Only a result that actually changed raises `Result` on its item and
//! `PrevResult` on the next one, so re-applying with unchanged input stops
//! there.

mod item;
mod persist;
mod queue;
mod session;

pub use item::WorkflowItem;
pub use queue::{TaskKind, TaskQueue};
pub use session::{CallCounters, Session};

pub(crate) use persist::register;

use cf_protocol::{ChangeEvent, ChangePayload, Changed, Event, ItemSummary, WorkflowConfig};
use serde_json::Value as JsonValue;
use std::any::type_name;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::experiment::Experiment;
use crate::notebook::Notebook;
use crate::operations::WorkflowOperation;
use crate::serialization::{self, Registry, SerializationError, VersionLocks};
use crate::views::{view_by_id, Selection, WorkflowView};

pub const TRACING_TARGET: &str = "cf_core::workflow";

/// An ordered chain of workflow items with its scheduler and session.
#[derive(Debug)]
pub struct Workflow {
    items: Vec<WorkflowItem>,
    selected: Option<Uuid>,
    queue: TaskQueue,
    session: Session,
    events: Vec<Event>,
    auto_plot: bool,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    /// An empty workflow that plots the selected item as it changes.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            selected: None,
            queue: TaskQueue::new(),
            session: Session::new(),
            events: Vec::new(),
            auto_plot: true,
        }
    }

    pub fn with_config(config: &WorkflowConfig) -> Self {
        let mut workflow = Self::new();
        workflow.auto_plot = config.plot;
        workflow
    }

    /// A workflow over already-built items, typically loaded ones.
    ///
    /// Nothing runs until [`Workflow::run_all`] is called.
    pub fn from_items(items: Vec<WorkflowItem>) -> Self {
        let mut workflow = Self::new();
        for (index, item) in items.iter().enumerate() {
            workflow.events.push(Event::ItemAdded {
                item_id: item.id(),
                index,
            });
        }
        workflow.items = items;
        workflow
    }

    /// Whether the selected item's current view is re-plotted after changes.
    pub fn set_auto_plot(&mut self, auto_plot: bool) {
        self.auto_plot = auto_plot;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[WorkflowItem] {
        &self.items
    }

    pub fn item(&self, id: Uuid) -> Option<&WorkflowItem> {
        self.items.iter().find(|i| i.id() == id)
    }

    pub fn index_of(&self, id: Uuid) -> Option<usize> {
        self.items.iter().position(|i| i.id() == id)
    }

    pub fn selected(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drain the event outbox.
    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn summaries(&self) -> Vec<ItemSummary> {
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| item.summary(index))
            .collect()
    }

    fn position(&self, id: Uuid) -> Result<usize, WorkflowError> {
        self.index_of(id).ok_or(WorkflowError::ItemNotFound(id))
    }

    /// Add an item at the end of the workflow.
    pub fn append(&mut self, item: WorkflowItem) -> Result<Uuid, WorkflowError> {
        self.insert(self.items.len(), item)
    }

    /// Insert an item at `index`.
    ///
    /// The new item is applied to its upstream result and the item after
    /// it is told its upstream changed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::IndexOutOfBounds`] if `index` is past the end.
    pub fn insert(&mut self, index: usize, item: WorkflowItem) -> Result<Uuid, WorkflowError> {
        if index > self.items.len() {
            return Err(WorkflowError::IndexOutOfBounds {
                index,
                len: self.items.len(),
            });
        }
        let id = item.id();
        tracing::info!(
            target: TRACING_TARGET,
            item = %id,
            index,
            operation = item.friendly_id(),
            "adding workflow item"
        );
        self.items.insert(index, item);
        self.events.push(Event::ItemAdded { item_id: id, index });

        self.dispatch(index, ChangeEvent::item(Changed::PrevResult));
        if index + 1 < self.items.len() {
            self.dispatch(index + 1, ChangeEvent::item(Changed::PrevResult));
        }
        self.run()?;
        Ok(id)
    }

    /// Add an operation after the selected item (or at the end) and select it.
    pub fn add_operation(
        &mut self,
        operation: Box<dyn WorkflowOperation>,
    ) -> Result<Uuid, WorkflowError> {
        let index = self
            .selected
            .and_then(|id| self.index_of(id))
            .map_or(self.items.len(), |idx| idx + 1);
        let id = self.insert(index, WorkflowItem::new(operation))?;
        self.select(Some(id))?;
        Ok(id)
    }

    /// Remove an item. The item after it is re-applied to the new upstream.
    pub fn remove(&mut self, id: Uuid) -> Result<WorkflowItem, WorkflowError> {
        let index = self.position(id)?;
        let removed = self.items.remove(index);
        self.queue.forget(id);
        self.session.forget(id);
        self.events.push(Event::ItemRemoved { item_id: id });
        tracing::info!(target: TRACING_TARGET, item = %id, index, "removed workflow item");

        if self.selected == Some(id) {
            self.selected = None;
            self.events.push(Event::SelectionChanged { item_id: None });
        }
        if index < self.items.len() {
            self.dispatch(index, ChangeEvent::item(Changed::PrevResult));
        }
        self.run()?;
        Ok(removed)
    }

    /// Change which item has focus. The newly selected item is plotted.
    pub fn select(&mut self, id: Option<Uuid>) -> Result<(), WorkflowError> {
        if let Some(id) = id {
            self.position(id)?;
        }
        if self.selected == id {
            return Ok(());
        }
        self.selected = id;
        self.events.push(Event::SelectionChanged { item_id: id });
        if let Some(index) = id.and_then(|id| self.index_of(id)) {
            self.schedule_plot(index);
        }
        self.run()
    }

    /// Tell the item after `id` that its upstream result changed.
    pub fn propagate(&mut self, id: Uuid) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        if index + 1 < self.items.len() {
            self.dispatch(index + 1, ChangeEvent::item(Changed::PrevResult));
        }
        self.run()
    }

    /// Set an operation parameter from a JSON value.
    pub fn set_operation_param(
        &mut self,
        id: Uuid,
        field: &str,
        value: JsonValue,
    ) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        self.items[index].operation_mut().set_param(field, value)?;
        self.run()
    }

    /// Set a parameter of one of an item's views.
    pub fn set_view_param(
        &mut self,
        id: Uuid,
        view_id: &str,
        field: &str,
        value: JsonValue,
    ) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        self.items[index]
            .view_mut(view_id)
            .ok_or_else(|| WorkflowError::ViewNotFound(id, view_id.to_string()))?
            .set_param(field, value)?;
        self.run()
    }

    /// Edit an item's operation through its concrete type.
    ///
    /// Fields assigned directly inside `edit` raise the same change events
    /// their setters would.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::TypeMismatch`] if the item's operation is not a `T`.
    pub fn edit_operation<T, R, F>(&mut self, id: Uuid, edit: F) -> Result<R, WorkflowError>
    where
        T: WorkflowOperation + 'static,
        F: FnOnce(&mut T) -> R,
    {
        let index = self.position(id)?;
        let before = self.items[index].operation().clone_box();
        let operation = self.items[index].operation_mut();
        let op = operation
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(WorkflowError::TypeMismatch {
                item: id,
                expected: type_name::<T>(),
            })?;
        let out = edit(op);
        operation.announce_changes(before.as_ref());
        self.run()?;
        Ok(out)
    }

    /// Attach a view to an item, replacing any view with the same id.
    pub fn add_view(&mut self, id: Uuid, view: Box<dyn WorkflowView>) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        self.items[index].put_view(view);
        Ok(())
    }

    /// Make `view_id` the item's current view and plot it.
    ///
    /// A standard view the item does not have yet is created first.
    pub fn set_current_view(&mut self, id: Uuid, view_id: &str) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        let item = &mut self.items[index];
        if item.view(view_id).is_none() {
            let view =
                view_by_id(view_id).ok_or_else(|| WorkflowError::ViewNotFound(id, view_id.to_string()))?;
            item.put_view(view);
        }
        if item.set_current_view(view_id)? {
            self.schedule_plot(index);
        }
        self.run()
    }

    /// Choose which plot the item's current view shows.
    pub fn set_current_plot(&mut self, id: Uuid, plot: Option<String>) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        let item = &mut self.items[index];
        let view_id = item.current_view().map(str::to_string);
        if let Some(view) = view_id.and_then(|v| item.view_mut(&v)) {
            view.set_current_plot(plot);
            self.schedule_plot(index);
        }
        self.run()
    }

    /// Run the estimate step of an item's operation.
    pub fn estimate(&mut self, id: Uuid) -> Result<(), WorkflowError> {
        self.position(id)?;
        self.queue.push(id, TaskKind::Estimate);
        self.run()
    }

    /// Re-apply an item's operation.
    pub fn apply(&mut self, id: Uuid) -> Result<(), WorkflowError> {
        let index = self.position(id)?;
        self.schedule_apply(index);
        self.run()
    }

    /// Re-estimate every estimate-requiring operation and re-apply every item.
    pub fn run_all(&mut self) -> Result<(), WorkflowError> {
        self.rerun(true)
    }

    /// Re-apply every item, keeping existing estimates.
    pub fn apply_all(&mut self) -> Result<(), WorkflowError> {
        self.rerun(false)
    }

    fn rerun(&mut self, estimate: bool) -> Result<(), WorkflowError> {
        tracing::info!(target: TRACING_TARGET, items = self.items.len(), estimate, "running workflow");
        for index in 0..self.items.len() {
            if estimate && self.items[index].operation().requires_estimate() {
                self.queue.push(self.items[index].id(), TaskKind::Estimate);
            }
            self.schedule_apply(index);
        }
        self.run()
    }

    /// Route an interactive selection to the most recently plotted view.
    ///
    /// Returns `false` if that view does not accept this kind of selection.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::NoInteractiveView`] if nothing has been
    /// plotted or the last plotted view is not interactive.
    pub fn interact(&mut self, selection: &Selection) -> Result<bool, WorkflowError> {
        let (id, view_id) = self
            .session
            .last_plotted()
            .map(|(id, view)| (id, view.to_string()))
            .ok_or(WorkflowError::NoInteractiveView)?;
        let index = self.position(id)?;
        let view = self.items[index]
            .view(&view_id)
            .ok_or_else(|| WorkflowError::ViewNotFound(id, view_id.clone()))?;
        if !view.is_interactive() {
            return Err(WorkflowError::NoInteractiveView);
        }
        let Some(params) = view.selection_params(selection) else {
            return Ok(false);
        };
        tracing::debug!(target: TRACING_TARGET, item = %id, view = %view_id, "interactive selection");
        for (field, value) in params {
            self.items[index].operation_mut().set_param(field, value)?;
        }
        self.run()?;
        Ok(true)
    }

    /// A Jupyter notebook reproducing the workflow.
    pub fn notebook(&self) -> Notebook {
        let mut notebook = Notebook::new();
        notebook.push_code("import cytoflow as flow");
        for (idx, item) in self.items.iter().enumerate() {
            for cell in item.notebook_cells(idx, idx.checked_sub(1)) {
                notebook.push_code(&cell);
            }
        }
        notebook
    }

    pub fn to_yaml(&self, registry: &Registry, locks: &VersionLocks) -> serialization::Result<String> {
        persist::items_to_yaml(&self.items, registry, locks)
    }

    /// Parse a workflow document. Relative paths in operations are resolved
    /// against `base_dir` when given.
    pub fn from_yaml(
        text: &str,
        registry: &Registry,
        base_dir: Option<&Path>,
    ) -> serialization::Result<Self> {
        let mut items = persist::items_from_yaml(text, registry)?;
        if let Some(dir) = base_dir {
            for item in &mut items {
                item.operation_mut().resolve_paths(dir);
            }
        }
        Ok(Self::from_items(items))
    }

    /// Write the workflow to `path`.
    pub fn save(
        &self,
        path: &Path,
        registry: &Registry,
        locks: &VersionLocks,
    ) -> serialization::Result<()> {
        let text = self.to_yaml(registry, locks)?;
        std::fs::write(path, text).map_err(|source| SerializationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(target: TRACING_TARGET, path = %path.display(), items = self.items.len(), "saved workflow");
        Ok(())
    }

    /// Read a workflow from `path`. Loaded items start in `loading`.
    pub fn load(path: &Path, registry: &Registry) -> serialization::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SerializationError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let workflow = Self::from_yaml(&text, registry, path.parent())?;
        tracing::info!(target: TRACING_TARGET, path = %path.display(), items = workflow.len(), "loaded workflow");
        Ok(workflow)
    }

    fn previous_result(&self, index: usize) -> Option<Arc<Experiment>> {
        index
            .checked_sub(1)
            .and_then(|prev| self.items[prev].result().cloned())
    }

    fn schedule_apply(&mut self, index: usize) {
        let item = &mut self.items[index];
        item.mark_waiting(&mut self.events);
        self.queue.push(item.id(), TaskKind::Apply);
    }

    fn schedule_plot(&mut self, index: usize) {
        let id = self.items[index].id();
        if self.auto_plot && self.selected == Some(id) {
            self.queue.push(id, TaskKind::Plot);
        }
    }

    /// The item's result changed: re-plot it and tell the next item.
    fn result_changed(&mut self, index: usize) {
        self.dispatch(index, ChangeEvent::item(Changed::Result));
        if index + 1 < self.items.len() {
            self.dispatch(index + 1, ChangeEvent::item(Changed::PrevResult));
        }
    }

    /// Turn one change event on the item at `index` into pending work.
    fn dispatch(&mut self, index: usize, change: ChangeEvent) {
        let ChangeEvent { kind, payload } = change;
        let item = &self.items[index];
        self.events.push(Event::ChangeRaised {
            item_id: item.id(),
            kind,
            field: payload.field().map(str::to_string),
        });
        tracing::trace!(target: TRACING_TARGET, item = %item.id(), %kind, "change raised");

        let operation = item.operation();
        let clear = operation.should_clear_estimate(kind, &payload);
        let apply = operation.should_apply(kind, &payload);

        match kind {
            Changed::Apply => {
                if apply {
                    self.schedule_apply(index);
                }
            }
            Changed::Estimate | Changed::PrevResult | Changed::EstimateResult => {
                if clear && self.items[index].clear_estimate(&mut self.events) {
                    self.result_changed(index);
                }
                if apply {
                    self.schedule_apply(index);
                }
                if kind != Changed::Estimate {
                    self.schedule_plot(index);
                }
            }
            Changed::Result => self.schedule_plot(index),
            Changed::View => {
                let item = &self.items[index];
                let replot = match &payload {
                    ChangePayload::ViewField { view_id, .. } => {
                        item.current_view() == Some(view_id.as_str())
                            && item
                                .view(view_id)
                                .is_some_and(|v| v.should_plot(kind, &payload))
                    }
                    _ => true,
                };
                if replot {
                    self.schedule_plot(index);
                }
            }
            Changed::OpStatus | Changed::ViewStatus => {}
        }
    }

    /// Dispatch every change event recorded by operation and view setters.
    fn collect_changes(&mut self) {
        for index in 0..self.items.len() {
            for change in self.items[index].drain_changes() {
                self.dispatch(index, change);
            }
        }
    }

    /// Run pending work until the workflow is quiescent.
    fn run(&mut self) -> Result<(), WorkflowError> {
        self.collect_changes();
        loop {
            let items = &self.items;
            let Some((index, id, kind)) = self
                .queue
                .pop(|id| items.iter().position(|i| i.id() == id))
            else {
                return Ok(());
            };
            if let Err(err) = self.run_task(index, kind) {
                self.queue.push(id, kind);
                return Err(err);
            }
            self.collect_changes();
        }
    }

    fn run_task(&mut self, index: usize, kind: TaskKind) -> Result<(), WorkflowError> {
        let previous = self.previous_result(index);
        let id = self.items[index].id();
        match kind {
            TaskKind::Estimate => {
                let lock = self.items[index].lock_handle();
                let _guard = WorkflowItem::try_begin(id, &lock)?;
                self.session.count_estimate(id);
                let item = &mut self.items[index];
                if item.run_estimate(previous.as_deref(), &mut self.events) {
                    self.dispatch(index, ChangeEvent::item(Changed::EstimateResult));
                } else if item.drop_superseded() {
                    self.result_changed(index);
                }
            }
            TaskKind::Apply => {
                let lock = self.items[index].lock_handle();
                let _guard = WorkflowItem::try_begin(id, &lock)?;
                self.session.count_apply(id);
                let changed =
                    self.items[index].run_apply(previous.as_deref(), index > 0, &mut self.events);
                if changed {
                    self.result_changed(index);
                }
            }
            TaskKind::Plot => self.plot(index, previous),
        }
        Ok(())
    }

    fn plot(&mut self, index: usize, previous: Option<Arc<Experiment>>) {
        let id = self.items[index].id();
        let Some((view_id, figure)) = self.items[index].run_plot(previous, &mut self.events) else {
            return;
        };

        let last = self
            .session
            .last_plotted()
            .map(|(item, view)| (item, view.to_string()));
        if let Some((last_item, last_view)) = last {
            if (last_item, last_view.as_str()) != (id, view_id.as_str()) {
                let old = self
                    .items
                    .iter_mut()
                    .find(|i| i.id() == last_item)
                    .and_then(|i| i.view_mut(&last_view));
                if let Some(old) = old {
                    old.set_interactive(false);
                }
            }
        }
        if let Some(view) = self.items[index].view_mut(&view_id) {
            view.set_interactive(true);
        }
        tracing::debug!(target: TRACING_TARGET, item = %id, view = %view_id, "plotted");
        self.session.record_plot(id, &view_id, figure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::import::Tube;
    use crate::experiment::ColumnData;
    use crate::operations::{ImportOp, KMeansOp, ThresholdOp};
    use cf_protocol::ItemStatus;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tube(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("tube.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "V2-A,Y2-A").unwrap();
        for (v, y) in [(10.0, 100.0), (20.0, 250.0), (300.0, 400.0), (400.0, 5000.0)] {
            writeln!(file, "{v},{y}").unwrap();
        }
        path
    }

    fn workflow_with_import(dir: &TempDir) -> (Workflow, Uuid) {
        let mut workflow = Workflow::new();
        let import = ImportOp::new(
            vec![Tube {
                file: write_tube(dir).display().to_string(),
                conditions: Default::default(),
            }],
            Default::default(),
        );
        let id = workflow.append(WorkflowItem::new(Box::new(import))).unwrap();
        (workflow, id)
    }

    #[test]
    fn test_append_applies_new_item() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, import_id) = workflow_with_import(&dir);
        assert_eq!(workflow.item(import_id).unwrap().status(), ItemStatus::Valid);

        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        let item = workflow.item(t).unwrap();
        assert_eq!(item.status(), ItemStatus::Valid);
        assert_eq!(
            item.result().unwrap().column("T").unwrap(),
            &ColumnData::Bool(vec![false, false, true, true])
        );
    }

    #[test]
    fn test_param_edit_reapplies_downstream() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        let k = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("U", "V2-A", 15.0))))
            .unwrap();
        let before = workflow.session().counters(k).applies;

        workflow
            .set_operation_param(t, "threshold", json!(200.0))
            .unwrap();

        assert_eq!(workflow.session().counters(k).applies, before + 1);
        let downstream = workflow.item(k).unwrap().result().unwrap();
        assert_eq!(
            downstream.column("T").unwrap(),
            &ColumnData::Bool(vec![false, true, true, true])
        );
    }

    #[test]
    fn test_failed_upstream_invalidates_downstream() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        let u = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("U", "V2-A", 15.0))))
            .unwrap();

        workflow
            .set_operation_param(t, "channel", json!("missing"))
            .unwrap();

        assert_eq!(workflow.item(t).unwrap().status(), ItemStatus::Invalid);
        assert_eq!(workflow.item(u).unwrap().status(), ItemStatus::Invalid);
        assert!(workflow.item(u).unwrap().result().is_none());
    }

    #[test]
    fn test_remove_reapplies_next_item() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        let u = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("U", "V2-A", 15.0))))
            .unwrap();

        workflow.remove(t).unwrap();

        assert_eq!(workflow.len(), 2);
        let result = workflow.item(u).unwrap().result().unwrap();
        assert!(!result.has_column("T"));
        assert!(result.has_column("U"));
    }

    #[test]
    fn test_add_operation_goes_after_selection() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, import_id) = workflow_with_import(&dir);
        workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        workflow.select(Some(import_id)).unwrap();

        let added = workflow
            .add_operation(Box::new(ThresholdOp::new("U", "V2-A", 15.0)))
            .unwrap();

        assert_eq!(workflow.index_of(added), Some(1));
        assert_eq!(workflow.selected(), Some(added));
    }

    #[test]
    fn test_kmeans_needs_estimate_before_apply() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        let mut op = KMeansOp::default();
        op.name = "K".to_string();
        op.xchannel = "V2-A".to_string();
        op.ychannel = "Y2-A".to_string();
        let k = workflow.append(WorkflowItem::new(Box::new(op))).unwrap();

        let item = workflow.item(k).unwrap();
        assert_eq!(item.status(), ItemStatus::Invalid);
        assert_eq!(item.op_error().unwrap().message, "Click Estimate!");

        workflow.estimate(k).unwrap();
        let item = workflow.item(k).unwrap();
        assert_eq!(item.status(), ItemStatus::Valid);
        assert!(item.result().unwrap().has_column("K"));
        assert_eq!(workflow.session().counters(k).estimates, 1);
    }

    #[test]
    fn test_busy_item_refuses_work() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, import_id) = workflow_with_import(&dir);
        let lock = workflow.item(import_id).unwrap().lock_handle();
        let _held = lock.lock().unwrap();

        let err = workflow.apply(import_id).unwrap_err();
        assert!(matches!(err, WorkflowError::ItemBusy(id) if id == import_id));
    }

    #[test]
    fn test_selection_plots_and_interaction_edits_operation() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();

        assert!(matches!(
            workflow.interact(&Selection::Point { x: 1.0 }),
            Err(WorkflowError::NoInteractiveView)
        ));

        workflow.select(Some(t)).unwrap();
        assert_eq!(
            workflow.session().last_plotted(),
            Some((t, "threshold-selection"))
        );

        assert!(workflow.interact(&Selection::Point { x: 150.0 }).unwrap());
        let threshold = workflow
            .item(t)
            .unwrap()
            .operation()
            .as_any()
            .downcast_ref::<ThresholdOp>()
            .unwrap()
            .threshold;
        assert_eq!(threshold, 150.0);
        assert!(!workflow
            .interact(&Selection::Span { low: 1.0, high: 2.0 })
            .unwrap());
    }

    #[test]
    fn test_events_record_status_changes() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, import_id) = workflow_with_import(&dir);
        let events = workflow.take_events();
        assert!(events.contains(&Event::ItemAdded {
            item_id: import_id,
            index: 0
        }));
        assert!(events.contains(&Event::ItemStatusUpdate {
            item_id: import_id,
            status: ItemStatus::Valid
        }));
        assert!(workflow.take_events().is_empty());
    }

    #[test]
    fn test_edit_operation_type_mismatch() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, import_id) = workflow_with_import(&dir);
        let err = workflow
            .edit_operation::<ThresholdOp, _, _>(import_id, |op| op.threshold = 1.0)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TypeMismatch { .. }));
    }

    #[test]
    fn test_edit_operation_field_assignment_reapplies() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        workflow.take_events();

        workflow
            .edit_operation::<ThresholdOp, _, _>(t, |op| op.threshold = 2000.0)
            .unwrap();
        let item = workflow.item(t).unwrap();
        assert_eq!(item.status(), ItemStatus::Valid);
        assert_eq!(
            item.result().unwrap().column("T").unwrap(),
            &ColumnData::Bool(vec![false, false, false, true])
        );
        assert_eq!(workflow.session().counters(t).applies, 2);

        // A setter and a direct write of the same field apply once.
        workflow
            .edit_operation::<ThresholdOp, _, _>(t, |op| {
                op.set_threshold(300.0);
                op.threshold = 300.0;
            })
            .unwrap();
        assert_eq!(workflow.session().counters(t).applies, 3);

        // Writing the current value changes nothing.
        workflow
            .edit_operation::<ThresholdOp, _, _>(t, |op| op.threshold = 300.0)
            .unwrap();
        assert_eq!(workflow.session().counters(t).applies, 3);
    }

    #[test]
    fn test_reapplying_nan_data_leaves_downstream_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nan.csv");
        std::fs::write(&path, "V2-A,Y2-A\n1.0,NaN\n2.0,500.0\n3.0,1000.0\n").unwrap();
        let mut workflow = Workflow::new();
        let import = ImportOp::new(
            vec![Tube {
                file: path.display().to_string(),
                conditions: Default::default(),
            }],
            Default::default(),
        );
        workflow.append(WorkflowItem::new(Box::new(import))).unwrap();
        let s = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("S", "Y2-A", 300.0))))
            .unwrap();
        let t = workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "V2-A", 1.5))))
            .unwrap();
        assert_eq!(workflow.session().counters(t).applies, 1);

        workflow.apply(s).unwrap();
        assert_eq!(workflow.session().counters(s).applies, 2);
        assert_eq!(workflow.session().counters(t).applies, 1);
        assert_eq!(workflow.item(t).unwrap().status(), ItemStatus::Valid);
    }

    #[test]
    fn test_notebook_has_header_and_cells() {
        let dir = TempDir::new().unwrap();
        let (mut workflow, _) = workflow_with_import(&dir);
        workflow
            .append(WorkflowItem::new(Box::new(ThresholdOp::new("T", "Y2-A", 300.0))))
            .unwrap();
        let script = workflow.notebook().to_script();
        assert!(script.starts_with("import cytoflow as flow"));
        assert!(script.contains("op_1 = flow.ThresholdOp(name = 'T', channel = 'Y2-A', threshold = 300.0)"));
        assert!(script.contains("ex_1 = op_1.apply(ex_0)"));
    }
}
