//! CSV import: the root operation of every workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{
    eq_concrete, param, replace, ChangeQueue, FieldRole, FieldSpec, Transient, Warnings,
    WorkflowOperation, TRACING_TARGET,
};
use crate::error::{OpError, ParamError};
use crate::experiment::import::{import_tubes, Tube};
use crate::experiment::{ConditionKind, Experiment};
use crate::notebook::{operation_code, PyCall, PyRepr};
use crate::serialization::{decode, encode, Registry, VersionMatch};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("tubes", FieldRole::Apply),
    FieldSpec::new("conditions", FieldRole::Apply),
    FieldSpec::new("channels", FieldRole::Apply),
    FieldSpec::new("events", FieldRole::Apply),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportOp {
    #[serde(default)]
    pub tubes: Vec<Tube>,
    /// Condition names and kinds every tube carries a value for.
    #[serde(default)]
    pub conditions: BTreeMap<String, ConditionKind>,
    /// File column -> channel name. Empty imports every column unrenamed.
    #[serde(default)]
    pub channels: BTreeMap<String, String>,
    /// Events kept per tube; 0 keeps them all.
    #[serde(default)]
    pub events: usize,
    #[serde(skip)]
    base_dir: Transient<Option<PathBuf>>,
    #[serde(skip)]
    changes: ChangeQueue,
}

impl ImportOp {
    pub fn new(tubes: Vec<Tube>, conditions: BTreeMap<String, ConditionKind>) -> Self {
        Self {
            tubes,
            conditions,
            ..Self::default()
        }
    }

    pub fn set_events(&mut self, events: usize) {
        if replace(&mut self.events, events) {
            self.changes.field(FIELDS, "events");
        }
    }
}

impl PyRepr for Tube {
    fn py_repr(&self) -> String {
        PyCall::new("flow.Tube")
            .arg("file", &self.file)
            .arg("conditions", &self.conditions)
            .render()
    }
}

impl WorkflowOperation for ImportOp {
    fn id(&self) -> &'static str {
        "import"
    }

    fn friendly_id(&self) -> &'static str {
        "Import data"
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn changed_fields(&self, before: &dyn WorkflowOperation) -> Vec<&'static str> {
        changed_fields!(self, before, [tubes, conditions, channels, events])
    }

    fn set_param(&mut self, field: &str, value: JsonValue) -> Result<(), ParamError> {
        let changed = match field {
            "tubes" => replace(&mut self.tubes, param(field, value)?),
            "conditions" => replace(&mut self.conditions, param(field, value)?),
            "channels" => replace(&mut self.channels, param(field, value)?),
            "events" => replace(&mut self.events, param(field, value)?),
            _ => return Err(ParamError::UnknownField(field.to_string())),
        };
        if changed {
            self.changes.field(FIELDS, field);
        }
        Ok(())
    }

    fn changes(&mut self) -> &mut ChangeQueue {
        &mut self.changes
    }

    fn apply(
        &self,
        _experiment: Option<&Experiment>,
        warnings: &mut Warnings,
    ) -> Result<Experiment, OpError> {
        if self.tubes.is_empty() {
            return Err(OpError::new("tubes", "Must specify some tubes"));
        }
        let base_dir = self.base_dir.0.as_deref().unwrap_or(Path::new("."));
        let imported = import_tubes(
            &self.tubes,
            &self.conditions,
            &self.channels,
            self.events,
            base_dir,
        )
        .map_err(|e| OpError::new("tubes", e.to_string()))?;
        for warning in imported.warnings {
            warnings.warn(Some("events"), warning);
        }
        tracing::debug!(
            target: TRACING_TARGET,
            tubes = self.tubes.len(),
            events = imported.experiment.len(),
            "imported tubes"
        );
        let mut experiment = imported.experiment;
        experiment.push_history("import");
        Ok(experiment)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        self.base_dir.0 = Some(base_dir.to_path_buf());
    }

    fn notebook_code(&self, idx: usize, prev_idx: Option<usize>) -> String {
        let conditions: BTreeMap<String, String> = self
            .conditions
            .iter()
            .map(|(name, kind)| (name.clone(), kind.as_str().to_string()))
            .collect();
        let call = PyCall::new("flow.ImportOp")
            .arg("conditions", &conditions)
            .arg("tubes", &self.tubes)
            .arg_unless("channels", &self.channels, &BTreeMap::new())
            .arg_unless("events", &self.events, &0);
        operation_code(idx, prev_idx, &call, None)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn WorkflowOperation> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn WorkflowOperation) -> bool {
        eq_concrete(self, other)
    }
}

pub(super) fn register(registry: &mut Registry) {
    registry.register_dumper::<ImportOp, _>("import", 1, |op, _| encode(op));
    registry.register_loader("import", VersionMatch::Exact(1), |value, _| {
        let op: Box<dyn WorkflowOperation> = Box::new(decode::<ImportOp>("import", value)?);
        Ok(op)
    });
}
