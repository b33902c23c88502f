//! Domain error types.
//!
//! `OpError` and `ViewError` are expected, user-facing validation failures.
//! They are captured at the workflow item boundary and turned into status
//! fields. `WorkflowError` is returned to callers of the workflow API.

use thiserror::Error;
use uuid::Uuid;

use crate::experiment::ExperimentError;

/// A validation failure raised by an operation's `estimate` or `apply`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct OpError {
    /// The parameter that caused the failure, if it can be pinned down.
    pub field: Option<String>,
    pub message: String,
}

impl OpError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// An error not attributable to a single parameter.
    pub fn general(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl From<ExperimentError> for OpError {
    fn from(err: ExperimentError) -> Self {
        OpError::general(err.to_string())
    }
}

/// A validation failure raised by a view's `plot`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ViewError {
    pub field: Option<String>,
    pub message: String,
}

impl ViewError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn general(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

impl From<ExperimentError> for ViewError {
    fn from(err: ExperimentError) -> Self {
        ViewError::general(err.to_string())
    }
}

/// Failure to set a parameter from a dynamic value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ParamError {
    pub fn invalid(field: &str, err: impl std::fmt::Display) -> Self {
        ParamError::InvalidValue {
            field: field.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors returned by the workflow API.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("no workflow item with id {0}")]
    ItemNotFound(Uuid),

    #[error("item {0} is busy estimating or applying")]
    ItemBusy(Uuid),

    #[error("item {0} has no view '{1}'")]
    ViewNotFound(Uuid, String),

    #[error("item {item} does not hold a {expected}")]
    TypeMismatch { item: Uuid, expected: &'static str },

    #[error("index {index} is out of bounds for a workflow of {len} items")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("no view is accepting interactive input")]
    NoInteractiveView,

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Serialization(#[from] crate::serialization::SerializationError),
}
