//! Error types for the escalation engine.

use crate::incident::TransitionError;
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use trigger_registry::FieldIssue;

/// Field-level validation failures, reported together.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub issues: Vec<FieldIssue>,
}

impl ValidationErrors {
    pub fn new(issues: Vec<FieldIssue>) -> Self {
        Self { issues }
    }

    pub fn single(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self::new(vec![FieldIssue::new(field, code, message)])
    }

    pub fn fields(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.field.as_str()).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.issues.as_slice() {
            [] => f.write_str("validation failed"),
            [one] => write!(f, "validation failed for field '{}': {}", one.field, one.message),
            many => write!(f, "validation failed for {} fields", many.len()),
        }
    }
}

#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// The request is well-formed but collides with current state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("template error: {0}")]
    Template(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EscalationError {
    pub fn rule_not_found(id: &str) -> Self {
        EscalationError::NotFound {
            kind: "rule",
            id: id.to_string(),
        }
    }

    pub fn incident_not_found(id: &str) -> Self {
        EscalationError::NotFound {
            kind: "incident",
            id: id.to_string(),
        }
    }
}

impl From<ValidationErrors> for EscalationError {
    fn from(value: ValidationErrors) -> Self {
        EscalationError::Validation(value)
    }
}

pub type Result<T, E = EscalationError> = std::result::Result<T, E>;
