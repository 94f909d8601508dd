use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use escalation_core::store::StoreError;
use escalation_core::{EscalationError, ValidationErrors};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use trigger_registry::FieldIssue;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{}", .0.message)]
    Validation(ValidationErrorDetails),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Clone, Debug, Serialize)]
pub struct ValidationErrorDetails {
    pub message: String,
    pub fields: BTreeMap<String, Vec<FieldError>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldError {
    pub code: String,
    pub message: String,
}

impl ValidationErrorDetails {
    pub fn from_issues(issues: Vec<FieldIssue>) -> Self {
        let mut fields: BTreeMap<String, Vec<FieldError>> = BTreeMap::new();
        for issue in issues {
            fields.entry(issue.field).or_default().push(FieldError {
                code: issue.code,
                message: issue.message,
            });
        }

        let message = match fields.keys().next() {
            Some(field) if fields.len() == 1 => format!("validation failed for field '{field}'"),
            _ => format!("validation failed for {} fields", fields.len()),
        };
        Self { message, fields }
    }
}

impl ApiError {
    pub fn validation(issues: Vec<FieldIssue>) -> Self {
        ApiError::Validation(ValidationErrorDetails::from_issues(issues))
    }

    pub fn field(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self::validation(vec![FieldIssue::new(field, code, message)])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(value: ValidationErrors) -> Self {
        ApiError::validation(value.issues)
    }
}

impl From<EscalationError> for ApiError {
    fn from(err: EscalationError) -> Self {
        match err {
            EscalationError::Validation(errors) => errors.into(),
            EscalationError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            EscalationError::Conflict(_) | EscalationError::Transition(_) => {
                ApiError::Conflict(err.to_string())
            }
            EscalationError::Store(
                StoreError::ActiveIncidentExists { .. }
                | StoreError::RuleInUse { .. }
                | StoreError::StaleRule { .. },
            ) => ApiError::Conflict(err.to_string()),
            EscalationError::Store(_)
            | EscalationError::Template(_)
            | EscalationError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<&'a BTreeMap<String, Vec<FieldError>>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        let fields = match &self {
            ApiError::Validation(details) => Some(&details.fields),
            _ => None,
        };

        let body = ErrorBody {
            code: self.error_code(),
            message,
            fields,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escalation_core::incident::{IncidentStatus, TransitionError};

    #[test]
    fn engine_errors_map_to_status_codes() {
        let cases = [
            (
                ApiError::from(EscalationError::rule_not_found("r1")),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(EscalationError::Transition(TransitionError::InvalidState {
                    id: "i1".into(),
                    actual: IncidentStatus::Resolved,
                    expected: "open",
                })),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(EscalationError::Conflict("busy".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(EscalationError::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::from(ValidationErrors::single("name", "required", "name is required")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn field_issues_are_grouped_by_field() {
        let details = ValidationErrorDetails::from_issues(vec![
            FieldIssue::new("levels[0].recipients[0].address", "invalid_email", "bad"),
            FieldIssue::new("levels[0].recipients[0].address", "required", "empty"),
            FieldIssue::new("name", "required", "name is required"),
        ]);
        assert_eq!(details.fields.len(), 2);
        assert_eq!(details.fields["levels[0].recipients[0].address"].len(), 2);
        assert_eq!(details.message, "validation failed for 2 fields");
    }
}
