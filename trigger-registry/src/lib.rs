use serde::{Deserialize, Serialize};

pub const TRIGGER_SCHEMA_V1: &str = "trigger.v1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTriggerV1 {
    pub schema: String,
    pub source: String,
    #[serde(default)]
    pub rule_id: Option<String>,
    pub data: serde_json::Value,
    pub occurred_at: String,
}

/// A single field-level problem with an inbound trigger envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_trigger_v1(trigger: &CanonicalTriggerV1) -> Result<(), Vec<FieldIssue>> {
    let mut issues = Vec::new();

    if trigger.schema != TRIGGER_SCHEMA_V1 {
        issues.push(FieldIssue::new(
            "schema",
            "unsupported",
            format!("unsupported schema '{}'", trigger.schema),
        ));
    }
    if trigger.source.trim().is_empty() {
        issues.push(FieldIssue::new("source", "required", "source is required"));
    }
    if let Some(rule_id) = &trigger.rule_id {
        if rule_id.trim().is_empty() {
            issues.push(FieldIssue::new(
                "rule_id",
                "blank",
                "rule_id must not be blank when present",
            ));
        }
    }
    if !trigger.data.is_object() {
        issues.push(FieldIssue::new(
            "data",
            "invalid_type",
            "data must be a JSON object",
        ));
    }
    if trigger.occurred_at.trim().is_empty() {
        issues.push(FieldIssue::new(
            "occurred_at",
            "required",
            "occurred_at is required",
        ));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> CanonicalTriggerV1 {
        CanonicalTriggerV1 {
            schema: TRIGGER_SCHEMA_V1.into(),
            source: "generic".into(),
            rule_id: None,
            data: serde_json::json!({"score": 91}),
            occurred_at: "2026-10-16T09:00:00Z".into(),
        }
    }

    #[test]
    fn validates_trigger_v1() {
        assert!(validate_trigger_v1(&trigger()).is_ok());
    }

    #[test]
    fn reports_every_bad_field() {
        let mut bad = trigger();
        bad.schema = "alert.v1".into();
        bad.source = "  ".into();
        bad.data = serde_json::json!([1, 2]);

        let issues = validate_trigger_v1(&bad).expect_err("invalid");
        let fields = issues.iter().map(|i| i.field.as_str()).collect::<Vec<_>>();
        assert_eq!(fields, vec!["schema", "source", "data"]);
        assert_eq!(issues[2].code, "invalid_type");
    }

    #[test]
    fn blank_rule_id_is_rejected() {
        let mut bad = trigger();
        bad.rule_id = Some(String::new());
        let issues = validate_trigger_v1(&bad).expect_err("invalid");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "rule_id");
    }
}
