use crate::error::ApiError;
use crate::routes::{dispatch, TriggerResults};
use axum::{extract::State, http::StatusCode, Json};
use escalation_core::EscalationEngine;
use serde_json::{json, Map, Value};
use trigger_registry::{validate_trigger_v1, CanonicalTriggerV1, FieldIssue, TRIGGER_SCHEMA_V1};

/// Normalises an external alert payload into `trigger.v1` envelopes.
pub trait TriggerAdapter: Send + Sync + 'static {
    fn parse(&self, payload: &Value) -> Result<Vec<CanonicalTriggerV1>, Vec<FieldIssue>>;
}

pub struct GenericAdapter;
pub struct AlertmanagerAdapter;

impl TriggerAdapter for GenericAdapter {
    fn parse(&self, payload: &Value) -> Result<Vec<CanonicalTriggerV1>, Vec<FieldIssue>> {
        let data = match payload.get("data") {
            Some(data) => data.clone(),
            None => payload.clone(),
        };

        let trigger = CanonicalTriggerV1 {
            schema: TRIGGER_SCHEMA_V1.into(),
            source: payload
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("generic")
                .to_string(),
            rule_id: payload
                .get("rule_id")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            data,
            occurred_at: payload
                .get("occurred_at")
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .unwrap_or_else(current_timestamp),
        };
        validate_trigger_v1(&trigger)?;
        Ok(vec![trigger])
    }
}

impl TriggerAdapter for AlertmanagerAdapter {
    fn parse(&self, payload: &Value) -> Result<Vec<CanonicalTriggerV1>, Vec<FieldIssue>> {
        let alerts = payload
            .get("alerts")
            .and_then(Value::as_array)
            .filter(|alerts| !alerts.is_empty())
            .ok_or_else(|| {
                vec![FieldIssue::new(
                    "alerts",
                    "required",
                    "alertmanager payload needs a non-empty alerts array",
                )]
            })?;

        let mut triggers = Vec::with_capacity(alerts.len());
        let mut issues = Vec::new();
        for (idx, alert) in alerts.iter().enumerate() {
            let labels = alert.get("labels").cloned().unwrap_or_else(|| json!({}));
            let annotations = alert
                .get("annotations")
                .cloned()
                .unwrap_or_else(|| json!({}));

            let mut data = Map::new();
            data.insert(
                "alertname".into(),
                labels.get("alertname").cloned().unwrap_or(Value::Null),
            );
            data.insert(
                "severity".into(),
                labels.get("severity").cloned().unwrap_or(Value::Null),
            );
            data.insert(
                "status".into(),
                alert
                    .get("status")
                    .or_else(|| payload.get("status"))
                    .cloned()
                    .unwrap_or(Value::Null),
            );
            data.insert(
                "fingerprint".into(),
                alert.get("fingerprint").cloned().unwrap_or(Value::Null),
            );
            data.insert("labels".into(), labels.clone());
            data.insert("annotations".into(), annotations);

            let trigger = CanonicalTriggerV1 {
                schema: TRIGGER_SCHEMA_V1.into(),
                source: "alertmanager".into(),
                rule_id: labels
                    .get("escalation_rule")
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                data: Value::Object(data),
                occurred_at: alert
                    .get("startsAt")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .unwrap_or_else(current_timestamp),
            };

            match validate_trigger_v1(&trigger) {
                Ok(()) => triggers.push(trigger),
                Err(found) => issues.extend(found.into_iter().map(|issue| FieldIssue {
                    field: format!("alerts[{idx}].{}", issue.field),
                    ..issue
                })),
            }
        }

        if issues.is_empty() {
            Ok(triggers)
        } else {
            Err(issues)
        }
    }
}

pub async fn handle_generic(
    State(engine): State<EscalationEngine>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<TriggerResults>), ApiError> {
    intake(&engine, &payload, GenericAdapter).await
}

pub async fn handle_alertmanager(
    State(engine): State<EscalationEngine>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<TriggerResults>), ApiError> {
    intake(&engine, &payload, AlertmanagerAdapter).await
}

async fn intake(
    engine: &EscalationEngine,
    payload: &Value,
    adapter: impl TriggerAdapter,
) -> Result<(StatusCode, Json<TriggerResults>), ApiError> {
    let triggers = adapter.parse(payload).map_err(ApiError::validation)?;

    let mut results = Vec::new();
    for trigger in triggers {
        tracing::debug!(source = %trigger.source, rule_id = ?trigger.rule_id, "webhook trigger");
        results.extend(dispatch(engine, trigger).await?);
    }
    Ok((StatusCode::ACCEPTED, Json(TriggerResults { results })))
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_payload_without_envelope_becomes_data() {
        let triggers = GenericAdapter
            .parse(&json!({ "days_overdue": 4, "rule_id": "r1" }))
            .expect("parse");
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].source, "generic");
        assert_eq!(triggers[0].rule_id.as_deref(), Some("r1"));
        assert_eq!(triggers[0].data["days_overdue"], 4);
    }

    #[test]
    fn generic_payload_with_scalar_data_is_rejected() {
        let issues = GenericAdapter
            .parse(&json!({ "data": 7 }))
            .expect_err("invalid");
        assert_eq!(issues[0].field, "data");
    }

    #[test]
    fn alertmanager_alerts_fan_out() {
        let payload = json!({
            "status": "firing",
            "alerts": [
                {
                    "labels": { "alertname": "DiskFull", "severity": "critical", "escalation_rule": "r9" },
                    "annotations": { "summary": "disk at 97%" },
                    "startsAt": "2026-10-16T08:00:00Z",
                    "fingerprint": "abc"
                },
                { "labels": { "alertname": "CpuHigh" } }
            ]
        });
        let triggers = AlertmanagerAdapter.parse(&payload).expect("parse");
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].rule_id.as_deref(), Some("r9"));
        assert_eq!(triggers[0].data["severity"], "critical");
        assert_eq!(triggers[0].data["status"], "firing");
        assert_eq!(triggers[0].occurred_at, "2026-10-16T08:00:00Z");
        assert_eq!(triggers[1].data["alertname"], "CpuHigh");
        assert_eq!(triggers[1].rule_id, None);
    }

    #[test]
    fn alertmanager_requires_alerts() {
        let issues = AlertmanagerAdapter
            .parse(&json!({ "alerts": [] }))
            .expect_err("invalid");
        assert_eq!(issues[0].field, "alerts");
    }
}
