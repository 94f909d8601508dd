use crate::error::ApiError;
use crate::webhook;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use escalation_core::engine::RuleTrigger;
use escalation_core::incident::IncidentStatus;
use escalation_core::store::Event;
use escalation_core::{
    EscalateOutcome, EscalationEngine, EscalationRule, Incident, IncidentFilter, RuleDraft,
    Statistics, TriggerOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use trigger_registry::{validate_trigger_v1, CanonicalTriggerV1};

pub fn router(engine: EscalationEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/schema", get(rule_schema))
        .route(
            "/rules/:id",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/rules/:id/activate", post(activate_rule))
        .route("/rules/:id/deactivate", post(deactivate_rule))
        .route("/rules/:id/trigger", post(trigger_rule))
        .route("/events", post(post_event))
        .route("/webhook/generic", post(webhook::handle_generic))
        .route("/webhook/alertmanager", post(webhook::handle_alertmanager))
        .route("/incidents", get(list_incidents))
        .route("/incidents/:id", get(get_incident))
        .route("/incidents/:id/timeline", get(incident_timeline))
        .route("/incidents/:id/escalate", post(escalate_incident))
        .route("/incidents/:id/acknowledge", post(acknowledge_incident))
        .route("/incidents/:id/reopen", post(reopen_incident))
        .route("/incidents/:id/pause", post(pause_incident))
        .route("/incidents/:id/resume", post(resume_incident))
        .route("/incidents/:id/resolve", post(resolve_incident))
        .route("/statistics", get(statistics))
        .with_state(engine)
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── rules ───────────────────────────────────────────────────────────────────

async fn list_rules(State(engine): State<EscalationEngine>) -> ApiResult<Vec<EscalationRule>> {
    Ok(Json(engine.list_rules().await?))
}

async fn create_rule(
    State(engine): State<EscalationEngine>,
    Json(draft): Json<RuleDraft>,
) -> Result<(StatusCode, Json<EscalationRule>), ApiError> {
    let rule = engine.create_rule(draft).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn rule_schema() -> Json<Value> {
    Json(serde_json::to_value(schemars::schema_for!(RuleDraft)).unwrap_or(Value::Null))
}

async fn get_rule(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> ApiResult<EscalationRule> {
    Ok(Json(engine.get_rule(&id).await?))
}

async fn update_rule(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(draft): Json<RuleDraft>,
) -> ApiResult<EscalationRule> {
    Ok(Json(engine.update_rule(&id, draft).await?))
}

async fn delete_rule(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    engine.delete_rule(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_rule(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> ApiResult<EscalationRule> {
    Ok(Json(engine.set_rule_active(&id, true).await?))
}

async fn deactivate_rule(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> ApiResult<EscalationRule> {
    Ok(Json(engine.set_rule_active(&id, false).await?))
}

// ── triggers ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TriggerResults {
    pub results: Vec<RuleTrigger>,
}

async fn trigger_rule(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<TriggerOutcome>), ApiError> {
    let outcome = engine.trigger(&id, payload).await?;
    let status = match outcome {
        TriggerOutcome::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn post_event(
    State(engine): State<EscalationEngine>,
    Json(trigger): Json<CanonicalTriggerV1>,
) -> ApiResult<TriggerResults> {
    let results = dispatch(&engine, trigger).await?;
    Ok(Json(TriggerResults { results }))
}

/// Validate an envelope and hand it to its rule, or to every active rule
/// when it names none.
pub(crate) async fn dispatch(
    engine: &EscalationEngine,
    trigger: CanonicalTriggerV1,
) -> Result<Vec<RuleTrigger>, ApiError> {
    validate_trigger_v1(&trigger).map_err(ApiError::validation)?;

    match trigger.rule_id {
        Some(rule_id) => {
            let outcome = engine.trigger(&rule_id, trigger.data).await?;
            Ok(vec![RuleTrigger { rule_id, outcome }])
        }
        None => Ok(engine.trigger_event(trigger.data).await?),
    }
}

// ── incidents ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct IncidentQuery {
    status: Option<String>,
    rule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActorBody {
    actor: String,
    #[serde(default)]
    note: Option<String>,
}

impl ActorBody {
    fn actor(&self) -> Result<&str, ApiError> {
        let actor = self.actor.trim();
        if actor.is_empty() {
            return Err(ApiError::field("actor", "required", "actor is required"));
        }
        Ok(actor)
    }
}

async fn list_incidents(
    State(engine): State<EscalationEngine>,
    Query(query): Query<IncidentQuery>,
) -> ApiResult<Vec<Incident>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(IncidentStatus::parse(raw).ok_or_else(|| {
            ApiError::field(
                "status",
                "invalid_value",
                format!("unknown status '{raw}'; expected open, acknowledged or resolved"),
            )
        })?),
    };
    let filter = IncidentFilter {
        status,
        rule_id: query.rule_id.filter(|id| !id.is_empty()),
    };
    Ok(Json(engine.list_incidents(filter).await?))
}

async fn get_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> ApiResult<Incident> {
    Ok(Json(engine.get_incident(&id).await?))
}

async fn incident_timeline(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Event>> {
    Ok(Json(engine.timeline(&id).await?))
}

async fn escalate_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
) -> ApiResult<EscalateOutcome> {
    Ok(Json(engine.escalate(&id).await?))
}

async fn acknowledge_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Incident> {
    let actor = body.actor()?;
    Ok(Json(engine.acknowledge(&id, actor, body.note.clone()).await?))
}

async fn reopen_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Incident> {
    Ok(Json(engine.reopen(&id, body.actor()?).await?))
}

async fn pause_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Incident> {
    Ok(Json(engine.pause(&id, body.actor()?).await?))
}

async fn resume_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Incident> {
    Ok(Json(engine.resume(&id, body.actor()?).await?))
}

async fn resolve_incident(
    State(engine): State<EscalationEngine>,
    Path(id): Path<String>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Incident> {
    let actor = body.actor()?;
    Ok(Json(engine.resolve(&id, actor, body.note.clone()).await?))
}

async fn statistics(State(engine): State<EscalationEngine>) -> ApiResult<Statistics> {
    Ok(Json(engine.statistics().await?))
}
