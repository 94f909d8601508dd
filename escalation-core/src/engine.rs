//! The escalation engine: rules in, incidents and notifications out.
//!
//! Every incident change goes through [`EscalationEngine::transition`]: load
//! the current value, apply a pure transition, and commit it with a
//! compare-and-swap on `version`. A lost race reloads and re-applies, so a
//! timer expiry that collides with an acknowledgment re-evaluates against
//! the acknowledged incident instead of overwriting it. Notifications are
//! sent only after the level change is committed.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EscalationError, Result};
use crate::incident::{DeliveryFault, Incident, TransitionError};
use crate::notifier::{Notification, Notifier};
use crate::rules::{EscalationRule, RuleDraft};
use crate::store::{Event, EventType, IncidentFilter, Store, StoreError};
use crate::template::TemplateRenderer;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Created { incident: Incident },
    /// The rule already had an active incident; the trigger was counted on it.
    Suppressed { incident: Incident },
    NotMatched,
    RuleInactive,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleTrigger {
    pub rule_id: String,
    #[serde(flatten)]
    pub outcome: TriggerOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EscalateOutcome {
    Escalated { incident: Incident },
    AtMaxLevel { incident: Incident },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_rules: usize,
    pub active_rules: usize,
    pub total_incidents: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_rule: BTreeMap<String, usize>,
    pub mean_time_to_acknowledge_secs: Option<f64>,
    pub mean_time_to_resolve_secs: Option<f64>,
    pub total_escalations: usize,
    pub delivery_faults: usize,
    pub suppressed_triggers: u64,
}

impl Statistics {
    pub fn compute(rules: &[EscalationRule], incidents: &[Incident]) -> Self {
        let severities: HashMap<&str, &'static str> = rules
            .iter()
            .map(|rule| (rule.id.as_str(), rule.definition.severity.as_str()))
            .collect();

        let mut stats = Statistics {
            total_rules: rules.len(),
            active_rules: rules.iter().filter(|rule| rule.is_active()).count(),
            total_incidents: incidents.len(),
            ..Statistics::default()
        };

        let mut ack_times = Vec::new();
        let mut resolve_times = Vec::new();
        for incident in incidents {
            *stats
                .by_status
                .entry(incident.status().to_string())
                .or_default() += 1;
            let severity = severities
                .get(incident.rule_id.as_str())
                .copied()
                .unwrap_or("unknown");
            *stats.by_severity.entry(severity.to_string()).or_default() += 1;
            *stats.by_rule.entry(incident.rule_id.clone()).or_default() += 1;

            stats.total_escalations += incident.level_history.len().saturating_sub(1);
            stats.delivery_faults += incident.faults.len();
            stats.suppressed_triggers += u64::from(incident.suppressed_triggers);

            if let Some(secs) = incident.time_to_acknowledge_secs() {
                ack_times.push(secs);
            }
            if let Some(resolution) = incident.resolution() {
                resolve_times.push(resolution.time_to_resolve_secs);
            }
        }

        stats.mean_time_to_acknowledge_secs = mean(&ack_times);
        stats.mean_time_to_resolve_secs = mean(&resolve_times);
        stats
    }
}

/// Outcome for a trigger that cannot open an incident under `rule`.
fn screen(rule: &EscalationRule, payload: &serde_json::Value) -> Option<TriggerOutcome> {
    if !rule.is_active() {
        debug!(rule_id = %rule.id, "rule inactive, trigger ignored");
        return Some(TriggerOutcome::RuleInactive);
    }
    if !rule.definition.condition.evaluate(payload) {
        debug!(rule_id = %rule.id, "condition not met");
        return Some(TriggerOutcome::NotMatched);
    }
    None
}

/// Map a refused rule write onto the caller-facing conflict.
fn rule_write_error(err: StoreError) -> EscalationError {
    match err {
        StoreError::RuleInUse {
            rule_id,
            incident_id,
        } => EscalationError::Conflict(format!(
            "rule {rule_id} has active incident {incident_id}; only its metadata may change"
        )),
        StoreError::StaleRule { rule_id, .. } => {
            EscalationError::Conflict(format!("rule {rule_id} was modified concurrently"))
        }
        other => other.into(),
    }
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let total: i64 = values.iter().sum();
    Some(total as f64 / values.len() as f64)
}

#[derive(Clone)]
pub struct EscalationEngine {
    store: Store,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    renderer: Arc<TemplateRenderer>,
    max_transition_retries: u32,
}

impl EscalationEngine {
    pub fn new(store: Store, notifier: Notifier, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier: Arc::new(notifier),
            clock,
            renderer: Arc::new(TemplateRenderer::new()),
            max_transition_retries: EngineConfig::default().max_transition_retries,
        }
    }

    /// Open the store and build channels from `config`, on the system clock.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        let notifier = Notifier::from_config(&config.notifier)
            .map_err(|err| EscalationError::Internal(format!("notifier setup failed: {err}")))?;
        Ok(Self::new(store, notifier, Arc::new(SystemClock))
            .with_max_transition_retries(config.max_transition_retries))
    }

    #[must_use]
    pub fn with_max_transition_retries(mut self, retries: u32) -> Self {
        self.max_transition_retries = retries.max(1);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store call on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<std::result::Result<T, StoreError>>
    where
        F: FnOnce(&Store) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|err| EscalationError::Internal(format!("store task failed: {err}")))
    }

    // ── rules ───────────────────────────────────────────────────────────────

    #[instrument(skip(self, draft), fields(rule_name = %draft.name))]
    pub async fn create_rule(&self, draft: RuleDraft) -> Result<EscalationRule> {
        draft.validate()?;
        let rule = EscalationRule::new(Uuid::new_v4().to_string(), draft, self.clock.now());

        let stored = rule.clone();
        self.blocking(move |store| store.insert_rule(&stored)).await??;
        info!(rule_id = %rule.id, levels = rule.max_level(), "rule created");
        Ok(rule)
    }

    /// Replace a rule's definition. While the rule has an active incident
    /// only metadata may change.
    #[instrument(skip(self, draft))]
    pub async fn update_rule(&self, id: &str, draft: RuleDraft) -> Result<EscalationRule> {
        draft.validate()?;
        let mut rule = self.get_rule(id).await?;

        let metadata_only = rule.definition.differs_only_in_metadata(&draft);
        rule.definition = draft;
        rule.updated_at = self.clock.now();
        self.save_rule(&mut rule, metadata_only).await?;
        info!(rule_id = %id, metadata_only, "rule updated");
        Ok(rule)
    }

    #[instrument(skip(self))]
    pub async fn set_rule_active(&self, id: &str, active: bool) -> Result<EscalationRule> {
        let mut rule = self.get_rule(id).await?;
        rule.definition.is_active = active;
        rule.updated_at = self.clock.now();
        self.save_rule(&mut rule, true).await?;
        info!(rule_id = %id, active, "rule activation changed");
        Ok(rule)
    }

    /// Delete a rule. Refused while the rule has an active incident; the
    /// check commits together with the delete.
    #[instrument(skip(self))]
    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        let owned = id.to_string();
        match self.blocking(move |store| store.delete_rule(&owned)).await? {
            Ok(true) => {}
            Ok(false) => return Err(EscalationError::rule_not_found(id)),
            Err(err) => return Err(rule_write_error(err)),
        }
        info!(rule_id = %id, "rule deleted");
        Ok(())
    }

    pub async fn get_rule(&self, id: &str) -> Result<EscalationRule> {
        let owned = id.to_string();
        self.blocking(move |store| store.get_rule(&owned))
            .await??
            .ok_or_else(|| EscalationError::rule_not_found(id))
    }

    pub async fn list_rules(&self) -> Result<Vec<EscalationRule>> {
        Ok(self.blocking(|store| store.list_rules()).await??)
    }

    async fn save_rule(&self, rule: &mut EscalationRule, metadata_only: bool) -> Result<()> {
        let stored = rule.clone();
        match self
            .blocking(move |store| store.update_rule(&stored, metadata_only))
            .await?
        {
            Ok(Some(revision)) => {
                rule.revision = revision;
                Ok(())
            }
            Ok(None) => Err(EscalationError::rule_not_found(&rule.id)),
            Err(err) => Err(rule_write_error(err)),
        }
    }

    // ── triggers ────────────────────────────────────────────────────────────

    #[instrument(skip(self, payload))]
    pub async fn trigger(&self, rule_id: &str, payload: serde_json::Value) -> Result<TriggerOutcome> {
        let rule = self.get_rule(rule_id).await?;
        self.trigger_rule(&rule, payload).await
    }

    /// Evaluate one event against every active rule, highest priority first.
    #[instrument(skip(self, payload))]
    pub async fn trigger_event(&self, payload: serde_json::Value) -> Result<Vec<RuleTrigger>> {
        let mut rules = self.blocking(|store| store.active_rules()).await??;
        rules.sort_by_key(|rule| {
            (
                Reverse(rule.definition.priority),
                Reverse(rule.definition.severity),
            )
        });

        let mut results = Vec::with_capacity(rules.len());
        for rule in &rules {
            let outcome = self.trigger_rule(rule, payload.clone()).await?;
            results.push(RuleTrigger {
                rule_id: rule.id.clone(),
                outcome,
            });
        }
        Ok(results)
    }

    async fn trigger_rule(
        &self,
        rule: &EscalationRule,
        payload: serde_json::Value,
    ) -> Result<TriggerOutcome> {
        let mut rule = rule.clone();
        if let Some(skipped) = screen(&rule, &payload) {
            return Ok(skipped);
        }

        let now = self.clock.now();
        let rule_id = rule.id.clone();
        self.blocking(move |store| store.mark_rule_triggered(&rule_id, now))
            .await??;

        for _ in 0..self.max_transition_retries {
            let incident = Incident::open(Uuid::new_v4().to_string(), &rule, payload.clone(), now);
            let stored = incident.clone();
            let revision = rule.revision;
            match self
                .blocking(move |store| store.insert_incident(&stored, revision))
                .await?
            {
                Ok(()) => {
                    info!(
                        rule_id = %rule.id,
                        incident_id = %incident.id,
                        max_level = incident.max_level,
                        "incident opened"
                    );
                    self.record(Event::new(
                        &incident.id,
                        EventType::Triggered,
                        format!("rule '{}' triggered", rule.name()),
                        Some(json!({ "level": 1, "payload": incident.payload })),
                        now,
                    ))
                    .await;
                    let incident = self.notify_level(&rule, incident, now).await?;
                    return Ok(TriggerOutcome::Created { incident });
                }
                Err(StoreError::ActiveIncidentExists { .. }) => {
                    if let Some(incident) = self.suppress_trigger(&rule, now).await? {
                        return Ok(TriggerOutcome::Suppressed { incident });
                    }
                    // The active incident was resolved in between; try again.
                }
                Err(StoreError::StaleRule { .. }) => {
                    debug!(rule_id = %rule.id, "rule changed while triggering, reloading");
                    rule = self.get_rule(&rule.id).await?;
                    if let Some(skipped) = screen(&rule, &payload) {
                        return Ok(skipped);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(EscalationError::Conflict(format!(
            "rule {} incidents are changing too quickly to open a new one",
            rule.id
        )))
    }

    async fn suppress_trigger(
        &self,
        rule: &EscalationRule,
        now: DateTime<Utc>,
    ) -> Result<Option<Incident>> {
        let Some(active) = self.active_incident(&rule.id).await? else {
            return Ok(None);
        };

        let incident = self
            .apply(&active.id, |current| Ok(current.record_suppressed_trigger()))
            .await?;
        info!(
            rule_id = %rule.id,
            incident_id = %incident.id,
            suppressed = incident.suppressed_triggers,
            "trigger suppressed by active incident"
        );
        self.record(Event::new(
            &incident.id,
            EventType::TriggerSuppressed,
            "trigger suppressed while incident is active",
            Some(json!({ "suppressed_triggers": incident.suppressed_triggers })),
            now,
        ))
        .await;
        Ok(Some(incident))
    }

    // ── incident transitions ────────────────────────────────────────────────

    /// Move an open incident to its next level now, deadline or not.
    #[instrument(skip(self))]
    pub async fn escalate(&self, id: &str) -> Result<EscalateOutcome> {
        let incident = self.get_incident(id).await?;
        let rule = self.get_rule(&incident.rule_id).await?;
        let now = self.clock.now();

        match self.apply(id, |current| current.escalate(&rule, now)).await {
            Ok(escalated) => {
                let incident = self.after_escalation(&rule, escalated, now).await?;
                Ok(EscalateOutcome::Escalated { incident })
            }
            Err(EscalationError::Transition(TransitionError::AtMaxLevel { max_level, .. })) => {
                debug!(incident_id = %id, max_level, "already at max level");
                Ok(EscalateOutcome::AtMaxLevel {
                    incident: self.get_incident(id).await?,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Escalate only if the incident is still due at `now`. Returns `None`
    /// when it was acknowledged, paused, resolved or re-armed in the
    /// meantime.
    #[instrument(skip(self))]
    pub async fn escalate_if_due(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Incident>> {
        let incident = self.get_incident(id).await?;
        if !incident.is_due(now) {
            return Ok(None);
        }
        let rule = self.get_rule(&incident.rule_id).await?;

        let escalated = self
            .transition(id, |current| {
                if !current.is_due(now) {
                    return Ok(None);
                }
                match current.escalate(&rule, now) {
                    Ok(next) => Ok(Some(next)),
                    Err(TransitionError::AtMaxLevel { .. }) => Ok(None),
                    Err(err) => Err(err.into()),
                }
            })
            .await?;

        match escalated {
            Some(escalated) => Ok(Some(self.after_escalation(&rule, escalated, now).await?)),
            None => {
                debug!(incident_id = %id, "no longer due, skipped");
                Ok(None)
            }
        }
    }

    async fn after_escalation(
        &self,
        rule: &EscalationRule,
        incident: Incident,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        info!(
            incident_id = %incident.id,
            rule_id = %rule.id,
            level = incident.current_level,
            max_level = incident.max_level,
            "incident escalated"
        );
        self.record(Event::new(
            &incident.id,
            EventType::Escalated,
            format!(
                "escalated to level {} of {}",
                incident.current_level, incident.max_level
            ),
            Some(json!({
                "from_level": incident.current_level - 1,
                "to_level": incident.current_level,
                "next_escalation_at": incident.next_escalation_at,
            })),
            now,
        ))
        .await;
        self.notify_level(rule, incident, now).await
    }

    #[instrument(skip(self, note))]
    pub async fn acknowledge(&self, id: &str, actor: &str, note: Option<String>) -> Result<Incident> {
        let now = self.clock.now();
        let incident = self
            .apply(id, |current| current.acknowledge(actor, note.clone(), now))
            .await?;
        info!(incident_id = %id, actor, level = incident.current_level, "incident acknowledged");
        self.record(Event::new(
            id,
            EventType::Acknowledged,
            format!("acknowledged by {actor}"),
            Some(json!({ "actor": actor, "note": note, "level": incident.current_level })),
            now,
        ))
        .await;
        Ok(incident)
    }

    #[instrument(skip(self))]
    pub async fn reopen(&self, id: &str, actor: &str) -> Result<Incident> {
        let rule = self.rule_for_incident(id).await?;
        let now = self.clock.now();
        let incident = self.apply(id, |current| current.reopen(&rule, now)).await?;
        info!(incident_id = %id, actor, "incident reopened");
        self.record(Event::new(
            id,
            EventType::Reopened,
            format!("reopened by {actor}"),
            Some(json!({ "actor": actor, "next_escalation_at": incident.next_escalation_at })),
            now,
        ))
        .await;
        Ok(incident)
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str, actor: &str) -> Result<Incident> {
        let now = self.clock.now();
        let incident = self.apply(id, |current| current.pause(now)).await?;
        info!(incident_id = %id, actor, "escalation paused");
        self.record(Event::new(
            id,
            EventType::Paused,
            format!("escalation paused by {actor}"),
            Some(json!({ "actor": actor })),
            now,
        ))
        .await;
        Ok(incident)
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str, actor: &str) -> Result<Incident> {
        let rule = self.rule_for_incident(id).await?;
        let now = self.clock.now();
        let incident = self.apply(id, |current| current.resume(&rule, now)).await?;
        info!(incident_id = %id, actor, "escalation resumed");
        self.record(Event::new(
            id,
            EventType::Resumed,
            format!("escalation resumed by {actor}"),
            Some(json!({ "actor": actor, "next_escalation_at": incident.next_escalation_at })),
            now,
        ))
        .await;
        Ok(incident)
    }

    #[instrument(skip(self, note))]
    pub async fn resolve(&self, id: &str, actor: &str, note: Option<String>) -> Result<Incident> {
        let now = self.clock.now();
        let incident = self
            .apply(id, |current| current.resolve(actor, note.clone(), now))
            .await?;
        let time_to_resolve = incident.resolution().map(|r| r.time_to_resolve_secs);
        info!(incident_id = %id, actor, time_to_resolve_secs = ?time_to_resolve, "incident resolved");
        self.record(Event::new(
            id,
            EventType::Resolved,
            format!("resolved by {actor}"),
            Some(json!({ "actor": actor, "note": note, "time_to_resolve_secs": time_to_resolve })),
            now,
        ))
        .await;
        Ok(incident)
    }

    /// Commit a transition that always produces a new value.
    async fn apply<F>(&self, id: &str, f: F) -> Result<Incident>
    where
        F: Fn(&Incident) -> std::result::Result<Incident, TransitionError> + Send,
    {
        self.transition(id, move |current| Ok(Some(f(current)?)))
            .await?
            .ok_or_else(|| EscalationError::Internal(format!("transition on {id} produced no change")))
    }

    /// Load, apply, compare-and-swap; reload and re-apply on a lost race.
    /// `f` returning `Ok(None)` means nothing to commit.
    async fn transition<F>(&self, id: &str, f: F) -> Result<Option<Incident>>
    where
        F: Fn(&Incident) -> Result<Option<Incident>> + Send,
    {
        for attempt in 1..=self.max_transition_retries {
            let current = self.get_incident(id).await?;
            let Some(next) = f(&current)? else {
                return Ok(None);
            };

            let expected = current.version;
            let stored = next.clone();
            match self
                .blocking(move |store| store.compare_and_swap(&stored, expected))
                .await?
            {
                Ok(()) => return Ok(Some(next)),
                Err(StoreError::StaleVersion { .. }) => {
                    debug!(incident_id = %id, attempt, "incident changed concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(incident_id = %id, attempts = self.max_transition_retries, "gave up on contended incident");
        Err(EscalationError::Conflict(format!(
            "incident {id} is being modified concurrently"
        )))
    }

    // ── notifications ───────────────────────────────────────────────────────

    /// Notify the recipients of the incident's current level and store any
    /// delivery faults on it. Returns the incident as last persisted.
    async fn notify_level(
        &self,
        rule: &EscalationRule,
        incident: Incident,
        now: DateTime<Utc>,
    ) -> Result<Incident> {
        let level = incident.current_level;
        let recipients = rule
            .level(level)
            .map(|l| l.recipients.clone())
            .unwrap_or_default();

        let faults = match self.renderer.render_level(rule, &incident) {
            Ok((subject, body)) => {
                let notification = Notification {
                    incident_id: incident.id.clone(),
                    rule_id: rule.id.clone(),
                    rule_name: rule.name().to_string(),
                    level,
                    max_level: incident.max_level,
                    severity: rule.definition.severity,
                    subject,
                    body,
                    recipients,
                };
                let report = self.notifier.deliver(&notification, now).await;
                for delivery in &report.delivered {
                    self.record(Event::new(
                        &incident.id,
                        EventType::NotificationSent,
                        format!("level {level} notification sent via {}", delivery.channel),
                        serde_json::to_value(delivery).ok(),
                        now,
                    ))
                    .await;
                }
                report.faults
            }
            Err(err) => {
                error!(incident_id = %incident.id, level, error = %err, "template rendering failed");
                recipients
                    .iter()
                    .map(|recipient| DeliveryFault {
                        level,
                        channel: recipient.channel,
                        recipient: recipient.address.clone(),
                        error: err.to_string(),
                        attempts: 0,
                        at: now,
                    })
                    .collect()
            }
        };

        if faults.is_empty() {
            return Ok(incident);
        }

        for fault in &faults {
            self.record(Event::new(
                &incident.id,
                EventType::NotificationFailed,
                format!(
                    "level {level} notification to {} via {} failed",
                    fault.recipient, fault.channel
                ),
                serde_json::to_value(fault).ok(),
                now,
            ))
            .await;
        }

        self.apply(&incident.id, |current| {
            Ok(faults
                .iter()
                .cloned()
                .fold(current.clone(), |acc, fault| acc.record_fault(fault)))
        })
        .await
    }

    /// Append to the timeline. A failed append is logged, not propagated:
    /// the state change it describes is already committed.
    async fn record(&self, event: Event) {
        let incident_id = event.incident_id.clone();
        let event_type = event.event_type;
        match self.blocking(move |store| store.append_event(&event)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                error!(incident_id = %incident_id, ?event_type, error = %err, "timeline append failed")
            }
            Err(err) => {
                error!(incident_id = %incident_id, ?event_type, error = %err, "timeline append failed")
            }
        }
    }

    // ── reads ───────────────────────────────────────────────────────────────

    pub async fn get_incident(&self, id: &str) -> Result<Incident> {
        let owned = id.to_string();
        self.blocking(move |store| store.get_incident(&owned))
            .await??
            .ok_or_else(|| EscalationError::incident_not_found(id))
    }

    pub async fn list_incidents(&self, filter: IncidentFilter) -> Result<Vec<Incident>> {
        Ok(self
            .blocking(move |store| store.list_incidents(&filter))
            .await??)
    }

    pub async fn timeline(&self, id: &str) -> Result<Vec<Event>> {
        self.get_incident(id).await?;
        let owned = id.to_string();
        Ok(self
            .blocking(move |store| store.events_for_incident(&owned))
            .await??)
    }

    /// Ids of open, unpaused incidents whose deadline is at or before `now`.
    pub async fn due_incidents(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let due = self.blocking(move |store| store.due_incidents(now)).await??;
        Ok(due.into_iter().map(|incident| incident.id).collect())
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let (rules, incidents) = self
            .blocking(|store| {
                Ok((
                    store.list_rules()?,
                    store.list_incidents(&IncidentFilter::default())?,
                ))
            })
            .await??;
        Ok(Statistics::compute(&rules, &incidents))
    }

    async fn active_incident(&self, rule_id: &str) -> Result<Option<Incident>> {
        let owned = rule_id.to_string();
        Ok(self
            .blocking(move |store| store.active_incident_for_rule(&owned))
            .await??)
    }

    async fn rule_for_incident(&self, id: &str) -> Result<EscalationRule> {
        let incident = self.get_incident(id).await?;
        self.get_rule(&incident.rule_id).await
    }
}
