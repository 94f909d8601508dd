use crate::conditions::{self, TriggerCondition};
use crate::error::ValidationErrors;
use crate::template;
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use trigger_registry::FieldIssue;

pub const DEFAULT_TIME_TO_ESCALATE_SECS: u64 = 300;

/// Longest delay a rule or level may ask for: one year.
pub const MAX_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    DeadlineApproaching,
    DeadlineMissed,
    ComplianceViolation,
    RiskThreshold,
    AuditFinding,
    SystemFailure,
    Custom,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Sms,
    Webhook,
    Log,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::Webhook => "webhook",
            ChannelKind::Log => "log",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Recipient {
    pub channel: ChannelKind,
    pub address: String,
}

/// One step of an escalation ladder. Levels are numbered from 1 by position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EscalationLevel {
    #[serde(default)]
    pub name: Option<String>,
    /// Seconds spent at this level before moving to the next one.
    /// Falls back to the rule's `time_to_escalate_secs`.
    #[serde(default)]
    pub delay_secs: Option<u64>,
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub subject_template: Option<String>,
    #[serde(default)]
    pub message_template: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MessageTemplates {
    pub subject: String,
    pub body: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            subject: "[{{severity}}] {{ruleName}} escalated to level {{level}}".into(),
            body: "Incident {{incidentId}} for rule {{ruleName}} is at level {{level}} of {{maxLevel}} \
                   (status: {{status}}, triggered at {{triggeredAt}})."
                .into(),
        }
    }
}

/// Client-editable part of a rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rule_type: RuleType,
    #[serde(default)]
    pub condition: TriggerCondition,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_time_to_escalate")]
    pub time_to_escalate_secs: u64,
    pub levels: Vec<EscalationLevel>,
    #[serde(default)]
    pub templates: MessageTemplates,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_time_to_escalate() -> u64 {
    DEFAULT_TIME_TO_ESCALATE_SECS
}

fn default_active() -> bool {
    true
}

impl RuleDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push(FieldIssue::new("name", "required", "name is required"));
        }
        check_delay(self.time_to_escalate_secs, "time_to_escalate_secs", &mut issues);

        conditions::validate(&self.condition, "condition", &mut issues);
        check_template(&self.templates.subject, "templates.subject", &mut issues);
        check_template(&self.templates.body, "templates.body", &mut issues);

        if self.levels.is_empty() {
            issues.push(FieldIssue::new(
                "levels",
                "required",
                "at least one escalation level is required",
            ));
        }
        for (idx, level) in self.levels.iter().enumerate() {
            validate_level(level, &format!("levels[{idx}]"), &mut issues);
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors::new(issues))
        }
    }

    /// True when `other` differs from `self` only in metadata fields.
    pub fn differs_only_in_metadata(&self, other: &RuleDraft) -> bool {
        self.rule_type == other.rule_type
            && self.condition == other.condition
            && self.severity == other.severity
            && self.priority == other.priority
            && self.time_to_escalate_secs == other.time_to_escalate_secs
            && self.levels == other.levels
            && self.templates == other.templates
    }
}

fn validate_level(level: &EscalationLevel, path: &str, issues: &mut Vec<FieldIssue>) {
    if let Some(delay) = level.delay_secs {
        check_delay(delay, &format!("{path}.delay_secs"), issues);
    }
    if level.recipients.is_empty() {
        issues.push(FieldIssue::new(
            &format!("{path}.recipients"),
            "required",
            "each level needs at least one recipient",
        ));
    }
    for (idx, recipient) in level.recipients.iter().enumerate() {
        let field = format!("{path}.recipients[{idx}].address");
        let address = recipient.address.trim();
        if address.is_empty() {
            issues.push(FieldIssue::new(&field, "required", "address is required"));
            continue;
        }
        match recipient.channel {
            ChannelKind::Email if !address.contains('@') => {
                issues.push(FieldIssue::new(&field, "invalid_email", "not an email address"));
            }
            ChannelKind::Webhook
                if !(address.starts_with("http://") || address.starts_with("https://")) =>
            {
                issues.push(FieldIssue::new(
                    &field,
                    "invalid_url",
                    "webhook address must be an http(s) URL",
                ));
            }
            _ => {}
        }
    }
    if let Some(subject) = &level.subject_template {
        check_template(subject, &format!("{path}.subject_template"), issues);
    }
    if let Some(message) = &level.message_template {
        check_template(message, &format!("{path}.message_template"), issues);
    }
}

fn check_delay(secs: u64, field: &str, issues: &mut Vec<FieldIssue>) {
    if secs == 0 || secs > MAX_DELAY_SECS {
        issues.push(FieldIssue::new(
            field,
            "out_of_range",
            format!("{field} must be between 1 and {MAX_DELAY_SECS} seconds"),
        ));
    }
}

fn check_template(source: &str, field: &str, issues: &mut Vec<FieldIssue>) {
    if let Err(err) = template::check(source) {
        issues.push(FieldIssue::new(field, "invalid_template", err));
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EscalationRule {
    pub id: String,
    #[serde(flatten)]
    pub definition: RuleDraft,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
    /// Bumped by the store on every write; incidents are only opened
    /// against the revision they were built from.
    #[serde(default)]
    pub revision: i64,
}

impl EscalationRule {
    pub fn new(id: String, definition: RuleDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            definition,
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
            trigger_count: 0,
            revision: 1,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_active(&self) -> bool {
        self.definition.is_active
    }

    pub fn max_level(&self) -> u32 {
        u32::try_from(self.definition.levels.len()).unwrap_or(u32::MAX)
    }

    /// Level by 1-based number.
    pub fn level(&self, number: u32) -> Option<&EscalationLevel> {
        let idx = usize::try_from(number.checked_sub(1)?).ok()?;
        self.definition.levels.get(idx)
    }

    /// Time an incident spends at `number` before it is escalated.
    pub fn delay_for_level(&self, number: u32) -> Duration {
        let secs = self
            .level(number)
            .and_then(|level| level.delay_secs)
            .unwrap_or(self.definition.time_to_escalate_secs)
            .min(MAX_DELAY_SECS);
        i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}
