//! Incident lifecycle.
//!
//! An incident is one firing of a rule. It moves `open -> acknowledged ->
//! resolved`, and while open it climbs escalation levels. Every transition
//! is a pure function from the current value to a new value with a bumped
//! `version`; persistence applies them with compare-and-swap on that
//! version, which is what serialises concurrent acknowledgments and timer
//! expiries.

use crate::rules::{ChannelKind, EscalationRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "open" => Some(IncidentStatus::Open),
            "acknowledged" => Some(IncidentStatus::Acknowledged),
            "resolved" => Some(IncidentStatus::Resolved),
            _ => None,
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IncidentState {
    Open {
        #[serde(default)]
        paused_at: Option<DateTime<Utc>>,
    },
    Acknowledged {
        at: DateTime<Utc>,
        by: String,
    },
    Resolved(Resolution),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub actor: String,
    #[serde(default)]
    pub note: Option<String>,
    pub resolved_at: DateTime<Utc>,
    pub time_to_resolve_secs: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub level: u32,
    pub at: DateTime<Utc>,
}

/// A notification that could not be delivered after all retries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryFault {
    pub level: u32,
    pub channel: ChannelKind,
    pub recipient: String,
    pub error: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("incident {id} is {actual}; this action requires {expected}")]
    InvalidState {
        id: String,
        actual: IncidentStatus,
        expected: &'static str,
    },

    #[error("incident {id} is paused")]
    Paused { id: String },

    #[error("incident {id} is not paused")]
    NotPaused { id: String },

    #[error("incident {id} is already at its maximum level {max_level}")]
    AtMaxLevel { id: String, max_level: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub rule_id: String,
    pub current_level: u32,
    pub max_level: u32,
    #[serde(flatten)]
    pub state: IncidentState,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub level_history: Vec<LevelChange>,
    #[serde(default)]
    pub acknowledgments: Vec<Acknowledgment>,
    #[serde(default)]
    pub next_escalation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub suppressed_triggers: u32,
    #[serde(default)]
    pub faults: Vec<DeliveryFault>,
    pub version: i64,
}

impl Incident {
    /// A fresh incident at level 1 for `rule`.
    pub fn open(
        id: String,
        rule: &EscalationRule,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let max_level = rule.max_level().max(1);
        Self {
            id,
            rule_id: rule.id.clone(),
            current_level: 1,
            max_level,
            state: IncidentState::Open { paused_at: None },
            payload,
            created_at: now,
            level_history: vec![LevelChange { level: 1, at: now }],
            acknowledgments: Vec::new(),
            next_escalation_at: deadline_after(rule, 1, max_level, now),
            suppressed_triggers: 0,
            faults: Vec::new(),
            version: 1,
        }
    }

    pub fn status(&self) -> IncidentStatus {
        match self.state {
            IncidentState::Open { .. } => IncidentStatus::Open,
            IncidentState::Acknowledged { .. } => IncidentStatus::Acknowledged,
            IncidentState::Resolved(_) => IncidentStatus::Resolved,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() != IncidentStatus::Resolved
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, IncidentState::Open { paused_at: Some(_) })
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match &self.state {
            IncidentState::Resolved(resolution) => Some(resolution),
            _ => None,
        }
    }

    /// Seconds from creation to the first acknowledgment.
    pub fn time_to_acknowledge_secs(&self) -> Option<i64> {
        self.acknowledgments
            .first()
            .map(|ack| (ack.at - self.created_at).num_seconds().max(0))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, IncidentState::Open { paused_at: None })
            && self.next_escalation_at.is_some_and(|due| due <= now)
    }

    pub fn escalate(
        &self,
        rule: &EscalationRule,
        now: DateTime<Utc>,
    ) -> Result<Incident, TransitionError> {
        match self.state {
            IncidentState::Open { paused_at: None } => {}
            IncidentState::Open { paused_at: Some(_) } => {
                return Err(TransitionError::Paused {
                    id: self.id.clone(),
                })
            }
            _ => return Err(self.invalid_state("open")),
        }
        if self.current_level >= self.max_level {
            return Err(TransitionError::AtMaxLevel {
                id: self.id.clone(),
                max_level: self.max_level,
            });
        }

        let level = self.current_level + 1;
        let mut next = self.bumped();
        next.current_level = level;
        next.level_history.push(LevelChange { level, at: now });
        next.next_escalation_at = deadline_after(rule, level, self.max_level, now);
        Ok(next)
    }

    pub fn acknowledge(
        &self,
        actor: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Incident, TransitionError> {
        if !matches!(self.state, IncidentState::Open { .. }) {
            return Err(self.invalid_state("open"));
        }

        let mut next = self.bumped();
        next.state = IncidentState::Acknowledged {
            at: now,
            by: actor.to_string(),
        };
        next.acknowledgments.push(Acknowledgment {
            actor: actor.to_string(),
            note,
            at: now,
        });
        next.next_escalation_at = None;
        Ok(next)
    }

    /// Hand an acknowledged incident back to the escalation ladder.
    pub fn reopen(
        &self,
        rule: &EscalationRule,
        now: DateTime<Utc>,
    ) -> Result<Incident, TransitionError> {
        if !matches!(self.state, IncidentState::Acknowledged { .. }) {
            return Err(self.invalid_state("acknowledged"));
        }

        let mut next = self.bumped();
        next.state = IncidentState::Open { paused_at: None };
        next.next_escalation_at = deadline_after(rule, self.current_level, self.max_level, now);
        Ok(next)
    }

    pub fn pause(&self, now: DateTime<Utc>) -> Result<Incident, TransitionError> {
        match self.state {
            IncidentState::Open { paused_at: None } => {
                let mut next = self.bumped();
                next.state = IncidentState::Open {
                    paused_at: Some(now),
                };
                next.next_escalation_at = None;
                Ok(next)
            }
            IncidentState::Open { paused_at: Some(_) } => Err(TransitionError::Paused {
                id: self.id.clone(),
            }),
            _ => Err(self.invalid_state("open")),
        }
    }

    /// Resuming re-arms the full delay of the current level.
    pub fn resume(
        &self,
        rule: &EscalationRule,
        now: DateTime<Utc>,
    ) -> Result<Incident, TransitionError> {
        match self.state {
            IncidentState::Open { paused_at: Some(_) } => {
                let mut next = self.bumped();
                next.state = IncidentState::Open { paused_at: None };
                next.next_escalation_at =
                    deadline_after(rule, self.current_level, self.max_level, now);
                Ok(next)
            }
            IncidentState::Open { paused_at: None } => Err(TransitionError::NotPaused {
                id: self.id.clone(),
            }),
            _ => Err(self.invalid_state("open")),
        }
    }

    pub fn resolve(
        &self,
        actor: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Incident, TransitionError> {
        if matches!(self.state, IncidentState::Resolved(_)) {
            return Err(self.invalid_state("open or acknowledged"));
        }

        let mut next = self.bumped();
        next.state = IncidentState::Resolved(Resolution {
            actor: actor.to_string(),
            note,
            resolved_at: now,
            time_to_resolve_secs: (now - self.created_at).num_seconds().max(0),
        });
        next.next_escalation_at = None;
        Ok(next)
    }

    pub fn record_suppressed_trigger(&self) -> Incident {
        let mut next = self.bumped();
        next.suppressed_triggers += 1;
        next
    }

    pub fn record_fault(&self, fault: DeliveryFault) -> Incident {
        let mut next = self.bumped();
        next.faults.push(fault);
        next
    }

    fn bumped(&self) -> Incident {
        let mut next = self.clone();
        next.version += 1;
        next
    }

    fn invalid_state(&self, expected: &'static str) -> TransitionError {
        TransitionError::InvalidState {
            id: self.id.clone(),
            actual: self.status(),
            expected,
        }
    }
}

/// When an incident sitting at `level` becomes due; `None` on the last level.
fn deadline_after(
    rule: &EscalationRule,
    level: u32,
    max_level: u32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    (level < max_level).then(|| {
        now.checked_add_signed(rule.delay_for_level(level))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}
