use crate::incident::{Incident, IncidentStatus};
use crate::rules::EscalationRule;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("rule {rule_id} already has an active incident")]
    ActiveIncidentExists { rule_id: String },

    #[error("incident {id} changed since version {expected}")]
    StaleVersion { id: String, expected: i64 },

    #[error("rule {rule_id} has active incident {incident_id}")]
    RuleInUse { rule_id: String, incident_id: String },

    #[error("rule {rule_id} changed since revision {expected}")]
    StaleRule { rule_id: String, expected: i64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Triggered,
    TriggerSuppressed,
    Escalated,
    Acknowledged,
    Reopened,
    Paused,
    Resumed,
    Resolved,
    NotificationSent,
    NotificationFailed,
}

/// One entry on an incident's timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<i64>,
    pub incident_id: String,
    pub event_type: EventType,
    pub description: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        incident_id: &str,
        event_type: EventType,
        description: impl Into<String>,
        details: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            incident_id: incident_id.to_string(),
            event_type,
            description: description.into(),
            details,
            timestamp,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub rule_id: Option<String>,
}

/// SQLite-backed rule, incident and timeline storage.
///
/// Every call opens its own connection, so a `Store` is cheap to clone and
/// safe to use from blocking worker threads.
#[derive(Clone, Debug)]
pub struct Store {
    db_path: Arc<PathBuf>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path: Arc::new(db_path),
        };
        let conn = store.connect()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                trigger_count INTEGER NOT NULL DEFAULT 0,
                last_triggered_at TEXT,
                revision INTEGER NOT NULL DEFAULT 1,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                status TEXT NOT NULL,
                next_escalation_at INTEGER,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_incidents_one_active
                ON incidents(rule_id) WHERE status != 'resolved';
            CREATE INDEX IF NOT EXISTS idx_incidents_due
                ON incidents(next_escalation_at) WHERE next_escalation_at IS NOT NULL;
            CREATE TABLE IF NOT EXISTS incident_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                description TEXT NOT NULL,
                details TEXT,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_incident ON incident_events(incident_id);
            ",
        )?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&*self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Run `f` inside a write transaction taken up front, so reads inside it
    /// see the state the writes commit against.
    fn write<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── rules ───────────────────────────────────────────────────────────────

    pub fn insert_rule(&self, rule: &EscalationRule) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO rules (id, name, is_active, trigger_count, last_triggered_at, body, created_at, updated_at, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                rule.id,
                rule.name(),
                rule.is_active(),
                i64::try_from(rule.trigger_count).unwrap_or(i64::MAX),
                rule.last_triggered_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(rule)?,
                rule.created_at.to_rfc3339(),
                rule.updated_at.to_rfc3339(),
                rule.revision,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the editable part of a rule loaded at `rule.revision` and
    /// bump the revision. Trigger bookkeeping columns are left alone.
    ///
    /// With `metadata_only == false` the write is refused with `RuleInUse`
    /// while the rule has an unresolved incident. A write racing another
    /// update fails with `StaleRule`. Returns `None` when the rule does not
    /// exist, otherwise the new revision.
    pub fn update_rule(
        &self,
        rule: &EscalationRule,
        metadata_only: bool,
    ) -> Result<Option<i64>, StoreError> {
        self.write(|tx| {
            let Some(revision) = rule_revision(tx, &rule.id)? else {
                return Ok(None);
            };
            if revision != rule.revision {
                return Err(StoreError::StaleRule {
                    rule_id: rule.id.clone(),
                    expected: rule.revision,
                });
            }
            if !metadata_only {
                ensure_no_active_incident(tx, &rule.id)?;
            }

            let next = revision + 1;
            let mut stored = rule.clone();
            stored.revision = next;
            tx.execute(
                "UPDATE rules SET name = ?2, is_active = ?3, body = ?4, updated_at = ?5, revision = ?6
                 WHERE id = ?1",
                params![
                    rule.id,
                    rule.name(),
                    rule.is_active(),
                    serde_json::to_string(&stored)?,
                    rule.updated_at.to_rfc3339(),
                    next,
                ],
            )?;
            Ok(Some(next))
        })
    }

    /// Delete a rule unless it has an unresolved incident (`RuleInUse`).
    /// Returns `false` when the rule does not exist.
    pub fn delete_rule(&self, id: &str) -> Result<bool, StoreError> {
        self.write(|tx| {
            if rule_revision(tx, id)?.is_none() {
                return Ok(false);
            }
            ensure_no_active_incident(tx, id)?;
            tx.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
            Ok(true)
        })
    }

    pub fn get_rule(&self, id: &str) -> Result<Option<EscalationRule>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT body, trigger_count, last_triggered_at, revision FROM rules WHERE id = ?1",
            params![id],
            map_rule,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_rules(&self) -> Result<Vec<EscalationRule>, StoreError> {
        self.query_rules("SELECT body, trigger_count, last_triggered_at, revision FROM rules ORDER BY created_at ASC")
    }

    pub fn active_rules(&self) -> Result<Vec<EscalationRule>, StoreError> {
        self.query_rules(
            "SELECT body, trigger_count, last_triggered_at, revision FROM rules WHERE is_active = 1 ORDER BY created_at ASC",
        )
    }

    fn query_rules(&self, sql: &str) -> Result<Vec<EscalationRule>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], map_rule)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count a matched trigger against the rule.
    pub fn mark_rule_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE rules SET trigger_count = trigger_count + 1, last_triggered_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ── incidents ───────────────────────────────────────────────────────────

    /// Insert a new incident built from revision `expected_revision` of its
    /// rule.
    ///
    /// Fails with `ActiveIncidentExists` when the rule already has an
    /// unresolved incident and with `StaleRule` when the rule was changed or
    /// deleted since it was loaded. Both checks commit with the insert.
    pub fn insert_incident(&self, incident: &Incident, expected_revision: i64) -> Result<(), StoreError> {
        self.write(|tx| {
            if rule_revision(tx, &incident.rule_id)? != Some(expected_revision) {
                return Err(StoreError::StaleRule {
                    rule_id: incident.rule_id.clone(),
                    expected: expected_revision,
                });
            }
            insert_incident_row(tx, incident)
        })
    }

    /// Persist `incident` only if the stored row is still at `expected_version`.
    pub fn compare_and_swap(
        &self,
        incident: &Incident,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE incidents
             SET status = ?3, next_escalation_at = ?4, version = ?5, body = ?6
             WHERE id = ?1 AND version = ?2",
            params![
                incident.id,
                expected_version,
                incident.status().as_str(),
                incident.next_escalation_at.map(|t| t.timestamp_millis()),
                incident.version,
                serde_json::to_string(incident)?,
            ],
        )?;

        if changed == 0 {
            return Err(StoreError::StaleVersion {
                id: incident.id.clone(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    pub fn get_incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT body FROM incidents WHERE id = ?1",
            params![id],
            map_incident,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn active_incident_for_rule(&self, rule_id: &str) -> Result<Option<Incident>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT body FROM incidents WHERE rule_id = ?1 AND status != 'resolved'",
            params![rule_id],
            map_incident,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM incidents
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR rule_id = ?2)
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(
            params![filter.status.map(|s| s.as_str()), filter.rule_id],
            map_incident,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Open, unpaused incidents whose persisted deadline has passed.
    pub fn due_incidents(&self, now: DateTime<Utc>) -> Result<Vec<Incident>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM incidents
             WHERE status = 'open' AND next_escalation_at IS NOT NULL AND next_escalation_at <= ?1
             ORDER BY next_escalation_at ASC",
        )?;
        let rows = stmt.query_map(params![now.timestamp_millis()], map_incident)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ── timeline ────────────────────────────────────────────────────────────

    pub fn append_event(&self, event: &Event) -> Result<i64, StoreError> {
        let conn = self.connect()?;
        let event_type = serde_json::to_string(&event.event_type)?;
        let details = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        conn.execute(
            "INSERT INTO incident_events (incident_id, event_type, description, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.incident_id,
                event_type,
                event.description,
                details,
                event.timestamp.to_rfc3339(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    pub fn events_for_incident(&self, incident_id: &str) -> Result<Vec<Event>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, event_type, description, details, timestamp
             FROM incident_events
             WHERE incident_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![incident_id], map_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn events_after(&self, after_id: i64) -> Result<Vec<Event>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, incident_id, event_type, description, details, timestamp
             FROM incident_events
             WHERE id > ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![after_id], map_event)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn rule_revision(conn: &Connection, rule_id: &str) -> Result<Option<i64>, StoreError> {
    conn.query_row(
        "SELECT revision FROM rules WHERE id = ?1",
        params![rule_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(StoreError::from)
}

fn ensure_no_active_incident(conn: &Connection, rule_id: &str) -> Result<(), StoreError> {
    let active: Option<String> = conn
        .query_row(
            "SELECT id FROM incidents WHERE rule_id = ?1 AND status != 'resolved'",
            params![rule_id],
            |row| row.get(0),
        )
        .optional()?;
    match active {
        Some(incident_id) => Err(StoreError::RuleInUse {
            rule_id: rule_id.to_string(),
            incident_id,
        }),
        None => Ok(()),
    }
}

fn insert_incident_row(conn: &Connection, incident: &Incident) -> Result<(), StoreError> {
    let result = conn.execute(
        "INSERT INTO incidents (id, rule_id, status, next_escalation_at, version, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            incident.id,
            incident.rule_id,
            incident.status().as_str(),
            incident.next_escalation_at.map(|t| t.timestamp_millis()),
            incident.version,
            serde_json::to_string(incident)?,
            incident.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::ActiveIncidentExists {
                rule_id: incident.rule_id.clone(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn time_column(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn map_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<EscalationRule> {
    let body: String = row.get(0)?;
    let trigger_count: i64 = row.get(1)?;
    let last_triggered_at: Option<String> = row.get(2)?;

    let mut rule: EscalationRule = json_column(0, &body)?;
    rule.revision = row.get(3)?;
    rule.trigger_count = u64::try_from(trigger_count).unwrap_or_default();
    rule.last_triggered_at = last_triggered_at
        .map(|raw| time_column(2, &raw))
        .transpose()?;
    Ok(rule)
}

fn map_incident(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    let body: String = row.get(0)?;
    json_column(0, &body)
}

fn map_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let event_type_str: String = row.get(2)?;
    let details_str: Option<String> = row.get(4)?;
    let timestamp_str: String = row.get(5)?;

    Ok(Event {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        event_type: json_column(2, &event_type_str)?,
        description: row.get(3)?,
        details: details_str.map(|s| json_column(4, &s)).transpose()?,
        timestamp: time_column(5, &timestamp_str)?,
    })
}
