//! Periodic sweep that escalates overdue incidents.
//!
//! Deadlines live in the incidents table, not in in-memory timers, so a
//! restarted process picks up whatever became due while it was down on its
//! first sweep.

use crate::engine::EscalationEngine;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub escalated: Vec<String>,
    /// Due when listed, but acknowledged, paused or resolved before the
    /// escalation could commit.
    pub skipped: Vec<String>,
    pub errors: Vec<SweepError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SweepError {
    pub incident_id: String,
    pub error: String,
}

pub struct EscalationScheduler {
    engine: EscalationEngine,
    interval: Duration,
}

impl EscalationScheduler {
    pub fn new(engine: EscalationEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    /// Escalate every incident due at `now`. Incidents are handled
    /// concurrently; one failure does not stop the rest.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let due = match self.engine.due_incidents(now).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to load due incidents");
                report.errors.push(SweepError {
                    incident_id: String::new(),
                    error: err.to_string(),
                });
                return report;
            }
        };
        if due.is_empty() {
            return report;
        }

        let results = join_all(
            due.iter()
                .map(|id| self.engine.escalate_if_due(id, now)),
        )
        .await;

        for (id, result) in due.into_iter().zip(results) {
            match result {
                Ok(Some(_)) => report.escalated.push(id),
                Ok(None) => report.skipped.push(id),
                Err(err) => {
                    warn!(incident_id = %id, error = %err, "escalation failed during sweep");
                    report.errors.push(SweepError {
                        incident_id: id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            escalated = report.escalated.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "sweep finished"
        );
        report
    }

    /// Sweep on every tick until `shutdown` flips to `true` or its sender
    /// is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "escalation scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(self.engine.now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("escalation scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::engine::TriggerOutcome;
    use crate::notifier::{Notifier, RetryPolicy};
    use crate::rules::ChannelKind;
    use crate::store::Store;
    use crate::test_support::{db_path, rule_draft, RecordingChannel};
    use std::sync::Arc;

    struct Fixture {
        engine: EscalationEngine,
        clock: ManualClock,
        incident_id: String,
    }

    async fn fixture(name: &str) -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let notifier = Notifier::new(RetryPolicy::default())
            .with_channel(RecordingChannel::new(ChannelKind::Email))
            .with_channel(RecordingChannel::new(ChannelKind::Webhook));
        let store = Store::open(db_path(name)).expect("open store");
        let engine = EscalationEngine::new(store, notifier, Arc::new(clock.clone()));

        let rule = engine.create_rule(rule_draft()).await.expect("rule");
        let outcome = engine
            .trigger(&rule.id, serde_json::json!({ "days_overdue": 2 }))
            .await
            .expect("trigger");
        let TriggerOutcome::Created { incident } = outcome else {
            panic!("expected a new incident, got {outcome:?}");
        };
        Fixture {
            engine,
            clock,
            incident_id: incident.id,
        }
    }

    async fn level_of(engine: &EscalationEngine, id: &str) -> u32 {
        engine.get_incident(id).await.expect("incident").current_level
    }

    #[tokio::test(start_paused = true)]
    async fn run_escalates_on_tick_and_stops_on_shutdown() {
        let f = fixture("scheduler-run").await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(
            EscalationScheduler::new(f.engine.clone(), Duration::from_secs(5)).run(rx),
        );

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(level_of(&f.engine, &f.incident_id).await, 1);

        f.clock.advance(chrono::Duration::seconds(60));
        let mut level = 1;
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(5)).await;
            level = level_of(&f.engine, &f.incident_id).await;
            if level == 2 {
                break;
            }
        }
        assert_eq!(level, 2);

        tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler stops")
            .expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_shutdown_sender_is_dropped() {
        let f = fixture("scheduler-drop").await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(
            EscalationScheduler::new(f.engine.clone(), Duration::from_secs(5)).run(rx),
        );
        tokio::time::sleep(Duration::from_secs(6)).await;

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("scheduler stops")
            .expect("join");
    }

    #[tokio::test]
    async fn sweep_reports_escalated_incidents() {
        let f = fixture("scheduler-sweep").await;
        assert_eq!(
            EscalationScheduler::new(f.engine.clone(), Duration::from_secs(1))
                .sweep_once(f.clock.now())
                .await,
            SweepReport::default()
        );

        f.clock.advance(chrono::Duration::seconds(60));
        let report = EscalationScheduler::new(f.engine.clone(), Duration::from_secs(1))
            .sweep_once(f.clock.now())
            .await;
        assert_eq!(report.escalated, vec![f.incident_id.clone()]);
        assert_eq!(level_of(&f.engine, &f.incident_id).await, 2);
    }
}
