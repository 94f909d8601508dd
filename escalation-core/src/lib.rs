pub mod channels;
pub mod clock;
pub mod conditions;
pub mod config;
pub mod engine;
pub mod error;
pub mod incident;
pub mod notifier;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod template;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, NotifierConfig};
pub use engine::{EscalateOutcome, EscalationEngine, RuleTrigger, Statistics, TriggerOutcome};
pub use error::{EscalationError, ValidationErrors};
pub use incident::{Incident, IncidentStatus, TransitionError};
pub use notifier::{Notifier, RetryPolicy};
pub use rules::{EscalationRule, RuleDraft};
pub use scheduler::{EscalationScheduler, SweepReport};
pub use store::{IncidentFilter, Store};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::channels::{ChannelError, NotifyChannel};
    use crate::conditions::{Operator, TriggerCondition};
    use crate::notifier::Notification;
    use crate::rules::{
        ChannelKind, EscalationLevel, EscalationRule, MessageTemplates, Priority, Recipient,
        RuleDraft, RuleType, Severity,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    pub fn db_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir()
            .join("escalation-tests")
            .join(format!("{name}-{nanos}.db"))
    }

    pub fn rule_draft() -> RuleDraft {
        RuleDraft {
            name: "Overdue accreditation report".into(),
            description: Some("Report not filed by its deadline".into()),
            rule_type: RuleType::DeadlineMissed,
            condition: TriggerCondition::compare(
                "days_overdue",
                Operator::GreaterThan,
                serde_json::json!(0),
            ),
            severity: Severity::High,
            priority: Priority::High,
            time_to_escalate_secs: 60,
            levels: vec![
                EscalationLevel {
                    name: Some("Compliance officer".into()),
                    delay_secs: None,
                    recipients: vec![Recipient {
                        channel: ChannelKind::Email,
                        address: "officer@example.edu".into(),
                    }],
                    subject_template: None,
                    message_template: None,
                },
                EscalationLevel {
                    name: Some("Dean".into()),
                    delay_secs: Some(600),
                    recipients: vec![Recipient {
                        channel: ChannelKind::Webhook,
                        address: "https://hooks.example.edu/dean".into(),
                    }],
                    subject_template: Some("URGENT {{ruleName}}".into()),
                    message_template: None,
                },
            ],
            templates: MessageTemplates::default(),
            is_active: true,
            tags: vec!["accreditation".into()],
        }
    }

    pub fn rule(id: &str) -> EscalationRule {
        EscalationRule::new(id.to_string(), rule_draft(), Utc::now())
    }

    pub fn single_level_rule(id: &str) -> EscalationRule {
        let mut draft = rule_draft();
        draft.levels.truncate(1);
        EscalationRule::new(id.to_string(), draft, Utc::now())
    }

    pub fn notification() -> Notification {
        Notification {
            incident_id: "inc-1".into(),
            rule_id: "r1".into(),
            rule_name: "Overdue accreditation report".into(),
            level: 1,
            max_level: 2,
            severity: Severity::High,
            subject: "subject".into(),
            body: "body".into(),
            recipients: vec![
                Recipient {
                    channel: ChannelKind::Email,
                    address: "officer@example.edu".into(),
                },
                Recipient {
                    channel: ChannelKind::Webhook,
                    address: "https://hooks.example.edu/dean".into(),
                },
            ],
        }
    }

    /// Channel that keeps everything it is asked to send.
    pub struct RecordingChannel {
        kind: ChannelKind,
        sent: Mutex<Vec<(Recipient, Notification)>>,
    }

    impl RecordingChannel {
        pub fn new(kind: ChannelKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                sent: Mutex::new(Vec::new()),
            })
        }

        pub fn sent(&self) -> Vec<(Recipient, Notification)> {
            self.sent.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl NotifyChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(
            &self,
            recipient: &Recipient,
            notification: &Notification,
        ) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .expect("lock")
                .push((recipient.clone(), notification.clone()));
            Ok(())
        }
    }

    /// Channel that fails its first `failures` sends with a retryable error.
    pub struct FlakyChannel {
        kind: ChannelKind,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyChannel {
        pub fn new(kind: ChannelKind, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                kind,
                failures,
                calls: AtomicU32::new(0),
            })
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotifyChannel for FlakyChannel {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _: &Recipient, _: &Notification) -> Result<(), ChannelError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(ChannelError::Other(format!("simulated outage on call {call}")))
            } else {
                Ok(())
            }
        }
    }
}
