//! Generic JSON webhook channel. The recipient address is the target URL.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{ChannelError, NotifyChannel};
use crate::notifier::Notification;
use crate::rules::{ChannelKind, Recipient, Severity};

pub struct WebhookChannel {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    incident_id: &'a str,
    rule_id: &'a str,
    rule_name: &'a str,
    level: u32,
    max_level: u32,
    severity: Severity,
    subject: &'a str,
    body: &'a str,
    sent_at: String,
}

impl WebhookChannel {
    pub fn new(timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn payload(notification: &Notification) -> WebhookPayload<'_> {
        WebhookPayload {
            incident_id: &notification.incident_id,
            rule_id: &notification.rule_id,
            rule_name: &notification.rule_name,
            level: notification.level,
            max_level: notification.max_level,
            severity: notification.severity,
            subject: &notification.subject,
            body: &notification.body,
            sent_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> Result<(), ChannelError> {
        let url = recipient.address.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ChannelError::InvalidRecipient(url.to_string()));
        }

        let response = self
            .client
            .post(url)
            .json(&Self::payload(notification))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(url, incident_id = %notification.incident_id, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{Notifier, RetryPolicy};
    use crate::test_support::notification;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hook(server: &MockServer) -> Recipient {
        Recipient {
            channel: ChannelKind::Webhook,
            address: format!("{}/hooks/dean", server.uri()),
        }
    }

    fn channel() -> WebhookChannel {
        WebhookChannel::new(Duration::from_secs(5)).expect("client")
    }

    fn notifier(max_attempts: u32) -> Notifier {
        Notifier::new(RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        })
        .with_channel(Arc::new(channel()))
    }

    #[tokio::test]
    async fn posts_incident_json_to_recipient_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/dean"))
            .and(body_partial_json(json!({
                "incident_id": "inc-1",
                "rule_id": "r1",
                "level": 1,
                "max_level": 2,
                "severity": "high",
                "subject": "subject",
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        channel()
            .send(&hook(&server), &notification())
            .await
            .expect("delivered");
    }

    #[tokio::test]
    async fn non_url_address_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let recipient = Recipient {
            channel: ChannelKind::Webhook,
            address: "hooks.example.edu/dean".into(),
        };
        let err = channel()
            .send(&recipient, &notification())
            .await
            .expect_err("invalid address");
        assert!(matches!(err, ChannelError::InvalidRecipient(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/dean"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(3)
            .mount(&server)
            .await;

        let mut n = notification();
        n.recipients = vec![hook(&server)];
        let report = notifier(3).deliver(&n, Utc::now()).await;

        assert!(report.delivered.is_empty());
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].attempts, 3);
        assert!(report.faults[0].error.contains("503"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/dean"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .expect(2)
            .mount(&server)
            .await;

        let err = channel()
            .send(&hook(&server), &notification())
            .await
            .expect_err("rejected");
        assert!(matches!(err, ChannelError::Status { status: 400, ref body } if body == "bad payload"));

        let mut n = notification();
        n.recipients = vec![hook(&server)];
        let report = notifier(3).deliver(&n, Utc::now()).await;
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].attempts, 1);
    }
}
