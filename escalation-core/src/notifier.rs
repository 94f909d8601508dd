//! Delivery of escalation notifications with bounded retries.
//!
//! The [`Notifier`] maps each [`ChannelKind`] to one [`NotifyChannel`] and
//! fans a [`Notification`] out to every recipient of the level. Failed
//! attempts are retried with exponential backoff; when the attempts run
//! out the failure is returned as a [`DeliveryFault`] so the engine can
//! record it on the incident. Nothing is dropped silently.

use crate::channels::{ChannelError, GatewayChannel, LogChannel, NotifyChannel, WebhookChannel};
use crate::config::NotifierConfig;
use crate::incident::DeliveryFault;
use crate::rules::{ChannelKind, Recipient, Severity};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// A rendered message for one level of one incident.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    pub incident_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub level: u32,
    pub max_level: u32,
    pub severity: Severity,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<Recipient>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub channel: ChannelKind,
    pub recipient: String,
    pub attempts: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<Delivery>,
    pub faults: Vec<DeliveryFault>,
}

pub struct Notifier {
    channels: HashMap<ChannelKind, Arc<dyn NotifyChannel>>,
    retry: RetryPolicy,
}

impl Notifier {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            channels: HashMap::new(),
            retry,
        }
    }

    /// Register `channel` for its kind, replacing any earlier one.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn NotifyChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    /// Build the channel set described by `config`.
    ///
    /// Webhooks are always available. Email and SMS go through their
    /// gateways when configured; otherwise, with `log_fallback` on, they are
    /// written to the log instead.
    pub fn from_config(config: &NotifierConfig) -> Result<Self, ChannelError> {
        let mut notifier = Self::new(config.retry.clone())
            .with_channel(Arc::new(WebhookChannel::new(config.http_timeout)?))
            .with_channel(Arc::new(LogChannel::new(ChannelKind::Log)));

        for (kind, url) in [
            (ChannelKind::Email, config.email_gateway_url.as_ref()),
            (ChannelKind::Sms, config.sms_gateway_url.as_ref()),
        ] {
            match url {
                Some(url) => {
                    info!(channel = %kind, url = %url, "gateway channel enabled");
                    notifier = notifier.with_channel(Arc::new(GatewayChannel::new(
                        kind,
                        url.clone(),
                        config.http_timeout,
                    )?));
                }
                None if config.log_fallback => {
                    info!(channel = %kind, "no gateway configured, logging deliveries");
                    notifier = notifier.with_channel(Arc::new(LogChannel::new(kind)));
                }
                None => warn!(channel = %kind, "no gateway configured, deliveries will fault"),
            }
        }

        Ok(notifier)
    }

    pub fn has_channel(&self, kind: ChannelKind) -> bool {
        self.channels.contains_key(&kind)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Deliver to every recipient concurrently and report the outcome per
    /// recipient. `now` stamps any resulting faults.
    pub async fn deliver(&self, notification: &Notification, now: DateTime<Utc>) -> DeliveryReport {
        let attempts = notification
            .recipients
            .iter()
            .map(|recipient| self.deliver_one(recipient, notification));
        let outcomes = join_all(attempts).await;

        let mut report = DeliveryReport::default();
        for (recipient, outcome) in notification.recipients.iter().zip(outcomes) {
            match outcome {
                Ok(attempts) => report.delivered.push(Delivery {
                    channel: recipient.channel,
                    recipient: recipient.address.clone(),
                    attempts,
                }),
                Err((err, attempts)) => report.faults.push(DeliveryFault {
                    level: notification.level,
                    channel: recipient.channel,
                    recipient: recipient.address.clone(),
                    error: err.to_string(),
                    attempts,
                    at: now,
                }),
            }
        }
        report
    }

    async fn deliver_one(
        &self,
        recipient: &Recipient,
        notification: &Notification,
    ) -> Result<u32, (ChannelError, u32)> {
        let Some(channel) = self.channels.get(&recipient.channel) else {
            error!(
                channel = %recipient.channel,
                incident_id = %notification.incident_id,
                "no channel registered for recipient"
            );
            return Err((ChannelError::NotConfigured(recipient.channel.to_string()), 0));
        };

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match channel.send(recipient, notification).await {
                Ok(()) => {
                    debug!(
                        channel = channel.name(),
                        to = %recipient.address,
                        incident_id = %notification.incident_id,
                        level = notification.level,
                        attempt,
                        "notification delivered"
                    );
                    return Ok(attempt);
                }
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        channel = channel.name(),
                        to = %recipient.address,
                        incident_id = %notification.incident_id,
                        attempt,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "notification attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        channel = channel.name(),
                        to = %recipient.address,
                        incident_id = %notification.incident_id,
                        attempts = attempt,
                        error = %err,
                        "notification delivery failed"
                    );
                    return Err((err, attempt));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{notification, FlakyChannel, RecordingChannel};

    fn instant_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn delivers_to_every_recipient() {
        let email = RecordingChannel::new(ChannelKind::Email);
        let webhook = RecordingChannel::new(ChannelKind::Webhook);
        let notifier = Notifier::new(instant_retry(3))
            .with_channel(email.clone())
            .with_channel(webhook.clone());

        let report = notifier.deliver(&notification(), Utc::now()).await;
        assert_eq!(report.delivered.len(), 2);
        assert!(report.faults.is_empty());
        assert_eq!(email.sent().len(), 1);
        assert_eq!(webhook.sent().len(), 1);
        assert_eq!(email.sent()[0].1.subject, "subject");
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let flaky = FlakyChannel::new(ChannelKind::Email, 2);
        let webhook = RecordingChannel::new(ChannelKind::Webhook);
        let notifier = Notifier::new(instant_retry(3))
            .with_channel(flaky.clone())
            .with_channel(webhook);

        let report = notifier.deliver(&notification(), Utc::now()).await;
        assert!(report.faults.is_empty());
        let email = report
            .delivered
            .iter()
            .find(|d| d.channel == ChannelKind::Email)
            .expect("email delivery");
        assert_eq!(email.attempts, 3);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_become_faults() {
        let flaky = FlakyChannel::new(ChannelKind::Email, u32::MAX);
        let webhook = RecordingChannel::new(ChannelKind::Webhook);
        let notifier = Notifier::new(instant_retry(2))
            .with_channel(flaky.clone())
            .with_channel(webhook);

        let now = Utc::now();
        let report = notifier.deliver(&notification(), now).await;
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.faults.len(), 1);
        let fault = &report.faults[0];
        assert_eq!(fault.channel, ChannelKind::Email);
        assert_eq!(fault.attempts, 2);
        assert_eq!(fault.level, 1);
        assert_eq!(fault.at, now);
        assert_eq!(flaky.calls(), 2);
    }

    #[tokio::test]
    async fn unregistered_channel_faults_without_attempts() {
        let notifier = Notifier::new(instant_retry(3))
            .with_channel(RecordingChannel::new(ChannelKind::Webhook));

        let report = notifier.deliver(&notification(), Utc::now()).await;
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].attempts, 0);
        assert!(report.faults[0].error.contains("not configured"));
    }

    #[test]
    fn from_config_falls_back_to_log_channels() {
        let config = NotifierConfig {
            log_fallback: true,
            ..NotifierConfig::default()
        };
        let notifier = Notifier::from_config(&config).expect("notifier");
        assert!(notifier.has_channel(ChannelKind::Webhook));
        assert!(notifier.has_channel(ChannelKind::Email));
        assert!(notifier.has_channel(ChannelKind::Sms));

        let strict = Notifier::from_config(&NotifierConfig {
            log_fallback: false,
            ..NotifierConfig::default()
        })
        .expect("notifier");
        assert!(!strict.has_channel(ChannelKind::Email));
    }
}
