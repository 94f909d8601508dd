//! Email and SMS delivery through an HTTP gateway.
//!
//! The gateway receives `{channel, to, subject, body}` and owns the actual
//! SMTP or carrier integration.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use super::{ChannelError, NotifyChannel};
use crate::notifier::Notification;
use crate::rules::{ChannelKind, Recipient};

pub struct GatewayChannel {
    kind: ChannelKind,
    url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GatewayMessage<'a> {
    channel: ChannelKind,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    incident_id: &'a str,
}

impl GatewayChannel {
    pub fn new(kind: ChannelKind, url: String, timeout: Duration) -> Result<Self, ChannelError> {
        if url.trim().is_empty() {
            return Err(ChannelError::NotConfigured(format!("{kind} gateway url")));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { kind, url, client })
    }
}

#[async_trait]
impl NotifyChannel for GatewayChannel {
    fn name(&self) -> &'static str {
        match self.kind {
            ChannelKind::Email => "email-gateway",
            ChannelKind::Sms => "sms-gateway",
            _ => "gateway",
        }
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> Result<(), ChannelError> {
        let to = recipient.address.trim();
        if to.is_empty() {
            return Err(ChannelError::InvalidRecipient("empty address".into()));
        }

        let message = GatewayMessage {
            channel: self.kind,
            to,
            subject: &notification.subject,
            body: &notification.body,
            incident_id: &notification.incident_id,
        };
        let response = self.client.post(&self.url).json(&message).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(channel = self.name(), to, "gateway accepted message");
        Ok(())
    }
}
