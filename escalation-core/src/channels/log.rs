//! Channel that only writes a structured log record. Useful for local runs
//! where no gateway is available.

use async_trait::async_trait;
use tracing::info;

use super::{ChannelError, NotifyChannel};
use crate::notifier::Notification;
use crate::rules::{ChannelKind, Recipient};

pub struct LogChannel {
    kind: ChannelKind,
}

impl LogChannel {
    /// Stand in for deliveries of `kind`.
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> Result<(), ChannelError> {
        info!(
            channel = %self.kind,
            to = %recipient.address,
            incident_id = %notification.incident_id,
            level = notification.level,
            subject = %notification.subject,
            "notification"
        );
        Ok(())
    }
}
