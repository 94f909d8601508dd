//! Notification channel implementations.

pub mod gateway;
pub mod log;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;

use crate::notifier::Notification;
use crate::rules::{ChannelKind, Recipient};

pub use gateway::GatewayChannel;
pub use log::LogChannel;
pub use webhook::WebhookChannel;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("channel not configured: {0}")]
    NotConfigured(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("{0}")]
    Other(String),
}

impl ChannelError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Http(_) | ChannelError::Other(_) => true,
            ChannelError::Status { status, .. } => *status == 429 || *status >= 500,
            ChannelError::NotConfigured(_) | ChannelError::InvalidRecipient(_) => false,
        }
    }
}

/// A delivery mechanism for one `ChannelKind`.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ChannelKind;

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> Result<(), ChannelError>;
}
