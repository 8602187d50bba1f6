//! Notification delivery: dispatcher, durable-queue worker, escalation
//! scheduler, and pluggable SMS/email provider channels.
//!
//! Channels do exactly one provider call per [`NotificationChannel::send`];
//! retry policy (backoff, throttle requeue, abandonment) lives entirely in
//! the [`worker::DeliveryWorker`].

pub mod backoff;
pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod escalation;
pub mod plugin;
pub mod worker;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use coldtrace_common::types::Channel;
use error::SendError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Rendered message carried on a notification job (`payload` column).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub subject: String,
    pub body: String,
}

/// What the provider returned for a successful send.
#[derive(Debug, Clone, Default)]
pub struct ProviderReceipt {
    /// Provider-assigned message ID, kept in the delivery log.
    pub message_id: Option<String>,
}

/// One delivery provider. Implementations make a single attempt and
/// classify failures; they never retry internally.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Returns the channel type name (e.g., `"sms"`, `"email"`).
    fn channel_name(&self) -> &str;

    /// Delivers one message to one recipient.
    async fn send(&self, recipient: &str, payload: &MessagePayload)
        -> Result<ProviderReceipt, SendError>;
}

/// Configured channel instances keyed by channel type, shared with the
/// delivery workers.
pub type ChannelMap = HashMap<Channel, Arc<dyn NotificationChannel>>;
