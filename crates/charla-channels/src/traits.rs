use async_trait::async_trait;
use charla_common::Result;
use serde::{Deserialize, Serialize};

/// Lifecycle and send capability of a messaging channel. The core assumes
/// nothing about the channel's internal session or auth mechanics.
#[async_trait]
pub trait Channel: Send {
    /// Unique identifier for this channel type.
    fn channel_type(&self) -> &str;

    /// Human-readable display name.
    fn display_name(&self) -> &str;

    /// Start the channel, connecting to the external service.
    async fn connect(&mut self) -> Result<()>;

    /// Gracefully disconnect from the external service.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send a text message to a channel-specific destination.
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Current connection status.
    fn status(&self) -> ChannelStatus;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl ChannelStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ChannelStatus::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ChannelStatus::Connecting)
    }
}
