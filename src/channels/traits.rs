//! Channel Traits
//!
//! Defines the seams between the bot core and the messaging platform.

use super::event::ChannelEvent;
use async_trait::async_trait;

/// Result type for channel operations
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors that can occur in channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel error: {0}")]
    Other(String),
}

/// An open, long-lived event stream
#[async_trait]
pub trait EventStream: Send {
    /// Wait for the next event.
    ///
    /// `None` means the stream closed cleanly; `Some(Err(_))` means it failed.
    /// Either way the caller must reconnect.
    async fn next_event(&mut self) -> Option<ChannelResult<ChannelEvent>>;

    /// Close the underlying connection
    async fn close(&mut self);
}

/// Something that can open event streams
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> ChannelResult<Box<dyn EventStream>>;
}

/// Posts text back to a channel
#[async_trait]
pub trait Responder: Send + Sync {
    /// Post `message` to `channel_id`, threaded under `root_id` when given.
    /// Returns the new post's ID.
    async fn post_reply(
        &self,
        channel_id: &str,
        message: &str,
        root_id: Option<&str>,
    ) -> ChannelResult<String>;
}

/// Handler for events pulled off a stream
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: ChannelEvent);
}
