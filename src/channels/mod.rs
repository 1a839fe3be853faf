//! Messaging platform boundary.
//!
//! The bot core only sees the traits in [`traits`]; [`mattermost`] is the
//! production implementation.

pub mod event;
pub mod mattermost;
pub mod traits;

pub use event::{Broadcast, ChannelEvent, DecodeError, Post, POSTED};
pub use mattermost::{MattermostClient, MattermostConfig};
pub use traits::{
    ChannelError, ChannelResult, EventHandler, EventSource, EventStream, Responder,
};
