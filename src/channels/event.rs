//! Inbound event envelopes and the posts they carry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Event type for a newly created post
pub const POSTED: &str = "posted";

/// One event from the platform's event stream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Event type, e.g. `posted`
    pub event: String,
    /// Event payload; shape depends on `event`
    #[serde(default)]
    pub data: Value,
    /// Who the event was broadcast to
    #[serde(default)]
    pub broadcast: Broadcast,
    /// Server sequence number
    #[serde(default)]
    pub seq: i64,
}

/// Broadcast scope of an event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Broadcast {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
}

/// A chat message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    /// Thread root; empty for top-level posts
    #[serde(default)]
    pub root_id: String,
    #[serde(default)]
    pub message: String,
}

impl Post {
    /// ID to thread a reply under: the thread root, or the post itself
    pub fn thread_root(&self) -> &str {
        if self.root_id.is_empty() {
            &self.id
        } else {
            &self.root_id
        }
    }
}

/// Failure to pull a post out of an event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("event carries no post payload")]
    MissingPost,

    #[error("invalid post payload: {0}")]
    InvalidPost(#[from] serde_json::Error),
}

impl ChannelEvent {
    /// Build a `posted` event the way the server encodes it: the post is a
    /// JSON string inside `data.post`.
    pub fn posted(post: &Post) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: POSTED.to_string(),
            data: serde_json::json!({ "post": serde_json::to_string(post)? }),
            broadcast: Broadcast {
                channel_id: post.channel_id.clone(),
                ..Default::default()
            },
            seq: 0,
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.broadcast.channel_id
    }

    pub fn is_posted(&self) -> bool {
        self.event == POSTED
    }

    /// Decode the post carried by a `posted` event
    pub fn decode_post(&self) -> Result<Post, DecodeError> {
        let raw = self
            .data
            .get("post")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingPost)?;
        Ok(serde_json::from_str(raw)?)
    }
}
