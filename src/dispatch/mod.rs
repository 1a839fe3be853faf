//! Dispatcher
//!
//! Turns one inbound event into at most one reply. Events are filtered in
//! order, each failure a silent drop:
//!
//! 1. not from the configured channel
//! 2. not a `posted` event
//! 3. post payload fails to decode (logged)
//! 4. authored by the bot itself
//!
//! Surviving posts are parsed and executed against the [`PollStore`]. User
//! mistakes become reply text here and never travel further.

pub mod replies;

use crate::channels::{ChannelEvent, EventHandler, Post, Responder};
use crate::commands::{Command, CommandParser};
use crate::polls::PollStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Who may delete a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Anyone in the channel
    #[default]
    Anyone,
    /// Only the poll's creator, like close
    CreatorOnly,
}

/// Routes chat posts to poll operations
pub struct Dispatcher {
    store: Arc<PollStore>,
    responder: Arc<dyn Responder>,
    parser: CommandParser,
    channel_id: String,
    bot_user_id: String,
    delete_policy: DeletePolicy,
}

impl Dispatcher {
    /// Create a dispatcher for one channel
    pub fn new(
        store: Arc<PollStore>,
        responder: Arc<dyn Responder>,
        channel_id: impl Into<String>,
        bot_user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            responder,
            parser: CommandParser::default(),
            channel_id: channel_id.into(),
            bot_user_id: bot_user_id.into(),
            delete_policy: DeletePolicy::default(),
        }
    }

    /// Set the parser (and with it the mention token)
    pub fn with_parser(mut self, parser: CommandParser) -> Self {
        self.parser = parser;
        self
    }

    /// Set the delete policy
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<PollStore> {
        &self.store
    }

    /// Compute the reply for a post, if any. Poll state is already updated
    /// when this returns.
    pub fn handle_post(&self, post: &Post) -> Option<String> {
        match self.parser.parse(&post.message) {
            Ok(command) => {
                debug!(post_id = %post.id, verb = %command.verb(), "executing command");
                Some(self.execute(command, &post.user_id))
            }
            Err(e) => {
                if e.is_reportable() {
                    debug!(post_id = %post.id, error = %e, "rejected command");
                }
                replies::parse_error(&self.parser, &e)
            }
        }
    }

    fn execute(&self, command: Command, requester: &str) -> String {
        let outcome = match command {
            Command::Create { question, options } => self
                .store
                .create(question, options, requester)
                .map(|poll| replies::created(&poll)),
            Command::Vote { poll_id, option } => self
                .store
                .vote(&poll_id, option)
                .map(|receipt| replies::voted(&receipt)),
            Command::Results { poll_id } => self
                .store
                .results(&poll_id)
                .map(|tally| replies::results(&tally)),
            Command::Close { poll_id } => self
                .store
                .close(&poll_id, requester)
                .map(|closed| replies::closed(&closed)),
            Command::Delete { poll_id } => {
                let deleted = match self.delete_policy {
                    DeletePolicy::Anyone => self.store.delete(&poll_id),
                    DeletePolicy::CreatorOnly => self.store.delete_as(&poll_id, requester),
                };
                deleted.map(|()| replies::deleted(&poll_id))
            }
        };

        outcome.unwrap_or_else(|e| {
            debug!(error = %e, "poll operation refused");
            replies::poll_error(&e)
        })
    }

    /// Post a reply threaded under the originating post. Failures are logged
    /// only; the poll change behind the reply stays committed.
    async fn respond(&self, post: &Post, reply: &str) {
        if let Err(e) = self
            .responder
            .post_reply(&self.channel_id, reply, Some(post.thread_root()))
            .await
        {
            error!(post_id = %post.id, error = %e, "Failed to send reply to channel");
        }
    }
}

#[async_trait]
impl EventHandler for Dispatcher {
    async fn handle_event(&self, event: ChannelEvent) {
        if event.channel_id() != self.channel_id || !event.is_posted() {
            return;
        }

        let post = match event.decode_post() {
            Ok(post) => post,
            Err(e) => {
                error!(seq = event.seq, error = %e, "Failed to decode posted message");
                return;
            }
        };

        if post.user_id == self.bot_user_id {
            return;
        }

        if let Some(reply) = self.handle_post(&post) {
            self.respond(&post, &reply).await;
        }
    }
}
