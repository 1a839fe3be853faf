//! Bot assembly and lifecycle
//!
//! Resolves the bot's identity and target channel, wires the poll store,
//! dispatcher and connection supervisor together, and runs until shutdown.

use crate::channels::mattermost::{Channel, Team, User};
use crate::channels::{
    ChannelError, EventSource, MattermostClient, MattermostConfig, Responder,
};
use crate::commands::CommandParser;
use crate::config::{BotConfig, BotSettings, ConfigError};
use crate::dispatch::Dispatcher;
use crate::polls::{create_store, PollStore, PollStoreStats};
use crate::supervisor::{ConnectionState, ConnectionSupervisor, Sleeper};
use crate::tracing::TracingError;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

/// Errors that stop the bot before it starts serving
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    #[error("failed to create client: {0}")]
    Client(#[source] ChannelError),

    #[error("failed to authenticate bot: {0}")]
    Authentication(#[source] ChannelError),

    #[error("failed to find team '{name}': {source}")]
    Team {
        name: String,
        #[source]
        source: ChannelError,
    },

    #[error("failed to find channel '{name}': {source}")]
    Channel {
        name: String,
        #[source]
        source: ChannelError,
    },
}

/// Identities resolved at startup
#[derive(Debug, Clone)]
pub struct Identity {
    pub bot_user: User,
    pub team: Team,
    pub channel: Channel,
}

/// Resolve the bot user, the team and the channel
pub async fn resolve_identity(
    client: &MattermostClient,
    config: &BotConfig,
) -> Result<Identity, StartupError> {
    let bot_user = client
        .get_me()
        .await
        .map_err(StartupError::Authentication)?;
    info!(user_id = %bot_user.id, username = %bot_user.username, "Authenticated");

    let team = client
        .get_team_by_name(&config.mattermost_team_name)
        .await
        .map_err(|source| StartupError::Team {
            name: config.mattermost_team_name.clone(),
            source,
        })?;

    let channel = client
        .get_channel_by_name(&team.id, &config.mattermost_channel)
        .await
        .map_err(|source| StartupError::Channel {
            name: config.mattermost_channel.clone(),
            source,
        })?;
    info!(team = %team.name, channel_id = %channel.id, "Resolved target channel");

    Ok(Identity {
        bot_user,
        team,
        channel,
    })
}

/// A fully wired bot
pub struct PollBot {
    store: Arc<PollStore>,
    supervisor: ConnectionSupervisor,
}

impl PollBot {
    /// Wire a bot around an event source and a responder
    pub fn new(
        source: Arc<dyn EventSource>,
        responder: Arc<dyn Responder>,
        channel_id: &str,
        bot_user_id: &str,
        settings: &BotSettings,
    ) -> Self {
        let store = create_store();
        let dispatcher = Dispatcher::new(store.clone(), responder, channel_id, bot_user_id)
            .with_parser(CommandParser::new(settings.mention.clone()))
            .with_delete_policy(settings.delete_policy());
        let supervisor =
            ConnectionSupervisor::new(source, Arc::new(dispatcher), settings.supervisor());

        Self { store, supervisor }
    }

    /// Replace the supervisor's sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.supervisor = self.supervisor.with_sleeper(sleeper);
        self
    }

    pub fn store(&self) -> &Arc<PollStore> {
        &self.store
    }

    /// Watch connection state transitions
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    /// Serve until `shutdown` resolves. Returns the final store statistics.
    pub async fn run_until<F>(self, shutdown: F) -> PollStoreStats
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = tokio::spawn(async move {
            shutdown.await;
            let _ = shutdown_tx.send(true);
        });

        self.supervisor.run(shutdown_rx).await;
        trigger.abort();

        let stats = self.store.stats();
        info!(
            total_polls = stats.total_polls,
            active_polls = stats.active_polls,
            total_votes = stats.total_votes,
            "Bot stopped"
        );
        stats
    }

    /// Serve until Ctrl-C
    pub async fn run_until_ctrl_c(self) -> PollStoreStats {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(%err, "failed to listen for ctrl_c");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
    }
}

/// Connect to the configured server and build the bot
pub async fn connect(config: &BotConfig) -> Result<PollBot, StartupError> {
    let client = MattermostClient::new(MattermostConfig {
        server_url: config.mattermost_server.clone(),
        access_token: config.mattermost_token.clone(),
    })
    .map_err(StartupError::Client)?;

    let identity = resolve_identity(&client, config).await?;
    let client = Arc::new(client);

    Ok(PollBot::new(
        client.clone(),
        client,
        &identity.channel.id,
        &identity.bot_user.id,
        &config.bot,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelEvent, ChannelResult, EventStream, Post};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct ScriptedStream {
        events: VecDeque<ChannelEvent>,
    }

    #[async_trait]
    impl EventStream for ScriptedStream {
        async fn next_event(&mut self) -> Option<ChannelResult<ChannelEvent>> {
            match self.events.pop_front() {
                Some(event) => Some(Ok(event)),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    struct OneShotSource {
        events: Mutex<Option<Vec<ChannelEvent>>>,
    }

    #[async_trait]
    impl EventSource for OneShotSource {
        async fn connect(&self) -> ChannelResult<Box<dyn EventStream>> {
            let events = self.events.lock().take();
            match events {
                Some(events) => Ok(Box::new(ScriptedStream {
                    events: events.into(),
                })),
                None => std::future::pending().await,
            }
        }
    }

    struct ChannelResponder {
        sent: mpsc::UnboundedSender<(String, Option<String>)>,
    }

    #[async_trait]
    impl Responder for ChannelResponder {
        async fn post_reply(
            &self,
            _channel_id: &str,
            message: &str,
            root_id: Option<&str>,
        ) -> ChannelResult<String> {
            let _ = self
                .sent
                .send((message.to_string(), root_id.map(str::to_string)));
            Ok("reply".to_string())
        }
    }

    fn post(id: &str, user: &str, message: &str) -> ChannelEvent {
        ChannelEvent::posted(&Post {
            id: id.to_string(),
            channel_id: "chan".to_string(),
            user_id: user.to_string(),
            root_id: String::new(),
            message: message.to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_bot_serves_until_shutdown() {
        let source = Arc::new(OneShotSource {
            events: Mutex::new(Some(vec![post(
                "p1",
                "alice",
                r#"@vote-bot create "Lunch" "Pizza" "Sushi""#,
            )])),
        });
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let responder = Arc::new(ChannelResponder { sent: sent_tx });

        let bot = PollBot::new(source, responder, "chan", "bot", &BotSettings::default());
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(bot.run_until(async move {
            let _ = stop_rx.await;
        }));

        let (reply, root) = sent_rx.recv().await.unwrap();
        assert!(reply.starts_with("Poll 'Lunch' created! ID: poll-1"));
        assert_eq!(root.as_deref(), Some("p1"));

        stop_tx.send(()).unwrap();
        let stats = task.await.unwrap();
        assert_eq!(stats.total_polls, 1);
        assert_eq!(stats.active_polls, 1);
    }

    #[tokio::test]
    async fn test_bot_uses_configured_mention() {
        let source = Arc::new(OneShotSource {
            events: Mutex::new(Some(vec![
                post("p1", "alice", r#"@vote-bot create "Ignored" "A" "B""#),
                post("p2", "alice", r#"@polls create "Lunch" "A" "B""#),
            ])),
        });
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let responder = Arc::new(ChannelResponder { sent: sent_tx });
        let settings = BotSettings {
            mention: "@polls".to_string(),
            ..BotSettings::default()
        };

        let bot = PollBot::new(source, responder, "chan", "bot", &settings);
        let store = bot.store().clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(bot.run_until(async move {
            let _ = stop_rx.await;
        }));

        let (reply, _) = sent_rx.recv().await.unwrap();
        assert!(reply.contains("'Lunch'"));
        assert_eq!(store.stats().total_polls, 1);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
