//! Mattermost Channel
//!
//! Mattermost self-hosted messaging platform integration: REST API v4 for
//! lookups and posting, the WebSocket API for inbound events.

use super::event::{ChannelEvent, Post};
use super::traits::{ChannelError, ChannelResult, EventSource, EventStream, Responder};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for REST calls
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Mattermost configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MattermostConfig {
    /// Mattermost server URL
    pub server_url: String,
    /// Access token
    pub access_token: String,
}

/// A Mattermost user
#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
}

/// A Mattermost team
#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A Mattermost channel
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub team_id: String,
}

#[derive(Debug, Serialize)]
struct NewPost<'a> {
    channel_id: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    root_id: Option<&'a str>,
}

/// Mattermost API client
#[derive(Debug)]
pub struct MattermostClient {
    config: MattermostConfig,
    base_url: Url,
    http: reqwest::Client,
}

impl MattermostClient {
    /// Create a new client. Does not touch the network.
    pub fn new(config: MattermostConfig) -> ChannelResult<Self> {
        let base_url = Url::parse(&config.server_url)
            .map_err(|e| ChannelError::InvalidConfig(format!("server URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChannelError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            config,
            base_url,
            http,
        })
    }

    /// Build a REST API URL; each segment is percent-encoded
    fn api_url(&self, segments: &[&str]) -> ChannelResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::InvalidConfig("server URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "v4"])
            .extend(segments);
        Ok(url)
    }

    /// WebSocket endpoint, with the scheme switched to `ws`/`wss`
    pub fn websocket_url(&self) -> ChannelResult<Url> {
        let mut url = self.base_url.clone();
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(ChannelError::InvalidConfig(format!(
                    "unsupported server URL scheme '{other}'"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::InvalidConfig("cannot derive websocket URL".to_string()))?;
        let path = format!("{}/api/v4/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }

    async fn check(response: reqwest::Response, what: &str) -> ChannelResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let detail = format!("{what}: HTTP {status}: {body}");
        Err(match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                ChannelError::AuthenticationFailed(detail)
            }
            reqwest::StatusCode::NOT_FOUND => ChannelError::NotFound(detail),
            _ => ChannelError::Other(detail),
        })
    }

    /// GET a REST resource
    async fn api_get<T: DeserializeOwned>(&self, segments: &[&str]) -> ChannelResult<T> {
        let path = segments.join("/");
        let response = self
            .http
            .get(self.api_url(segments)?)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        Self::check(response, &path)
            .await?
            .json()
            .await
            .map_err(|e| ChannelError::Other(format!("{path}: {e}")))
    }

    /// The user the token belongs to
    pub async fn get_me(&self) -> ChannelResult<User> {
        self.api_get(&["users", "me"]).await
    }

    pub async fn get_team_by_name(&self, name: &str) -> ChannelResult<Team> {
        self.api_get(&["teams", "name", name]).await
    }

    pub async fn get_channel_by_name(&self, team_id: &str, name: &str) -> ChannelResult<Channel> {
        self.api_get(&["teams", team_id, "channels", "name", name])
            .await
    }

    /// Create a post, optionally as a reply in a thread
    pub async fn create_post(
        &self,
        channel_id: &str,
        message: &str,
        root_id: Option<&str>,
    ) -> ChannelResult<Post> {
        let body = NewPost {
            channel_id,
            message,
            root_id: root_id.filter(|id| !id.is_empty()),
        };

        let response = self
            .http
            .post(self.api_url(&["posts"])?)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        Self::check(response, "posts")
            .await?
            .json()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl Responder for MattermostClient {
    async fn post_reply(
        &self,
        channel_id: &str,
        message: &str,
        root_id: Option<&str>,
    ) -> ChannelResult<String> {
        self.create_post(channel_id, message, root_id)
            .await
            .map(|post| post.id)
    }
}

#[async_trait]
impl EventSource for MattermostClient {
    async fn connect(&self) -> ChannelResult<Box<dyn EventStream>> {
        let url = self.websocket_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.access_token))
            .map_err(|e| ChannelError::InvalidConfig(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (mut socket, _response) = connect_async(request)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let challenge = serde_json::json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": self.config.access_token },
        });
        socket
            .send(Message::Text(challenge.to_string().into()))
            .await
            .map_err(|e| ChannelError::AuthenticationFailed(e.to_string()))?;

        info!(url = %url, "Connected to Mattermost websocket");
        Ok(Box::new(MattermostEventStream { socket }))
    }
}

/// Event stream over the Mattermost websocket
pub struct MattermostEventStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EventStream for MattermostEventStream {
    async fn next_event(&mut self) -> Option<ChannelResult<ChannelEvent>> {
        while let Some(frame) = self.socket.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Mattermost closed the websocket");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(ChannelError::ConnectionFailed(e.to_string()))),
            };

            match decode_frame(text.as_str()) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => warn!(error = %e, "Skipping undecodable websocket frame"),
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!(error = %e, "Websocket close handshake failed");
        }
    }
}

/// Decode one text frame. Replies to our own actions (no `event` field)
/// decode to `None`.
fn decode_frame(text: &str) -> Result<Option<ChannelEvent>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("event").is_none() {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some)
}
