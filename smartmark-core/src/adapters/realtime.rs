//! Supabase Realtime client - `postgres_changes` over a Phoenix websocket
//!
//! Each channel gets its own socket. The join message carries the bindings
//! and the user's access token; a heartbeat keeps the socket open and pushes
//! a new token to the server whenever the session has been refreshed.
//! A socket that drops ends the channel with `CHANNEL_ERROR`. Nothing here
//! reconnects.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::result::{Error, Result};
use crate::ports::{
    ChangeFeed, ChangeKind, ChangePayload, Channel, ChannelBinding, ChannelSink, ChannelStatus,
    IdentityProvider,
};

const PHOENIX_TOPIC: &str = "phoenix";
const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_REF: &str = "1";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Phoenix message, v1 JSON serializer
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: JsonValue,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: JsonValue, msg_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }
}

/// `payload.data` of a `postgres_changes` message
#[derive(Debug, Deserialize)]
struct ChangeData {
    schema: String,
    table: String,
    #[serde(rename = "type")]
    event_type: ChangeKind,
    #[serde(default)]
    record: Option<JsonValue>,
    #[serde(default)]
    old_record: Option<JsonValue>,
    #[serde(default)]
    commit_timestamp: Option<DateTime<Utc>>,
}

impl From<ChangeData> for ChangePayload {
    fn from(data: ChangeData) -> Self {
        ChangePayload {
            schema: data.schema,
            table: data.table,
            event_type: data.event_type,
            new: data.record.unwrap_or_else(|| json!({})),
            old: data.old_record.unwrap_or_else(|| json!({})),
            commit_timestamp: data.commit_timestamp,
        }
    }
}

/// Websocket endpoint for a project URL
pub fn websocket_url(base_url: &str, anon_key: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| Error::Config(format!("Invalid Supabase URL '{}': {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(Error::Config(format!("Unsupported URL scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("Cannot derive a websocket URL from '{}'", base_url)))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

async fn current_token(identity: &dyn IdentityProvider) -> Result<String> {
    identity
        .get_session()
        .await?
        .map(|s| s.access_token)
        .ok_or_else(|| Error::auth("Not signed in"))
}

/// Change feed backed by Supabase Realtime
pub struct SupabaseRealtime {
    endpoint: Url,
    identity: Arc<dyn IdentityProvider>,
    heartbeat_interval: Duration,
    join_timeout: Duration,
}

impl SupabaseRealtime {
    pub fn new(base_url: &str, anon_key: &str, identity: Arc<dyn IdentityProvider>) -> Result<Self> {
        Ok(Self {
            endpoint: websocket_url(base_url, anon_key)?,
            identity,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            join_timeout: JOIN_TIMEOUT,
        })
    }

    pub fn with_timing(mut self, heartbeat_interval: Duration, join_timeout: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self.join_timeout = join_timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChangeFeed for SupabaseRealtime {
    async fn open_channel(&self, name: &str, bindings: Vec<ChannelBinding>) -> Result<Channel> {
        let token = current_token(self.identity.as_ref()).await?;
        let (socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| Error::Network(format!("Realtime connection failed: {}", e)))?;

        let topic = format!("realtime:{}", name);
        let join = PhoenixMessage {
            join_ref: Some(JOIN_REF.to_string()),
            ..PhoenixMessage::new(
                &topic,
                "phx_join",
                json!({
                    "config": {
                        "broadcast": { "ack": false, "self": false },
                        "presence": { "key": "" },
                        "postgres_changes": &bindings,
                        "private": false
                    },
                    "access_token": &token
                }),
                JOIN_REF.to_string(),
            )
        };

        let (sink, channel) = Channel::pair(name, bindings);
        let mut task = ChannelTask {
            socket,
            topic,
            sink,
            identity: Arc::clone(&self.identity),
            token,
            next_ref: 2,
        };
        task.send(&join).await?;
        debug!(channel = name, "Realtime join sent");

        tokio::spawn(task.run(self.heartbeat_interval, self.join_timeout));
        Ok(channel)
    }

    async fn remove_channel(&self, channel: &mut Channel) -> Result<()> {
        // The socket task sees the closed consumer, leaves and hangs up
        channel.close();
        Ok(())
    }
}

enum Wake {
    ConsumerGone,
    JoinTimedOut,
    Heartbeat,
    Frame(Option<std::result::Result<Message, tungstenite::Error>>),
}

/// Drives one channel's socket until either side goes away
struct ChannelTask {
    socket: Socket,
    topic: String,
    sink: ChannelSink,
    identity: Arc<dyn IdentityProvider>,
    token: String,
    next_ref: u64,
}

impl ChannelTask {
    async fn run(mut self, heartbeat_interval: Duration, join_timeout: Duration) {
        let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let join_deadline = tokio::time::sleep(join_timeout);
        tokio::pin!(join_deadline);
        let mut joined = false;

        let status = loop {
            let wake = tokio::select! {
                _ = self.sink.closed() => Wake::ConsumerGone,
                _ = &mut join_deadline, if !joined => Wake::JoinTimedOut,
                _ = heartbeat.tick() => Wake::Heartbeat,
                frame = self.socket.next() => Wake::Frame(frame),
            };

            match wake {
                Wake::ConsumerGone => {
                    self.leave().await;
                    break ChannelStatus::Closed;
                }
                Wake::JoinTimedOut => {
                    warn!(channel = self.sink.name(), "Realtime join timed out");
                    break ChannelStatus::TimedOut;
                }
                Wake::Heartbeat => {
                    if let Err(e) = self.heartbeat().await {
                        warn!(channel = self.sink.name(), error = %e, "Realtime heartbeat failed");
                        break ChannelStatus::ChannelError;
                    }
                }
                Wake::Frame(Some(Ok(Message::Text(text)))) => {
                    if let Some(status) = self.handle_text(&text, &mut joined) {
                        break status;
                    }
                }
                Wake::Frame(Some(Ok(Message::Close(frame)))) => {
                    warn!(channel = self.sink.name(), ?frame, "Realtime socket closed by server");
                    break ChannelStatus::ChannelError;
                }
                Wake::Frame(Some(Ok(_))) => {}
                Wake::Frame(Some(Err(e))) => {
                    warn!(channel = self.sink.name(), error = %e, "Realtime socket error");
                    break ChannelStatus::ChannelError;
                }
                Wake::Frame(None) => {
                    warn!(channel = self.sink.name(), "Realtime socket ended");
                    break ChannelStatus::ChannelError;
                }
            }
        };

        self.sink.set_status(status);
        debug!(channel = self.sink.name(), status = %status, "Realtime channel task stopped");
    }

    fn next_ref(&mut self) -> String {
        let r = self.next_ref;
        self.next_ref += 1;
        r.to_string()
    }

    async fn send(&mut self, message: &PhoenixMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Network(format!("Realtime send failed: {}", e)))
    }

    /// Returns the final status when the channel should stop
    fn handle_text(&mut self, text: &str, joined: &mut bool) -> Option<ChannelStatus> {
        let message: PhoenixMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable realtime frame");
                return None;
            }
        };
        if message.topic != self.topic {
            return None;
        }

        match message.event.as_str() {
            "phx_reply" if message.msg_ref.as_deref() == Some(JOIN_REF) => {
                if message.payload.get("status").and_then(JsonValue::as_str) == Some("ok") {
                    *joined = true;
                    self.sink.set_status(ChannelStatus::Subscribed);
                    info!(channel = self.sink.name(), "Realtime channel joined");
                    None
                } else {
                    warn!(channel = self.sink.name(), response = %message.payload, "Realtime join rejected");
                    Some(ChannelStatus::ChannelError)
                }
            }
            "postgres_changes" => {
                let data = message.payload.get("data").cloned().unwrap_or(JsonValue::Null);
                match serde_json::from_value::<ChangeData>(data) {
                    Ok(data) => {
                        if !self.sink.deliver(&data.into()) {
                            return Some(ChannelStatus::Closed);
                        }
                    }
                    Err(e) => warn!(error = %e, "Discarding undecodable postgres_changes payload"),
                }
                None
            }
            "system" => {
                if message.payload.get("status").and_then(JsonValue::as_str) == Some("error") {
                    warn!(channel = self.sink.name(), payload = %message.payload, "Realtime system error");
                    Some(ChannelStatus::ChannelError)
                } else {
                    debug!(channel = self.sink.name(), payload = %message.payload, "Realtime system message");
                    None
                }
            }
            "phx_error" => Some(ChannelStatus::ChannelError),
            "phx_close" => Some(ChannelStatus::Closed),
            _ => None,
        }
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let msg_ref = self.next_ref();
        self.send(&PhoenixMessage::new(PHOENIX_TOPIC, "heartbeat", json!({}), msg_ref))
            .await?;

        // The session may have been refreshed since the join
        match current_token(self.identity.as_ref()).await {
            Ok(token) if token != self.token => {
                let msg_ref = self.next_ref();
                let topic = self.topic.clone();
                self.send(&PhoenixMessage::new(
                    &topic,
                    "access_token",
                    json!({ "access_token": &token }),
                    msg_ref,
                ))
                .await?;
                self.token = token;
                debug!(channel = self.sink.name(), "Realtime access token updated");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "No token to push to realtime"),
        }
        Ok(())
    }

    async fn leave(&mut self) {
        let msg_ref = self.next_ref();
        let topic = self.topic.clone();
        if let Err(e) = self.send(&PhoenixMessage::new(&topic, "phx_leave", json!({}), msg_ref)).await {
            debug!(error = %e, "Realtime leave not sent");
        }
        let _ = self.socket.close(None).await;
    }
}
