//! Mock Supabase Realtime server for tests
//!
//! Accepts websocket connections, answers joins and heartbeats the way the
//! Phoenix server does, records every client message, and lets a test push
//! `postgres_changes` frames or drop all connections.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value as JsonValue};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::accept_async;

#[derive(Debug, Clone, Copy, Default)]
pub struct MockRealtimeConfig {
    /// Answer joins with an error status
    pub reject_join: bool,
    /// Never answer joins
    pub ignore_join: bool,
}

#[derive(Debug, Clone)]
enum Push {
    Frame(String),
    Disconnect,
}

struct State {
    config: MockRealtimeConfig,
    received: Mutex<Vec<JsonValue>>,
}

pub struct MockRealtimeServer {
    base_url: String,
    state: Arc<State>,
    push: broadcast::Sender<Push>,
}

impl MockRealtimeServer {
    pub async fn start(config: MockRealtimeConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State {
            config,
            received: Mutex::new(Vec::new()),
        });
        let (push, _) = broadcast::channel(64);

        let accept_state = Arc::clone(&state);
        let accept_push = push.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_state), accept_push.subscribe()));
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            push,
        }
    }

    /// Project URL to hand to the client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn received(&self) -> Vec<JsonValue> {
        self.state.received.lock().unwrap().clone()
    }

    /// First client message with the given event, waiting up to five seconds
    pub async fn wait_for_event(&self, event: &str) -> JsonValue {
        for _ in 0..500 {
            if let Some(found) = self.received().into_iter().find(|m| m["event"] == event) {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no '{}' message received", event);
    }

    pub fn push_change(&self, topic: &str, data: JsonValue) {
        let frame = json!({
            "topic": topic,
            "event": "postgres_changes",
            "payload": { "ids": [1], "data": data },
            "ref": null
        });
        let _ = self.push.send(Push::Frame(frame.to_string()));
    }

    pub fn disconnect_all(&self) {
        let _ = self.push.send(Push::Disconnect);
    }
}

fn reply(topic: &JsonValue, msg_ref: &JsonValue, status: &str, response: JsonValue) -> String {
    json!({
        "topic": topic,
        "event": "phx_reply",
        "payload": { "status": status, "response": response },
        "ref": msg_ref,
        "join_ref": msg_ref
    })
    .to_string()
}

fn answer(message: &JsonValue, config: MockRealtimeConfig) -> Option<String> {
    let topic = &message["topic"];
    let msg_ref = &message["ref"];
    match message["event"].as_str()? {
        "phx_join" if config.ignore_join => None,
        "phx_join" if config.reject_join => Some(reply(
            topic,
            msg_ref,
            "error",
            json!({ "reason": "Invalid JWT" }),
        )),
        "phx_join" => Some(reply(
            topic,
            msg_ref,
            "ok",
            json!({ "postgres_changes": message["payload"]["config"]["postgres_changes"] }),
        )),
        "heartbeat" | "phx_leave" | "access_token" => Some(reply(topic, msg_ref, "ok", json!({}))),
        _ => None,
    }
}

async fn serve(stream: TcpStream, state: Arc<State>, mut push: broadcast::Receiver<Push>) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let Ok(message) = serde_json::from_str::<JsonValue>(&text) else {
                        continue;
                    };
                    state.received.lock().unwrap().push(message.clone());
                    if let Some(answer) = answer(&message, state.config) {
                        if ws.send(Message::Text(answer)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            pushed = push.recv() => match pushed {
                Ok(Push::Frame(text)) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Push::Disconnect) | Err(_) => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
        }
    }
}
