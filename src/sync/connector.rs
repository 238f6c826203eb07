//! Transports that open one push connection per topic.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{stream, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::protocol::WebSocketConfig, tungstenite::Message,
};
use tracing::{debug, info, warn};

/// Text frames of one live connection. The stream ends when the peer
/// closes; an `Err` item means the connection broke.
pub type PushStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, topic: &str) -> Result<PushStream>;
}

/// Subscribe message sent right after the socket opens
#[derive(Debug, Clone, Serialize)]
struct SubscribeMessage<'a> {
    action: &'static str, // "subscribe"
    topic: &'a str,
}

/// WebSocket transport: one socket per topic, subscribed by topic name.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    auth_token: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, topic: &str) -> Result<PushStream> {
        // Build from IntoClientRequest so tungstenite can add required websocket headers.
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .context("Failed to build websocket request")?;

        if let Some(token) = &self.auth_token {
            let hv: HeaderValue = format!("Bearer {}", token)
                .parse()
                .context("Invalid API token for websocket")?;
            request.headers_mut().insert("Authorization", hv);
        }

        let ws_config = WebSocketConfig {
            max_message_size: Some(16 * 1024 * 1024),
            max_frame_size: Some(4 * 1024 * 1024),
            accept_unmasked_frames: false,
            ..Default::default()
        };

        let (ws_stream, response) = connect_async_with_config(request, Some(ws_config), false)
            .await
            .context("Failed to connect to WebSocket")?;

        info!(topic, status = %response.status(), "WebSocket connected");

        let (mut write, read) = ws_stream.split();

        let sub_json = serde_json::to_string(&SubscribeMessage {
            action: "subscribe",
            topic,
        })
        .context("Failed to serialize subscription message")?;
        write
            .send(Message::Text(sub_json))
            .await
            .context("Failed to send subscription")?;

        let frames = stream::unfold((write, read), |(mut write, mut read)| async move {
            loop {
                match read.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text), (write, read))),
                    Ok(Message::Ping(ping)) => {
                        debug!("Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(ping)).await {
                            let err = anyhow!("Failed to send pong: {}", e);
                            return Some((Err(err), (write, read)));
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        info!("WebSocket closed by server: {:?}", frame);
                        return None;
                    }
                    Ok(Message::Binary(data)) => {
                        warn!("Received unexpected binary message: {} bytes", data.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Some((Err(anyhow!("WebSocket read error: {}", e)), (write, read)))
                    }
                }
            }
        });

        Ok(Box::pin(frames))
    }
}

/// One scripted connection attempt for `MemoryConnector`.
pub enum ScriptedConnect {
    /// Connection refused with this message
    Refuse(String),
    /// Connection opens; frames arrive through the returned sender
    Accept(mpsc::UnboundedReceiver<Result<String>>),
}

/// In-process transport fed by channels. Each `connect` pops the next
/// scripted attempt for the topic; an exhausted script refuses.
#[derive(Default)]
pub struct MemoryConnector {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedConnect>>>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful connection; returns the feed for its frames.
    /// Dropping the sender closes the connection cleanly.
    pub fn accept(&self, topic: &str) -> mpsc::UnboundedSender<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(topic, ScriptedConnect::Accept(rx));
        tx
    }

    pub fn refuse(&self, topic: &str, message: &str) {
        self.push(topic, ScriptedConnect::Refuse(message.to_string()));
    }

    fn push(&self, topic: &str, script: ScriptedConnect) {
        self.scripts
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn attempts(&self, topic: &str) -> usize {
        self.attempts.lock().get(topic).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PushConnector for MemoryConnector {
    async fn connect(&self, topic: &str) -> Result<PushStream> {
        *self.attempts.lock().entry(topic.to_string()).or_default() += 1;
        let next = self
            .scripts
            .lock()
            .get_mut(topic)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(ScriptedConnect::Accept(rx)) => Ok(Box::pin(receiver_stream(rx))),
            Some(ScriptedConnect::Refuse(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no connection scripted for topic {}", topic)),
        }
    }
}

fn receiver_stream(
    rx: mpsc::UnboundedReceiver<Result<String>>,
) -> impl Stream<Item = Result<String>> + Send {
    stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
}
