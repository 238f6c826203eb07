//! Per-topic push channel that keeps itself connected.
//!
//! State machine: `Disconnected -> Connecting -> Open -> (Closed | Errored)
//! -> Connecting ...`, terminal only on teardown (`Stopped`). Lost messages
//! are never replayed; the next full-list refresh is the source of truth.

use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::{Backoff, BackoffConfig};
use super::connector::{PushConnector, PushStream};
use super::envelope::TopicSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored(String),
    /// Torn down; no further reconnects
    Stopped,
}

pub struct SyncChannel {
    sink: TopicSink,
    connector: Arc<dyn PushConnector>,
    backoff: Backoff,
    token: CancellationToken,
    state_tx: watch::Sender<ChannelState>,
}

impl SyncChannel {
    pub fn new(
        sink: TopicSink,
        connector: Arc<dyn PushConnector>,
        backoff: BackoffConfig,
        token: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        Self {
            sink,
            connector,
            backoff: Backoff::new(backoff),
            token,
            state_tx,
        }
    }

    /// Run the channel on the current runtime.
    pub fn spawn(self) -> SyncHandle {
        let topic = self.sink.topic.clone();
        let token = self.token.clone();
        let state_rx = self.state_tx.subscribe();
        let task = tokio::spawn(self.run());
        SyncHandle {
            topic,
            token,
            state_rx,
            task: Mutex::new(Some(task)),
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.state_tx.send_replace(state);
    }

    async fn run(mut self) {
        let topic = self.sink.topic.clone();

        loop {
            self.set_state(ChannelState::Connecting);
            info!(topic = %topic, "Connecting push channel");

            let connected = tokio::select! {
                _ = self.token.cancelled() => break,
                res = self.connector.connect(&topic) => res,
            };

            let ended = match connected {
                Ok(stream) => {
                    self.set_state(ChannelState::Open);
                    self.backoff.reset();
                    info!(topic = %topic, "Push channel open");
                    match self.pump(stream).await {
                        Some(state) => state,
                        None => break,
                    }
                }
                Err(e) => ChannelState::Errored(format!("{:#}", e)),
            };

            match &ended {
                ChannelState::Errored(reason) => {
                    warn!(topic = %topic, error = %reason, "Push channel errored")
                }
                _ => info!(topic = %topic, "Push channel closed"),
            }
            self.set_state(ended);

            let delay = self.backoff.next_delay();
            warn!(
                topic = %topic,
                retry = self.backoff.retry_count(),
                "Reconnecting in {:?}...",
                delay
            );
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(ChannelState::Stopped);
        debug!(topic = %topic, "Push channel stopped");
    }

    /// Apply frames in arrival order until the connection ends. `None` means
    /// teardown was requested.
    async fn pump(&self, mut stream: PushStream) -> Option<ChannelState> {
        loop {
            let frame = tokio::select! {
                _ = self.token.cancelled() => return None,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(text)) => {
                    self.sink.apply_text(&text);
                }
                Some(Err(e)) => return Some(ChannelState::Errored(format!("{:#}", e))),
                None => return Some(ChannelState::Closed),
            }
        }
    }
}

/// Owner-side handle. Dropping it tears the channel down.
pub struct SyncHandle {
    topic: String,
    token: CancellationToken,
    state_rx: watch::Receiver<ChannelState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Close the socket, cancel any pending reconnect and wait for the task.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(topic = %self.topic, error = %e, "Push channel task failed");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
