use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::MergerConfig;
use crate::websocket::ServerMessage;

use super::table::ShardTable;
use super::types::ShardError;

type ShardStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OBSERVE_FRAME: &str = r#"{"type":"observe","payload":{}}"#;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backoff: BackoffConfig,
    /// Consecutive failed connects before the shard is marked down
    pub max_retries: u32,
    pub keepalive: Duration,
    /// Upper bound for the TCP connect plus WebSocket handshake
    pub connect_timeout: Duration,
    /// A session with no inbound frame for this long is treated as lost
    pub silence_timeout: Duration,
}

impl From<&MergerConfig> for ClientConfig {
    fn from(config: &MergerConfig) -> Self {
        Self {
            backoff: BackoffConfig::from(config),
            max_retries: config.max_retries.max(1),
            keepalive: Duration::from_secs(config.keepalive_seconds.max(1)),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms.max(1)),
            silence_timeout: Duration::from_secs(config.dead_shard_seconds.max(1)),
        }
    }
}

enum SessionEnd {
    Shutdown,
    Lost(ShardError),
}

/// One observer connection to a backend shard, reconnecting with backoff
/// until shutdown or until the retry budget is spent.
pub struct ShardClient {
    url: String,
    table: Arc<ShardTable>,
    config: ClientConfig,
    shutdown: broadcast::Receiver<()>,
}

impl ShardClient {
    pub fn new(
        url: impl Into<String>,
        table: Arc<ShardTable>,
        config: ClientConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            url: url.into(),
            table,
            config,
            shutdown,
        }
    }

    #[tracing::instrument(name = "shard.client", skip(self), fields(shard = %self.url))]
    pub async fn run(mut self) {
        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());

        loop {
            let connect_timeout = self.config.connect_timeout;
            let connect = tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                result = tokio::time::timeout(connect_timeout, connect_async(self.url.as_str())) => {
                    match result {
                        Ok(result) => result.map_err(ShardError::from),
                        Err(_) => Err(ShardError::ConnectTimeout(connect_timeout.as_millis() as u64)),
                    }
                }
            };

            match connect {
                Ok((stream, _)) => {
                    self.table.mark_up(&self.url);
                    backoff.reset();
                    tracing::info!("Shard connected");

                    match self.session(stream).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(e) => {
                            tracing::warn!(error = %e, "Shard connection lost");
                            self.table.mark_failed(&self.url, e.to_string());
                        }
                    }
                }
                Err(e) => {
                    let failures = self.table.mark_failed(&self.url, e.to_string());
                    if failures >= self.config.max_retries {
                        tracing::error!(
                            failures,
                            error = %e,
                            "Shard unreachable, giving up"
                        );
                        self.table.mark_down(&self.url);
                        break;
                    }
                    tracing::debug!(failures, error = %e, "Shard connect failed");
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting to shard");
            if self.wait_or_shutdown(delay).await {
                break;
            }
        }

        tracing::info!("Shard client stopped");
    }

    /// Sleep for `delay`; true if shutdown arrived first
    async fn wait_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.recv() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn session(&mut self, stream: ShardStream) -> SessionEnd {
        let (mut sink, mut source) = stream.split();

        if let Err(e) = sink.send(Message::text(OBSERVE_FRAME)).await {
            return SessionEnd::Lost(e.into());
        }

        let mut keepalive = tokio::time::interval(self.config.keepalive);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        let silence = self.config.silence_timeout;
        let quiet = tokio::time::sleep(silence);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
                _ = &mut quiet => {
                    return SessionEnd::Lost(ShardError::Silent(silence.as_millis() as u64));
                }
                _ = keepalive.tick() => {
                    let ping = serde_json::json!({
                        "type": "ping",
                        "payload": { "timestamp": chrono::Utc::now().timestamp_millis() },
                    });
                    if let Err(e) = sink.send(Message::text(ping.to_string())).await {
                        return SessionEnd::Lost(e.into());
                    }
                }
                frame = source.next() => {
                    quiet.as_mut().reset(tokio::time::Instant::now() + silence);
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(end) = self.handle_frame(text.as_str()) {
                                return end;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Lost(ShardError::Closed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return SessionEnd::Lost(e.into()),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) -> Option<SessionEnd> {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable shard frame");
                return None;
            }
        };

        match message {
            ServerMessage::Metrics(update) => {
                self.table.apply_update(&self.url, update);
                None
            }
            ServerMessage::Shutdown(notice) => {
                Some(SessionEnd::Lost(ShardError::ShuttingDown(notice.reason)))
            }
            ServerMessage::Error(error) => {
                tracing::warn!(code = %error.code, message = %error.message, "Shard reported an error");
                None
            }
            ServerMessage::Pong(_) => None,
        }
    }
}
