//! Helpers for driving a real server over a loopback listener

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use chatpulse::config::Settings;
use chatpulse::server::{create_app, AppState};
use chatpulse::store::MemoryCounterStore;
use chatpulse::websocket::{MetricsUpdate, ServerMessage};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
}

impl TestServer {
    pub async fn start(settings: Settings) -> Self {
        let state = AppState::with_store(settings, Arc::new(MemoryCounterStore::new()), None);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = create_app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.ws_url()).await.unwrap();
        client
    }

    /// Wait until the registry holds exactly `count` connections
    pub async fn wait_for_connections(&self, count: usize) {
        let registry = self.state.registry.clone();
        tokio::time::timeout(RECV_TIMEOUT, async move {
            while registry.connection_count() != count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("registry never reached {} connections", count));
    }
}

pub async fn send_event(client: &mut Client, kind: &str, payload: serde_json::Value) {
    let frame = json!({ "type": kind, "payload": payload });
    client.send(Message::text(frame.to_string())).await.unwrap();
}

pub async fn join(client: &mut Client, user_id: &str) {
    send_event(client, "join", json!({ "userId": user_id })).await;
}

/// Next server message, skipping control frames. None once the socket closes.
pub async fn recv(client: &mut Client) -> Option<ServerMessage> {
    loop {
        let frame = tokio::time::timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame");
        match frame {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Skip frames until a metrics update matching `pred` arrives
pub async fn recv_metrics_until(
    client: &mut Client,
    pred: impl Fn(&MetricsUpdate) -> bool,
) -> MetricsUpdate {
    loop {
        match recv(client).await {
            Some(ServerMessage::Metrics(update)) if pred(&update) => return update,
            Some(_) => continue,
            None => panic!("connection closed before the expected metrics update"),
        }
    }
}

/// Round-trip a ping; everything sent before it has been processed once
/// the pong arrives.
pub async fn sync(client: &mut Client) {
    send_event(client, "ping", json!({ "timestamp": 1 })).await;
    loop {
        match recv(client).await {
            Some(ServerMessage::Pong(_)) => return,
            Some(_) => continue,
            None => panic!("connection closed while waiting for pong"),
        }
    }
}
