//! End-to-end tests over a loopback listener

mod common;

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

use chatpulse::config::Settings;
use chatpulse::server::create_app;
use chatpulse::shutdown::GracefulShutdown;
use chatpulse::store::KeywordCount;
use chatpulse::websocket::ServerMessage;

use common::{join, recv, recv_metrics_until, send_event, sync, Client, TestServer};

fn settings_with_limit(max_connections: usize) -> Settings {
    let mut settings = Settings::default();
    settings.websocket.max_connections = max_connections;
    settings
}

async fn get_json(server: &TestServer, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = create_app(server.state.clone())
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_join_message_and_tick_snapshot() {
    let server = TestServer::start(Settings::default()).await;
    let mut client = server.connect().await;

    join(&mut client, "alice").await;
    let presence = recv_metrics_until(&mut client, |u| u.is_partial()).await;
    assert_eq!(presence.active_users, 1);

    send_event(
        &mut client,
        "message",
        json!({ "userId": "alice", "text": "Rust is fast and rust is safe" }),
    )
    .await;
    sync(&mut client).await;

    server.state.aggregator.tick().await;
    let snapshot = recv_metrics_until(&mut client, |u| !u.is_partial()).await;

    assert_eq!(snapshot.active_users, 1);
    assert!(snapshot.messages_per_sec.unwrap() > 0.0);
    let keywords = snapshot.top_keywords.unwrap();
    assert_eq!(keywords[0], KeywordCount::new("rust", 2));
    assert!(keywords.contains(&KeywordCount::new("safe", 1)));
}

#[tokio::test]
async fn test_admission_limit_rejects_then_recovers() {
    let server = TestServer::start(settings_with_limit(1)).await;

    let mut first = server.connect().await;
    server.wait_for_connections(1).await;

    let mut second = server.connect().await;
    match recv(&mut second).await {
        Some(ServerMessage::Error(error)) => assert_eq!(error.code, "CONNECTION_LIMIT"),
        other => panic!("expected CONNECTION_LIMIT error, got {:?}", other),
    }
    assert!(recv(&mut second).await.is_none());
    assert_eq!(server.state.registry.connection_count(), 1);

    first.close(None).await.unwrap();
    server.wait_for_connections(0).await;

    let mut third = server.connect().await;
    sync(&mut third).await;
    assert_eq!(server.state.registry.connection_count(), 1);
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_keeps_connection() {
    let server = TestServer::start(Settings::default()).await;
    let mut client = server.connect().await;

    client.send(Message::text("{not json")).await.unwrap();

    match recv(&mut client).await {
        Some(ServerMessage::Error(error)) => assert_eq!(error.code, "INVALID_MESSAGE"),
        other => panic!("expected INVALID_MESSAGE error, got {:?}", other),
    }

    send_event(&mut client, "teleport", json!({})).await;
    match recv(&mut client).await {
        Some(ServerMessage::Error(error)) => assert_eq!(error.code, "INVALID_MESSAGE"),
        other => panic!("expected INVALID_MESSAGE error, got {:?}", other),
    }

    sync(&mut client).await;
}

#[tokio::test]
async fn test_disconnect_publishes_presence() {
    let server = TestServer::start(Settings::default()).await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    join(&mut alice, "alice").await;
    recv_metrics_until(&mut alice, |u| u.active_users == 1).await;
    join(&mut bob, "bob").await;
    recv_metrics_until(&mut alice, |u| u.active_users == 2).await;

    drop(bob);

    let update = recv_metrics_until(&mut alice, |u| u.active_users == 1).await;
    assert!(update.is_partial());
    server.wait_for_connections(1).await;
    assert_eq!(server.state.registry.active_users(), 1);
}

#[tokio::test]
async fn test_leave_keeps_connection_open() {
    let server = TestServer::start(Settings::default()).await;
    let mut client = server.connect().await;

    join(&mut client, "alice").await;
    recv_metrics_until(&mut client, |u| u.active_users == 1).await;

    send_event(&mut client, "user_left", json!({ "userId": "alice" })).await;
    recv_metrics_until(&mut client, |u| u.active_users == 0).await;

    sync(&mut client).await;
    assert_eq!(server.state.registry.connection_count(), 1);
}

#[tokio::test]
async fn test_ping_echoes_user_and_timestamp() {
    let server = TestServer::start(Settings::default()).await;
    let mut client = server.connect().await;

    send_event(&mut client, "ping", json!({ "userId": "alice", "timestamp": 42 })).await;
    match recv(&mut client).await {
        Some(ServerMessage::Pong(pong)) => {
            assert_eq!(pong.user_id.as_deref(), Some("alice"));
            assert_eq!(pong.timestamp, Some(42));
            assert!(pong.server_time > 0);
        }
        other => panic!("expected pong, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_notifies_connected_clients() {
    let server = TestServer::start(Settings::default()).await;
    let mut client = server.connect().await;
    join(&mut client, "alice").await;
    recv_metrics_until(&mut client, |u| u.active_users == 1).await;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let shutdown = GracefulShutdown::new(server.state.registry.clone(), shutdown_tx);
    let result = shutdown.execute("maintenance").await;

    assert!(result.success);
    assert_eq!(result.clients_notified, 1);
    match recv(&mut client).await {
        Some(ServerMessage::Shutdown(notice)) => assert_eq!(notice.reason, "maintenance"),
        other => panic!("expected shutdown notice, got {:?}", other),
    }
    assert!(recv(&mut client).await.is_none());
}

#[tokio::test]
async fn test_health_reports_connections() {
    let server = TestServer::start(settings_with_limit(50)).await;
    let mut client = server.connect().await;
    join(&mut client, "alice").await;
    recv_metrics_until(&mut client, |u| u.active_users == 1).await;

    let (status, body) = get_json(&server, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"]["activeUsers"], 1);
    assert_eq!(body["connections"]["totalConnections"], 1);
    assert_eq!(body["connections"]["maxConnections"], 50);
    assert_eq!(body["store"]["backend"], "memory");
}

#[tokio::test]
async fn test_reset_clears_keyword_table() {
    let server = TestServer::start(Settings::default()).await;
    let mut client = server.connect().await;
    send_event(&mut client, "message", json!({ "userId": "alice", "text": "tokio axum tokio" })).await;
    sync(&mut client).await;

    let (_, body) = get_json(&server, "GET", "/debug/keywords").await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["keywords"][0]["keyword"], "tokio");
    assert_eq!(body["keywords"][0]["count"], 2);

    let (status, body) = get_json(&server, "POST", "/admin/reset").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "reset");

    let (_, body) = get_json(&server, "GET", "/debug/keywords").await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_reclaim_removes_dead_connections() {
    let server = TestServer::start(Settings::default()).await;

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let handle = server.state.registry.register(tx).unwrap();
    server.state.registry.on_join(handle.id, "ghost");
    drop(rx);

    let (status, body) = get_json(&server, "POST", "/admin/reclaim").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closedConnections"], 1);
    assert_eq!(body["removedUsers"], 1);
    assert_eq!(body["activeUsers"], 0);
    assert_eq!(server.state.registry.connection_count(), 0);
}

fn settings_with_fast_pings() -> Settings {
    let mut settings = Settings::default();
    settings.websocket.stale_threshold_seconds = 1;
    settings.websocket.ping_interval_ms = 100;
    settings
}

/// Keep reading for `period`, which lets the client answer transport pings
async fn listen_for(client: &mut Client, period: Duration) {
    let deadline = tokio::time::Instant::now() + period;
    while let Ok(frame) = tokio::time::timeout_at(deadline, client.next()).await {
        assert!(matches!(frame, Some(Ok(_))), "connection dropped while listening");
    }
}

#[tokio::test]
async fn test_listening_observer_survives_sweep() {
    let server = TestServer::start(settings_with_fast_pings()).await;
    let mut dashboard = server.connect().await;
    let mut frozen = server.connect().await;
    send_event(&mut dashboard, "observe", json!({})).await;
    send_event(&mut frozen, "observe", json!({})).await;
    sync(&mut dashboard).await;
    sync(&mut frozen).await;

    // Neither sends an event; only the dashboard keeps reading
    listen_for(&mut dashboard, Duration::from_millis(1500)).await;
    let report = server.state.registry.sweep();

    assert_eq!(report.stale_connections, 1);
    assert_eq!(server.state.registry.connection_count(), 1);
    sync(&mut dashboard).await;
}

#[tokio::test]
async fn test_disconnect_all_drops_every_client() {
    let server = TestServer::start(Settings::default()).await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;
    join(&mut alice, "alice").await;
    recv_metrics_until(&mut alice, |u| u.active_users == 1).await;
    join(&mut bob, "bob").await;
    recv_metrics_until(&mut bob, |u| u.active_users == 2).await;

    let (status, body) = get_json(&server, "POST", "/admin/disconnect-all").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disconnectedConnections"], 2);
    assert_eq!(body["removedUsers"], 2);
    assert_eq!(body["activeUsers"], 0);
    assert_eq!(body["totalConnections"], 0);

    for client in [&mut alice, &mut bob] {
        loop {
            match recv(client).await {
                Some(ServerMessage::Shutdown(notice)) => {
                    assert_eq!(notice.reason, "disconnected by operator");
                    break;
                }
                Some(_) => continue,
                None => panic!("closed without a notice"),
            }
        }
        assert!(recv(client).await.is_none());
    }
    assert_eq!(server.state.registry.admission().admitted(), 0);
}
