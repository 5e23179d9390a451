//! Black-box end-to-end WebSocket handshake test, grounded in
//! `original_source/tests/test_ws_server.py`'s style: spin up the real
//! server on an ephemeral port, connect a real client, assert on the frames
//! it sends rather than on internal state.

use std::net::SocketAddr;
use std::sync::Arc;

use broadcast_server::broadcaster::Broadcaster;
use broadcast_server::decoder_factory::PlaceholderDecoderFactory;
use broadcast_server::orchestrator::Orchestrator;
use broadcast_server::settings::Settings;
use broadcast_server::worker::ExecutorMode;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server() -> SocketAddr {
    let dir = std::env::temp_dir().join(format!("ws-handshake-test-{:?}", std::time::Instant::now()));
    std::fs::create_dir_all(&dir).unwrap();
    let settings = Settings::load(dir, "127.0.0.1:0".to_string(), None);

    let (orchestrator, channels, commands_rx) = Orchestrator::new(settings, Arc::new(PlaceholderDecoderFactory), ExecutorMode::Inline);
    tokio::spawn(orchestrator.run(commands_rx));

    let app = Broadcaster::new(channels).router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .unwrap();
    });
    addr
}

#[tokio::test]
async fn welcome_frame_announces_live_mode_and_known_maps() {
    let addr = spawn_server().await;
    let url = format!("ws://{addr}/ws");

    let (mut socket, _response) = tokio_tungstenite::connect_async(url).await.expect("client connects");

    let message = socket.next().await.expect("server sends a frame").expect("frame reads cleanly");
    let Message::Text(text) = message else { panic!("expected a text frame") };
    let frame: Value = serde_json::from_str(&text).unwrap();

    assert_eq!(frame["type"], "connection");
    assert_eq!(frame["mode"], "live");
    assert!(frame["maps_available"].as_array().unwrap().contains(&Value::String("Mirage".to_string())));
    assert_eq!(frame["demo_valid"], false);
}

#[tokio::test]
async fn malformed_command_does_not_close_the_connection() {
    let addr = spawn_server().await;
    let url = format!("ws://{addr}/ws");
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.expect("client connects");

    // Drain the welcome frame.
    let _ = socket.next().await;

    socket.send(Message::Text("{\"type\":\"not_a_real_command\"}".to_string())).await.unwrap();
    socket.send(Message::Text("{\"type\":\"request_demos\"}".to_string())).await.unwrap();

    // The connection should still be alive: a ping sent by us should get a pong back
    // rather than the socket closing outright.
    socket.send(Message::Ping(Vec::new())).await.unwrap();
    let reply = tokio::time::timeout(std::time::Duration::from_secs(2), socket.next())
        .await
        .expect("no timeout")
        .expect("frame present")
        .expect("frame reads cleanly");
    assert!(matches!(reply, Message::Pong(_)));
}
