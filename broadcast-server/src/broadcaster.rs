//! Per-connection WebSocket handling: the `axum` upgrade, welcome frame,
//! replay of buffered snapshots, inbound command dispatch, and outbound
//! status/state/demo_list/position_update frames. Grounded in
//! `examples/flyingrobots-echo/crates/echo-session-ws-gateway/src/main.rs`'s
//! writer-task-plus-select! shape, applied to the frames in `wire.rs`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use snapshot_engine::Snapshot;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::map_registry_keys;
use crate::orchestrator::{OrchestratorChannels, REPLAY_ON_CONNECT};
use crate::wire::{ConnectionFrame, InboundCommand, PositionUpdateFrame};

const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
const PING_INTERVAL: Duration = Duration::from_secs(15);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const WIRE_PROTOCOL_VERSION: u32 = 1;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct Broadcaster {
    channels: OrchestratorChannels,
}

impl Broadcaster {
    pub fn new(channels: OrchestratorChannels) -> Self {
        Self { channels }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/ws", get(upgrade))
            .route("/healthz", get(healthz))
            .with_state(Arc::new(self))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(broadcaster): State<Arc<Broadcaster>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, addr, broadcaster))
}

/// Picks the wire encoding for one frame per the refresh-interval
/// rule: the frame content is always rebuilt from the current snapshot, only
/// the `_msg_bytes`/`_compression_rate` bookkeeping numbers are allowed to
/// lag between refreshes.
struct Encoder {
    enabled: bool,
    refresh_interval: u64,
    frames_since_refresh: u64,
    last_msg_bytes: u64,
    last_compression_rate: f64,
}

impl Encoder {
    fn new(enabled: bool, refresh_interval: u64) -> Self {
        Self {
            enabled,
            refresh_interval: refresh_interval.max(1),
            frames_since_refresh: 0,
            last_msg_bytes: 0,
            last_compression_rate: 0.0,
        }
    }

    /// Returns the frame to send as a `Message`, plus the (binary, text)
    /// byte counts for `BroadcastStats`. `refresh_interval` is read live off
    /// the orchestrator's sampling setting on every call, so an operator's
    /// `set_sampling` command takes effect on the next frame.
    fn encode(
        &mut self,
        snapshot: &Snapshot,
        stats: &crate::orchestrator::BroadcastStats,
        refresh_interval: u64,
    ) -> Option<Message> {
        self.refresh_interval = refresh_interval.max(1);
        let text_payload = serde_json::to_string(snapshot).ok()?;
        let text_bytes = text_payload.len() as u64;

        if !self.enabled {
            stats.record_text(text_payload.len());
            let frame = PositionUpdateFrame {
                frame_type: "position_update",
                data: snapshot.clone(),
                msg_bytes: text_bytes,
                compression_rate: 0.0,
            };
            let encoded = serde_json::to_string(&frame).ok()?;
            return Some(Message::Text(encoded));
        }

        let due_for_refresh = self.frames_since_refresh == 0 || self.frames_since_refresh >= self.refresh_interval;
        if due_for_refresh {
            match rmp_serde::to_vec_named(snapshot) {
                Ok(binary) => {
                    self.last_msg_bytes = binary.len() as u64;
                    self.last_compression_rate = if text_bytes > 0 {
                        (binary.len() as f64 / text_bytes as f64) * 100.0
                    } else {
                        0.0
                    };
                    self.frames_since_refresh = 1;
                }
                Err(_) => {
                    stats.record_encode_failure();
                    self.frames_since_refresh = 1;
                }
            }
        } else {
            self.frames_since_refresh += 1;
        }

        stats.record_text(text_payload.len());
        stats.record_binary(self.last_msg_bytes as usize);

        let frame = PositionUpdateFrame {
            frame_type: "position_update",
            data: snapshot.clone(),
            msg_bytes: self.last_msg_bytes,
            compression_rate: self.last_compression_rate,
        };

        match rmp_serde::to_vec_named(&frame) {
            Ok(binary) => Some(Message::Binary(binary)),
            Err(_) => serde_json::to_string(&frame).ok().map(Message::Text),
        }
    }
}

async fn handle_connection(socket: WebSocket, addr: SocketAddr, broadcaster: Arc<Broadcaster>) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let channels = broadcaster.channels.clone();
    channels.stats.client_connected();
    info!(%addr, client_id, "subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
    });

    if let Err(err) = send_welcome(&out_tx, client_id, &channels).await {
        warn!(%addr, client_id, error = %err, "failed to send welcome frame");
    }

    let mut msgpack_refresh = channels.msgpack_refresh_interval.clone();

    {
        let replay = channels.replay.lock().await;
        let start = replay.len().saturating_sub(REPLAY_ON_CONNECT);
        let refresh_interval = *msgpack_refresh.borrow();
        for snapshot in replay.iter().skip(start) {
            if let Some(message) = encode_once(snapshot, channels.msgpack_enabled, refresh_interval) {
                if out_tx.send(message).await.is_err() {
                    break;
                }
            }
        }
    }

    let mut snapshots = channels.snapshots.subscribe();
    let mut status = channels.status.clone();
    let mut demo_list = channels.demo_list.clone();
    let mut state = channels.state.clone();
    let mut encoder = Encoder::new(channels.msgpack_enabled, *msgpack_refresh.borrow());

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<InboundCommand>(&text) {
                            Ok(command) => {
                                if channels.commands.send(command).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!(%addr, client_id, error = %err, "dropping malformed command"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%addr, client_id, error = %err, "websocket read error");
                        break;
                    }
                }
            }
            changed = snapshots.recv() => {
                match changed {
                    Ok(snapshot) => {
                        let refresh_interval = *msgpack_refresh.borrow_and_update();
                        if let Some(message) = encoder.encode(&snapshot, &channels.stats, refresh_interval) {
                            if out_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%addr, client_id, skipped, "subscriber fell behind snapshot fan-out");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            Ok(()) = status.changed() => {
                if let Some(frame) = status.borrow_and_update().clone() {
                    if let Ok(text) = serde_json::to_string(&frame) {
                        if out_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(()) = demo_list.changed() => {
                let frame = demo_list.borrow_and_update().clone();
                if let Ok(text) = serde_json::to_string(&frame) {
                    if out_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
            Ok(()) = state.changed() => {
                let frame = state.borrow_and_update().clone();
                if let Ok(text) = serde_json::to_string(&frame) {
                    if out_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if awaiting_pong {
                    warn!(%addr, client_id, "no pong within {:?}, closing", PONG_TIMEOUT);
                    break;
                }
                awaiting_pong = true;
                if out_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    channels.stats.client_disconnected();
    drop(out_tx);
    let _ = writer.await;
    info!(%addr, client_id, "subscriber disconnected");
}

fn encode_once(snapshot: &Snapshot, msgpack_enabled: bool, refresh_interval: u64) -> Option<Message> {
    let mut encoder = Encoder::new(msgpack_enabled, refresh_interval);
    let stats = crate::orchestrator::BroadcastStats::default();
    encoder.encode(snapshot, &stats)
}

async fn send_welcome(
    out_tx: &mpsc::Sender<Message>,
    client_id: u64,
    channels: &OrchestratorChannels,
) -> Result<(), mpsc::error::SendError<Message>> {
    let state = channels.state.borrow().clone();
    let demo_list = channels.demo_list.borrow().clone();

    let frame = ConnectionFrame {
        frame_type: "connection",
        message: "connected".to_string(),
        version: WIRE_PROTOCOL_VERSION,
        client_id,
        maps_available: map_registry_keys(),
        timestamp: unix_time_secs(),
        mode: state.mode,
        selected_demo: state.selected_demo,
        demos: demo_list.demos,
        msgpack_refresh_interval: *channels.msgpack_refresh_interval.borrow(),
        map_override: state.map_override,
        demo_valid: state.demo_valid,
        demo_loading: state.demo_loading,
        bounds_safe: state.bounds_safe,
    };

    let encoded = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
    out_tx.send(Message::Text(encoded)).await
}

fn unix_time_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
