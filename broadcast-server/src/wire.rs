//! Subscriber-facing wire protocol: one frame type per outbound
//! message, one command enum for everything a subscriber can send back.
//! Grounded in `original_source/server/ws_server.py`'s frame builders
//! (`_welcome_payload`, `_status_payload`, `_demo_list_payload`) and the
//! inbound `handle_command` dispatch.

use serde::{Deserialize, Serialize};

use snapshot_engine::Snapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Live,
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DemoListing {
    pub name: String,
    pub modified: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub message: String,
    pub version: u32,
    pub client_id: u64,
    pub maps_available: Vec<&'static str>,
    pub timestamp: f64,
    pub mode: Mode,
    pub selected_demo: Option<String>,
    pub demos: Vec<DemoListing>,
    pub msgpack_refresh_interval: u64,
    pub map_override: Option<String>,
    pub demo_valid: bool,
    pub demo_loading: bool,
    pub bounds_safe: bool,
}

/// Mirrors the `state`/`connection` tri-state flags. Pushed as a `state`
/// frame on every transition, and embedded in the `connection` welcome
/// frame on first contact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub mode: Mode,
    pub selected_demo: Option<String>,
    pub map_override: Option<String>,
    pub demo_valid: bool,
    pub demo_loading: bool,
    pub bounds_safe: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub message: String,
    pub level: StatusLevel,
    pub expires_in: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DemoListFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub demos: Vec<DemoListing>,
    pub mode: Mode,
    pub selected_demo: Option<String>,
}

/// The `position_update` frame: a `Snapshot` plus the rolling encoder
/// bookkeeping fields. Flattened so the wire shape matches
/// `Snapshot`'s own fields one level deep, the way the original embeds
/// `_msg_bytes`/`_compression_rate` directly in the payload dict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionUpdateFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    #[serde(flatten)]
    pub data: Snapshot,
    #[serde(rename = "_msg_bytes")]
    pub msg_bytes: u64,
    #[serde(rename = "_compression_rate")]
    pub compression_rate: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAction {
    Play,
    Pause,
    Seek,
    Speed,
}

/// Everything a subscriber can ask the orchestrator to do.
/// Deserialized directly off an inbound text frame; anything that doesn't
/// match this shape is dropped, matching the "ignore malformed" rule in §7.
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundCommand {
    SetMode {
        mode: Mode,
    },
    SelectDemo {
        name: String,
    },
    Playback {
        action: PlaybackAction,
        tick: Option<i64>,
        time: Option<f64>,
        speed: Option<f64>,
    },
    SetSampling {
        interval: f64,
    },
    SetMapOverride {
        map: String,
    },
    RequestDemos,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_demo_command_round_trips_through_json() {
        let raw = r#"{"type":"select_demo","name":"match1.dem"}"#;
        let cmd: InboundCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(cmd, InboundCommand::SelectDemo { name } if name == "match1.dem"));
    }

    #[test]
    fn playback_command_parses_optional_fields() {
        let raw = r#"{"type":"playback","action":"seek","tick":1000}"#;
        let cmd: InboundCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            InboundCommand::Playback { action, tick, time, speed } => {
                assert_eq!(action, PlaybackAction::Seek);
                assert_eq!(tick, Some(1000));
                assert_eq!(time, None);
                assert_eq!(speed, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn malformed_command_fails_to_deserialize() {
        let raw = r#"{"type":"not_a_real_command"}"#;
        assert!(serde_json::from_str::<InboundCommand>(raw).is_err());
    }
}

impl std::fmt::Debug for InboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InboundCommand::SetMode { mode } => f.debug_struct("SetMode").field("mode", mode).finish(),
            InboundCommand::SelectDemo { name } => f.debug_struct("SelectDemo").field("name", name).finish(),
            InboundCommand::Playback { action, tick, time, speed } => f
                .debug_struct("Playback")
                .field("action", action)
                .field("tick", tick)
                .field("time", time)
                .field("speed", speed)
                .finish(),
            InboundCommand::SetSampling { interval } => f.debug_struct("SetSampling").field("interval", interval).finish(),
            InboundCommand::SetMapOverride { map } => f.debug_struct("SetMapOverride").field("map", map).finish(),
            InboundCommand::RequestDemos => f.write_str("RequestDemos"),
        }
    }
}
