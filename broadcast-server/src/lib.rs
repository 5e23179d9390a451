//! Broadcasts condensed CS-demo world-state snapshots to WebSocket
//! subscribers, tailing the newest demo in LIVE mode or scrubbing a selected
//! one in MANUAL mode. See `orchestrator` for the polling/mode state machine
//! and `broadcaster` for the subscriber-facing transport.

pub mod broadcaster;
pub mod decoder_factory;
pub mod orchestrator;
pub mod settings;
pub mod wire;
pub mod worker;

/// All compiled-in map keys, for the `connection` frame's `maps_available`
/// field.
pub fn map_registry_keys() -> Vec<&'static str> {
    snapshot_engine::MapRegistry::keys().collect()
}
