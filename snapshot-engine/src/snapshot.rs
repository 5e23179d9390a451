//! The condensed world-state record emitted per successful poll, plus the
//! transport/telemetry metadata fields carried alongside it. Grounded in
//! `original_source/server/demo_parser.py::_build_snapshot`.

use serde::{Deserialize, Serialize};

use crate::bounds::{Transform, WorldBounds, ZRange};
use crate::events::{BombStateFull, EventRecord, KillFeedEntry, Position, ScoreState};
use crate::map_registry::MapDefinition;
use crate::player::{Player, TeamEconomy};

/// The compiled-in `MapDefinition` plus whatever world bounds/transform/
/// z-range this demo resolved, serialized the way the broadcaster's map
/// override merges over it. Absent when the map has no
/// compiled-in definition (a registry lookup miss).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MapConfig {
    pub name: String,
    pub scale: f64,
    pub width: u32,
    pub height: u32,
    pub radar_scale: f64,
    pub origin_x: f64,
    pub origin_y: f64,
    pub spawns_t: Vec<(f64, f64)>,
    pub spawns_ct: Vec<(f64, f64)>,
    pub world_bounds: Option<WorldBounds>,
    pub world_transform: Option<Transform>,
    pub z_range: Option<ZRange>,
}

impl MapConfig {
    pub fn from_definition(
        def: &MapDefinition,
        world_bounds: Option<WorldBounds>,
        world_transform: Option<Transform>,
        z_range: Option<ZRange>,
    ) -> Self {
        Self {
            name: def.key.to_string(),
            scale: def.display_scale,
            width: def.radar_width,
            height: def.radar_height,
            radar_scale: def.radar_scale,
            origin_x: def.origin_x,
            origin_y: def.origin_y,
            spawns_t: def.spawns_t.to_vec(),
            spawns_ct: def.spawns_ct.to_vec(),
            world_bounds,
            world_transform,
            z_range,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MoneySummary {
    pub ct: f64,
    pub t: f64,
    pub ct_status: String,
    pub t_status: String,
}

impl MoneySummary {
    pub fn from_economy(ct: TeamEconomy, t: TeamEconomy) -> Self {
        Self {
            ct: ct.total,
            t: t.total,
            ct_status: ct.status().as_str().to_string(),
            t_status: t.status().as_str().to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BombSnapshot {
    pub planted: bool,
    pub position: Option<Position>,
    pub planter: Option<String>,
}

impl From<&BombStateFull> for BombSnapshot {
    fn from(state: &BombStateFull) -> Self {
        Self {
            planted: state.planted,
            position: state.position,
            planter: state.planter.clone(),
        }
    }
}

/// `data_source` distinguishes a LIVE tail from a MANUAL scrub in the wire
/// frame, matching the original's `data_source` string field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Live,
    Manual,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub map: Option<String>,
    pub map_config: Option<MapConfig>,
    pub round: u32,
    pub time: f64,
    pub ct_score: u32,
    pub t_score: u32,
    pub money: MoneySummary,
    pub players: Vec<Player>,
    pub alive_ct: u32,
    pub alive_t: u32,
    pub kill_feed: Vec<KillFeedEntry>,
    pub events: Vec<EventRecord>,
    pub bomb_planted: bool,
    pub bomb: BombSnapshot,
    pub tick: i64,
    pub data_source: DataSource,

    #[serde(rename = "_parse_ms")]
    pub parse_ms: f64,
    #[serde(rename = "_demo_time")]
    pub demo_time: f64,
    #[serde(rename = "_demo_tick_rate")]
    pub demo_tick_rate: f64,
    #[serde(rename = "_demo_remaining")]
    pub demo_remaining: f64,
    #[serde(rename = "_demo_data_rate_bps")]
    pub demo_data_rate_bps: Option<f64>,
    #[serde(rename = "_file_size")]
    pub file_size: u64,
    #[serde(rename = "_update_count")]
    pub update_count: u64,
    #[serde(rename = "_avg_parse_ms")]
    pub avg_parse_ms: f64,
    #[serde(rename = "_cmd_count")]
    pub cmd_count: u64,
    #[serde(rename = "_server_ts")]
    pub server_ts: f64,
    #[serde(rename = "_file_mtime")]
    pub file_mtime: f64,
    #[serde(rename = "_live_lag_sec")]
    pub live_lag_sec: f64,
    #[serde(rename = "_poll_interval")]
    pub poll_interval: f64,
    #[serde(rename = "_demo_total_ticks")]
    pub demo_total_ticks: Option<u64>,
}

impl Snapshot {
    pub fn build(
        score: ScoreState,
        money: MoneySummary,
        players: Vec<Player>,
        alive_ct: u32,
        alive_t: u32,
        kill_feed: Vec<KillFeedEntry>,
        events: Vec<EventRecord>,
        bomb: &BombStateFull,
        tick: i64,
        data_source: DataSource,
    ) -> Self {
        Self {
            map: None,
            map_config: None,
            round: score.round_number,
            time: 0.0,
            ct_score: score.ct_score,
            t_score: score.t_score,
            money,
            players,
            alive_ct,
            alive_t,
            kill_feed,
            events,
            bomb_planted: bomb.planted,
            bomb: bomb.into(),
            tick,
            data_source,
            parse_ms: 0.0,
            demo_time: 0.0,
            demo_tick_rate: 0.0,
            demo_remaining: 0.0,
            demo_data_rate_bps: None,
            file_size: 0,
            update_count: 0,
            avg_parse_ms: 0.0,
            cmd_count: 0,
            server_ts: 0.0,
            file_mtime: 0.0,
            live_lag_sec: 0.0,
            poll_interval: 0.0,
            demo_total_ticks: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::TeamEconomy;

    #[test]
    fn money_summary_reports_team_status_labels() {
        let ct = TeamEconomy { total: 25000.0 };
        let t = TeamEconomy { total: 1000.0 };
        let summary = MoneySummary::from_economy(ct, t);
        assert_eq!(summary.ct_status, "Full Buy");
        assert_eq!(summary.t_status, "Eco");
    }

    #[test]
    fn bomb_snapshot_mirrors_collector_state() {
        let state = BombStateFull {
            planted: true,
            position: Some(Position { x: 1.0, y: 2.0, z: 3.0 }),
            planter: Some("p1".to_string()),
        };
        let snap: BombSnapshot = (&state).into();
        assert!(snap.planted);
        assert_eq!(snap.planter.as_deref(), Some("p1"));
    }
}
