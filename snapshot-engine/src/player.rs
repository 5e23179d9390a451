//! Builds the per-tick player list and team economy from raw decoder rows.
//! Grounded in `original_source/server/demo_parser.py::_build_players` and
//! `_economy_summary`, restructured as a typed value the way
//! `analysis/src/player.rs` turns a raw packet into one.

use std::collections::HashMap;

use dem_proto::{FieldValue, Row, Team};
use serde::{Deserialize, Serialize};

use crate::bounds::ObservedBounds;

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
    pub team: Team,
    pub is_alive: bool,
    pub health: f64,
    pub armor: f64,
    pub has_helmet: bool,
    pub money: f64,
    pub weapon: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuyStatus {
    FullBuy,
    HalfBuy,
    ForceBuy,
    Eco,
}

impl BuyStatus {
    /// `total / 5` is a fixed per-player average divisor, independent of
    /// how many players actually reported a balance.
    pub fn from_team_total(total: f64) -> Self {
        let average = total / 5.0;
        if average >= 5000.0 {
            BuyStatus::FullBuy
        } else if average >= 3000.0 {
            BuyStatus::HalfBuy
        } else if average >= 2000.0 {
            BuyStatus::ForceBuy
        } else {
            BuyStatus::Eco
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuyStatus::FullBuy => "Full Buy",
            BuyStatus::HalfBuy => "Half Buy",
            BuyStatus::ForceBuy => "Force Buy",
            BuyStatus::Eco => "Eco",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TeamEconomy {
    pub total: f64,
}

impl TeamEconomy {
    pub fn status(&self) -> BuyStatus {
        BuyStatus::from_team_total(self.total)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BuildResult {
    pub players: Vec<Player>,
    pub alive_ct: u32,
    pub alive_t: u32,
    pub economy_ct: TeamEconomy,
    pub economy_t: TeamEconomy,
}

const ID_KEYS: &[&str] = &["steamid", "steamid64", "player", "userid"];
const HEALTH_KEYS: &[&str] = &["health"];
const ARMOR_KEYS: &[&str] = &["armor_value", "armor"];
const HELMET_KEYS: &[&str] = &["has_helmet", "helmet"];
const MONEY_KEYS: &[&str] = &["balance", "money"];
const WEAPON_KEYS: &[&str] = &["active_weapon", "weapon"];
const TEAM_KEYS: &[&str] = &["team_num", "team"];
const LIFE_STATE_KEYS: &[&str] = &["life_state"];
const POSITION_ALIAS_KEYS: &[&str] = &["origin", "position", "pos"];

fn resolve_id(row: &Row) -> Option<String> {
    let value = row.get_any(ID_KEYS)?;
    match value {
        FieldValue::Str(s) => Some(s.clone()),
        other => other.as_i64().map(|n| n.to_string()),
    }
}

fn resolve_position(row: &Row) -> Option<(f64, f64, f64)> {
    let x = row.get("X").or_else(|| row.get("x")).and_then(FieldValue::as_f64);
    let y = row.get("Y").or_else(|| row.get("y")).and_then(FieldValue::as_f64);
    if let (Some(x), Some(y)) = (x, y) {
        let z = row
            .get("Z")
            .or_else(|| row.get("z"))
            .and_then(FieldValue::as_f64)
            .unwrap_or(0.0);
        return Some((x, y, z));
    }
    let vec3 = row.get_any(POSITION_ALIAS_KEYS)?.as_vec3()?;
    Some((vec3[0], vec3[1], vec3[2]))
}

/// SnapshotBuilder: raw per-tick rows + a name table -> a `Player` list plus
/// derived alive counts and team economy. Widens `bounds` in place when the
/// demo's bounds aren't fixed yet.
pub struct SnapshotBuilder;

impl SnapshotBuilder {
    pub fn build(
        rows: &[Row],
        names: &HashMap<String, String>,
        bounds: &mut ObservedBounds,
        fixed_bounds: bool,
    ) -> BuildResult {
        let mut result = BuildResult::default();

        for row in rows {
            let team = row
                .get_any(TEAM_KEYS)
                .and_then(FieldValue::as_i64)
                .map(Some)
                .map(Team::from_team_num)
                .unwrap_or(Team::Unknown);

            // Economy is accumulated over every row with a balance, regardless
            // of whether that row survives the position/alive checks below.
            if let Some(money) = row.get_any(MONEY_KEYS).and_then(FieldValue::as_f64) {
                match team {
                    Team::Ct => result.economy_ct.total += money,
                    Team::T => result.economy_t.total += money,
                    Team::Unknown => {}
                }
            }

            let id = resolve_id(row);
            let Some((x, y, z)) = resolve_position(row) else {
                continue;
            };

            let display_name = id
                .as_ref()
                .and_then(|id| names.get(id).cloned())
                .unwrap_or_else(|| match &id {
                    Some(id) => format!("Player_{id}"),
                    None => "Player".to_string(),
                });

            let health = row.get_any(HEALTH_KEYS).and_then(FieldValue::as_f64).unwrap_or(0.0);

            let is_alive = match row.get_any(LIFE_STATE_KEYS).and_then(FieldValue::as_i64) {
                Some(life_state) => life_state == 0,
                None => health > 0.0,
            };

            if !is_alive && health <= 0.0 {
                continue;
            }

            if !fixed_bounds {
                bounds.widen(x, y);
            }

            let armor = row.get_any(ARMOR_KEYS).and_then(FieldValue::as_f64).unwrap_or(0.0);
            let has_helmet = row.get_any(HELMET_KEYS).and_then(FieldValue::as_bool).unwrap_or(false);
            let money = row.get_any(MONEY_KEYS).and_then(FieldValue::as_f64).unwrap_or(0.0);
            let weapon = row
                .get_any(WEAPON_KEYS)
                .and_then(FieldValue::as_str)
                .map(str::to_string);
            let yaw = row.get_any(&["yaw"]).and_then(FieldValue::as_f64).unwrap_or(0.0);

            match team {
                Team::Ct => {
                    if is_alive {
                        result.alive_ct += 1;
                    }
                }
                Team::T => {
                    if is_alive {
                        result.alive_t += 1;
                    }
                }
                Team::Unknown => {}
            }

            result.players.push(Player {
                id: id.unwrap_or_default(),
                name: display_name,
                x: round_to(x, 2),
                y: round_to(y, 2),
                z: round_to(z, 2),
                yaw: round_to(yaw, 1),
                team,
                is_alive,
                health,
                armor,
                has_helmet,
                money,
                weapon,
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with(team_num: i64, health: f64, x: f64, y: f64) -> Row {
        Row::new(Some(10))
            .with("steamid64", FieldValue::Int(1))
            .with("team_num", FieldValue::Int(team_num))
            .with("health", FieldValue::Float(health))
            .with("X", FieldValue::Float(x))
            .with("Y", FieldValue::Float(y))
            .with("Z", FieldValue::Float(0.0))
            .with("balance", FieldValue::Int(4500))
    }

    #[test]
    fn drops_rows_with_no_position() {
        let row = Row::new(Some(1)).with("steamid64", FieldValue::Int(1));
        let mut bounds = ObservedBounds::default();
        let result = SnapshotBuilder::build(&[row], &HashMap::new(), &mut bounds, false);
        assert!(result.players.is_empty());
    }

    #[test]
    fn dead_player_with_nonpositive_health_is_omitted() {
        let row = row_with(3, 0.0, 100.0, 100.0);
        let mut bounds = ObservedBounds::default();
        let result = SnapshotBuilder::build(&[row], &HashMap::new(), &mut bounds, false);
        assert!(result.players.is_empty());
        assert_eq!(result.alive_ct, 0);
    }

    #[test]
    fn alive_counts_split_by_team() {
        let ct = row_with(3, 100.0, 1.0, 2.0);
        let t = row_with(2, 100.0, -1.0, -2.0);
        let mut bounds = ObservedBounds::default();
        let result = SnapshotBuilder::build(&[ct, t], &HashMap::new(), &mut bounds, false);
        assert_eq!(result.alive_ct, 1);
        assert_eq!(result.alive_t, 1);
        assert_eq!(result.players.len(), 2);
    }

    #[test]
    fn unnamed_player_synthesizes_name_from_id() {
        let row = row_with(3, 100.0, 1.0, 1.0);
        let mut bounds = ObservedBounds::default();
        let result = SnapshotBuilder::build(&[row], &HashMap::new(), &mut bounds, false);
        assert_eq!(result.players[0].name, "Player_1");
    }

    #[test]
    fn fixed_bounds_are_never_widened() {
        let row = row_with(3, 100.0, 5000.0, 5000.0);
        let mut bounds = ObservedBounds::default();
        SnapshotBuilder::build(&[row], &HashMap::new(), &mut bounds, true);
        assert!(bounds.get().is_none());
    }

    #[test]
    fn dead_players_balance_still_counts_toward_economy() {
        let row = row_with(3, 0.0, 100.0, 100.0);
        let mut bounds = ObservedBounds::default();
        let result = SnapshotBuilder::build(&[row], &HashMap::new(), &mut bounds, false);
        assert!(result.players.is_empty());
        assert_eq!(result.economy_ct.total, 4500.0);
    }

    #[test]
    fn buy_status_thresholds() {
        assert_eq!(BuyStatus::from_team_total(25000.0), BuyStatus::FullBuy);
        assert_eq!(BuyStatus::from_team_total(15000.0), BuyStatus::HalfBuy);
        assert_eq!(BuyStatus::from_team_total(10000.0), BuyStatus::ForceBuy);
        assert_eq!(BuyStatus::from_team_total(1000.0), BuyStatus::Eco);
    }

    #[test]
    fn coordinates_round_to_spec_precision() {
        let row = Row::new(Some(1))
            .with("steamid64", FieldValue::Int(1))
            .with("X", FieldValue::Float(1.005))
            .with("Y", FieldValue::Float(2.004))
            .with("health", FieldValue::Float(100.0))
            .with("yaw", FieldValue::Float(90.06));
        let mut bounds = ObservedBounds::default();
        let result = SnapshotBuilder::build(&[row], &HashMap::new(), &mut bounds, false);
        let player = &result.players[0];
        assert_eq!(player.y, 2.0);
        assert_eq!(player.yaw, 90.1);
    }
}
