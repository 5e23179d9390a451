//! EventCollector: collates game events across polls into a bounded ring,
//! advances per-event high-water marks, and drives the bomb/round/score
//! state machine. Grounded in `original_source/server/events.py`
//! (`EventCollector`, `_extract_position`, `_resolve_winner`).

use std::collections::{HashMap, VecDeque};

use dem_proto::{DecoderError, DemoDecoder, FieldValue, Row, Team};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const EVENTS_CAPACITY: usize = 20;
const KILL_FEED_CAPACITY: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    RoundStart,
    RoundEnd,
    PlayerDeath,
    BombPlanted,
    BombDefused,
    BombExploded,
    WeaponFire,
    PlayerHurt,
    PlayerBlind,
    HeGrenadeDetonate,
    FlashbangDetonate,
    SmokeGrenadeDetonate,
    SmokeGrenadeExpired,
    MolotovDetonate,
    DecoyDetonate,
}

impl EventKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventKind::RoundStart => "round_start",
            EventKind::RoundEnd => "round_end",
            EventKind::PlayerDeath => "player_death",
            EventKind::BombPlanted => "bomb_planted",
            EventKind::BombDefused => "bomb_defused",
            EventKind::BombExploded => "bomb_exploded",
            EventKind::WeaponFire => "weapon_fire",
            EventKind::PlayerHurt => "player_hurt",
            EventKind::PlayerBlind => "player_blind",
            EventKind::HeGrenadeDetonate => "hegrenade_detonate",
            EventKind::FlashbangDetonate => "flashbang_detonate",
            EventKind::SmokeGrenadeDetonate => "smokegrenade_detonate",
            EventKind::SmokeGrenadeExpired => "smokegrenade_expired",
            EventKind::MolotovDetonate => "molotov_detonate",
            EventKind::DecoyDetonate => "decoy_detonate",
        }
    }

    /// Candidate decoder event names, most preferred first. A demo may
    /// record the same canonical event under a different name, e.g. an
    /// early-round variant of `round_start`.
    fn candidates(&self) -> &'static [&'static str] {
        match self {
            EventKind::RoundStart => &["round_start", "round_prestart"],
            EventKind::RoundEnd => &["round_end"],
            EventKind::PlayerDeath => &["player_death"],
            EventKind::BombPlanted => &["bomb_planted"],
            EventKind::BombDefused => &["bomb_defused"],
            EventKind::BombExploded => &["bomb_exploded"],
            EventKind::WeaponFire => &["weapon_fire"],
            EventKind::PlayerHurt => &["player_hurt"],
            EventKind::PlayerBlind => &["player_blind"],
            EventKind::HeGrenadeDetonate => &["hegrenade_detonate"],
            EventKind::FlashbangDetonate => &["flashbang_detonate"],
            EventKind::SmokeGrenadeDetonate => &["smokegrenade_detonate"],
            EventKind::SmokeGrenadeExpired => &["smokegrenade_expired"],
            EventKind::MolotovDetonate => &["molotov_detonate", "inferno_startburn"],
            EventKind::DecoyDetonate => &["decoy_detonate"],
        }
    }

    const ALL: [EventKind; 15] = [
        EventKind::RoundStart,
        EventKind::RoundEnd,
        EventKind::PlayerDeath,
        EventKind::BombPlanted,
        EventKind::BombDefused,
        EventKind::BombExploded,
        EventKind::WeaponFire,
        EventKind::PlayerHurt,
        EventKind::PlayerBlind,
        EventKind::HeGrenadeDetonate,
        EventKind::FlashbangDetonate,
        EventKind::SmokeGrenadeDetonate,
        EventKind::SmokeGrenadeExpired,
        EventKind::MolotovDetonate,
        EventKind::DecoyDetonate,
    ];
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.wire_name() == name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown event type {name:?}")))
    }
}

/// A world-space point, wire-shaped as `{x, y, z}` to match the decoder's own
/// position dicts rather than a bare coordinate tuple.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub tick: i64,
    pub victim: Option<String>,
    pub attacker: Option<String>,
    pub player: Option<String>,
    pub winner: Option<Team>,
    pub position: Option<Position>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KillFeedEntry {
    pub killer: String,
    pub victim: String,
    pub killer_team: Team,
    pub weapon: String,
    pub headshot: bool,
    pub time: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BombStateFull {
    pub planted: bool,
    pub position: Option<Position>,
    pub planter: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ScoreState {
    pub round_number: u32,
    pub ct_score: u32,
    pub t_score: u32,
}

const POSITION_PREFIXES: &[&str] = &["", "pos_", "position_", "user_", "attacker_", "victim_", "assister_"];

/// Tries each key-prefix/axis-letter-casing combination in priority order;
/// the first prefix with a complete `(x, y)` pair wins, `z` defaults to 0.
fn extract_position(row: &Row) -> Option<Position> {
    for prefix in POSITION_PREFIXES {
        let x = row
            .get(&format!("{prefix}x"))
            .or_else(|| row.get(&format!("{prefix}X")))
            .and_then(FieldValue::as_f64);
        let y = row
            .get(&format!("{prefix}y"))
            .or_else(|| row.get(&format!("{prefix}Y")))
            .and_then(FieldValue::as_f64);
        if let (Some(x), Some(y)) = (x, y) {
            let z = row
                .get(&format!("{prefix}z"))
                .or_else(|| row.get(&format!("{prefix}Z")))
                .and_then(FieldValue::as_f64)
                .unwrap_or(0.0);
            return Some(Position { x, y, z });
        }
    }
    None
}

fn resolve_winner(value: &FieldValue) -> Option<Team> {
    if let Some(n) = value.as_i64() {
        return Some(Team::from_team_num(Some(n)));
    }
    let s = value.as_str()?;
    let upper = s.to_uppercase();
    if upper.contains("CT") || upper.contains("COUNTER") {
        Some(Team::Ct)
    } else if upper.contains('T') || upper.contains("TERRORIST") {
        Some(Team::T)
    } else {
        None
    }
}

fn string_field(row: &Row, keys: &[&str]) -> Option<String> {
    row.get_any(keys).map(|v| match v {
        FieldValue::Str(s) => s.clone(),
        other => other.as_i64().map(|n| n.to_string()).unwrap_or_default(),
    })
}

pub struct EventCollector {
    resolved: HashMap<EventKind, String>,
    last_tick: HashMap<EventKind, i64>,
    events: VecDeque<EventRecord>,
    kill_feed: VecDeque<KillFeedEntry>,
    bomb: BombStateFull,
    score: ScoreState,
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            resolved: HashMap::new(),
            last_tick: EventKind::ALL.iter().map(|k| (*k, -1)).collect(),
            events: VecDeque::with_capacity(EVENTS_CAPACITY),
            kill_feed: VecDeque::with_capacity(KILL_FEED_CAPACITY),
            bomb: BombStateFull::default(),
            score: ScoreState::default(),
        }
    }

    /// Pick the first candidate name present in `available` for each
    /// canonical event type. Call once per demo, after the decoder's event
    /// list is known.
    pub fn resolve_event_names(&mut self, available: &[String]) {
        self.resolved.clear();
        for kind in EventKind::ALL {
            if let Some(name) = kind.candidates().iter().find(|c| available.iter().any(|a| a == *c)) {
                self.resolved.insert(kind, name.to_string());
            }
        }
    }

    pub fn events(&self) -> impl Iterator<Item = &EventRecord> {
        self.events.iter()
    }

    pub fn kill_feed(&self) -> impl Iterator<Item = &KillFeedEntry> {
        self.kill_feed.iter()
    }

    pub fn bomb(&self) -> &BombStateFull {
        &self.bomb
    }

    pub fn score(&self) -> ScoreState {
        self.score
    }

    pub fn reset_state(&mut self) {
        self.last_tick = EventKind::ALL.iter().map(|k| (*k, -1)).collect();
        self.events.clear();
        self.kill_feed.clear();
        self.bomb = BombStateFull::default();
        self.score = ScoreState::default();
    }

    fn push_event(&mut self, record: EventRecord) {
        if self.events.len() == EVENTS_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(record);
    }

    fn batch(&self, decoder: &mut dyn DemoDecoder) -> HashMap<String, Vec<Row>> {
        let names: Vec<String> = self.resolved.values().cloned().collect();
        let extra_fields = vec!["X".to_string(), "Y".to_string(), "Z".to_string()];
        match decoder.parse_events(&names, &extra_fields) {
            Ok(batch) => batch,
            Err(_) => {
                let mut merged = HashMap::new();
                for name in &names {
                    if let Ok(batch) = decoder.parse_events(std::slice::from_ref(name), &extra_fields) {
                        merged.extend(batch);
                    }
                }
                merged
            }
        }
    }

    /// Pull newly-available rows for every resolved event name, applying
    /// type-specific effects and advancing high-water marks. `max_tick` caps
    /// which rows are accepted this poll (None accepts everything newer than
    /// the high-water mark).
    pub fn refresh(&mut self, decoder: &mut dyn DemoDecoder, max_tick: Option<i64>) -> Result<(), DecoderError> {
        let batch = self.batch(decoder);

        for kind in EventKind::ALL {
            let Some(name) = self.resolved.get(&kind).cloned() else {
                continue;
            };
            let Some(rows) = batch.get(&name) else {
                continue;
            };

            let last_tick = *self.last_tick.get(&kind).unwrap_or(&-1);
            let mut accepted: Vec<&Row> = rows
                .iter()
                .filter(|row| match row.tick {
                    Some(tick) => tick > last_tick && max_tick.map(|max| tick <= max).unwrap_or(true),
                    None => false,
                })
                .collect();
            accepted.sort_by_key(|row| row.tick);

            if accepted.is_empty() {
                continue;
            }

            let new_high_water = accepted.iter().filter_map(|r| r.tick).max().unwrap_or(last_tick);
            self.last_tick.insert(kind, new_high_water);

            for row in &accepted {
                self.apply(kind, row);
            }
        }

        Ok(())
    }

    fn apply(&mut self, kind: EventKind, row: &Row) {
        let tick = row.tick.unwrap_or(0);
        let position = extract_position(row);

        match kind {
            EventKind::RoundStart => {
                self.score.round_number += 1;
                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim: None,
                    attacker: None,
                    player: None,
                    winner: None,
                    position,
                });
            }
            EventKind::RoundEnd => {
                let winner = row.get_any(&["winner", "team"]).and_then(resolve_winner);
                match winner {
                    Some(Team::Ct) => self.score.ct_score += 1,
                    Some(Team::T) => self.score.t_score += 1,
                    _ => {}
                }
                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim: None,
                    attacker: None,
                    player: None,
                    winner,
                    position,
                });
            }
            EventKind::PlayerDeath => {
                let victim = string_field(row, &["victim", "victim_name", "target"]);
                let attacker = string_field(row, &["attacker", "attacker_name"]);
                let weapon = string_field(row, &["weapon"]).unwrap_or_else(|| "unknown".to_string());
                let headshot = row.get_any(&["headshot"]).and_then(FieldValue::as_bool).unwrap_or(false);
                let attacker_team = row
                    .get_any(&["attacker_team_num", "attacker_team"])
                    .and_then(FieldValue::as_i64)
                    .map(Some)
                    .map(Team::from_team_num)
                    .unwrap_or(Team::Unknown);

                if self.kill_feed.len() == KILL_FEED_CAPACITY {
                    self.kill_feed.pop_front();
                }
                self.kill_feed.push_back(KillFeedEntry {
                    killer: attacker.clone().unwrap_or_else(|| "World".to_string()),
                    victim: victim.clone().unwrap_or_default(),
                    killer_team: attacker_team,
                    weapon,
                    headshot,
                    time: tick,
                });

                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim,
                    attacker,
                    player: None,
                    winner: None,
                    position,
                });
            }
            EventKind::BombPlanted => {
                let planter = string_field(row, &["player", "user", "userid"]);
                self.bomb = BombStateFull {
                    planted: true,
                    position,
                    planter: planter.clone(),
                };
                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim: None,
                    attacker: None,
                    player: planter,
                    winner: None,
                    position,
                });
            }
            EventKind::BombDefused | EventKind::BombExploded => {
                self.bomb = BombStateFull::default();
                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim: None,
                    attacker: None,
                    player: None,
                    winner: None,
                    position,
                });
            }
            EventKind::WeaponFire | EventKind::PlayerHurt | EventKind::PlayerBlind => {
                let player = string_field(row, &["player", "user", "userid", "attacker"]);
                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim: string_field(row, &["victim"]),
                    attacker: string_field(row, &["attacker"]),
                    player,
                    winner: None,
                    position,
                });
            }
            EventKind::HeGrenadeDetonate
            | EventKind::FlashbangDetonate
            | EventKind::SmokeGrenadeDetonate
            | EventKind::SmokeGrenadeExpired
            | EventKind::MolotovDetonate
            | EventKind::DecoyDetonate => {
                let player = string_field(row, &["player", "user", "userid"]);
                self.push_event(EventRecord {
                    kind,
                    tick,
                    victim: None,
                    attacker: None,
                    player,
                    winner: None,
                    position,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dem_proto::FakeDecoder;

    fn decoder_with_round_end(winner: FieldValue, tick: i64) -> FakeDecoder {
        let mut decoder = FakeDecoder::new().with_game_events(&["round_end"]);
        decoder.push_event("round_end", Row::new(Some(tick)).with("winner", winner));
        decoder
    }

    #[test]
    fn events_ring_caps_at_twenty() {
        let mut decoder = FakeDecoder::new().with_game_events(&["weapon_fire"]);
        for tick in 0..25 {
            decoder.push_event("weapon_fire", Row::new(Some(tick)).with("player", FieldValue::Str("p".into())));
        }
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&decoder.game_events.clone());
        collector.refresh(&mut decoder, None).unwrap();
        assert_eq!(collector.events().count(), EVENTS_CAPACITY);
    }

    #[test]
    fn kill_feed_caps_at_five_and_keeps_latest() {
        let mut decoder = FakeDecoder::new().with_game_events(&["player_death"]);
        for tick in 0..8 {
            decoder.push_event(
                "player_death",
                Row::new(Some(tick))
                    .with("victim", FieldValue::Str(format!("v{tick}")))
                    .with("attacker", FieldValue::Str("killer".into())),
            );
        }
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&decoder.game_events.clone());
        collector.refresh(&mut decoder, None).unwrap();
        assert_eq!(collector.kill_feed().count(), KILL_FEED_CAPACITY);
        assert_eq!(collector.kill_feed().last().unwrap().victim, "v7");
    }

    #[test]
    fn round_end_prefers_ct_when_string_is_ambiguous() {
        let mut decoder = decoder_with_round_end(FieldValue::Str("CT".into()), 1);
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&decoder.game_events.clone());
        collector.refresh(&mut decoder, None).unwrap();
        assert_eq!(collector.score().ct_score, 1);
        assert_eq!(collector.score().t_score, 0);
    }

    #[test]
    fn round_end_numeric_winner_resolves_team() {
        let mut decoder = decoder_with_round_end(FieldValue::Int(2), 1);
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&decoder.game_events.clone());
        collector.refresh(&mut decoder, None).unwrap();
        assert_eq!(collector.score().t_score, 1);
    }

    #[test]
    fn bomb_plant_then_defuse_clears_state() {
        let mut decoder = FakeDecoder::new().with_game_events(&["bomb_planted", "bomb_defused"]);
        decoder.push_event(
            "bomb_planted",
            Row::new(Some(1)).with("X", FieldValue::Float(10.0)).with("Y", FieldValue::Float(20.0)),
        );
        decoder.push_event("bomb_defused", Row::new(Some(2)));
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&decoder.game_events.clone());
        collector.refresh(&mut decoder, None).unwrap();
        assert!(!collector.bomb().planted);
    }

    #[test]
    fn high_water_mark_prevents_redelivery() {
        let mut decoder = FakeDecoder::new().with_game_events(&["round_start"]);
        decoder.push_event("round_start", Row::new(Some(5)));
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&decoder.game_events.clone());
        collector.refresh(&mut decoder, None).unwrap();
        assert_eq!(collector.score().round_number, 1);

        collector.refresh(&mut decoder, None).unwrap();
        assert_eq!(collector.score().round_number, 1, "same row must not be reprocessed");
    }

    #[test]
    fn resolve_event_names_prefers_first_candidate() {
        let available = vec!["round_prestart".to_string(), "round_start".to_string()];
        let mut collector = EventCollector::new();
        collector.resolve_event_names(&available);
        assert_eq!(collector.resolved.get(&EventKind::RoundStart).unwrap(), "round_start");
    }

    #[test]
    fn extract_position_tries_prefixes_in_order() {
        let row = Row::new(Some(1)).with("user_x", FieldValue::Float(1.0)).with("user_y", FieldValue::Float(2.0));
        assert_eq!(extract_position(&row), Some(Position { x: 1.0, y: 2.0, z: 0.0 }));
    }
}
