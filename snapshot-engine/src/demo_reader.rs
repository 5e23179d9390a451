//! Wraps the external decoder: context bootstrap (map identification, world
//! bounds), the tick-window growth/shrink parse loop, and manual-playhead
//! window playback. Grounded in
//! `original_source/server/demo_parser.py::AdvancedDemoParser` (`_ensure_context`,
//! `parse_incremental`, `parse_window`).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use dem_proto::{DemoDecoder, FieldValue, Row};
use tracing::{debug, warn};

use crate::bounds::{BoundsSources, ObservedBounds, ResolvedBounds, Transform, ZRange};
use crate::error::EngineResult;
use crate::events::EventCollector;
use crate::map_registry::{normalize_map_name, MapRegistry};
use crate::player::SnapshotBuilder;
use crate::snapshot::{DataSource, MapConfig, MoneySummary, Snapshot};

const WANTED_FIELDS: &[&str] = &[
    "X", "Y", "Z", "pitch", "yaw", "health", "armor_value", "team_num", "life_state", "has_helmet", "balance",
];
const PARSE_TIME_SAMPLES_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug)]
pub struct ReaderSettings {
    pub tick_window: u64,
    pub tick_window_min: u64,
    pub tick_window_max: u64,
    pub event_parse_interval: std::time::Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            tick_window: 256,
            tick_window_min: 256,
            tick_window_max: 2048,
            event_parse_interval: std::time::Duration::from_secs_f64(2.0),
        }
    }
}

struct DemoContext {
    map_key: String,
    wanted_fields: Vec<String>,
    bounds: ObservedBounds,
    fixed_bounds: bool,
    transform: Option<Transform>,
    z_range: Option<ZRange>,
    player_names: HashMap<String, String>,
}

fn player_info_name(row: &Row) -> Option<(String, String)> {
    let id = row.get_any(&["steamid", "steamid64", "player", "userid"])?;
    let id = match id {
        FieldValue::Str(s) => s.clone(),
        other => other.as_i64()?.to_string(),
    };
    let name = row.get_any(&["name", "player_name"]).and_then(FieldValue::as_str)?.to_string();
    Some((id, name))
}

/// DemoReader: wraps one opened decoder handle for one demo file.
pub struct DemoReader {
    decoder: Box<dyn DemoDecoder>,
    path: PathBuf,
    bounds_file: PathBuf,
    radar_meta_dir: PathBuf,
    overview_dir: PathBuf,
    settings: ReaderSettings,
    tick_window: u64,
    context: Option<DemoContext>,
    event_collector: EventCollector,
    last_tick: i64,
    no_data_streak: u32,
    last_file_len: Option<u64>,
    last_mtime: Option<SystemTime>,
    events_dirty: bool,
    last_event_refresh: Option<Instant>,
    update_count: u64,
    parse_time_samples: VecDeque<f64>,
    last_snapshot: Option<(u64, Instant)>,
    started_at: Instant,
}

impl DemoReader {
    pub fn new(
        decoder: Box<dyn DemoDecoder>,
        path: impl Into<PathBuf>,
        bounds_file: impl Into<PathBuf>,
        radar_meta_dir: impl Into<PathBuf>,
        overview_dir: impl Into<PathBuf>,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            decoder,
            path: path.into(),
            bounds_file: bounds_file.into(),
            radar_meta_dir: radar_meta_dir.into(),
            overview_dir: overview_dir.into(),
            tick_window: settings.tick_window,
            settings,
            context: None,
            event_collector: EventCollector::new(),
            last_tick: -1,
            no_data_streak: 0,
            last_file_len: None,
            last_mtime: None,
            events_dirty: true,
            last_event_refresh: None,
            update_count: 0,
            parse_time_samples: VecDeque::with_capacity(PARSE_TIME_SAMPLES_CAPACITY),
            last_snapshot: None,
            started_at: Instant::now(),
        }
    }

    pub fn last_tick(&self) -> i64 {
        self.last_tick
    }

    pub fn map_key(&self) -> Option<&str> {
        self.context.as_ref().map(|c| c.map_key.as_str())
    }

    fn ensure_context(&mut self) -> EngineResult<()> {
        if self.context.is_some() {
            return Ok(());
        }

        let header = self.decoder.header()?;
        let raw_map_name = header.map_name.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string()
        });
        let map_key = normalize_map_name(&raw_map_name);

        let sources = BoundsSources {
            explicit_bounds_file: &self.bounds_file,
            radar_meta_dir: &self.radar_meta_dir,
            overview_dir: &self.overview_dir,
        };
        let ResolvedBounds { bounds, z_range, transform, fixed } = crate::bounds::resolve_bounds(&map_key, &sources);
        let mut observed = ObservedBounds::default();
        if let Some(bounds) = bounds {
            observed = ObservedBounds::from(bounds);
        }

        let available_fields = self.decoder.list_updated_fields()?;
        let wanted: Vec<String> = WANTED_FIELDS
            .iter()
            .filter(|f| available_fields.iter().any(|a| a == *f))
            .map(|f| f.to_string())
            .collect();
        let wanted_fields = if wanted.is_empty() {
            WANTED_FIELDS.iter().map(|f| f.to_string()).collect()
        } else {
            wanted
        };

        let player_names = self
            .decoder
            .parse_player_info()?
            .iter()
            .filter_map(player_info_name)
            .collect();

        let available_events = self.decoder.list_game_events()?;
        self.event_collector.resolve_event_names(&available_events);

        if MapRegistry::get(&map_key).is_none() {
            debug!(map = %map_key, "no compiled-in MapDefinition for this map, rendering without radar overlay");
        }

        self.context = Some(DemoContext {
            map_key,
            wanted_fields,
            bounds: observed,
            fixed_bounds: fixed,
            transform,
            z_range,
            player_names,
        });
        Ok(())
    }

    fn record_parse_time(&mut self, millis: f64) {
        if self.parse_time_samples.len() == PARSE_TIME_SAMPLES_CAPACITY {
            self.parse_time_samples.pop_front();
        }
        self.parse_time_samples.push_back(millis);
    }

    fn avg_parse_ms(&self) -> f64 {
        if self.parse_time_samples.is_empty() {
            return 0.0;
        }
        self.parse_time_samples.iter().sum::<f64>() / self.parse_time_samples.len() as f64
    }

    fn build_snapshot(
        &mut self,
        rows: &[Row],
        latest_tick: i64,
        data_source: DataSource,
        parse_ms: f64,
        file_size: u64,
    ) -> EngineResult<Snapshot> {
        let context = self.context.as_mut().expect("context bootstrapped before snapshot build");
        let result = SnapshotBuilder::build(rows, &context.player_names, &mut context.bounds, context.fixed_bounds);

        self.update_count += 1;
        self.record_parse_time(parse_ms);

        let header = self.decoder.header()?;
        let tick_rate = header.tick_rate();
        let demo_time = if tick_rate > 0.0 { latest_tick as f64 / tick_rate } else { 0.0 };
        let demo_remaining = match header.playback_time {
            Some(total) => (total - demo_time).max(0.0),
            None => 0.0,
        };

        let now = Instant::now();
        let data_rate_bps = self.last_snapshot.map(|(prev_size, prev_at)| {
            let elapsed = now.duration_since(prev_at).as_secs_f64();
            if elapsed > 0.0 {
                (file_size as f64 - prev_size as f64) / elapsed
            } else {
                0.0
            }
        });
        self.last_snapshot = Some((file_size, now));

        let map_key = context.map_key.clone();
        let map_config = MapRegistry::get(&map_key).map(|def| {
            MapConfig::from_definition(def, context.bounds.get(), context.transform, context.z_range)
        });

        let money = MoneySummary::from_economy(result.economy_ct, result.economy_t);
        let mut snapshot = Snapshot::build(
            self.event_collector.score(),
            money,
            result.players,
            result.alive_ct,
            result.alive_t,
            self.event_collector.kill_feed().cloned().collect(),
            self.event_collector.events().cloned().collect(),
            self.event_collector.bomb(),
            latest_tick,
            data_source,
        );
        snapshot.map = Some(map_key);
        snapshot.map_config = map_config;
        snapshot.time = demo_time;
        snapshot.parse_ms = parse_ms;
        snapshot.demo_time = demo_time;
        snapshot.demo_tick_rate = tick_rate;
        snapshot.demo_remaining = demo_remaining;
        snapshot.demo_data_rate_bps = data_rate_bps;
        snapshot.file_size = file_size;
        snapshot.update_count = self.update_count;
        snapshot.avg_parse_ms = self.avg_parse_ms();
        snapshot.demo_total_ticks = header.playback_ticks;

        Ok(snapshot)
    }

    fn maybe_refresh_events(&mut self, latest_tick: i64, force: bool) -> EngineResult<()> {
        let due = force
            || self.events_dirty
                && self
                    .last_event_refresh
                    .map(|at| at.elapsed() >= self.settings.event_parse_interval)
                    .unwrap_or(true);
        if !due {
            return Ok(());
        }
        if let Err(err) = self.event_collector.refresh(&mut *self.decoder, Some(latest_tick)) {
            warn!(error = %err, "event refresh failed for this poll, keeping previous event state");
            return Ok(());
        }
        self.last_event_refresh = Some(Instant::now());
        self.events_dirty = false;
        Ok(())
    }

    /// Tick-windowed incremental parse with growth/shrink control.
    pub fn parse_incremental(&mut self) -> EngineResult<Option<Snapshot>> {
        let metadata = std::fs::metadata(&self.path)?;
        let size = metadata.len();
        let mtime = metadata.modified().ok();

        if self.last_file_len == Some(size) {
            return Ok(None);
        }
        if self.last_file_len != Some(size) || self.last_mtime != mtime {
            self.events_dirty = true;
        }
        self.last_file_len = Some(size);
        self.last_mtime = mtime;

        self.ensure_context()?;
        let fields = self.context.as_ref().unwrap().wanted_fields.clone();

        let started = Instant::now();
        let probe_start = self.last_tick + 1;
        let mut rows = self.decoder.parse_ticks(&fields, probe_start..probe_start + self.tick_window as i64)?;

        if rows.is_empty() {
            self.no_data_streak += 1;
            if self.no_data_streak >= 3 && self.tick_window < self.settings.tick_window_max {
                let oversized = probe_start..probe_start + 4 * self.tick_window as i64;
                self.tick_window = (self.tick_window * 2).min(self.settings.tick_window_max);
                rows = self.decoder.parse_ticks(&fields, oversized)?;
            }
        }

        if rows.is_empty() {
            return Ok(None);
        }

        let latest_tick = rows.iter().filter_map(|r| r.tick).max();
        let Some(latest_tick) = latest_tick else {
            return Ok(None);
        };
        if latest_tick <= self.last_tick {
            return Ok(None);
        }

        if self.tick_window > self.settings.tick_window_min {
            self.tick_window = (self.tick_window / 2).max(self.settings.tick_window_min);
        }
        self.no_data_streak = 0;

        let tick_rows: Vec<Row> = rows.into_iter().filter(|r| r.tick == Some(latest_tick)).collect();

        self.maybe_refresh_events(latest_tick, false)?;

        let parse_ms = started.elapsed().as_secs_f64() * 1000.0;
        let snapshot = self.build_snapshot(&tick_rows, latest_tick, DataSource::Live, parse_ms, size)?;
        self.last_tick = latest_tick;
        Ok(Some(snapshot))
    }

    /// Window playback for MANUAL scrubbing: no growth, no dirty-file gate,
    /// events always refreshed. `size` defaults to the current tick window.
    pub fn parse_window(&mut self, start_tick: i64, size: Option<u64>) -> EngineResult<Option<Snapshot>> {
        self.ensure_context()?;
        let fields = self.context.as_ref().unwrap().wanted_fields.clone();
        let window = size.unwrap_or(self.tick_window);

        let started = Instant::now();
        let rows = self.decoder.parse_ticks(&fields, start_tick..start_tick + window as i64)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let Some(latest_tick) = rows.iter().filter_map(|r| r.tick).max() else {
            return Ok(None);
        };

        let tick_rows: Vec<Row> = rows.into_iter().filter(|r| r.tick == Some(latest_tick)).collect();
        self.maybe_refresh_events(latest_tick, true)?;

        let file_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let parse_ms = started.elapsed().as_secs_f64() * 1000.0;
        let snapshot = self.build_snapshot(&tick_rows, latest_tick, DataSource::Manual, parse_ms, file_size)?;
        self.last_tick = latest_tick;
        Ok(Some(snapshot))
    }

    /// Clears the event collector's bounded caches and high-water marks.
    /// Does not re-open the decoder or re-resolve bounds.
    pub fn reset_events(&mut self) {
        self.event_collector.reset_state();
    }
}

impl From<crate::bounds::WorldBounds> for ObservedBounds {
    fn from(bounds: crate::bounds::WorldBounds) -> Self {
        let mut observed = ObservedBounds::default();
        observed.widen(bounds.min_x, bounds.min_y);
        observed.widen(bounds.max_x, bounds.max_y);
        observed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dem_proto::{DemoHeader, FakeDecoder, FieldValue};
    use std::io::Write;

    fn tempdir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("snapshot-engine-reader-{}-{}-{:?}", std::process::id(), label, Instant::now()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn demo_file(dir: &Path, bytes: &[u8]) -> PathBuf {
        let path = dir.join("current.dem");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    fn reader_with(decoder: FakeDecoder, path: PathBuf, dir: &Path) -> DemoReader {
        DemoReader::new(
            Box::new(decoder),
            path,
            dir.join("bounds.json"),
            dir.join("radar_meta"),
            dir.join("overview"),
            ReaderSettings::default(),
        )
    }

    #[test]
    fn returns_no_update_when_file_size_is_unchanged() {
        let dir = tempdir("unchanged");
        let path = demo_file(&dir, b"HL2DEMO\0");
        let mut decoder = FakeDecoder::new().with_header(DemoHeader { map_name: Some("de_mirage".into()), ..Default::default() });
        decoder.push_tick(Row::new(Some(1)).with("X", FieldValue::Float(1.0)).with("Y", FieldValue::Float(1.0)));
        let mut reader = reader_with(decoder, path, &dir);

        let first = reader.parse_incremental().unwrap();
        assert!(first.is_some());
        let second = reader.parse_incremental().unwrap();
        assert!(second.is_none(), "unchanged file size must short-circuit");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn tick_window_doubles_after_three_empty_polls() {
        let dir = tempdir("growth");
        let path = demo_file(&dir, b"HL2DEMO\0");
        let decoder = FakeDecoder::new().with_header(DemoHeader { map_name: Some("de_mirage".into()), ..Default::default() });
        let mut reader = reader_with(decoder, path.clone(), &dir);
        reader.tick_window = 256;

        for i in 0..3 {
            std::fs::write(&path, format!("HL2DEMO\0{}", "x".repeat(i + 1))).unwrap();
            let _ = reader.parse_incremental();
        }
        assert_eq!(reader.tick_window, 512);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn oversized_probe_on_third_empty_poll_uses_pre_growth_window() {
        // A row sitting outside the first three 256-wide probes but inside
        // `4 * 256 = 1024` must be picked up by the third poll's oversized
        // reparse.
        let dir = tempdir("oversized-probe");
        let path = demo_file(&dir, b"HL2DEMO\0");
        let mut decoder = FakeDecoder::new().with_header(DemoHeader { map_name: Some("de_mirage".into()), ..Default::default() });
        decoder.push_tick(Row::new(Some(900)).with("X", FieldValue::Float(1.0)).with("Y", FieldValue::Float(1.0)));
        let mut reader = reader_with(decoder, path.clone(), &dir);
        reader.tick_window = 256;

        std::fs::write(&path, b"HL2DEMO\0a").unwrap();
        assert!(reader.parse_incremental().unwrap().is_none());
        std::fs::write(&path, b"HL2DEMO\0ab").unwrap();
        assert!(reader.parse_incremental().unwrap().is_none());

        std::fs::write(&path, b"HL2DEMO\0abc").unwrap();
        let snapshot = reader.parse_incremental().unwrap().expect("oversized probe finds tick 900");
        assert_eq!(snapshot.tick, 900);
        // The oversized probe grows the window to 512 before it succeeds; a
        // successful parse always halves the window afterward, regardless of
        // the no-data streak that triggered the growth.
        assert_eq!(reader.tick_window, 256);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn successful_poll_shrinks_window_toward_minimum() {
        let dir = tempdir("shrink");
        let path = demo_file(&dir, b"HL2DEMO\0");
        let mut decoder = FakeDecoder::new().with_header(DemoHeader { map_name: Some("de_mirage".into()), ..Default::default() });
        decoder.push_tick(Row::new(Some(1)).with("X", FieldValue::Float(1.0)).with("Y", FieldValue::Float(1.0)));
        let mut reader = reader_with(decoder, path, &dir);
        reader.tick_window = 2048;

        reader.parse_incremental().unwrap();
        assert_eq!(reader.tick_window, 1024);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn snapshot_tick_strictly_increases_across_polls() {
        let dir = tempdir("monotonic");
        let path = demo_file(&dir, b"HL2DEMO\0");
        let mut decoder = FakeDecoder::new().with_header(DemoHeader { map_name: Some("de_mirage".into()), ..Default::default() });
        decoder.push_tick(Row::new(Some(1)).with("X", FieldValue::Float(1.0)).with("Y", FieldValue::Float(1.0)));
        decoder.push_tick(Row::new(Some(2)).with("X", FieldValue::Float(1.0)).with("Y", FieldValue::Float(1.0)));
        let mut reader = reader_with(decoder, path.clone(), &dir);

        let first = reader.parse_incremental().unwrap().unwrap();
        std::fs::write(&path, b"HL2DEMO\0more").unwrap();
        let second = reader.parse_incremental().unwrap().unwrap();
        assert!(second.tick > first.tick);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
