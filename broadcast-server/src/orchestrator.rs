//! Polling loop, mode state machine, adaptive poll interval, status/state
//! bus, and metrics aggregation. Grounded in
//! `original_source/server/ws_server.py`'s `_poll_loop`, `_poll_live`,
//! `_poll_manual`, `_adapt_poll_interval`, `_update_live_latency_status`,
//! `_set_demo_valid`/`_set_demo_loading`/`_set_bounds_safe`, `get_metrics`.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dem_proto::DemoDecoderFactory;
use snapshot_engine::{DemoSource, MapConfig, MapRegistry, Snapshot};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{info, warn};

use crate::settings::Settings;
use crate::wire::{
    DemoListFrame, DemoListing, InboundCommand, Mode, PlaybackAction, StateFrame, StatusFrame, StatusLevel,
};
use crate::worker::{DemoParams, DemoWorker, ExecutorMode};

const REPLAY_CAPACITY: usize = 100;
pub const REPLAY_ON_CONNECT: usize = 10;
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;
const HIGH_LAG_THRESHOLD_SECS: f64 = 1.0;
const LOW_LAG_THRESHOLD_SECS: f64 = 0.4;
const HIGH_LAG_STREAK_TO_SPEED_UP: u32 = 2;
const LOW_LAG_STREAK_TO_SLOW_DOWN: u32 = 10;
const POLL_INTERVAL_STEP: f64 = 0.1;
const SAMPLING_INTERVAL_MIN: u64 = 1;
const SAMPLING_INTERVAL_MAX: u64 = 60;
const PLAYBACK_SPEED_MIN: f64 = 0.25;
const PLAYBACK_SPEED_MAX: f64 = 4.0;
const LIVE_LATENCY_TARGET_SECS: f64 = 1.0;

/// Lock-free counters the broadcaster updates per connection/frame and the
/// orchestrator folds into `Metrics::snapshot`. Shared instead of owned so
/// neither side holds a handle into the other's private state, the same
/// "cyclic references become message passing" design, relaxed to atomics for
/// counters that are cheap to keep eventually-consistent).
#[derive(Default)]
pub struct BroadcastStats {
    connected_clients: AtomicUsize,
    binary_bytes: AtomicU64,
    text_bytes: AtomicU64,
    encode_failures: AtomicU64,
}

impl BroadcastStats {
    pub fn client_connected(&self) {
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_binary(&self, bytes: usize) {
        self.binary_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_text(&self, bytes: usize) {
        self.text_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_encode_failure(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn connected(&self) -> usize {
        self.connected_clients.load(Ordering::Relaxed)
    }

    /// `(binary / text) * 100`, `0.0` until any text bytes have been sent.
    fn compression_pct(&self) -> f64 {
        let text = self.text_bytes.load(Ordering::Relaxed);
        if text == 0 {
            return 0.0;
        }
        let binary = self.binary_bytes.load(Ordering::Relaxed);
        (binary as f64 / text as f64) * 100.0
    }
}

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub uptime_secs: f64,
    pub connected_clients: usize,
    pub last_parse_ms: f64,
    pub avg_parse_ms: f64,
    pub compression_pct: f64,
    pub last_tick: i64,
    pub last_map: Option<String>,
    pub executor_mode: &'static str,
    pub cmd_count: u64,
    pub encode_failures: u64,
}

/// Shared read-only handles a `Broadcaster` subscribes to. Constructed once
/// by `Orchestrator::channels` and cloned per connection.
#[derive(Clone)]
pub struct OrchestratorChannels {
    pub commands: mpsc::Sender<InboundCommand>,
    pub snapshots: broadcast::Sender<Arc<Snapshot>>,
    pub status: watch::Receiver<Option<StatusFrame>>,
    pub demo_list: watch::Receiver<DemoListFrame>,
    pub state: watch::Receiver<StateFrame>,
    pub replay: Arc<Mutex<VecDeque<Arc<Snapshot>>>>,
    pub stats: Arc<BroadcastStats>,
    pub msgpack_enabled: bool,
    pub msgpack_refresh_interval: watch::Receiver<u64>,
}

fn unix_time_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

fn mtime_secs(path: &std::path::Path) -> Option<f64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64())
}

/// Merges the registry's compiled-in map definition with the operator's map
/// override: the override only takes effect when it matches
/// the demo's resolved map, and `bounds_safe` goes false when neither world
/// bounds nor a z-range survive the merge.
fn apply_map_override(mut snapshot: Snapshot, map_override: Option<&str>) -> (Snapshot, bool) {
    let Some(override_key) = map_override else {
        let bounds_safe = snapshot
            .map_config
            .as_ref()
            .is_some_and(|c| c.world_bounds.is_some() || c.z_range.is_some());
        return (snapshot, bounds_safe);
    };

    let matches_current = snapshot.map.as_deref().is_some_and(|m| m.eq_ignore_ascii_case(override_key));
    if !matches_current {
        let bounds_safe = snapshot
            .map_config
            .as_ref()
            .is_some_and(|c| c.world_bounds.is_some() || c.z_range.is_some());
        return (snapshot, bounds_safe);
    }

    let Some(def) = MapRegistry::get(override_key) else {
        return (snapshot, false);
    };

    let (world_bounds, world_transform, z_range) = match &snapshot.map_config {
        Some(existing) => (existing.world_bounds, existing.world_transform, existing.z_range),
        None => (None, None, None),
    };
    let merged = MapConfig::from_definition(def, world_bounds, world_transform, z_range);
    let bounds_safe = merged.world_bounds.is_some() || merged.z_range.is_some();
    snapshot.map_config = Some(merged);
    (snapshot, bounds_safe)
}

struct Status {
    tx: watch::Sender<Option<StatusFrame>>,
}

impl Status {
    fn post(&self, message: impl Into<String>, level: StatusLevel, sticky: bool) {
        let frame = StatusFrame {
            frame_type: "status",
            message: message.into(),
            level,
            expires_in: if sticky { 0 } else { 5000 },
        };
        let _ = self.tx.send(Some(frame));
    }

    fn clear(&self) {
        let _ = self.tx.send(None);
    }
}

/// Runs the single cooperative polling task: one outstanding
/// `DemoWorker` call at a time, no lock held across a
/// suspension point.
pub struct Orchestrator {
    settings: Settings,
    source: DemoSource,
    worker: DemoWorker,

    mode: Mode,
    selected_demo: Option<String>,
    selected_path: Option<PathBuf>,
    map_override: Option<String>,
    demo_valid: bool,
    demo_loading: bool,
    bounds_safe: bool,

    playback_tick: f64,
    playback_playing: bool,
    playback_speed: f64,

    poll_interval: f64,
    poll_interval_base: f64,
    high_lag_streak: u32,
    low_lag_streak: u32,
    live_latency_warning_active: bool,

    msgpack_refresh_interval_tx: watch::Sender<u64>,

    status: Status,
    demo_list_tx: watch::Sender<DemoListFrame>,
    state_tx: watch::Sender<StateFrame>,
    snapshot_tx: broadcast::Sender<Arc<Snapshot>>,
    replay: Arc<Mutex<VecDeque<Arc<Snapshot>>>>,
    stats: Arc<BroadcastStats>,

    demo_list_version_key: Vec<(String, u64)>,
    started_at: Instant,
    cmd_count: u64,
    last_snapshot: Option<Arc<Snapshot>>,
}

impl Orchestrator {
    pub fn new(settings: Settings, factory: Arc<dyn DemoDecoderFactory>, executor: ExecutorMode) -> (Self, OrchestratorChannels, mpsc::Receiver<InboundCommand>) {
        let source = DemoSource::new(settings.demo_dir.clone());
        let worker = DemoWorker::new(executor, factory);

        let (commands_tx, commands_rx) = mpsc::channel(256);
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(None);
        let (demo_list_tx, demo_list_rx) = watch::channel(DemoListFrame {
            frame_type: "demo_list",
            demos: Vec::new(),
            mode: Mode::Live,
            selected_demo: None,
        });
        let (state_tx, state_rx) = watch::channel(StateFrame {
            frame_type: "state",
            mode: Mode::Live,
            selected_demo: None,
            map_override: None,
            demo_valid: false,
            demo_loading: false,
            bounds_safe: false,
        });

        let stats = Arc::new(BroadcastStats::default());
        let replay = Arc::new(Mutex::new(VecDeque::with_capacity(REPLAY_CAPACITY)));
        let (msgpack_refresh_interval_tx, msgpack_refresh_interval_rx) = watch::channel(settings.msgpack_refresh_interval);

        let poll_interval_base = settings.poll_interval_base;
        let orchestrator = Self {
            worker,
            mode: Mode::Live,
            selected_demo: None,
            selected_path: None,
            map_override: None,
            demo_valid: false,
            demo_loading: false,
            bounds_safe: false,
            playback_tick: 0.0,
            playback_playing: false,
            playback_speed: 1.0,
            poll_interval: poll_interval_base,
            poll_interval_base,
            high_lag_streak: 0,
            low_lag_streak: 0,
            live_latency_warning_active: false,
            msgpack_refresh_interval_tx,
            status: Status { tx: status_tx },
            demo_list_tx,
            state_tx,
            snapshot_tx: snapshot_tx.clone(),
            replay: replay.clone(),
            stats: stats.clone(),
            demo_list_version_key: Vec::new(),
            started_at: Instant::now(),
            cmd_count: 0,
            last_snapshot: None,
            settings,
            source,
        };

        let channels = OrchestratorChannels {
            commands: commands_tx,
            snapshots: snapshot_tx,
            status: status_rx,
            demo_list: demo_list_rx,
            state: state_rx,
            replay,
            stats,
            msgpack_enabled: orchestrator.settings.msgpack_enabled,
            msgpack_refresh_interval: msgpack_refresh_interval_rx,
        };

        (orchestrator, channels, commands_rx)
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            connected_clients: self.stats.connected(),
            last_parse_ms: self.last_snapshot.as_ref().map(|s| s.parse_ms).unwrap_or(0.0),
            avg_parse_ms: self.last_snapshot.as_ref().map(|s| s.avg_parse_ms).unwrap_or(0.0),
            compression_pct: self.stats.compression_pct(),
            last_tick: self.last_snapshot.as_ref().map(|s| s.tick).unwrap_or(-1),
            last_map: self.last_snapshot.as_ref().and_then(|s| s.map.clone()),
            executor_mode: self.worker.mode().as_str(),
            cmd_count: self.cmd_count,
            encode_failures: self.stats.encode_failures.load(Ordering::Relaxed),
        }
    }

    /// Drives the polling loop until the command channel closes (i.e. every
    /// `OrchestratorChannels` clone, including the one `Broadcaster` holds,
    /// has been dropped).
    pub async fn run(mut self, mut commands: mpsc::Receiver<InboundCommand>) {
        self.refresh_demo_list();
        loop {
            let sleep = tokio::time::sleep(Duration::from_secs_f64(self.poll_interval.max(0.05)));
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            self.cmd_count += 1;
                            self.apply_command(cmd).await;
                        }
                        None => {
                            info!("command channel closed, stopping orchestrator");
                            break;
                        }
                    }
                }
                _ = sleep => {
                    self.poll_once().await;
                }
            }
        }
    }

    fn push_state(&mut self) {
        let frame = StateFrame {
            frame_type: "state",
            mode: self.mode,
            selected_demo: self.selected_demo.clone(),
            map_override: self.map_override.clone(),
            demo_valid: self.demo_valid,
            demo_loading: self.demo_loading,
            bounds_safe: self.bounds_safe,
        };
        let _ = self.state_tx.send(frame);
    }

    fn refresh_demo_list(&mut self) {
        let entries = match self.source.list() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(error = %err, "failed to list demo directory");
                return;
            }
        };
        let key: Vec<(String, u64)> = entries
            .iter()
            .map(|e| (e.name.clone(), e.modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)))
            .collect();
        if key == self.demo_list_version_key {
            return;
        }
        self.demo_list_version_key = key;

        let demos: Vec<DemoListing> = entries
            .iter()
            .map(|e| DemoListing {
                name: e.name.clone(),
                modified: e.modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0),
            })
            .collect();
        let frame = DemoListFrame {
            frame_type: "demo_list",
            demos,
            mode: self.mode,
            selected_demo: self.selected_demo.clone(),
        };
        let _ = self.demo_list_tx.send(frame);
    }

    async fn apply_command(&mut self, command: InboundCommand) {
        match command {
            InboundCommand::SetMode { mode } => self.set_mode(mode).await,
            InboundCommand::SelectDemo { name } => self.select_demo(name).await,
            InboundCommand::Playback { action, tick, time, speed } => self.playback(action, tick, time, speed).await,
            InboundCommand::SetSampling { interval } => self.set_sampling(interval),
            InboundCommand::SetMapOverride { map } => self.set_map_override(map),
            InboundCommand::RequestDemos => self.refresh_demo_list(),
        }
    }

    async fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }
        if mode == Mode::Live {
            self.selected_demo = None;
            self.selected_path = None;
            self.playback_tick = 0.0;
            self.playback_playing = false;
            self.demo_loading = false;
        }
        self.mode = mode;
        self.push_state();
        self.refresh_demo_list();
    }

    async fn select_demo(&mut self, name: String) {
        let path = match self.source.resolve(&name) {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, demo = %name, "rejected demo selection");
                self.status.post(format!("cannot select {name}: {err}"), StatusLevel::Warning, false);
                return;
            }
        };
        if !DemoSource::is_valid(&path) {
            self.status.post(format!("{name} is not a valid demo file"), StatusLevel::Warning, false);
            return;
        }

        self.mode = Mode::Manual;
        self.selected_demo = Some(name);
        self.selected_path = Some(path.clone());
        self.playback_tick = 0.0;
        self.playback_playing = false;
        self.demo_loading = true;
        self.push_state();

        let params = self.demo_params(path);
        match self.worker.set_demo(params).await {
            Ok(()) => {
                self.demo_valid = true;
            }
            Err(err) => {
                warn!(error = %err, "failed to open selected demo");
                self.demo_valid = false;
            }
        }
        self.demo_loading = false;
        self.push_state();
    }

    async fn playback(&mut self, action: PlaybackAction, tick: Option<i64>, time: Option<f64>, speed: Option<f64>) {
        if self.mode != Mode::Manual || self.selected_demo.is_none() {
            self.status.post("playback requires a selected demo in manual mode", StatusLevel::Warning, false);
            return;
        }
        match action {
            PlaybackAction::Play => self.playback_playing = true,
            PlaybackAction::Pause => self.playback_playing = false,
            PlaybackAction::Seek => {
                let tick_rate = self.last_snapshot.as_ref().map(|s| s.demo_tick_rate).unwrap_or(64.0);
                let total_ticks = self.last_snapshot.as_ref().and_then(|s| s.demo_total_ticks).unwrap_or(0);
                let target = if let Some(tick) = tick {
                    Some(tick as f64)
                } else {
                    time.map(|time| time.max(0.0) * tick_rate)
                };
                if let Some(target) = target {
                    self.playback_tick = if total_ticks > 0 {
                        target.clamp(0.0, (total_ticks - 1) as f64)
                    } else {
                        target.max(0.0)
                    };
                }
                let _ = self.worker.reset_events().await;
            }
            PlaybackAction::Speed => {
                if let Some(speed) = speed {
                    self.playback_speed = speed.clamp(PLAYBACK_SPEED_MIN, PLAYBACK_SPEED_MAX);
                }
            }
        }
    }

    /// `set_sampling` tunes the msgpack re-encode cadence (`msgpack_refresh_interval`,
    /// clamped to an integer frame count), not the poll cadence.
    fn set_sampling(&mut self, interval: f64) {
        let clamped = (interval.round() as i64).clamp(SAMPLING_INTERVAL_MIN as i64, SAMPLING_INTERVAL_MAX as i64) as u64;
        let _ = self.msgpack_refresh_interval_tx.send(clamped);
    }

    fn set_map_override(&mut self, map: String) {
        if map.eq_ignore_ascii_case("auto") {
            self.map_override = None;
            self.push_state();
            return;
        }
        if MapRegistry::lookup(&map).is_none() {
            self.status.post(format!("unknown map override {map:?}"), StatusLevel::Warning, false);
            return;
        }
        self.map_override = Some(map);
        self.push_state();
    }

    fn demo_params(&self, path: PathBuf) -> DemoParams {
        DemoParams {
            path,
            bounds_file: self.settings.bounds_file.clone(),
            radar_meta_dir: self.settings.radar_meta_dir.clone(),
            overview_dir: self.settings.overview_dir.clone(),
            tick_window: self.settings.tick_window,
            tick_window_min: self.settings.tick_window_min,
            tick_window_max: self.settings.tick_window_max,
            event_parse_interval_secs: self.settings.event_parse_interval_secs,
        }
    }

    async fn poll_once(&mut self) {
        self.refresh_demo_list();
        match self.mode {
            Mode::Live => self.poll_live().await,
            Mode::Manual => self.poll_manual().await,
        }
        self.adapt_poll_interval();
    }

    async fn poll_live(&mut self) {
        let latest = match self.source.latest_valid() {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "failed to enumerate demo directory");
                None
            }
        };

        let Some(entry) = latest else {
            if self.selected_demo.is_some() || self.demo_valid {
                self.selected_demo = None;
                self.selected_path = None;
                self.demo_valid = false;
                self.status.post("no demo available to tail", StatusLevel::Warning, true);
                self.push_state();
            }
            return;
        };

        if self.selected_demo.as_deref() != Some(entry.name.as_str()) {
            self.selected_demo = Some(entry.name.clone());
            self.selected_path = Some(entry.path.clone());
            self.demo_loading = true;
            self.push_state();

            let params = self.demo_params(entry.path.clone());
            match self.worker.set_demo(params).await {
                Ok(()) => self.demo_valid = true,
                Err(err) => {
                    warn!(error = %err, demo = %entry.name, "failed to open live demo, skipping");
                    self.demo_valid = false;
                    self.status.post(format!("failed to open {}", entry.name), StatusLevel::Warning, false);
                }
            }
            self.demo_loading = false;
            self.push_state();
        }

        if !self.demo_valid {
            return;
        }

        match self.worker.poll_incremental().await {
            Ok(Some(snapshot)) => self.publish(snapshot),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "live poll failed, retrying next tick"),
        }
    }

    async fn poll_manual(&mut self) {
        if self.selected_demo.is_none() || !self.demo_valid {
            return;
        }
        if self.playback_playing {
            let tick_rate = self.last_snapshot.as_ref().map(|s| s.demo_tick_rate).unwrap_or(64.0);
            let total_ticks = self.last_snapshot.as_ref().and_then(|s| s.demo_total_ticks).unwrap_or(0);
            self.playback_tick += tick_rate * self.poll_interval * self.playback_speed;
            if total_ticks > 0 && self.playback_tick >= total_ticks as f64 {
                self.playback_tick = (total_ticks - 1) as f64;
                self.playback_playing = false;
            }
        }

        let start_tick = self.playback_tick.floor() as i64;
        match self.worker.poll_window(start_tick, Some(self.settings.tick_window)).await {
            Ok(Some(snapshot)) => self.publish(snapshot),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "manual window poll failed"),
        }
    }

    fn current_live_lag_secs(&self) -> f64 {
        if self.mode != Mode::Live {
            return 0.0;
        }
        let Some(path) = &self.selected_path else { return 0.0 };
        let Some(mtime) = mtime_secs(path) else { return 0.0 };
        (unix_time_secs() - mtime).max(0.0)
    }

    fn publish(&mut self, mut snapshot: Snapshot) {
        let (merged, bounds_safe) = apply_map_override(snapshot, self.map_override.as_deref());
        snapshot = merged;
        self.bounds_safe = bounds_safe;

        let live_lag = self.current_live_lag_secs();
        snapshot.live_lag_sec = live_lag;
        snapshot.server_ts = unix_time_secs();
        snapshot.poll_interval = self.poll_interval;
        snapshot.file_mtime = self.selected_path.as_deref().and_then(mtime_secs).unwrap_or(0.0);
        snapshot.cmd_count = self.cmd_count;

        let snapshot = Arc::new(snapshot);
        self.last_snapshot = Some(snapshot.clone());

        if let Ok(mut replay) = self.replay.try_lock() {
            if replay.len() == REPLAY_CAPACITY {
                replay.pop_front();
            }
            replay.push_back(snapshot.clone());
        }

        let _ = self.snapshot_tx.send(snapshot);
    }

    fn adapt_poll_interval(&mut self) {
        if self.mode != Mode::Live {
            self.high_lag_streak = 0;
            self.low_lag_streak = 0;
            return;
        }
        let lag = self.current_live_lag_secs();

        if lag > HIGH_LAG_THRESHOLD_SECS {
            self.high_lag_streak += 1;
            self.low_lag_streak = 0;
            if self.high_lag_streak >= HIGH_LAG_STREAK_TO_SPEED_UP {
                self.poll_interval = (self.poll_interval - POLL_INTERVAL_STEP).max(self.settings.poll_interval_min);
                self.high_lag_streak = 0;
            }
            if !self.live_latency_warning_active {
                self.live_latency_warning_active = true;
            }
            self.status.post(
                format!("Live latency {lag:.2}s (target < {LIVE_LATENCY_TARGET_SECS:.0}s)"),
                StatusLevel::Warning,
                true,
            );
        } else if lag < LOW_LAG_THRESHOLD_SECS {
            self.low_lag_streak += 1;
            self.high_lag_streak = 0;
            if self.low_lag_streak >= LOW_LAG_STREAK_TO_SLOW_DOWN {
                self.poll_interval = (self.poll_interval + POLL_INTERVAL_STEP).min(self.poll_interval_base);
                self.low_lag_streak = 0;
            }
            if self.live_latency_warning_active {
                self.live_latency_warning_active = false;
                self.status.clear();
            }
        } else {
            self.high_lag_streak = 0;
            self.low_lag_streak = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dem_proto::{DecoderResult, DemoDecoder, DemoHeader, FakeDecoder};
    use snapshot_engine::{DataSource, MoneySummary};
    use std::path::Path;

    struct EmptyFactory;
    impl DemoDecoderFactory for EmptyFactory {
        fn open(&self, path: &Path) -> DecoderResult<Box<dyn DemoDecoder>> {
            let map_name = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
            Ok(Box::new(FakeDecoder::new().with_header(DemoHeader { map_name, ..Default::default() })))
        }
    }

    fn test_settings(dir: PathBuf) -> Settings {
        Settings::load(dir, "127.0.0.1".into(), None)
    }

    fn blank_snapshot() -> Snapshot {
        Snapshot::build(
            Default::default(),
            MoneySummary::default(),
            Vec::new(),
            0,
            0,
            Vec::new(),
            Vec::new(),
            &Default::default(),
            1,
            DataSource::Live,
        )
    }

    #[test]
    fn adaptive_poll_interval_speeds_up_then_recovers() {
        let dir = std::env::temp_dir();
        let demo_path = dir.join(format!("poll-interval-test-{:?}.dem", Instant::now()));
        std::fs::write(&demo_path, b"HL2DEMO\0").unwrap();
        let stale_time = std::time::SystemTime::now() - Duration::from_secs(5);
        std::fs::File::options().write(true).open(&demo_path).unwrap().set_modified(stale_time).unwrap();

        let (mut orchestrator, _channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        orchestrator.poll_interval = 0.8;
        orchestrator.poll_interval_base = 0.8;
        orchestrator.settings.poll_interval_min = 0.2;
        orchestrator.mode = Mode::Live;
        orchestrator.selected_path = Some(demo_path.clone());

        // Two consecutive high-lag ticks (stale file mtime) drop the interval by one step.
        orchestrator.adapt_poll_interval();
        assert_eq!(orchestrator.high_lag_streak, 1);
        orchestrator.adapt_poll_interval();
        assert!((orchestrator.poll_interval - 0.7).abs() < 1e-9, "{}", orchestrator.poll_interval);
        assert_eq!(orchestrator.high_lag_streak, 0);

        // Freshen the file so lag reads as low, then ten low-lag ticks bring
        // the interval back to the base, never past it.
        std::fs::File::options().write(true).open(&demo_path).unwrap().set_modified(std::time::SystemTime::now()).unwrap();
        for _ in 0..10 {
            orchestrator.adapt_poll_interval();
        }
        assert!((orchestrator.poll_interval - 0.8).abs() < 1e-9, "{}", orchestrator.poll_interval);

        std::fs::remove_file(&demo_path).unwrap();
    }

    #[test]
    fn map_override_merges_bounds_only_on_matching_map() {
        let mut snapshot = blank_snapshot();
        snapshot.map = Some("Mirage".to_string());
        let (merged, safe) = apply_map_override(snapshot, Some("Mirage"));
        assert!(merged.map_config.is_some());
        assert!(!safe, "compiled-in Mirage definition carries no world_bounds/z_range by default");
    }

    #[test]
    fn map_override_is_ignored_when_map_does_not_match() {
        let mut snapshot = blank_snapshot();
        snapshot.map = Some("Nuke".to_string());
        let (merged, _) = apply_map_override(snapshot, Some("Mirage"));
        assert_eq!(merged.map.as_deref(), Some("Nuke"));
    }

    #[tokio::test]
    async fn set_mode_to_live_clears_selection_and_resets_playback() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, _channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        orchestrator.mode = Mode::Manual;
        orchestrator.selected_demo = Some("match.dem".to_string());
        orchestrator.playback_tick = 500.0;
        orchestrator.playback_playing = true;

        orchestrator.set_mode(Mode::Live).await;
        assert!(orchestrator.selected_demo.is_none());
        assert_eq!(orchestrator.playback_tick, 0.0);
        assert!(!orchestrator.playback_playing);
    }

    #[test]
    fn unknown_map_override_is_rejected_without_state_change() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, _channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        orchestrator.set_map_override("de_totallymadeup".to_string());
        assert!(orchestrator.map_override.is_none());
    }

    #[test]
    fn set_sampling_updates_msgpack_refresh_interval_not_poll_interval() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        let poll_interval_before = orchestrator.poll_interval;
        let mut refresh_rx = channels.msgpack_refresh_interval.clone();

        orchestrator.set_sampling(45.0);

        assert_eq!(orchestrator.poll_interval, poll_interval_before);
        assert_eq!(*refresh_rx.borrow_and_update(), 45);
    }

    #[test]
    fn set_sampling_clamps_to_one_and_sixty() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        let mut refresh_rx = channels.msgpack_refresh_interval.clone();

        orchestrator.set_sampling(0.0);
        assert_eq!(*refresh_rx.borrow_and_update(), 1);

        orchestrator.set_sampling(1000.0);
        assert_eq!(*refresh_rx.borrow_and_update(), 60);
    }

    #[tokio::test]
    async fn playback_seek_by_time_converts_to_ticks_and_clamps() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, _channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        orchestrator.mode = Mode::Manual;
        orchestrator.selected_demo = Some("match.dem".to_string());

        let mut snapshot = blank_snapshot();
        snapshot.demo_tick_rate = 64.0;
        snapshot.demo_total_ticks = Some(1000);
        orchestrator.last_snapshot = Some(Arc::new(snapshot));

        orchestrator.playback(PlaybackAction::Seek, None, Some(2.0), None).await;
        assert!((orchestrator.playback_tick - 128.0).abs() < 1e-9, "{}", orchestrator.playback_tick);

        // A seek past the end of the demo clamps to total_ticks - 1.
        orchestrator.playback(PlaybackAction::Seek, None, Some(1000.0), None).await;
        assert_eq!(orchestrator.playback_tick, 999.0);
    }

    #[tokio::test]
    async fn playback_seek_by_tick_is_also_clamped() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, _channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        orchestrator.mode = Mode::Manual;
        orchestrator.selected_demo = Some("match.dem".to_string());

        let mut snapshot = blank_snapshot();
        snapshot.demo_total_ticks = Some(500);
        orchestrator.last_snapshot = Some(Arc::new(snapshot));

        orchestrator.playback(PlaybackAction::Seek, Some(10_000), None, None).await;
        assert_eq!(orchestrator.playback_tick, 499.0);
    }

    #[tokio::test]
    async fn playback_speed_clamps_to_quarter_and_quadruple() {
        let dir = std::env::temp_dir();
        let (mut orchestrator, _channels, _rx) = Orchestrator::new(test_settings(dir), Arc::new(EmptyFactory), ExecutorMode::Inline);
        orchestrator.mode = Mode::Manual;
        orchestrator.selected_demo = Some("match.dem".to_string());

        orchestrator.playback(PlaybackAction::Speed, None, None, Some(0.0)).await;
        assert_eq!(orchestrator.playback_speed, 0.25);

        orchestrator.playback(PlaybackAction::Speed, None, None, Some(10.0)).await;
        assert_eq!(orchestrator.playback_speed, 4.0);
    }
}
