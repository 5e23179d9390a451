//! Settings loader: environment variable > JSON config file > compiled-in
//! default, for every named tunable. Grounded in
//! `original_source/server/config.py`'s `load_setting_float/int/str`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    values: HashMap<String, serde_json::Value>,
}

fn load_config_file(path: Option<&Path>) -> HashMap<String, serde_json::Value> {
    let Some(path) = path else {
        return HashMap::new();
    };
    match std::fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<ConfigFile>(&raw).map(|c| c.values).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn load_setting_f64(env_key: &str, file: &HashMap<String, serde_json::Value>, file_key: &str, default: f64) -> f64 {
    if let Ok(raw) = std::env::var(env_key) {
        if let Ok(v) = raw.parse() {
            return v;
        }
    }
    if let Some(v) = file.get(file_key).and_then(|v| v.as_f64()) {
        return v;
    }
    default
}

fn load_setting_u64(env_key: &str, file: &HashMap<String, serde_json::Value>, file_key: &str, default: u64) -> u64 {
    if let Ok(raw) = std::env::var(env_key) {
        if let Ok(v) = raw.parse() {
            return v;
        }
    }
    if let Some(v) = file.get(file_key).and_then(|v| v.as_u64()) {
        return v;
    }
    default
}

fn load_setting_string(env_key: &str, file: &HashMap<String, serde_json::Value>, file_key: &str, default: &str) -> String {
    if let Ok(raw) = std::env::var(env_key) {
        return raw;
    }
    if let Some(v) = file.get(file_key).and_then(|v| v.as_str()) {
        return v.to_string();
    }
    default.to_string()
}

/// Every named tunable, resolved once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub demo_dir: PathBuf,
    pub bind_host: String,
    pub bounds_file: PathBuf,
    pub radar_meta_dir: PathBuf,
    pub overview_dir: PathBuf,

    pub tick_window: u64,
    pub tick_window_min: u64,
    pub tick_window_max: u64,
    pub event_parse_interval_secs: f64,

    pub poll_interval_base: f64,
    pub poll_interval_min: f64,

    pub msgpack_enabled: bool,
    pub msgpack_refresh_interval: u64,
}

impl Settings {
    /// `config_path` is an optional JSON file consulted after env vars and
    /// before compiled-in defaults, per the settings precedence rule.
    pub fn load(demo_dir: PathBuf, bind_host: String, config_path: Option<&Path>) -> Self {
        let file = load_config_file(config_path);

        Self {
            bounds_file: PathBuf::from(load_setting_string(
                "CS_BROADCAST_BOUNDS_FILE",
                &file,
                "bounds_file",
                demo_dir.join("bounds.json").to_string_lossy().as_ref(),
            )),
            radar_meta_dir: PathBuf::from(load_setting_string(
                "CS_BROADCAST_RADAR_META_DIR",
                &file,
                "radar_meta_dir",
                demo_dir.join("radar_meta").to_string_lossy().as_ref(),
            )),
            overview_dir: PathBuf::from(load_setting_string(
                "CS_BROADCAST_OVERVIEW_DIR",
                &file,
                "overview_dir",
                demo_dir.join("overview").to_string_lossy().as_ref(),
            )),
            demo_dir,
            bind_host,

            tick_window: load_setting_u64("CS_BROADCAST_TICK_WINDOW", &file, "tick_window", 256),
            tick_window_min: load_setting_u64("CS_BROADCAST_TICK_WINDOW_MIN", &file, "tick_window_min", 256),
            tick_window_max: load_setting_u64("CS_BROADCAST_TICK_WINDOW_MAX", &file, "tick_window_max", 2048),
            event_parse_interval_secs: load_setting_f64(
                "CS_BROADCAST_EVENT_PARSE_INTERVAL",
                &file,
                "event_parse_interval",
                2.0,
            ),

            poll_interval_base: load_setting_f64("CS_BROADCAST_POLL_INTERVAL", &file, "poll_interval", 0.8),
            poll_interval_min: load_setting_f64("CS_BROADCAST_POLL_INTERVAL_MIN", &file, "poll_interval_min", 0.2),

            msgpack_enabled: std::env::var("CS_BROADCAST_NO_MSGPACK").is_err()
                && file.get("msgpack_enabled").and_then(|v| v.as_bool()).unwrap_or(true),
            msgpack_refresh_interval: load_setting_u64(
                "CS_BROADCAST_MSGPACK_REFRESH_INTERVAL",
                &file,
                "msgpack_refresh_interval",
                10,
            ),
        }
    }

    pub fn reader_settings(&self) -> snapshot_engine::ReaderSettings {
        snapshot_engine::ReaderSettings {
            tick_window: self.tick_window,
            tick_window_min: self.tick_window_min,
            tick_window_max: self.tick_window_max,
            event_parse_interval: std::time::Duration::from_secs_f64(self.event_parse_interval_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_outranks_config_file_and_default() {
        let dir = std::env::temp_dir();
        std::env::set_var("CS_BROADCAST_POLL_INTERVAL", "0.3");
        let settings = Settings::load(dir, "127.0.0.1".into(), None);
        assert_eq!(settings.poll_interval_base, 0.3);
        std::env::remove_var("CS_BROADCAST_POLL_INTERVAL");
    }

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        std::env::remove_var("CS_BROADCAST_TICK_WINDOW");
        let settings = Settings::load(std::env::temp_dir(), "127.0.0.1".into(), None);
        assert_eq!(settings.tick_window, 256);
        assert_eq!(settings.msgpack_refresh_interval, 10);
    }
}
