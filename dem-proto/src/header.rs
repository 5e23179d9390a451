/// Demo header, as returned by the external decoder's `header()` call.
///
/// `map_name` is the raw string the decoder reports; callers normalize it
/// themselves (see `snapshot-engine::map_registry`). `playback_ticks` and
/// `playback_time` are absent for demos the decoder couldn't fully index yet
/// (e.g. a LIVE demo still being written to).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DemoHeader {
    pub demo_protocol: i32,
    pub network_protocol: i32,
    pub map_name: Option<String>,
    pub playback_ticks: Option<u64>,
    pub playback_time: Option<f64>,
}

impl DemoHeader {
    /// `playback_ticks / playback_time`, or `0.0` when either is absent or
    /// zero. Mirrors `AdvancedDemoParser.get_tick_rate` in the original.
    pub fn tick_rate(&self) -> f64 {
        match (self.playback_ticks, self.playback_time) {
            (Some(ticks), Some(time)) if time > 0.0 => {
                let rate = ticks as f64 / time;
                if rate > 0.0 { rate } else { 0.0 }
            }
            _ => 0.0,
        }
    }
}
