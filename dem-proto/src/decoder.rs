use std::ops::Range;
use std::path::Path;

use thiserror::Error;

use crate::header::DemoHeader;
use crate::row::{EventBatch, PlayerInfoRow, PlayerTickRow};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("could not open demo: {0}")]
    Open(String),

    #[error("could not parse demo header")]
    Header,

    #[error("decoder call failed: {0}")]
    Call(String),
}

pub type DecoderResult<T> = Result<T, DecoderError>;

/// The contract the external game-demo decoder is assumed to expose.
///
/// This is deliberately thin: actual `.dem` byte-format parsing is out of
/// scope for this crate; the demo byte format is an external collaborator.
/// `snapshot-engine` depends only on this trait, so any real decoder library
/// exposing an equivalent surface can be substituted without touching the
/// snapshot/event logic.
///
/// Implementations are not required to be cheap to call repeatedly; callers
/// (`DemoReader`) cache what they can and call through a blocking-friendly
/// boundary (see `broadcast-server::worker`).
pub trait DemoDecoder: Send {
    fn header(&mut self) -> DecoderResult<DemoHeader>;

    /// Net field names this demo's snapshots expose (e.g. `X`, `Y`, `team_num`).
    fn list_updated_fields(&mut self) -> DecoderResult<Vec<String>>;

    /// Game event names this demo records (e.g. `round_start`, `bomb_planted`).
    fn list_game_events(&mut self) -> DecoderResult<Vec<String>>;

    /// Per-player identity table (steam id aliases -> display name), parsed
    /// once and cached by the caller.
    fn parse_player_info(&mut self) -> DecoderResult<Vec<PlayerInfoRow>>;

    /// Per-player, per-tick field rows for the given tick range.
    fn parse_ticks(&mut self, fields: &[String], ticks: Range<i64>) -> DecoderResult<Vec<PlayerTickRow>>;

    /// Batched game-event rows for the given event names, each row also
    /// carrying the requested `extra_player_fields` (typically `X`, `Y`, `Z`)
    /// when the decoder can attach them.
    fn parse_events(
        &mut self,
        names: &[String],
        extra_player_fields: &[String],
    ) -> DecoderResult<EventBatch>;
}

/// Opens a demo file and returns a boxed decoder. Mirrors the
/// `open(path)` factory an external decoder library is assumed to expose.
/// Implementations of `DemoDecoder` provide their own constructor; this
/// trait exists so `DemoReader` can be
/// generic over "something that knows how to open a decoder" without
/// depending on a concrete decoder crate.
pub trait DemoDecoderFactory: Send + Sync {
    fn open(&self, path: &Path) -> DecoderResult<Box<dyn DemoDecoder>>;
}
