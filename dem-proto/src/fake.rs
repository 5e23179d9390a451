//! An in-memory decoder double used by `snapshot-engine` and
//! `broadcast-server` tests. Not a real `.dem` parser — it just replays
//! rows the test fed it, so the tick-window growth/shrink, event
//! high-water-mark, and bounds-resolution logic can be exercised without a
//! real demo file.

use std::ops::Range;

use crate::decoder::{DecoderResult, DemoDecoder};
use crate::header::DemoHeader;
use crate::row::{EventBatch, EventRow, PlayerInfoRow, PlayerTickRow};

#[derive(Default)]
pub struct FakeDecoder {
    pub header: DemoHeader,
    pub updated_fields: Vec<String>,
    pub game_events: Vec<String>,
    pub player_info: Vec<PlayerInfoRow>,
    pub ticks: Vec<PlayerTickRow>,
    pub events: Vec<(String, EventRow)>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, header: DemoHeader) -> Self {
        self.header = header;
        self
    }

    pub fn with_updated_fields(mut self, fields: &[&str]) -> Self {
        self.updated_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_game_events(mut self, events: &[&str]) -> Self {
        self.game_events = events.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn push_tick(&mut self, row: PlayerTickRow) {
        self.ticks.push(row);
    }

    pub fn push_event(&mut self, name: impl Into<String>, row: EventRow) {
        self.events.push((name.into(), row));
    }
}

impl DemoDecoder for FakeDecoder {
    fn header(&mut self) -> DecoderResult<DemoHeader> {
        Ok(self.header.clone())
    }

    fn list_updated_fields(&mut self) -> DecoderResult<Vec<String>> {
        Ok(self.updated_fields.clone())
    }

    fn list_game_events(&mut self) -> DecoderResult<Vec<String>> {
        Ok(self.game_events.clone())
    }

    fn parse_player_info(&mut self) -> DecoderResult<Vec<PlayerInfoRow>> {
        Ok(self.player_info.clone())
    }

    fn parse_ticks(&mut self, _fields: &[String], ticks: Range<i64>) -> DecoderResult<Vec<PlayerTickRow>> {
        Ok(self
            .ticks
            .iter()
            .filter(|row| row.tick.is_some_and(|t| ticks.contains(&t)))
            .cloned()
            .collect())
    }

    fn parse_events(
        &mut self,
        names: &[String],
        _extra_player_fields: &[String],
    ) -> DecoderResult<EventBatch> {
        let mut batch: EventBatch = EventBatch::new();
        for (name, row) in &self.events {
            if names.iter().any(|n| n == name) {
                batch.entry(name.clone()).or_default().push(row.clone());
            }
        }
        Ok(batch)
    }
}
