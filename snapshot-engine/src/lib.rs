//! Demo reading, world-state snapshotting, and event collation, built on
//! the `dem-proto` decoder contract. No networking lives here; this is the
//! part of the broadcaster that can be fed a fake decoder and tested as a
//! pure function of ticks in, snapshots out.

mod bounds;
mod demo_reader;
mod demo_source;
mod error;
mod events;
mod map_registry;
mod player;
mod snapshot;

pub use bounds::{resolve_bounds, strip_json5, BoundsSources, ResolvedBounds, Transform, WorldBounds, ZRange};
pub use demo_reader::{DemoReader, ReaderSettings};
pub use demo_source::{DemoEntry, DemoSource, DEMO_MAGIC};
pub use error::{EngineError, EngineResult};
pub use events::{BombStateFull, EventCollector, EventKind, EventRecord, KillFeedEntry, Position, ScoreState};
pub use map_registry::{normalize_map_name, MapDefinition, MapRegistry};
pub use player::{BuildResult, BuyStatus, Player, SnapshotBuilder, TeamEconomy};
pub use snapshot::{BombSnapshot, DataSource, MapConfig, MoneySummary, Snapshot};
