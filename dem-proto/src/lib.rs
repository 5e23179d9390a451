//! Wire contract for the external game-demo decoder: header/field/event
//! discovery plus tick- and event-range queries. Actually decoding `.dem`
//! bytes is an external collaborator's job; this crate only types the
//! boundary `snapshot-engine` talks across.

mod decoder;
mod header;
mod row;
mod team;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use decoder::{DecoderError, DecoderResult, DemoDecoder, DemoDecoderFactory};
pub use header::DemoHeader;
pub use row::{EventBatch, EventRow, FieldValue, PlayerInfoRow, PlayerTickRow, Row};
pub use team::Team;

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDecoder;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_from_team_num_resolves_ct_and_t() {
        assert_eq!(Team::from_team_num(Some(3)), Team::Ct);
        assert_eq!(Team::from_team_num(Some(2)), Team::T);
        assert_eq!(Team::from_team_num(Some(1)), Team::Unknown);
        assert_eq!(Team::from_team_num(None), Team::Unknown);
    }

    #[test]
    fn tick_rate_is_zero_when_playback_time_missing() {
        let header = DemoHeader {
            playback_ticks: Some(1000),
            playback_time: None,
            ..Default::default()
        };
        assert_eq!(header.tick_rate(), 0.0);
    }

    #[test]
    fn tick_rate_divides_ticks_by_time() {
        let header = DemoHeader {
            playback_ticks: Some(6400),
            playback_time: Some(100.0),
            ..Default::default()
        };
        assert_eq!(header.tick_rate(), 64.0);
    }

    #[test]
    fn row_get_any_probes_alias_list_in_order() {
        let row = Row::new(Some(1)).with("steamid64", FieldValue::Int(76561197960265729));
        assert_eq!(
            row.get_any(&["steamid", "steamid64", "player"]),
            Some(&FieldValue::Int(76561197960265729))
        );
        assert_eq!(row.get_any(&["missing"]), None);
    }
}
