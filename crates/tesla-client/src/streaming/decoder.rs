//! Positional telemetry record decoder
//!
//! An update frame carries one comma-separated record. Field positions are
//! fixed by the subscription handshake; see [`DEFAULT_FIELDS`](super::types::DEFAULT_FIELDS).
//! Decoding is best-effort: a missing or malformed token leaves its field at
//! the zero value and never affects the others.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use super::types::TelemetrySnapshot;

const TIMESTAMP: usize = 0;
const SPEED: usize = 1;
const ODOMETER: usize = 2;
const SOC: usize = 3;
const ELEVATION: usize = 4;
const EST_HEADING: usize = 5;
const EST_LAT: usize = 6;
const EST_LNG: usize = 7;
const POWER: usize = 8;
const SHIFT_STATE: usize = 9;
const RANGE: usize = 10;
const EST_RANGE: usize = 11;
const HEADING: usize = 12;

/// Decode one raw record into a snapshot. Never fails.
pub fn decode_record(record: &str) -> TelemetrySnapshot {
    let tokens: Vec<&str> = record.split(',').map(str::trim).collect();
    let token = |index: usize| tokens.get(index).copied();

    let mut snapshot = TelemetrySnapshot::default();

    if let Some(timestamp) = parse::<i64>(token(TIMESTAMP)).and_then(from_epoch_millis) {
        snapshot.timestamp = timestamp;
    }

    assign(&mut snapshot.speed, token(SPEED));
    assign(&mut snapshot.odometer, token(ODOMETER));
    assign(&mut snapshot.soc, token(SOC));
    assign(&mut snapshot.elevation, token(ELEVATION));
    assign(&mut snapshot.est_heading, token(EST_HEADING));
    assign(&mut snapshot.est_lat, token(EST_LAT));
    assign(&mut snapshot.est_lng, token(EST_LNG));
    assign(&mut snapshot.power, token(POWER));
    assign(&mut snapshot.shift_state, token(SHIFT_STATE));
    assign(&mut snapshot.range, token(RANGE));
    assign(&mut snapshot.est_range, token(EST_RANGE));
    assign(&mut snapshot.heading, token(HEADING));

    snapshot
}

/// Split epoch milliseconds into whole seconds plus millisecond remainder.
fn from_epoch_millis(millis: i64) -> Option<DateTime<Utc>> {
    let secs = millis.div_euclid(1000);
    let ms = millis.rem_euclid(1000) as u32;
    DateTime::from_timestamp(secs, ms * 1_000_000)
}

fn parse<T: FromStr>(token: Option<&str>) -> Option<T> {
    token?.parse().ok()
}

fn assign<T: FromStr>(slot: &mut T, token: Option<&str>) {
    if let Some(value) = parse(token) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::ShiftState;
    use pretty_assertions::assert_eq;

    const RECORD: &str = "1609459200500,65,12345.6,80,100,270,37.7,-122.4,30,2,250,240,270";

    #[test]
    fn test_decode_full_record() {
        let snapshot = decode_record(RECORD);

        assert_eq!(snapshot.timestamp.timestamp(), 1609459200);
        assert_eq!(snapshot.timestamp.timestamp_subsec_millis(), 500);
        assert_eq!(snapshot.speed, 65);
        assert_eq!(snapshot.odometer, 12345.6);
        assert_eq!(snapshot.soc, 80);
        assert_eq!(snapshot.elevation, 100);
        assert_eq!(snapshot.est_heading, 270);
        assert_eq!(snapshot.est_lat, 37.7);
        assert_eq!(snapshot.est_lng, -122.4);
        assert_eq!(snapshot.power, 30);
        assert_eq!(snapshot.shift_state, 2);
        assert_eq!(snapshot.shift(), ShiftState::Drive);
        assert_eq!(snapshot.range, 250);
        assert_eq!(snapshot.est_range, 240);
        assert_eq!(snapshot.heading, 270);
    }

    #[test]
    fn test_decode_is_deterministic() {
        assert_eq!(decode_record(RECORD), decode_record(RECORD));
    }

    #[test]
    fn test_timestamp_decomposition() {
        let snapshot = decode_record("1609459200500");
        let expected = DateTime::from_timestamp(1609459200, 500_000_000).unwrap();
        assert_eq!(snapshot.timestamp, expected);
    }

    #[test]
    fn test_short_record_leaves_missing_fields_zero() {
        let snapshot = decode_record("1609459200000,65,12345.6");

        assert_eq!(snapshot.speed, 65);
        assert_eq!(snapshot.odometer, 12345.6);
        assert_eq!(snapshot.soc, 0);
        assert_eq!(snapshot.est_lat, 0.0);
        assert_eq!(snapshot.heading, 0);
    }

    #[test]
    fn test_invalid_tokens_do_not_affect_neighbours() {
        let snapshot = decode_record("abc,65,,80,x,270,37.7,nope,-12,D,250,240.5,270");

        assert_eq!(snapshot.timestamp, DateTime::<Utc>::default());
        assert_eq!(snapshot.speed, 65);
        assert_eq!(snapshot.odometer, 0.0);
        assert_eq!(snapshot.soc, 80);
        assert_eq!(snapshot.elevation, 0);
        assert_eq!(snapshot.est_heading, 270);
        assert_eq!(snapshot.est_lat, 37.7);
        assert_eq!(snapshot.est_lng, 0.0);
        assert_eq!(snapshot.power, -12);
        assert_eq!(snapshot.shift_state, 0);
        assert_eq!(snapshot.range, 250);
        // integer field with a fractional token
        assert_eq!(snapshot.est_range, 0);
        assert_eq!(snapshot.heading, 270);
    }

    #[test]
    fn test_empty_record() {
        assert_eq!(decode_record(""), TelemetrySnapshot::default());
    }

    #[test]
    fn test_extra_fields_are_ignored() {
        let snapshot = decode_record(&format!("{},999,888", RECORD));
        assert_eq!(snapshot, decode_record(RECORD));
    }

    #[test]
    fn test_whitespace_around_tokens() {
        let snapshot = decode_record(" 1609459200500 , 65 ,12345.6");
        assert_eq!(snapshot.speed, 65);
        assert_eq!(snapshot.timestamp.timestamp(), 1609459200);
    }

    #[test]
    fn test_out_of_range_timestamp_is_zero() {
        let snapshot = decode_record(&format!("{},65", i64::MAX));
        assert_eq!(snapshot.timestamp, DateTime::<Utc>::default());
        assert_eq!(snapshot.speed, 65);
    }
}
