//! Total, never-failing parsing of event timestamps.
//!
//! Session logs carry timestamps under several keys and in two shapes:
//! numeric epoch values and ISO-8601 text. Parsing is split into tagging
//! ([`EventTimestamp::from_value`]) and conversion ([`EventTimestamp::to_utc`]);
//! both return `None` instead of failing.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Keys probed for an event timestamp, in priority order.
pub const TIMESTAMP_KEYS: [&str; 3] = ["timestamp", "time", "created_at"];

/// Epoch values above this are milliseconds rather than seconds.
const MILLIS_THRESHOLD: f64 = 1e11;

/// Naive layouts tried after RFC 3339. Naive text is taken as UTC.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A raw timestamp as found in an event, before conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum EventTimestamp {
    /// Seconds (or milliseconds, above 1e11) since the Unix epoch.
    Epoch(f64),
    /// ISO-8601 text, with or without an offset.
    Iso8601(String),
}

impl EventTimestamp {
    /// Tag a JSON value. Numbers become `Epoch`; numeric strings are also
    /// treated as epochs; other non-empty strings become `Iso8601`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Epoch),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else if let Ok(epoch) = trimmed.parse::<f64>() {
                    Some(Self::Epoch(epoch))
                } else {
                    Some(Self::Iso8601(trimmed.to_string()))
                }
            }
            _ => None,
        }
    }

    /// Convert to a UTC instant. Out-of-range, non-positive, and unparseable
    /// values yield `None`.
    #[must_use]
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(raw) => epoch_to_utc(*raw),
            Self::Iso8601(text) => iso_to_utc(text),
        }
    }
}

/// Find and parse the timestamp of one event object.
///
/// The first key in [`TIMESTAMP_KEYS`] holding a taggable value decides; a
/// later key is not consulted if that value fails to convert.
#[must_use]
pub fn event_timestamp(event: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    TIMESTAMP_KEYS
        .iter()
        .find_map(|key| event.get(*key).and_then(EventTimestamp::from_value))
        .and_then(|tagged| tagged.to_utc())
}

#[allow(clippy::cast_possible_truncation)]
fn epoch_to_utc(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    let millis = if raw > MILLIS_THRESHOLD { raw } else { raw * 1000.0 };
    DateTime::<Utc>::from_timestamp_millis(millis.round() as i64)
}

fn iso_to_utc(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    // A bare trailing `Z` on otherwise naive text (e.g. minutes precision).
    let naive_text = text.strip_suffix('Z').unwrap_or(text);
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(naive_text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(naive_text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).single().expect("valid date")
    }

    #[test]
    fn epoch_seconds_and_millis_agree() {
        let secs = EventTimestamp::Epoch(1_700_000_000.0).to_utc();
        let millis = EventTimestamp::Epoch(1_700_000_000_000.0).to_utc();
        assert!(secs.is_some());
        assert_eq!(secs, millis);
    }

    #[test]
    fn fractional_epoch_keeps_millisecond_precision() {
        let ts = EventTimestamp::Epoch(1_700_000_000.25).to_utc().expect("parse");
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn naive_iso_is_treated_as_utc() {
        let naive = EventTimestamp::Iso8601("2025-03-01T12:30:00".to_string()).to_utc();
        let zulu = EventTimestamp::Iso8601("2025-03-01T12:30:00Z".to_string()).to_utc();
        assert_eq!(naive, Some(utc(2025, 3, 1, 12, 30, 0)));
        assert_eq!(naive, zulu);
    }

    #[test]
    fn offsets_are_normalized() {
        let ts = EventTimestamp::Iso8601("2025-03-01T21:30:00+09:00".to_string()).to_utc();
        assert_eq!(ts, Some(utc(2025, 3, 1, 12, 30, 0)));
        let compact = EventTimestamp::Iso8601("2025-03-01T21:30:00+0900".to_string()).to_utc();
        assert_eq!(compact, ts);
    }

    #[test]
    fn microseconds_and_space_separator_parse() {
        let ts = EventTimestamp::Iso8601("2025-03-01 12:30:00.123456".to_string())
            .to_utc()
            .expect("parse");
        assert_eq!(ts.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn garbage_and_non_positive_values_are_none() {
        assert_eq!(EventTimestamp::Iso8601("yesterday".to_string()).to_utc(), None);
        assert_eq!(EventTimestamp::Epoch(0.0).to_utc(), None);
        assert_eq!(EventTimestamp::Epoch(-5.0).to_utc(), None);
        assert_eq!(EventTimestamp::Epoch(f64::NAN).to_utc(), None);
        assert_eq!(EventTimestamp::from_value(&json!(null)), None);
        assert_eq!(EventTimestamp::from_value(&json!("  ")), None);
        assert_eq!(EventTimestamp::from_value(&json!({"nested": 1})), None);
    }

    #[test]
    fn numeric_strings_are_epochs() {
        assert_eq!(
            EventTimestamp::from_value(&json!("1700000000")),
            Some(EventTimestamp::Epoch(1_700_000_000.0))
        );
    }

    #[test]
    fn first_present_key_wins() {
        let event = json!({"time": 1_700_000_100, "created_at": "2020-01-01T00:00:00Z"});
        let ts = event_timestamp(event.as_object().expect("object")).expect("parse");
        assert_eq!(ts.timestamp(), 1_700_000_100);

        let only_created = json!({"created_at": "2020-01-01T00:00:00Z"});
        assert_eq!(
            event_timestamp(only_created.as_object().expect("object")),
            Some(utc(2020, 1, 1, 0, 0, 0))
        );
        assert_eq!(event_timestamp(json!({"role": "user"}).as_object().expect("object")), None);
    }

    proptest! {
        #[test]
        fn arbitrary_text_never_panics(text in ".*") {
            let _ = EventTimestamp::Iso8601(text.clone()).to_utc();
            let _ = EventTimestamp::from_value(&Value::String(text));
        }

        #[test]
        fn arbitrary_epochs_never_panic(raw in proptest::num::f64::ANY) {
            let _ = EventTimestamp::Epoch(raw).to_utc();
        }
    }
}
