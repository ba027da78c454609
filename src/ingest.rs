//! Ingestion interface: the sole boundary where untyped data enters the core.
//!
//! The scraping collaborator supplies a sequence of raw records, each a
//! mapping of named fields to scalar values tagged with a record kind.
//! Everything downstream of the normalizer works on validated entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Race,
    Runner,
    OddsSnapshot,
    Result,
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Race => "race",
            RecordKind::Runner => "runner",
            RecordKind::OddsSnapshot => "odds_snapshot",
            RecordKind::Result => "result",
        }
    }
}

/// A loosely typed scalar field value.
///
/// Untagged: timestamps are tried before plain text so RFC 3339 strings
/// parse as timestamps, and integers before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

/// One raw ingested record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub kind: RecordKind,
    pub fields: BTreeMap<String, Scalar>,
}

impl RawRecord {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Scalar) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Text field, if present and textual.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(Scalar::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer field; accepts whole-valued numbers too.
    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(Scalar::Integer(i)) => Some(*i),
            Some(Scalar::Number(n)) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    /// Numeric field; accepts integers.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.fields.get(key) {
            Some(Scalar::Number(n)) => Some(*n),
            Some(Scalar::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// Timestamp field; accepts RFC 3339 text.
    pub fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.fields.get(key) {
            Some(Scalar::Timestamp(t)) => Some(*t),
            Some(Scalar::Text(s)) => s.parse::<DateTime<Utc>>().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_accessors() {
        let rec = RawRecord::new(RecordKind::Race)
            .with("race_id", Scalar::Text("202401010101".to_string()))
            .with("distance", Scalar::Integer(1600))
            .with("weight", Scalar::Number(57.5))
            .with(
                "start_time",
                Scalar::Text("2024-01-01T05:10:00Z".to_string()),
            );

        assert_eq!(rec.text("race_id"), Some("202401010101"));
        assert_eq!(rec.integer("distance"), Some(1600));
        assert_eq!(rec.number("weight"), Some(57.5));
        assert!(rec.timestamp("start_time").is_some());
        assert_eq!(rec.text("missing"), None);
    }

    #[test]
    fn test_integer_from_whole_number() {
        let rec = RawRecord::new(RecordKind::Runner).with("post_position", Scalar::Number(4.0));
        assert_eq!(rec.integer("post_position"), Some(4));

        let rec = RawRecord::new(RecordKind::Runner).with("post_position", Scalar::Number(4.5));
        assert_eq!(rec.integer("post_position"), None);
    }

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "kind": "odds_snapshot",
            "fields": {
                "race_id": "R1",
                "post_position": 3,
                "at": "2024-01-01T04:55:00Z",
                "win_price": 2.4
            }
        }"#;
        let rec: RawRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.kind, RecordKind::OddsSnapshot);
        assert_eq!(rec.integer("post_position"), Some(3));
        assert!(rec.timestamp("at").is_some());
        assert_eq!(rec.number("win_price"), Some(2.4));
    }
}
