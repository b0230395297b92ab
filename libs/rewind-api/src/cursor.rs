use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Exclusive lower bound `(ts, seq)` for the next page of a stream.
///
/// Rendered as `"{ts}_{seq}"`. Parsing never fails: anything unreadable
/// degrades to [`Cursor::START`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cursor {
    pub ts: i64,
    pub seq: i64,
}

impl Cursor {
    pub const START: Cursor = Cursor { ts: 0, seq: 0 };

    pub fn new(ts: i64, seq: i64) -> Self {
        Self { ts, seq }
    }

    /// Accepts `ts_seq`, `ts,seq` or a bare `ts`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::START;
        }
        let (ts, seq) = match raw.split_once('_').or_else(|| raw.split_once(',')) {
            Some((ts, seq)) => (ts, Some(seq)),
            None => (raw, None),
        };
        let ts = match ts.trim().parse::<i64>() {
            Ok(v) => v,
            Err(_) => return Self::START,
        };
        let seq = match seq.map(|s| s.trim().parse::<i64>()) {
            None => 0,
            Some(Ok(v)) => v,
            Some(Err(_)) => return Self::START,
        };
        Self { ts, seq }
    }

    /// Optional query parameter → cursor.
    pub fn parse_opt(raw: Option<&str>) -> Self {
        raw.map(Self::parse).unwrap_or(Self::START)
    }

    /// Whether `(ts, seq)` lies strictly after this cursor.
    pub fn is_before(&self, ts: i64, seq: i64) -> bool {
        (ts, seq) > (self.ts, self.seq)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.ts, self.seq)
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Cursor::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_separators() {
        assert_eq!(Cursor::parse("1700000000000_7"), Cursor::new(1_700_000_000_000, 7));
        assert_eq!(Cursor::parse(" 200 , 3 "), Cursor::new(200, 3));
        assert_eq!(Cursor::parse("42"), Cursor::new(42, 0));
    }

    #[test]
    fn garbage_degrades_to_start() {
        for raw in ["", "   ", "abc", "12_x", "_5", "1.5_2"] {
            assert_eq!(Cursor::parse(raw), Cursor::START, "input {raw:?}");
        }
        assert_eq!(Cursor::parse_opt(None), Cursor::START);
    }

    #[test]
    fn display_matches_parse() {
        let c = Cursor::new(100, 2);
        assert_eq!(c.to_string(), "100_2");
        assert_eq!(Cursor::parse(&c.to_string()), c);
    }

    #[test]
    fn exclusive_bound() {
        let c = Cursor::new(100, 1);
        assert!(!c.is_before(100, 1));
        assert!(c.is_before(100, 2));
        assert!(c.is_before(101, 0));
        assert!(!c.is_before(99, 9));
    }
}
