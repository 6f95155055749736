use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Virtual row index in the grid's coordinate space.
///
/// Signed: paging backward walks below the initial center index, so the
/// index space extends in both directions.
pub type RowIndex = i64;

/// Total-order key for log entries: timestamp first, then tiebreaker.
///
/// The tiebreaker disambiguates entries that share a timestamp and matches
/// the ordering the backing store sorts and paginates by.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub timestamp: DateTime<Utc>,
    pub tiebreaker: i64,
}

impl Position {
    pub fn new(timestamp: DateTime<Utc>, tiebreaker: i64) -> Self {
        Self {
            timestamp,
            tiebreaker,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.timestamp.to_rfc3339(), self.tiebreaker)
    }
}

/// Closed interval of wall-clock time the window is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }

    /// Midpoint of the range, used as the initial window anchor.
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.start + (self.end - self.start) / 2
    }

    /// Smallest position inside the range.
    pub fn start_position(&self) -> Position {
        Position::new(self.start, i64::MIN)
    }

    /// Largest position inside the range.
    pub fn end_position(&self) -> Position {
        Position::new(self.end, i64::MAX)
    }
}

/// One stored log document with its assigned position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub position: Position,
    pub fields: serde_json::Value,
}

impl LogEntry {
    pub fn new(position: Position, fields: serde_json::Value) -> Self {
        Self { position, fields }
    }
}

/// Descriptor of the backing stream/index an engine instance reads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataView {
    pub id: String,
    pub title: String,
    pub timestamp_field: String,
}

impl DataView {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            timestamp_field: "@timestamp".to_string(),
        }
    }

    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = field.into();
        self
    }
}

/// Equality filter the store applies to a document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: String,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &serde_json::Value) -> bool {
        match fields.get(&self.field) {
            Some(serde_json::Value::String(s)) => s == &self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Boundary a load extends from.
///
/// Exclusive edges skip entries at exactly this position; inclusive edges
/// keep them. The forward side of a centered load is inclusive so the anchor
/// row lands in the bottom chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEdge {
    pub position: Position,
    pub inclusive: bool,
}

impl ChunkEdge {
    pub fn exclusive(position: Position) -> Self {
        Self {
            position,
            inclusive: false,
        }
    }

    pub fn inclusive(position: Position) -> Self {
        Self {
            position,
            inclusive: true,
        }
    }

    /// Whether an entry at `position` lies beyond this edge when paging
    /// forward (toward later entries).
    pub fn admits_forward(&self, position: Position) -> bool {
        if self.inclusive {
            position >= self.position
        } else {
            position > self.position
        }
    }

    /// Whether an entry at `position` lies beyond this edge when paging
    /// backward (toward earlier entries).
    pub fn admits_backward(&self, position: Position) -> bool {
        if self.inclusive {
            position <= self.position
        } else {
            position < self.position
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn position_orders_by_timestamp_then_tiebreaker() {
        let a = Position::new(ts(10), 5);
        let b = Position::new(ts(10), 6);
        let c = Position::new(ts(11), 0);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn time_range_midpoint_splits_the_range() {
        let range = TimeRange::new(ts(100), ts(200));
        assert_eq!(range.midpoint(), ts(150));
        assert!(range.contains(ts(100)));
        assert!(range.contains(ts(200)));
        assert!(!range.contains(ts(201)));
    }

    #[test]
    fn exclusive_edge_skips_the_edge_position() {
        let edge = ChunkEdge::exclusive(Position::new(ts(10), 3));
        assert!(!edge.admits_forward(Position::new(ts(10), 3)));
        assert!(edge.admits_forward(Position::new(ts(10), 4)));
        assert!(edge.admits_backward(Position::new(ts(10), 2)));
        assert!(!edge.admits_backward(Position::new(ts(10), 3)));
    }

    #[test]
    fn inclusive_edge_keeps_the_edge_position() {
        let edge = ChunkEdge::inclusive(Position::new(ts(10), 3));
        assert!(edge.admits_forward(Position::new(ts(10), 3)));
        assert!(edge.admits_backward(Position::new(ts(10), 3)));
    }

    #[test]
    fn field_filter_matches_string_fields() {
        let filter = FieldFilter::new("service", "api");
        let fields = serde_json::json!({ "service": "api", "level": "info" });
        assert!(filter.matches(&fields));
        let other = serde_json::json!({ "service": "worker" });
        assert!(!filter.matches(&other));
        let missing = serde_json::json!({ "level": "info" });
        assert!(!filter.matches(&missing));
    }
}
