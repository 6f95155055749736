use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::WindowConfig;
use crate::entry::{LogEntry, RowIndex};
use crate::window::chunk::{Chunk, LogRow};

/// Inclusive span of grid rows currently rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleRange {
    pub first_row_index: RowIndex,
    pub last_row_index: RowIndex,
}

impl VisibleRange {
    pub fn new(first_row_index: RowIndex, last_row_index: RowIndex) -> Self {
        Self {
            first_row_index,
            last_row_index,
        }
    }
}

/// Assigns ascending indices to `entries` starting at `start_index`.
pub fn rows_from_entries(entries: Vec<Arc<LogEntry>>, start_index: RowIndex) -> Vec<LogRow> {
    entries
        .into_iter()
        .enumerate()
        .map(|(offset, entry)| LogRow::new(start_index + offset as RowIndex, entry))
        .collect()
}

/// Assigns ascending indices to `entries` such that the last row lands just
/// before `end_index`.
pub fn rows_ending_at(entries: Vec<Arc<LogEntry>>, end_index: RowIndex) -> Vec<LogRow> {
    let start_index = end_index - entries.len() as RowIndex;
    rows_from_entries(entries, start_index)
}

/// Flattens both chunks into a sparse index-to-entry map. Rows from the
/// bottom chunk win when indices collide.
pub fn merge_rows(top: &Chunk, bottom: &Chunk) -> BTreeMap<RowIndex, Arc<LogEntry>> {
    let mut merged = BTreeMap::new();
    for row in top.rows().iter().chain(bottom.rows()) {
        merged.insert(row.index, Arc::clone(&row.entry));
    }
    merged
}

/// Index of the first addressable row: the top chunk's start when it has
/// rows, otherwise the bottom's, otherwise the configured center.
pub fn window_start_row_index(top: &Chunk, bottom: &Chunk, config: &WindowConfig) -> RowIndex {
    top.start_row_index()
        .or_else(|| bottom.start_row_index())
        .unwrap_or(config.center_row_index)
}

/// Index one past the last addressable row.
pub fn window_end_row_index(top: &Chunk, bottom: &Chunk, config: &WindowConfig) -> RowIndex {
    bottom
        .end_row_index()
        .or_else(|| top.end_row_index())
        .unwrap_or(config.center_row_index)
}

/// Index of the seam between the two chunks: the bottom chunk's first row
/// when it has rows, otherwise one past the top chunk's last row.
pub fn chunk_boundary_row_index(top: &Chunk, bottom: &Chunk, config: &WindowConfig) -> RowIndex {
    bottom
        .start_row_index()
        .or_else(|| top.end_row_index())
        .unwrap_or(config.center_row_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Position;
    use crate::window::chunk::LoadedChunk;
    use chrono::{TimeZone, Utc};

    fn entry(secs: i64) -> Arc<LogEntry> {
        let position = Position::new(Utc.timestamp_opt(secs, 0).unwrap(), 0);
        Arc::new(LogEntry::new(position, serde_json::json!({})))
    }

    fn chunk(rows: Vec<LogRow>) -> Chunk {
        Chunk::Loaded(LoadedChunk::classify(rows, 100))
    }

    #[test]
    fn rows_ending_at_places_last_row_before_end() {
        let rows = rows_ending_at(vec![entry(1), entry(2), entry(3)], 5000);
        let indices: Vec<RowIndex> = rows.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![4997, 4998, 4999]);
    }

    #[test]
    fn rows_from_entries_starts_at_given_index() {
        let rows = rows_from_entries(vec![entry(1), entry(2)], 5000);
        let indices: Vec<RowIndex> = rows.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![5000, 5001]);
    }

    #[test]
    fn merge_prefers_bottom_rows_on_collision() {
        let top = chunk(vec![LogRow::new(10, entry(1)), LogRow::new(11, entry(2))]);
        let bottom = chunk(vec![LogRow::new(11, entry(7)), LogRow::new(12, entry(8))]);
        let merged = merge_rows(&top, &bottom);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[&11].position.timestamp.timestamp(), 7);
    }

    #[test]
    fn window_bounds_fall_back_across_chunks() {
        let config = WindowConfig::default();
        let top = chunk(vec![LogRow::new(4998, entry(1)), LogRow::new(4999, entry(2))]);
        let bottom = chunk(vec![LogRow::new(5000, entry(3))]);

        assert_eq!(window_start_row_index(&top, &bottom, &config), 4998);
        assert_eq!(window_end_row_index(&top, &bottom, &config), 5001);
        assert_eq!(chunk_boundary_row_index(&top, &bottom, &config), 5000);

        let empty = Chunk::Uninitialized;
        assert_eq!(window_start_row_index(&empty, &bottom, &config), 5000);
        assert_eq!(window_end_row_index(&top, &empty, &config), 5000);
        assert_eq!(chunk_boundary_row_index(&top, &empty, &config), 5000);

        assert_eq!(
            window_start_row_index(&empty, &empty, &config),
            config.center_row_index
        );
    }
}
