use std::sync::Arc;

use strum_macros::Display;

use crate::entry::{ChunkEdge, LogEntry, Position, RowIndex};
use crate::source::SourceError;

/// How much of a requested page a loaded chunk actually holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FillLevel {
    /// Hit the fetch-size limit; more data may exist past the edge.
    Full,
    /// Fewer rows than requested; a real boundary was reached.
    Partial,
    /// Zero rows.
    Empty,
}

/// A log entry bound to its virtual grid row.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub index: RowIndex,
    pub entry: Arc<LogEntry>,
}

impl LogRow {
    pub fn new(index: RowIndex, entry: Arc<LogEntry>) -> Self {
        Self { index, entry }
    }

    pub fn position(&self) -> Position {
        self.entry.position
    }
}

/// An ordered run of rows with contiguous indices.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedChunk {
    rows: Vec<LogRow>,
    fill: FillLevel,
}

impl LoadedChunk {
    /// Builds a chunk from rows already ordered by position with contiguous
    /// indices, classifying the fill level against `chunk_size`.
    pub fn classify(rows: Vec<LogRow>, chunk_size: usize) -> Self {
        let fill = Self::fill_for(rows.len(), chunk_size);
        Self { rows, fill }
    }

    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            fill: FillLevel::Empty,
        }
    }

    fn fill_for(len: usize, chunk_size: usize) -> FillLevel {
        if len == 0 {
            FillLevel::Empty
        } else if len >= chunk_size {
            FillLevel::Full
        } else {
            FillLevel::Partial
        }
    }

    pub fn rows(&self) -> &[LogRow] {
        &self.rows
    }

    pub fn fill(&self) -> FillLevel {
        self.fill
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_position(&self) -> Option<Position> {
        self.rows.first().map(LogRow::position)
    }

    pub fn last_position(&self) -> Option<Position> {
        self.rows.last().map(LogRow::position)
    }

    /// Index of the first row.
    pub fn start_row_index(&self) -> Option<RowIndex> {
        self.rows.first().map(|row| row.index)
    }

    /// Index one past the last row.
    pub fn end_row_index(&self) -> Option<RowIndex> {
        self.rows.last().map(|row| row.index + 1)
    }

    /// Appends rows strictly after the current last position, re-indexing
    /// them to continue this chunk. Rows at or before the last position are
    /// dropped. Returns how many rows were kept.
    pub fn append_after(&mut self, rows: Vec<LogRow>, chunk_size: usize) -> usize {
        let floor = self.last_position();
        let mut next_index = self
            .end_row_index()
            .unwrap_or_else(|| rows.first().map_or(0, |row| row.index));
        let mut kept = 0;
        for row in rows {
            if floor.is_some_and(|last| row.position() <= last) {
                continue;
            }
            if self
                .rows
                .last()
                .is_some_and(|prev| row.position() <= prev.position())
            {
                continue;
            }
            self.rows.push(LogRow::new(next_index, row.entry));
            next_index += 1;
            kept += 1;
        }
        self.fill = Self::fill_for(self.rows.len(), chunk_size);
        kept
    }
}

/// One contiguous run of log rows plus its load status.
///
/// The window holds two of these; they are replaced wholesale by reducer
/// actions, never mutated from outside the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// No load attempted yet.
    Uninitialized,
    /// A load is in flight. `edge` is the boundary it extends from (`None`
    /// when the window has no boundary yet) and `anchor` the row index the
    /// fetched rows will attach to.
    Loading {
        edge: Option<ChunkEdge>,
        anchor: RowIndex,
    },
    Loaded(LoadedChunk),
    /// The last load failed. The attempted edge and anchor are kept so a
    /// retry re-issues from the same boundary.
    Failed {
        error: Arc<SourceError>,
        edge: Option<ChunkEdge>,
        anchor: RowIndex,
    },
}

impl Chunk {
    pub fn loaded(&self) -> Option<&LoadedChunk> {
        match self {
            Chunk::Loaded(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub fn is_loaded_nonempty(&self) -> bool {
        self.loaded().is_some_and(|chunk| !chunk.is_empty())
    }

    pub fn rows(&self) -> &[LogRow] {
        self.loaded().map_or(&[], LoadedChunk::rows)
    }

    pub fn fill(&self) -> Option<FillLevel> {
        self.loaded().map(LoadedChunk::fill)
    }

    pub fn first_position(&self) -> Option<Position> {
        self.loaded().and_then(LoadedChunk::first_position)
    }

    pub fn last_position(&self) -> Option<Position> {
        self.loaded().and_then(LoadedChunk::last_position)
    }

    pub fn start_row_index(&self) -> Option<RowIndex> {
        self.loaded().and_then(LoadedChunk::start_row_index)
    }

    pub fn end_row_index(&self) -> Option<RowIndex> {
        self.loaded().and_then(LoadedChunk::end_row_index)
    }

    pub fn error(&self) -> Option<&Arc<SourceError>> {
        match self {
            Chunk::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Edge a retry of this chunk's pending or failed load should re-issue
    /// from.
    pub fn retry_edge(&self) -> Option<ChunkEdge> {
        match self {
            Chunk::Loading { edge, .. } | Chunk::Failed { edge, .. } => *edge,
            _ => None,
        }
    }

    /// Row index a retried load should anchor to.
    pub fn retry_anchor(&self) -> Option<RowIndex> {
        match self {
            Chunk::Loading { anchor, .. } | Chunk::Failed { anchor, .. } => Some(*anchor),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn row(secs: i64, index: RowIndex) -> LogRow {
        let position = Position::new(Utc.timestamp_opt(secs, 0).unwrap(), 0);
        LogRow::new(
            index,
            Arc::new(LogEntry::new(position, serde_json::json!({}))),
        )
    }

    #[test]
    fn classify_by_row_count() {
        assert_eq!(LoadedChunk::classify(vec![], 3).fill(), FillLevel::Empty);
        assert_eq!(
            LoadedChunk::classify(vec![row(1, 0)], 3).fill(),
            FillLevel::Partial
        );
        assert_eq!(
            LoadedChunk::classify(vec![row(1, 0), row(2, 1), row(3, 2)], 3).fill(),
            FillLevel::Full
        );
    }

    #[test]
    fn append_after_drops_already_seen_positions() {
        let mut chunk = LoadedChunk::classify(vec![row(10, 0), row(20, 1)], 5);
        let kept = chunk.append_after(vec![row(15, 100), row(20, 101), row(30, 102)], 5);
        assert_eq!(kept, 1);
        let times: Vec<i64> = chunk
            .rows()
            .iter()
            .map(|r| r.position().timestamp.timestamp())
            .collect();
        assert_eq!(times, vec![10, 20, 30]);
        let indices: Vec<RowIndex> = chunk.rows().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn append_after_into_empty_chunk_keeps_given_indices() {
        let mut chunk = LoadedChunk::empty();
        chunk.append_after(vec![row(10, 500), row(20, 501)], 5);
        assert_eq!(chunk.start_row_index(), Some(500));
        assert_eq!(chunk.end_row_index(), Some(502));
        assert_eq!(chunk.fill(), FillLevel::Partial);
    }

    #[test]
    fn append_after_reindexes_from_chunk_end() {
        let mut chunk = LoadedChunk::classify(vec![row(10, 40), row(20, 41)], 10);
        chunk.append_after(vec![row(30, 0), row(40, 1)], 10);
        let indices: Vec<RowIndex> = chunk.rows().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![40, 41, 42, 43]);
    }

    #[test]
    fn end_row_index_is_exclusive() {
        let chunk = Chunk::Loaded(LoadedChunk::classify(vec![row(10, 7), row(20, 8)], 10));
        assert_eq!(chunk.start_row_index(), Some(7));
        assert_eq!(chunk.end_row_index(), Some(9));
    }
}
