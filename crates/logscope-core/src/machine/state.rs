use std::sync::Arc;

use strum_macros::Display;

use crate::config::WindowConfig;
use crate::entry::{ChunkEdge, DataView, FieldFilter, LogEntry, Position, RowIndex, TimeRange};
use crate::source::SourceError;
use crate::window::chunk::{Chunk, FillLevel, LoadedChunk, LogRow};
use crate::window::row;

/// Settled condition of one chunk slot, derived from the chunk itself
/// whenever the machine re-enters a steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChunkHealth {
    /// Loaded with a full page; more data may exist past the edge.
    Full,
    /// Loaded with rows but short of a full page.
    Partial,
    /// Loaded with zero rows.
    Empty,
    Failed,
}

impl ChunkHealth {
    pub fn of(chunk: &Chunk) -> Self {
        match chunk.fill() {
            Some(FillLevel::Full) => ChunkHealth::Full,
            Some(FillLevel::Partial) => ChunkHealth::Partial,
            Some(FillLevel::Empty) => ChunkHealth::Empty,
            None => ChunkHealth::Failed,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            ChunkHealth::Full | ChunkHealth::Partial | ChunkHealth::Empty
        )
    }
}

/// Where the grid's scroll position stands relative to the loaded rows.
///
/// After a load replaces rows the grid is stale until it has been
/// repositioned and has reported back. Paging guards only fire once the
/// grid is synchronized again, which keeps one user scroll from triggering
/// a cascade of loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum GridSync {
    /// Chunks changed shape in place; waiting for the grid's next report.
    Unknown,
    /// A centered load replaced both chunks.
    StaleAfterLoadAround,
    /// A backward page replaced the top chunk.
    StaleAfterLoadBefore,
    /// A forward page replaced the bottom chunk.
    StaleAfterLoadAfter,
    /// A reposition command was issued; waiting for the grid to confirm.
    Waiting,
    Synchronized,
}

/// Progress of one side during a dual-sided reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReloadSide {
    Pending,
    Settled,
}

/// Grid synchronization while tailing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TailSync {
    /// New rows were appended; the next grid report triggers a snap to the
    /// end of the window.
    StaleAfterLoadTail,
    Waiting,
    Synchronized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailPhase {
    /// A tail poll is in flight.
    Loading,
    /// The poll settled; the delay timer is running.
    Loaded(TailSync),
}

/// Load status of the window.
///
/// One flat value per state; concurrent aspects (per-chunk health, grid
/// synchronization, reload sides) ride along as payload so a transition is
/// a single assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum WindowStatus {
    /// No load has been requested yet.
    Uninitialized,
    /// Both chunks are being fetched around the anchor position.
    LoadingAround,
    /// The centered load failed; nothing is renderable.
    FailedNoData,
    /// Both chunk slots are settled and rows are renderable.
    Loaded {
        top: ChunkHealth,
        bottom: ChunkHealth,
        grid: GridSync,
    },
    /// A backward page is in flight; the previous rows stay renderable.
    LoadingTop,
    /// A forward page is in flight; the previous rows stay renderable.
    LoadingBottom,
    /// A failed top load is being retried from its recorded edge.
    ExtendingTop,
    /// A failed bottom load is being retried from its recorded edge.
    ExtendingBottom,
    /// Both chunks are being refetched in place after a query change.
    Reloading {
        top: ReloadSide,
        bottom: ReloadSide,
    },
    /// The window follows the end of the stream.
    Tailing(TailPhase),
}

impl WindowStatus {
    pub fn is_reloading(&self) -> bool {
        matches!(self, WindowStatus::Reloading { .. })
    }

    pub fn is_tailing(&self) -> bool {
        matches!(self, WindowStatus::Tailing(_))
    }

    /// Whether the context holds rows from a settled load. The selector
    /// additionally withholds them while a reload is replacing the query.
    pub fn renders_rows(&self) -> bool {
        !matches!(
            self,
            WindowStatus::Uninitialized | WindowStatus::LoadingAround | WindowStatus::FailedNoData
        )
    }
}

/// Everything the reducer reads and writes besides the status itself.
///
/// All mutation goes through the setters so the revision counter stays
/// accurate; downstream change detection and selector memoization key off
/// it.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowContext {
    config: WindowConfig,
    data_view: DataView,
    time_range: TimeRange,
    filters: Vec<FieldFilter>,
    columns: Vec<String>,
    position: Position,
    top_chunk: Chunk,
    bottom_chunk: Chunk,
    last_error: Option<Arc<SourceError>>,
    revision: u64,
}

impl WindowContext {
    pub fn new(config: WindowConfig, data_view: DataView, time_range: TimeRange) -> Self {
        let position = Position::new(time_range.midpoint(), 0);
        Self {
            config,
            data_view,
            time_range,
            filters: Vec::new(),
            columns: Vec::new(),
            position,
            top_chunk: Chunk::Uninitialized,
            bottom_chunk: Chunk::Uninitialized,
            last_error: None,
            revision: 0,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn data_view(&self) -> &DataView {
        &self.data_view
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn top_chunk(&self) -> &Chunk {
        &self.top_chunk
    }

    pub fn bottom_chunk(&self) -> &Chunk {
        &self.bottom_chunk
    }

    pub fn last_error(&self) -> Option<&Arc<SourceError>> {
        self.last_error.as_ref()
    }

    /// Monotonic counter bumped by every observable mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_position(&mut self, position: Position) {
        if self.position != position {
            self.position = position;
            self.touch();
        }
    }

    pub fn set_time_range(&mut self, time_range: TimeRange) {
        if self.time_range != time_range {
            self.time_range = time_range;
            self.touch();
        }
    }

    pub fn set_filters(&mut self, filters: Vec<FieldFilter>) {
        if self.filters != filters {
            self.filters = filters;
            self.touch();
        }
    }

    pub fn set_columns(&mut self, columns: Vec<String>) {
        if self.columns != columns {
            self.columns = columns;
            self.touch();
        }
    }

    pub fn set_data_view(&mut self, data_view: DataView) {
        if self.data_view != data_view {
            self.data_view = data_view;
            self.touch();
        }
    }

    pub fn set_top_chunk(&mut self, chunk: Chunk) {
        self.top_chunk = chunk;
        self.touch();
    }

    pub fn set_bottom_chunk(&mut self, chunk: Chunk) {
        self.bottom_chunk = chunk;
        self.touch();
    }

    pub fn set_chunks(&mut self, top: Chunk, bottom: Chunk) {
        self.top_chunk = top;
        self.bottom_chunk = bottom;
        self.touch();
    }

    pub fn record_error(&mut self, error: Arc<SourceError>) {
        self.last_error = Some(error);
        self.touch();
    }

    pub fn clear_error(&mut self) {
        if self.last_error.take().is_some() {
            self.touch();
        }
    }

    /// Shifts the window one chunk backward: the top chunk becomes the
    /// bottom chunk, the old bottom is discarded, and a new top load is
    /// marked in flight from the old top's leading edge. Returns the edge
    /// and anchor the load should use.
    pub fn rotate_backward(&mut self) -> (Option<ChunkEdge>, RowIndex) {
        let edge = self.top_chunk.first_position().map(ChunkEdge::exclusive);
        let anchor = self
            .top_chunk
            .start_row_index()
            .unwrap_or(self.config.center_row_index);
        self.bottom_chunk = std::mem::replace(&mut self.top_chunk, Chunk::Loading { edge, anchor });
        self.touch();
        (edge, anchor)
    }

    /// Shifts the window one chunk forward, mirror of [`rotate_backward`].
    ///
    /// [`rotate_backward`]: WindowContext::rotate_backward
    pub fn rotate_forward(&mut self) -> (Option<ChunkEdge>, RowIndex) {
        let edge = self.bottom_chunk.last_position().map(ChunkEdge::exclusive);
        let anchor = self
            .bottom_chunk
            .end_row_index()
            .unwrap_or(self.config.center_row_index);
        self.top_chunk = std::mem::replace(&mut self.bottom_chunk, Chunk::Loading { edge, anchor });
        self.touch();
        (edge, anchor)
    }

    /// Appends tail rows after the current end of the window, dropping any
    /// at or before already-loaded positions. Returns how many rows were
    /// kept.
    pub fn append_tail_rows(&mut self, rows: Vec<LogRow>) -> usize {
        let chunk_size = self.config.chunk_size;
        match &mut self.bottom_chunk {
            Chunk::Loaded(chunk) => {
                let kept = chunk.append_after(rows, chunk_size);
                if kept > 0 {
                    self.touch();
                }
                kept
            }
            _ => {
                let floor = self.top_chunk.last_position();
                let start_index = rows
                    .first()
                    .map_or(self.config.center_row_index, |row| row.index);
                let entries: Vec<Arc<LogEntry>> = rows
                    .into_iter()
                    .filter(|row| floor.is_none_or(|last| row.position() > last))
                    .map(|row| row.entry)
                    .collect();
                let kept = entries.len();
                let fresh = row::rows_from_entries(entries, start_index);
                self.bottom_chunk = Chunk::Loaded(LoadedChunk::classify(fresh, chunk_size));
                self.touch();
                kept
            }
        }
    }

    pub fn first_loaded_position(&self) -> Option<Position> {
        self.top_chunk
            .first_position()
            .or_else(|| self.bottom_chunk.first_position())
    }

    pub fn last_loaded_position(&self) -> Option<Position> {
        self.bottom_chunk
            .last_position()
            .or_else(|| self.top_chunk.last_position())
    }

    pub fn start_row_index(&self) -> RowIndex {
        row::window_start_row_index(&self.top_chunk, &self.bottom_chunk, &self.config)
    }

    pub fn end_row_index(&self) -> RowIndex {
        row::window_end_row_index(&self.top_chunk, &self.bottom_chunk, &self.config)
    }

    pub fn boundary_row_index(&self) -> RowIndex {
        row::chunk_boundary_row_index(&self.top_chunk, &self.bottom_chunk, &self.config)
    }
}

/// The reducer's whole world: one status plus one context.
#[derive(Debug, Clone)]
pub struct WindowState {
    pub status: WindowStatus,
    pub context: WindowContext,
}

impl WindowState {
    pub fn new(config: WindowConfig, data_view: DataView, time_range: TimeRange) -> Self {
        Self {
            status: WindowStatus::Uninitialized,
            context: WindowContext::new(config, data_view, time_range),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn context() -> WindowContext {
        let range = TimeRange::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(1000, 0).unwrap(),
        );
        WindowContext::new(WindowConfig::default(), DataView::new("logs", "Logs"), range)
    }

    fn row(secs: i64, index: RowIndex) -> LogRow {
        let position = Position::new(Utc.timestamp_opt(secs, 0).unwrap(), 0);
        LogRow::new(
            index,
            Arc::new(LogEntry::new(position, serde_json::json!({}))),
        )
    }

    #[test]
    fn setters_bump_revision_only_on_change() {
        let mut context = context();
        let before = context.revision();
        context.set_position(context.position());
        assert_eq!(context.revision(), before);
        context.set_position(Position::new(Utc.timestamp_opt(7, 0).unwrap(), 0));
        assert_eq!(context.revision(), before + 1);
    }

    #[test]
    fn new_context_anchors_at_the_range_midpoint() {
        let context = context();
        assert_eq!(
            context.position().timestamp,
            Utc.timestamp_opt(500, 0).unwrap()
        );
    }

    #[test]
    fn rotate_backward_reuses_the_top_chunk_as_bottom() {
        let mut context = context();
        let top = LoadedChunk::classify(vec![row(100, 4998), row(110, 4999)], 2);
        let bottom = LoadedChunk::classify(vec![row(120, 5000), row(130, 5001)], 2);
        context.set_chunks(Chunk::Loaded(top.clone()), Chunk::Loaded(bottom));

        let (edge, anchor) = context.rotate_backward();

        assert_eq!(anchor, 4998);
        assert_eq!(
            edge,
            Some(ChunkEdge::exclusive(Position::new(
                Utc.timestamp_opt(100, 0).unwrap(),
                0
            )))
        );
        assert_eq!(context.bottom_chunk(), &Chunk::Loaded(top));
        assert!(matches!(context.top_chunk(), Chunk::Loading { .. }));
    }

    #[test]
    fn rotate_forward_reuses_the_bottom_chunk_as_top() {
        let mut context = context();
        let top = LoadedChunk::classify(vec![row(100, 4998), row(110, 4999)], 2);
        let bottom = LoadedChunk::classify(vec![row(120, 5000), row(130, 5001)], 2);
        context.set_chunks(Chunk::Loaded(top), Chunk::Loaded(bottom.clone()));

        let (edge, anchor) = context.rotate_forward();

        assert_eq!(anchor, 5002);
        assert_eq!(
            edge,
            Some(ChunkEdge::exclusive(Position::new(
                Utc.timestamp_opt(130, 0).unwrap(),
                0
            )))
        );
        assert_eq!(context.top_chunk(), &Chunk::Loaded(bottom));
        assert!(matches!(context.bottom_chunk(), Chunk::Loading { .. }));
    }

    #[test]
    fn append_tail_rows_installs_a_bottom_chunk_when_missing() {
        let mut context = context();
        let top = LoadedChunk::classify(vec![row(100, 4999)], 200);
        context.set_chunks(Chunk::Loaded(top), Chunk::Uninitialized);

        let kept = context.append_tail_rows(vec![row(90, 5000), row(110, 5001), row(120, 5002)]);

        assert_eq!(kept, 2);
        assert_eq!(context.bottom_chunk().start_row_index(), Some(5000));
        assert_eq!(context.end_row_index(), 5002);
    }

    #[test]
    fn chunk_health_derives_from_fill_level() {
        assert_eq!(ChunkHealth::of(&Chunk::Uninitialized), ChunkHealth::Failed);
        assert_eq!(
            ChunkHealth::of(&Chunk::Loaded(LoadedChunk::empty())),
            ChunkHealth::Empty
        );
        let full = LoadedChunk::classify(vec![row(1, 0), row(2, 1)], 2);
        assert_eq!(ChunkHealth::of(&Chunk::Loaded(full)), ChunkHealth::Full);
        let partial = LoadedChunk::classify(vec![row(1, 0)], 2);
        assert_eq!(
            ChunkHealth::of(&Chunk::Loaded(partial)),
            ChunkHealth::Partial
        );
        assert!(ChunkHealth::Empty.is_loaded());
        assert!(!ChunkHealth::Failed.is_loaded());
    }
}
