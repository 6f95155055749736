//! Page fetching for the window machine's load effects.
//!
//! Each loader returns the completion event the machine consumes next, so
//! the runtime can post the result straight back into the reducer.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WindowConfig;
use crate::entry::{ChunkEdge, DataView, FieldFilter, LogEntry, Position, RowIndex, SortDirection, TimeRange};
use crate::machine::event::Event;
use crate::machine::state::WindowContext;
use crate::source::{EntriesRequest, EntryPage, LogEntrySource, SourceError};
use crate::window::chunk::LoadedChunk;
use crate::window::row;

/// Immutable copy of the query scope a load runs against.
///
/// Taken at dispatch time, so a context change while the request is in
/// flight cannot leak into it.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub data_view: DataView,
    pub filters: Vec<FieldFilter>,
    pub columns: Vec<String>,
    pub time_range: TimeRange,
}

impl QuerySnapshot {
    pub fn of(context: &WindowContext) -> Self {
        Self {
            data_view: context.data_view().clone(),
            filters: context.filters().to_vec(),
            columns: context.columns().to_vec(),
            time_range: context.time_range(),
        }
    }
}

/// Fetches pages from the source and shapes them into anchored chunks.
#[derive(Clone)]
pub struct ChunkLoader {
    source: Arc<dyn LogEntrySource>,
    config: WindowConfig,
}

impl ChunkLoader {
    pub fn new(source: Arc<dyn LogEntrySource>, config: WindowConfig) -> Self {
        Self { source, config }
    }

    /// Fetches both chunks around `position`. The backward page excludes the
    /// anchor so the anchor row lands at `center_index`, the first row of
    /// the bottom chunk.
    pub async fn load_around(
        &self,
        snapshot: QuerySnapshot,
        position: Position,
        center_index: RowIndex,
        token: CancellationToken,
    ) -> Event {
        let before = self.fetch_page(
            &snapshot,
            SortDirection::Desc,
            Some(ChunkEdge::exclusive(position)),
            self.config.fetch_limit(),
            token.clone(),
        );
        let after = self.fetch_page(
            &snapshot,
            SortDirection::Asc,
            Some(ChunkEdge::inclusive(position)),
            self.config.fetch_limit(),
            token.clone(),
        );
        match tokio::join!(before, after) {
            (Ok(top_page), Ok(bottom_page)) => Event::LoadAroundSucceeded {
                top: self.chunk_ending_at(top_page, center_index),
                bottom: self.chunk_starting_at(bottom_page, center_index),
            },
            (Err(error), _) | (_, Err(error)) => Event::LoadAroundFailed {
                error: Arc::new(error),
            },
        }
    }

    /// Fetches one page of older entries, ending just before `end_index`.
    pub async fn load_before(
        &self,
        snapshot: QuerySnapshot,
        edge: Option<ChunkEdge>,
        end_index: RowIndex,
        token: CancellationToken,
    ) -> Event {
        let result = self
            .fetch_page(
                &snapshot,
                SortDirection::Desc,
                edge,
                self.config.fetch_limit(),
                token,
            )
            .await;
        match result {
            Ok(page) => Event::LoadBeforeSucceeded {
                chunk: self.chunk_ending_at(page, end_index),
            },
            Err(error) => Event::LoadBeforeFailed {
                error: Arc::new(error),
            },
        }
    }

    /// Fetches one page of newer entries, starting at `start_index`.
    pub async fn load_after(
        &self,
        snapshot: QuerySnapshot,
        edge: Option<ChunkEdge>,
        start_index: RowIndex,
        token: CancellationToken,
    ) -> Event {
        let result = self
            .fetch_page(
                &snapshot,
                SortDirection::Asc,
                edge,
                self.config.fetch_limit(),
                token,
            )
            .await;
        match result {
            Ok(page) => Event::LoadAfterSucceeded {
                chunk: self.chunk_starting_at(page, start_index),
            },
            Err(error) => Event::LoadAfterFailed {
                error: Arc::new(error),
            },
        }
    }

    /// Fetches entries past the current end of the window. With no edge
    /// (nothing loaded yet) it takes the newest page instead, so tailing
    /// can start cold.
    pub async fn load_tail(
        &self,
        snapshot: QuerySnapshot,
        edge: Option<ChunkEdge>,
        start_index: RowIndex,
        token: CancellationToken,
    ) -> Event {
        let direction = match edge {
            Some(_) => SortDirection::Asc,
            None => SortDirection::Desc,
        };
        let result = self
            .fetch_page(&snapshot, direction, edge, self.config.chunk_size, token)
            .await;
        match result {
            Ok(page) => {
                let entries = match direction {
                    SortDirection::Asc => self.truncate_back(page),
                    SortDirection::Desc => self.truncate_front(page),
                };
                Event::LoadTailSucceeded {
                    rows: row::rows_from_entries(entries, start_index),
                }
            }
            Err(error) => Event::LoadTailFailed {
                error: Arc::new(error),
            },
        }
    }

    async fn fetch_page(
        &self,
        snapshot: &QuerySnapshot,
        direction: SortDirection,
        edge: Option<ChunkEdge>,
        limit: usize,
        token: CancellationToken,
    ) -> Result<EntryPage, SourceError> {
        let request = EntriesRequest {
            data_view: snapshot.data_view.clone(),
            filters: snapshot.filters.clone(),
            columns: snapshot.columns.clone(),
            time_range: snapshot.time_range,
            direction,
            edge,
            limit,
        };
        debug!(source = self.source.name(), %direction, limit, "fetching entry page");
        self.source.fetch_entries(request, token).await
    }

    fn chunk_ending_at(&self, page: EntryPage, end_index: RowIndex) -> LoadedChunk {
        let entries = self.truncate_front(page);
        LoadedChunk::classify(row::rows_ending_at(entries, end_index), self.config.chunk_size)
    }

    fn chunk_starting_at(&self, page: EntryPage, start_index: RowIndex) -> LoadedChunk {
        let entries = self.truncate_back(page);
        LoadedChunk::classify(
            row::rows_from_entries(entries, start_index),
            self.config.chunk_size,
        )
    }

    /// Pages are requested one row past the chunk size; the end the page
    /// grew away from keeps its rows, the far end loses the overflow.
    fn truncate_back(&self, page: EntryPage) -> Vec<Arc<LogEntry>> {
        let mut entries = page.entries;
        entries.truncate(self.config.chunk_size);
        entries
    }

    fn truncate_front(&self, page: EntryPage) -> Vec<Arc<LogEntry>> {
        let mut entries = page.entries;
        let excess = entries.len().saturating_sub(self.config.chunk_size);
        entries.drain(..excess);
        entries
    }
}
