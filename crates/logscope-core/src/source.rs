use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::entry::{ChunkEdge, DataView, FieldFilter, LogEntry, SortDirection, TimeRange};

pub mod memory;

pub use memory::MemoryLogStore;

/// Failures from the backing document store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("search failed: {message}")]
    Search { message: String },
    #[error("document store disconnected")]
    Disconnected,
    #[error("request cancelled")]
    Cancelled,
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl SourceError {
    pub fn search(message: impl Into<String>) -> Self {
        Self::Search {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }
}

/// One page request against the store.
///
/// `direction` selects which side of `edge` the page is taken from: `Asc`
/// pages toward later entries (from the range start when `edge` is `None`),
/// `Desc` pages toward earlier entries (from the range end when `edge` is
/// `None`).
#[derive(Debug, Clone, PartialEq)]
pub struct EntriesRequest {
    pub data_view: DataView,
    pub filters: Vec<FieldFilter>,
    /// Fields to materialize on returned entries; empty keeps every field.
    pub columns: Vec<String>,
    pub time_range: TimeRange,
    pub direction: SortDirection,
    pub edge: Option<ChunkEdge>,
    pub limit: usize,
}

/// A fetched page, always in ascending (timestamp, tiebreaker) order
/// regardless of the requested direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPage {
    pub entries: Vec<Arc<LogEntry>>,
}

/// Request for entry counts bucketed over a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityRequest {
    pub data_view: DataView,
    pub filters: Vec<FieldFilter>,
    pub time_range: TimeRange,
    pub bucket_interval: TimeDelta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityBucket {
    pub start: DateTime<Utc>,
    pub count: u64,
}

/// Paged document-search contract every backing store implements.
#[async_trait]
pub trait LogEntrySource: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn fetch_entries(
        &self,
        request: EntriesRequest,
        token: CancellationToken,
    ) -> Result<EntryPage, SourceError>;

    async fn fetch_density(
        &self,
        request: DensityRequest,
        token: CancellationToken,
    ) -> Result<Vec<DensityBucket>, SourceError>;
}
