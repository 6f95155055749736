use std::sync::Arc;

use strum_macros::Display;

use crate::entry::{DataView, FieldFilter, Position, TimeRange};
use crate::source::SourceError;
use crate::window::chunk::{LoadedChunk, LogRow};
use crate::window::row::VisibleRange;

/// Everything that can drive the window machine.
///
/// Intents come from the embedding surface, completions from the loader
/// tasks, and timer events from the runtime. The reducer consumes them in
/// dispatch order, one at a time.
#[derive(Debug, Clone, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    /// Kick off the initial centered load.
    Load,
    /// Re-attempt the centered load after a total failure.
    Retry,
    /// Re-attempt a failed top chunk load from its recorded edge.
    RetryTop,
    /// Re-attempt a failed bottom chunk load from its recorded edge.
    RetryBottom,
    /// Page one chunk backward.
    RequestMoreBefore,
    /// Page one chunk forward.
    RequestMoreAfter,
    PositionChanged { position: Position },
    TimeRangeChanged { time_range: TimeRange },
    FiltersChanged { filters: Vec<FieldFilter> },
    ColumnsChanged { columns: Vec<String> },
    DataViewChanged { data_view: DataView },
    /// The rendering surface reports the row span it currently shows.
    VisibleEntriesChanged { visible: VisibleRange },
    StartTailing,
    StopTailing,

    LoadAroundSucceeded { top: LoadedChunk, bottom: LoadedChunk },
    LoadAroundFailed { error: Arc<SourceError> },
    LoadBeforeSucceeded { chunk: LoadedChunk },
    LoadBeforeFailed { error: Arc<SourceError> },
    LoadAfterSucceeded { chunk: LoadedChunk },
    LoadAfterFailed { error: Arc<SourceError> },
    LoadTailSucceeded { rows: Vec<LogRow> },
    LoadTailFailed { error: Arc<SourceError> },

    /// The grid-sync fallback elapsed without a viewport report.
    GridSyncTimedOut,
    /// The tail poll delay elapsed.
    TailTimerFired,
}
