use strum_macros::Display;

use crate::entry::{ChunkEdge, Position, RowIndex};

/// Loader slot an in-flight request occupies.
///
/// At most one request is in flight per slot; dispatching a new load into
/// an occupied slot supersedes the old request, and its eventual result is
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LoadSlot {
    Around,
    Before,
    After,
    Tail,
}

/// Vertical alignment for a grid reposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ScrollAlign {
    Start,
    End,
}

/// Work the runtime performs on behalf of the reducer.
///
/// The reducer never touches the outside world; it returns these and the
/// runtime interprets them, feeding completions back in as events.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch both chunks centered on `position`, with the anchor row landing
    /// at `center_index`.
    LoadAround {
        position: Position,
        center_index: RowIndex,
    },
    /// Fetch one page of older entries ending just before `end_index`.
    LoadBefore {
        edge: Option<ChunkEdge>,
        end_index: RowIndex,
    },
    /// Fetch one page of newer entries starting at `start_index`.
    LoadAfter {
        edge: Option<ChunkEdge>,
        start_index: RowIndex,
    },
    /// Fetch the newest entries past `edge` for the tail of the window.
    LoadTail {
        edge: Option<ChunkEdge>,
        start_index: RowIndex,
    },
    /// Drop whatever request occupies `slot`.
    CancelLoad { slot: LoadSlot },
    /// Reposition the rendering surface.
    ScrollToRow { index: RowIndex, align: ScrollAlign },
    /// Start the one-shot timer that unblocks grid synchronization when the
    /// surface never reports.
    ArmGridSyncFallback,
    /// Schedule the next tail poll.
    ArmTailTimer,
}
