//! Derived render model over the machine state.
//!
//! The embedding surface re-reads these after every update; the selector
//! memoizes on the context revision so repeated reads between updates hit
//! the same allocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::entry::{LogEntry, RowIndex};
use crate::machine::state::{WindowContext, WindowStatus};
use crate::source::SourceError;
use crate::window::row;

/// Row-addressed view of the loaded window, ready for a virtualized grid.
///
/// Indices are `None` when the corresponding side has nothing loaded. The
/// row map is sparse; a grid asking for an index outside it renders a
/// placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowWindow {
    pub start_row_index: Option<RowIndex>,
    pub chunk_boundary_row_index: Option<RowIndex>,
    pub end_row_index: Option<RowIndex>,
    pub rows: BTreeMap<RowIndex, Arc<LogEntry>>,
}

impl RowWindow {
    pub fn row(&self, index: RowIndex) -> Option<&Arc<LogEntry>> {
        self.rows.get(&index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Projects the machine state into a [`RowWindow`].
///
/// While reloading everything is withheld, so the surface shows its loading
/// affordance instead of rows that no longer match the query.
pub fn select_row_window(status: &WindowStatus, context: &WindowContext) -> RowWindow {
    if status.is_reloading() || !status.renders_rows() {
        return RowWindow::default();
    }
    let top = context.top_chunk();
    let bottom = context.bottom_chunk();
    RowWindow {
        start_row_index: top.start_row_index(),
        chunk_boundary_row_index: bottom.start_row_index(),
        end_row_index: bottom.end_row_index(),
        rows: row::merge_rows(top, bottom),
    }
}

/// Failure the surface should present: the stored error when nothing is
/// renderable, or when one side of a rendered window is failed.
pub fn select_load_failure(
    status: &WindowStatus,
    context: &WindowContext,
) -> Option<Arc<SourceError>> {
    match status {
        WindowStatus::FailedNoData => context.last_error().cloned(),
        WindowStatus::Loaded { top, bottom, .. } if !top.is_loaded() || !bottom.is_loaded() => {
            context.last_error().cloned()
        }
        _ => None,
    }
}

/// Single-slot memo over [`select_row_window`].
///
/// The revision moves on every observable context change; the two status
/// flags cover transitions that change the projection without touching the
/// context.
#[derive(Debug, Default)]
pub struct RowWindowSelector {
    cached: Option<(SelectorKey, Arc<RowWindow>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SelectorKey {
    revision: u64,
    renders_rows: bool,
    reloading: bool,
}

impl RowWindowSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, status: &WindowStatus, context: &WindowContext) -> Arc<RowWindow> {
        let key = SelectorKey {
            revision: context.revision(),
            renders_rows: status.renders_rows(),
            reloading: status.is_reloading(),
        };
        if let Some((cached_key, window)) = &self.cached {
            if *cached_key == key {
                return Arc::clone(window);
            }
        }
        let window = Arc::new(select_row_window(status, context));
        self.cached = Some((key, Arc::clone(&window)));
        window
    }
}
