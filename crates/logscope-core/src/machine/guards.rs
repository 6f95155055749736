//! Pure predicates the reducer consults before taking a transition.

use crate::entry::Position;
use crate::machine::state::WindowContext;
use crate::window::chunk::FillLevel;
use crate::window::row::VisibleRange;

/// Whether `position` falls inside the loaded window, edge rows included.
/// False when nothing is loaded.
pub fn is_within_loaded_chunks(context: &WindowContext, position: Position) -> bool {
    match (
        context.first_loaded_position(),
        context.last_loaded_position(),
    ) {
        (Some(first), Some(last)) => first <= position && position <= last,
        _ => false,
    }
}

pub fn has_loaded_top_chunk(context: &WindowContext) -> bool {
    context.top_chunk().is_loaded_nonempty()
}

pub fn has_loaded_bottom_chunk(context: &WindowContext) -> bool {
    context.bottom_chunk().is_loaded_nonempty()
}

/// A full top chunk means older data likely exists past the edge.
pub fn has_full_top_chunk(context: &WindowContext) -> bool {
    context.top_chunk().fill() == Some(FillLevel::Full)
}

pub fn has_full_bottom_chunk(context: &WindowContext) -> bool {
    context.bottom_chunk().fill() == Some(FillLevel::Full)
}

/// Whether the visible span has scrolled into the overscan band at the
/// start of the window.
pub fn are_visible_entries_near_start(context: &WindowContext, visible: VisibleRange) -> bool {
    let overscan = context.config().minimum_chunk_overscan as i64;
    visible.first_row_index - context.start_row_index() <= overscan
}

/// Whether the visible span has scrolled into the overscan band at the end
/// of the window.
pub fn are_visible_entries_near_end(context: &WindowContext, visible: VisibleRange) -> bool {
    let overscan = context.config().minimum_chunk_overscan as i64;
    (context.end_row_index() - 1) - visible.last_row_index <= overscan
}
