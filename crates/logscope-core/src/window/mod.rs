pub mod chunk;
pub mod row;

pub use chunk::{Chunk, FillLevel, LoadedChunk, LogRow};
pub use row::{
    chunk_boundary_row_index, merge_rows, rows_ending_at, rows_from_entries, window_end_row_index,
    window_start_row_index, VisibleRange,
};
