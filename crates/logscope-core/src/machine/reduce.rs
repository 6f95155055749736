use std::sync::Arc;

use tracing::{debug, warn};

use crate::entry::{ChunkEdge, Position};
use crate::machine::effect::{Effect, LoadSlot, ScrollAlign};
use crate::machine::event::Event;
use crate::machine::guards;
use crate::machine::state::{
    ChunkHealth, GridSync, ReloadSide, TailPhase, TailSync, WindowContext, WindowState,
    WindowStatus,
};
use crate::source::SourceError;
use crate::window::chunk::Chunk;

/// Applies one event to the machine and returns the effects the runtime
/// must perform. Pure apart from tracing; all I/O happens in the effect
/// interpreter.
pub fn reduce(state: &mut WindowState, event: Event) -> Vec<Effect> {
    // Query-scope changes invalidate the whole window in any status.
    match event {
        Event::FiltersChanged { filters } => {
            state.context.set_filters(filters);
            return restart_around(state);
        }
        Event::DataViewChanged { data_view } => {
            state.context.set_data_view(data_view);
            return restart_around(state);
        }
        Event::StartTailing => return start_tailing(state),
        _ => {}
    }

    match state.status {
        WindowStatus::Uninitialized => reduce_uninitialized(state, event),
        WindowStatus::LoadingAround => reduce_loading_around(state, event),
        WindowStatus::FailedNoData => reduce_failed_no_data(state, event),
        WindowStatus::Loaded { grid, .. } => reduce_loaded(state, grid, event),
        WindowStatus::LoadingTop => reduce_loading_top(state, event),
        WindowStatus::LoadingBottom => reduce_loading_bottom(state, event),
        WindowStatus::ExtendingTop => reduce_extending_top(state, event),
        WindowStatus::ExtendingBottom => reduce_extending_bottom(state, event),
        WindowStatus::Reloading { top, bottom } => reduce_reloading(state, top, bottom, event),
        WindowStatus::Tailing(phase) => reduce_tailing(state, phase, event),
    }
}

fn reduce_uninitialized(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::Load => restart_around(state),
        Event::PositionChanged { position } => {
            state.context.set_position(position);
            restart_around(state)
        }
        Event::TimeRangeChanged { time_range } => {
            state.context.set_time_range(time_range);
            restart_around(state)
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            restart_around(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_loading_around(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::LoadAroundSucceeded { top, bottom } => {
            state
                .context
                .set_chunks(Chunk::Loaded(top), Chunk::Loaded(bottom));
            state.context.clear_error();
            state.status = loaded_status(&state.context, GridSync::StaleAfterLoadAround);
            vec![]
        }
        Event::LoadAroundFailed { error } => {
            state.context.record_error(error);
            state.status = WindowStatus::FailedNoData;
            vec![]
        }
        Event::PositionChanged { position } => {
            state.context.set_position(position);
            restart_around(state)
        }
        Event::TimeRangeChanged { time_range } => {
            state.context.set_time_range(time_range);
            restart_around(state)
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            restart_around(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_failed_no_data(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::Retry => restart_around(state),
        Event::PositionChanged { position } => {
            state.context.set_position(position);
            restart_around(state)
        }
        Event::TimeRangeChanged { time_range } => {
            state.context.set_time_range(time_range);
            restart_around(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_loaded(state: &mut WindowState, grid: GridSync, event: Event) -> Vec<Effect> {
    match event {
        Event::PositionChanged { position } => {
            let within = guards::is_within_loaded_chunks(&state.context, position);
            state.context.set_position(position);
            if within {
                vec![]
            } else {
                restart_around(state)
            }
        }
        Event::TimeRangeChanged { time_range } => {
            // Boundary extension and reduction are not modeled separately; a
            // range change reloads around the new range's midpoint.
            state.context.set_time_range(time_range);
            state
                .context
                .set_position(Position::new(time_range.midpoint(), 0));
            restart_around(state)
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            enter_reloading(state)
        }
        Event::RequestMoreBefore => request_more_before(state),
        Event::RequestMoreAfter => request_more_after(state),
        Event::RetryTop => retry_top(state),
        Event::RetryBottom => retry_bottom(state),
        Event::VisibleEntriesChanged { visible } => match grid {
            // Waiting for the fallback timer; reports may predate the
            // chunk change that got us here.
            GridSync::Unknown => vec![],
            GridSync::StaleAfterLoadAround | GridSync::StaleAfterLoadBefore => {
                set_grid(state, GridSync::Waiting);
                vec![Effect::ScrollToRow {
                    index: state.context.boundary_row_index(),
                    align: ScrollAlign::Start,
                }]
            }
            GridSync::StaleAfterLoadAfter => {
                set_grid(state, GridSync::Waiting);
                vec![Effect::ScrollToRow {
                    index: state.context.boundary_row_index() - 1,
                    align: ScrollAlign::End,
                }]
            }
            GridSync::Waiting => {
                set_grid(state, GridSync::Synchronized);
                vec![]
            }
            GridSync::Synchronized => {
                if guards::are_visible_entries_near_start(&state.context, visible) {
                    request_more_before(state)
                } else if guards::are_visible_entries_near_end(&state.context, visible) {
                    request_more_after(state)
                } else {
                    vec![]
                }
            }
        },
        Event::GridSyncTimedOut => {
            if grid == GridSync::Unknown {
                set_grid(state, GridSync::Waiting);
            }
            vec![]
        }
        event => ignored(state, &event),
    }
}

fn reduce_loading_top(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::LoadBeforeSucceeded { chunk } => {
            state.context.set_top_chunk(Chunk::Loaded(chunk));
            state.status = loaded_status(&state.context, GridSync::StaleAfterLoadBefore);
            vec![]
        }
        Event::LoadBeforeFailed { error } => {
            fail_top_chunk(state, error);
            state.status = loaded_status(&state.context, GridSync::StaleAfterLoadBefore);
            vec![]
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            enter_reloading(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_loading_bottom(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::LoadAfterSucceeded { chunk } => {
            state.context.set_bottom_chunk(Chunk::Loaded(chunk));
            state.status = loaded_status(&state.context, GridSync::StaleAfterLoadAfter);
            vec![]
        }
        Event::LoadAfterFailed { error } => {
            fail_bottom_chunk(state, error);
            state.status = loaded_status(&state.context, GridSync::StaleAfterLoadAfter);
            vec![]
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            enter_reloading(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_extending_top(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::LoadBeforeSucceeded { chunk } => {
            state.context.set_top_chunk(Chunk::Loaded(chunk));
            state.status = loaded_status(&state.context, GridSync::Unknown);
            vec![Effect::ArmGridSyncFallback]
        }
        Event::LoadBeforeFailed { error } => {
            fail_top_chunk(state, error);
            state.status = loaded_status(&state.context, GridSync::Unknown);
            vec![Effect::ArmGridSyncFallback]
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            enter_reloading(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_extending_bottom(state: &mut WindowState, event: Event) -> Vec<Effect> {
    match event {
        Event::LoadAfterSucceeded { chunk } => {
            state.context.set_bottom_chunk(Chunk::Loaded(chunk));
            state.status = loaded_status(&state.context, GridSync::Unknown);
            vec![Effect::ArmGridSyncFallback]
        }
        Event::LoadAfterFailed { error } => {
            fail_bottom_chunk(state, error);
            state.status = loaded_status(&state.context, GridSync::Unknown);
            vec![Effect::ArmGridSyncFallback]
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            enter_reloading(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_reloading(
    state: &mut WindowState,
    top: ReloadSide,
    bottom: ReloadSide,
    event: Event,
) -> Vec<Effect> {
    match event {
        Event::LoadBeforeSucceeded { chunk } => {
            state.context.set_top_chunk(Chunk::Loaded(chunk));
            settle_reload(state, ReloadSide::Settled, bottom)
        }
        Event::LoadBeforeFailed { error } => {
            // The previous top chunk is kept; its rows are still valid for
            // the old column set and better than nothing.
            state.context.record_error(error);
            settle_reload(state, ReloadSide::Settled, bottom)
        }
        Event::LoadAfterSucceeded { chunk } => {
            state.context.set_bottom_chunk(Chunk::Loaded(chunk));
            settle_reload(state, top, ReloadSide::Settled)
        }
        Event::LoadAfterFailed { error } => {
            state.context.record_error(error);
            settle_reload(state, top, ReloadSide::Settled)
        }
        Event::ColumnsChanged { columns } => {
            state.context.set_columns(columns);
            enter_reloading(state)
        }
        event => ignored(state, &event),
    }
}

fn reduce_tailing(state: &mut WindowState, phase: TailPhase, event: Event) -> Vec<Effect> {
    match (phase, event) {
        (TailPhase::Loading, Event::LoadTailSucceeded { rows }) => {
            state.context.append_tail_rows(rows);
            state.status = WindowStatus::Tailing(TailPhase::Loaded(TailSync::StaleAfterLoadTail));
            vec![Effect::ArmTailTimer]
        }
        (TailPhase::Loading, Event::LoadTailFailed { error }) => {
            warn!(error = %error, "tail poll failed; keeping the polling loop alive");
            state.context.record_error(error);
            state.status = WindowStatus::Tailing(TailPhase::Loaded(TailSync::Synchronized));
            vec![Effect::ArmTailTimer]
        }
        (TailPhase::Loaded(_), Event::TailTimerFired) => {
            state.status = WindowStatus::Tailing(TailPhase::Loading);
            vec![load_tail_effect(&state.context)]
        }
        (TailPhase::Loaded(sync), Event::VisibleEntriesChanged { .. }) => match sync {
            TailSync::StaleAfterLoadTail => {
                state.status = WindowStatus::Tailing(TailPhase::Loaded(TailSync::Waiting));
                vec![Effect::ScrollToRow {
                    index: state.context.end_row_index() - 1,
                    align: ScrollAlign::End,
                }]
            }
            TailSync::Waiting => {
                state.status = WindowStatus::Tailing(TailPhase::Loaded(TailSync::Synchronized));
                vec![]
            }
            TailSync::Synchronized => vec![],
        },
        (phase, Event::StopTailing) => {
            let mut effects = Vec::new();
            if phase == TailPhase::Loading {
                effects.push(Effect::CancelLoad {
                    slot: LoadSlot::Tail,
                });
            }
            state.status = loaded_status(&state.context, GridSync::Unknown);
            effects.push(Effect::ArmGridSyncFallback);
            effects
        }
        (_, event) => ignored(state, &event),
    }
}

/// Health of both chunk slots is re-derived from the chunks whenever a
/// steady state is entered.
fn loaded_status(context: &WindowContext, grid: GridSync) -> WindowStatus {
    WindowStatus::Loaded {
        top: ChunkHealth::of(context.top_chunk()),
        bottom: ChunkHealth::of(context.bottom_chunk()),
        grid,
    }
}

fn set_grid(state: &mut WindowState, grid: GridSync) {
    if let WindowStatus::Loaded { top, bottom, .. } = state.status {
        state.status = WindowStatus::Loaded { top, bottom, grid };
    }
}

fn in_flight_slots(status: WindowStatus) -> Vec<LoadSlot> {
    match status {
        WindowStatus::LoadingAround => vec![LoadSlot::Around],
        WindowStatus::LoadingTop | WindowStatus::ExtendingTop => vec![LoadSlot::Before],
        WindowStatus::LoadingBottom | WindowStatus::ExtendingBottom => vec![LoadSlot::After],
        WindowStatus::Reloading { top, bottom } => {
            let mut slots = Vec::new();
            if top == ReloadSide::Pending {
                slots.push(LoadSlot::Before);
            }
            if bottom == ReloadSide::Pending {
                slots.push(LoadSlot::After);
            }
            slots
        }
        WindowStatus::Tailing(TailPhase::Loading) => vec![LoadSlot::Tail],
        _ => vec![],
    }
}

/// Cancels every in-flight load except `keep`, whose slot is about to be
/// reused and is superseded implicitly.
fn cancel_in_flight_except(status: WindowStatus, keep: LoadSlot) -> Vec<Effect> {
    in_flight_slots(status)
        .into_iter()
        .filter(|slot| *slot != keep)
        .map(|slot| Effect::CancelLoad { slot })
        .collect()
}

fn restart_around(state: &mut WindowState) -> Vec<Effect> {
    let mut effects = cancel_in_flight_except(state.status, LoadSlot::Around);
    state.status = WindowStatus::LoadingAround;
    effects.push(Effect::LoadAround {
        position: state.context.position(),
        center_index: state.context.config().center_row_index,
    });
    effects
}

fn start_tailing(state: &mut WindowState) -> Vec<Effect> {
    let mut effects = cancel_in_flight_except(state.status, LoadSlot::Tail);
    state.status = WindowStatus::Tailing(TailPhase::Loading);
    effects.push(load_tail_effect(&state.context));
    effects
}

fn load_tail_effect(context: &WindowContext) -> Effect {
    Effect::LoadTail {
        edge: context.last_loaded_position().map(ChunkEdge::exclusive),
        start_index: context.end_row_index(),
    }
}

/// Refetches both chunks around the current position with the current
/// query, keeping the old rows in place until replacements arrive.
fn enter_reloading(state: &mut WindowState) -> Vec<Effect> {
    let position = state.context.position();
    let boundary = state.context.boundary_row_index();
    state.status = WindowStatus::Reloading {
        top: ReloadSide::Pending,
        bottom: ReloadSide::Pending,
    };
    vec![
        Effect::LoadBefore {
            edge: Some(ChunkEdge::exclusive(position)),
            end_index: boundary,
        },
        Effect::LoadAfter {
            edge: Some(ChunkEdge::inclusive(position)),
            start_index: boundary,
        },
    ]
}

fn settle_reload(state: &mut WindowState, top: ReloadSide, bottom: ReloadSide) -> Vec<Effect> {
    if top == ReloadSide::Settled && bottom == ReloadSide::Settled {
        if guards::has_loaded_top_chunk(&state.context)
            || guards::has_loaded_bottom_chunk(&state.context)
        {
            state.status = loaded_status(&state.context, GridSync::Synchronized);
        } else {
            state.status = WindowStatus::FailedNoData;
        }
    } else {
        state.status = WindowStatus::Reloading { top, bottom };
    }
    vec![]
}

fn request_more_before(state: &mut WindowState) -> Vec<Effect> {
    if !guards::has_full_top_chunk(&state.context) {
        return ignored(state, &Event::RequestMoreBefore);
    }
    let (edge, anchor) = state.context.rotate_backward();
    state.status = WindowStatus::LoadingTop;
    vec![Effect::LoadBefore {
        edge,
        end_index: anchor,
    }]
}

fn request_more_after(state: &mut WindowState) -> Vec<Effect> {
    if !guards::has_full_bottom_chunk(&state.context) {
        return ignored(state, &Event::RequestMoreAfter);
    }
    let (edge, anchor) = state.context.rotate_forward();
    state.status = WindowStatus::LoadingBottom;
    vec![Effect::LoadAfter {
        edge,
        start_index: anchor,
    }]
}

fn retry_top(state: &mut WindowState) -> Vec<Effect> {
    let top = state.context.top_chunk();
    if top.loaded().is_some() {
        return ignored(state, &Event::RetryTop);
    }
    let edge = top.retry_edge().or_else(|| {
        state
            .context
            .bottom_chunk()
            .first_position()
            .map(ChunkEdge::exclusive)
    });
    let end_index = top
        .retry_anchor()
        .unwrap_or_else(|| state.context.boundary_row_index());
    state.status = WindowStatus::ExtendingTop;
    vec![Effect::LoadBefore { edge, end_index }]
}

fn retry_bottom(state: &mut WindowState) -> Vec<Effect> {
    let bottom = state.context.bottom_chunk();
    if bottom.loaded().is_some() {
        return ignored(state, &Event::RetryBottom);
    }
    let edge = bottom.retry_edge().or_else(|| {
        state
            .context
            .top_chunk()
            .last_position()
            .map(ChunkEdge::exclusive)
    });
    let start_index = bottom
        .retry_anchor()
        .unwrap_or_else(|| state.context.boundary_row_index());
    state.status = WindowStatus::ExtendingBottom;
    vec![Effect::LoadAfter { edge, start_index }]
}

fn fail_top_chunk(state: &mut WindowState, error: Arc<SourceError>) {
    let edge = state.context.top_chunk().retry_edge();
    let anchor = state
        .context
        .top_chunk()
        .retry_anchor()
        .unwrap_or_else(|| state.context.boundary_row_index());
    state.context.set_top_chunk(Chunk::Failed {
        error: Arc::clone(&error),
        edge,
        anchor,
    });
    state.context.record_error(error);
}

fn fail_bottom_chunk(state: &mut WindowState, error: Arc<SourceError>) {
    let edge = state.context.bottom_chunk().retry_edge();
    let anchor = state
        .context
        .bottom_chunk()
        .retry_anchor()
        .unwrap_or_else(|| state.context.boundary_row_index());
    state.context.set_bottom_chunk(Chunk::Failed {
        error: Arc::clone(&error),
        edge,
        anchor,
    });
    state.context.record_error(error);
}

fn ignored(state: &WindowState, event: &Event) -> Vec<Effect> {
    debug!(status = %state.status, event = %event, "event not handled in this status");
    vec![]
}
