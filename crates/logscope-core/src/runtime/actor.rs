use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WindowConfig;
use crate::entry::{DataView, FieldFilter, Position, TimeRange};
use crate::error::{Error, Result};
use crate::loader::{ChunkLoader, QuerySnapshot};
use crate::machine::effect::{Effect, LoadSlot};
use crate::machine::event::Event;
use crate::machine::reduce::reduce;
use crate::machine::state::{WindowState, WindowStatus};
use crate::runtime::subscription::{UnsubscribeSignal, WindowSubscription, WindowUpdate};
use crate::scroll::GridSurface;
use crate::source::LogEntrySource;
use crate::window::row::VisibleRange;

const UPDATE_BROADCAST_CAPACITY: usize = 256;
const CMD_CHANNEL_CAPACITY: usize = 64;
const INTERNAL_CHANNEL_CAPACITY: usize = 64;

/// How long the engine waits for a viewport report before unblocking grid
/// synchronization on its own.
const GRID_SYNC_FALLBACK: Duration = Duration::from_millis(500);

pub(crate) enum WindowCmd {
    Dispatch {
        event: Box<Event>,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<WindowState>,
    },
    Subscribe {
        reply: oneshot::Sender<WindowSubscription>,
    },
    SetTailInterval {
        interval: Duration,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Client side of a window engine.
///
/// Cheap to clone; every method goes through the engine's command channel,
/// so callers observe dispatches in the order they were sent.
#[derive(Clone)]
pub struct WindowHandle {
    cmd_tx: mpsc::Sender<WindowCmd>,
}

impl WindowHandle {
    pub async fn dispatch(&self, event: Event) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WindowCmd::Dispatch {
                event: Box::new(event),
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }

    /// Current machine state, taken between dispatches.
    pub async fn snapshot(&self) -> Result<WindowState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WindowCmd::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub async fn subscribe(&self) -> Result<WindowSubscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WindowCmd::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }

    /// Tracks the host's refresh-interval signal; applies from the next
    /// armed tail timer onward.
    pub async fn set_tail_interval(&self, interval: Duration) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(WindowCmd::SetTailInterval {
                interval,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(WindowCmd::Shutdown);
    }

    pub async fn retry(&self) -> Result<()> {
        self.dispatch(Event::Retry).await
    }

    pub async fn retry_top(&self) -> Result<()> {
        self.dispatch(Event::RetryTop).await
    }

    pub async fn retry_bottom(&self) -> Result<()> {
        self.dispatch(Event::RetryBottom).await
    }

    pub async fn request_more_before(&self) -> Result<()> {
        self.dispatch(Event::RequestMoreBefore).await
    }

    pub async fn request_more_after(&self) -> Result<()> {
        self.dispatch(Event::RequestMoreAfter).await
    }

    pub async fn update_position(&self, position: Position) -> Result<()> {
        self.dispatch(Event::PositionChanged { position }).await
    }

    pub async fn update_time_range(&self, time_range: TimeRange) -> Result<()> {
        self.dispatch(Event::TimeRangeChanged { time_range }).await
    }

    pub async fn update_filters(&self, filters: Vec<FieldFilter>) -> Result<()> {
        self.dispatch(Event::FiltersChanged { filters }).await
    }

    pub async fn update_columns(&self, columns: Vec<String>) -> Result<()> {
        self.dispatch(Event::ColumnsChanged { columns }).await
    }

    pub async fn update_data_view(&self, data_view: DataView) -> Result<()> {
        self.dispatch(Event::DataViewChanged { data_view }).await
    }

    pub async fn report_visible_entries(&self, visible: VisibleRange) -> Result<()> {
        self.dispatch(Event::VisibleEntriesChanged { visible }).await
    }

    pub async fn start_tailing(&self) -> Result<()> {
        self.dispatch(Event::StartTailing).await
    }

    pub async fn stop_tailing(&self) -> Result<()> {
        self.dispatch(Event::StopTailing).await
    }
}

enum InternalMsg {
    Completion {
        slot: LoadSlot,
        generation: u64,
        event: Event,
    },
    GridSyncElapsed {
        epoch: u64,
    },
    TailDelayElapsed {
        epoch: u64,
    },
}

struct SlotState {
    generation: u64,
    token: CancellationToken,
}

/// Owns the machine state and interprets its effects.
///
/// One request per slot is in flight at a time; dispatching into an
/// occupied slot cancels the old request, and completions carry the
/// generation they were spawned with so a superseded result can never
/// overwrite a newer one.
struct WindowActor {
    state: WindowState,
    loader: ChunkLoader,
    surface: Option<Arc<dyn GridSurface>>,
    slots: HashMap<LoadSlot, SlotState>,
    next_generation: u64,
    grid_timer_epoch: u64,
    tail_timer_epoch: u64,
    tail_interval: Duration,
    update_seq: u64,
    update_broadcast: broadcast::Sender<WindowUpdate>,
    subscriber_count: usize,
    unsubscribe_rx: mpsc::UnboundedReceiver<UnsubscribeSignal>,
    unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeSignal>,
    internal_tx: mpsc::Sender<InternalMsg>,
    internal_rx: mpsc::Receiver<InternalMsg>,
}

impl WindowActor {
    fn new(
        state: WindowState,
        loader: ChunkLoader,
        surface: Option<Arc<dyn GridSurface>>,
    ) -> Self {
        let tail_interval = state.context.config().tail_poll_interval;
        let (update_broadcast, _) = broadcast::channel(UPDATE_BROADCAST_CAPACITY);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);

        Self {
            state,
            loader,
            surface,
            slots: HashMap::new(),
            next_generation: 0,
            grid_timer_epoch: 0,
            tail_timer_epoch: 0,
            tail_interval,
            update_seq: 0,
            update_broadcast,
            subscriber_count: 0,
            unsubscribe_rx,
            unsubscribe_tx,
            internal_tx,
            internal_rx,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<WindowCmd>) {
        // the engine starts loading without waiting for a caller
        self.handle_event(Event::Load);

        loop {
            tokio::select! {
                biased;

                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        WindowCmd::Dispatch { event, reply } => {
                            self.handle_event(*event);
                            let _ = reply.send(());
                        }
                        WindowCmd::Snapshot { reply } => {
                            let _ = reply.send(self.state.clone());
                        }
                        WindowCmd::Subscribe { reply } => {
                            let _ = reply.send(self.create_subscription());
                        }
                        WindowCmd::SetTailInterval { interval, reply } => {
                            self.tail_interval = interval;
                            let _ = reply.send(());
                        }
                        WindowCmd::Shutdown => {
                            self.cancel_all_loads();
                            break;
                        }
                    }
                }

                Some(msg) = self.internal_rx.recv() => {
                    self.handle_internal(msg);
                }

                Some(UnsubscribeSignal) = self.unsubscribe_rx.recv() => {
                    self.subscriber_count = self.subscriber_count.saturating_sub(1);
                    debug!(
                        subscriber_count = self.subscriber_count,
                        "window subscriber disconnected"
                    );
                }

                else => break,
            }
        }

        debug!("window actor stopped");
    }

    fn handle_event(&mut self, event: Event) {
        let status_before = self.state.status;
        let revision_before = self.state.context.revision();
        let effects = reduce(&mut self.state, event);
        for effect in effects {
            self.handle_effect(effect);
        }
        self.publish_update(status_before, revision_before);
    }

    fn handle_internal(&mut self, msg: InternalMsg) {
        match msg {
            InternalMsg::Completion {
                slot,
                generation,
                event,
            } => {
                if !self.slot_is_current(slot, generation) {
                    debug!(%slot, generation, "dropping completion from a superseded load");
                    return;
                }
                self.slots.remove(&slot);
                self.handle_event(event);
            }
            InternalMsg::GridSyncElapsed { epoch } => {
                if epoch == self.grid_timer_epoch {
                    self.handle_event(Event::GridSyncTimedOut);
                }
            }
            InternalMsg::TailDelayElapsed { epoch } => {
                if epoch == self.tail_timer_epoch {
                    self.handle_event(Event::TailTimerFired);
                }
            }
        }
    }

    fn handle_effect(&mut self, effect: Effect) {
        match effect {
            Effect::LoadAround {
                position,
                center_index,
            } => {
                let (generation, token) = self.begin_load(LoadSlot::Around);
                let loader = self.loader.clone();
                let snapshot = QuerySnapshot::of(&self.state.context);
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let event = loader
                        .load_around(snapshot, position, center_index, token)
                        .await;
                    let _ = internal_tx
                        .send(InternalMsg::Completion {
                            slot: LoadSlot::Around,
                            generation,
                            event,
                        })
                        .await;
                });
            }
            Effect::LoadBefore { edge, end_index } => {
                let (generation, token) = self.begin_load(LoadSlot::Before);
                let loader = self.loader.clone();
                let snapshot = QuerySnapshot::of(&self.state.context);
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let event = loader.load_before(snapshot, edge, end_index, token).await;
                    let _ = internal_tx
                        .send(InternalMsg::Completion {
                            slot: LoadSlot::Before,
                            generation,
                            event,
                        })
                        .await;
                });
            }
            Effect::LoadAfter { edge, start_index } => {
                let (generation, token) = self.begin_load(LoadSlot::After);
                let loader = self.loader.clone();
                let snapshot = QuerySnapshot::of(&self.state.context);
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let event = loader.load_after(snapshot, edge, start_index, token).await;
                    let _ = internal_tx
                        .send(InternalMsg::Completion {
                            slot: LoadSlot::After,
                            generation,
                            event,
                        })
                        .await;
                });
            }
            Effect::LoadTail { edge, start_index } => {
                let (generation, token) = self.begin_load(LoadSlot::Tail);
                let loader = self.loader.clone();
                let snapshot = QuerySnapshot::of(&self.state.context);
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let event = loader.load_tail(snapshot, edge, start_index, token).await;
                    let _ = internal_tx
                        .send(InternalMsg::Completion {
                            slot: LoadSlot::Tail,
                            generation,
                            event,
                        })
                        .await;
                });
            }
            Effect::CancelLoad { slot } => self.cancel_load(slot),
            Effect::ScrollToRow { index, align } => {
                if let Some(surface) = &self.surface {
                    let surface = Arc::clone(surface);
                    tokio::spawn(async move {
                        surface.scroll_to_row(index, align).await;
                    });
                }
            }
            Effect::ArmGridSyncFallback => {
                self.grid_timer_epoch += 1;
                let epoch = self.grid_timer_epoch;
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(GRID_SYNC_FALLBACK).await;
                    let _ = internal_tx
                        .send(InternalMsg::GridSyncElapsed { epoch })
                        .await;
                });
            }
            Effect::ArmTailTimer => {
                self.tail_timer_epoch += 1;
                let epoch = self.tail_timer_epoch;
                let delay = self.tail_interval;
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = internal_tx
                        .send(InternalMsg::TailDelayElapsed { epoch })
                        .await;
                });
            }
        }
    }

    fn begin_load(&mut self, slot: LoadSlot) -> (u64, CancellationToken) {
        if let Some(previous) = self.slots.remove(&slot) {
            previous.token.cancel();
            debug!(%slot, "superseding in-flight load");
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let token = CancellationToken::new();
        self.slots.insert(
            slot,
            SlotState {
                generation,
                token: token.clone(),
            },
        );
        (generation, token)
    }

    fn cancel_load(&mut self, slot: LoadSlot) {
        if let Some(slot_state) = self.slots.remove(&slot) {
            slot_state.token.cancel();
            debug!(%slot, "cancelled in-flight load");
        }
    }

    fn cancel_all_loads(&mut self) {
        for (_, slot_state) in self.slots.drain() {
            slot_state.token.cancel();
        }
    }

    fn slot_is_current(&self, slot: LoadSlot, generation: u64) -> bool {
        self.slots
            .get(&slot)
            .is_some_and(|slot_state| slot_state.generation == generation)
    }

    fn create_subscription(&mut self) -> WindowSubscription {
        self.subscriber_count += 1;
        WindowSubscription::new(self.update_broadcast.subscribe(), self.unsubscribe_tx.clone())
    }

    fn publish_update(&mut self, status_before: WindowStatus, revision_before: u64) {
        self.update_seq += 1;
        let changed = self.state.status != status_before
            || self.state.context.revision() != revision_before;
        let update = WindowUpdate {
            seq: self.update_seq,
            changed,
            status: self.state.status,
            context: Arc::new(self.state.context.clone()),
        };
        let _ = self.update_broadcast.send(update);
    }
}

/// Spawns a window engine over `source` and returns its handle.
///
/// The engine starts its centered load immediately. `surface` receives the
/// reposition commands grid synchronization produces; pass `None` for a
/// headless engine.
pub fn spawn_window_engine(
    source: Arc<dyn LogEntrySource>,
    config: WindowConfig,
    data_view: DataView,
    time_range: TimeRange,
    surface: Option<Arc<dyn GridSurface>>,
) -> WindowHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
    let state = WindowState::new(config.clone(), data_view, time_range);
    let loader = ChunkLoader::new(source, config);
    let actor = WindowActor::new(state, loader, surface);
    tokio::spawn(actor.run(cmd_rx));
    WindowHandle { cmd_tx }
}
