//! Log-density summary machine feeding the chart above the grid.
//!
//! A small sibling of the window machine: one query, one fetch slot,
//! buckets instead of chunks. It consumes the same query-change intents so
//! a host can fan a filter or range change out to both engines.

use std::sync::Arc;

use chrono::TimeDelta;
use strum_macros::Display;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entry::{DataView, FieldFilter, TimeRange};
use crate::error::{Error, Result};
use crate::source::{DensityBucket, DensityRequest, LogEntrySource, SourceError};

const CMD_CHANNEL_CAPACITY: usize = 16;
const COMPLETION_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HistogramStatus {
    Uninitialized,
    /// A fetch is in flight. Failures stay here with the error recorded, so
    /// the chart keeps its last buckets through transient search errors.
    Loading,
    Loaded,
}

/// Query inputs plus the last settled buckets.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramContext {
    data_view: DataView,
    filters: Vec<FieldFilter>,
    time_range: TimeRange,
    bucket_interval: TimeDelta,
    buckets: Vec<DensityBucket>,
    last_error: Option<Arc<SourceError>>,
    revision: u64,
}

impl HistogramContext {
    fn new(data_view: DataView, time_range: TimeRange, bucket_interval: TimeDelta) -> Self {
        Self {
            data_view,
            filters: Vec::new(),
            time_range,
            bucket_interval,
            buckets: Vec::new(),
            last_error: None,
            revision: 0,
        }
    }

    pub fn buckets(&self) -> &[DensityBucket] {
        &self.buckets
    }

    pub fn time_range(&self) -> TimeRange {
        self.time_range
    }

    pub fn last_error(&self) -> Option<&Arc<SourceError>> {
        self.last_error.as_ref()
    }

    /// Bumped on every context mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn request(&self) -> DensityRequest {
        DensityRequest {
            data_view: self.data_view.clone(),
            filters: self.filters.clone(),
            time_range: self.time_range,
            bucket_interval: self.bucket_interval,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn set_time_range(&mut self, time_range: TimeRange) {
        if self.time_range != time_range {
            self.time_range = time_range;
            self.touch();
        }
    }

    fn set_filters(&mut self, filters: Vec<FieldFilter>) {
        if self.filters != filters {
            self.filters = filters;
            self.touch();
        }
    }

    fn set_data_view(&mut self, data_view: DataView) {
        if self.data_view != data_view {
            self.data_view = data_view;
            self.touch();
        }
    }

    fn install_buckets(&mut self, buckets: Vec<DensityBucket>) {
        self.buckets = buckets;
        self.last_error = None;
        self.touch();
    }

    fn record_error(&mut self, error: Arc<SourceError>) {
        self.last_error = Some(error);
        self.touch();
    }
}

#[derive(Debug, Clone)]
pub struct HistogramState {
    pub status: HistogramStatus,
    pub context: HistogramContext,
}

impl HistogramState {
    pub fn new(data_view: DataView, time_range: TimeRange, bucket_interval: TimeDelta) -> Self {
        Self {
            status: HistogramStatus::Uninitialized,
            context: HistogramContext::new(data_view, time_range, bucket_interval),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum HistogramEvent {
    Load,
    TimeRangeChanged { time_range: TimeRange },
    FiltersChanged { filters: Vec<FieldFilter> },
    DataViewChanged { data_view: DataView },
    LoadDensitySucceeded { buckets: Vec<DensityBucket> },
    LoadDensityFailed { error: Arc<SourceError> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HistogramEffect {
    LoadDensity { request: DensityRequest },
}

/// Applies one event to the density machine.
///
/// Query changes restart the fetch from any status. A failure keeps the
/// machine loading with the error recorded until a later completion or
/// restart settles it.
pub fn reduce_histogram(
    state: &mut HistogramState,
    event: HistogramEvent,
) -> Vec<HistogramEffect> {
    match (state.status, event) {
        (_, HistogramEvent::FiltersChanged { filters }) => {
            state.context.set_filters(filters);
            restart(state)
        }
        (_, HistogramEvent::DataViewChanged { data_view }) => {
            state.context.set_data_view(data_view);
            restart(state)
        }
        (_, HistogramEvent::TimeRangeChanged { time_range }) => {
            state.context.set_time_range(time_range);
            restart(state)
        }
        (HistogramStatus::Uninitialized, HistogramEvent::Load) => restart(state),
        (HistogramStatus::Loading, HistogramEvent::LoadDensitySucceeded { buckets }) => {
            state.context.install_buckets(buckets);
            state.status = HistogramStatus::Loaded;
            vec![]
        }
        (HistogramStatus::Loading, HistogramEvent::LoadDensityFailed { error }) => {
            warn!(error = %error, "density fetch failed; keeping the last buckets");
            state.context.record_error(error);
            vec![]
        }
        (status, event) => {
            debug!(status = %status, event = %event, "event not handled in this status");
            vec![]
        }
    }
}

fn restart(state: &mut HistogramState) -> Vec<HistogramEffect> {
    state.status = HistogramStatus::Loading;
    vec![HistogramEffect::LoadDensity {
        request: state.context.request(),
    }]
}

pub(crate) enum HistogramCmd {
    Dispatch {
        event: HistogramEvent,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<HistogramState>,
    },
    Shutdown,
}

/// Client side of a histogram engine.
#[derive(Clone)]
pub struct HistogramHandle {
    cmd_tx: mpsc::Sender<HistogramCmd>,
}

impl HistogramHandle {
    pub async fn dispatch(&self, event: HistogramEvent) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HistogramCmd::Dispatch {
                event,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub async fn snapshot(&self) -> Result<HistogramState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HistogramCmd::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| Error::Closed)?;
        reply_rx.await.map_err(|_| Error::ShuttingDown)
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(HistogramCmd::Shutdown);
    }

    pub async fn update_time_range(&self, time_range: TimeRange) -> Result<()> {
        self.dispatch(HistogramEvent::TimeRangeChanged { time_range })
            .await
    }

    pub async fn update_filters(&self, filters: Vec<FieldFilter>) -> Result<()> {
        self.dispatch(HistogramEvent::FiltersChanged { filters }).await
    }

    pub async fn update_data_view(&self, data_view: DataView) -> Result<()> {
        self.dispatch(HistogramEvent::DataViewChanged { data_view })
            .await
    }
}

struct DensityCompletion {
    generation: u64,
    event: HistogramEvent,
}

struct InFlightFetch {
    generation: u64,
    token: CancellationToken,
}

/// Single-slot runtime for the density machine.
///
/// A restart cancels the in-flight fetch; its late completion carries a
/// stale generation and is dropped.
struct HistogramActor {
    state: HistogramState,
    source: Arc<dyn LogEntrySource>,
    in_flight: Option<InFlightFetch>,
    next_generation: u64,
    completion_tx: mpsc::Sender<DensityCompletion>,
    completion_rx: mpsc::Receiver<DensityCompletion>,
}

impl HistogramActor {
    fn new(state: HistogramState, source: Arc<dyn LogEntrySource>) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(COMPLETION_CHANNEL_CAPACITY);
        Self {
            state,
            source,
            in_flight: None,
            next_generation: 0,
            completion_tx,
            completion_rx,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<HistogramCmd>) {
        self.handle_event(HistogramEvent::Load);

        loop {
            tokio::select! {
                biased;

                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        HistogramCmd::Dispatch { event, reply } => {
                            self.handle_event(event);
                            let _ = reply.send(());
                        }
                        HistogramCmd::Snapshot { reply } => {
                            let _ = reply.send(self.state.clone());
                        }
                        HistogramCmd::Shutdown => {
                            if let Some(fetch) = self.in_flight.take() {
                                fetch.token.cancel();
                            }
                            break;
                        }
                    }
                }

                Some(completion) = self.completion_rx.recv() => {
                    let current = self
                        .in_flight
                        .as_ref()
                        .is_some_and(|fetch| fetch.generation == completion.generation);
                    if !current {
                        debug!(
                            generation = completion.generation,
                            "dropping completion from a superseded density fetch"
                        );
                        continue;
                    }
                    self.in_flight = None;
                    self.handle_event(completion.event);
                }

                else => break,
            }
        }

        debug!("histogram actor stopped");
    }

    fn handle_event(&mut self, event: HistogramEvent) {
        for effect in reduce_histogram(&mut self.state, event) {
            match effect {
                HistogramEffect::LoadDensity { request } => self.begin_fetch(request),
            }
        }
    }

    fn begin_fetch(&mut self, request: DensityRequest) {
        if let Some(previous) = self.in_flight.take() {
            previous.token.cancel();
            debug!("superseding in-flight density fetch");
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        let token = CancellationToken::new();
        self.in_flight = Some(InFlightFetch {
            generation,
            token: token.clone(),
        });

        let source = Arc::clone(&self.source);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let event = match source.fetch_density(request, token).await {
                Ok(buckets) => HistogramEvent::LoadDensitySucceeded { buckets },
                Err(error) => HistogramEvent::LoadDensityFailed {
                    error: Arc::new(error),
                },
            };
            let _ = completion_tx
                .send(DensityCompletion { generation, event })
                .await;
        });
    }
}

/// Spawns a histogram engine over `source` and returns its handle. The
/// first fetch starts immediately.
pub fn spawn_histogram_engine(
    source: Arc<dyn LogEntrySource>,
    data_view: DataView,
    time_range: TimeRange,
    bucket_interval: TimeDelta,
) -> HistogramHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
    let state = HistogramState::new(data_view, time_range, bucket_interval);
    let actor = HistogramActor::new(state, source);
    tokio::spawn(actor.run(cmd_rx));
    HistogramHandle { cmd_tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};
    use rstest::rstest;

    use crate::entry::{LogEntry, Position};
    use crate::source::MemoryLogStore;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn new_state() -> HistogramState {
        HistogramState::new(
            DataView::new("logs", "Logs"),
            TimeRange::new(ts(0), ts(29)),
            TimeDelta::seconds(10),
        )
    }

    fn bucket(secs: i64, count: u64) -> DensityBucket {
        DensityBucket {
            start: ts(secs),
            count,
        }
    }

    fn entry(secs: i64, service: &str) -> LogEntry {
        LogEntry::new(
            Position::new(ts(secs), 0),
            serde_json::json!({ "message": "m", "service": service }),
        )
    }

    fn seeded_store() -> Arc<MemoryLogStore> {
        Arc::new(MemoryLogStore::with_entries([
            entry(5, "api"),
            entry(15, "api"),
            entry(18, "worker"),
            entry(25, "api"),
        ]))
    }

    fn spawn(store: Arc<MemoryLogStore>) -> HistogramHandle {
        spawn_histogram_engine(
            store,
            DataView::new("logs", "Logs"),
            TimeRange::new(ts(0), ts(29)),
            TimeDelta::seconds(10),
        )
    }

    async fn wait_for(
        handle: &HistogramHandle,
        predicate: impl Fn(&HistogramState) -> bool,
    ) -> HistogramState {
        for _ in 0..200 {
            let state = handle.snapshot().await.expect("engine should be alive");
            if predicate(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached before the deadline");
    }

    fn counts(state: &HistogramState) -> Vec<u64> {
        state.context.buckets().iter().map(|b| b.count).collect()
    }

    #[test]
    fn load_fetches_and_installs_buckets() {
        let mut state = new_state();
        let effects = reduce_histogram(&mut state, HistogramEvent::Load);
        assert_eq!(state.status, HistogramStatus::Loading);
        assert_eq!(
            effects,
            vec![HistogramEffect::LoadDensity {
                request: state.context.request()
            }]
        );

        reduce_histogram(
            &mut state,
            HistogramEvent::LoadDensitySucceeded {
                buckets: vec![bucket(0, 2), bucket(10, 0), bucket(20, 1)],
            },
        );
        assert_eq!(state.status, HistogramStatus::Loaded);
        assert_eq!(state.context.buckets().len(), 3);
    }

    #[test]
    fn transient_failure_keeps_the_machine_loading() {
        let mut state = new_state();
        reduce_histogram(&mut state, HistogramEvent::Load);
        let effects = reduce_histogram(
            &mut state,
            HistogramEvent::LoadDensityFailed {
                error: Arc::new(SourceError::search("boom")),
            },
        );
        assert_eq!(state.status, HistogramStatus::Loading);
        assert!(effects.is_empty());
        assert!(state.context.last_error().is_some());

        reduce_histogram(
            &mut state,
            HistogramEvent::LoadDensitySucceeded {
                buckets: vec![bucket(0, 1)],
            },
        );
        assert_eq!(state.status, HistogramStatus::Loaded);
        assert!(state.context.last_error().is_none());
    }

    #[rstest]
    #[case::filters(HistogramEvent::FiltersChanged {
        filters: vec![FieldFilter::new("service", "api")],
    })]
    #[case::data_view(HistogramEvent::DataViewChanged {
        data_view: DataView::new("other", "Other"),
    })]
    #[case::time_range(HistogramEvent::TimeRangeChanged {
        time_range: TimeRange::new(ts(100), ts(200)),
    })]
    fn query_changes_restart_the_fetch(#[case] event: HistogramEvent) {
        let mut state = new_state();
        reduce_histogram(&mut state, HistogramEvent::Load);
        reduce_histogram(
            &mut state,
            HistogramEvent::LoadDensitySucceeded {
                buckets: vec![bucket(0, 1)],
            },
        );

        let effects = reduce_histogram(&mut state, event);
        assert_eq!(state.status, HistogramStatus::Loading);
        assert_eq!(
            effects,
            vec![HistogramEffect::LoadDensity {
                request: state.context.request()
            }]
        );
        // the settled buckets stay visible while the replacement loads
        assert_eq!(state.context.buckets().len(), 1);
    }

    #[test]
    fn query_change_mid_flight_reissues_the_fetch() {
        let mut state = new_state();
        reduce_histogram(&mut state, HistogramEvent::Load);
        let effects = reduce_histogram(
            &mut state,
            HistogramEvent::FiltersChanged {
                filters: vec![FieldFilter::new("service", "api")],
            },
        );
        assert_eq!(state.status, HistogramStatus::Loading);
        assert_eq!(effects.len(), 1);
    }

    #[tokio::test]
    async fn engine_loads_bucket_counts_on_spawn() {
        let handle = spawn(seeded_store());
        let state = wait_for(&handle, |s| s.status == HistogramStatus::Loaded).await;
        assert_eq!(counts(&state), vec![1, 2, 1]);
        handle.shutdown();
    }

    #[tokio::test]
    async fn filter_changes_refresh_the_buckets() {
        let store = seeded_store();
        let handle = spawn(Arc::clone(&store));
        wait_for(&handle, |s| s.status == HistogramStatus::Loaded).await;

        handle
            .update_filters(vec![FieldFilter::new("service", "api")])
            .await
            .unwrap();
        let state = wait_for(&handle, |s| {
            s.status == HistogramStatus::Loaded && counts(s).iter().sum::<u64>() == 3
        })
        .await;
        assert_eq!(counts(&state), vec![1, 1, 1]);
        handle.shutdown();
    }

    #[tokio::test]
    async fn a_restart_mid_fetch_drops_the_superseded_result() {
        let store = seeded_store();
        let handle = spawn(Arc::clone(&store));
        wait_for(&handle, |s| s.status == HistogramStatus::Loaded).await;

        store.set_response_delay(Some(Duration::from_millis(40)));
        handle
            .update_time_range(TimeRange::new(ts(10), ts(29)))
            .await
            .unwrap();
        handle
            .update_filters(vec![FieldFilter::new("service", "api")])
            .await
            .unwrap();

        // the superseded fetch resolves as cancelled almost immediately;
        // its completion must not leave an error on the fresh query
        tokio::time::sleep(Duration::from_millis(15)).await;
        let state = handle.snapshot().await.unwrap();
        assert_eq!(state.status, HistogramStatus::Loading);
        assert!(state.context.last_error().is_none());

        let state = wait_for(&handle, |s| s.status == HistogramStatus::Loaded).await;
        assert_eq!(counts(&state), vec![1, 1]);
        handle.shutdown();
    }

    #[tokio::test]
    async fn a_failed_fetch_leaves_the_last_buckets_standing() {
        let store = seeded_store();
        let handle = spawn(Arc::clone(&store));
        wait_for(&handle, |s| s.status == HistogramStatus::Loaded).await;

        store.inject_failure(SourceError::search("shard failure"));
        handle
            .update_time_range(TimeRange::new(ts(0), ts(19)))
            .await
            .unwrap();
        let state = wait_for(&handle, |s| s.context.last_error().is_some()).await;
        assert_eq!(state.status, HistogramStatus::Loading);
        assert_eq!(state.context.buckets().len(), 3);
        handle.shutdown();
    }
}
