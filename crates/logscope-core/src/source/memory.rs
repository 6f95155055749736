use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entry::{LogEntry, SortDirection};
use crate::source::{
    DensityBucket, DensityRequest, EntriesRequest, EntryPage, LogEntrySource, SourceError,
};

const MAX_DENSITY_BUCKETS: i64 = 10_000;

/// In-memory document store.
///
/// Reference implementation of [`LogEntrySource`] for embedding hosts
/// without a real search backend, and the stub used throughout the tests.
/// Entries are kept sorted by position; an optional per-request delay and a
/// failure queue make loader races reproducible.
pub struct MemoryLogStore {
    entries: Mutex<Vec<Arc<LogEntry>>>,
    response_delay: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<SourceError>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            response_delay: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        let store = Self::new();
        store.extend(entries);
        store
    }

    /// Inserts an entry, keeping the list sorted by position.
    pub fn push(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            let entry = Arc::new(entry);
            let at = entries.partition_point(|e| e.position <= entry.position);
            entries.insert(at, entry);
        }
    }

    pub fn extend(&self, new_entries: impl IntoIterator<Item = LogEntry>) {
        for entry in new_entries {
            self.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delays every subsequent fetch by `delay`; `None` restores instant
    /// responses. In-flight fetches keep the delay they started with.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.response_delay.lock() {
            *slot = delay;
        }
    }

    /// Queues an error; each queued error fails exactly one subsequent fetch.
    pub fn inject_failure(&self, error: SourceError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    async fn apply_delay(&self, token: &CancellationToken) -> Result<(), SourceError> {
        let delay = *self
            .response_delay
            .lock()
            .map_err(|_| SourceError::Disconnected)?;
        if let Some(delay) = delay {
            tokio::select! {
                () = token.cancelled() => return Err(SourceError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> Option<SourceError> {
        self.failures.lock().ok().and_then(|mut f| f.pop_front())
    }

    fn project(entry: &Arc<LogEntry>, columns: &[String]) -> Arc<LogEntry> {
        if columns.is_empty() {
            return entry.clone();
        }
        let serde_json::Value::Object(fields) = &entry.fields else {
            return entry.clone();
        };
        let projected: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .filter(|(key, _)| columns.iter().any(|c| c == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Arc::new(LogEntry::new(
            entry.position,
            serde_json::Value::Object(projected),
        ))
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogEntrySource for MemoryLogStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_entries(
        &self,
        request: EntriesRequest,
        token: CancellationToken,
    ) -> Result<EntryPage, SourceError> {
        self.apply_delay(&token).await?;
        if let Some(error) = self.take_injected_failure() {
            return Err(error);
        }

        let entries = self.entries.lock().map_err(|_| SourceError::Disconnected)?;
        let selected: Vec<&Arc<LogEntry>> = entries
            .iter()
            .filter(|entry| request.time_range.contains(entry.position.timestamp))
            .filter(|entry| request.filters.iter().all(|f| f.matches(&entry.fields)))
            .filter(|entry| match (&request.edge, request.direction) {
                (Some(edge), SortDirection::Asc) => edge.admits_forward(entry.position),
                (Some(edge), SortDirection::Desc) => edge.admits_backward(entry.position),
                (None, _) => true,
            })
            .collect();

        let page: Vec<Arc<LogEntry>> = match request.direction {
            SortDirection::Asc => selected
                .into_iter()
                .take(request.limit)
                .map(|entry| Self::project(entry, &request.columns))
                .collect(),
            SortDirection::Desc => {
                let skip = selected.len().saturating_sub(request.limit);
                selected
                    .into_iter()
                    .skip(skip)
                    .map(|entry| Self::project(entry, &request.columns))
                    .collect()
            }
        };

        tracing::debug!(
            count = page.len(),
            direction = %request.direction,
            limit = request.limit,
            "memory store served entries page"
        );
        Ok(EntryPage { entries: page })
    }

    async fn fetch_density(
        &self,
        request: DensityRequest,
        token: CancellationToken,
    ) -> Result<Vec<DensityBucket>, SourceError> {
        self.apply_delay(&token).await?;
        if let Some(error) = self.take_injected_failure() {
            return Err(error);
        }

        let interval_ms = request.bucket_interval.num_milliseconds();
        if interval_ms <= 0 {
            return Err(SourceError::invalid_request("bucket interval must be positive"));
        }
        let span_ms = (request.time_range.end - request.time_range.start).num_milliseconds();
        if span_ms < 0 {
            return Err(SourceError::invalid_request("time range end precedes start"));
        }
        let bucket_count = span_ms / interval_ms + 1;
        if bucket_count > MAX_DENSITY_BUCKETS {
            return Err(SourceError::invalid_request(format!(
                "range would produce {bucket_count} buckets"
            )));
        }

        let entries = self.entries.lock().map_err(|_| SourceError::Disconnected)?;
        let mut counts = vec![0_u64; bucket_count as usize];
        for entry in entries.iter() {
            if !request.time_range.contains(entry.position.timestamp) {
                continue;
            }
            if !request.filters.iter().all(|f| f.matches(&entry.fields)) {
                continue;
            }
            let offset_ms = (entry.position.timestamp - request.time_range.start).num_milliseconds();
            let bucket = (offset_ms / interval_ms) as usize;
            if let Some(count) = counts.get_mut(bucket) {
                *count += 1;
            }
        }

        Ok(counts
            .into_iter()
            .enumerate()
            .map(|(i, count)| DensityBucket {
                start: request.time_range.start + request.bucket_interval * (i as i32),
                count,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ChunkEdge, DataView, FieldFilter, Position, TimeRange};
    use chrono::{TimeDelta, TimeZone, Utc};

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn entry(secs: i64, tiebreaker: i64) -> LogEntry {
        LogEntry::new(
            Position::new(ts(secs), tiebreaker),
            serde_json::json!({ "message": format!("m{secs}-{tiebreaker}"), "service": "api" }),
        )
    }

    fn request(
        direction: SortDirection,
        edge: Option<ChunkEdge>,
        limit: usize,
    ) -> EntriesRequest {
        EntriesRequest {
            data_view: DataView::new("logs", "Logs"),
            filters: vec![],
            columns: vec![],
            time_range: TimeRange::new(ts(0), ts(1000)),
            direction,
            edge,
            limit,
        }
    }

    #[tokio::test]
    async fn ascending_page_starts_at_the_edge() {
        let store = MemoryLogStore::with_entries((0..10).map(|i| entry(i * 10, 0)));
        let edge = ChunkEdge::exclusive(Position::new(ts(30), 0));
        let page = store
            .fetch_entries(
                request(SortDirection::Asc, Some(edge), 3),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let times: Vec<i64> = page
            .entries
            .iter()
            .map(|e| e.position.timestamp.timestamp())
            .collect();
        assert_eq!(times, vec![40, 50, 60]);
    }

    #[tokio::test]
    async fn descending_page_ends_at_the_edge_in_ascending_order() {
        let store = MemoryLogStore::with_entries((0..10).map(|i| entry(i * 10, 0)));
        let edge = ChunkEdge::exclusive(Position::new(ts(50), 0));
        let page = store
            .fetch_entries(
                request(SortDirection::Desc, Some(edge), 3),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let times: Vec<i64> = page
            .entries
            .iter()
            .map(|e| e.position.timestamp.timestamp())
            .collect();
        assert_eq!(times, vec![20, 30, 40]);
    }

    #[tokio::test]
    async fn filters_and_projection_apply() {
        let store = MemoryLogStore::new();
        store.push(entry(10, 0));
        store.push(LogEntry::new(
            Position::new(ts(20), 0),
            serde_json::json!({ "message": "other", "service": "worker" }),
        ));
        let mut request = request(SortDirection::Asc, None, 10);
        request.filters = vec![FieldFilter::new("service", "api")];
        request.columns = vec!["message".to_string()];
        let page = store
            .fetch_entries(request, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(
            page.entries[0].fields,
            serde_json::json!({ "message": "m10-0" })
        );
    }

    #[tokio::test]
    async fn injected_failure_fails_one_fetch() {
        let store = MemoryLogStore::with_entries([entry(10, 0)]);
        store.inject_failure(SourceError::search("boom"));
        let first = store
            .fetch_entries(
                request(SortDirection::Asc, None, 10),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(first, Err(SourceError::search("boom")));
        let second = store
            .fetch_entries(
                request(SortDirection::Asc, None, 10),
                CancellationToken::new(),
            )
            .await;
        assert_eq!(second.unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn delayed_fetch_observes_cancellation() {
        let store = MemoryLogStore::with_entries([entry(10, 0)]);
        store.set_response_delay(Some(Duration::from_secs(60)));
        let token = CancellationToken::new();
        token.cancel();
        let result = store
            .fetch_entries(request(SortDirection::Asc, None, 10), token)
            .await;
        assert_eq!(result, Err(SourceError::Cancelled));
    }

    #[tokio::test]
    async fn density_counts_entries_per_bucket() {
        let store = MemoryLogStore::with_entries([
            entry(0, 0),
            entry(1, 0),
            entry(10, 0),
            entry(25, 0),
        ]);
        let buckets = store
            .fetch_density(
                DensityRequest {
                    data_view: DataView::new("logs", "Logs"),
                    filters: vec![],
                    time_range: TimeRange::new(ts(0), ts(29)),
                    bucket_interval: TimeDelta::seconds(10),
                },
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(buckets[1].start, ts(10));
    }
}
