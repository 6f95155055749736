use std::sync::Arc;

use futures::Stream;
use tokio::sync::{broadcast, mpsc};

use crate::machine::state::{WindowContext, WindowStatus};

/// One broadcast frame per dispatched event.
///
/// `changed` is false when the dispatch left both the status and the
/// context untouched, letting subscribers skip redundant work.
#[derive(Debug, Clone)]
pub struct WindowUpdate {
    pub seq: u64,
    pub changed: bool,
    pub status: WindowStatus,
    pub context: Arc<WindowContext>,
}

/// Live feed of window updates. Dropping it detaches from the engine.
pub struct WindowSubscription {
    rx: broadcast::Receiver<WindowUpdate>,
    unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeSignal>,
}

pub(crate) struct UnsubscribeSignal;

impl WindowSubscription {
    pub(crate) fn new(
        rx: broadcast::Receiver<WindowUpdate>,
        unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeSignal>,
    ) -> Self {
        Self { rx, unsubscribe_tx }
    }

    /// Next update, or `None` once the engine has stopped. A slow consumer
    /// that lags the broadcast ring loses the overwritten updates and picks
    /// back up at the oldest retained one.
    pub async fn recv(&mut self) -> Option<WindowUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(update),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "window subscriber lagged, updates were dropped");
                }
            }
        }
    }

    /// Adapts the subscription into a stream, ending when the engine stops.
    /// Lagged gaps are skipped the same way [`recv`](Self::recv) skips them.
    pub fn into_stream(self) -> impl Stream<Item = WindowUpdate> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|update| (update, subscription))
        })
    }
}

impl Drop for WindowSubscription {
    fn drop(&mut self) {
        let _ = self.unsubscribe_tx.send(UnsubscribeSignal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use futures::StreamExt;

    use crate::config::WindowConfig;
    use crate::entry::{DataView, TimeRange};
    use crate::machine::state::WindowState;

    fn update(seq: u64) -> WindowUpdate {
        let state = WindowState::new(
            WindowConfig::default(),
            DataView::new("logs", "Logs"),
            TimeRange::new(
                Utc.timestamp_opt(0, 0).unwrap(),
                Utc.timestamp_opt(100, 0).unwrap(),
            ),
        );
        WindowUpdate {
            seq,
            changed: false,
            status: state.status,
            context: Arc::new(state.context),
        }
    }

    fn subscription_of(rx: broadcast::Receiver<WindowUpdate>) -> WindowSubscription {
        let (unsubscribe_tx, _unsubscribe_rx) = mpsc::unbounded_channel();
        WindowSubscription::new(rx, unsubscribe_tx)
    }

    #[tokio::test]
    async fn stream_yields_updates_and_ends_when_the_engine_stops() {
        let (tx, rx) = broadcast::channel(8);
        let stream = subscription_of(rx).into_stream();
        futures::pin_mut!(stream);

        tx.send(update(1)).unwrap();
        tx.send(update(2)).unwrap();
        drop(tx);

        assert_eq!(stream.next().await.map(|u| u.seq), Some(1));
        assert_eq!(stream.next().await.map(|u| u.seq), Some(2));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn a_lagged_subscriber_resumes_at_the_oldest_retained_update() {
        let (tx, rx) = broadcast::channel(2);
        let mut subscription = subscription_of(rx);
        for seq in 1..=4 {
            tx.send(update(seq)).unwrap();
        }

        // seq 1 and 2 were overwritten in the ring
        assert_eq!(subscription.recv().await.map(|u| u.seq), Some(3));
        assert_eq!(subscription.recv().await.map(|u| u.seq), Some(4));
    }
}
