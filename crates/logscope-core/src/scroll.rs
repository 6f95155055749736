//! Bridge between the window engine and the host's virtualized grid.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::entry::RowIndex;
use crate::machine::effect::ScrollAlign;
use crate::runtime::WindowSubscription;
use crate::select::RowWindowSelector;

/// Rendering surface the engine can reposition.
///
/// Implemented by the host over its grid. Calls arrive on runtime worker
/// tasks, so implementations must be cheap or hand the work off.
#[async_trait]
pub trait GridSurface: Send + Sync {
    async fn scroll_to_row(&self, index: RowIndex, align: ScrollAlign);
}

/// Follows live mode: every update that changed the window while tailing
/// snaps the surface to the newest row. Runs until the engine stops.
pub async fn run_scroll_sync(mut subscription: WindowSubscription, surface: Arc<dyn GridSurface>) {
    let mut selector = RowWindowSelector::new();
    while let Some(update) = subscription.recv().await {
        if !update.changed || !update.status.is_tailing() {
            continue;
        }
        let window = selector.select(&update.status, &update.context);
        if let Some(end) = window.end_row_index {
            surface.scroll_to_row(end - 1, ScrollAlign::End).await;
        }
    }
}

pub fn spawn_scroll_sync(
    subscription: WindowSubscription,
    surface: Arc<dyn GridSurface>,
) -> JoinHandle<()> {
    tokio::spawn(run_scroll_sync(subscription, surface))
}
