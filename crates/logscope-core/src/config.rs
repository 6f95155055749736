use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::RowIndex;

/// Tuning for one window engine instance.
///
/// Supplied once at spawn and immutable afterwards, except for the tail poll
/// interval which tracks the host's refresh-interval signal through the
/// handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Rows fetched per page.
    pub chunk_size: usize,
    /// Rows that must remain buffered past the viewport before a refill is
    /// triggered.
    pub minimum_chunk_overscan: usize,
    /// Row index a centered load anchors to; half the virtual row count of
    /// the backing grid.
    pub center_row_index: RowIndex,
    /// Delay between tail polls while live-following.
    pub tail_poll_interval: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            minimum_chunk_overscan: 50,
            center_row_index: 5000,
            tail_poll_interval: Duration::from_secs(2),
        }
    }
}

impl WindowConfig {
    /// Rows requested per page. One extra row distinguishes a store that has
    /// more data past the page from one the page exactly drained.
    pub fn fetch_limit(&self) -> usize {
        self.chunk_size + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_tuning() {
        let config = WindowConfig::default();
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.minimum_chunk_overscan, 50);
        assert_eq!(config.fetch_limit(), 201);
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let config: WindowConfig = serde_json::from_str(r#"{ "chunk_size": 50 }"#).unwrap();
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.minimum_chunk_overscan, 50);
    }
}
