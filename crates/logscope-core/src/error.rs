use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures crossing the engine's command boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Window engine is closed")]
    Closed,
    #[error("Window engine is shutting down")]
    ShuttingDown,
}
