//! Actor runtime that drives the window machine.
//!
//! [`spawn_window_engine`] owns the machine state on a dedicated task,
//! interprets the effects the reducer returns, and publishes one update
//! per dispatched event to its subscribers.

mod actor;
mod subscription;

pub use actor::{spawn_window_engine, WindowHandle};
pub use subscription::{WindowSubscription, WindowUpdate};

#[cfg(test)]
pub(crate) use subscription::UnsubscribeSignal;
