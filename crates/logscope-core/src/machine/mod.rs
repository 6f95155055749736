pub mod effect;
pub mod event;
pub mod guards;
pub mod reduce;
pub mod state;

#[cfg(test)]
mod tests;

pub use effect::{Effect, LoadSlot, ScrollAlign};
pub use event::Event;
pub use reduce::reduce;
pub use state::{
    ChunkHealth, GridSync, ReloadSide, TailPhase, TailSync, WindowContext, WindowState,
    WindowStatus,
};
