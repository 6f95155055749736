// Incremental log-window engine without UI dependencies

pub mod config;
pub mod entry;
pub mod error;
pub mod histogram;
pub mod loader;
pub mod machine;
pub mod runtime;
pub mod scroll;
pub mod select;
pub mod source;
pub mod window;
