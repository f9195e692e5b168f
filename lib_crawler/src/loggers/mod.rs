/// Installs the global `tracing` subscriber (console plus daily JSON file).
pub mod setup;

pub use setup::{init_logging, LoggingError};
