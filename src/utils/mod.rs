//! Utils Module
pub mod telemetry;
pub mod template;
pub mod truncate;

pub use telemetry::init_logging;
pub use truncate::preview;
