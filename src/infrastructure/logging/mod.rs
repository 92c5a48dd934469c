//! Structured logging setup.

mod logger;

pub use logger::init_logging;
