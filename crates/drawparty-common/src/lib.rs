//! # Draw Party Common
//!
//! Logging configuration shared by the Draw Party offline agent crates.
//!
//! The agent itself never installs a global subscriber; the embedding host
//! calls [`init_logging`] (or [`try_init_logging`]) once at startup.

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
