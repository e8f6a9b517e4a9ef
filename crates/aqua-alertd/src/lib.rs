//! aqua-alertd - AquaGuard alert daemon
//!
//! Runs the alert dashboard API together with the background workers that
//! drain the rule-processing outbox, apply escalations and auto-resolve
//! expired alerts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod daemon;

pub use config::{AlertdConfig, ConfigError, LogFormat, LoggingConfig};
pub use daemon::Daemon;
