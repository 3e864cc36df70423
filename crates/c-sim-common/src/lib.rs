//! ---
//! csim_section: "01-core-functionality"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Shared primitives and utilities for the component runtime."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
//! Core shared primitives for the C-SIM component workspace.
//! This crate exposes configuration loading, logging setup, and the
//! millisecond-precision UTC timestamp type used across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{ComponentConfig, LoggingConfig, TopicConfig};
pub use logging::{init_tracing, LogFormat};
pub use time::{InvalidTimestamp, UtcTimestamp};
