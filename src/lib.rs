//! # pulse-rs
//!
//! Serialized, deduplicating check queue for the pulse notification bot.
//!
//! Provides an in-memory work queue that admits at most one in-flight item
//! per logical target, a cron scheduler that feeds it, a TOML check registry
//! with a hook-command worker, and OpenTelemetry observability.

pub mod checks;
pub mod config;
pub mod error;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod telemetry;
