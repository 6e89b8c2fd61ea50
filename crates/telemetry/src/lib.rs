// Path: crates/telemetry/src/lib.rs
//! Logging and metrics for kestrel nodes.
//!
//! Components report through the domain traits in [`sinks`]; a node picks
//! either [`sinks::NopSink`] or the Prometheus-backed sink from [`prometheus`].

pub mod init;
pub mod prometheus;
pub mod sinks;
pub mod time;
