//! Server plumbing: configuration, telemetry and per-call metrics.
//!
//! - [`config`] - CLI arguments and the validated [`config::ServerConfig`].
//! - [`telemetry`] - console logging plus optional OpenTelemetry export.
//! - [`metrics`] - tower layer recording call metrics.

pub mod config;
pub mod metrics;
pub mod telemetry;
