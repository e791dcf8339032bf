//! # Biogate Daemon
//!
//! Runs fingerprint enrollment sessions against the single attached scanner.
//!
//! - [`arbiter`] - Exclusive device lease
//! - [`provider`] - Capture device abstraction and the simulated scanner
//! - [`runner`] - Per-connection session task
//! - [`transport`] - Connection ↔ runner bridge
//! - [`server`] - axum routes, CORS and graceful shutdown
//! - [`rate_limit`] - Upgrade throttling
//! - [`config`] - CLI/environment configuration

pub mod arbiter;
pub mod config;
pub mod provider;
pub mod rate_limit;
pub mod runner;
pub mod server;
pub mod transport;

pub use arbiter::{ArbiterError, DeviceArbiter, DeviceLease, LeaseId};
pub use config::{ConfigError, ServeArgs, SessionConfig};
pub use provider::{CaptureError, CaptureOutcome, CaptureProvider, SimulatedProvider, SimulatedStep};
pub use runner::{SessionContext, SessionHandle};
pub use server::{AppState, DaemonStatus};
