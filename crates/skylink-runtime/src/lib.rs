//! `skylink-runtime` – process-level wiring.
//!
//! # Modules
//!
//! - [`config`] – [`ControlPlaneConfig`]: TOML configuration with
//!   `SKYLINK_*` environment overrides.
//! - [`control_plane`] – [`ControlPlane`]: builds the communication manager,
//!   the flight controller and the safety supervisor from a configuration and
//!   owns their lifecycle.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with optional OTLP span export.

pub mod config;
pub mod control_plane;
pub mod telemetry;

pub use config::{ConfigError, ControlPlaneConfig, DEFAULT_CONFIG_FILE, DroneLimits};
pub use control_plane::{ControlPlane, ControlPlaneStatus, RuntimeError};
pub use telemetry::{TracerProviderGuard, init_tracing};
