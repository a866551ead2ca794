//! The protocol adapter contract.
//!
//! The control plane never speaks directly to a WebSocket or a MAVLink
//! serial port.  Every transport is wrapped in a [`ProtocolAdapter`] and the
//! [`UnifiedCommunicationManager`][crate::manager::UnifiedCommunicationManager]
//! only ever holds `Arc<dyn ProtocolAdapter>`.
//!
//! # Implementations
//!
//! - [`SimulatedAdapter`][crate::sim_adapter::SimulatedAdapter] – in-process
//!   link to a simulated drone.
//! - [`WebSocketAdapter`][crate::websocket_adapter::WebSocketAdapter] – JSON
//!   frames over a WebSocket.
//! - [`MavlinkAdapter`][crate::mavlink_adapter::MavlinkAdapter] – MAVLink over
//!   serial, UDP or TCP.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use skylink_types::{Command, ConnectionHealth, LinkError, ProtocolType, Telemetry};

/// Anything that can report a current [`ConnectionHealth`] snapshot.
///
/// The safety supervisor polls this to inspect accumulated errors and stale
/// message timestamps.
pub trait HealthSource: Send + Sync {
    fn health_snapshot(&self) -> ConnectionHealth;
}

/// Every transport must implement this trait.
///
/// # Contract
///
/// * `connect` – fails with [`LinkError::Connection`] when the endpoint cannot
///   be reached.
/// * `disconnect` – idempotent.
/// * `send_command` – `false` means "not delivered".  Ordinary transport
///   failures are recorded in the adapter's health, never returned as errors.
/// * `telemetry_stream` / `health_stream` – live streams; a fresh call after a
///   reconnect yields a fresh stream.
#[async_trait]
pub trait ProtocolAdapter: HealthSource {
    async fn connect(&self, target: &str) -> Result<(), LinkError>;

    async fn disconnect(&self);

    async fn send_command(&self, command: &Command) -> bool;

    fn telemetry_stream(&self) -> BoxStream<'static, Telemetry>;

    fn health_stream(&self) -> BoxStream<'static, ConnectionHealth>;

    fn is_connected(&self) -> bool;

    fn protocol_type(&self) -> ProtocolType;

    /// Adapter-specific key/value diagnostics for status queries.
    fn diagnostics(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// Builds adapters for the protocols named in a connection specification.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, protocol: ProtocolType) -> Arc<dyn ProtocolAdapter>;
}
