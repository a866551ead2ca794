//! `skylink-middleware` – the link layer.
//!
//! Moves commands out to the drone and telemetry back, over whichever
//! transports happen to be alive.
//!
//! # Modules
//!
//! - [`adapter`] – the [`ProtocolAdapter`] contract every transport implements.
//! - [`bus`] – typed broadcast lanes built on Tokio broadcast channels.
//! - [`health`] – per-link [`ConnectionHealth`][skylink_types::ConnectionHealth]
//!   bookkeeping.
//! - [`sim_adapter`] – in-process simulated link and its drone-side endpoint.
//! - [`websocket_adapter`] – JSON frames over a WebSocket.
//! - [`mavlink_adapter`] – MAVLink over serial / UDP / TCP.
//! - [`connection_spec`] – `unified://…` connection specification parser.
//! - [`command_queue`] – unbounded two-lane queue with delivery receipts.
//! - [`manager`] – the [`UnifiedCommunicationManager`].

pub mod adapter;
pub mod bus;
pub mod command_queue;
pub mod connection_spec;
pub mod health;
pub mod manager;
pub mod mavlink_adapter;
pub mod sim_adapter;
pub mod websocket_adapter;

pub use adapter::{AdapterFactory, HealthSource, ProtocolAdapter};
pub use bus::Broadcaster;
pub use command_queue::{CommandQueue, DeliveryReceipt};
pub use connection_spec::{ConnectionSpec, DistributionMode};
pub use health::HealthTracker;
pub use manager::{
    DefaultAdapterFactory, ManagerConfig, ManagerStatus, ProtocolState,
    UnifiedCommunicationManager,
};
pub use mavlink_adapter::MavlinkAdapter;
pub use sim_adapter::{DroneEndpoint, SimulatedAdapter, SimulatedAdapterFactory, TelemetryUplink};
pub use websocket_adapter::{WebSocketAdapter, WireFrame};
