//! In-process simulated link.
//!
//! [`SimulatedAdapter`] is the ground side of a link whose drone side is a
//! [`DroneEndpoint`] handed to a flight controller:
//!
//! * **Outbound** – commands accepted by `send_command` arrive on
//!   [`DroneEndpoint::recv_command`].
//! * **Inbound** – telemetry pushed through the endpoint's [`TelemetryUplink`]
//!   comes out of `telemetry_stream`.
//!
//! The link can be made to refuse connects, drop out, or add latency per
//! send, which makes failover and priority behaviour observable in tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use skylink_types::{
    Command, ConnectionHealth, ConnectionStatus, LinkError, ProtocolType, Telemetry,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter::{AdapterFactory, HealthSource, ProtocolAdapter};
use crate::bus::Broadcaster;
use crate::health::HealthTracker;

struct Shared {
    protocol: ProtocolType,
    connected: AtomicBool,
    link_up: AtomicBool,
    refuse_connect: AtomicBool,
    send_latency_ms: AtomicU64,
    target: Mutex<Option<String>>,
    delivered: Mutex<Vec<Command>>,
    commands: mpsc::UnboundedSender<Command>,
    telemetry: Broadcaster<Telemetry>,
    health: HealthTracker,
}

impl Shared {
    fn is_live(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.link_up.load(Ordering::SeqCst)
    }
}

/// Ground side of a simulated link.  Clones share the same link.
#[derive(Clone)]
pub struct SimulatedAdapter {
    shared: Arc<Shared>,
}

/// Drone side of a simulated link.
pub struct DroneEndpoint {
    protocol: ProtocolType,
    commands: mpsc::UnboundedReceiver<Command>,
    uplink: TelemetryUplink,
}

/// Handle a drone uses to push telemetry back over its link.
#[derive(Clone)]
pub struct TelemetryUplink {
    shared: Arc<Shared>,
}

impl SimulatedAdapter {
    pub fn new(protocol: ProtocolType) -> (Self, DroneEndpoint) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            protocol,
            connected: AtomicBool::new(false),
            link_up: AtomicBool::new(true),
            refuse_connect: AtomicBool::new(false),
            send_latency_ms: AtomicU64::new(0),
            target: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
            commands: tx,
            telemetry: Broadcaster::with_default_capacity("sim-telemetry"),
            health: HealthTracker::new("sim-health"),
        });
        let endpoint = DroneEndpoint {
            protocol,
            commands: rx,
            uplink: TelemetryUplink {
                shared: Arc::clone(&shared),
            },
        };
        (Self { shared }, endpoint)
    }

    /// Raise or drop the physical link.  While down, sends fail, telemetry
    /// is refused, and connect attempts are rejected.
    pub fn set_link_up(&self, up: bool) {
        self.shared.link_up.store(up, Ordering::SeqCst);
        if !self.shared.connected.load(Ordering::SeqCst) {
            return;
        }
        if up {
            self.shared.health.set_status(ConnectionStatus::Connected);
        } else {
            self.shared.health.record_error("link dropped");
            self.shared.health.set_status(ConnectionStatus::Disconnected);
        }
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.shared.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub fn set_send_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.shared.send_latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Every command this link delivered, in delivery order.
    pub fn delivered_commands(&self) -> Vec<Command> {
        self.shared
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn target(&self) -> Option<String> {
        self.shared
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HealthSource for SimulatedAdapter {
    fn health_snapshot(&self) -> ConnectionHealth {
        self.shared.health.snapshot()
    }
}

#[async_trait]
impl ProtocolAdapter for SimulatedAdapter {
    async fn connect(&self, target: &str) -> Result<(), LinkError> {
        let protocol = self.shared.protocol;
        if self.shared.refuse_connect.load(Ordering::SeqCst)
            || !self.shared.link_up.load(Ordering::SeqCst)
        {
            let details = format!("simulated endpoint {target} unreachable");
            self.shared.health.record_error(details.clone());
            return Err(LinkError::Connection { protocol, details });
        }
        *self
            .shared
            .target
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(target.to_string());
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.health.set_status(ConnectionStatus::Connected);
        debug!(protocol = %protocol, target, "simulated link connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.health.set_status(ConnectionStatus::Disconnected);
        }
    }

    async fn send_command(&self, command: &Command) -> bool {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return false;
        }
        if !self.shared.link_up.load(Ordering::SeqCst) {
            self.shared
                .health
                .record_error(format!("send {} failed: link down", command.command_type()));
            return false;
        }
        let latency = self.shared.send_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.shared.commands.send(command.clone()).is_err() {
            warn!(protocol = %self.shared.protocol, "simulated drone endpoint dropped");
            self.shared.health.record_error("drone endpoint dropped");
            return false;
        }
        self.shared
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());
        true
    }

    fn telemetry_stream(&self) -> BoxStream<'static, Telemetry> {
        self.shared.telemetry.stream()
    }

    fn health_stream(&self) -> BoxStream<'static, ConnectionHealth> {
        self.shared.health.stream()
    }

    fn is_connected(&self) -> bool {
        self.shared.is_live()
    }

    fn protocol_type(&self) -> ProtocolType {
        self.shared.protocol
    }

    fn diagnostics(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("kind".to_string(), "simulated".to_string());
        map.insert(
            "link_up".to_string(),
            self.shared.link_up.load(Ordering::SeqCst).to_string(),
        );
        map.insert(
            "delivered".to_string(),
            self.delivered_commands().len().to_string(),
        );
        if let Some(target) = self.target() {
            map.insert("target".to_string(), target);
        }
        map
    }
}

impl DroneEndpoint {
    pub fn protocol(&self) -> ProtocolType {
        self.protocol
    }

    /// Next command delivered over this link.  `None` once the ground side is
    /// gone.
    pub async fn recv_command(&mut self) -> Option<Command> {
        self.commands.recv().await
    }

    pub fn uplink(&self) -> TelemetryUplink {
        self.uplink.clone()
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Command>, TelemetryUplink) {
        (self.commands, self.uplink)
    }
}

impl TelemetryUplink {
    pub fn protocol(&self) -> ProtocolType {
        self.shared.protocol
    }

    pub fn is_live(&self) -> bool {
        self.shared.is_live()
    }

    /// Push a reading to the ground side.  Fails while the link is not live.
    pub fn send(&self, telemetry: Telemetry) -> Result<(), LinkError> {
        if !self.shared.is_live() {
            return Err(LinkError::Channel(format!(
                "{} link is down",
                self.shared.protocol
            )));
        }
        self.shared.health.message_received();
        self.shared.telemetry.publish(telemetry);
        Ok(())
    }
}

/// Hands out one shared [`SimulatedAdapter`] per protocol and keeps the
/// matching drone endpoints until a flight controller claims them.
#[derive(Default)]
pub struct SimulatedAdapterFactory {
    adapters: Mutex<BTreeMap<ProtocolType, SimulatedAdapter>>,
    endpoints: Mutex<Vec<DroneEndpoint>>,
}

impl SimulatedAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The adapter for `protocol`, created on first use.
    pub fn adapter(&self, protocol: ProtocolType) -> SimulatedAdapter {
        let mut adapters = self.adapters.lock().unwrap_or_else(PoisonError::into_inner);
        adapters
            .entry(protocol)
            .or_insert_with(|| {
                let (adapter, endpoint) = SimulatedAdapter::new(protocol);
                self.endpoints
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(endpoint);
                adapter
            })
            .clone()
    }

    /// Drone endpoints created so far and not yet taken.
    pub fn take_endpoints(&self) -> Vec<DroneEndpoint> {
        std::mem::take(&mut *self.endpoints.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl AdapterFactory for SimulatedAdapterFactory {
    fn create(&self, protocol: ProtocolType) -> Arc<dyn ProtocolAdapter> {
        Arc::new(self.adapter(protocol))
    }
}
