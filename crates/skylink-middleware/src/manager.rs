//! [`UnifiedCommunicationManager`] – multi-protocol link orchestration.
//!
//! One manager drives every adapter named in a [`ConnectionSpec`].  While
//! connected it owns five background tasks:
//!
//! | Task | Cadence | Job |
//! |---|---|---|
//! | connector | once, then every reconnect interval | connect protocols, elect the primary, retry missing ones |
//! | distributor | per queued command | route commands by [`DistributionMode`] |
//! | aggregator | per telemetry reading | merge adapter streams into one |
//! | health monitor | every health interval | drop dead adapters, publish aggregate health |
//! | failover | every failover interval | replace a missing or dead primary |
//!
//! [`disconnect`](UnifiedCommunicationManager::disconnect) aborts all five.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::stream::{self, AbortHandle, BoxStream, SelectAll};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use skylink_types::{
    Command, CommandType, ConnectionHealth, ConnectionStatus, LinkError, ProtocolType, Telemetry,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, trace, warn};

use crate::adapter::{AdapterFactory, HealthSource, ProtocolAdapter};
use crate::bus::Broadcaster;
use crate::command_queue::{CommandQueue, DeliveryReceipt};
use crate::connection_spec::{ConnectionSpec, DistributionMode};
use crate::health::HealthTracker;
use crate::mavlink_adapter::MavlinkAdapter;
use crate::websocket_adapter::WebSocketAdapter;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Timing of the manager's background tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub health_interval: Duration,
    pub failover_interval: Duration,
    pub reconnect_interval: Duration,
    /// Reconnect rounds before the connector gives up on missing protocols.
    pub max_reconnect_attempts: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(2),
            failover_interval: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

/// Builds real transports: [`WebSocketAdapter`] and [`MavlinkAdapter`].
#[derive(Debug, Clone, Copy)]
pub struct DefaultAdapterFactory {
    pub mavlink_target_system: u8,
    pub mavlink_target_component: u8,
}

impl Default for DefaultAdapterFactory {
    fn default() -> Self {
        Self {
            mavlink_target_system: 1,
            mavlink_target_component: 1,
        }
    }
}

impl AdapterFactory for DefaultAdapterFactory {
    fn create(&self, protocol: ProtocolType) -> Arc<dyn ProtocolAdapter> {
        match protocol {
            ProtocolType::WebSocket => Arc::new(WebSocketAdapter::new()),
            ProtocolType::Mavlink => Arc::new(MavlinkAdapter::new(
                self.mavlink_target_system,
                self.mavlink_target_component,
            )),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status surface
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one managed protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolState {
    Unconnected,
    Connecting,
    Connected,
    Degraded,
    Disconnected,
}

/// Inspection snapshot.  Not meant for control decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub link_status: ConnectionStatus,
    pub primary: Option<ProtocolType>,
    pub active_protocols: Vec<ProtocolType>,
    pub protocol_states: BTreeMap<ProtocolType, ProtocolState>,
    pub distribution: DistributionMode,
    pub diagnostics: BTreeMap<ProtocolType, BTreeMap<String, String>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

enum AggregatorControl {
    Attach(ProtocolType, BoxStream<'static, Telemetry>),
    Detach(ProtocolType),
}

type AdapterMap = BTreeMap<ProtocolType, Arc<dyn ProtocolAdapter>>;

/// Lock order where two are needed: `active` before `primary`.
struct Shared {
    config: ManagerConfig,
    factory: Arc<dyn AdapterFactory>,
    spec: RwLock<Option<ConnectionSpec>>,
    adapters: RwLock<AdapterMap>,
    active: RwLock<AdapterMap>,
    states: RwLock<BTreeMap<ProtocolType, ProtocolState>>,
    primary: RwLock<Option<ProtocolType>>,
    health: HealthTracker,
    telemetry: Broadcaster<Telemetry>,
    latest: RwLock<Option<Telemetry>>,
    queue: CommandQueue,
    aggregator: Mutex<Option<mpsc::UnboundedSender<AggregatorControl>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn distribution(&self) -> DistributionMode {
        read(&self.spec)
            .as_ref()
            .map(|spec| spec.distribution)
            .unwrap_or_default()
    }

    fn primary(&self) -> Option<ProtocolType> {
        *read(&self.primary)
    }

    fn active_snapshot(&self) -> Vec<(ProtocolType, Arc<dyn ProtocolAdapter>)> {
        read(&self.active)
            .iter()
            .map(|(p, a)| (*p, Arc::clone(a)))
            .collect()
    }

    fn set_state(&self, protocol: ProtocolType, state: ProtocolState) {
        write(&self.states).insert(protocol, state);
    }

    fn send_aggregator(&self, control: AggregatorControl) {
        if let Some(tx) = self
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = tx.send(control);
        }
    }

    async fn connect_protocol(&self, protocol: ProtocolType) -> bool {
        let adapter = read(&self.adapters).get(&protocol).cloned();
        let endpoint = read(&self.spec)
            .as_ref()
            .and_then(|spec| spec.endpoint(protocol).map(str::to_string));
        let (Some(adapter), Some(endpoint)) = (adapter, endpoint) else {
            return false;
        };

        self.set_state(protocol, ProtocolState::Connecting);
        match adapter.connect(&endpoint).await {
            Ok(()) => {
                self.activate(protocol, adapter);
                true
            }
            Err(e) => {
                warn!(protocol = %protocol, error = %e, "protocol connect failed");
                self.set_state(protocol, ProtocolState::Disconnected);
                self.health.record_error(e.to_string());
                false
            }
        }
    }

    fn activate(&self, protocol: ProtocolType, adapter: Arc<dyn ProtocolAdapter>) {
        let telemetry = adapter.telemetry_stream();
        write(&self.active).insert(protocol, adapter);
        self.set_state(protocol, ProtocolState::Connected);
        self.send_aggregator(AggregatorControl::Attach(protocol, telemetry));
        self.elect_primary(protocol);
        info!(protocol = %protocol, "protocol connected");
    }

    fn deactivate(&self, protocol: ProtocolType) {
        write(&self.active).remove(&protocol);
        self.set_state(protocol, ProtocolState::Disconnected);
        self.send_aggregator(AggregatorControl::Detach(protocol));
    }

    /// A preferred protocol always takes over; anything else only fills an
    /// empty slot.
    fn elect_primary(&self, protocol: ProtocolType) {
        let preferred = read(&self.spec)
            .as_ref()
            .and_then(|spec| spec.preferred_primary);
        let mut primary = write(&self.primary);
        if preferred == Some(protocol) || primary.is_none() {
            if *primary != Some(protocol) {
                info!(protocol = %protocol, previous = ?*primary, "primary protocol elected");
            }
            *primary = Some(protocol);
        }
    }

    fn publish_aggregate(&self) {
        let expected = read(&self.adapters).len();
        let active = self.active_snapshot();
        let status = if active.is_empty() {
            ConnectionStatus::Disconnected
        } else if active.len() < expected
            || active
                .iter()
                .any(|(_, a)| a.health_snapshot().status == ConnectionStatus::Degraded)
        {
            ConnectionStatus::Degraded
        } else {
            ConnectionStatus::Connected
        };
        self.health.publish_status(status);
    }

    async fn deliver_to_primary(&self, command: &Command) -> bool {
        let Some(protocol) = self.primary() else {
            warn!(command_id = %command.id(), "no primary protocol, command dropped");
            return false;
        };
        let Some(adapter) = read(&self.active).get(&protocol).cloned() else {
            warn!(command_id = %command.id(), protocol = %protocol, "primary not active, command dropped");
            return false;
        };
        let delivered = adapter.send_command(command).await;
        if !delivered {
            warn!(command_id = %command.id(), protocol = %protocol, "primary delivery failed");
        }
        delivered
    }

    async fn route(&self, command: &Command) -> bool {
        match self.distribution() {
            DistributionMode::PrimaryOnly => self.deliver_to_primary(command).await,
            DistributionMode::AllProtocols => {
                let targets: Vec<_> = self
                    .active_snapshot()
                    .into_iter()
                    .filter(|(_, a)| a.is_connected())
                    .collect();
                if targets.is_empty() {
                    warn!(command_id = %command.id(), "no connected protocol, command dropped");
                    return false;
                }
                let results = join_all(targets.iter().map(|(protocol, adapter)| async move {
                    let delivered = adapter.send_command(command).await;
                    if !delivered {
                        warn!(command_id = %command.id(), protocol = %protocol, "delivery failed");
                    }
                    delivered
                }))
                .await;
                results.into_iter().any(|delivered| delivered)
            }
            DistributionMode::ProtocolSpecific => {
                let prefers_binary = command.is_emergency()
                    || command.command_type() == CommandType::EmergencyLand
                    || command.command_type().is_mode_change();
                if prefers_binary {
                    let binary = self
                        .active_snapshot()
                        .into_iter()
                        .find(|(p, a)| p.is_binary() && a.is_connected());
                    if let Some((protocol, adapter)) = binary {
                        trace!(command_id = %command.id(), protocol = %protocol, "routed to binary protocol");
                        return adapter.send_command(command).await;
                    }
                }
                self.deliver_to_primary(command).await
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background tasks
// ────────────────────────────────────────────────────────────────────────────

async fn run_connector(shared: Arc<Shared>, ready: oneshot::Sender<usize>) {
    let protocols: Vec<ProtocolType> = read(&shared.adapters).keys().copied().collect();
    let results = join_all(protocols.iter().map(|p| shared.connect_protocol(*p))).await;
    let connected = results.into_iter().filter(|ok| *ok).count();
    shared.publish_aggregate();
    let _ = ready.send(connected);

    let period = shared.config.reconnect_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let missing: Vec<ProtocolType> = {
            let active = read(&shared.active);
            protocols
                .iter()
                .copied()
                .filter(|p| !active.contains_key(p))
                .collect()
        };
        if missing.is_empty() {
            continue;
        }
        if shared.health.snapshot().reconnect_attempts >= shared.config.max_reconnect_attempts {
            trace!("reconnect attempts exhausted");
            continue;
        }
        let attempt = shared.health.reconnect_attempted();
        debug!(attempt, missing = ?missing, "reconnecting protocols");

        let mut recovered = false;
        for protocol in missing {
            recovered |= shared.connect_protocol(protocol).await;
        }
        if recovered {
            shared.health.reset_reconnect_attempts();
            shared.publish_aggregate();
        }
    }
}

async fn run_distributor(shared: Arc<Shared>) {
    while let Some(queued) = shared.queue.pop().await {
        let delivered = shared.route(&queued.command).await;
        trace!(command_id = %queued.command.id(), delivered, "command dispatched");
        queued.complete(delivered);
    }
}

async fn run_aggregator(shared: Arc<Shared>, mut control: mpsc::UnboundedReceiver<AggregatorControl>) {
    let mut merged: SelectAll<BoxStream<'static, (ProtocolType, Telemetry)>> = SelectAll::new();
    let mut handles: BTreeMap<ProtocolType, AbortHandle> = BTreeMap::new();

    loop {
        tokio::select! {
            message = control.recv() => match message {
                Some(AggregatorControl::Attach(protocol, telemetry)) => {
                    if let Some(previous) = handles.remove(&protocol) {
                        previous.abort();
                    }
                    let (tagged, handle) =
                        stream::abortable(telemetry.map(move |reading| (protocol, reading)));
                    merged.push(tagged.boxed());
                    handles.insert(protocol, handle);
                }
                Some(AggregatorControl::Detach(protocol)) => {
                    if let Some(handle) = handles.remove(&protocol) {
                        handle.abort();
                    }
                }
                None => break,
            },
            Some((protocol, mut reading)) = merged.next(), if !merged.is_empty() => {
                reading.timestamp = Utc::now();
                shared.health.message_received();
                *write(&shared.latest) = Some(reading.clone());
                trace!(protocol = %protocol, "telemetry aggregated");
                shared.telemetry.publish(reading);
            }
        }
    }
}

async fn run_health_monitor(shared: Arc<Shared>) {
    let period = shared.config.health_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        for (protocol, adapter) in shared.active_snapshot() {
            if !adapter.is_connected() {
                warn!(protocol = %protocol, "protocol lost, removing from active set");
                shared.deactivate(protocol);
                shared.health.record_error(format!("{protocol} disconnected"));
                continue;
            }
            let state = match adapter.health_snapshot().status {
                ConnectionStatus::Degraded => ProtocolState::Degraded,
                _ => ProtocolState::Connected,
            };
            shared.set_state(protocol, state);
        }
        shared.publish_aggregate();
    }
}

async fn run_failover(shared: Arc<Shared>) {
    let period = shared.config.failover_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let active = shared.active_snapshot();
        let is_live = |protocol: ProtocolType| {
            active
                .iter()
                .any(|(p, a)| *p == protocol && a.is_connected())
        };

        let mut primary = write(&shared.primary);
        let current = *primary;
        if current.is_some_and(is_live) {
            continue;
        }
        let replacement = active
            .iter()
            .find(|(_, a)| a.is_connected())
            .map(|(p, _)| *p);
        *primary = replacement;
        drop(primary);

        match replacement {
            Some(protocol) => info!(from = ?current, to = %protocol, "primary failover"),
            None if current.is_some() => {
                warn!(from = ?current, "primary lost and no connected protocol remains");
                shared.health.record_error("failover: no connected protocol");
            }
            None => debug!("no connected protocol available for primary"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Manager
// ────────────────────────────────────────────────────────────────────────────

/// Orchestrates every protocol adapter of one drone link.
pub struct UnifiedCommunicationManager {
    shared: Arc<Shared>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl UnifiedCommunicationManager {
    pub fn new(factory: Arc<dyn AdapterFactory>, config: ManagerConfig) -> Self {
        let queue = CommandQueue::new();
        queue.close();
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                spec: RwLock::new(None),
                adapters: RwLock::new(BTreeMap::new()),
                active: RwLock::new(BTreeMap::new()),
                states: RwLock::new(BTreeMap::new()),
                primary: RwLock::new(None),
                health: HealthTracker::new("unified-health"),
                telemetry: Broadcaster::with_default_capacity("unified-telemetry"),
                latest: RwLock::new(None),
                queue,
                aggregator: Mutex::new(None),
            }),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Manager over real WebSocket / MAVLink transports.
    pub fn with_default_adapters(config: ManagerConfig) -> Self {
        Self::new(Arc::new(DefaultAdapterFactory::default()), config)
    }

    /// Parse `spec`, connect every protocol it names, and start the
    /// background tasks.
    ///
    /// # Errors
    ///
    /// * [`LinkError::InvalidSpec`] – malformed specification; nothing changes.
    /// * [`LinkError::AlreadyConnected`] – call [`disconnect`](Self::disconnect)
    ///   first.
    /// * [`LinkError::NoProtocolConnected`] – every protocol failed.
    pub async fn connect(&self, spec: &str) -> Result<(), LinkError> {
        let spec = ConnectionSpec::parse(spec)?;
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(LinkError::AlreadyConnected);
        }

        let shared = &self.shared;
        let adapters: AdapterMap = spec
            .protocols()
            .map(|p| (p, shared.factory.create(p)))
            .collect();
        *write(&shared.states) = adapters
            .keys()
            .map(|p| (*p, ProtocolState::Unconnected))
            .collect();
        *write(&shared.adapters) = adapters;
        write(&shared.active).clear();
        *write(&shared.primary) = None;
        info!(
            protocols = ?spec.endpoints.keys().collect::<Vec<_>>(),
            distribution = %spec.distribution,
            "connecting"
        );
        *write(&shared.spec) = Some(spec);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        *shared
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(control_tx);
        shared.queue.reopen();

        let (ready_tx, ready_rx) = oneshot::channel();
        tasks.push(tokio::spawn(run_aggregator(Arc::clone(shared), control_rx)));
        tasks.push(tokio::spawn(run_connector(Arc::clone(shared), ready_tx)));
        tasks.push(tokio::spawn(run_distributor(Arc::clone(shared))));
        tasks.push(tokio::spawn(run_health_monitor(Arc::clone(shared))));
        tasks.push(tokio::spawn(run_failover(Arc::clone(shared))));

        let connected = ready_rx.await.unwrap_or(0);
        if connected == 0 {
            self.teardown(&mut tasks).await;
            return Err(LinkError::NoProtocolConnected);
        }
        info!(connected, primary = ?shared.primary(), "communication manager connected");
        Ok(())
    }

    /// Stop every background task and disconnect every adapter.  Idempotent.
    pub async fn disconnect(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }
        self.teardown(&mut tasks).await;
        info!("communication manager disconnected");
    }

    async fn teardown(&self, tasks: &mut Vec<JoinHandle<()>>) {
        for task in tasks.iter() {
            task.abort();
        }
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        let shared = &self.shared;
        shared.queue.close();
        shared
            .aggregator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let adapters: Vec<_> = read(&shared.adapters).values().cloned().collect();
        join_all(adapters.iter().map(|a| a.disconnect())).await;

        write(&shared.active).clear();
        *write(&shared.primary) = None;
        for state in write(&shared.states).values_mut() {
            *state = ProtocolState::Disconnected;
        }
        shared.health.publish_status(ConnectionStatus::Disconnected);
    }

    /// Enqueue `command`.  Never blocks; the receipt resolves once the
    /// distributor has routed it.
    pub fn submit_command(&self, command: Command) -> DeliveryReceipt {
        debug!(
            command_id = %command.id(),
            command = %command.command_type(),
            priority = ?command.priority(),
            "command submitted"
        );
        self.shared.queue.push(command)
    }

    /// Submit and wait for the delivery outcome.
    pub async fn send_command(&self, command: Command) -> bool {
        self.submit_command(command).outcome().await
    }

    /// Make `protocol` the primary.
    ///
    /// # Errors
    ///
    /// [`LinkError::ProtocolUnavailable`] if it is not currently connected.
    pub fn switch_primary_protocol(&self, protocol: ProtocolType) -> Result<(), LinkError> {
        let live = read(&self.shared.active)
            .get(&protocol)
            .is_some_and(|a| a.is_connected());
        if !live {
            return Err(LinkError::ProtocolUnavailable(protocol));
        }
        let previous = write(&self.shared.primary).replace(protocol);
        info!(from = ?previous, to = %protocol, "primary switched");
        Ok(())
    }

    pub fn primary_protocol(&self) -> Option<ProtocolType> {
        self.shared.primary()
    }

    pub fn active_protocols(&self) -> Vec<ProtocolType> {
        read(&self.shared.active).keys().copied().collect()
    }

    pub fn is_connected(&self) -> bool {
        read(&self.shared.active).values().any(|a| a.is_connected())
    }

    /// Unified telemetry from every active adapter, restamped on arrival.
    pub fn telemetry_stream(&self) -> BoxStream<'static, Telemetry> {
        self.shared.telemetry.stream()
    }

    /// Aggregate link health readings.
    pub fn health_stream(&self) -> BoxStream<'static, ConnectionHealth> {
        self.shared.health.stream()
    }

    pub fn latest_telemetry(&self) -> Option<Telemetry> {
        read(&self.shared.latest).clone()
    }

    pub fn status(&self) -> ManagerStatus {
        let shared = &self.shared;
        let diagnostics = read(&shared.adapters)
            .iter()
            .map(|(p, a)| (*p, a.diagnostics()))
            .collect();
        ManagerStatus {
            link_status: shared.health.status(),
            primary: shared.primary(),
            active_protocols: self.active_protocols(),
            protocol_states: read(&shared.states).clone(),
            distribution: shared.distribution(),
            diagnostics,
        }
    }
}

impl HealthSource for UnifiedCommunicationManager {
    fn health_snapshot(&self) -> ConnectionHealth {
        self.shared.health.snapshot()
    }
}
