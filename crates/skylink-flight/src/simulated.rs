//! Simulated flight controller.
//!
//! Altitude changes are *ramps*: a linear interpolation over a fixed number
//! of steps with a fixed delay per step.  Every ramp carries the generation
//! number it was started under; bumping the generation makes the running
//! ramp stop at its next step.  That is how an emergency landing, a disarm,
//! or a mission abort preempts whatever the drone was doing.
//!
//! | Ramp | Steps | Step delay |
//! |---|---|---|
//! | takeoff / landing | 20 | 200 ms |
//! | emergency landing | 10 | 100 ms |
//! | GOTO altitude change | 10 | 300 ms |

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use skylink_middleware::{DroneEndpoint, TelemetryUplink};
use skylink_types::{
    BatteryState, Command, CommandType, EmergencyLander, FlightControllerStatus, GpsState,
    MissionStep, Position, Telemetry, Velocity,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::FlightController;

pub const RAMP_STEPS: u32 = 20;
pub const RAMP_STEP_DELAY: Duration = Duration::from_millis(200);
pub const EMERGENCY_RAMP_STEPS: u32 = 10;
pub const EMERGENCY_RAMP_STEP_DELAY: Duration = Duration::from_millis(100);
pub const GOTO_NAVIGATION_DELAY: Duration = Duration::from_secs(2);
pub const GOTO_RAMP_STEPS: u32 = 10;
pub const GOTO_RAMP_STEP_DELAY: Duration = Duration::from_millis(300);
pub const DEFAULT_TAKEOFF_ALTITUDE_M: f64 = 10.0;
/// `START_MISSION` needs the drone strictly above this altitude.
pub const MISSION_MIN_ALTITUDE_M: f64 = 5.0;
pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);
pub const TELEMETRY_BACKOFF: Duration = Duration::from_secs(5);

const GOTO_GROUND_SPEED_MS: f64 = 5.0;
const BATTERY_DRAIN_PER_READING: f64 = 0.02;
const DEDUP_WINDOW: usize = 128;
const HOME_LATITUDE: f64 = 47.397_742;
const HOME_LONGITUDE: f64 = 8.545_594;
const METRES_PER_DEGREE_LAT: f64 = 110_540.0;
const METRES_PER_DEGREE_LON: f64 = 111_320.0;

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub(crate) struct DroneState {
    pub initialized: bool,
    pub armed: bool,
    pub flight_mode: String,
    pub altitude: f64,
    pub target_altitude: f64,
    pub vertical_speed: f64,
    pub ground_speed: f64,
    pub heading: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub battery_percentage: f64,
    pub in_mission: bool,
    pub mission_epoch: u64,
    pub mission_step: Option<usize>,
}

impl Default for DroneState {
    fn default() -> Self {
        Self {
            initialized: false,
            armed: false,
            flight_mode: "DISARMED".to_string(),
            altitude: 0.0,
            target_altitude: 0.0,
            vertical_speed: 0.0,
            ground_speed: 0.0,
            heading: 0.0,
            latitude: HOME_LATITUDE,
            longitude: HOME_LONGITUDE,
            battery_percentage: 100.0,
            in_mission: false,
            mission_epoch: 0,
            mission_step: None,
        }
    }
}

impl DroneState {
    fn telemetry(&self) -> Telemetry {
        let x = (self.longitude - HOME_LONGITUDE)
            * METRES_PER_DEGREE_LON
            * HOME_LATITUDE.to_radians().cos();
        let y = (self.latitude - HOME_LATITUDE) * METRES_PER_DEGREE_LAT;
        let heading = self.heading.to_radians();
        Telemetry {
            position: Position {
                x,
                y,
                latitude: self.latitude,
                longitude: self.longitude,
                altitude: self.altitude,
            },
            velocity: Velocity {
                vx: self.ground_speed * heading.cos(),
                vy: self.ground_speed * heading.sin(),
                vz: self.vertical_speed,
                speed: self.ground_speed,
            },
            battery: BatteryState {
                voltage_v: 21.0 + 4.2 * self.battery_percentage / 100.0,
                current_a: if self.armed { 12.0 } else { 0.5 },
                percentage: self.battery_percentage,
                temperature_c: 25.0,
            },
            gps: GpsState {
                fix_type: 3,
                satellite_count: 12,
                horizontal_dilution: 0.8,
            },
            altitude: self.altitude,
            heading: self.heading,
            flight_mode: self.flight_mode.clone(),
            armed: self.armed,
            timestamp: Utc::now(),
        }
    }

    fn finish_landing(&mut self) {
        self.altitude = 0.0;
        self.vertical_speed = 0.0;
        self.armed = false;
        self.flight_mode = "DISARMED".to_string();
        self.in_mission = false;
        self.mission_step = None;
    }
}

pub(crate) struct Inner {
    state: Mutex<DroneState>,
    generation: AtomicU64,
    emergency_landing: AtomicBool,
    uplinks: Mutex<Vec<TelemetryUplink>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) mission_task: Mutex<Option<JoinHandle<()>>>,
    emergency_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    pub(crate) fn state(&self) -> MutexGuard<'_, DroneState> {
        lock(&self.state)
    }

    pub(crate) fn set_mode(&self, mode: &str) {
        self.state().flight_mode = mode.to_string();
    }

    /// Start a new ramp generation, cancelling whichever ramp is running.
    /// Refused while an emergency landing owns the drone.
    pub(crate) fn claim_ramp(&self) -> Option<u64> {
        if self.emergency_landing.load(Ordering::SeqCst) {
            return None;
        }
        Some(self.preempt())
    }

    /// Cancel any running ramp unconditionally.
    fn preempt(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Ramp altitude to `target`.  Returns `false` if preempted.
    pub(crate) async fn ramp(
        &self,
        target: f64,
        steps: u32,
        step_delay: Duration,
        generation: u64,
    ) -> bool {
        let start = {
            let mut state = self.state();
            state.target_altitude = target;
            state.vertical_speed = (target - state.altitude) / (step_delay * steps).as_secs_f64();
            state.altitude
        };
        for step in 1..=steps {
            tokio::time::sleep(step_delay).await;
            let mut state = self.state();
            if !self.is_current(generation) {
                state.vertical_speed = 0.0;
                return false;
            }
            state.altitude = if step == steps {
                target
            } else {
                start + (target - start) * f64::from(step) / f64::from(steps)
            }
            .max(0.0);
        }
        self.state().vertical_speed = 0.0;
        true
    }

    pub(crate) async fn land(&self) -> bool {
        let Some(generation) = self.claim_ramp() else {
            warn!("LAND ignored: emergency landing in progress");
            return false;
        };
        self.set_mode("LAND");
        let landed = self
            .ramp(0.0, RAMP_STEPS, RAMP_STEP_DELAY, generation)
            .await;
        if landed {
            self.state().finish_landing();
            info!("landed");
        } else {
            info!("landing interrupted");
        }
        landed
    }

    async fn emergency_land(&self, reason: &str) {
        if self.emergency_landing.swap(true, Ordering::SeqCst) {
            debug!(reason, "emergency landing already in progress");
            return;
        }
        warn!(reason, "EMERGENCY LANDING");
        let generation = self.preempt();
        self.cancel_mission_task();
        {
            let mut state = self.state();
            state.in_mission = false;
            state.mission_step = None;
            state.flight_mode = "EMERGENCY_LAND".to_string();
        }
        let landed = self
            .ramp(0.0, EMERGENCY_RAMP_STEPS, EMERGENCY_RAMP_STEP_DELAY, generation)
            .await;
        if landed {
            self.state().finish_landing();
            info!("emergency landing complete");
        }
        self.emergency_landing.store(false, Ordering::SeqCst);
    }

    /// Called by the command pump when an emergency command shows up while
    /// another command is still running.
    fn preempt_for_emergency(&self) {
        if !self.emergency_landing.load(Ordering::SeqCst) {
            self.preempt();
        }
    }

    fn arm(&self) {
        let mut state = self.state();
        state.armed = true;
        state.flight_mode = "ARMED".to_string();
        info!("armed");
    }

    fn disarm(&self) {
        self.preempt();
        self.cancel_mission_task();
        let mut state = self.state();
        state.armed = false;
        state.altitude = 0.0;
        state.vertical_speed = 0.0;
        state.ground_speed = 0.0;
        state.flight_mode = "DISARMED".to_string();
        state.in_mission = false;
        state.mission_step = None;
        info!("disarmed");
    }

    async fn takeoff(&self, command: &Command) {
        let target = command
            .param_f64("altitude")
            .unwrap_or(DEFAULT_TAKEOFF_ALTITUDE_M);
        if !self.state().armed {
            warn!(command_id = %command.id(), "TAKEOFF rejected: not armed");
            return;
        }
        let Some(generation) = self.claim_ramp() else {
            warn!(command_id = %command.id(), "TAKEOFF rejected: emergency landing in progress");
            return;
        };
        self.set_mode("TAKEOFF");
        info!(target_altitude = target, "taking off");
        if self
            .ramp(target, RAMP_STEPS, RAMP_STEP_DELAY, generation)
            .await
        {
            self.set_mode("HOVER");
        } else {
            info!("takeoff interrupted");
        }
    }

    fn hover(&self) {
        let mut state = self.state();
        if state.altitude > 0.0 {
            state.flight_mode = "HOVER".to_string();
        } else {
            warn!("HOVER ignored: on the ground");
        }
    }

    fn set_mode_from(&self, command: &Command) {
        match command.param_text("mode") {
            Some(mode) => {
                info!(mode = %mode, "flight mode set");
                self.state().flight_mode = mode;
            }
            None => warn!(command_id = %command.id(), "SET_MODE without mode parameter"),
        }
    }

    fn abort_mission(&self) {
        let was_active = {
            let mut state = self.state();
            let was_active = state.in_mission;
            state.in_mission = false;
            state.mission_step = None;
            state.flight_mode = "HOVER".to_string();
            was_active
        };
        if was_active {
            self.preempt();
            self.cancel_mission_task();
            info!("mission aborted");
        }
    }

    async fn goto(&self, command: &Command) {
        let (Some(latitude), Some(longitude)) =
            (command.param_f64("latitude"), command.param_f64("longitude"))
        else {
            warn!(command_id = %command.id(), "GOTO rejected: latitude and longitude required");
            return;
        };
        let Some(generation) = self.claim_ramp() else {
            warn!(command_id = %command.id(), "GOTO rejected: emergency landing in progress");
            return;
        };
        {
            let mut state = self.state();
            state.flight_mode = "AUTO".to_string();
            state.ground_speed = GOTO_GROUND_SPEED_MS;
            let bearing = (longitude - state.longitude).atan2(latitude - state.latitude);
            state.heading = bearing.to_degrees().rem_euclid(360.0);
        }
        info!(latitude, longitude, "navigating");
        tokio::time::sleep(GOTO_NAVIGATION_DELAY).await;
        {
            let mut state = self.state();
            state.ground_speed = 0.0;
            if !self.is_current(generation) {
                info!("GOTO interrupted");
                return;
            }
            state.latitude = latitude;
            state.longitude = longitude;
        }
        if let Some(altitude) = command.param_f64("altitude") {
            self.ramp(altitude, GOTO_RAMP_STEPS, GOTO_RAMP_STEP_DELAY, generation)
                .await;
        }
    }

    pub(crate) async fn handle(self: &Arc<Self>, command: &Command) {
        debug!(command_id = %command.id(), command = %command.command_type(), "handling command");
        match command.command_type() {
            CommandType::Arm => self.arm(),
            CommandType::Disarm => self.disarm(),
            CommandType::Takeoff => self.takeoff(command).await,
            CommandType::Land => {
                self.land().await;
            }
            CommandType::EmergencyLand => self.emergency_land("EMERGENCY_LAND command").await,
            CommandType::Hover => self.hover(),
            CommandType::SetMode => self.set_mode_from(command),
            CommandType::StartMission => self.start_mission(),
            CommandType::AbortMission => self.abort_mission(),
            CommandType::Goto => self.goto(command).await,
            CommandType::Unknown => {
                warn!(command_id = %command.id(), "unknown command ignored");
            }
        }
    }

    fn sample(&self) -> Telemetry {
        let mut state = self.state();
        if state.armed {
            state.battery_percentage = (state.battery_percentage - BATTERY_DRAIN_PER_READING).max(0.0);
        }
        state.telemetry()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Background tasks
// ────────────────────────────────────────────────────────────────────────────

/// Bounded set of recently seen command ids.  The same command arrives once
/// per link when the ground side fans out over every protocol.
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(DEDUP_WINDOW),
            seen: HashSet::with_capacity(DEDUP_WINDOW),
        }
    }

    /// `false` if `id` was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

async fn run_command_pump(inner: Arc<Inner>, mut inbox: mpsc::UnboundedReceiver<Command>) {
    let mut recent = RecentIds::new();
    let mut urgent: VecDeque<Command> = VecDeque::new();
    let mut backlog: VecDeque<Command> = VecDeque::new();

    loop {
        let command = match urgent.pop_front().or_else(|| backlog.pop_front()) {
            Some(command) => command,
            None => match inbox.recv().await {
                Some(command) if recent.insert(command.id()) => command,
                Some(command) => {
                    debug!(command_id = %command.id(), "duplicate command dropped");
                    continue;
                }
                None => break,
            },
        };

        let work = inner.handle(&command);
        tokio::pin!(work);
        loop {
            tokio::select! {
                _ = &mut work => break,
                Some(incoming) = inbox.recv() => {
                    if !recent.insert(incoming.id()) {
                        debug!(command_id = %incoming.id(), "duplicate command dropped");
                    } else if incoming.is_emergency()
                        || incoming.command_type() == CommandType::EmergencyLand
                    {
                        inner.preempt_for_emergency();
                        urgent.push_back(incoming);
                    } else {
                        backlog.push_back(incoming);
                    }
                }
            }
        }
    }
    debug!("command pump stopped");
}

async fn run_telemetry_emitter(inner: Arc<Inner>) {
    loop {
        let delay = if !inner.state().initialized {
            TELEMETRY_INTERVAL
        } else {
            let reading = inner.sample();
            let uplinks = lock(&inner.uplinks).clone();
            let delivered = uplinks
                .iter()
                .filter(|uplink| uplink.send(reading.clone()).is_ok())
                .count();
            if delivered == 0 && !uplinks.is_empty() {
                debug!("telemetry not delivered, backing off");
                TELEMETRY_BACKOFF
            } else {
                TELEMETRY_INTERVAL
            }
        };
        tokio::time::sleep(delay).await;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Public handle
// ────────────────────────────────────────────────────────────────────────────

/// Software drone.  Clones share the same drone.
#[derive(Clone)]
pub struct SimulatedFlightController {
    pub(crate) inner: Arc<Inner>,
}

impl Default for SimulatedFlightController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFlightController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DroneState::default()),
                generation: AtomicU64::new(0),
                emergency_landing: AtomicBool::new(false),
                uplinks: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                mission_task: Mutex::new(None),
                emergency_task: Mutex::new(None),
            }),
        }
    }

    /// Attach to the drone side of each link and start the command pump and
    /// the telemetry emitter.  Commands from every link are merged into one
    /// ordered inbox.
    pub fn start(&self, endpoints: Vec<DroneEndpoint>) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let mut tasks = lock(&self.inner.tasks);
        let mut uplinks = lock(&self.inner.uplinks);

        for endpoint in endpoints {
            let protocol = endpoint.protocol();
            let (mut commands, uplink) = endpoint.into_parts();
            uplinks.push(uplink);
            let inbox = inbox_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(command) = commands.recv().await {
                    if inbox.send(command).is_err() {
                        break;
                    }
                }
                debug!(protocol = %protocol, "command link closed");
            }));
        }
        drop(inbox_tx);

        tasks.push(tokio::spawn(run_command_pump(Arc::clone(&self.inner), inbox_rx)));
        tasks.push(tokio::spawn(run_telemetry_emitter(Arc::clone(&self.inner))));
        self.inner.state().initialized = true;
        info!(links = uplinks.len(), "simulated flight controller started");
    }

    /// Stop every task this controller owns.
    pub fn stop(&self) {
        self.inner.state().initialized = false;
        self.inner.emergency_landing.store(false, Ordering::SeqCst);
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
        for slot in [&self.inner.mission_task, &self.inner.emergency_task] {
            if let Some(task) = lock(slot).take() {
                task.abort();
            }
        }
        lock(&self.inner.uplinks).clear();
        info!("simulated flight controller stopped");
    }

    /// Override the simulated battery level.
    pub fn set_battery_percentage(&self, percentage: f64) {
        self.inner.state().battery_percentage = percentage.clamp(0.0, 100.0);
    }

    pub fn is_emergency_landing(&self) -> bool {
        self.inner.emergency_landing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlightController for SimulatedFlightController {
    async fn handle_command(&self, command: Command) {
        self.inner.handle(&command).await;
    }

    fn telemetry(&self) -> Telemetry {
        self.inner.state().telemetry()
    }

    fn status(&self) -> FlightControllerStatus {
        let connected = lock(&self.inner.uplinks).iter().any(TelemetryUplink::is_live);
        let state = self.inner.state();
        FlightControllerStatus {
            initialized: state.initialized,
            connected,
            armed: state.armed,
            flight_mode: state.flight_mode.clone(),
            altitude: state.altitude,
            in_mission: state.in_mission,
            current_mission_step: state
                .mission_step
                .and_then(|index| MissionStep::SEQUENCE.get(index).copied()),
        }
    }
}

impl EmergencyLander for SimulatedFlightController {
    /// Returns at once; the landing runs on a task owned by this controller.
    fn request_emergency_landing(&self, reason: String) {
        let mut slot = lock(&self.inner.emergency_task);
        let pending = slot.as_ref().is_some_and(|task| !task.is_finished());
        if pending || self.inner.emergency_landing.load(Ordering::SeqCst) {
            debug!(reason = %reason, "emergency landing already in progress");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(async move { inner.emergency_land(&reason).await }));
    }
}
