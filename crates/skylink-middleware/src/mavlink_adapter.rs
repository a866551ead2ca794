//! MAVLink transport.
//!
//! [`MavlinkAdapter`] opens a `mavlink` crate connection (serial, UDP or TCP)
//! and bridges it into the adapter contract:
//!
//! * **Outbound** – every [`Command`] is translated into a `COMMAND_LONG`
//!   (see [`translate_command`]).
//! * **Inbound** – a blocking reader on the blocking thread pool folds
//!   `HEARTBEAT`, `SYS_STATUS`, `GLOBAL_POSITION_INT`, `GPS_RAW_INT` and
//!   `VFR_HUD` into a running [`Telemetry`] snapshot
//!   ([`TelemetryAccumulator`]) and publishes it on every heartbeat and
//!   position message.
//!
//! The blocking reader only notices a disconnect after its current `recv`
//! returns, so on a quiet link it lingers until the next message arrives.
//! Each reader owns its own stop token; `connect` is refused while the
//! previous reader is still running so two readers never feed the same
//! telemetry broadcaster.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use mavlink::common::{
    COMMAND_LONG_DATA, GLOBAL_POSITION_INT_DATA, GPS_RAW_INT_DATA, HEARTBEAT_DATA, MavCmd,
    MavMessage, MavModeFlag, SYS_STATUS_DATA, VFR_HUD_DATA,
};
use mavlink::{MavConnection, MavHeader};
use skylink_types::{
    Command, CommandType, ConnectionHealth, ConnectionStatus, LinkError, ProtocolType, Telemetry,
};
use tracing::{debug, info, warn};

use crate::adapter::{HealthSource, ProtocolAdapter};
use crate::bus::Broadcaster;
use crate::health::HealthTracker;

type MavConn = Box<dyn MavConnection<MavMessage> + Send + Sync>;

/// Baud rate used when an endpoint is a bare serial device path.
pub const DEFAULT_SERIAL_BAUD: u32 = 57_600;

/// Ground-station identity in outgoing headers.
const GCS_SYSTEM_ID: u8 = 255;
const GCS_COMPONENT_ID: u8 = 190;

/// Consecutive receive errors after which the reader gives the link up.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

const DEFAULT_TAKEOFF_ALTITUDE_M: f32 = 10.0;

const URL_SCHEMES: [&str; 7] = [
    "serial:", "udpin:", "udpout:", "udpbcast:", "tcpin:", "tcpout:", "file:",
];

/// Turn a user-supplied endpoint into a `mavlink::connect` address.
///
/// | Input | Result |
/// |---|---|
/// | `/dev/ttyACM0` | `serial:/dev/ttyACM0:57600` |
/// | `/dev/ttyACM0:115200` | `serial:/dev/ttyACM0:115200` |
/// | `udpin:0.0.0.0:14550` | unchanged |
pub fn normalize_endpoint(endpoint: &str) -> Result<String, LinkError> {
    let endpoint = endpoint.trim();
    if URL_SCHEMES.iter().any(|scheme| endpoint.starts_with(scheme)) {
        return Ok(endpoint.to_string());
    }
    if endpoint.starts_with("/dev/") || endpoint.to_ascii_uppercase().starts_with("COM") {
        if let Some((device, baud)) = endpoint.rsplit_once(':') {
            if let Ok(baud) = baud.parse::<u32>() {
                return Ok(format!("serial:{device}:{baud}"));
            }
        }
        return Ok(format!("serial:{endpoint}:{DEFAULT_SERIAL_BAUD}"));
    }
    Err(LinkError::InvalidSpec(format!(
        "unrecognised MAVLink endpoint '{endpoint}'"
    )))
}

/// ArduCopter custom-mode numbers for the mode names the control plane uses.
fn custom_mode_number(mode: &str) -> Option<u32> {
    match mode.trim().to_ascii_uppercase().as_str() {
        "STABILIZE" => Some(0),
        "AUTO" => Some(3),
        "GUIDED" => Some(4),
        "LOITER" | "HOVER" => Some(5),
        "RTL" => Some(6),
        "LAND" => Some(9),
        _ => None,
    }
}

fn custom_mode_name(number: u32) -> String {
    match number {
        0 => "STABILIZE".to_string(),
        3 => "AUTO".to_string(),
        4 => "GUIDED".to_string(),
        5 => "LOITER".to_string(),
        6 => "RTL".to_string(),
        9 => "LAND".to_string(),
        n => format!("MODE_{n}"),
    }
}

fn command_long(
    target_system: u8,
    target_component: u8,
    command: MavCmd,
    params: [f32; 7],
) -> MavMessage {
    MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
        target_system,
        target_component,
        command,
        confirmation: 0,
        param1: params[0],
        param2: params[1],
        param3: params[2],
        param4: params[3],
        param5: params[4],
        param6: params[5],
        param7: params[6],
    })
}

/// Translate a command into the `COMMAND_LONG` the autopilot understands.
/// Returns `None` for commands with no MAVLink equivalent.
pub fn translate_command(
    command: &Command,
    target_system: u8,
    target_component: u8,
) -> Option<MavMessage> {
    let param = |key: &str| command.param_f64(key).map(|v| v as f32);
    let (cmd, params) = match command.command_type() {
        CommandType::Arm => (MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
        CommandType::Disarm => (MavCmd::MAV_CMD_COMPONENT_ARM_DISARM, [0.0; 7]),
        CommandType::Takeoff => {
            let altitude = param("altitude").unwrap_or(DEFAULT_TAKEOFF_ALTITUDE_M);
            (MavCmd::MAV_CMD_NAV_TAKEOFF, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, altitude])
        }
        CommandType::Land | CommandType::EmergencyLand => (MavCmd::MAV_CMD_NAV_LAND, [0.0; 7]),
        CommandType::Hover | CommandType::AbortMission => {
            (MavCmd::MAV_CMD_NAV_LOITER_UNLIM, [0.0; 7])
        }
        CommandType::SetMode => {
            let mode = command.param_text("mode")?;
            let number = custom_mode_number(&mode)?;
            let enabled = MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits() as f32;
            (MavCmd::MAV_CMD_DO_SET_MODE, [enabled, number as f32, 0.0, 0.0, 0.0, 0.0, 0.0])
        }
        CommandType::StartMission => (MavCmd::MAV_CMD_MISSION_START, [0.0; 7]),
        CommandType::Goto => {
            let latitude = param("latitude")?;
            let longitude = param("longitude")?;
            let altitude = param("altitude").unwrap_or(0.0);
            (MavCmd::MAV_CMD_NAV_WAYPOINT, [0.0, 0.0, 0.0, 0.0, latitude, longitude, altitude])
        }
        CommandType::Unknown => return None,
    };
    Some(command_long(target_system, target_component, cmd, params))
}

/// Running telemetry snapshot folded from individual MAVLink messages.
#[derive(Debug, Clone, Default)]
pub struct TelemetryAccumulator {
    snapshot: Telemetry,
}

impl TelemetryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &Telemetry {
        &self.snapshot
    }

    /// Fold `message` in.  Returns a fresh snapshot when the message is one
    /// that marks a complete reading (heartbeat or global position).
    pub fn apply(&mut self, message: &MavMessage) -> Option<Telemetry> {
        let emit = match message {
            MavMessage::HEARTBEAT(hb) => {
                self.apply_heartbeat(hb);
                true
            }
            MavMessage::SYS_STATUS(status) => {
                self.apply_sys_status(status);
                false
            }
            MavMessage::GLOBAL_POSITION_INT(pos) => {
                self.apply_position(pos);
                true
            }
            MavMessage::GPS_RAW_INT(gps) => {
                self.apply_gps(gps);
                false
            }
            MavMessage::VFR_HUD(hud) => {
                self.apply_hud(hud);
                false
            }
            _ => false,
        };
        if !emit {
            return None;
        }
        self.snapshot.timestamp = Utc::now();
        Some(self.snapshot.clone())
    }

    fn apply_heartbeat(&mut self, hb: &HEARTBEAT_DATA) {
        self.snapshot.armed = hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED);
        self.snapshot.flight_mode = if self.snapshot.armed {
            custom_mode_name(hb.custom_mode)
        } else {
            "DISARMED".to_string()
        };
    }

    fn apply_sys_status(&mut self, status: &SYS_STATUS_DATA) {
        let battery = &mut self.snapshot.battery;
        // millivolts, u16::MAX = unknown
        if status.voltage_battery != u16::MAX {
            battery.voltage_v = f64::from(status.voltage_battery) / 1000.0;
        }
        // centiamps, -1 = unknown
        if status.current_battery != -1 {
            battery.current_a = f64::from(status.current_battery) / 100.0;
        }
        if (0..=100).contains(&status.battery_remaining) {
            battery.percentage = f64::from(status.battery_remaining);
        }
    }

    fn apply_position(&mut self, pos: &GLOBAL_POSITION_INT_DATA) {
        let altitude = f64::from(pos.relative_alt) / 1000.0;
        let (vx, vy) = (f64::from(pos.vx) / 100.0, f64::from(pos.vy) / 100.0);
        let t = &mut self.snapshot;
        t.position.latitude = f64::from(pos.lat) / 1e7;
        t.position.longitude = f64::from(pos.lon) / 1e7;
        t.position.altitude = altitude;
        t.altitude = altitude;
        t.velocity.vx = vx;
        t.velocity.vy = vy;
        // NED: positive vz is down
        t.velocity.vz = -f64::from(pos.vz) / 100.0;
        t.velocity.speed = vx.hypot(vy);
        if pos.hdg != u16::MAX {
            t.heading = f64::from(pos.hdg) / 100.0;
        }
    }

    fn apply_gps(&mut self, gps: &GPS_RAW_INT_DATA) {
        let state = &mut self.snapshot.gps;
        state.fix_type = gps.fix_type as u8;
        state.satellite_count = gps.satellites_visible;
        if gps.eph != u16::MAX {
            state.horizontal_dilution = f64::from(gps.eph) / 100.0;
        }
    }

    fn apply_hud(&mut self, hud: &VFR_HUD_DATA) {
        let t = &mut self.snapshot;
        t.velocity.speed = f64::from(hud.groundspeed);
        t.velocity.vz = f64::from(hud.climb);
        t.heading = f64::from(hud.heading).rem_euclid(360.0);
    }
}

/// Lifecycle flags of one reader thread.  A token is created per `connect`
/// and never reused.
#[derive(Debug, Default)]
struct ReaderToken {
    stop: AtomicBool,
    finished: AtomicBool,
}

impl ReaderToken {
    fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }
}

struct Shared {
    connected: AtomicBool,
    telemetry: Broadcaster<Telemetry>,
    health: HealthTracker,
    accumulator: Mutex<TelemetryAccumulator>,
    messages_in: AtomicU64,
    commands_out: AtomicU64,
}

pub struct MavlinkAdapter {
    shared: Arc<Shared>,
    connection: Mutex<Option<Arc<MavConn>>>,
    reader: Mutex<Option<Arc<ReaderToken>>>,
    endpoint: Mutex<Option<String>>,
    sequence: AtomicU8,
    target_system: u8,
    target_component: u8,
}

impl Default for MavlinkAdapter {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl MavlinkAdapter {
    pub fn new(target_system: u8, target_component: u8) -> Self {
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                telemetry: Broadcaster::with_default_capacity("mavlink-telemetry"),
                health: HealthTracker::new("mavlink-health"),
                accumulator: Mutex::new(TelemetryAccumulator::new()),
                messages_in: AtomicU64::new(0),
                commands_out: AtomicU64::new(0),
            }),
            connection: Mutex::new(None),
            reader: Mutex::new(None),
            endpoint: Mutex::new(None),
            sequence: AtomicU8::new(0),
            target_system,
            target_component,
        }
    }

    /// Latest folded telemetry, whether or not it has been published yet.
    pub fn latest_telemetry(&self) -> Telemetry {
        self.shared
            .accumulator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
            .clone()
    }

    fn connection(&self) -> Option<Arc<MavConn>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fails while a reader from an earlier connection is still blocked in
    /// `recv`.
    fn ensure_reader_idle(&self) -> Result<(), LinkError> {
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        match reader.as_ref() {
            Some(token) if token.is_running() => Err(LinkError::Connection {
                protocol: ProtocolType::Mavlink,
                details: if token.is_stopped() {
                    "previous reader has not exited yet".to_string()
                } else {
                    "already connected".to_string()
                },
            }),
            _ => Ok(()),
        }
    }

    fn next_header(&self) -> MavHeader {
        MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }
}

fn read_loop(shared: Arc<Shared>, connection: Arc<MavConn>, token: Arc<ReaderToken>) {
    let mut consecutive_errors = 0u32;
    while !token.is_stopped() {
        match connection.recv() {
            Ok((_header, message)) => {
                consecutive_errors = 0;
                shared.messages_in.fetch_add(1, Ordering::Relaxed);
                shared.health.message_received();
                let reading = shared
                    .accumulator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(&message);
                if let Some(reading) = reading {
                    shared.telemetry.publish(reading);
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                shared.health.record_error(format!("mavlink recv: {e}"));
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!(error = %e, "mavlink reader giving up after repeated errors");
                    break;
                }
            }
        }
    }
    if !token.is_stopped() {
        shared.connected.store(false, Ordering::SeqCst);
        shared.health.set_status(ConnectionStatus::Disconnected);
    }
    token.finish();
}

impl HealthSource for MavlinkAdapter {
    fn health_snapshot(&self) -> ConnectionHealth {
        self.shared.health.snapshot()
    }
}

#[async_trait]
impl ProtocolAdapter for MavlinkAdapter {
    async fn connect(&self, target: &str) -> Result<(), LinkError> {
        let address = normalize_endpoint(target)?;
        self.ensure_reader_idle()?;
        let dial = address.clone();
        let opened = tokio::task::spawn_blocking(move || mavlink::connect::<MavMessage>(&dial))
            .await
            .map_err(|e| e.to_string())
            .and_then(|result| result.map_err(|e| e.to_string()));
        let connection: Arc<MavConn> = match opened {
            Ok(connection) => Arc::new(connection),
            Err(details) => {
                let details = format!("{address}: {details}");
                self.shared.health.record_error(details.clone());
                return Err(LinkError::Connection {
                    protocol: ProtocolType::Mavlink,
                    details,
                });
            }
        };

        let token = Arc::new(ReaderToken::default());
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&token));
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&connection));
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = Some(address.clone());
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.health.set_status(ConnectionStatus::Connected);

        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || read_loop(shared, connection, token));
        info!(endpoint = %address, "mavlink connected");
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(token) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            token.stop();
        }
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            self.shared.health.set_status(ConnectionStatus::Disconnected);
        }
    }

    async fn send_command(&self, command: &Command) -> bool {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return false;
        }
        let Some(connection) = self.connection() else {
            return false;
        };
        let Some(message) = translate_command(command, self.target_system, self.target_component)
        else {
            warn!(command = %command.command_type(), "no MAVLink translation for command");
            return false;
        };

        let header = self.next_header();
        let sent = tokio::task::spawn_blocking(move || {
            connection.send(&header, &message).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|result| result);

        match sent {
            Ok(_) => {
                self.shared.commands_out.fetch_add(1, Ordering::Relaxed);
                debug!(command_id = %command.id(), "mavlink command sent");
                true
            }
            Err(e) => {
                self.shared.health.record_error(format!("mavlink send: {e}"));
                false
            }
        }
    }

    fn telemetry_stream(&self) -> BoxStream<'static, Telemetry> {
        self.shared.telemetry.stream()
    }

    fn health_stream(&self) -> BoxStream<'static, ConnectionHealth> {
        self.shared.health.stream()
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Mavlink
    }

    fn diagnostics(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("kind".to_string(), "mavlink".to_string());
        if let Some(endpoint) = self
            .endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            map.insert("endpoint".to_string(), endpoint);
        }
        map.insert(
            "messages_in".to_string(),
            self.shared.messages_in.load(Ordering::Relaxed).to_string(),
        );
        map.insert(
            "commands_out".to_string(),
            self.shared.commands_out.load(Ordering::Relaxed).to_string(),
        );
        map.insert("target_system".to_string(), self.target_system.to_string());
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::GpsFixType;

    fn unwrap_long(message: MavMessage) -> COMMAND_LONG_DATA {
        match message {
            MavMessage::COMMAND_LONG(data) => data,
            other => panic!("expected COMMAND_LONG, got {other:?}"),
        }
    }

    #[test]
    fn bare_device_paths_become_serial_urls() {
        assert_eq!(normalize_endpoint("/dev/ttyACM0").unwrap(), "serial:/dev/ttyACM0:57600");
        assert_eq!(
            normalize_endpoint("/dev/ttyUSB1:115200").unwrap(),
            "serial:/dev/ttyUSB1:115200"
        );
        assert_eq!(normalize_endpoint("udpin:0.0.0.0:14550").unwrap(), "udpin:0.0.0.0:14550");
        assert!(normalize_endpoint("carrier-pigeon").is_err());
    }

    #[test]
    fn arm_and_takeoff_translate_to_command_long() {
        let arm = unwrap_long(translate_command(&Command::new(CommandType::Arm), 1, 1).unwrap());
        assert_eq!(arm.command, MavCmd::MAV_CMD_COMPONENT_ARM_DISARM);
        assert_eq!(arm.param1, 1.0);

        let takeoff = unwrap_long(
            translate_command(
                &Command::new(CommandType::Takeoff).with_param("altitude", 25.0),
                3,
                1,
            )
            .unwrap(),
        );
        assert_eq!(takeoff.command, MavCmd::MAV_CMD_NAV_TAKEOFF);
        assert_eq!(takeoff.param7, 25.0);
        assert_eq!(takeoff.target_system, 3);
    }

    #[test]
    fn goto_requires_coordinates() {
        assert!(translate_command(&Command::new(CommandType::Goto), 1, 1).is_none());
        let goto = unwrap_long(
            translate_command(
                &Command::new(CommandType::Goto)
                    .with_param("latitude", 47.5)
                    .with_param("longitude", 8.5),
                1,
                1,
            )
            .unwrap(),
        );
        assert_eq!(goto.command, MavCmd::MAV_CMD_NAV_WAYPOINT);
        assert_eq!(goto.param5, 47.5);
    }

    #[test]
    fn set_mode_uses_custom_mode_numbers() {
        let rtl = unwrap_long(
            translate_command(&Command::new(CommandType::SetMode).with_param("mode", "RTL"), 1, 1)
                .unwrap(),
        );
        assert_eq!(rtl.command, MavCmd::MAV_CMD_DO_SET_MODE);
        assert_eq!(rtl.param2, 6.0);
        assert!(
            translate_command(&Command::new(CommandType::SetMode).with_param("mode", "?"), 1, 1)
                .is_none()
        );
        assert!(translate_command(&Command::new(CommandType::Unknown), 1, 1).is_none());
    }

    #[test]
    fn accumulator_folds_messages_into_one_snapshot() {
        let mut acc = TelemetryAccumulator::new();

        let status = MavMessage::SYS_STATUS(SYS_STATUS_DATA {
            voltage_battery: 22_200,
            current_battery: 1_250,
            battery_remaining: 64,
            ..Default::default()
        });
        assert!(acc.apply(&status).is_none());

        let gps = MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
            fix_type: GpsFixType::GPS_FIX_TYPE_3D_FIX,
            satellites_visible: 11,
            eph: 90,
            ..Default::default()
        });
        assert!(acc.apply(&gps).is_none());

        let position = MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
            lat: 474_000_000,
            lon: 85_000_000,
            relative_alt: 15_000,
            vx: 300,
            vy: 400,
            vz: -200,
            hdg: 9_000,
            ..Default::default()
        });
        let reading = acc.apply(&position).unwrap();

        assert_eq!(reading.battery.voltage_v, 22.2);
        assert_eq!(reading.battery.current_a, 12.5);
        assert_eq!(reading.battery.percentage, 64.0);
        assert_eq!(reading.gps.fix_type, 3);
        assert_eq!(reading.gps.satellite_count, 11);
        assert_eq!(reading.gps.horizontal_dilution, 0.9);
        assert_eq!(reading.altitude, 15.0);
        assert_eq!(reading.position.latitude, 47.4);
        assert_eq!(reading.velocity.speed, 5.0);
        assert_eq!(reading.velocity.vz, 2.0);
        assert_eq!(reading.heading, 90.0);
    }

    #[test]
    fn heartbeat_sets_armed_and_mode() {
        let mut acc = TelemetryAccumulator::new();
        let hb = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 6,
            base_mode: MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED
                | MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            ..Default::default()
        });
        let reading = acc.apply(&hb).unwrap();
        assert!(reading.armed);
        assert_eq!(reading.flight_mode, "RTL");

        let idle = MavMessage::HEARTBEAT(HEARTBEAT_DATA {
            custom_mode: 0,
            base_mode: MavModeFlag::empty(),
            ..Default::default()
        });
        let reading = acc.apply(&idle).unwrap();
        assert!(!reading.armed);
        assert_eq!(reading.flight_mode, "DISARMED");
    }

    #[tokio::test]
    async fn send_without_connection_is_not_delivered() {
        let adapter = MavlinkAdapter::default();
        assert!(!adapter.is_connected());
        assert!(!adapter.send_command(&Command::new(CommandType::Arm)).await);
        adapter.disconnect().await;
        assert_eq!(adapter.health_snapshot().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn unrecognised_endpoint_is_rejected_before_dialing() {
        let adapter = MavlinkAdapter::default();
        let err = adapter.connect("carrier-pigeon").await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidSpec(_)));
    }

    #[tokio::test]
    async fn reconnect_waits_for_the_previous_reader() {
        let adapter = MavlinkAdapter::default();
        let token = Arc::new(ReaderToken::default());
        *adapter.reader.lock().unwrap() = Some(Arc::clone(&token));

        // a live reader that was never stopped means the link is still up
        let err = adapter.connect("udpin:127.0.0.1:14550").await.unwrap_err();
        assert!(
            matches!(err, LinkError::Connection { ref details, .. } if details == "already connected")
        );

        // disconnect stops that reader only; it is still blocked in recv
        adapter.disconnect().await;
        assert!(token.is_stopped());
        let err = adapter.connect("udpin:127.0.0.1:14550").await.unwrap_err();
        assert!(
            matches!(err, LinkError::Connection { ref details, .. } if details.contains("not exited"))
        );

        token.finish();
        assert!(adapter.ensure_reader_idle().is_ok());
    }

    #[test]
    fn fresh_token_is_not_stopped_by_an_old_one() {
        let old = ReaderToken::default();
        old.stop();
        let fresh = ReaderToken::default();
        assert!(old.is_stopped());
        assert!(!fresh.is_stopped());
        assert!(fresh.is_running());
    }
}
