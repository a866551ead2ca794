//! Operator console – line commands typed into `skylinkd`'s stdin.
//!
//! ```text
//!   arm | disarm | land | hover | emergency
//!   takeoff [altitude_m]
//!   goto <lat> <lon> [altitude_m]
//!   mode <FLIGHT_MODE>
//!   mission start | mission abort
//!   switch <websocket|mavlink>
//!   status | help | quit
//! ```

use skylink_types::{Command, CommandType, ProtocolType};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Send(Command),
    Switch(ProtocolType),
    Status,
    Help,
    Quit,
}

/// Parse one console line.  `Ok(None)` for a blank line.
pub fn parse_line(line: &str) -> Result<Option<ConsoleAction>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();
    let rest: Vec<&str> = words.collect();

    let action = match verb.to_ascii_lowercase().as_str() {
        "arm" => ConsoleAction::Send(Command::new(CommandType::Arm)),
        "disarm" => ConsoleAction::Send(Command::new(CommandType::Disarm)),
        "land" => ConsoleAction::Send(Command::new(CommandType::Land)),
        "hover" => ConsoleAction::Send(Command::new(CommandType::Hover)),
        "emergency" => ConsoleAction::Send(Command::emergency(CommandType::EmergencyLand)),
        "takeoff" => {
            let command = Command::new(CommandType::Takeoff);
            match arg {
                Some(raw) => ConsoleAction::Send(command.with_param("altitude", altitude(raw)?)),
                None => ConsoleAction::Send(command),
            }
        }
        "goto" => {
            let (Some(lat), Some(lon)) = (arg, rest.first()) else {
                return Err("usage: goto <lat> <lon> [altitude_m]".to_string());
            };
            let mut command = Command::new(CommandType::Goto)
                .with_param("latitude", coordinate(lat, 90.0)?)
                .with_param("longitude", coordinate(lon, 180.0)?);
            if let Some(raw) = rest.get(1) {
                command = command.with_param("altitude", altitude(raw)?);
            }
            ConsoleAction::Send(command)
        }
        "mode" => {
            let mode = arg.ok_or("mode needs a flight mode")?;
            ConsoleAction::Send(
                Command::new(CommandType::SetMode)
                    .with_param("mode", mode.to_ascii_uppercase().as_str()),
            )
        }
        "mission" => match arg.map(str::to_ascii_lowercase).as_deref() {
            Some("start") => ConsoleAction::Send(Command::new(CommandType::StartMission)),
            Some("abort") => ConsoleAction::Send(Command::new(CommandType::AbortMission)),
            _ => return Err("usage: mission start|abort".to_string()),
        },
        "switch" => {
            let key = arg.ok_or("switch needs a protocol")?;
            let protocol =
                ProtocolType::from_key(key).ok_or_else(|| format!("unknown protocol '{key}'"))?;
            ConsoleAction::Switch(protocol)
        }
        "status" => ConsoleAction::Status,
        "help" | "?" => ConsoleAction::Help,
        "quit" | "exit" => ConsoleAction::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(action))
}

fn altitude(raw: &str) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(format!("'{raw}' is not an altitude")),
    }
}

fn coordinate(raw: &str, limit: f64) -> Result<f64, String> {
    match raw.parse::<f64>() {
        Ok(v) if v.abs() <= limit => Ok(v),
        _ => Err(format!("'{raw}' is not a coordinate")),
    }
}

pub const HELP: &str = "\
  arm | disarm          arm or disarm the motors
  takeoff [altitude_m]  climb (default 10 m)
  goto <lat> <lon> [m]  fly to a position, optionally changing altitude
  hover | land          hold position or land
  emergency             emergency landing
  mode <FLIGHT_MODE>    set the flight mode
  mission start|abort   run or abort the scripted mission
  switch <protocol>     make websocket or mavlink the primary link
  status                print the control plane snapshot
  quit                  shut down";

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(line: &str) -> Command {
        match parse_line(line) {
            Ok(Some(ConsoleAction::Send(command))) => command,
            other => panic!("expected a command for {line:?}, got {other:?}"),
        }
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn takeoff_altitude_is_optional() {
        let command = sent("takeoff");
        assert_eq!(command.command_type(), CommandType::Takeoff);
        assert_eq!(command.param_f64("altitude"), None);

        let command = sent("TAKEOFF 22.5");
        assert_eq!(command.param_f64("altitude"), Some(22.5));
    }

    #[test]
    fn emergency_is_urgent() {
        let command = sent("emergency");
        assert_eq!(command.command_type(), CommandType::EmergencyLand);
        assert!(command.is_emergency());
    }

    #[test]
    fn goto_needs_coordinates() {
        let command = sent("goto 47.4 8.55 30");
        assert_eq!(command.param_f64("latitude"), Some(47.4));
        assert_eq!(command.param_f64("longitude"), Some(8.55));
        assert_eq!(command.param_f64("altitude"), Some(30.0));

        assert_eq!(sent("goto 47.4 8.55").param_f64("altitude"), None);
        assert!(parse_line("goto 47.4").is_err());
        assert!(parse_line("goto 95 8.55").is_err());
    }

    #[test]
    fn mode_is_uppercased() {
        assert_eq!(sent("mode loiter").param_text("mode").as_deref(), Some("LOITER"));
    }

    #[test]
    fn switch_accepts_protocol_aliases() {
        assert_eq!(
            parse_line("switch ws"),
            Ok(Some(ConsoleAction::Switch(ProtocolType::WebSocket)))
        );
        assert!(parse_line("switch carrier-pigeon").is_err());
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(parse_line("takeoff -3").is_err());
        assert!(parse_line("mission later").is_err());
        assert!(parse_line("barrel-roll").is_err());
    }
}
