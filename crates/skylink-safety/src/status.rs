//! Safety status escalation.
//!
//! Status only ever climbs on alerts.  A critical alert sets the critical
//! status of its event's category unless a more severe critical is already
//! standing; a warning lifts `NORMAL` to `WARNING` and leaves anything higher
//! alone.  The only way down is [`recover`], which the supervisor applies when
//! a lost link comes back.
//!
//! Severity, lowest first: `NORMAL`, `WARNING`, `CRITICAL_COMMUNICATION`,
//! `CRITICAL_OTHER`, then `CRITICAL_BATTERY` and `CRITICAL_FLIGHT` on equal
//! footing.  A communication critical therefore never masks a battery or
//! flight critical, and restoring the link cannot clear one.

use skylink_types::{AlertLevel, SafetyAlert, SafetyStatus};

fn severity(status: SafetyStatus) -> u8 {
    match status {
        SafetyStatus::Normal => 0,
        SafetyStatus::Warning => 1,
        SafetyStatus::CriticalCommunication => 2,
        SafetyStatus::CriticalOther => 3,
        SafetyStatus::CriticalBattery | SafetyStatus::CriticalFlight => 4,
    }
}

pub fn escalate(current: SafetyStatus, alert: &SafetyAlert) -> SafetyStatus {
    match alert.level {
        AlertLevel::Critical => {
            let raised = SafetyStatus::critical_for(alert.event.category());
            if severity(raised) >= severity(current) {
                raised
            } else {
                current
            }
        }
        AlertLevel::Warning if current == SafetyStatus::Normal => SafetyStatus::Warning,
        AlertLevel::Warning | AlertLevel::Info => current,
    }
}

/// Status after the link recovered.  `None` means nothing to recover from.
pub fn recover(current: SafetyStatus) -> Option<SafetyStatus> {
    (current == SafetyStatus::CriticalCommunication).then_some(SafetyStatus::Normal)
}

#[cfg(test)]
mod tests {
    use skylink_types::SafetyEvent;

    use super::*;

    fn alert(event: SafetyEvent, level: AlertLevel) -> SafetyAlert {
        SafetyAlert::new(event, level, "test")
    }

    #[test]
    fn critical_maps_by_category() {
        let cases = [
            (SafetyEvent::CommunicationLost, SafetyStatus::CriticalCommunication),
            (SafetyEvent::TelemetryTimeout, SafetyStatus::CriticalCommunication),
            (SafetyEvent::CriticalBattery, SafetyStatus::CriticalBattery),
            (SafetyEvent::AltitudeLimit, SafetyStatus::CriticalFlight),
            (SafetyEvent::ExcessiveSpeed, SafetyStatus::CriticalFlight),
            (SafetyEvent::GpsPoor, SafetyStatus::CriticalOther),
        ];
        for (event, expected) in cases {
            assert_eq!(
                escalate(SafetyStatus::Normal, &alert(event, AlertLevel::Critical)),
                expected,
                "{event}"
            );
        }
    }

    #[test]
    fn warning_never_downgrades_critical() {
        let warning = alert(SafetyEvent::LowBattery, AlertLevel::Warning);
        assert_eq!(escalate(SafetyStatus::Normal, &warning), SafetyStatus::Warning);
        assert_eq!(
            escalate(SafetyStatus::CriticalBattery, &warning),
            SafetyStatus::CriticalBattery
        );
        let info = alert(SafetyEvent::CommunicationRestored, AlertLevel::Info);
        assert_eq!(escalate(SafetyStatus::Warning, &info), SafetyStatus::Warning);
    }

    #[test]
    fn link_criticals_do_not_mask_battery_or_flight() {
        let timeout = alert(SafetyEvent::TelemetryTimeout, AlertLevel::Critical);
        assert_eq!(
            escalate(SafetyStatus::CriticalBattery, &timeout),
            SafetyStatus::CriticalBattery
        );
        assert_eq!(
            escalate(SafetyStatus::CriticalFlight, &timeout),
            SafetyStatus::CriticalFlight
        );
        assert_eq!(
            escalate(SafetyStatus::CriticalOther, &timeout),
            SafetyStatus::CriticalOther
        );

        // equal severity: the latest wins
        let altitude = alert(SafetyEvent::AltitudeLimit, AlertLevel::Critical);
        assert_eq!(
            escalate(SafetyStatus::CriticalBattery, &altitude),
            SafetyStatus::CriticalFlight
        );
        let battery = alert(SafetyEvent::CriticalBattery, AlertLevel::Critical);
        assert_eq!(
            escalate(SafetyStatus::CriticalCommunication, &battery),
            SafetyStatus::CriticalBattery
        );
    }

    #[test]
    fn only_communication_critical_recovers() {
        assert_eq!(
            recover(SafetyStatus::CriticalCommunication),
            Some(SafetyStatus::Normal)
        );
        assert_eq!(recover(SafetyStatus::CriticalBattery), None);
        assert_eq!(recover(SafetyStatus::Warning), None);
    }
}
