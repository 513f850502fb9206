//! Service ids and reserved opcodes.
//!
//! Services are the logical subsystems multiplexed over one session. Opcodes
//! below [`MINIMUM_EVENT`] are commands (and the status reply); opcodes at or
//! above it are events pushed on the notification channel.

/// Core service: module registration.
pub const CORE: u8 = 0;

/// Bluetooth adapter and device management.
pub const BLUETOOTH: u8 = 1;

/// RFCOMM/L2CAP socket service.
pub const SOCKET: u8 = 2;

/// HID host profile.
pub const HIDHOST: u8 = 3;

/// Personal area networking profile.
pub const PAN: u8 = 4;

/// Handsfree profile.
pub const HANDSFREE: u8 = 5;

/// Advanced audio distribution profile.
pub const A2DP: u8 = 6;

/// Health device profile.
pub const HEALTH: u8 = 7;

/// Audio/video remote control profile.
pub const AVRCP: u8 = 8;

/// Generic attribute profile.
pub const GATT: u8 = 9;

/// Highest valid service id.
pub const SERVICE_ID_MAX: u8 = GATT;

/// Number of service slots in a registry.
pub const SERVICE_COUNT: usize = SERVICE_ID_MAX as usize + 1;

/// First event opcode; event handler tables are indexed from here.
pub const MINIMUM_EVENT: u8 = 0x81;

/// Reply opcode carrying a one-byte status code.
pub const OP_STATUS: u8 = 0x00;

/// Core command: enable a service on the daemon.
pub const OP_REGISTER_MODULE: u8 = 0x01;

/// Core command: disable a service on the daemon.
pub const OP_UNREGISTER_MODULE: u8 = 0x02;

/// Returns a human-readable name for a service id.
pub fn service_name(id: u8) -> &'static str {
    match id {
        CORE => "CORE",
        BLUETOOTH => "BLUETOOTH",
        SOCKET => "SOCKET",
        HIDHOST => "HIDHOST",
        PAN => "PAN",
        HANDSFREE => "HANDSFREE",
        A2DP => "A2DP",
        HEALTH => "HEALTH",
        AVRCP => "AVRCP",
        GATT => "GATT",
        _ => "UNKNOWN",
    }
}

/// Returns true if the service id is within the known range.
pub fn is_valid_service(id: u8) -> bool {
    id <= SERVICE_ID_MAX
}

/// Returns true if the opcode denotes an event.
pub fn is_event(opcode: u8) -> bool {
    opcode >= MINIMUM_EVENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_every_valid_service() {
        for id in 0..=SERVICE_ID_MAX {
            assert_ne!(service_name(id), "UNKNOWN");
        }
        assert_eq!(service_name(SERVICE_ID_MAX + 1), "UNKNOWN");
    }

    #[test]
    fn event_threshold() {
        assert!(!is_event(OP_STATUS));
        assert!(!is_event(MINIMUM_EVENT - 1));
        assert!(is_event(MINIMUM_EVENT));
        assert!(is_event(0xff));
    }
}
