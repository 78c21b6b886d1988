//! 16-bit Bluetooth short UUID expansion to the full BLE base UUID, and
//! the well-known FTMS UUIDs used throughout the profile layer.

use uuid::Uuid;

/// Expands a 16-bit Bluetooth SIG short UUID to its 128-bit form using the
/// standard base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.
pub const fn expand(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_1000_8000_00805f9b34fb)
}

pub const FTMS_SERVICE: Uuid = expand(0x1826);
pub const FITNESS_MACHINE_CONTROL_POINT: Uuid = expand(0x2AD9);
pub const FITNESS_MACHINE_STATUS: Uuid = expand(0x2ADA);
pub const INDOOR_BIKE_DATA: Uuid = expand(0x2AD2);

/// Parses a 16-byte slice in the wire's canonical RFC 4122 byte order into a [`Uuid`].
/// Returns `None` if the slice isn't exactly 16 bytes.
pub fn from_wire_bytes(bytes: &[u8]) -> Option<Uuid> {
    let arr: [u8; 16] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes(arr))
}

/// Serializes a [`Uuid`] to its 16-byte canonical wire representation.
pub fn to_wire_bytes(uuid: &Uuid) -> [u8; 16] {
    *uuid.as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_ftms_service_uuid() {
        assert_eq!(
            expand(0x1826),
            Uuid::parse_str("00001826-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn expands_control_point_uuid() {
        assert_eq!(
            FITNESS_MACHINE_CONTROL_POINT,
            Uuid::parse_str("00002ad9-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn wire_bytes_round_trip() {
        let uuid = FTMS_SERVICE;
        let bytes = to_wire_bytes(&uuid);
        assert_eq!(from_wire_bytes(&bytes), Some(uuid));
    }

    #[test]
    fn wire_bytes_rejects_wrong_length() {
        assert_eq!(from_wire_bytes(&[0u8; 15]), None);
    }
}
