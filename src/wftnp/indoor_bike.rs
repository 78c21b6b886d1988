//! FTMS Indoor Bike Data (0x2AD2) decoder: a flags-gated, variable-layout
//! little-endian record. Parsing is a pure function of the input bytes —
//! fields are consumed in wire order and decoding stops gracefully the
//! moment either a flag bit is clear or the remaining bytes run out.

use std::collections::HashMap;

const FLAG_AVERAGE_SPEED: u16 = 1 << 1;
const FLAG_INSTANTANEOUS_CADENCE: u16 = 1 << 2;
const FLAG_AVERAGE_CADENCE: u16 = 1 << 3;
const FLAG_TOTAL_DISTANCE: u16 = 1 << 4;
const FLAG_RESISTANCE_LEVEL: u16 = 1 << 5;
const FLAG_INSTANTANEOUS_POWER: u16 = 1 << 6;

/// Decodes an Indoor Bike Data payload into a metric-name → value map.
/// Recognized keys: `speed_kmh`, `avg_speed_kmh`, `cadence_rpm`,
/// `avg_cadence_rpm`, `distance_m`, `resistance_level`, `power_w`.
pub fn decode(data: &[u8]) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    if data.len() < 2 {
        return out;
    }

    let flags = u16::from_le_bytes([data[0], data[1]]);
    let mut cursor = 2usize;

    // Instantaneous speed is unconditional.
    if let Some(v) = take_u16(data, &mut cursor) {
        out.insert("speed_kmh".to_string(), v as f64 * 0.01);
    } else {
        return out;
    }

    if flags & FLAG_AVERAGE_SPEED != 0 {
        match take_u16(data, &mut cursor) {
            Some(v) => {
                out.insert("avg_speed_kmh".to_string(), v as f64 * 0.01);
            }
            None => return out,
        }
    }

    if flags & FLAG_INSTANTANEOUS_CADENCE != 0 {
        match take_u16(data, &mut cursor) {
            Some(v) => {
                out.insert("cadence_rpm".to_string(), v as f64 * 0.5);
            }
            None => return out,
        }
    }

    if flags & FLAG_AVERAGE_CADENCE != 0 {
        match take_u16(data, &mut cursor) {
            Some(v) => {
                out.insert("avg_cadence_rpm".to_string(), v as f64 * 0.5);
            }
            None => return out,
        }
    }

    if flags & FLAG_TOTAL_DISTANCE != 0 {
        match take_u24(data, &mut cursor) {
            Some(v) => {
                out.insert("distance_m".to_string(), v as f64);
            }
            None => return out,
        }
    }

    if flags & FLAG_RESISTANCE_LEVEL != 0 {
        match take_i16(data, &mut cursor) {
            Some(v) => {
                out.insert("resistance_level".to_string(), v as f64);
            }
            None => return out,
        }
    }

    if flags & FLAG_INSTANTANEOUS_POWER != 0 {
        match take_i16(data, &mut cursor) {
            Some(v) => {
                out.insert("power_w".to_string(), v as f64);
            }
            None => return out,
        }
    }

    out
}

fn take_u16(data: &[u8], cursor: &mut usize) -> Option<u16> {
    let end = *cursor + 2;
    let slice = data.get(*cursor..end)?;
    *cursor = end;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

fn take_i16(data: &[u8], cursor: &mut usize) -> Option<i16> {
    let end = *cursor + 2;
    let slice = data.get(*cursor..end)?;
    *cursor = end;
    Some(i16::from_le_bytes([slice[0], slice[1]]))
}

fn take_u24(data: &[u8], cursor: &mut usize) -> Option<u32> {
    let end = *cursor + 3;
    let slice = data.get(*cursor..end)?;
    *cursor = end;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], 0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(map: &HashMap<String, f64>, key: &str, expected: f64) {
        let v = *map.get(key).unwrap_or_else(|| panic!("missing key {key}"));
        assert!((v - expected).abs() < 1e-6, "{key}: {v} != {expected}");
    }

    #[test]
    fn empty_input_yields_empty_map() {
        assert!(decode(&[]).is_empty());
    }

    #[test]
    fn sub_two_byte_input_yields_empty_map() {
        assert!(decode(&[0x01]).is_empty());
    }

    #[test]
    fn s1_cadence_and_power() {
        let bytes = [0x44, 0x00, 0xd2, 0x04, 0xa0, 0x00, 0xfa, 0x00];
        let map = decode(&bytes);
        assert_eq!(map.len(), 3);
        approx(&map, "speed_kmh", 12.34);
        approx(&map, "cadence_rpm", 80.0);
        approx(&map, "power_w", 250.0);
    }

    #[test]
    fn unconditional_speed_only_when_flags_are_zero() {
        let bytes = [0x00, 0x00, 0x64, 0x00];
        let map = decode(&bytes);
        assert_eq!(map.len(), 1);
        approx(&map, "speed_kmh", 1.00);
    }

    #[test]
    fn stops_gracefully_when_flagged_field_is_truncated() {
        // cadence flag set but no bytes follow speed.
        let bytes = [0x04, 0x00, 0x64, 0x00];
        let map = decode(&bytes);
        assert_eq!(map.len(), 1);
        approx(&map, "speed_kmh", 1.00);
    }

    #[test]
    fn all_fields_present() {
        let mut bytes = vec![];
        let flags: u16 = FLAG_AVERAGE_SPEED
            | FLAG_INSTANTANEOUS_CADENCE
            | FLAG_AVERAGE_CADENCE
            | FLAG_TOTAL_DISTANCE
            | FLAG_RESISTANCE_LEVEL
            | FLAG_INSTANTANEOUS_POWER;
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&100u16.to_le_bytes()); // speed
        bytes.extend_from_slice(&90u16.to_le_bytes()); // avg speed
        bytes.extend_from_slice(&180u16.to_le_bytes()); // cadence
        bytes.extend_from_slice(&170u16.to_le_bytes()); // avg cadence
        bytes.extend_from_slice(&[0x10, 0x27, 0x00]); // distance = 10000
        bytes.extend_from_slice(&(-5i16).to_le_bytes()); // resistance
        bytes.extend_from_slice(&200i16.to_le_bytes()); // power

        let map = decode(&bytes);
        assert_eq!(map.len(), 7);
        approx(&map, "speed_kmh", 1.00);
        approx(&map, "avg_speed_kmh", 0.90);
        approx(&map, "cadence_rpm", 90.0);
        approx(&map, "avg_cadence_rpm", 85.0);
        approx(&map, "distance_m", 10000.0);
        approx(&map, "resistance_level", -5.0);
        approx(&map, "power_w", 200.0);
    }
}
