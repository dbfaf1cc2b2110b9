//! Sensor bridge wire protocol.
//!
//! The counting sensor sits behind an HC-05 style serial bridge that exposes a
//! single GATT characteristic. Every notification carries one short ASCII
//! token: `in` when somebody walks through the doorway inwards, `out` for the
//! other way. Anything else is line noise from the bridge and is ignored.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Primary service advertised by the serial bridge.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_ffe0_0000_1000_8000_0080_5f9b_34fb);

/// Characteristic used both for notifications (sensor → host) and writes.
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000_ffe1_0000_1000_8000_0080_5f9b_34fb);

/// Advertised name prefix used when a bridge does not advertise [`SERVICE_UUID`].
pub const NAME_PREFIX: &str = "HC-05";

/// Direction of a single doorway crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Somebody entered.
    In,
    /// Somebody left.
    Out,
}

impl Direction {
    /// Wire token for this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode one notification payload.
///
/// Returns `None` for anything that is not exactly `in` or `out` after
/// trimming and lowercasing, including invalid UTF-8 and empty buffers.
#[must_use]
pub fn decode_payload(payload: &[u8]) -> Option<Direction> {
    let Ok(text) = std::str::from_utf8(payload) else {
        tracing::warn!(len = payload.len(), "Payload is not valid UTF-8");
        return None;
    };

    match text.trim().to_lowercase().as_str() {
        "in" => Some(Direction::In),
        "out" => Some(Direction::Out),
        _ => {
            tracing::warn!(payload = %text.escape_debug(), "Unknown payload received");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_in_variants() {
        for raw in ["in", "IN", "In", " in ", "in\r\n", "\tIn\n"] {
            assert_eq!(decode_payload(raw.as_bytes()), Some(Direction::In), "{raw:?}");
        }
    }

    #[test]
    fn test_decode_out_variants() {
        for raw in ["out", "OUT", "Out", "  out\n"] {
            assert_eq!(decode_payload(raw.as_bytes()), Some(Direction::Out), "{raw:?}");
        }
    }

    #[test]
    fn test_decode_unrecognized() {
        assert_eq!(decode_payload(b"left"), None);
        assert_eq!(decode_payload(b""), None);
        assert_eq!(decode_payload(b"   "), None);
        assert_eq!(decode_payload(b"xyz"), None);
        assert_eq!(decode_payload(b"inout"), None);
        assert_eq!(decode_payload(b"i n"), None);
    }

    #[test]
    fn test_decode_invalid_utf8() {
        assert_eq!(decode_payload(&[0xff, 0xfe, 0x69, 0x6e]), None);
        assert_eq!(decode_payload(&[0xc3]), None);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let inputs: [&[u8]; 4] = [b"IN", b" out ", b"nope", &[0x80]];
        for input in inputs {
            assert_eq!(decode_payload(input), decode_payload(input));
        }
    }

    #[test]
    fn test_profile_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CHARACTERISTIC_UUID.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::In).unwrap(), "\"in\"");
        assert_eq!(Direction::Out.to_string(), "out");
    }
}
