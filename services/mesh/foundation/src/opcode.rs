//! Access layer opcodes of the Configuration models.
//!
//! ```text
//! 0xxxxxxx                    1 octet, 0x7F reserved
//! 10xxxxxx xxxxxxxx           2 octets, SIG
//! 11xxxxxx zzzzzzzz zzzzzzzz  3 octets, vendor
//! ```

use crate::error::FoundationError;

/// Config AppKey Add
pub const APP_KEY_ADD: u32 = 0x00;
/// Config AppKey Update
pub const APP_KEY_UPDATE: u32 = 0x01;
/// Config Composition Data Status
pub const COMPOSITION_DATA_STATUS: u32 = 0x02;
/// Config AppKey Delete
pub const APP_KEY_DELETE: u32 = 0x8000;
/// Config AppKey Status
pub const APP_KEY_STATUS: u32 = 0x8003;
/// Config Composition Data Get
pub const COMPOSITION_DATA_GET: u32 = 0x8008;
/// Config GATT Proxy Get
pub const GATT_PROXY_GET: u32 = 0x8012;
/// Config GATT Proxy Set
pub const GATT_PROXY_SET: u32 = 0x8013;
/// Config GATT Proxy Status
pub const GATT_PROXY_STATUS: u32 = 0x8014;
/// Config NetKey Add
pub const NET_KEY_ADD: u32 = 0x8040;
/// Config NetKey Delete
pub const NET_KEY_DELETE: u32 = 0x8041;
/// Config NetKey Status
pub const NET_KEY_STATUS: u32 = 0x8044;
/// Config NetKey Update
pub const NET_KEY_UPDATE: u32 = 0x8045;
/// Config Node Reset
pub const NODE_RESET: u32 = 0x8049;
/// Config Node Reset Status
pub const NODE_RESET_STATUS: u32 = 0x804A;

/// Appends the 1, 2 or 3 octet encoding of `opcode`
pub fn encode_opcode(opcode: u32, out: &mut Vec<u8>) {
    if opcode < 0x7F {
        out.push(opcode as u8);
    } else if opcode <= 0xFFFF {
        out.extend_from_slice(&(opcode as u16).to_be_bytes());
    } else {
        out.push((opcode >> 16) as u8);
        out.extend_from_slice(&(opcode as u16).to_le_bytes());
    }
}

/// Splits an access payload into its opcode and parameters
pub fn decode_opcode(payload: &[u8]) -> Result<(u32, &[u8]), FoundationError> {
    let first = *payload.first().ok_or(FoundationError::Empty)?;
    let size = match first >> 6 {
        0b00 | 0b01 if first == 0x7F => return Err(FoundationError::UnknownOpcode(0x7F)),
        0b00 | 0b01 => 1,
        0b10 => 2,
        _ => 3,
    };
    if payload.len() < size {
        return Err(FoundationError::Malformed {
            opcode: u32::from(first),
            expected: size,
            actual: payload.len(),
        });
    }
    let opcode = match size {
        1 => u32::from(first),
        2 => u32::from(u16::from_be_bytes([first, payload[1]])),
        _ => (u32::from(first) << 16) | u32::from(u16::from_le_bytes([payload[1], payload[2]])),
    };
    Ok((opcode, &payload[size..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_sizes() {
        let mut out = Vec::new();
        encode_opcode(APP_KEY_ADD, &mut out);
        encode_opcode(NET_KEY_ADD, &mut out);
        encode_opcode(0xC0_0059, &mut out);
        assert_eq!(out, vec![0x00, 0x80, 0x40, 0xC0, 0x59, 0x00]);
    }

    #[test]
    fn test_decode_opcode() {
        assert_eq!(decode_opcode(&[0x02, 0xAA]).unwrap(), (COMPOSITION_DATA_STATUS, &[0xAA][..]));
        assert_eq!(decode_opcode(&[0x80, 0x44, 0x00]).unwrap(), (NET_KEY_STATUS, &[0x00][..]));
        assert_eq!(decode_opcode(&[0xC0, 0x59, 0x00]).unwrap().0, 0xC0_0059);
        assert!(matches!(decode_opcode(&[]), Err(FoundationError::Empty)));
        assert!(matches!(decode_opcode(&[0x7F]), Err(FoundationError::UnknownOpcode(0x7F))));
        assert!(matches!(decode_opcode(&[0x80]), Err(FoundationError::Malformed { .. })));
    }
}
