//! Packet framing and the additive checksum.

use crate::error::{Error, Result};

/// Acknowledge token.
pub const ACK: [u8; 2] = [0x00, 0xCC];

/// Not-acknowledge token.
pub const NAK: [u8; 2] = [0x00, 0x33];

/// Autobaud sync pattern.
pub const AUTOBAUD: [u8; 2] = [0x55, 0x55];

/// Bytes preceding the payload in a command packet (length, checksum, id).
pub const COMMAND_OVERHEAD: usize = 3;

/// Bytes preceding the payload in a data packet (length, checksum).
pub const RESPONSE_OVERHEAD: usize = 2;

/// Largest payload a single length byte can describe in a command packet.
pub const MAX_COMMAND_PAYLOAD: usize = u8::MAX as usize - COMMAND_OVERHEAD;

/// 8-bit additive sum.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a command packet: `[len][checksum][id][payload]`.
pub fn encode(command_id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_COMMAND_PAYLOAD {
        return Err(Error::Argument(format!(
            "command payload of {} bytes exceeds {MAX_COMMAND_PAYLOAD}",
            payload.len()
        )));
    }

    let sum = checksum(payload).wrapping_add(command_id);
    let mut packet = Vec::with_capacity(payload.len() + COMMAND_OVERHEAD);
    packet.push((payload.len() + COMMAND_OVERHEAD) as u8);
    packet.push(sum);
    packet.push(command_id);
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Decoded data packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Number of payload bytes that follow the header.
    pub payload_len: usize,
    /// Additive checksum of the payload.
    pub checksum: u8,
}

/// Decode the 2-byte header of a data packet.
pub fn decode_response_header(header: [u8; 2]) -> Result<ResponseHeader> {
    let declared = usize::from(header[0]);
    if declared < RESPONSE_OVERHEAD {
        return Err(Error::Protocol(format!(
            "data packet length byte {declared:#04x} is shorter than its header"
        )));
    }
    Ok(ResponseHeader {
        payload_len: declared - RESPONSE_OVERHEAD,
        checksum: header[1],
    })
}

/// Check a received payload against the checksum from its header.
pub fn verify_checksum(payload: &[u8], expected: u8) -> Result<()> {
    let actual = checksum(payload);
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Checksum { expected, actual })
    }
}

/// Interpret a 2-byte response token.
///
/// Returns `true` for ACK and `false` for NAK.
pub fn parse_ack(token: [u8; 2]) -> Result<bool> {
    match token {
        ACK => Ok(true),
        NAK => Ok(false),
        other => Err(Error::Protocol(format!(
            "expected ACK/NAK, got {:02X} {:02X}",
            other[0], other[1]
        ))),
    }
}

/// Token for a host-side acknowledgement.
pub fn ack_token(ack: bool) -> [u8; 2] {
    if ack { ACK } else { NAK }
}
