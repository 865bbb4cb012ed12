//! W3GS packet framing: header byte, opcode, and the 4-byte envelope shared
//! by every packet in the family.

use crate::error::{Error, Result};

/// First byte of every inbound/outbound game packet.
pub const HEADER: u8 = 0xF7;

/// Minimum size of any valid frame: header + opcode + u16 length.
pub const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    RejectJoin = 0x04,
    SlotInfoJoin = 0x05,
    PlayerInfo = 0x06,
    PlayerLeaveOthers = 0x07,
    SlotInfo = 0x08,
    CountDownStart = 0x09,
    CountDownEnd = 0x0A,
    IncomingAction = 0x0B,
    ChatFromHost = 0x0F,
    StartLag = 0x10,
    StopLag = 0x11,
    ReqJoin = 0x14,
    LeaveGame = 0x15,
    GameLoadedSelf = 0x17,
    OutgoingAction = 0x18,
    OutgoingKeepAlive = 0x1B,
    ChatToHost = 0x1C,
    DropReq = 0x21,
    MapSize = 0x2F,
    MapPart = 0x30,
    PongToHost = 0x31,
    IncomingAction2 = 0x3D,
}

impl Opcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x04 => Self::RejectJoin,
            0x05 => Self::SlotInfoJoin,
            0x06 => Self::PlayerInfo,
            0x07 => Self::PlayerLeaveOthers,
            0x08 => Self::SlotInfo,
            0x09 => Self::CountDownStart,
            0x0A => Self::CountDownEnd,
            0x0B => Self::IncomingAction,
            0x0F => Self::ChatFromHost,
            0x10 => Self::StartLag,
            0x11 => Self::StopLag,
            0x14 => Self::ReqJoin,
            0x15 => Self::LeaveGame,
            0x17 => Self::GameLoadedSelf,
            0x18 => Self::OutgoingAction,
            0x1B => Self::OutgoingKeepAlive,
            0x1C => Self::ChatToHost,
            0x21 => Self::DropReq,
            0x2F => Self::MapSize,
            0x30 => Self::MapPart,
            0x31 => Self::PongToHost,
            0x3D => Self::IncomingAction2,
            _ => return None,
        })
    }
}

/// Parsed frame boundary: `(opcode, body, consumed)`, where `body` is the
/// slice after the 4-byte header and `consumed` is the full frame length
/// (header included) so the caller can advance its receive buffer.
pub struct Frame<'a> {
    pub opcode: Opcode,
    pub body: &'a [u8],
    pub consumed: usize,
}

/// Validate and slice one frame off the front of `buf`.
///
/// Checks, in order: (a) `buf.len() >= 4`; (b) `buf[0] == HEADER`; (c)
/// declared length `<= buf.len()`; (d) opcode recognized. On an undersized
/// declared length (more bytes needed than buffered) this returns
/// `Ok(None)` so the caller waits for more bytes; any other validation
/// failure is an `Err`, which callers treat as a protocol violation closing
/// the connection.
pub fn parse_frame(buf: &[u8]) -> Result<Option<Frame<'_>>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    if buf[0] != HEADER {
        return Err(Error::InvalidHeader(buf[0]));
    }
    let opcode_byte = buf[1];
    let declared_len = u16::from_le_bytes([buf[2], buf[3]]) as usize;

    let opcode = Opcode::from_u8(opcode_byte).ok_or(Error::InvalidOpcode(opcode_byte))?;

    if declared_len < HEADER_LEN {
        return Err(Error::LengthMismatch {
            declared: declared_len as u16,
            available: buf.len(),
        });
    }
    if declared_len > buf.len() {
        // Wait for more bytes; not an error.
        return Ok(None);
    }

    Ok(Some(Frame {
        opcode,
        body: &buf[HEADER_LEN..declared_len],
        consumed: declared_len,
    }))
}

/// Start a packet buffer with the 4-byte header, length left as a
/// placeholder for `BinaryWriter::assign_length`.
pub fn start_packet(opcode: Opcode) -> crate::codec::BinaryWriter {
    let mut w = crate::codec::BinaryWriter::new();
    w.write_u8(HEADER);
    w.write_u8(opcode as u8);
    w.write_u16_le(0);
    w
}

pub fn finish_packet(mut w: crate::codec::BinaryWriter) -> Vec<u8> {
    w.assign_length();
    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_header() {
        let buf = [0x00, 0x04, 0x04, 0x00];
        assert!(matches!(parse_frame(&buf), Err(Error::InvalidHeader(0x00))));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let buf = [HEADER, 0xEE, 0x04, 0x00];
        assert!(matches!(parse_frame(&buf), Err(Error::InvalidOpcode(0xEE))));
    }

    #[test]
    fn waits_for_more_bytes_on_undersized_buffer() {
        let buf = [HEADER, 0x15, 0x08, 0x00, 0x01, 0x02]; // declares 8, only 6 present
        assert!(parse_frame(&buf).unwrap().is_none());
    }

    #[test]
    fn too_short_for_header_waits() {
        let buf = [HEADER, 0x15];
        assert!(parse_frame(&buf).unwrap().is_none());
    }

    #[test]
    fn parses_exact_frame_and_reports_consumed() {
        let buf = [HEADER, 0x17, 0x04, 0x00]; // GAMELOADED_SELF, no body
        let frame = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::GameLoadedSelf);
        assert!(frame.body.is_empty());
        assert_eq!(frame.consumed, 4);
    }

    #[test]
    fn leaves_trailing_bytes_for_next_frame() {
        let mut buf = vec![HEADER, 0x17, 0x04, 0x00];
        buf.extend_from_slice(&[HEADER, 0x17, 0x04, 0x00]);
        let frame = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.consumed, 4);
        let rest = &buf[frame.consumed..];
        let frame2 = parse_frame(rest).unwrap().unwrap();
        assert_eq!(frame2.opcode, Opcode::GameLoadedSelf);
    }

    #[test]
    fn start_and_finish_assigns_length() {
        let mut w = start_packet(Opcode::GameLoadedSelf);
        w.write_u8(0xAB);
        let bytes = finish_packet(w);
        assert_eq!(bytes[0], HEADER);
        assert_eq!(bytes[1], Opcode::GameLoadedSelf as u8);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]) as usize, bytes.len());
    }
}
