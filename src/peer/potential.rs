//! Pre-join peer state: only a `REQJOIN` is accepted, and parsing stops the
//! instant one is consumed so the remainder of the buffer survives the
//! promotion to `Player`.

use crate::error::{Error, Result};
use crate::peer::InboundBuffer;
use crate::protocol::packet::{parse_frame, Opcode};
use crate::protocol::{decode_req_join, JoinRequest};

/// A connection that has not yet produced a valid join request.
#[derive(Debug, Default)]
pub struct Potential {
    pub delete_me: bool,
    joined: bool,
}

#[derive(Debug)]
pub enum PotentialEvent {
    Joined(JoinRequest),
}

impl Potential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract at most one frame from `inbound`. Returns `Ok(None)` while
    /// waiting for more bytes, `Ok(Some(..))` once a join request lands,
    /// and `Err` on anything else (caller must then set `delete_me`).
    pub fn poll(&mut self, inbound: &mut InboundBuffer) -> Result<Option<PotentialEvent>> {
        if self.joined {
            return Ok(None);
        }

        let frame = match parse_frame(inbound.as_slice()) {
            Ok(Some(f)) => f,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.delete_me = true;
                return Err(e);
            }
        };

        if frame.opcode != Opcode::ReqJoin {
            self.delete_me = true;
            return Err(Error::InvalidPacket(format!(
                "unexpected opcode before join: {:?}",
                frame.opcode
            )));
        }

        let join = decode_req_join(frame.body)?;
        let consumed = frame.consumed;
        inbound.consume(consumed);
        self.joined = true;
        Ok(Some(PotentialEvent::Joined(join)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BinaryWriter;
    use crate::protocol::packet::{finish_packet, start_packet};

    fn req_join_frame(name: &str) -> Vec<u8> {
        let mut w = start_packet(Opcode::ReqJoin);
        w.write_u32_le(0);
        w.write_u32_le(0xCAFE);
        w.write_u8(0);
        w.write_u16_le(6112);
        w.write_u32_le(0);
        w.write_cstring(name);
        w.write_bytes(&[0u8; 4]);
        w.write_u16_le(6112);
        w.write_u32_le(0x0100007F);
        finish_packet(w)
    }

    #[test]
    fn accepts_req_join_and_stops_after() {
        let mut inbound = InboundBuffer::new();
        let mut frame = req_join_frame("alice");
        let extra = vec![0xAAu8; 4];
        frame.extend_from_slice(&extra);
        inbound.extend(&frame);

        let mut p = Potential::new();
        let event = p.poll(&mut inbound).unwrap().unwrap();
        match event {
            PotentialEvent::Joined(j) => assert_eq!(j.name, "alice"),
        }
        // leftover bytes are preserved for the promoted Player.
        assert_eq!(inbound.as_slice(), extra.as_slice());

        // further polls are no-ops, even though more bytes are queued.
        assert!(p.poll(&mut inbound).unwrap().is_none());
    }

    #[test]
    fn rejects_non_join_opcode() {
        let mut inbound = InboundBuffer::new();
        inbound.extend(&finish_packet(start_packet(Opcode::LeaveGame)));
        let mut p = Potential::new();
        assert!(p.poll(&mut inbound).is_err());
        assert!(p.delete_me);
    }

    #[test]
    fn waits_for_more_bytes() {
        let mut inbound = InboundBuffer::new();
        inbound.extend(&[0xF7, 0x14]);
        let mut p = Potential::new();
        assert!(p.poll(&mut inbound).unwrap().is_none());
        assert!(!p.delete_me);
    }
}
