//! Typed encode/decode for every packet in the W3GS family.

use crate::codec::{BinaryReader, BinaryWriter};
use crate::error::{Error, Result};
use crate::protocol::packet::{finish_packet, start_packet, Opcode};
use crate::protocol::slotinfo::{decode_slotinfo, encode_slotinfo};
use crate::slot::SlotTable;

/// A `sockaddr_in`-shaped field: family and port are big-endian, the IP
/// address little-endian like everything else in the packet family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SockAddr {
    pub ip: u32,
    pub port: u16,
}

const AF_INET: u16 = 2;

fn write_sockaddr(w: &mut BinaryWriter, addr: SockAddr) {
    w.write_u16_be(AF_INET);
    w.write_u16_be(addr.port);
    w.write_u32_le(addr.ip);
    w.write_bytes(&[0u8; 8]);
}

fn read_sockaddr(r: &mut BinaryReader) -> Result<SockAddr> {
    let _family = r.read_u16_be()?;
    let port = r.read_u16_be()?;
    let ip = r.read_u32_le()?;
    r.skip(8)?;
    Ok(SockAddr { ip, port })
}

// ---------------------------------------------------------------- REQJOIN

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub host_counter: u32,
    pub entry_key: u32,
    pub listen_port: u16,
    pub peer_key: u32,
    pub name: String,
    pub internal_port: u16,
    pub internal_ip: u32,
}

pub fn decode_req_join(body: &[u8]) -> Result<JoinRequest> {
    let mut r = BinaryReader::new(body);
    let host_counter = r.read_u32_le()?;
    let entry_key = r.read_u32_le()?;
    r.skip(1)?; // junk
    let listen_port = r.read_u16_le()?;
    let peer_key = r.read_u32_le()?;
    let name = r.read_cstring()?;
    r.skip(4)?; // junk
    let internal_port = r.read_u16_le()?;
    let internal_ip = r.read_u32_le()?;
    Ok(JoinRequest {
        host_counter,
        entry_key,
        listen_port,
        peer_key,
        name,
        internal_port,
        internal_ip,
    })
}

// -------------------------------------------------------------- REJECTJOIN

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Full = 9,
    WrongPassword = 27,
}

pub fn encode_reject_join(reason: RejectReason) -> Vec<u8> {
    let mut w = start_packet(Opcode::RejectJoin);
    w.write_u32_le(reason as u32);
    finish_packet(w)
}

// ------------------------------------------------------------ SLOTINFOJOIN

pub fn encode_slot_info_join(table: &SlotTable, random_seed: u32, pid: u8, external: SockAddr) -> Vec<u8> {
    let slotinfo = encode_slotinfo(table, random_seed);
    let mut w = start_packet(Opcode::SlotInfoJoin);
    w.write_u16_le(slotinfo.len() as u16);
    w.write_bytes(&slotinfo);
    w.write_u8(pid);
    write_sockaddr(&mut w, external);
    finish_packet(w)
}

// -------------------------------------------------------------- PLAYERINFO

pub fn encode_player_info(pid: u8, name: &str, external: SockAddr, internal: SockAddr) -> Vec<u8> {
    let mut w = start_packet(Opcode::PlayerInfo);
    w.write_u32_le(2); // join_counter
    w.write_u8(pid);
    w.write_cstring(name);
    w.write_bytes(&[0u8; 2]); // junk
    write_sockaddr(&mut w, external);
    write_sockaddr(&mut w, internal);
    finish_packet(w)
}

// -------------------------------------------------------- PLAYERLEAVE_OTHERS

pub fn encode_player_leave_others(pid: u8, left_code: u32) -> Vec<u8> {
    let mut w = start_packet(Opcode::PlayerLeaveOthers);
    w.write_u8(pid);
    w.write_u32_le(left_code);
    finish_packet(w)
}

// ------------------------------------------------------------------ SLOTINFO

pub fn encode_slot_info(table: &SlotTable, random_seed: u32) -> Vec<u8> {
    let slotinfo = encode_slotinfo(table, random_seed);
    let mut w = start_packet(Opcode::SlotInfo);
    w.write_u16_le(slotinfo.len() as u16);
    w.write_bytes(&slotinfo);
    finish_packet(w)
}

pub fn decode_slot_info(body: &[u8]) -> Result<(Vec<crate::slot::Slot>, u32, u8)> {
    let mut r = BinaryReader::new(body);
    let len = r.read_u16_le()? as usize;
    let bytes = r.read_bytes(len)?;
    decode_slotinfo(bytes)
}

// -------------------------------------------------------- COUNTDOWN_START/END

pub fn encode_countdown_start() -> Vec<u8> {
    finish_packet(start_packet(Opcode::CountDownStart))
}

pub fn encode_countdown_end() -> Vec<u8> {
    finish_packet(start_packet(Opcode::CountDownEnd))
}

// --------------------------------------------------------------- INCOMING_ACTION

/// One crc16+payload pair, as carried in `INCOMING_ACTION`/`INCOMING_ACTION2`.
pub struct ActionSubPacket<'a> {
    pub crc16: u16,
    pub payload: &'a [u8],
}

pub fn encode_incoming_action(send_interval: u16, subpackets: &[ActionSubPacket<'_>]) -> Vec<u8> {
    let mut w = start_packet(Opcode::IncomingAction);
    w.write_u16_le(send_interval);
    for sp in subpackets {
        w.write_u16_le(sp.crc16);
        w.write_bytes(sp.payload);
    }
    finish_packet(w)
}

pub fn encode_incoming_action2(subpackets: &[ActionSubPacket<'_>]) -> Vec<u8> {
    let mut w = start_packet(Opcode::IncomingAction2);
    for sp in subpackets {
        w.write_u16_le(sp.crc16);
        w.write_bytes(sp.payload);
    }
    finish_packet(w)
}

// ---------------------------------------------------------------- CHAT_FROM_HOST

pub fn encode_chat_from_host(recipients: &[u8], from_pid: u8, flag: u8, extra: u32, msg: &str) -> Vec<u8> {
    let mut w = start_packet(Opcode::ChatFromHost);
    w.write_u8(recipients.len() as u8);
    w.write_bytes(recipients);
    w.write_u8(from_pid);
    w.write_u8(flag);
    w.write_u32_le(extra);
    w.write_cstring(msg);
    finish_packet(w)
}

// --------------------------------------------------------------------- START_LAG

pub fn encode_start_lag(laggers: &[(u8, u32)]) -> Vec<u8> {
    let mut w = start_packet(Opcode::StartLag);
    w.write_u8(laggers.len() as u8);
    for &(pid, ticks) in laggers {
        w.write_u8(pid);
        w.write_u32_le(ticks);
    }
    finish_packet(w)
}

// ---------------------------------------------------------------------- STOP_LAG

pub fn encode_stop_lag(pid: u8, ticks: u32) -> Vec<u8> {
    let mut w = start_packet(Opcode::StopLag);
    w.write_u8(pid);
    w.write_u32_le(ticks);
    finish_packet(w)
}

// -------------------------------------------------------------------- LEAVEGAME

pub fn decode_leave_game(body: &[u8]) -> Result<u32> {
    let mut r = BinaryReader::new(body);
    r.read_u32_le()
}

// ---------------------------------------------------------------- GAMELOADED_SELF

pub fn decode_game_loaded_self(_body: &[u8]) -> Result<()> {
    Ok(())
}

// ----------------------------------------------------------------- OUTGOING_ACTION

pub struct OutgoingAction {
    pub crc: u32,
    pub payload: Vec<u8>,
}

pub fn decode_outgoing_action(body: &[u8]) -> Result<OutgoingAction> {
    let mut r = BinaryReader::new(body);
    let crc = r.read_u32_le()?;
    let payload = r.remaining_slice().to_vec();
    Ok(OutgoingAction { crc, payload })
}

// -------------------------------------------------------------- OUTGOING_KEEPALIVE

pub fn decode_outgoing_keepalive(body: &[u8]) -> Result<u32> {
    let mut r = BinaryReader::new(body);
    r.skip(1)?; // junk
    r.read_u32_le()
}

// ------------------------------------------------------------------- CHAT_TO_HOST

#[derive(Debug, Clone)]
pub enum ChatToHostBody {
    Message(String),
    TeamChange(u8),
    ColourChange(u8),
    RaceChange(u8),
    HandicapChange(u8),
}

#[derive(Debug, Clone)]
pub struct ChatToHost {
    pub recipients: Vec<u8>,
    pub from_pid: u8,
    pub body: ChatToHostBody,
}

const CHAT_FLAG_MESSAGE: u8 = 0x10;
const CHAT_FLAG_TEAM_CHANGE: u8 = 0x11;
const CHAT_FLAG_COLOUR_CHANGE: u8 = 0x12;
const CHAT_FLAG_RACE_CHANGE: u8 = 0x13;
const CHAT_FLAG_HANDICAP_CHANGE: u8 = 0x14;

pub fn decode_chat_to_host(body: &[u8]) -> Result<ChatToHost> {
    let mut r = BinaryReader::new(body);
    let n = r.read_u8()? as usize;
    let mut recipients = Vec::with_capacity(n);
    for _ in 0..n {
        recipients.push(r.read_u8()?);
    }
    let from_pid = r.read_u8()?;
    let flag = r.read_u8()?;
    let body = match flag {
        CHAT_FLAG_MESSAGE => ChatToHostBody::Message(r.read_cstring()?),
        CHAT_FLAG_TEAM_CHANGE => ChatToHostBody::TeamChange(r.read_u8()?),
        CHAT_FLAG_COLOUR_CHANGE => ChatToHostBody::ColourChange(r.read_u8()?),
        CHAT_FLAG_RACE_CHANGE => ChatToHostBody::RaceChange(r.read_u8()?),
        CHAT_FLAG_HANDICAP_CHANGE => ChatToHostBody::HandicapChange(r.read_u8()?),
        other => return Err(Error::InvalidPacket(format!("unknown chat flag {other:#x}"))),
    };
    Ok(ChatToHost { recipients, from_pid, body })
}

// ---------------------------------------------------------------------- DROPREQ

pub fn decode_drop_req(_body: &[u8]) -> Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------- MAPSIZE

pub struct MapSizeReport {
    pub size_flag: u8,
    pub map_size: u32,
}

pub fn decode_map_size(body: &[u8]) -> Result<MapSizeReport> {
    let mut r = BinaryReader::new(body);
    r.skip(4)?; // junk
    let size_flag = r.read_u8()?;
    let map_size = r.read_u32_le()?;
    Ok(MapSizeReport { size_flag, map_size })
}

// ----------------------------------------------------------------------- MAPPART

pub fn encode_map_part(to_pid: u8, from_pid: u8, offset: u32, data: &[u8]) -> Vec<u8> {
    let mut w = start_packet(Opcode::MapPart);
    w.write_u8(to_pid);
    w.write_u8(from_pid);
    w.write_u32_le(1);
    w.write_u32_le(offset);
    w.write_u32_le(crate::codec::crc32(data));
    w.write_bytes(data);
    finish_packet(w)
}

// -------------------------------------------------------------------- PONG_TO_HOST

pub fn decode_pong_to_host(body: &[u8]) -> Result<u32> {
    let mut r = BinaryReader::new(body);
    r.read_u32_le()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Slot;

    #[test]
    fn req_join_roundtrip() {
        // Build a REQJOIN body by hand (this is a client->server message,
        // so there's no encoder to roundtrip against; decode a known layout).
        let mut w = BinaryWriter::new();
        w.write_u32_le(0); // host_counter
        w.write_u32_le(0xCAFEBABE); // entry_key
        w.write_u8(0); // junk
        w.write_u16_le(6112); // listen_port
        w.write_u32_le(0x1234); // peer_key
        w.write_cstring("alice");
        w.write_bytes(&[0u8; 4]);
        w.write_u16_le(6112);
        w.write_u32_le(0x0100007F);
        let body = w.into_vec();

        let join = decode_req_join(&body).unwrap();
        assert_eq!(join.entry_key, 0xCAFEBABE);
        assert_eq!(join.name, "alice");
        assert_eq!(join.internal_ip, 0x0100007F);
    }

    #[test]
    fn slot_info_join_roundtrip_slotinfo_portion() {
        let table = SlotTable::new(vec![Slot::open(); 2], false, false);
        let bytes = encode_slot_info_join(&table, 1, 1, SockAddr { ip: 0x0100007F, port: 6112 });
        let frame = crate::protocol::packet::parse_frame(&bytes).unwrap().unwrap();
        let (slots, _seed, _layout) = decode_slot_info(frame.body).unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn map_part_crc_covers_only_the_slice() {
        let data = vec![7u8; 1442];
        let bytes = encode_map_part(1, 255, 0, &data);
        let frame = crate::protocol::packet::parse_frame(&bytes).unwrap().unwrap();
        let mut r = BinaryReader::new(frame.body);
        let _to = r.read_u8().unwrap();
        let _from = r.read_u8().unwrap();
        let _one = r.read_u32_le().unwrap();
        let _offset = r.read_u32_le().unwrap();
        let crc = r.read_u32_le().unwrap();
        assert_eq!(crc, crate::codec::crc32(&data));
    }

    #[test]
    fn chat_to_host_team_change() {
        let mut w = BinaryWriter::new();
        w.write_u8(1);
        w.write_u8(1);
        w.write_u8(1); // from_pid
        w.write_u8(CHAT_FLAG_TEAM_CHANGE);
        w.write_u8(3);
        let decoded = decode_chat_to_host(&w.into_vec()).unwrap();
        assert!(matches!(decoded.body, ChatToHostBody::TeamChange(3)));
    }

    #[test]
    fn leave_game_decodes_reason() {
        let mut w = BinaryWriter::new();
        w.write_u32_le(7);
        assert_eq!(decode_leave_game(&w.into_vec()).unwrap(), 7);
    }
}
