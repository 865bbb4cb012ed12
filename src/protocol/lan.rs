//! LAN broadcast packets. These share header byte `0xF7` and opcode `0x30`
//! with `MAPPART`, but travel over UDP broadcast rather than a player's TCP
//! stream, so they never collide with the TCP frame parser in
//! `protocol::packet`.

use crate::codec::BinaryWriter;
use crate::map::MapDescriptor;

const LAN_OPCODE: u8 = 0x30;
pub const LAN_PORT: u16 = 6112;

fn start(product_id: &[u8; 4]) -> BinaryWriter {
    let mut w = BinaryWriter::new();
    w.write_u8(0xF7);
    w.write_u8(LAN_OPCODE);
    w.write_u16_le(0);
    w.write_bytes(product_id);
    w
}

/// `GAMEINFO`: advertises one lobby every 5s while Waiting.
pub struct GameInfo<'a> {
    pub war3_version: u8,
    pub game_type_flags: u32,
    pub map_flags: u32,
    pub map: &'a MapDescriptor,
    pub game_name: &'a str,
    pub host_port: u16,
    pub host_counter: u32,
    pub entry_key: u32,
}

/// Slots are always advertised as 12/12 open regardless of the real slot
/// table; clients treat any other value as a full lobby.
const ADVERTISED_SLOTS_TOTAL: u32 = 12;
const ADVERTISED_SLOTS_OPEN: u32 = 12;

/// High 4 bits of the wire host-counter encode a realm id; 0 = LAN.
const LAN_REALM_ID: u32 = 0;

pub fn encode_game_info(info: &GameInfo<'_>) -> Vec<u8> {
    let mut w = start(b"W3XP");
    w.write_u32_le(info.war3_version as u32);
    w.write_u32_le((LAN_REALM_ID << 28) | (info.host_counter & 0x0FFF_FFFF));
    w.write_u32_le(info.entry_key);
    w.write_cstring(info.game_name);
    w.write_u8(0); // password/stat-string separator, empty
    w.write_bytes(&encode_game_stat_string(info));
    w.write_u32_le(ADVERTISED_SLOTS_TOTAL);
    w.write_u32_le(info.game_type_flags);
    w.write_u32_le(ADVERTISED_SLOTS_OPEN);
    w.write_u32_le(0); // uptime, always 0
    w.write_u16_le(info.host_port);
    w.assign_length();
    w.into_vec()
}

fn encode_game_stat_string(info: &GameInfo<'_>) -> Vec<u8> {
    let mut inner = BinaryWriter::new();
    inner.write_u32_le(info.map_flags);
    inner.write_u16_le(info.map.width);
    inner.write_u16_le(info.map.height);
    inner.write_u32_le(info.map.crc);
    inner.write_cstring(&info.map.path);
    inner.write_cstring("Clan 007");
    let mut encoded = crate::codec::encode_stat_string(inner.as_slice());
    encoded.push(0);
    encoded
}

pub fn encode_create_game(war3_version: u8, host_counter: u32) -> Vec<u8> {
    let mut w = start(b"W3XP");
    w.write_u32_le(war3_version as u32);
    w.write_u32_le(host_counter & 0x0FFF_FFFF);
    w.assign_length();
    w.into_vec()
}

pub fn encode_refresh_game(host_counter: u32, players: u32, slots_total: u32) -> Vec<u8> {
    let mut w = start(b"W3XP");
    w.write_u32_le(host_counter & 0x0FFF_FFFF);
    w.write_u32_le(players);
    w.write_u32_le(slots_total);
    w.assign_length();
    w.into_vec()
}

pub fn encode_decreate_game(host_counter: u32) -> Vec<u8> {
    let mut w = start(b"W3XP");
    w.write_u32_le(host_counter & 0x0FFF_FFFF);
    w.assign_length();
    w.into_vec()
}

/// `PING_FROM_HOST`: sent over each player's own TCP stream (not UDP
/// broadcast) every 5s in any state, carrying `now_ticks` so the matching
/// `PONG_TO_HOST` yields a round-trip sample.
pub fn encode_ping_from_host(now_ticks: u32) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    w.write_u8(0xF7);
    w.write_u8(0x01); // PING_FROM_HOST
    w.write_u16_le(0);
    w.write_u32_le(now_ticks);
    w.assign_length();
    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{MapDescriptor, MapObservers, MapOptions, MapSpeed, MapVisibility};
    use crate::slot::Slot;

    fn map() -> MapDescriptor {
        MapDescriptor {
            path: "Maps\\test.w3x".into(),
            size: 3000,
            info: 1,
            crc: 0xABCDEF01,
            sha1: [0; 20],
            width: 64,
            height: 64,
            options: MapOptions::MELEE,
            num_players: 2,
            slot_template: vec![Slot::open(); 2],
            speed: MapSpeed::Normal,
            visibility: MapVisibility::Default,
            observers: MapObservers::None,
            flags: 0,
            data: None,
        }
    }

    #[test]
    fn game_info_encodes_host_counter_high_bits_as_lan() {
        let m = map();
        let info = GameInfo {
            war3_version: 26,
            game_type_flags: 0,
            map_flags: 0,
            map: &m,
            game_name: "test game",
            host_port: 6112,
            host_counter: 0xFFFF_FFFF,
            entry_key: 0x1234_5678,
        };
        let bytes = encode_game_info(&info);
        assert_eq!(bytes[0], 0xF7);
        assert_eq!(bytes[1], 0x30);
        let len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
        assert_eq!(len, bytes.len());
    }
}
