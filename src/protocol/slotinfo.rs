//! Slotinfo serialization, shared by `SLOTINFO` and `SLOTINFOJOIN`.

use crate::codec::{BinaryReader, BinaryWriter};
use crate::error::Result;
use crate::slot::{LayoutStyle, Race, Slot, SlotStatus, SlotTable};

pub fn encode_slotinfo(table: &SlotTable, random_seed: u32) -> Vec<u8> {
    let mut w = BinaryWriter::new();
    w.write_u8(table.slots.len() as u8);
    for s in &table.slots {
        w.write_u8(s.pid);
        w.write_u8(s.download_pct);
        w.write_u8(match s.status {
            SlotStatus::Open => 0,
            SlotStatus::Closed => 1,
            SlotStatus::Occupied => 2,
        });
        w.write_bool(s.computer);
        w.write_u8(s.team);
        w.write_u8(s.colour);
        w.write_u8(s.race.bits());
        w.write_u8(s.computer_skill);
        w.write_u8(s.handicap);
    }
    w.write_u32_le(random_seed);
    w.write_u8(table.layout_style() as u8);
    w.write_u8(table.slots.len() as u8);
    w.into_vec()
}

pub fn decode_slotinfo(body: &[u8]) -> Result<(Vec<Slot>, u32, u8)> {
    let mut r = BinaryReader::new(body);
    let n = r.read_u8()? as usize;
    let mut slots = Vec::with_capacity(n);
    for _ in 0..n {
        let pid = r.read_u8()?;
        let download_pct = r.read_u8()?;
        let status = match r.read_u8()? {
            0 => SlotStatus::Open,
            1 => SlotStatus::Closed,
            _ => SlotStatus::Occupied,
        };
        let computer = r.read_bool()?;
        let team = r.read_u8()?;
        let colour = r.read_u8()?;
        let race = Race::from_bits_truncate(r.read_u8()?);
        let computer_skill = r.read_u8()?;
        let handicap = r.read_u8()?;
        slots.push(Slot {
            pid,
            download_pct,
            status,
            computer,
            team,
            colour,
            race,
            computer_skill,
            handicap,
        });
    }
    let random_seed = r.read_u32_le()?;
    let layout_byte = r.read_u8()?;
    Ok((slots, random_seed, layout_byte))
}

pub fn layout_style_from_byte(b: u8) -> LayoutStyle {
    match b {
        1 => LayoutStyle::CustomForces,
        3 => LayoutStyle::CustomForcesFixedPlayerSettings,
        _ => LayoutStyle::Melee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_slotinfo() {
        let mut slots = vec![Slot::open(); 3];
        slots[0].status = SlotStatus::Occupied;
        slots[0].pid = 1;
        slots[0].colour = 0;
        let table = SlotTable::new(slots.clone(), false, false);

        let encoded = encode_slotinfo(&table, 0xDEADBEEF);
        let (decoded_slots, seed, layout) = decode_slotinfo(&encoded).unwrap();

        assert_eq!(decoded_slots, slots);
        assert_eq!(seed, 0xDEADBEEF);
        assert_eq!(layout_style_from_byte(layout), LayoutStyle::Melee);
    }
}
