//! Map descriptor: the fixed set of map properties a lobby is built
//! around. Immutable for the lifetime of a `Game`.

use bitflags::bitflags;

use crate::slot::Slot;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapOptions: u32 {
        const MELEE                  = 0x0001;
        const FIXED_PLAYER_SETTINGS  = 0x0002;
        const CUSTOM_FORCES          = 0x0004;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapSpeed {
    Slow,
    Normal,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapVisibility {
    HideTerrain,
    Explored,
    AlwaysVisible,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapObservers {
    None,
    OnDefeat,
    Allowed,
    Referees,
}

#[derive(Debug, Clone)]
pub struct MapDescriptor {
    /// Backslash-separated path, <= 53 chars.
    pub path: String,
    pub size: u32,
    /// "map_info": the real CRC.
    pub info: u32,
    /// "xoro" weak hash, distinct from `info`.
    pub crc: u32,
    pub sha1: [u8; 20],
    pub width: u16,
    pub height: u16,
    pub options: MapOptions,
    pub num_players: u32,
    pub slot_template: Vec<Slot>,
    pub speed: MapSpeed,
    pub visibility: MapVisibility,
    pub observers: MapObservers,
    pub flags: u32,
    pub data: Option<Vec<u8>>,
}

impl MapDescriptor {
    pub fn custom_forces(&self) -> bool {
        self.options.contains(MapOptions::CUSTOM_FORCES)
    }

    pub fn fixed_player_settings(&self) -> bool {
        self.options.contains(MapOptions::FIXED_PLAYER_SETTINGS)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.path.chars().count() > 53 {
            return Err(crate::error::Error::ConfigInvalid(format!(
                "map path exceeds 53 characters: {}",
                self.path
            )));
        }
        if !(1..=12).contains(&self.num_players) {
            return Err(crate::error::Error::ConfigInvalid(format!(
                "num_players out of range: {}",
                self.num_players
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(num_players: u32) -> MapDescriptor {
        MapDescriptor {
            path: "Maps\\test.w3x".into(),
            size: 3000,
            info: 0x1111_1111,
            crc: 0x2222_2222,
            sha1: [0u8; 20],
            width: 64,
            height: 64,
            options: MapOptions::MELEE,
            num_players,
            slot_template: vec![Slot::open(); 2],
            speed: MapSpeed::Normal,
            visibility: MapVisibility::Default,
            observers: MapObservers::None,
            flags: 0,
            data: None,
        }
    }

    #[test]
    fn validate_rejects_bad_num_players() {
        assert!(minimal(0).validate().is_err());
        assert!(minimal(13).validate().is_err());
        assert!(minimal(12).validate().is_ok());
    }

    #[test]
    fn validate_rejects_long_path() {
        let mut m = minimal(2);
        m.path = "x".repeat(54);
        assert!(m.validate().is_err());
    }
}
