//! Typed configuration loaded from a `key = value` text file: blank lines
//! and `#`-prefixed comments are skipped, unrecognized keys are ignored.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::game::AutoStart;
use crate::map::{MapDescriptor, MapObservers, MapOptions, MapSpeed, MapVisibility};
use crate::slot::Slot;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_hostport: u16,
    pub bot_virtualhostname: String,
    pub lan_war3version: u8,
    pub bot_latency: u32,
    pub bot_autostart: AutoStart,
    pub bot_defaultgamename: String,
    pub map_path: String,
    pub map_size: u32,
    pub map_info: u32,
    pub map_crc: u32,
    pub map_sha1: [u8; 20],
    pub map_width: u16,
    pub map_height: u16,
    pub map_options: u32,
    pub map_num_players: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_hostport: 6112,
            bot_virtualhostname: "Host".into(),
            lan_war3version: 26,
            bot_latency: 100,
            bot_autostart: AutoStart::Off,
            bot_defaultgamename: "w3gs-host game".into(),
            map_path: String::new(),
            map_size: 0,
            map_info: 0,
            map_crc: 0,
            map_sha1: [0u8; 20],
            map_width: 0,
            map_height: 0,
            map_options: MapOptions::MELEE.bits(),
            map_num_players: 2,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Io(e.to_string()))?;
        Ok(Self::from_str(&text))
    }

    pub fn from_str(text: &str) -> Self {
        let mut map = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        let mut cfg = Config::default();
        if let Some(v) = map.get("bot_hostport").and_then(|v| v.parse().ok()) {
            cfg.bot_hostport = v;
        }
        if let Some(v) = map.get("bot_virtualhostname") {
            cfg.bot_virtualhostname = truncate(v, 15);
        }
        if let Some(v) = map.get("lan_war3version").and_then(|v| v.parse().ok()) {
            cfg.lan_war3version = v;
        }
        if let Some(v) = map.get("bot_latency").and_then(|v| v.parse().ok()) {
            cfg.bot_latency = v;
        }
        if let Some(v) = map.get("bot_autostart").and_then(|v| v.parse::<u8>().ok()) {
            cfg.bot_autostart = match v {
                1 => AutoStart::OnAnyJoin,
                2 => AutoStart::OnFull,
                _ => AutoStart::Off,
            };
        }
        if let Some(v) = map.get("bot_defaultgamename") {
            cfg.bot_defaultgamename = truncate(v, 31);
        }
        if let Some(v) = map.get("map_path") {
            cfg.map_path = v.clone();
        }
        if let Some(v) = map.get("map_size").and_then(|v| v.parse().ok()) {
            cfg.map_size = v;
        }
        if let Some(v) = map.get("map_info").and_then(|v| v.parse().ok()) {
            cfg.map_info = v;
        }
        if let Some(v) = map.get("map_crc").and_then(|v| v.parse().ok()) {
            cfg.map_crc = v;
        }
        if let Some(v) = map.get("map_sha1") {
            if let Some(bytes) = parse_hex_sha1(v) {
                cfg.map_sha1 = bytes;
            }
        }
        if let Some(v) = map.get("map_width").and_then(|v| v.parse().ok()) {
            cfg.map_width = v;
        }
        if let Some(v) = map.get("map_height").and_then(|v| v.parse().ok()) {
            cfg.map_height = v;
        }
        if let Some(v) = map.get("map_options").and_then(|v| v.parse().ok()) {
            cfg.map_options = v;
        }
        if let Some(v) = map.get("map_num_players").and_then(|v| v.parse().ok()) {
            cfg.map_num_players = v;
        }
        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_virtualhostname.chars().count() > 15 {
            return Err(Error::ConfigInvalid("bot_virtualhostname exceeds 15 characters".into()));
        }
        if self.bot_defaultgamename.chars().count() > 31 {
            return Err(Error::ConfigInvalid("bot_defaultgamename exceeds 31 characters".into()));
        }
        if !(1..=12).contains(&self.map_num_players) {
            return Err(Error::ConfigInvalid(format!(
                "map_num_players out of range: {}",
                self.map_num_players
            )));
        }
        Ok(())
    }

    /// Builds a melee slot template of `map_num_players` open slots; a real
    /// deployment with custom forces would instead read `slotN` keys.
    pub fn build_map_descriptor(&self) -> Result<MapDescriptor> {
        self.validate()?;
        let options = MapOptions::from_bits_truncate(self.map_options);
        let descriptor = MapDescriptor {
            path: self.map_path.clone(),
            size: self.map_size,
            info: self.map_info,
            crc: self.map_crc,
            sha1: self.map_sha1,
            width: self.map_width,
            height: self.map_height,
            options,
            num_players: self.map_num_players,
            slot_template: vec![Slot::open(); self.map_num_players as usize],
            speed: MapSpeed::Normal,
            visibility: MapVisibility::Default,
            observers: MapObservers::None,
            flags: 0,
            data: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn parse_hex_sha1(s: &str) -> Option<[u8; 20]> {
    if s.len() != 40 {
        return None;
    }
    let mut out = [0u8; 20];
    for i in 0..20 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = Config::from_str("bot_hostport = 6113\nsome_unknown_key = whatever\n");
        assert_eq!(cfg.bot_hostport, 6113);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let cfg = Config::from_str("# a comment\n\nbot_latency = 250\n");
        assert_eq!(cfg.bot_latency, 250);
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.bot_hostport, 6112);
        assert_eq!(cfg.lan_war3version, 26);
        assert_eq!(cfg.bot_latency, 100);
    }

    #[test]
    fn validate_rejects_overlong_names() {
        let mut cfg = Config::default();
        cfg.bot_defaultgamename = "x".repeat(32);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn autostart_parses_numeric_modes() {
        let cfg = Config::from_str("bot_autostart = 2\n");
        assert!(matches!(cfg.bot_autostart, AutoStart::OnFull));
    }
}
