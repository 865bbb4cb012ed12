//! Slot model and slot engine: the fixed-size ordered table of player/
//! computer/open/closed slots that backs a lobby, plus the swap, color,
//! and team-assignment operations that keep it consistent.

use bitflags::bitflags;
use rand::seq::SliceRandom;
use rand::Rng;

pub const MAX_SLOTS: usize = 12;
pub const OBSERVER_TEAM: u8 = 12;
pub const OBSERVER_COLOUR: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Open,
    Closed,
    Occupied,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Race: u8 {
        const HUMAN     = 0x01;
        const ORC       = 0x02;
        const NIGHT_ELF = 0x04;
        const UNDEAD    = 0x08;
        const RANDOM    = 0x20;
        const SELECTABLE = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub pid: u8,
    pub download_pct: u8,
    pub status: SlotStatus,
    pub computer: bool,
    pub team: u8,
    pub colour: u8,
    pub race: Race,
    pub computer_skill: u8,
    pub handicap: u8,
}

impl Slot {
    pub fn open() -> Self {
        Self {
            pid: 0,
            download_pct: 255,
            status: SlotStatus::Open,
            computer: false,
            team: 0,
            colour: 0,
            race: Race::RANDOM | Race::SELECTABLE,
            computer_skill: 0,
            handicap: 100,
        }
    }

    pub fn closed() -> Self {
        Self {
            status: SlotStatus::Closed,
            ..Self::open()
        }
    }

    pub fn is_observer(&self) -> bool {
        self.team == OBSERVER_TEAM
    }

    /// True when this slot's team is a real (non-observer) team and its colour is in range.
    pub fn valid_non_observer_colour(&self) -> bool {
        !self.is_observer() && self.colour < OBSERVER_COLOUR
    }
}

/// Layout style byte embedded in SLOTINFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutStyle {
    Melee = 0,
    CustomForces = 1,
    CustomForcesFixedPlayerSettings = 3,
}

/// A fixed-size, ordered slot table plus the map-layout flags that govern
/// how swap/colour/shuffle operations behave.
#[derive(Debug, Clone)]
pub struct SlotTable {
    pub slots: Vec<Slot>,
    pub custom_forces: bool,
    pub fixed_player_settings: bool,
}

impl SlotTable {
    pub fn new(slots: Vec<Slot>, custom_forces: bool, fixed_player_settings: bool) -> Self {
        Self { slots, custom_forces, fixed_player_settings }
    }

    pub fn layout_style(&self) -> LayoutStyle {
        if self.fixed_player_settings {
            LayoutStyle::CustomForcesFixedPlayerSettings
        } else if self.custom_forces {
            LayoutStyle::CustomForces
        } else {
            LayoutStyle::Melee
        }
    }

    pub fn get_sid_from_pid(&self, pid: u8) -> Option<usize> {
        self.slots.iter().position(|s| s.status == SlotStatus::Occupied && s.pid == pid)
    }

    pub fn get_player_from_sid(&self, sid: usize) -> Option<&Slot> {
        self.slots.get(sid).filter(|s| s.status == SlotStatus::Occupied)
    }

    /// `GetEmptySlot()`: first Open slot, any team.
    pub fn get_empty_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.status == SlotStatus::Open)
    }

    /// `GetEmptySlot(team, pid)`: first Open slot on `team`, searching from
    /// the requesting player's current slot index and wrapping around.
    /// `team == OBSERVER_TEAM` only returns observer slots (which, by
    /// construction, are the Open slots whose `team` field already reads 12).
    pub fn get_empty_slot_for_team(&self, team: u8, pid: u8) -> Option<usize> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }
        let start = self.get_sid_from_pid(pid).unwrap_or(0);
        (0..n)
            .map(|i| (start + i) % n)
            .find(|&i| self.slots[i].status == SlotStatus::Open && self.slots[i].team == team)
    }

    /// `SwapSlots(a, b)`. Under CustomForces, team stays with the position,
    /// not the player; under FixedPlayerSettings, team/colour/race/handicap
    /// all stay put and only the remaining fields (pid, download state,
    /// computer flag) move.
    pub fn swap_slots(&mut self, a: usize, b: usize) {
        if a == b || a >= self.slots.len() || b >= self.slots.len() {
            return;
        }
        if self.fixed_player_settings {
            let (team_a, colour_a, race_a, handicap_a) = {
                let s = &self.slots[a];
                (s.team, s.colour, s.race, s.handicap)
            };
            let (team_b, colour_b, race_b, handicap_b) = {
                let s = &self.slots[b];
                (s.team, s.colour, s.race, s.handicap)
            };
            self.slots.swap(a, b);
            self.slots[a].team = team_a;
            self.slots[a].colour = colour_a;
            self.slots[a].race = race_a;
            self.slots[a].handicap = handicap_a;
            self.slots[b].team = team_b;
            self.slots[b].colour = colour_b;
            self.slots[b].race = race_b;
            self.slots[b].handicap = handicap_b;
        } else if self.custom_forces {
            let team_a = self.slots[a].team;
            let team_b = self.slots[b].team;
            self.slots.swap(a, b);
            self.slots[a].team = team_a;
            self.slots[b].team = team_b;
        } else {
            self.slots.swap(a, b);
        }
    }

    pub fn open_slot(&mut self, sid: usize) {
        if let Some(s) = self.slots.get_mut(sid) {
            *s = Slot::open();
        }
    }

    pub fn close_slot(&mut self, sid: usize) {
        if let Some(s) = self.slots.get_mut(sid) {
            *s = Slot::closed();
        }
    }

    pub fn computer_slot(&mut self, sid: usize, skill: u8) {
        if let Some(s) = self.slots.get_mut(sid) {
            s.status = SlotStatus::Occupied;
            s.computer = true;
            s.computer_skill = skill.min(2);
            s.pid = 0;
        }
    }

    /// `ColourSlot(colour)`: swap colours with an unoccupied holder; refuse
    /// silently if the colour belongs to an occupied slot.
    pub fn colour_slot(&mut self, sid: usize, colour: u8) {
        if sid >= self.slots.len() || colour >= OBSERVER_COLOUR {
            return;
        }
        let holder = self.slots.iter().position(|s| s.colour == colour);
        match holder {
            Some(h) if h == sid => {}
            Some(h) if self.slots[h].status != SlotStatus::Occupied => {
                let mine = self.slots[sid].colour;
                self.slots[h].colour = mine;
                self.slots[sid].colour = colour;
            }
            Some(_) => {
                // held by an occupied slot: refuse silently.
            }
            None => {
                self.slots[sid].colour = colour;
            }
        }
    }

    pub fn open_all_slots(&mut self) {
        for sid in 0..self.slots.len() {
            if self.slots[sid].status == SlotStatus::Closed {
                self.open_slot(sid);
            }
        }
    }

    pub fn close_all_slots(&mut self) {
        for sid in 0..self.slots.len() {
            if self.slots[sid].status == SlotStatus::Open {
                self.close_slot(sid);
            }
        }
    }

    /// Random-permute only occupied, non-computer, non-observer slots.
    /// Under CustomForces, permute player identities across positions but
    /// leave each position's team/colour/race in place.
    pub fn shuffle_slots(&mut self, rng: &mut impl Rng) {
        let eligible: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == SlotStatus::Occupied && !s.computer && !s.is_observer())
            .map(|(i, _)| i)
            .collect();

        if eligible.len() < 2 {
            return;
        }

        if self.custom_forces {
            let mut identities: Vec<(u8, u8, bool, u8)> = eligible
                .iter()
                .map(|&i| {
                    let s = &self.slots[i];
                    (s.pid, s.download_pct, s.computer, s.handicap)
                })
                .collect();
            identities.shuffle(rng);
            for (&sid, (pid, dl, computer, handicap)) in eligible.iter().zip(identities) {
                self.slots[sid].pid = pid;
                self.slots[sid].download_pct = dl;
                self.slots[sid].computer = computer;
                self.slots[sid].handicap = handicap;
            }
        } else {
            let mut shuffled = eligible.clone();
            shuffled.shuffle(rng);
            let originals: Vec<Slot> = eligible.iter().map(|&i| self.slots[i]).collect();
            for (&dst, src) in shuffled.iter().zip(originals) {
                self.slots[dst] = src;
            }
        }
    }

    /// Smallest unused pid in [1,254]; 0/255 reserved, plus any excluded
    /// pids (virtual host, fake players if that optional subsystem is wired
    /// in).
    pub fn get_new_pid(&self, excluded: &[u8]) -> Option<u8> {
        let used: Vec<u8> = self
            .slots
            .iter()
            .filter(|s| s.status == SlotStatus::Occupied)
            .map(|s| s.pid)
            .collect();
        (1..=254u8).find(|pid| !used.contains(pid) && !excluded.contains(pid))
    }

    /// Smallest colour in [0,11] not held by any slot; 12 if saturated.
    pub fn get_new_colour(&self) -> u8 {
        (0..OBSERVER_COLOUR).find(|c| !self.slots.iter().any(|s| s.colour == *c)).unwrap_or(OBSERVER_COLOUR)
    }
}
