//! Headless lobby and action-relay host for a W3GS-compatible game session.
//!
//! A single process listens on a TCP port, advertises itself over UDP LAN
//! broadcast, seats joining clients into map slots, streams the map to
//! clients that lack it, runs a countdown, and then relays per-tick action
//! batches to every client once all of them have loaded.

pub mod codec;
pub mod config;
pub mod error;
pub mod game;
pub mod host;
pub mod map;
pub mod peer;
pub mod protocol;
pub mod slot;
pub mod time;
pub mod timer;

pub use config::Config;
pub use error::{Error, Result};
pub use game::{AutoStart, Game, GameState, OutMsg};
pub use host::Host;
pub use map::MapDescriptor;
pub use peer::{Player, PlayerEvent, Potential, PotentialEvent};
pub use slot::{Slot, SlotTable};
