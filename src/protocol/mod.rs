pub mod lan;
pub mod messages;
pub mod packet;
pub mod slotinfo;

pub use messages::*;
pub use packet::{finish_packet, parse_frame, start_packet, Frame, Opcode, HEADER, HEADER_LEN};
