pub mod crc;
pub mod reader;
pub mod stat_string;
pub mod writer;

pub use crc::{crc16, crc32};
pub use reader::{extract_cstring, BinaryReader};
pub use stat_string::{decode_stat_string, encode_stat_string};
pub use writer::BinaryWriter;
