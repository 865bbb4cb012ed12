#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    #[error("invalid header byte: {0:#x} (expected 0xF7)")]
    InvalidHeader(u8),

    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("declared length {declared} exceeds buffered length {available}")]
    LengthMismatch { declared: u16, available: usize },

    #[error("string too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("invalid player or game name: {0}")]
    NameInvalid(String),

    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("map too large: {size} bytes")]
    MapTooLarge { size: u32 },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
