/// CRC32 (IEEE polynomial) over an arbitrary byte slice, used for the
/// `MAPPART` per-slice checksum and the wire "crc16" action-batch field
/// (which truncates this to its low 16 bits).
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// The 2-byte "crc" field several S→C packets carry is the low 16 bits of
/// the full CRC32.
pub fn crc16(data: &[u8]) -> u16 {
    (crc32(data) & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn crc16_is_low_bits_of_crc32() {
        let full = crc32(b"123456789");
        assert_eq!(crc16(b"123456789"), (full & 0xFFFF) as u16);
    }
}
