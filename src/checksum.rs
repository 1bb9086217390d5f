use crate::container::Chunk;

/// Standard CRC-32 (IEEE polynomial, the one the PNG container uses).
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// CRC-32 of `tag ‖ payload`, fed as a seed over the tag followed by the
/// running accumulator over the payload.
pub fn chunk_crc(tag: &[u8; 4], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(tag);
    hasher.update(payload);
    hasher.finalize()
}

/// Recomputes the chunk checksum and compares it with the stored one.
pub fn verify(chunk: &Chunk) -> bool {
    chunk_crc(chunk.tag(), chunk.payload()) == chunk.crc()
}
