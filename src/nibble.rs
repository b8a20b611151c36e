//! Byte/nibble conversion for 7-bit-safe MIDI transport.
//!
//! Bulk data frames carry two nibbles per payload byte, high nibble first.

pub fn encode(bytes: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    for byte in bytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    return nibbles;
}

/// An odd trailing nibble is dropped.
pub fn decode(nibbles: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(nibbles.len() / 2);
    for pair in nibbles.chunks_exact(2) {
        bytes.push((pair[0] << 4) | (pair[1] & 0x0f));
    }
    return bytes;
}
