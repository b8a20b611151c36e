//! Parameter-space address computation.
//!
//! Each entity family (system, patch, tone) owns a region of the device's
//! 4-byte address space with its own position rule. The builders are pure
//! and mask every output byte to 7 bits; they do not range-check indices.
//! Callers that accept user indices enforce bounds first (see
//! [`crate::device`]): an out-of-range patch index wraps past 127 and
//! aliases another patch.

const PATCH_BASE: [u8; 2] = [0x00, 0x00];
const TONE_BASE: [u8; 2] = [0x00, 0x02];
const SYSTEM_BASE: [u8; 3] = [0x00, 0x01, 0x00];

/// Patches sit 4 address steps apart.
const PATCH_STRIDE: u8 = 4;

/// Position byte of tone 0; tones 1.. follow the stride rule.
const TONE_FIRST_POSITION: u8 = 0x00;

pub fn patch(index: u8, offset: u8) -> [u8; 4] {
    let position = index.wrapping_mul(PATCH_STRIDE) & 0x7f;
    [PATCH_BASE[0], PATCH_BASE[1], position, offset & 0x7f]
}

pub fn tone(index: u8, offset: u8) -> [u8; 4] {
    let position = if index == 0 {
        TONE_FIRST_POSITION
    } else {
        8u8.wrapping_add(index.wrapping_mul(2)) & 0x7f
    };
    [TONE_BASE[0], TONE_BASE[1], position, offset & 0x7f]
}

pub fn system(offset: u8) -> [u8; 4] {
    [
        SYSTEM_BASE[0],
        SYSTEM_BASE[1],
        SYSTEM_BASE[2],
        offset & 0x7f,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_address() {
        assert_eq!(patch(5, 12), [0, 0, 20, 12]);
        assert_eq!(patch(0, 0), [0, 0, 0, 0]);
        assert_eq!(patch(31, 0x7f), [0, 0, 124, 0x7f]);
    }

    #[test]
    fn test_patch_address_aliases_past_seven_bits() {
        // Only reachable outside the documented 0..=31 range, which the
        // device client enforces. The mask wraps rather than panicking.
        assert_eq!(patch(0xff, 0)[2], 124);
        assert_eq!(patch(32, 0), patch(0, 0));
    }

    #[test]
    fn test_tone_address() {
        assert_eq!(tone(0, 3), [0, 2, 0, 3]);
        assert_eq!(tone(1, 0), [0, 2, 10, 0]);
        assert_eq!(tone(31, 0), [0, 2, 70, 0]);
    }

    #[test]
    fn test_system_address() {
        assert_eq!(system(9), [0, 1, 0, 9]);
        assert_eq!(system(0xff), [0, 1, 0, 0x7f]);
    }

    #[test]
    fn test_offset_masked() {
        assert_eq!(patch(1, 0x8c)[3], 0x0c);
        assert_eq!(tone(1, 0x8c)[3], 0x0c);
    }
}
