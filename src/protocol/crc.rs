//! Frame CRC
//!
//! CRC-16/XMODEM over the header and payload, stored little-endian in the
//! two bytes that follow them.

use crate::config::protocol::CRC_SIZE;
use crc::{Crc, CRC_16_XMODEM};

/// CRC-16 calculator for link frames
const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Whether a CRC pass writes the trailing bytes or checks them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcMode {
    /// Compute and store the CRC before transmission
    Send,
    /// Recompute and compare against the received CRC
    Receive,
}

/// CRC over `data`
pub fn checksum(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Compute or check the CRC of `frame`, whose last two bytes hold the CRC.
///
/// In `Send` mode the trailing bytes are overwritten and the result is
/// always `true` for a frame long enough to carry a CRC. In `Receive`
/// mode the frame is left untouched and the result says whether it matched.
pub fn compute_or_check(mode: CrcMode, frame: &mut [u8]) -> bool {
    match mode {
        CrcMode::Send => append(frame),
        CrcMode::Receive => verify(frame),
    }
}

/// Write the CRC of everything before the last two bytes into them
pub fn append(frame: &mut [u8]) -> bool {
    let Some(split) = frame.len().checked_sub(CRC_SIZE) else {
        return false;
    };
    let (body, tail) = frame.split_at_mut(split);
    tail.copy_from_slice(&checksum(body).to_le_bytes());
    true
}

/// Check the last two bytes against the CRC of everything before them
pub fn verify(frame: &[u8]) -> bool {
    let Some(split) = frame.len().checked_sub(CRC_SIZE) else {
        return false;
    };
    let (body, tail) = frame.split_at(split);
    checksum(body).to_le_bytes() == [tail[0], tail[1]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // CRC-16/XMODEM check value
        assert_eq!(checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_append_is_little_endian() {
        let mut frame = [0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0, 0];
        assert!(compute_or_check(CrcMode::Send, &mut frame));
        assert_eq!(&frame[9..], &[0xC3, 0x31]);
    }

    #[test]
    fn test_receive_accepts_sent_frame() {
        let mut frame = [0x04, 0x05, 120, 0x00, 0x07, 0, 0];
        compute_or_check(CrcMode::Send, &mut frame);
        assert!(compute_or_check(CrcMode::Receive, &mut frame));
    }

    #[test]
    fn test_receive_rejects_single_bit_flip() {
        let mut frame = [0x04, 0x05, 120, 0x00, 0x07, 0, 0];
        compute_or_check(CrcMode::Send, &mut frame);

        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    !compute_or_check(CrcMode::Receive, &mut corrupted),
                    "flip at byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_single_bit_flip_rejected_across_frames() {
        let mut frame = [0u8; 64];
        for len in [2usize, 3, 6, 12, 33, 64] {
            for (i, byte) in frame[..len - 2].iter_mut().enumerate() {
                *byte = (i as u8).wrapping_mul(29).wrapping_add(len as u8);
            }
            compute_or_check(CrcMode::Send, &mut frame[..len]);

            for bit in 0..len * 8 {
                let mut corrupted = frame;
                corrupted[bit / 8] ^= 1 << (bit % 8);
                assert!(
                    !verify(&corrupted[..len]),
                    "flip at bit {} of a {}-byte frame went undetected",
                    bit,
                    len
                );
            }
        }
    }

    #[test]
    fn test_receive_does_not_modify_frame() {
        let mut frame = [0x04, 0x04, 120, 0x00, 0xAA, 0xBB];
        let before = frame;
        compute_or_check(CrcMode::Receive, &mut frame);
        assert_eq!(frame, before);
    }

    #[test]
    fn test_too_short_for_crc() {
        let mut frame = [0x01];
        assert!(!compute_or_check(CrcMode::Send, &mut frame));
        assert!(!verify(&[]));
    }
}
