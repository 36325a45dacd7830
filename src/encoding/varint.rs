//! # Compact Variable-Length Integer Encoding
//!
//! This module provides the compact-size varint encoding used throughout the
//! record format for counts, script lengths, locktime, and version fields.
//!
//! ## Encoding Format
//!
//! A leading marker byte selects the width of the value:
//!
//! | Value Range               | Bytes | Format                        |
//! |---------------------------|-------|-------------------------------|
//! | 0 - 0xfc                  | 1     | `[value]`                     |
//! | 0xfd - 0xffff             | 3     | `[0xfd, u16 little-endian]`   |
//! | 0x10000 - 0xffff_ffff     | 5     | `[0xfe, u32 little-endian]`   |
//! | 0x1_0000_0000 - u64::MAX  | 9     | `[0xff, u64 little-endian]`   |
//!
//! A multi-byte encoding whose value fits a shorter form is rejected on
//! decode as non-canonical; every value has exactly one valid encoding.
//!
//! ## Boundary Values
//!
//! Key boundary values for testing:
//!
//! - 0xfc: maximum 1-byte value
//! - 0xfd: minimum 3-byte value
//! - 0xffff: maximum 3-byte value
//! - 0x10000: minimum 5-byte value
//! - 0xffff_ffff: maximum 5-byte value
//! - 0x1_0000_0000: minimum 9-byte value
//!
//! ## Zero-Copy Design
//!
//! All functions operate on byte slices directly:
//! - `encode_varint` writes to a mutable slice, returns bytes written
//! - `decode_varint` reads from a slice, returns (value, bytes_read)
//! - `varint_len` computes length without any I/O
//!
//! No heap allocations are performed by any function in this module.
//!
//! ## Error Handling
//!
//! `decode_varint` returns `eyre::Result` with descriptive messages for
//! empty buffers, truncated encodings, and non-canonical encodings.

use eyre::{ensure, Result};

/// Maximum encoded length of any varint.
pub const MAX_VARINT_LEN: usize = 9;

pub fn varint_len(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

pub fn encode_varint(value: u64, buf: &mut [u8]) -> usize {
    if value < 0xfd {
        buf[0] = value as u8;
        1
    } else if value <= 0xffff {
        buf[0] = 0xfd;
        buf[1..3].copy_from_slice(&(value as u16).to_le_bytes());
        3
    } else if value <= 0xffff_ffff {
        buf[0] = 0xfe;
        buf[1..5].copy_from_slice(&(value as u32).to_le_bytes());
        5
    } else {
        buf[0] = 0xff;
        buf[1..9].copy_from_slice(&value.to_le_bytes());
        9
    }
}

pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    match buf[0] {
        marker @ 0..=0xfc => Ok((marker as u64, 1)),
        0xfd => {
            ensure!(buf.len() >= 3, "truncated 3-byte varint");
            let value = u16::from_le_bytes([buf[1], buf[2]]) as u64;
            ensure!(value >= 0xfd, "non-canonical 3-byte varint: {}", value);
            Ok((value, 3))
        }
        0xfe => {
            ensure!(buf.len() >= 5, "truncated 5-byte varint");
            let value = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as u64;
            ensure!(value > 0xffff, "non-canonical 5-byte varint: {}", value);
            Ok((value, 5))
        }
        0xff => {
            ensure!(buf.len() >= 9, "truncated 9-byte varint");
            let value = u64::from_le_bytes(buf[1..9].try_into().unwrap()); // INVARIANT: length validated by ensure above
            ensure!(value > 0xffff_ffff, "non-canonical 9-byte varint: {}", value);
            Ok((value, 9))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_len_single_byte_values() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(1), 1);
        assert_eq!(varint_len(127), 1);
        assert_eq!(varint_len(0xfc), 1);
    }

    #[test]
    fn varint_len_three_byte_values() {
        assert_eq!(varint_len(0xfd), 3);
        assert_eq!(varint_len(1000), 3);
        assert_eq!(varint_len(0xffff), 3);
    }

    #[test]
    fn varint_len_five_byte_values() {
        assert_eq!(varint_len(0x10000), 5);
        assert_eq!(varint_len(1_000_000), 5);
        assert_eq!(varint_len(0xffff_ffff), 5);
    }

    #[test]
    fn varint_len_nine_byte_values() {
        assert_eq!(varint_len(0x1_0000_0000), 9);
        assert_eq!(varint_len(u64::MAX), 9);
    }

    #[test]
    fn encode_varint_single_byte() {
        let mut buf = [0u8; MAX_VARINT_LEN];

        assert_eq!(encode_varint(0, &mut buf), 1);
        assert_eq!(buf[0], 0);

        assert_eq!(encode_varint(0xfc, &mut buf), 1);
        assert_eq!(buf[0], 0xfc);
    }

    #[test]
    fn encode_varint_three_byte() {
        let mut buf = [0u8; MAX_VARINT_LEN];

        assert_eq!(encode_varint(0xfd, &mut buf), 3);
        assert_eq!(buf[..3], [0xfd, 0xfd, 0x00]);

        assert_eq!(encode_varint(0xffff, &mut buf), 3);
        assert_eq!(buf[..3], [0xfd, 0xff, 0xff]);
    }

    #[test]
    fn encode_varint_five_byte() {
        let mut buf = [0u8; MAX_VARINT_LEN];

        assert_eq!(encode_varint(0x10000, &mut buf), 5);
        assert_eq!(buf[..5], [0xfe, 0x00, 0x00, 0x01, 0x00]);

        assert_eq!(encode_varint(0xffff_ffff, &mut buf), 5);
        assert_eq!(buf[..5], [0xfe, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn encode_varint_nine_byte() {
        let mut buf = [0u8; MAX_VARINT_LEN];

        assert_eq!(encode_varint(0x1_0000_0000, &mut buf), 9);
        assert_eq!(buf[0], 0xff);

        assert_eq!(encode_varint(u64::MAX, &mut buf), 9);
        assert_eq!(buf[0], 0xff);
        assert_eq!(&buf[1..9], &u64::MAX.to_le_bytes());
    }

    #[test]
    fn decode_varint_single_byte() {
        let (value, len) = decode_varint(&[0]).unwrap();
        assert_eq!((value, len), (0, 1));

        let (value, len) = decode_varint(&[0xfc]).unwrap();
        assert_eq!((value, len), (0xfc, 1));
    }

    #[test]
    fn decode_varint_three_byte() {
        let (value, len) = decode_varint(&[0xfd, 0xfd, 0x00]).unwrap();
        assert_eq!((value, len), (0xfd, 3));

        let (value, len) = decode_varint(&[0xfd, 0xff, 0xff]).unwrap();
        assert_eq!((value, len), (0xffff, 3));
    }

    #[test]
    fn decode_varint_five_byte() {
        let (value, len) = decode_varint(&[0xfe, 0x00, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!((value, len), (0x10000, 5));

        let (value, len) = decode_varint(&[0xfe, 0xff, 0xff, 0xff, 0xff]).unwrap();
        assert_eq!((value, len), (0xffff_ffff, 5));
    }

    #[test]
    fn decode_varint_nine_byte() {
        let mut buf = [0xffu8; MAX_VARINT_LEN];
        buf[1..9].copy_from_slice(&0x1_0000_0000u64.to_le_bytes());
        let (value, len) = decode_varint(&buf).unwrap();
        assert_eq!((value, len), (0x1_0000_0000, 9));

        buf[1..9].copy_from_slice(&u64::MAX.to_le_bytes());
        let (value, len) = decode_varint(&buf).unwrap();
        assert_eq!((value, len), (u64::MAX, 9));
    }

    #[test]
    fn decode_varint_empty_buffer_fails() {
        assert!(decode_varint(&[]).is_err());
    }

    #[test]
    fn decode_varint_truncated_fails() {
        assert!(decode_varint(&[0xfd, 0x01]).is_err());
        assert!(decode_varint(&[0xfe, 0x01, 0x02, 0x03]).is_err());
        assert!(decode_varint(&[0xff, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn decode_varint_non_canonical_fails() {
        // 0xfc fits one byte, 0xffff fits three, 0xffff_ffff fits five.
        assert!(decode_varint(&[0xfd, 0xfc, 0x00]).is_err());
        assert!(decode_varint(&[0xfe, 0xff, 0xff, 0x00, 0x00]).is_err());
        assert!(decode_varint(&[0xff, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn roundtrip_boundary_values() {
        let boundary_values = [
            0u64,
            1,
            0xfc,
            0xfd,
            0xffff,
            0x10000,
            0xffff_ffff,
            0x1_0000_0000,
            u64::MAX,
        ];

        for &value in &boundary_values {
            let mut buf = [0u8; MAX_VARINT_LEN];
            let encoded_len = encode_varint(value, &mut buf);
            let (decoded, decoded_len) = decode_varint(&buf).unwrap();

            assert_eq!(
                encoded_len, decoded_len,
                "length mismatch for value {}",
                value
            );
            assert_eq!(value, decoded, "value mismatch for value {}", value);
            assert_eq!(
                varint_len(value),
                encoded_len,
                "varint_len mismatch for value {}",
                value
            );
        }
    }
}
