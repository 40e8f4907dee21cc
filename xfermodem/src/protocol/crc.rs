//! Checksum and CRC primitives shared by every protocol machine.
//!
//! Three algorithms are used across the engine:
//! - an 8-bit wrapping sum (XMODEM "checksum" mode),
//! - CRC-16/CCITT-FALSE with polynomial `0x1021` (XMODEM-CRC, XMODEM-1K, YMODEM),
//! - CRC-32/ZMODEM, the reflected polynomial `0xEDB88320` with a final complement.

/// Compute the 8-bit wrapping checksum of `data`.
///
/// This is the sum of all bytes modulo 256, matching XMODEM's original
/// (non-CRC) block trailer.
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Compute CRC-16/CCITT-FALSE over `data`: initial value 0, polynomial
/// `0x1021`, each byte shifted into the high half of a 16-bit running value
/// before eight shift-and-maybe-xor steps.
///
/// `crc16(b"123456789") == 0x29B1`.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Table-driven CRC-32/ZMODEM: reflected polynomial `0xEDB88320`, initial
/// value `0xFFFFFFFF`, final value complemented.
///
/// `crc32(b"123456789") == 0xCBF43926`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[idx];
    }
    !crc
}

/// Precomputed CRC-32 lookup table for the reflected `0xEDB88320` polynomial.
static CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_known_vector() {
        assert_eq!(checksum(&[0x01, 0x02, 0x03, 0x04]), 0x0A);
    }

    #[test]
    fn checksum_wraps_on_overflow() {
        assert_eq!(checksum(&[0xFF, 0xFF, 0x02]), 0x00);
    }

    #[test]
    fn crc16_known_vector() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn crc16_empty_is_zero() {
        assert_eq!(crc16(&[]), 0);
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn crc16_single_bit_corruption_changes_result() {
        let data = b"the quick brown fox".to_vec();
        let good = crc16(&data);
        for i in 0..data.len() {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x01;
            assert_ne!(
                crc16(&corrupted),
                good,
                "single-bit flip at byte {i} did not change CRC16"
            );
        }
    }

    #[test]
    fn crc32_single_bit_corruption_changes_result() {
        let data = b"the quick brown fox".to_vec();
        let good = crc32(&data);
        for i in 0..data.len() {
            let mut corrupted = data.clone();
            corrupted[i] ^= 0x01;
            assert_ne!(
                crc32(&corrupted),
                good,
                "single-bit flip at byte {i} did not change CRC32"
            );
        }
    }
}
