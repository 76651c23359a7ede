//! CRC32 as computed by the STM32 CRC peripheral in its reset configuration
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no input or output reflection,
//! no final XOR (the catalogue name for this variant is CRC-32/MPEG-2).
//! This is *not* the common reflected CRC-32/ISO-HDLC.

const CRC32: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_MPEG_2);

/// Calculate the CRC32 of `data`
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod test {
    use super::crc32;

    /// Bitwise model of the peripheral, one byte at a time
    fn reference(data: &[u8]) -> u32 {
        let mut crc = 0xFFFF_FFFFu32;

        for byte in data {
            crc ^= (*byte as u32) << 24;

            for _ in 0..8 {
                crc = if crc & 0x8000_0000 != 0 {
                    (crc << 1) ^ 0x04C1_1DB7
                } else {
                    crc << 1
                };
            }
        }

        crc
    }

    #[test]
    fn check_value() {
        assert_eq!(crc32(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn empty_is_initial_value() {
        assert_eq!(crc32(b""), 0xFFFF_FFFF);
    }

    #[test]
    fn differs_from_iso_hdlc() {
        assert_ne!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn matches_bitwise_model() {
        let data: [u8; 300] = core::array::from_fn(|i| (i * 7 + 3) as u8);

        for len in [0, 1, 3, 4, 5, 116, 255, 300] {
            assert_eq!(crc32(&data[..len]), reference(&data[..len]), "len {len}");
        }
    }
}
