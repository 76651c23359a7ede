//! The security block embedded in the bootloader image
//!
//! Layout, relative to the block offset (0x8000 in the default memory map):
//!
//! | Offset | Size | Field                                                  |
//! |--------|------|--------------------------------------------------------|
//! | 0x00   | 32   | Encrypted payload-decryption key, 32-bit LE words      |
//! | 0x20   | 16   | AES-CBC IV, 32-bit LE words                            |
//! | 0x30   | 32   | Public key Qx, big-endian                              |
//! | 0x50   | 32   | Public key Qy, big-endian                              |
//! | 0x70   | 4    | CRC32 of the image bytes preceding the block, LE       |
//!
//! The bootloader loads the key and the IV as `uint32_t` arrays, so every
//! 4-byte group of those two fields is stored byte-reversed.

use log::debug;

use crate::crc::crc32;
use crate::keys::{EncryptedKey, Iv, KeyMaterial, ENCRYPTED_KEY_LEN, KEY_LEN};
use crate::signature::{EcPublicKey, FIELD_LEN};
use crate::Error;

/// Security block, as embedded in the bootloader image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBlock {
    /// Encrypted payload-decryption key, word-reversed
    encrypted_key: [u8; ENCRYPTED_KEY_LEN],
    /// IV, word-reversed
    iv: [u8; KEY_LEN],
    qx: [u8; FIELD_LEN],
    qy: [u8; FIELD_LEN],
    /// CRC32 of the protected region. LE order.
    crc32: [u8; 4],
}

impl SecurityBlock {
    pub const SIZE: usize = ENCRYPTED_KEY_LEN + KEY_LEN + EcPublicKey::SIZE + 4;

    pub const IV_OFFSET: usize = ENCRYPTED_KEY_LEN;
    pub const PUBLIC_KEY_OFFSET: usize = Self::IV_OFFSET + KEY_LEN;
    pub const CRC_OFFSET: usize = Self::PUBLIC_KEY_OFFSET + EcPublicKey::SIZE;

    /// Create a security block
    ///
    /// # Arguments
    /// * `encrypted_key` - The encrypted payload-decryption key
    /// * `iv` - The IV the key was encrypted with
    /// * `public_key` - The public key the bootloader verifies application signatures with
    /// * `protected_region` - The image bytes preceding the block
    pub fn new(
        encrypted_key: &EncryptedKey,
        iv: &Iv,
        public_key: &EcPublicKey,
        protected_region: &[u8],
    ) -> Self {
        let mut this = Self {
            encrypted_key: [0; ENCRYPTED_KEY_LEN],
            iv: [0; KEY_LEN],
            qx: public_key.qx,
            qy: public_key.qy,
            crc32: [0; 4],
        };

        reverse_words(encrypted_key.as_bytes(), &mut this.encrypted_key);
        reverse_words(iv.as_bytes(), &mut this.iv);

        let crc = crc32(protected_region);
        this.crc32 = crc.to_le_bytes();

        for (index, word) in this.encrypted_key.chunks_exact(4).enumerate() {
            debug!("Encrypted key word {index}: {}", hex::encode_upper(word));
        }
        debug!("IV: {}", hex::encode_upper(iv.as_bytes()));
        debug!("Public key Qx: {}", hex::encode_upper(this.qx));
        debug!("Public key Qy: {}", hex::encode_upper(this.qy));
        debug!(
            "Protected region CRC32: 0x{crc:08X} (over 0x{:X}B)",
            protected_region.len()
        );

        this
    }

    /// Serialize the security block
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];

        bytes[..Self::IV_OFFSET].copy_from_slice(&self.encrypted_key);
        bytes[Self::IV_OFFSET..Self::PUBLIC_KEY_OFFSET].copy_from_slice(&self.iv);
        bytes[Self::PUBLIC_KEY_OFFSET..Self::PUBLIC_KEY_OFFSET + FIELD_LEN]
            .copy_from_slice(&self.qx);
        bytes[Self::PUBLIC_KEY_OFFSET + FIELD_LEN..Self::CRC_OFFSET].copy_from_slice(&self.qy);
        bytes[Self::CRC_OFFSET..].copy_from_slice(&self.crc32);

        bytes
    }

    /// Overwrite `firmware[offset..offset + SIZE]` with the block, leaving all other bytes untouched
    pub fn embed(&self, firmware: &mut [u8], offset: usize) -> Result<(), Error> {
        let end = offset
            .checked_add(Self::SIZE)
            .filter(|end| *end <= firmware.len())
            .ok_or(Error::Bounds {
                offset,
                len: Self::SIZE,
                capacity: firmware.len(),
            })?;

        firmware[offset..end].copy_from_slice(&self.to_bytes());

        Ok(())
    }

    /// The CRC32 of the protected region
    pub fn crc32(&self) -> u32 {
        u32::from_le_bytes(self.crc32)
    }
}

/// Build the security block: encrypt the payload-decryption key, then lay out the block
///
/// # Arguments
/// * `keys` - The key material
/// * `public_key` - The public key to embed
/// * `protected_region` - The image bytes preceding the block
pub fn build_security_block(
    keys: &KeyMaterial,
    public_key: &EcPublicKey,
    protected_region: &[u8],
) -> Result<SecurityBlock, Error> {
    let encrypted_key = keys.encrypted_key()?;

    Ok(SecurityBlock::new(
        &encrypted_key,
        &keys.iv,
        public_key,
        protected_region,
    ))
}

/// Copy `src` into `dst`, reversing the byte order of every 4-byte word
fn reverse_words(src: &[u8], dst: &mut [u8]) {
    for (from, to) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        to.copy_from_slice(from);
        to.reverse();
    }
}

#[cfg(test)]
mod test {
    use alloc::vec;

    use super::{build_security_block, reverse_words, SecurityBlock};
    use crate::crc::crc32;
    use crate::keys::{Iv, KeyEncryptionKey, KeyMaterial, PayloadDecryptionKey};
    use crate::signature::test::key;
    use crate::signature::EcPublicKey;
    use crate::Error;

    fn keys() -> KeyMaterial {
        KeyMaterial {
            payload_key: PayloadDecryptionKey::new([0x11; 16]),
            kek: KeyEncryptionKey::from_hex("aes_key_2", "00240028323650032034354edeadbeef")
                .unwrap(),
            iv: Iv::new(core::array::from_fn(|i| i as u8)),
        }
    }

    #[test]
    fn words_are_reversed() {
        let mut out = [0; 8];
        reverse_words(&[1, 2, 3, 4, 5, 6, 7, 8], &mut out);

        assert_eq!(out, [4, 3, 2, 1, 8, 7, 6, 5]);
    }

    #[test]
    fn layout() {
        let keys = keys();
        let public_key = EcPublicKey::extract(&key()).unwrap();
        let protected = [0x5A; 0x100];

        let block = build_security_block(&keys, &public_key, &protected).unwrap();
        let bytes = block.to_bytes();

        assert_eq!(SecurityBlock::SIZE, 116);
        assert_eq!(bytes.len(), 116);

        let encrypted = keys.encrypted_key().unwrap();
        for word in 0..8 {
            let mut expected = [0; 4];
            expected.copy_from_slice(&encrypted.as_bytes()[word * 4..word * 4 + 4]);
            expected.reverse();

            assert_eq!(&bytes[word * 4..word * 4 + 4], &expected);
        }

        assert_eq!(&bytes[0x20..0x24], &[3, 2, 1, 0]);
        assert_eq!(&bytes[0x2C..0x30], &[15, 14, 13, 12]);
        assert_eq!(&bytes[0x30..0x50], &public_key.qx);
        assert_eq!(&bytes[0x50..0x70], &public_key.qy);
        assert_eq!(&bytes[0x70..], &crc32(&protected).to_le_bytes());
        assert_eq!(block.crc32(), crc32(&protected));
    }

    #[test]
    fn embed_touches_only_the_block() {
        let block = build_security_block(
            &keys(),
            &EcPublicKey::extract(&key()).unwrap(),
            &[],
        )
        .unwrap();

        let original: alloc::vec::Vec<u8> = (0..1024).map(|i| (i % 251) as u8).collect();

        for offset in [0, 1, 0x100, 1024 - SecurityBlock::SIZE] {
            let mut firmware = original.clone();
            block.embed(&mut firmware, offset).unwrap();

            assert_eq!(&firmware[..offset], &original[..offset]);
            assert_eq!(
                &firmware[offset..offset + SecurityBlock::SIZE],
                &block.to_bytes()
            );
            assert_eq!(
                &firmware[offset + SecurityBlock::SIZE..],
                &original[offset + SecurityBlock::SIZE..]
            );
        }
    }

    #[test]
    fn embed_out_of_bounds() {
        let block = build_security_block(
            &keys(),
            &EcPublicKey::extract(&key()).unwrap(),
            &[],
        )
        .unwrap();

        let mut firmware = vec![0xFF; 200];

        assert!(matches!(
            block.embed(&mut firmware, 200 - SecurityBlock::SIZE + 1),
            Err(Error::Bounds {
                len: 116,
                capacity: 200,
                ..
            })
        ));
        assert!(matches!(
            block.embed(&mut firmware, usize::MAX),
            Err(Error::Bounds { .. })
        ));
        assert!(firmware.iter().all(|b| *b == 0xFF));
    }
}
