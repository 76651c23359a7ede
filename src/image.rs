//! Final image assembly
//!
//! - Application images: the 256-byte header, followed by the unmodified payload.
//! - Bootloader images: the bootloader binary, of an exact size, with the security
//!   block overwritten at a fixed offset.

use alloc::vec::Vec;

use log::info;

use p256::ecdsa::SigningKey;

use crate::header::{FirmwareVersion, ImageHeader};
use crate::keys::KeyMaterial;
use crate::security::{build_security_block, SecurityBlock};
use crate::signature::EcPublicKey;
use crate::Error;

/// Application image metadata stored in the header
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AppMetadata {
    pub magic: u32,
    pub version: FirmwareVersion,
    pub entry_point: u32,
}

impl AppMetadata {
    /// The magic number the bootloader expects
    pub const MAGIC: u32 = 0xDEAD_BEEF;

    /// Main application slot (0x08040000) plus the header
    pub const ENTRY_POINT: u32 = 0x0804_0100;
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            magic: Self::MAGIC,
            version: FirmwareVersion::new(1, 0, 0, 0),
            entry_point: Self::ENTRY_POINT,
        }
    }
}

/// Where the security block goes in the bootloader image
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootloaderLayout {
    /// Offset of the security block; everything before it is CRC-protected
    pub block_offset: usize,
    /// Exact size the bootloader image must have
    pub final_size: usize,
}

impl BootloaderLayout {
    pub const BLOCK_OFFSET: usize = 0x8000;
    pub const FINAL_SIZE: usize = 254016;

    fn check(&self, firmware: &[u8]) -> Result<(), Error> {
        if firmware.len() != self.final_size {
            Err(Error::SizeMismatch {
                expected: self.final_size,
                actual: firmware.len(),
            })?;
        }

        if self
            .block_offset
            .checked_add(SecurityBlock::SIZE)
            .map_or(true, |end| end > firmware.len())
        {
            Err(Error::Bounds {
                offset: self.block_offset,
                len: SecurityBlock::SIZE,
                capacity: firmware.len(),
            })?;
        }

        Ok(())
    }
}

impl Default for BootloaderLayout {
    fn default() -> Self {
        Self {
            block_offset: Self::BLOCK_OFFSET,
            final_size: Self::FINAL_SIZE,
        }
    }
}

/// Prepend `header` to `payload`
pub fn assemble_app_image(header: &ImageHeader, payload: Vec<u8>) -> Result<Vec<u8>, Error> {
    if header.image_size as usize != payload.len() {
        Err(Error::SizeMismatch {
            expected: header.image_size as usize,
            actual: payload.len(),
        })?;
    }

    let mut image = Vec::with_capacity(ImageHeader::SIZE + payload.len());
    image.extend_from_slice(&header.build()?);
    image.extend_from_slice(&payload);

    Ok(image)
}

/// Sign an application binary and return the image with its header
///
/// # Arguments
/// * `payload` - The application binary
/// * `metadata` - Header metadata
/// * `key` - P-256 signing key
pub fn sign_app_image(
    payload: Vec<u8>,
    metadata: &AppMetadata,
    key: &SigningKey,
) -> Result<Vec<u8>, Error> {
    info!(
        "Signing {}B application, version {}, entry point 0x{:08X}",
        payload.len(),
        metadata.version,
        metadata.entry_point
    );

    let header = ImageHeader::sign(
        &payload,
        metadata.magic,
        metadata.version,
        metadata.entry_point,
        key,
    )?;

    let image = assemble_app_image(&header, payload)?;

    info!("Signed image: {}B", image.len());

    Ok(image)
}

/// Check the size of `firmware`, then embed `block` at the layout's offset
pub fn assemble_bootloader_image(
    mut firmware: Vec<u8>,
    layout: &BootloaderLayout,
    block: &SecurityBlock,
) -> Result<Vec<u8>, Error> {
    layout.check(&firmware)?;

    block.embed(&mut firmware, layout.block_offset)?;

    Ok(firmware)
}

/// Build the security block for a bootloader binary and embed it
///
/// # Arguments
/// * `firmware` - The bootloader binary; must be exactly `layout.final_size` bytes
/// * `layout` - Block offset and required size
/// * `keys` - The key material
/// * `public_key` - The public key to embed
pub fn secure_bootloader(
    firmware: Vec<u8>,
    layout: &BootloaderLayout,
    keys: &KeyMaterial,
    public_key: &EcPublicKey,
) -> Result<Vec<u8>, Error> {
    layout.check(&firmware)?;

    info!(
        "Building security block at 0x{:X} of a {}B bootloader",
        layout.block_offset,
        firmware.len()
    );

    let block = build_security_block(keys, public_key, &firmware[..layout.block_offset])?;

    assemble_bootloader_image(firmware, layout, &block)
}

#[cfg(test)]
mod test {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::{
        assemble_app_image, assemble_bootloader_image, secure_bootloader, sign_app_image,
        AppMetadata, BootloaderLayout,
    };
    use crate::crc::crc32;
    use crate::header::ImageHeader;
    use crate::keys::{Iv, KeyEncryptionKey, KeyMaterial, PayloadDecryptionKey};
    use crate::security::SecurityBlock;
    use crate::signature::test::key;
    use crate::signature::EcPublicKey;
    use crate::Error;

    fn keys() -> KeyMaterial {
        KeyMaterial {
            payload_key: PayloadDecryptionKey::new([0xA5; 16]),
            kek: KeyEncryptionKey::new([0x3C; 16]),
            iv: Iv::new([0x0F; 16]),
        }
    }

    #[test]
    fn app_image() {
        let payload = vec![0u8; 1024];

        let image = sign_app_image(payload.clone(), &AppMetadata::default(), &key()).unwrap();

        assert_eq!(image.len(), ImageHeader::SIZE + 1024);
        assert_eq!(&image[ImageHeader::SIZE..], &payload[..]);

        let header = ImageHeader::parse(&image).unwrap();
        header.check_magic(0xDEAD_BEEF).unwrap();
        assert_eq!(header.image_size, 1024);
        assert_eq!(header.entry_point, 0x0804_0100);
        assert_eq!(header.version.to_bytes(), [1, 0, 0, 0]);
        assert_eq!(header.digest, crate::digest(&payload));
        assert_eq!(
            &image[ImageHeader::FIELDS_LEN..ImageHeader::UNPADDED_LEN],
            &crc32(&image[..ImageHeader::FIELDS_LEN]).to_le_bytes()
        );
    }

    #[test]
    fn app_image_size_mismatch() {
        let header =
            ImageHeader::sign(&[1, 2, 3], 0xDEAD_BEEF, Default::default(), 0, &key()).unwrap();

        assert!(matches!(
            assemble_app_image(&header, vec![1, 2, 3, 4]),
            Err(Error::SizeMismatch {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn bootloader_image() {
        let layout = BootloaderLayout {
            block_offset: 0x200,
            final_size: 0x400,
        };
        let public_key = EcPublicKey::extract(&key()).unwrap();

        let firmware: Vec<u8> = (0..0x400).map(|i| (i * 13) as u8).collect();

        let secured = secure_bootloader(firmware.clone(), &layout, &keys(), &public_key).unwrap();

        assert_eq!(secured.len(), 0x400);
        assert_eq!(&secured[..0x200], &firmware[..0x200]);
        assert_eq!(
            &secured[0x200 + SecurityBlock::SIZE..],
            &firmware[0x200 + SecurityBlock::SIZE..]
        );

        let block = &secured[0x200..0x200 + SecurityBlock::SIZE];
        assert_eq!(&block[0x30..0x50], &public_key.qx);
        assert_eq!(&block[0x50..0x70], &public_key.qy);
        assert_eq!(&block[0x70..], &crc32(&firmware[..0x200]).to_le_bytes());
    }

    #[test]
    fn bootloader_size_is_exact() {
        let layout = BootloaderLayout::default();
        let public_key = EcPublicKey::extract(&key()).unwrap();

        for size in [BootloaderLayout::FINAL_SIZE - 1, BootloaderLayout::FINAL_SIZE + 1] {
            assert!(matches!(
                secure_bootloader(vec![0xFF; size], &layout, &keys(), &public_key),
                Err(Error::SizeMismatch {
                    expected: BootloaderLayout::FINAL_SIZE,
                    actual
                }) if actual == size
            ));
        }

        let secured = secure_bootloader(
            vec![0xFF; BootloaderLayout::FINAL_SIZE],
            &layout,
            &keys(),
            &public_key,
        )
        .unwrap();
        assert_eq!(secured.len(), BootloaderLayout::FINAL_SIZE);
        assert!(secured[..0x8000].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn bootloader_block_must_fit() {
        let layout = BootloaderLayout {
            block_offset: 0x3F0,
            final_size: 0x400,
        };
        let block = SecurityBlock::new(
            &keys().encrypted_key().unwrap(),
            &keys().iv,
            &EcPublicKey::extract(&key()).unwrap(),
            &[],
        );

        assert!(matches!(
            assemble_bootloader_image(vec![0; 0x400], &layout, &block),
            Err(Error::Bounds {
                offset: 0x3F0,
                ..
            })
        ));
    }
}
