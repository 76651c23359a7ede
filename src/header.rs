//! The application image header
//!
//! Layout (little-endian), as read by the bootloader:
//!
//! | Offset | Size | Field                                 |
//! |--------|------|---------------------------------------|
//! | 0      | 4    | Magic number                          |
//! | 4      | 4    | Image size (payload only)             |
//! | 8      | 4    | Version: major, minor, patch, build   |
//! | 12     | 4    | Entry point address                   |
//! | 16     | 32   | SHA-256 digest of the payload         |
//! | 48     | 64   | ECDSA P-256 signature, `r \|\| s`     |
//! | 112    | 4    | CRC32 of the preceding 112 bytes      |
//! | 116    | 140  | Padding, 0xFF                         |
//!
//! Note: the CRC covers the 112 packed field bytes, i.e. everything before the CRC itself.

use alloc::vec::Vec;

use core::fmt::{self, Display};
use core::str::FromStr;

use log::debug;

use p256::ecdsa::SigningKey;

use crate::crc::crc32;
use crate::signature::EcdsaSignature;
use crate::{Digest, Error};

/// Firmware version, `major.minor.patch.build`
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8, build: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [self.major, self.minor, self.patch, self.build]
    }

    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

impl Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

/// Error returned when a version string is not `major.minor.patch.build`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ParseVersionError;

impl Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Expected a version of the form `major.minor.patch.build` (0-255 each)")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseVersionError {}

impl FromStr for FirmwareVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 4];
        let mut parts = s.trim().split('.');

        for byte in &mut bytes {
            *byte = parts
                .next()
                .and_then(|part| part.parse().ok())
                .ok_or(ParseVersionError)?;
        }

        if parts.next().is_some() {
            Err(ParseVersionError)?;
        }

        Ok(Self::from_bytes(bytes))
    }
}

/// Application image header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    /// Magic number identifying a valid image
    pub magic: u32,
    /// Size of the payload following the header
    pub image_size: u32,
    pub version: FirmwareVersion,
    /// Address the bootloader jumps to
    pub entry_point: u32,
    /// SHA-256 digest of the payload
    pub digest: Digest,
    /// ECDSA P-256 signature of `digest`
    pub signature: EcdsaSignature,
}

impl ImageHeader {
    /// Total size of the header, including padding
    pub const SIZE: usize = 256;

    /// Size of the packed fields covered by the CRC
    pub const FIELDS_LEN: usize = 4 + 4 + 4 + 4 + 32 + EcdsaSignature::SIZE;

    /// Size of the packed fields plus the CRC
    pub const UNPADDED_LEN: usize = Self::FIELDS_LEN + 4;

    /// The padding byte (erased flash)
    const PADDING: u8 = 0xff;

    /// Create the header of `payload`, signing its SHA-256 digest with `key`
    ///
    /// # Arguments
    /// * `payload` - The application binary
    /// * `magic` - Magic number
    /// * `version` - Firmware version
    /// * `entry_point` - Application entry point address
    /// * `key` - P-256 key to sign the digest with
    pub fn sign(
        payload: &[u8],
        magic: u32,
        version: FirmwareVersion,
        entry_point: u32,
        key: &SigningKey,
    ) -> Result<Self, Error> {
        let image_size = u32::try_from(payload.len()).map_err(|_| Error::SizeMismatch {
            expected: u32::MAX as usize,
            actual: payload.len(),
        })?;

        let digest = crate::digest(payload);

        debug!("SHA-256 digest: {}", hex::encode_upper(digest));

        let signature = EcdsaSignature::sign(&digest, key)?;

        Ok(Self {
            magic,
            image_size,
            version,
            entry_point,
            digest,
            signature,
        })
    }

    /// Serialize the header: packed fields, their CRC32, then 0xFF padding to `SIZE` bytes
    pub fn build(&self) -> Result<[u8; Self::SIZE], Error> {
        let mut packed = Vec::with_capacity(Self::SIZE);

        packed.extend_from_slice(&self.magic.to_le_bytes());
        packed.extend_from_slice(&self.image_size.to_le_bytes());
        packed.extend_from_slice(&self.version.to_bytes());
        packed.extend_from_slice(&self.entry_point.to_le_bytes());
        packed.extend_from_slice(&self.digest);
        packed.extend_from_slice(&self.signature.to_bytes());

        let crc = crc32(&packed);
        packed.extend_from_slice(&crc.to_le_bytes());

        if packed.len() > Self::SIZE {
            Err(Error::HeaderOverflow(packed.len()))?;
        }

        debug!(
            "Header CRC32: 0x{crc:08X}, padding {}B with 0xFF",
            Self::SIZE - packed.len()
        );

        let mut header = [Self::PADDING; Self::SIZE];
        header[..packed.len()].copy_from_slice(&packed);

        Ok(header)
    }

    /// Parse a header from the start of `bytes`, checking its CRC32
    ///
    /// The magic number is not checked; see [`ImageHeader::check_magic`].
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::SIZE {
            Err(Error::SizeMismatch {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?;
        }

        let stored = read_u32(bytes, Self::FIELDS_LEN);
        let computed = crc32(&bytes[..Self::FIELDS_LEN]);

        if stored != computed {
            Err(Error::HeaderCrc { stored, computed })?;
        }

        let mut version = [0; 4];
        version.copy_from_slice(&bytes[8..12]);

        let mut digest = [0; 32];
        digest.copy_from_slice(&bytes[16..48]);

        let mut signature = [0; EcdsaSignature::SIZE];
        signature.copy_from_slice(&bytes[48..Self::FIELDS_LEN]);

        Ok(Self {
            magic: read_u32(bytes, 0),
            image_size: read_u32(bytes, 4),
            version: FirmwareVersion::from_bytes(version),
            entry_point: read_u32(bytes, 12),
            digest,
            signature: EcdsaSignature::from_bytes(&signature),
        })
    }

    /// Check the magic number against the expected one
    pub fn check_magic(&self, magic: u32) -> Result<(), Error> {
        if self.magic != magic {
            Err(Error::HeaderMagic(self.magic))?;
        }

        Ok(())
    }
}

/// Build a header from its individual fields
pub fn build_header(
    magic: u32,
    image_size: u32,
    version: FirmwareVersion,
    entry_point: u32,
    digest: Digest,
    signature: EcdsaSignature,
) -> Result<[u8; ImageHeader::SIZE], Error> {
    ImageHeader {
        magic,
        image_size,
        version,
        entry_point,
        digest,
        signature,
    }
    .build()
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);

    u32::from_le_bytes(word)
}

#[cfg(test)]
mod test {
    use alloc::string::ToString;

    use super::{build_header, FirmwareVersion, ImageHeader};
    use crate::crc::crc32;
    use crate::signature::test::key;
    use crate::signature::EcdsaSignature;
    use crate::Error;

    fn header(image_size: u32) -> ImageHeader {
        ImageHeader {
            magic: 0xDEAD_BEEF,
            image_size,
            version: FirmwareVersion::new(1, 2, 3, 4),
            entry_point: 0x0804_0100,
            digest: core::array::from_fn(|i| i as u8),
            signature: EcdsaSignature::from_bytes(&core::array::from_fn(|i| 0x80 + i as u8)),
        }
    }

    #[test]
    fn layout() {
        let bytes = header(1024).build().unwrap();

        assert_eq!(bytes.len(), ImageHeader::SIZE);
        assert_eq!(ImageHeader::FIELDS_LEN, 112);
        assert_eq!(&bytes[0..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(&bytes[4..8], &1024u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &[1, 2, 3, 4]);
        assert_eq!(&bytes[12..16], &[0x00, 0x01, 0x04, 0x08]);
        assert_eq!(bytes[16], 0);
        assert_eq!(bytes[47], 31);
        assert_eq!(bytes[48], 0x80);
        assert_eq!(bytes[111], 0x80 + 63);
        assert_eq!(
            &bytes[112..116],
            &crc32(&bytes[..112]).to_le_bytes()
        );
        assert!(bytes[116..].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn size_is_fixed() {
        for size in [0, 1, 255, 1024, 1024 * 1024] {
            assert_eq!(header(size).build().unwrap().len(), ImageHeader::SIZE);
        }
    }

    #[test]
    fn parse_round_trip() {
        let header = header(4096);
        let bytes = header.build().unwrap();

        let parsed = ImageHeader::parse(&bytes).unwrap();

        assert_eq!(parsed, header);
        parsed.check_magic(0xDEAD_BEEF).unwrap();
        assert!(matches!(
            parsed.check_magic(0xCAFE_BABE),
            Err(Error::HeaderMagic(0xDEAD_BEEF))
        ));
    }

    #[test]
    fn parse_rejects_corruption() {
        let mut bytes = header(4096).build().unwrap();
        bytes[20] ^= 1;

        assert!(matches!(
            ImageHeader::parse(&bytes),
            Err(Error::HeaderCrc { .. })
        ));
        assert!(matches!(
            ImageHeader::parse(&bytes[..100]),
            Err(Error::SizeMismatch {
                expected: 256,
                actual: 100
            })
        ));
    }

    #[test]
    fn signed_zero_payload() {
        let payload = [0u8; 1024];

        let header = ImageHeader::sign(
            &payload,
            0xDEAD_BEEF,
            FirmwareVersion::new(1, 0, 0, 0),
            0x0804_0100,
            &key(),
        )
        .unwrap();

        assert_eq!(header.image_size, 1024);
        assert_eq!(header.digest, crate::digest(&payload));

        let bytes = build_header(
            header.magic,
            header.image_size,
            header.version,
            header.entry_point,
            header.digest,
            header.signature.clone(),
        )
        .unwrap();

        assert_eq!(bytes, header.build().unwrap());

        let mut crc = [0; 4];
        crc.copy_from_slice(&bytes[ImageHeader::FIELDS_LEN..ImageHeader::UNPADDED_LEN]);
        assert_eq!(
            u32::from_le_bytes(crc),
            crc32(&bytes[..ImageHeader::FIELDS_LEN])
        );
    }

    #[test]
    fn version_parsing() {
        assert_eq!(
            "1.0.0.0".parse::<FirmwareVersion>().unwrap(),
            FirmwareVersion::new(1, 0, 0, 0)
        );
        assert_eq!(
            "2.10.255.7".parse::<FirmwareVersion>().unwrap().to_bytes(),
            [2, 10, 255, 7]
        );
        assert!("1.0.0".parse::<FirmwareVersion>().is_err());
        assert!("1.0.0.0.0".parse::<FirmwareVersion>().is_err());
        assert!("1.0.256.0".parse::<FirmwareVersion>().is_err());
        assert_eq!(FirmwareVersion::new(1, 0, 0, 0).to_string(), "1.0.0.0");
    }
}
