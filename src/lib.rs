//! Utilities for packaging firmware images for the STM32 secure bootloader
//!
//! Two images are produced:
//! - The application image: a 256-byte header (magic, size, version, entry point,
//!   SHA-256 digest, ECDSA P-256 signature and a CRC32 over those fields) followed by
//!   the unmodified application binary.
//! - The bootloader image: the bootloader binary with a 116-byte security block
//!   overwritten at a fixed offset. The block carries the payload-decryption key
//!   (encrypted under a key-encryption key that is never stored), the IV, the
//!   public key used for signature verification and a CRC32 of everything preceding
//!   the block.
//!
//! All checksums use the non-reflected CRC32 computed by the STM32 CRC peripheral
//! in its default configuration.
//!
//! The core is `no_std` (but needs `alloc`), so that it can be reused by other tooling.
//! Secret stores and profile files need the `std` feature.
#![no_std]

use core::fmt::{self, Display};

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod crc;
pub mod header;
pub mod image;
pub mod keys;
pub mod security;
pub mod signature;

#[cfg(feature = "std")]
pub mod config;
#[cfg(feature = "std")]
pub mod secrets;

pub use header::{FirmwareVersion, ImageHeader};
pub use image::{AppMetadata, BootloaderLayout};
pub use keys::{EncryptedKey, Iv, KeyEncryptionKey, KeyMaterial, PayloadDecryptionKey};
pub use security::SecurityBlock;
pub use signature::{EcPublicKey, EcdsaSignature};

/// The P256 crate is re-exported for user convenience
/// so that users of the lib do not have to explicitly depend on it
pub mod p256 {
    pub use ::p256::*;
}

/// SHA-256 digest of a firmware binary
pub type Digest = [u8; 32];

/// Compute the SHA-256 digest of `data`
pub fn digest(data: &[u8]) -> Digest {
    use sha2::Digest as _;

    let mut digest = [0; 32];
    digest.copy_from_slice(&sha2::Sha256::digest(data));

    digest
}

/// Errors that can occur while packaging an image
#[derive(Debug)]
pub enum Error {
    /// IO error while reading a source file, a key file or the secret store
    #[cfg(feature = "std")]
    Io(std::io::Error),
    /// The secret store is malformed or could not be provisioned
    #[cfg(feature = "std")]
    SecretStore(alloc::string::String),
    /// The image profile is malformed
    #[cfg(feature = "std")]
    Config(alloc::string::String),
    /// A required secret is missing, even after provisioning
    SecretUnavailable(&'static str),
    /// A secret is present, but is not a hex string of 16 bytes
    InvalidSecret(&'static str),
    /// The private key is not a P-256 EC key
    KeyFormat,
    /// The ECDSA signature could not be produced
    Signing,
    /// Invalid cipher parameters
    Crypto,
    /// The packed header fields do not fit into the header
    HeaderOverflow(usize),
    /// The header magic number is not the expected one
    HeaderMagic(u32),
    /// The stored header CRC does not match the header fields
    HeaderCrc { stored: u32, computed: u32 },
    /// A payload or buffer does not have the required size
    SizeMismatch { expected: usize, actual: usize },
    /// A write would land outside of the target buffer
    Bounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            #[cfg(feature = "std")]
            Self::Io(e) => write!(f, "IO error: {}", e),
            #[cfg(feature = "std")]
            Self::SecretStore(msg) => write!(f, "Secret store error: {}", msg),
            #[cfg(feature = "std")]
            Self::Config(msg) => write!(f, "Profile error: {}", msg),
            Self::SecretUnavailable(name) => write!(f, "Secret `{}` is not available", name),
            Self::InvalidSecret(name) => {
                write!(f, "Secret `{}` is not a 16-byte hex string", name)
            }
            Self::KeyFormat => write!(f, "Private key is not a PEM-encoded P-256 EC key"),
            Self::Signing => write!(f, "ECDSA signing failed"),
            Self::Crypto => write!(f, "Invalid AES key or IV"),
            Self::HeaderOverflow(len) => write!(
                f,
                "Header fields take {}B, more than the {}B header",
                len,
                ImageHeader::SIZE
            ),
            Self::HeaderMagic(magic) => write!(f, "Unexpected header magic 0x{:08X}", magic),
            Self::HeaderCrc { stored, computed } => write!(
                f,
                "Header CRC mismatch: stored 0x{:08X}, computed 0x{:08X}",
                stored, computed
            ),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "Size mismatch: expected {}B, got {}B", expected, actual)
            }
            Self::Bounds {
                offset,
                len,
                capacity,
            } => write!(
                f,
                "Writing {}B at offset 0x{:X} exceeds the {}B buffer",
                len, offset, capacity
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
