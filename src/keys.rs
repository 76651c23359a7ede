//! Key material for the bootloader security block
//!
//! The firmware is decrypted on-chip with the payload-decryption key (`AES_KEY1`).
//! That key only ever leaves this module encrypted, under the key-encryption key
//! (`AES_KEY2`), which is never embedded in any image. Keeping the two as distinct
//! types means the security block can only be built from an [`EncryptedKey`].
//!
//! Key encryption is AES-128-CBC with PKCS#7 padding, matching the bootloader's
//! AES peripheral configuration (128-bit keys).

use core::fmt::{self, Debug};

use aes::Aes128;

use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};

use crate::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Length of every key and of the IV
pub const KEY_LEN: usize = 16;

/// Length of the encrypted payload-decryption key (one key block plus one padding block)
pub const ENCRYPTED_KEY_LEN: usize = 32;

/// Decode a hex secret into exactly `KEY_LEN` bytes
fn decode(name: &'static str, hex_str: &str) -> Result<[u8; KEY_LEN], Error> {
    let mut bytes = [0; KEY_LEN];

    hex::decode_to_slice(hex_str.trim(), &mut bytes).map_err(|_| Error::InvalidSecret(name))?;

    Ok(bytes)
}

/// `AES_KEY1`: the key the bootloader uses to decrypt the firmware
#[derive(Clone)]
pub struct PayloadDecryptionKey([u8; KEY_LEN]);

impl PayloadDecryptionKey {
    pub const fn new(key: [u8; KEY_LEN]) -> Self {
        Self(key)
    }

    pub fn from_hex(name: &'static str, hex_str: &str) -> Result<Self, Error> {
        decode(name, hex_str).map(Self)
    }
}

/// `AES_KEY2`: protects [`PayloadDecryptionKey`] and is never stored in an image
#[derive(Clone)]
pub struct KeyEncryptionKey([u8; KEY_LEN]);

impl KeyEncryptionKey {
    pub const fn new(key: [u8; KEY_LEN]) -> Self {
        Self(key)
    }

    pub fn from_hex(name: &'static str, hex_str: &str) -> Result<Self, Error> {
        decode(name, hex_str).map(Self)
    }

    /// Encrypt the payload-decryption key with this key, using AES-128-CBC and PKCS#7 padding
    ///
    /// # Arguments
    /// * `key` - The key to encrypt
    /// * `iv` - The CBC initialization vector
    pub fn wrap(&self, key: &PayloadDecryptionKey, iv: &Iv) -> Result<EncryptedKey, Error> {
        let mut out = [0; ENCRYPTED_KEY_LEN];

        let encrypted = Aes128CbcEnc::new_from_slices(&self.0, &iv.0)
            .map_err(|_| Error::Crypto)?
            .encrypt_padded_b2b_mut::<Pkcs7>(&key.0, &mut out)
            .map_err(|_| Error::Crypto)?;

        if encrypted.len() != ENCRYPTED_KEY_LEN {
            Err(Error::SizeMismatch {
                expected: ENCRYPTED_KEY_LEN,
                actual: encrypted.len(),
            })?;
        }

        Ok(EncryptedKey(out))
    }
}

/// AES-CBC initialization vector. Stored in the image alongside the encrypted key
#[derive(Clone, PartialEq, Eq)]
pub struct Iv([u8; KEY_LEN]);

impl Iv {
    pub const fn new(iv: [u8; KEY_LEN]) -> Self {
        Self(iv)
    }

    pub fn from_hex(name: &'static str, hex_str: &str) -> Result<Self, Error> {
        decode(name, hex_str).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// The payload-decryption key, encrypted under the key-encryption key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedKey([u8; ENCRYPTED_KEY_LEN]);

impl EncryptedKey {
    pub fn as_bytes(&self) -> &[u8; ENCRYPTED_KEY_LEN] {
        &self.0
    }
}

/// The three secrets needed to build a security block
#[derive(Clone)]
pub struct KeyMaterial {
    pub payload_key: PayloadDecryptionKey,
    pub kek: KeyEncryptionKey,
    pub iv: Iv,
}

impl KeyMaterial {
    /// Encrypt the payload-decryption key for embedding
    pub fn encrypted_key(&self) -> Result<EncryptedKey, Error> {
        self.kek.wrap(&self.payload_key, &self.iv)
    }
}

impl Debug for PayloadDecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("PayloadDecryptionKey(..)")
    }
}

impl Debug for KeyEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("KeyEncryptionKey(..)")
    }
}

impl Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Iv({})", hex::encode_upper(self.0))
    }
}

impl Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EncryptedKey({})", hex::encode_upper(self.0))
    }
}

impl Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("payload_key", &self.payload_key)
            .field("kek", &self.kek)
            .field("iv", &self.iv)
            .finish()
    }
}
