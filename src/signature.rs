//! ECDSA P-256 signing of firmware digests
//!
//! The bootloader expects the signature as `r || s`, each a 32-byte big-endian field,
//! and the public key as the raw `Qx || Qy` coordinates.

use core::fmt::{self, Debug};

use log::debug;

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{DerSignature, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePrivateKey;
use p256::SecretKey;

use crate::{Digest, Error};

/// Width of each signature component and of each public key coordinate
pub const FIELD_LEN: usize = 32;

/// Load an unencrypted PEM P-256 private key, either PKCS#8 or SEC1 encoded
pub fn load_signing_key(pem: &str) -> Result<SigningKey, Error> {
    let pem = pem.trim();

    let secret = SecretKey::from_pkcs8_pem(pem)
        .or_else(|_| SecretKey::from_sec1_pem(pem))
        .map_err(|_| Error::KeyFormat)?;

    Ok(SigningKey::from(secret))
}

/// An ECDSA signature in the fixed-width `r || s` form
#[derive(Clone, PartialEq, Eq)]
pub struct EcdsaSignature {
    r: [u8; FIELD_LEN],
    s: [u8; FIELD_LEN],
}

impl EcdsaSignature {
    pub const SIZE: usize = 2 * FIELD_LEN;

    /// Sign an already computed SHA-256 digest (the digest is not hashed again)
    ///
    /// # Arguments
    /// * `digest` - SHA-256 digest of the firmware
    /// * `key` - P-256 signing key
    pub fn sign(digest: &Digest, key: &SigningKey) -> Result<Self, Error> {
        let signature: Signature = key.sign_prehash(digest).map_err(|_| Error::Signing)?;

        let der: DerSignature = signature.to_der();

        let (r, s) = Signature::from_der(der.as_bytes())
            .map_err(|_| Error::Signing)?
            .split_bytes();

        let this = Self::from_components(&r, &s)?;

        debug!("Signature R: {}", hex::encode_upper(this.r));
        debug!("Signature S: {}", hex::encode_upper(this.s));

        Ok(this)
    }

    /// Create a signature from the big-endian `r` and `s` integers, as found in the DER encoding
    ///
    /// Integers shorter than 32 bytes are left-padded with zeroes.
    pub fn from_components(r: &[u8], s: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            r: fixed_width(r)?,
            s: fixed_width(s)?,
        })
    }

    /// Create a signature from its `r || s` form
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut r = [0; FIELD_LEN];
        let mut s = [0; FIELD_LEN];

        r.copy_from_slice(&bytes[..FIELD_LEN]);
        s.copy_from_slice(&bytes[FIELD_LEN..]);

        Self { r, s }
    }

    pub fn r(&self) -> &[u8; FIELD_LEN] {
        &self.r
    }

    pub fn s(&self) -> &[u8; FIELD_LEN] {
        &self.s
    }

    /// The `r || s` form embedded in the image header
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0; Self::SIZE];

        bytes[..FIELD_LEN].copy_from_slice(&self.r);
        bytes[FIELD_LEN..].copy_from_slice(&self.s);

        bytes
    }
}

impl Debug for EcdsaSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EcdsaSignature")
            .field("r", &hex::encode_upper(self.r))
            .field("s", &hex::encode_upper(self.s))
            .finish()
    }
}

/// Left-pad a big-endian unsigned integer to `FIELD_LEN` bytes
fn fixed_width(int: &[u8]) -> Result<[u8; FIELD_LEN], Error> {
    let leading = int.iter().take_while(|b| **b == 0).count();
    let int = &int[leading..];

    if int.len() > FIELD_LEN {
        Err(Error::Signing)?;
    }

    let mut field = [0; FIELD_LEN];
    field[FIELD_LEN - int.len()..].copy_from_slice(int);

    Ok(field)
}

/// Uncompressed P-256 public key coordinates, big-endian
#[derive(Clone, PartialEq, Eq)]
pub struct EcPublicKey {
    pub qx: [u8; FIELD_LEN],
    pub qy: [u8; FIELD_LEN],
}

impl EcPublicKey {
    pub const SIZE: usize = 2 * FIELD_LEN;

    /// Extract the public key of a signing key
    pub fn extract(key: &SigningKey) -> Result<Self, Error> {
        let point = key.verifying_key().as_affine().to_encoded_point(false);

        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(Error::KeyFormat);
        };

        let mut this = Self {
            qx: [0; FIELD_LEN],
            qy: [0; FIELD_LEN],
        };

        this.qx.copy_from_slice(x);
        this.qy.copy_from_slice(y);

        Ok(this)
    }

    /// Extract the public key from an unencrypted PEM P-256 private key
    pub fn from_private_pem(pem: &str) -> Result<Self, Error> {
        Self::extract(&load_signing_key(pem)?)
    }
}

impl Debug for EcPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EcPublicKey")
            .field("qx", &hex::encode_upper(self.qx))
            .field("qy", &hex::encode_upper(self.qy))
            .finish()
    }
}
