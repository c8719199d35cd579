//! Pass-key derivation for store protection.
//!
//! The store master key is derived from a caller-supplied pass key using
//! Argon2, or decoded directly when the raw key method is used. Argon2 is a
//! memory-hard password hashing function resistant to GPU and time-memory
//! trade-off attacks.

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyfort_common::{Error, Result};

/// Length of the derived master key in bytes (256-bit).
pub const MASTER_KEY_LENGTH: usize = 32;

/// Length of the KDF salt in bytes.
pub const SALT_LENGTH: usize = 16;

/// Master key protecting a store's key wrapping.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; MASTER_KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; MASTER_KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Method used to derive the store master key from a pass key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfMethod {
    /// Argon2i with moderate parameters.
    Argon2iMod,
    /// Argon2i with interactive (lighter) parameters.
    Argon2iInt,
    /// The pass key is itself a base64url-encoded 256-bit key.
    Raw,
    /// No protection: a fixed key is used. Only suitable for testing.
    None,
}

impl KdfMethod {
    /// Canonical URI form, persisted in the store header.
    pub fn as_uri(&self) -> &'static str {
        match self {
            KdfMethod::Argon2iMod => "kdf:argon2i:mod",
            KdfMethod::Argon2iInt => "kdf:argon2i:int",
            KdfMethod::Raw => "raw",
            KdfMethod::None => "none",
        }
    }

    fn argon2_params(&self) -> Option<(u32, u32, u32)> {
        // (memory KiB, iterations, parallelism)
        match self {
            KdfMethod::Argon2iMod => Some((65536, 3, 4)),
            KdfMethod::Argon2iInt => Some((32768, 3, 2)),
            KdfMethod::Raw | KdfMethod::None => None,
        }
    }
}

impl Default for KdfMethod {
    fn default() -> Self {
        KdfMethod::Argon2iMod
    }
}

impl fmt::Display for KdfMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_uri())
    }
}

impl FromStr for KdfMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kdf:argon2i" | "kdf:argon2i:mod" => Ok(KdfMethod::Argon2iMod),
            "kdf:argon2i:int" => Ok(KdfMethod::Argon2iInt),
            "raw" => Ok(KdfMethod::Raw),
            "none" => Ok(KdfMethod::None),
            _ => Err(Error::Unsupported(format!(
                "Unknown key derivation method: {}",
                s
            ))),
        }
    }
}

/// Derive the store master key from a pass key.
///
/// # Preconditions
/// - For Argon2 methods, `pass_key` must not be empty
/// - For the raw method, `pass_key` must be a base64url-encoded 32-byte key
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `Input` if the pass key is empty or a raw key is malformed
pub fn derive_master_key(method: KdfMethod, pass_key: &str, salt: &[u8]) -> Result<MasterKey> {
    match method {
        KdfMethod::Raw => {
            let decoded = URL_SAFE_NO_PAD
                .decode(pass_key)
                .map_err(|_| Error::Input("Invalid raw store key encoding".to_string()))?;
            let key: [u8; MASTER_KEY_LENGTH] = decoded
                .try_into()
                .map_err(|_| Error::Input("Raw store key must be 32 bytes".to_string()))?;
            Ok(MasterKey::from_bytes(key))
        }
        KdfMethod::None => Ok(MasterKey::from_bytes([0u8; MASTER_KEY_LENGTH])),
        KdfMethod::Argon2iMod | KdfMethod::Argon2iInt => {
            if pass_key.is_empty() {
                return Err(Error::Input("Pass key cannot be empty".to_string()));
            }
            let (memory, time, parallelism) = method
                .argon2_params()
                .ok_or_else(|| Error::Unexpected("Missing Argon2 parameters".to_string()))?;
            let params = Params::new(memory, time, parallelism, Some(MASTER_KEY_LENGTH))
                .map_err(|e| Error::Unexpected(format!("Invalid KDF parameters: {}", e)))?;
            let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);

            let mut key = [0u8; MASTER_KEY_LENGTH];
            argon2
                .hash_password_into(pass_key.as_bytes(), salt, &mut key)
                .map_err(|e| Error::Unexpected(format!("Key derivation failed: {}", e)))?;
            Ok(MasterKey::from_bytes(key))
        }
    }
}

/// Generate a new raw store key, suitable for the `raw` key method.
///
/// With a seed the key is derived deterministically using Blake2b;
/// otherwise it is generated at random. The result is base64url encoded.
pub fn generate_raw_key(seed: Option<&[u8]>) -> String {
    let key = match seed {
        Some(seed) => {
            use blake2::digest::consts::U32;
            use blake2::{Blake2b, Digest};

            let mut hasher = Blake2b::<U32>::new();
            hasher.update(seed);
            hasher.update(b"rawkey");
            let result = hasher.finalize();
            let mut key = [0u8; MASTER_KEY_LENGTH];
            key.copy_from_slice(&result);
            key
        }
        None => {
            use rand::RngCore;
            let mut key = [0u8; MASTER_KEY_LENGTH];
            rand::rngs::OsRng.fill_bytes(&mut key);
            key
        }
    };
    URL_SAFE_NO_PAD.encode(key)
}
