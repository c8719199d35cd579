//! Supported key algorithms and their capabilities.
//!
//! Capability queries are pure functions of the algorithm tag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use keyfort_common::{Error, Result};

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlg {
    /// AES-128-GCM authenticated encryption.
    Aes128Gcm,
    /// AES-256-GCM authenticated encryption.
    Aes256Gcm,
    /// AES-128 key wrapping (RFC 3394).
    Aes128Kw,
    /// AES-256 key wrapping (RFC 3394).
    Aes256Kw,
    /// ChaCha20-Poly1305 authenticated encryption.
    Chacha20C20P,
    /// XChaCha20-Poly1305 authenticated encryption.
    Chacha20Xc20P,
    /// Ed25519 signing key.
    Ed25519,
    /// X25519 key agreement key.
    X25519,
    /// secp256k1 signing/agreement key.
    EcSecp256k1,
    /// NIST P-256 signing/agreement key.
    EcSecp256r1,
    /// NIST P-384 signing/agreement key.
    EcSecp384r1,
    /// BLS12-381 key in the G1 group.
    Bls12381G1,
    /// BLS12-381 key in the G2 group.
    Bls12381G2,
}

impl KeyAlg {
    /// Canonical string identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlg::Aes128Gcm => "a128gcm",
            KeyAlg::Aes256Gcm => "a256gcm",
            KeyAlg::Aes128Kw => "a128kw",
            KeyAlg::Aes256Kw => "a256kw",
            KeyAlg::Chacha20C20P => "c20p",
            KeyAlg::Chacha20Xc20P => "xc20p",
            KeyAlg::Ed25519 => "ed25519",
            KeyAlg::X25519 => "x25519",
            KeyAlg::EcSecp256k1 => "k256",
            KeyAlg::EcSecp256r1 => "p256",
            KeyAlg::EcSecp384r1 => "p384",
            KeyAlg::Bls12381G1 => "bls12381g1",
            KeyAlg::Bls12381G2 => "bls12381g2",
        }
    }

    /// Whether keys of this algorithm can produce signatures.
    pub fn can_sign(&self) -> bool {
        matches!(
            self,
            KeyAlg::Ed25519 | KeyAlg::EcSecp256k1 | KeyAlg::EcSecp256r1 | KeyAlg::EcSecp384r1
        )
    }

    /// Whether keys of this algorithm support Diffie-Hellman key agreement.
    pub fn can_exchange(&self) -> bool {
        matches!(
            self,
            KeyAlg::X25519 | KeyAlg::EcSecp256k1 | KeyAlg::EcSecp256r1 | KeyAlg::EcSecp384r1
        )
    }

    /// Whether keys of this algorithm support AEAD encryption.
    pub fn can_aead(&self) -> bool {
        matches!(
            self,
            KeyAlg::Aes128Gcm | KeyAlg::Aes256Gcm | KeyAlg::Chacha20C20P | KeyAlg::Chacha20Xc20P
        )
    }

    /// Whether this is a symmetric algorithm.
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            KeyAlg::Aes128Gcm
                | KeyAlg::Aes256Gcm
                | KeyAlg::Aes128Kw
                | KeyAlg::Aes256Kw
                | KeyAlg::Chacha20C20P
                | KeyAlg::Chacha20Xc20P
        )
    }

    /// Secret key length in bytes for symmetric and OKP algorithms.
    pub(crate) fn secret_length(&self) -> usize {
        match self {
            KeyAlg::Aes128Gcm | KeyAlg::Aes128Kw => 16,
            KeyAlg::Aes256Gcm
            | KeyAlg::Aes256Kw
            | KeyAlg::Chacha20C20P
            | KeyAlg::Chacha20Xc20P => 32,
            KeyAlg::Ed25519 | KeyAlg::X25519 | KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2 => 32,
            KeyAlg::EcSecp256k1 | KeyAlg::EcSecp256r1 => 32,
            KeyAlg::EcSecp384r1 => 48,
        }
    }
}

impl fmt::Display for KeyAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "a128gcm" => Ok(KeyAlg::Aes128Gcm),
            "a256gcm" => Ok(KeyAlg::Aes256Gcm),
            "a128kw" => Ok(KeyAlg::Aes128Kw),
            "a256kw" => Ok(KeyAlg::Aes256Kw),
            "c20p" => Ok(KeyAlg::Chacha20C20P),
            "xc20p" => Ok(KeyAlg::Chacha20Xc20P),
            "ed25519" => Ok(KeyAlg::Ed25519),
            "x25519" => Ok(KeyAlg::X25519),
            "k256" => Ok(KeyAlg::EcSecp256k1),
            "p256" => Ok(KeyAlg::EcSecp256r1),
            "p384" => Ok(KeyAlg::EcSecp384r1),
            "bls12381g1" => Ok(KeyAlg::Bls12381G1),
            "bls12381g2" => Ok(KeyAlg::Bls12381G2),
            _ => Err(Error::Unsupported(format!("Unknown key algorithm: {}", s))),
        }
    }
}

/// Supported signature algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureType {
    /// Ed25519 signature (EdDSA).
    EdDSA,
    /// ECDSA with P-256 and SHA-256.
    ES256,
    /// ECDSA with secp256k1 and SHA-256.
    ES256K,
    /// ECDSA with P-384 and SHA-384.
    ES384,
}

impl SignatureType {
    /// The signature type a key algorithm produces by default.
    pub fn for_alg(alg: KeyAlg) -> Result<Self> {
        match alg {
            KeyAlg::Ed25519 => Ok(SignatureType::EdDSA),
            KeyAlg::EcSecp256r1 => Ok(SignatureType::ES256),
            KeyAlg::EcSecp256k1 => Ok(SignatureType::ES256K),
            KeyAlg::EcSecp384r1 => Ok(SignatureType::ES384),
            _ => Err(Error::Unsupported(format!(
                "Signing is not supported for key algorithm '{}'",
                alg
            ))),
        }
    }
}

impl FromStr for SignatureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eddsa" | "EdDSA" => Ok(SignatureType::EdDSA),
            "es256" | "ES256" => Ok(SignatureType::ES256),
            "es256k" | "ES256K" => Ok(SignatureType::ES256K),
            "es384" | "ES384" => Ok(SignatureType::ES384),
            _ => Err(Error::Unsupported(format!(
                "Unknown signature type: {}",
                s
            ))),
        }
    }
}
