//! Cryptographic primitives for Keyfort.
//!
//! This crate provides:
//! - Algorithm-polymorphic key objects with generation, import and export
//! - Signing and verification (EdDSA, ECDSA)
//! - Authenticated encryption (AES-GCM, ChaCha20-Poly1305 variants)
//! - Key wrapping (AES-KW and AEAD-based)
//! - ECDH-ES and ECDH-1PU key agreement in the JOSE style
//! - Authenticated public-key boxes (crypto_box family)
//! - Pass-key derivation for store protection (Argon2)
//!
//! # Security Guarantees
//! - All secret key material is automatically zeroized on drop
//! - No key material is ever logged or exposed through Debug output
//! - Constant-time operations for sensitive comparisons

pub mod alg;
pub mod boxes;
pub mod ecdh;
pub mod jwk;
pub mod kdf;
pub mod key;
pub mod secret;

pub use alg::{KeyAlg, SignatureType};
pub use boxes::{
    crypto_box, crypto_box_open, crypto_box_random_nonce, crypto_box_seal, crypto_box_seal_open,
};
pub use ecdh::{Ecdh1Pu, EcdhEs};
pub use jwk::Jwk;
pub use kdf::{derive_master_key, generate_raw_key, KdfMethod, MasterKey};
pub use key::{Encrypted, LocalKey};
pub use secret::SecretBytes;
