//! Authenticated public-key encryption (NaCl box family).
//!
//! All operations require X25519 keys. Sealed boxes prepend an ephemeral
//! public key and derive the nonce from the two public keys, so they need
//! no separate nonce input.

use crypto_box::aead::{Aead, Nonce};
use crypto_box::{PublicKey, SalsaBox, SecretKey};

use keyfort_common::{Error, Result};

use crate::alg::KeyAlg;
use crate::key::LocalKey;

/// Nonce length for box encryption.
pub const CRYPTO_BOX_NONCE_LENGTH: usize = 24;

fn box_public(key: &LocalKey) -> Result<PublicKey> {
    if key.algorithm() != KeyAlg::X25519 {
        return Err(Error::Input(format!(
            "Box operations require an x25519 key, got '{}'",
            key.algorithm()
        )));
    }
    let bytes: [u8; 32] = key
        .to_public_bytes()?
        .as_slice()
        .try_into()
        .map_err(|_| Error::Input("Invalid X25519 public key".to_string()))?;
    Ok(PublicKey::from(bytes))
}

fn box_secret(key: &LocalKey) -> Result<SecretKey> {
    if key.algorithm() != KeyAlg::X25519 {
        return Err(Error::Input(format!(
            "Box operations require an x25519 key, got '{}'",
            key.algorithm()
        )));
    }
    let bytes: [u8; 32] = key
        .to_secret_bytes()?
        .to_array()
        .ok_or_else(|| Error::Input("Invalid X25519 secret key".to_string()))?;
    Ok(SecretKey::from(bytes))
}

fn box_nonce(nonce: &[u8]) -> Result<Nonce<SalsaBox>> {
    if nonce.len() != CRYPTO_BOX_NONCE_LENGTH {
        return Err(Error::Input(format!(
            "Box nonce must be {} bytes, got {}",
            CRYPTO_BOX_NONCE_LENGTH,
            nonce.len()
        )));
    }
    Ok(*Nonce::<SalsaBox>::from_slice(nonce))
}

/// Generate a random nonce for [`crypto_box`].
pub fn crypto_box_random_nonce() -> Vec<u8> {
    use rand::RngCore;
    let mut nonce = vec![0u8; CRYPTO_BOX_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt a message from the sender to the recipient.
///
/// # Errors
/// - `Input` if either key is not X25519 or the nonce is malformed
pub fn crypto_box(
    recip_key: &LocalKey,
    sender_key: &LocalKey,
    message: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>> {
    let sbox = SalsaBox::new(&box_public(recip_key)?, &box_secret(sender_key)?);
    sbox.encrypt(&box_nonce(nonce)?, message)
        .map_err(|_| Error::Encryption("Box encryption failed".to_string()))
}

/// Decrypt a message from the sender.
///
/// # Errors
/// - `Encryption` on authentication failure
pub fn crypto_box_open(
    recip_key: &LocalKey,
    sender_key: &LocalKey,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>> {
    let sbox = SalsaBox::new(&box_public(sender_key)?, &box_secret(recip_key)?);
    sbox.decrypt(&box_nonce(nonce)?, ciphertext)
        .map_err(|_| Error::Encryption("Box decryption failed".to_string()))
}

/// Anonymously encrypt a message for the recipient.
///
/// Only the recipient's public key is required.
pub fn crypto_box_seal(recip_key: &LocalKey, message: &[u8]) -> Result<Vec<u8>> {
    box_public(recip_key)?
        .seal(&mut rand::rngs::OsRng, message)
        .map_err(|_| Error::Encryption("Sealed box encryption failed".to_string()))
}

/// Decrypt a sealed box with the recipient's keypair.
///
/// # Errors
/// - `Encryption` on authentication failure or truncated input
pub fn crypto_box_seal_open(recip_key: &LocalKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    box_secret(recip_key)?
        .unseal(ciphertext)
        .map_err(|_| Error::Encryption("Sealed box decryption failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> LocalKey {
        LocalKey::generate(KeyAlg::X25519, false).unwrap()
    }

    #[test]
    fn test_box_roundtrip() {
        let sender = keypair();
        let recip = keypair();
        let nonce = crypto_box_random_nonce();
        let message = b"boxed message";

        let recip_public =
            LocalKey::from_public_bytes(KeyAlg::X25519, &recip.to_public_bytes().unwrap()).unwrap();
        let boxed = crypto_box(&recip_public, &sender, message, &nonce).unwrap();
        assert_ne!(boxed, message);

        let sender_public =
            LocalKey::from_public_bytes(KeyAlg::X25519, &sender.to_public_bytes().unwrap())
                .unwrap();
        let opened = crypto_box_open(&recip, &sender_public, &boxed, &nonce).unwrap();
        assert_eq!(opened, message);
    }

    #[test]
    fn test_box_tamper_fails() {
        let sender = keypair();
        let recip = keypair();
        let nonce = crypto_box_random_nonce();
        let mut boxed = crypto_box(&recip, &sender, b"payload", &nonce).unwrap();
        boxed[0] ^= 0x01;
        assert!(matches!(
            crypto_box_open(&recip, &sender, &boxed, &nonce),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_box_wrong_nonce_fails() {
        let sender = keypair();
        let recip = keypair();
        let boxed = crypto_box(&recip, &sender, b"payload", &crypto_box_random_nonce()).unwrap();
        assert!(crypto_box_open(&recip, &sender, &boxed, &crypto_box_random_nonce()).is_err());
    }

    #[test]
    fn test_seal_roundtrip() {
        let recip = keypair();
        let recip_public =
            LocalKey::from_public_bytes(KeyAlg::X25519, &recip.to_public_bytes().unwrap()).unwrap();

        let sealed = crypto_box_seal(&recip_public, b"anonymous message").unwrap();
        let opened = crypto_box_seal_open(&recip, &sealed).unwrap();
        assert_eq!(opened, b"anonymous message");
    }

    #[test]
    fn test_seal_open_requires_secret() {
        let recip = keypair();
        let recip_public =
            LocalKey::from_public_bytes(KeyAlg::X25519, &recip.to_public_bytes().unwrap()).unwrap();
        let sealed = crypto_box_seal(&recip_public, b"message").unwrap();
        assert!(crypto_box_seal_open(&recip_public, &sealed).is_err());
    }

    #[test]
    fn test_non_x25519_key_rejected() {
        let ed = LocalKey::generate(KeyAlg::Ed25519, false).unwrap();
        let x = keypair();
        assert!(matches!(
            crypto_box(&ed, &x, b"m", &crypto_box_random_nonce()),
            Err(Error::Input(_))
        ));
    }
}
