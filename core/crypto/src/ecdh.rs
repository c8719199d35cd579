//! ECDH-ES and ECDH-1PU key agreement in the JOSE style.
//!
//! Shared secrets are expanded with the NIST SP 800-56A Concat KDF using
//! SHA-256. ECDH-1PU (draft-madden-jose-ecdh-1pu) additionally mixes in a
//! static sender key, authenticating the sender to the recipient.

use sha2::{Digest, Sha256};

use keyfort_common::{Error, Result};

use crate::alg::KeyAlg;
use crate::key::{Encrypted, LocalKey};
use crate::secret::SecretBytes;

/// Concat KDF (SP 800-56A section 5.8.1) with SHA-256.
///
/// `cc_tag` is appended to SuppPubInfo when non-empty, as required for
/// ECDH-1PU key wrapping.
fn concat_kdf(
    shared: &[u8],
    alg_id: &[u8],
    apu: &[u8],
    apv: &[u8],
    cc_tag: &[u8],
    key_len: usize,
) -> Result<SecretBytes> {
    if key_len == 0 || key_len > 255 * 32 {
        return Err(Error::Input("Invalid KDF output length".to_string()));
    }
    let mut output = Vec::with_capacity(key_len + 31);
    let mut counter = 1u32;
    while output.len() < key_len {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(shared);
        hasher.update((alg_id.len() as u32).to_be_bytes());
        hasher.update(alg_id);
        hasher.update((apu.len() as u32).to_be_bytes());
        hasher.update(apu);
        hasher.update((apv.len() as u32).to_be_bytes());
        hasher.update(apv);
        hasher.update(((key_len * 8) as u32).to_be_bytes());
        if !cc_tag.is_empty() {
            hasher.update((cc_tag.len() as u32).to_be_bytes());
            hasher.update(cc_tag);
        }
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(key_len);
    Ok(SecretBytes::new(output))
}

/// Anonymous ephemeral-static key agreement (ECDH-ES).
#[derive(Debug, Clone)]
pub struct EcdhEs {
    alg_id: Vec<u8>,
    apu: Vec<u8>,
    apv: Vec<u8>,
}

impl EcdhEs {
    /// Create a derivation context from the JOSE header parameters.
    pub fn new(alg_id: &[u8], apu: &[u8], apv: &[u8]) -> Self {
        Self {
            alg_id: alg_id.to_vec(),
            apu: apu.to_vec(),
            apv: apv.to_vec(),
        }
    }

    /// Derive a key of `key_alg` from an ephemeral-static exchange.
    ///
    /// With `receive` set, `recip_key` holds the recipient's secret and
    /// `ephemeral_key` only the sender's ephemeral public key; otherwise
    /// the roles are reversed.
    pub fn derive_key(
        &self,
        key_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        recip_key: &LocalKey,
        receive: bool,
    ) -> Result<LocalKey> {
        let shared = if receive {
            recip_key.key_exchange_bytes(ephemeral_key)?
        } else {
            ephemeral_key.key_exchange_bytes(recip_key)?
        };
        let derived = concat_kdf(
            shared.as_bytes(),
            &self.alg_id,
            &self.apu,
            &self.apv,
            &[],
            key_alg_len(key_alg)?,
        )?;
        LocalKey::from_secret_bytes(key_alg, derived.as_bytes())
    }

    /// Encrypt a message directly under the derived key.
    pub fn encrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        recip_key: &LocalKey,
        message: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Encrypted> {
        let cek = self.derive_key(enc_alg, ephemeral_key, recip_key, false)?;
        cek.aead_encrypt(message, nonce, aad)
    }

    /// Decrypt a message encrypted with [`EcdhEs::encrypt_direct`].
    pub fn decrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        recip_key: &LocalKey,
        ciphertext: &[u8],
        tag: Option<&[u8]>,
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let cek = self.derive_key(enc_alg, ephemeral_key, recip_key, true)?;
        cek.aead_decrypt(ciphertext, tag, nonce, aad)
    }

    /// Wrap a content encryption key for the recipient.
    pub fn sender_wrap_key(
        &self,
        wrap_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        recip_key: &LocalKey,
        cek: &LocalKey,
    ) -> Result<Encrypted> {
        let kek = self.derive_key(wrap_alg, ephemeral_key, recip_key, false)?;
        kek.wrap_key(cek, &[])
    }

    /// Unwrap a content encryption key as the recipient.
    pub fn receiver_unwrap_key(
        &self,
        wrap_alg: KeyAlg,
        cek_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        recip_key: &LocalKey,
        ciphertext: &[u8],
        tag: Option<&[u8]>,
        nonce: &[u8],
    ) -> Result<LocalKey> {
        let kek = self.derive_key(wrap_alg, ephemeral_key, recip_key, true)?;
        kek.unwrap_key(cek_alg, ciphertext, tag, nonce)
    }
}

/// Authenticated ephemeral-static key agreement (ECDH-1PU).
#[derive(Debug, Clone)]
pub struct Ecdh1Pu {
    alg_id: Vec<u8>,
    apu: Vec<u8>,
    apv: Vec<u8>,
}

impl Ecdh1Pu {
    /// Create a derivation context from the JOSE header parameters.
    pub fn new(alg_id: &[u8], apu: &[u8], apv: &[u8]) -> Self {
        Self {
            alg_id: alg_id.to_vec(),
            apu: apu.to_vec(),
            apv: apv.to_vec(),
        }
    }

    /// Derive a key of `key_alg` from the combined ephemeral and static
    /// exchanges (Z = Ze || Zs).
    ///
    /// `cc_tag` must be the content authentication tag when deriving a key
    /// wrapping key, and empty when deriving for direct encryption.
    pub fn derive_key(
        &self,
        key_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        sender_key: &LocalKey,
        recip_key: &LocalKey,
        receive: bool,
        cc_tag: &[u8],
    ) -> Result<LocalKey> {
        let (ze, zs) = if receive {
            (
                recip_key.key_exchange_bytes(ephemeral_key)?,
                recip_key.key_exchange_bytes(sender_key)?,
            )
        } else {
            (
                ephemeral_key.key_exchange_bytes(recip_key)?,
                sender_key.key_exchange_bytes(recip_key)?,
            )
        };
        let shared = SecretBytes::new({
            let mut buf = Vec::with_capacity(ze.len() + zs.len());
            buf.extend_from_slice(ze.as_bytes());
            buf.extend_from_slice(zs.as_bytes());
            buf
        });
        let derived = concat_kdf(
            shared.as_bytes(),
            &self.alg_id,
            &self.apu,
            &self.apv,
            cc_tag,
            key_alg_len(key_alg)?,
        )?;
        LocalKey::from_secret_bytes(key_alg, derived.as_bytes())
    }

    /// Encrypt a message directly under the derived key.
    pub fn encrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        sender_key: &LocalKey,
        recip_key: &LocalKey,
        message: &[u8],
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Encrypted> {
        let cek = self.derive_key(enc_alg, ephemeral_key, sender_key, recip_key, false, &[])?;
        cek.aead_encrypt(message, nonce, aad)
    }

    /// Decrypt a message encrypted with [`Ecdh1Pu::encrypt_direct`].
    pub fn decrypt_direct(
        &self,
        enc_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        sender_key: &LocalKey,
        recip_key: &LocalKey,
        ciphertext: &[u8],
        tag: Option<&[u8]>,
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let cek = self.derive_key(enc_alg, ephemeral_key, sender_key, recip_key, true, &[])?;
        cek.aead_decrypt(ciphertext, tag, nonce, aad)
    }

    /// Wrap a content encryption key, binding it to the content tag.
    pub fn sender_wrap_key(
        &self,
        wrap_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        sender_key: &LocalKey,
        recip_key: &LocalKey,
        cek: &LocalKey,
        cc_tag: &[u8],
    ) -> Result<Encrypted> {
        let kek = self.derive_key(wrap_alg, ephemeral_key, sender_key, recip_key, false, cc_tag)?;
        kek.wrap_key(cek, &[])
    }

    /// Unwrap a content encryption key as the recipient.
    pub fn receiver_unwrap_key(
        &self,
        wrap_alg: KeyAlg,
        cek_alg: KeyAlg,
        ephemeral_key: &LocalKey,
        sender_key: &LocalKey,
        recip_key: &LocalKey,
        ciphertext: &[u8],
        tag: Option<&[u8]>,
        nonce: &[u8],
        cc_tag: &[u8],
    ) -> Result<LocalKey> {
        let kek = self.derive_key(wrap_alg, ephemeral_key, sender_key, recip_key, true, cc_tag)?;
        kek.unwrap_key(cek_alg, ciphertext, tag, nonce)
    }
}

fn key_alg_len(alg: KeyAlg) -> Result<usize> {
    match alg {
        KeyAlg::Aes128Gcm | KeyAlg::Aes128Kw => Ok(16),
        KeyAlg::Aes256Gcm | KeyAlg::Aes256Kw | KeyAlg::Chacha20C20P | KeyAlg::Chacha20Xc20P => {
            Ok(32)
        }
        _ => Err(Error::Unsupported(format!(
            "Cannot derive a key of algorithm '{}'",
            alg
        ))),
    }
}
