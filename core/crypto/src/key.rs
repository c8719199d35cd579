//! Algorithm-polymorphic key objects.
//!
//! A `LocalKey` holds the secret and/or public material for one of the
//! supported algorithms. Keys are immutable after creation; conversions and
//! derivations produce new key objects. Secret material is zeroized on drop.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};

use keyfort_common::{Error, Result};

use crate::alg::{KeyAlg, SignatureType};
use crate::secret::SecretBytes;

/// Authentication tag length for all supported AEAD algorithms.
pub const AEAD_TAG_LENGTH: usize = 16;

/// The output of an AEAD encryption or key wrapping operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    /// Ciphertext, without the authentication tag.
    pub ciphertext: Vec<u8>,
    /// Authentication tag (empty for AES-KW wrapping).
    pub tag: Vec<u8>,
    /// Nonce used (empty for AES-KW wrapping).
    pub nonce: Vec<u8>,
}

impl Encrypted {
    /// Ciphertext and tag concatenated, the common wire form.
    pub fn ciphertext_with_tag(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ciphertext.len() + self.tag.len());
        buf.extend_from_slice(&self.ciphertext);
        buf.extend_from_slice(&self.tag);
        buf
    }
}

/// An in-memory cryptographic key.
#[derive(Debug, Clone)]
pub struct LocalKey {
    alg: KeyAlg,
    ephemeral: bool,
    secret: Option<SecretBytes>,
    // Encoded public key: raw 32 bytes for OKP, compressed SEC1 for EC
    // curves, compressed group element for BLS. None for symmetric keys.
    public: Option<Vec<u8>>,
}

impl LocalKey {
    /// Generate a new random key for the given algorithm.
    ///
    /// # Errors
    /// - `Unsupported` if the algorithm has no generation capability
    pub fn generate(alg: KeyAlg, ephemeral: bool) -> Result<Self> {
        let secret = match alg {
            KeyAlg::Aes128Gcm
            | KeyAlg::Aes256Gcm
            | KeyAlg::Aes128Kw
            | KeyAlg::Aes256Kw
            | KeyAlg::Chacha20C20P
            | KeyAlg::Chacha20Xc20P => SecretBytes::random(alg.secret_length()),
            KeyAlg::Ed25519 | KeyAlg::X25519 => SecretBytes::random(32),
            KeyAlg::EcSecp256k1 | KeyAlg::EcSecp256r1 | KeyAlg::EcSecp384r1 => {
                // Rejection-sample until the bytes form a valid scalar
                loop {
                    let candidate = SecretBytes::random(alg.secret_length());
                    if ec_secret_is_valid(alg, candidate.as_bytes()) {
                        break candidate;
                    }
                }
            }
            KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2 => {
                use rand::RngCore;
                let mut wide = [0u8; 64];
                rand::rngs::OsRng.fill_bytes(&mut wide);
                let scalar = bls12_381::Scalar::from_bytes_wide(&wide);
                SecretBytes::new(bls_scalar_to_bytes(&scalar))
            }
        };
        let public = derive_public(alg, secret.as_bytes())?;
        Ok(Self {
            alg,
            ephemeral,
            secret: Some(secret),
            public,
        })
    }

    /// Create a key deterministically from a seed.
    ///
    /// # Errors
    /// - `Input` if the seed length is invalid for the algorithm
    pub fn from_seed(alg: KeyAlg, seed: &[u8]) -> Result<Self> {
        let secret = match alg {
            KeyAlg::Aes128Gcm
            | KeyAlg::Aes256Gcm
            | KeyAlg::Aes128Kw
            | KeyAlg::Aes256Kw
            | KeyAlg::Chacha20C20P
            | KeyAlg::Chacha20Xc20P => {
                let len = alg.secret_length();
                if seed.len() == len {
                    SecretBytes::from(seed)
                } else {
                    SecretBytes::new(blake2_derive(seed, len))
                }
            }
            KeyAlg::Ed25519 | KeyAlg::X25519 => {
                if seed.len() != 32 {
                    return Err(Error::Input(format!(
                        "Seed for '{}' must be 32 bytes",
                        alg
                    )));
                }
                SecretBytes::from(seed)
            }
            KeyAlg::EcSecp256k1 | KeyAlg::EcSecp256r1 | KeyAlg::EcSecp384r1 => {
                if !ec_secret_is_valid(alg, seed) {
                    return Err(Error::Input(format!(
                        "Seed is not a valid '{}' secret scalar",
                        alg
                    )));
                }
                SecretBytes::from(seed)
            }
            KeyAlg::Bls12381G1 | KeyAlg::Bls12381G2 => {
                if seed.len() < 32 {
                    return Err(Error::Input(
                        "Seed for BLS key generation must be at least 32 bytes".to_string(),
                    ));
                }
                SecretBytes::new(bls_keygen(seed)?)
            }
        };
        let public = derive_public(alg, secret.as_bytes())?;
        Ok(Self {
            alg,
            ephemeral: false,
            secret: Some(secret),
            public,
        })
    }

    /// Import a key from its secret bytes.
    ///
    /// # Errors
    /// - `Input` on length mismatch or invalid key data
    pub fn from_secret_bytes(alg: KeyAlg, secret: &[u8]) -> Result<Self> {
        if secret.len() != alg.secret_length() {
            return Err(Error::Input(format!(
                "Secret key for '{}' must be {} bytes, got {}",
                alg,
                alg.secret_length(),
                secret.len()
            )));
        }
        if matches!(
            alg,
            KeyAlg::EcSecp256k1 | KeyAlg::EcSecp256r1 | KeyAlg::EcSecp384r1
        ) && !ec_secret_is_valid(alg, secret)
        {
            return Err(Error::Input(format!(
                "Invalid secret scalar for '{}'",
                alg
            )));
        }
        let secret = SecretBytes::from(secret);
        let public = derive_public(alg, secret.as_bytes())?;
        Ok(Self {
            alg,
            ephemeral: false,
            secret: Some(secret),
            public,
        })
    }

    /// Import a verification/agreement key from its public bytes.
    ///
    /// # Errors
    /// - `Unsupported` for symmetric algorithms
    /// - `Input` on malformed public key data
    pub fn from_public_bytes(alg: KeyAlg, public: &[u8]) -> Result<Self> {
        let canonical = validate_public(alg, public)?;
        Ok(Self {
            alg,
            ephemeral: false,
            secret: None,
            public: Some(canonical),
        })
    }

    /// Construct a new key of `alg` from a Diffie-Hellman exchange between
    /// `sk` (holding secret material) and `pk` (holding public material).
    ///
    /// # Errors
    /// - `Input` if the key algorithms differ or the shared secret length
    ///   does not match the target algorithm
    /// - `Unsupported` if the keys cannot perform key agreement
    pub fn from_key_exchange(alg: KeyAlg, sk: &LocalKey, pk: &LocalKey) -> Result<Self> {
        let shared = sk.key_exchange_bytes(pk)?;
        Self::from_secret_bytes(alg, shared.as_bytes())
    }

    /// The key's algorithm.
    pub fn algorithm(&self) -> KeyAlg {
        self.alg
    }

    /// Whether the key was created as ephemeral (not intended for storage).
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Whether the key carries secret material.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Export the public key bytes.
    ///
    /// # Errors
    /// - `Unsupported` for symmetric algorithms
    pub fn to_public_bytes(&self) -> Result<Vec<u8>> {
        self.public.clone().ok_or_else(|| {
            Error::Unsupported(format!(
                "Key algorithm '{}' has no public key representation",
                self.alg
            ))
        })
    }

    /// Export the secret key bytes.
    ///
    /// # Errors
    /// - `Input` if the key holds no secret material
    pub fn to_secret_bytes(&self) -> Result<SecretBytes> {
        self.secret
            .clone()
            .ok_or_else(|| Error::Input("Key has no secret material".to_string()))
    }

    /// Sign a message with this key.
    ///
    /// # Errors
    /// - `Unsupported` if the key cannot sign or the signature type does
    ///   not match the key algorithm
    /// - `Input` if the key holds no secret material
    pub fn sign_message(&self, message: &[u8], sig_type: Option<SignatureType>) -> Result<Vec<u8>> {
        let expected = SignatureType::for_alg(self.alg)?;
        if let Some(requested) = sig_type {
            if requested != expected {
                return Err(Error::Unsupported(format!(
                    "Signature type {:?} is not supported for key algorithm '{}'",
                    requested, self.alg
                )));
            }
        }
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::Input("Key has no secret material".to_string()))?;

        match self.alg {
            KeyAlg::Ed25519 => {
                use ed25519_dalek::{Signer, SigningKey};
                let bytes: [u8; 32] = secret
                    .to_array()
                    .ok_or_else(|| Error::Unexpected("Corrupt Ed25519 secret".to_string()))?;
                let signing = SigningKey::from_bytes(&bytes);
                Ok(signing.sign(message).to_bytes().to_vec())
            }
            KeyAlg::EcSecp256r1 => {
                use p256::ecdsa::{signature::Signer, Signature, SigningKey};
                let signing = SigningKey::from_slice(secret.as_bytes())
                    .map_err(|_| Error::Unexpected("Corrupt P-256 secret".to_string()))?;
                let sig: Signature = signing.sign(message);
                Ok(sig.to_bytes().to_vec())
            }
            KeyAlg::EcSecp256k1 => {
                use k256::ecdsa::{signature::Signer, Signature, SigningKey};
                let signing = SigningKey::from_slice(secret.as_bytes())
                    .map_err(|_| Error::Unexpected("Corrupt secp256k1 secret".to_string()))?;
                let sig: Signature = signing.sign(message);
                Ok(sig.to_bytes().to_vec())
            }
            KeyAlg::EcSecp384r1 => {
                use p384::ecdsa::{signature::Signer, Signature, SigningKey};
                let signing = SigningKey::from_slice(secret.as_bytes())
                    .map_err(|_| Error::Unexpected("Corrupt P-384 secret".to_string()))?;
                let sig: Signature = signing.sign(message);
                Ok(sig.to_bytes().to_vec())
            }
            _ => Err(Error::Unsupported(format!(
                "Signing is not supported for key algorithm '{}'",
                self.alg
            ))),
        }
    }

    /// Verify a signature over a message.
    ///
    /// Returns `false` for a well-formed but invalid signature.
    ///
    /// # Errors
    /// - `Unsupported` if the key cannot verify signatures
    /// - `Input` on a malformed signature (wrong length)
    pub fn verify_signature(
        &self,
        message: &[u8],
        signature: &[u8],
        sig_type: Option<SignatureType>,
    ) -> Result<bool> {
        let expected = SignatureType::for_alg(self.alg)?;
        if let Some(requested) = sig_type {
            if requested != expected {
                return Err(Error::Unsupported(format!(
                    "Signature type {:?} is not supported for key algorithm '{}'",
                    requested, self.alg
                )));
            }
        }
        let public = self.to_public_bytes()?;

        match self.alg {
            KeyAlg::Ed25519 => {
                use ed25519_dalek::{Signature, Verifier, VerifyingKey};
                let bytes: [u8; 32] = public
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Unexpected("Corrupt Ed25519 public key".to_string()))?;
                let verifying = VerifyingKey::from_bytes(&bytes)
                    .map_err(|_| Error::Input("Invalid Ed25519 public key".to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|_| Error::Input("Malformed Ed25519 signature".to_string()))?;
                Ok(verifying.verify(message, &sig).is_ok())
            }
            KeyAlg::EcSecp256r1 => {
                use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
                let verifying = VerifyingKey::from_sec1_bytes(&public)
                    .map_err(|_| Error::Input("Invalid P-256 public key".to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|_| Error::Input("Malformed ECDSA signature".to_string()))?;
                Ok(verifying.verify(message, &sig).is_ok())
            }
            KeyAlg::EcSecp256k1 => {
                use k256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
                let verifying = VerifyingKey::from_sec1_bytes(&public)
                    .map_err(|_| Error::Input("Invalid secp256k1 public key".to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|_| Error::Input("Malformed ECDSA signature".to_string()))?;
                Ok(verifying.verify(message, &sig).is_ok())
            }
            KeyAlg::EcSecp384r1 => {
                use p384::ecdsa::{signature::Verifier, Signature, VerifyingKey};
                let verifying = VerifyingKey::from_sec1_bytes(&public)
                    .map_err(|_| Error::Input("Invalid P-384 public key".to_string()))?;
                let sig = Signature::from_slice(signature)
                    .map_err(|_| Error::Input("Malformed ECDSA signature".to_string()))?;
                Ok(verifying.verify(message, &sig).is_ok())
            }
            _ => Err(Error::Unsupported(format!(
                "Verification is not supported for key algorithm '{}'",
                self.alg
            ))),
        }
    }

    /// AEAD parameters for this key: (nonce length, tag length).
    ///
    /// # Errors
    /// - `Unsupported` if the key is not AEAD-capable
    pub fn aead_params(&self) -> Result<(usize, usize)> {
        match self.alg {
            KeyAlg::Aes128Gcm | KeyAlg::Aes256Gcm | KeyAlg::Chacha20C20P => {
                Ok((12, AEAD_TAG_LENGTH))
            }
            KeyAlg::Chacha20Xc20P => Ok((24, AEAD_TAG_LENGTH)),
            _ => Err(Error::Unsupported(format!(
                "AEAD is not supported for key algorithm '{}'",
                self.alg
            ))),
        }
    }

    /// Generate a random nonce of the correct length for this key.
    pub fn aead_random_nonce(&self) -> Result<Vec<u8>> {
        use rand::RngCore;
        let (nonce_len, _) = self.aead_params()?;
        let mut nonce = vec![0u8; nonce_len];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Ok(nonce)
    }

    /// Encrypt a message with authenticated encryption.
    ///
    /// A nonce is generated when `nonce` is empty.
    ///
    /// # Errors
    /// - `Unsupported` if the key is not AEAD-capable
    /// - `Input` on a nonce of the wrong length
    pub fn aead_encrypt(&self, message: &[u8], nonce: &[u8], aad: &[u8]) -> Result<Encrypted> {
        let (nonce_len, _) = self.aead_params()?;
        let nonce = if nonce.is_empty() {
            self.aead_random_nonce()?
        } else if nonce.len() != nonce_len {
            return Err(Error::Input(format!(
                "Nonce must be {} bytes for '{}', got {}",
                nonce_len,
                self.alg,
                nonce.len()
            )));
        } else {
            nonce.to_vec()
        };
        let key = self.to_secret_bytes()?;

        let mut combined = match self.alg {
            KeyAlg::Aes128Gcm => {
                encrypt_with::<aes_gcm::Aes128Gcm>(key.as_bytes(), &nonce, message, aad)?
            }
            KeyAlg::Aes256Gcm => {
                encrypt_with::<aes_gcm::Aes256Gcm>(key.as_bytes(), &nonce, message, aad)?
            }
            KeyAlg::Chacha20C20P => {
                encrypt_with::<ChaCha20Poly1305>(key.as_bytes(), &nonce, message, aad)?
            }
            KeyAlg::Chacha20Xc20P => {
                encrypt_with::<XChaCha20Poly1305>(key.as_bytes(), &nonce, message, aad)?
            }
            _ => unreachable!("checked by aead_params"),
        };
        let tag = combined.split_off(combined.len() - AEAD_TAG_LENGTH);
        Ok(Encrypted {
            ciphertext: combined,
            tag,
            nonce,
        })
    }

    /// Decrypt and authenticate a message.
    ///
    /// The tag may be passed separately or appended to the ciphertext.
    ///
    /// # Errors
    /// - `Encryption` on authentication failure (tampered data or wrong key)
    /// - `Input` on malformed nonce or truncated ciphertext
    pub fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        tag: Option<&[u8]>,
        nonce: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        let (nonce_len, _) = self.aead_params()?;
        if nonce.len() != nonce_len {
            return Err(Error::Input(format!(
                "Nonce must be {} bytes for '{}', got {}",
                nonce_len,
                self.alg,
                nonce.len()
            )));
        }
        let combined = match tag {
            Some(tag) => {
                let mut buf = Vec::with_capacity(ciphertext.len() + tag.len());
                buf.extend_from_slice(ciphertext);
                buf.extend_from_slice(tag);
                buf
            }
            None => ciphertext.to_vec(),
        };
        if combined.len() < AEAD_TAG_LENGTH {
            return Err(Error::Input("Ciphertext too short".to_string()));
        }
        let key = self.to_secret_bytes()?;

        match self.alg {
            KeyAlg::Aes128Gcm => {
                decrypt_with::<aes_gcm::Aes128Gcm>(key.as_bytes(), nonce, &combined, aad)
            }
            KeyAlg::Aes256Gcm => {
                decrypt_with::<aes_gcm::Aes256Gcm>(key.as_bytes(), nonce, &combined, aad)
            }
            KeyAlg::Chacha20C20P => {
                decrypt_with::<ChaCha20Poly1305>(key.as_bytes(), nonce, &combined, aad)
            }
            KeyAlg::Chacha20Xc20P => {
                decrypt_with::<XChaCha20Poly1305>(key.as_bytes(), nonce, &combined, aad)
            }
            _ => unreachable!("checked by aead_params"),
        }
    }

    /// Wrap another key's secret material under this key.
    ///
    /// AES-KW keys use RFC 3394 wrapping (no nonce); AEAD-capable keys
    /// encrypt the secret bytes with an optional caller-supplied nonce.
    ///
    /// # Errors
    /// - `Unsupported` if this key cannot wrap
    /// - `Input` if the other key holds no secret material
    pub fn wrap_key(&self, other: &LocalKey, nonce: &[u8]) -> Result<Encrypted> {
        let payload = other.to_secret_bytes()?;
        match self.alg {
            KeyAlg::Aes128Kw | KeyAlg::Aes256Kw => {
                let wrapped = kw_wrap(self, payload.as_bytes())?;
                Ok(Encrypted {
                    ciphertext: wrapped,
                    tag: Vec::new(),
                    nonce: Vec::new(),
                })
            }
            _ if self.alg.can_aead() => self.aead_encrypt(payload.as_bytes(), nonce, &[]),
            _ => Err(Error::Unsupported(format!(
                "Key wrapping is not supported for key algorithm '{}'",
                self.alg
            ))),
        }
    }

    /// Unwrap a key previously wrapped under this key.
    ///
    /// # Errors
    /// - `Encryption` on authentication failure
    pub fn unwrap_key(
        &self,
        alg: KeyAlg,
        ciphertext: &[u8],
        tag: Option<&[u8]>,
        nonce: &[u8],
    ) -> Result<LocalKey> {
        let secret = match self.alg {
            KeyAlg::Aes128Kw | KeyAlg::Aes256Kw => SecretBytes::new(kw_unwrap(self, ciphertext)?),
            _ if self.alg.can_aead() => {
                SecretBytes::new(self.aead_decrypt(ciphertext, tag, nonce, &[])?)
            }
            _ => {
                return Err(Error::Unsupported(format!(
                    "Key unwrapping is not supported for key algorithm '{}'",
                    self.alg
                )))
            }
        };
        LocalKey::from_secret_bytes(alg, secret.as_bytes())
    }

    /// Convert this key to an equivalent key of another algorithm.
    ///
    /// Supports Ed25519 to X25519 conversion (secret or public).
    ///
    /// # Errors
    /// - `Unsupported` for any other conversion
    pub fn convert_key(&self, alg: KeyAlg) -> Result<LocalKey> {
        match (self.alg, alg) {
            (KeyAlg::Ed25519, KeyAlg::X25519) => {
                if let Some(secret) = &self.secret {
                    use ed25519_dalek::SigningKey;
                    let bytes: [u8; 32] = secret
                        .to_array()
                        .ok_or_else(|| Error::Unexpected("Corrupt Ed25519 secret".to_string()))?;
                    let scalar = SigningKey::from_bytes(&bytes).to_scalar_bytes();
                    LocalKey::from_secret_bytes(KeyAlg::X25519, &scalar)
                } else {
                    use ed25519_dalek::VerifyingKey;
                    let public = self.to_public_bytes()?;
                    let bytes: [u8; 32] = public.as_slice().try_into().map_err(|_| {
                        Error::Unexpected("Corrupt Ed25519 public key".to_string())
                    })?;
                    let verifying = VerifyingKey::from_bytes(&bytes)
                        .map_err(|_| Error::Input("Invalid Ed25519 public key".to_string()))?;
                    let montgomery = verifying.to_montgomery().to_bytes();
                    LocalKey::from_public_bytes(KeyAlg::X25519, &montgomery)
                }
            }
            (from, to) => Err(Error::Unsupported(format!(
                "Conversion from '{}' to '{}' is not supported",
                from, to
            ))),
        }
    }

    /// Compute the raw Diffie-Hellman shared secret with another key.
    ///
    /// # Errors
    /// - `Input` if the key algorithms differ or material is missing
    /// - `Unsupported` if the algorithm cannot perform key agreement
    pub fn key_exchange_bytes(&self, other: &LocalKey) -> Result<SecretBytes> {
        if self.alg != other.alg {
            return Err(Error::Input(format!(
                "Key exchange requires matching algorithms: '{}' vs '{}'",
                self.alg, other.alg
            )));
        }
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::Input("Key has no secret material".to_string()))?;
        let public = other.to_public_bytes()?;

        match self.alg {
            KeyAlg::X25519 => {
                use x25519_dalek::{PublicKey, StaticSecret};
                let sk_bytes: [u8; 32] = secret
                    .to_array()
                    .ok_or_else(|| Error::Unexpected("Corrupt X25519 secret".to_string()))?;
                let pk_bytes: [u8; 32] = public
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Input("Invalid X25519 public key".to_string()))?;
                let shared = StaticSecret::from(sk_bytes).diffie_hellman(&PublicKey::from(pk_bytes));
                Ok(SecretBytes::from(shared.as_bytes().as_slice()))
            }
            KeyAlg::EcSecp256r1 => {
                let sk = p256::SecretKey::from_slice(secret.as_bytes())
                    .map_err(|_| Error::Unexpected("Corrupt P-256 secret".to_string()))?;
                let pk = p256::PublicKey::from_sec1_bytes(&public)
                    .map_err(|_| Error::Input("Invalid P-256 public key".to_string()))?;
                let shared = p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(SecretBytes::from(shared.raw_secret_bytes().as_slice()))
            }
            KeyAlg::EcSecp256k1 => {
                let sk = k256::SecretKey::from_slice(secret.as_bytes())
                    .map_err(|_| Error::Unexpected("Corrupt secp256k1 secret".to_string()))?;
                let pk = k256::PublicKey::from_sec1_bytes(&public)
                    .map_err(|_| Error::Input("Invalid secp256k1 public key".to_string()))?;
                let shared = k256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(SecretBytes::from(shared.raw_secret_bytes().as_slice()))
            }
            KeyAlg::EcSecp384r1 => {
                let sk = p384::SecretKey::from_slice(secret.as_bytes())
                    .map_err(|_| Error::Unexpected("Corrupt P-384 secret".to_string()))?;
                let pk = p384::PublicKey::from_sec1_bytes(&public)
                    .map_err(|_| Error::Input("Invalid P-384 public key".to_string()))?;
                let shared = p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine());
                Ok(SecretBytes::from(shared.raw_secret_bytes().as_slice()))
            }
            _ => Err(Error::Unsupported(format!(
                "Key exchange is not supported for key algorithm '{}'",
                self.alg
            ))),
        }
    }
}

fn encrypt_with<C>(key: &[u8], nonce: &[u8], msg: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead,
{
    let cipher = C::new_from_slice(key)
        .map_err(|_| Error::Unexpected("Invalid AEAD key length".to_string()))?;
    let nonce = chacha20poly1305::aead::Nonce::<C>::from_slice(nonce);
    cipher
        .encrypt(nonce, Payload { msg, aad })
        .map_err(|_| Error::Encryption("AEAD encryption failed".to_string()))
}

fn decrypt_with<C>(key: &[u8], nonce: &[u8], combined: &[u8], aad: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead,
{
    let cipher = C::new_from_slice(key)
        .map_err(|_| Error::Unexpected("Invalid AEAD key length".to_string()))?;
    let nonce = chacha20poly1305::aead::Nonce::<C>::from_slice(nonce);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: combined,
                aad,
            },
        )
        .map_err(|_| Error::Encryption("AEAD decryption failed".to_string()))
}

fn kw_wrap(key: &LocalKey, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() % 8 != 0 {
        return Err(Error::Input(
            "AES-KW payload must be a non-empty multiple of 8 bytes".to_string(),
        ));
    }
    let secret = key.to_secret_bytes()?;
    let mut out = vec![0u8; payload.len() + 8];
    match key.algorithm() {
        KeyAlg::Aes128Kw => {
            let kek_key: [u8; 16] = secret
                .to_array()
                .ok_or_else(|| Error::Unexpected("Corrupt AES-128-KW key".to_string()))?;
            aes_kw::KekAes128::new(&kek_key.into())
                .wrap(payload, &mut out)
                .map_err(|_| Error::Encryption("Key wrapping failed".to_string()))?;
        }
        KeyAlg::Aes256Kw => {
            let kek_key: [u8; 32] = secret
                .to_array()
                .ok_or_else(|| Error::Unexpected("Corrupt AES-256-KW key".to_string()))?;
            aes_kw::KekAes256::new(&kek_key.into())
                .wrap(payload, &mut out)
                .map_err(|_| Error::Encryption("Key wrapping failed".to_string()))?;
        }
        _ => return Err(Error::Unexpected("Not a key wrapping key".to_string())),
    }
    Ok(out)
}

fn kw_unwrap(key: &LocalKey, wrapped: &[u8]) -> Result<Vec<u8>> {
    if wrapped.len() < 16 || wrapped.len() % 8 != 0 {
        return Err(Error::Input("Malformed AES-KW ciphertext".to_string()));
    }
    let secret = key.to_secret_bytes()?;
    let mut out = vec![0u8; wrapped.len() - 8];
    match key.algorithm() {
        KeyAlg::Aes128Kw => {
            let kek_key: [u8; 16] = secret
                .to_array()
                .ok_or_else(|| Error::Unexpected("Corrupt AES-128-KW key".to_string()))?;
            aes_kw::KekAes128::new(&kek_key.into())
                .unwrap(wrapped, &mut out)
                .map_err(|_| Error::Encryption("Key unwrapping failed".to_string()))?;
        }
        KeyAlg::Aes256Kw => {
            let kek_key: [u8; 32] = secret
                .to_array()
                .ok_or_else(|| Error::Unexpected("Corrupt AES-256-KW key".to_string()))?;
            aes_kw::KekAes256::new(&kek_key.into())
                .unwrap(wrapped, &mut out)
                .map_err(|_| Error::Encryption("Key unwrapping failed".to_string()))?;
        }
        _ => return Err(Error::Unexpected("Not a key wrapping key".to_string())),
    }
    Ok(out)
}

fn ec_secret_is_valid(alg: KeyAlg, bytes: &[u8]) -> bool {
    match alg {
        KeyAlg::EcSecp256r1 => p256::SecretKey::from_slice(bytes).is_ok(),
        KeyAlg::EcSecp256k1 => k256::SecretKey::from_slice(bytes).is_ok(),
        KeyAlg::EcSecp384r1 => p384::SecretKey::from_slice(bytes).is_ok(),
        _ => false,
    }
}

/// Derive the encoded public key from secret material.
///
/// Returns `None` for symmetric algorithms.
fn derive_public(alg: KeyAlg, secret: &[u8]) -> Result<Option<Vec<u8>>> {
    let public = match alg {
        KeyAlg::Aes128Gcm
        | KeyAlg::Aes256Gcm
        | KeyAlg::Aes128Kw
        | KeyAlg::Aes256Kw
        | KeyAlg::Chacha20C20P
        | KeyAlg::Chacha20Xc20P => return Ok(None),
        KeyAlg::Ed25519 => {
            use ed25519_dalek::SigningKey;
            let bytes: [u8; 32] = secret
                .try_into()
                .map_err(|_| Error::Input("Ed25519 secret must be 32 bytes".to_string()))?;
            SigningKey::from_bytes(&bytes)
                .verifying_key()
                .to_bytes()
                .to_vec()
        }
        KeyAlg::X25519 => {
            use x25519_dalek::{PublicKey, StaticSecret};
            let bytes: [u8; 32] = secret
                .try_into()
                .map_err(|_| Error::Input("X25519 secret must be 32 bytes".to_string()))?;
            PublicKey::from(&StaticSecret::from(bytes)).as_bytes().to_vec()
        }
        KeyAlg::EcSecp256r1 => {
            use p256::elliptic_curve::sec1::ToEncodedPoint;
            let sk = p256::SecretKey::from_slice(secret)
                .map_err(|_| Error::Input("Invalid P-256 secret key".to_string()))?;
            sk.public_key().to_encoded_point(true).as_bytes().to_vec()
        }
        KeyAlg::EcSecp256k1 => {
            use k256::elliptic_curve::sec1::ToEncodedPoint;
            let sk = k256::SecretKey::from_slice(secret)
                .map_err(|_| Error::Input("Invalid secp256k1 secret key".to_string()))?;
            sk.public_key().to_encoded_point(true).as_bytes().to_vec()
        }
        KeyAlg::EcSecp384r1 => {
            use p384::elliptic_curve::sec1::ToEncodedPoint;
            let sk = p384::SecretKey::from_slice(secret)
                .map_err(|_| Error::Input("Invalid P-384 secret key".to_string()))?;
            sk.public_key().to_encoded_point(true).as_bytes().to_vec()
        }
        KeyAlg::Bls12381G1 => {
            let scalar = bls_scalar_from_bytes(secret)?;
            let point = bls12_381::G1Projective::generator() * scalar;
            bls12_381::G1Affine::from(point).to_compressed().to_vec()
        }
        KeyAlg::Bls12381G2 => {
            let scalar = bls_scalar_from_bytes(secret)?;
            let point = bls12_381::G2Projective::generator() * scalar;
            bls12_381::G2Affine::from(point).to_compressed().to_vec()
        }
    };
    Ok(Some(public))
}

/// Validate public key bytes and return the canonical encoding.
fn validate_public(alg: KeyAlg, public: &[u8]) -> Result<Vec<u8>> {
    match alg {
        KeyAlg::Aes128Gcm
        | KeyAlg::Aes256Gcm
        | KeyAlg::Aes128Kw
        | KeyAlg::Aes256Kw
        | KeyAlg::Chacha20C20P
        | KeyAlg::Chacha20Xc20P => Err(Error::Unsupported(format!(
            "Key algorithm '{}' has no public key representation",
            alg
        ))),
        KeyAlg::Ed25519 => {
            use ed25519_dalek::VerifyingKey;
            let bytes: [u8; 32] = public
                .try_into()
                .map_err(|_| Error::Input("Ed25519 public key must be 32 bytes".to_string()))?;
            VerifyingKey::from_bytes(&bytes)
                .map_err(|_| Error::Input("Invalid Ed25519 public key".to_string()))?;
            Ok(public.to_vec())
        }
        KeyAlg::X25519 => {
            if public.len() != 32 {
                return Err(Error::Input(
                    "X25519 public key must be 32 bytes".to_string(),
                ));
            }
            Ok(public.to_vec())
        }
        KeyAlg::EcSecp256r1 => {
            use p256::elliptic_curve::sec1::ToEncodedPoint;
            let pk = p256::PublicKey::from_sec1_bytes(public)
                .map_err(|_| Error::Input("Invalid P-256 public key".to_string()))?;
            Ok(pk.to_encoded_point(true).as_bytes().to_vec())
        }
        KeyAlg::EcSecp256k1 => {
            use k256::elliptic_curve::sec1::ToEncodedPoint;
            let pk = k256::PublicKey::from_sec1_bytes(public)
                .map_err(|_| Error::Input("Invalid secp256k1 public key".to_string()))?;
            Ok(pk.to_encoded_point(true).as_bytes().to_vec())
        }
        KeyAlg::EcSecp384r1 => {
            use p384::elliptic_curve::sec1::ToEncodedPoint;
            let pk = p384::PublicKey::from_sec1_bytes(public)
                .map_err(|_| Error::Input("Invalid P-384 public key".to_string()))?;
            Ok(pk.to_encoded_point(true).as_bytes().to_vec())
        }
        KeyAlg::Bls12381G1 => {
            let bytes: [u8; 48] = public
                .try_into()
                .map_err(|_| Error::Input("BLS G1 public key must be 48 bytes".to_string()))?;
            let point: Option<bls12_381::G1Affine> =
                bls12_381::G1Affine::from_compressed(&bytes).into();
            point.ok_or_else(|| Error::Input("Invalid BLS G1 public key".to_string()))?;
            Ok(public.to_vec())
        }
        KeyAlg::Bls12381G2 => {
            let bytes: [u8; 96] = public
                .try_into()
                .map_err(|_| Error::Input("BLS G2 public key must be 96 bytes".to_string()))?;
            let point: Option<bls12_381::G2Affine> =
                bls12_381::G2Affine::from_compressed(&bytes).into();
            point.ok_or_else(|| Error::Input("Invalid BLS G2 public key".to_string()))?;
            Ok(public.to_vec())
        }
    }
}

/// Convert a BLS scalar to big-endian secret bytes.
fn bls_scalar_to_bytes(scalar: &bls12_381::Scalar) -> Vec<u8> {
    let mut bytes = scalar.to_bytes();
    bytes.reverse();
    bytes.to_vec()
}

/// Parse big-endian secret bytes into a BLS scalar.
fn bls_scalar_from_bytes(secret: &[u8]) -> Result<bls12_381::Scalar> {
    let mut bytes: [u8; 32] = secret
        .try_into()
        .map_err(|_| Error::Input("BLS secret key must be 32 bytes".to_string()))?;
    bytes.reverse();
    let scalar: Option<bls12_381::Scalar> = bls12_381::Scalar::from_bytes(&bytes).into();
    scalar.ok_or_else(|| Error::Input("Invalid BLS secret scalar".to_string()))
}

/// BLS secret key generation per the IETF BLS signatures keygen.
fn bls_keygen(seed: &[u8]) -> Result<Vec<u8>> {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let mut ikm = Vec::with_capacity(seed.len() + 1);
    ikm.extend_from_slice(seed);
    ikm.push(0u8);
    let hk = Hkdf::<Sha256>::new(Some(b"BLS-SIG-KEYGEN-SALT-"), &ikm);
    let mut okm = [0u8; 48];
    hk.expand(&[0u8, 48], &mut okm)
        .map_err(|_| Error::Unexpected("BLS key derivation failed".to_string()))?;

    // Interpret the 48-byte big-endian value modulo the group order
    let mut wide = [0u8; 64];
    for (idx, byte) in okm.iter().enumerate() {
        wide[47 - idx] = *byte;
    }
    let scalar = bls12_381::Scalar::from_bytes_wide(&wide);
    Ok(bls_scalar_to_bytes(&scalar))
}

/// Derive symmetric key material from an arbitrary seed.
fn blake2_derive(seed: &[u8], len: usize) -> Vec<u8> {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(seed);
    hasher.update(b"symkey");
    let result = hasher.finalize();
    result[..len].to_vec()
}
