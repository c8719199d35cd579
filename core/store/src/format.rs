//! On-disk store format.
//!
//! A store file is a small plaintext header followed by one encrypted body:
//!
//! ```text
//! magic || header_len (u32 LE) || header JSON || nonce || body ciphertext
//! ```
//!
//! The header records the key derivation method, salt, and the store key
//! wrapped under the pass-key-derived master key. The body is the complete
//! store content encrypted under the store key with XChaCha20-Poly1305.
//! Rekeying replaces only the wrapped store key and salt; the body and the
//! store key itself are unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyfort_common::{Entry, EntryTag, Error, Result};
use keyfort_crypto::{KeyAlg, LocalKey, MasterKey};

/// File magic, also bound into the body AAD.
pub const MAGIC: &[u8] = b"KFRT1";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// A single persisted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub category: String,
    pub name: String,
    #[serde(with = "serde_bytes_hex")]
    pub value: Vec<u8>,
    #[serde(default)]
    pub tags: Vec<StoredTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl StoredEntry {
    pub fn new(
        category: &str,
        name: &str,
        value: &[u8],
        tags: &[EntryTag],
        expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            value: value.to_vec(),
            tags: tags.iter().map(StoredTag::from_tag).collect(),
            expiry,
        }
    }

    pub fn to_entry(&self) -> Entry {
        Entry {
            category: self.category.clone(),
            name: self.name.clone(),
            value: self.value.clone(),
            tags: self.tags.iter().map(StoredTag::to_tag).collect(),
        }
    }

    pub fn is_expired(&self, now: &DateTime<Utc>) -> bool {
        self.expiry.map(|expiry| expiry <= *now).unwrap_or(false)
    }
}

/// A persisted entry tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTag {
    pub name: String,
    pub value: String,
    pub plaintext: bool,
}

impl StoredTag {
    pub fn from_tag(tag: &EntryTag) -> Self {
        Self {
            name: tag.name().to_string(),
            value: tag.value().to_string(),
            plaintext: tag.is_plaintext(),
        }
    }

    pub fn to_tag(&self) -> EntryTag {
        if self.plaintext {
            EntryTag::Plaintext(self.name.clone(), self.value.clone())
        } else {
            EntryTag::Encrypted(self.name.clone(), self.value.clone())
        }
    }
}

/// All entries belonging to one profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileData {
    #[serde(default)]
    pub entries: Vec<StoredEntry>,
}

/// The decrypted content of a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    pub default_profile: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileData>,
}

impl StoreData {
    /// Initial content with a single empty profile.
    pub fn new(default_profile: &str) -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(default_profile.to_string(), ProfileData::default());
        Self {
            default_profile: default_profile.to_string(),
            profiles,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    version: u32,
    kdf: String,
    salt: String,
    key_nonce: String,
    key_ct: String,
}

/// A parsed store file, not yet decrypted.
pub struct Envelope {
    /// Key derivation method recorded at provision or rekey time.
    pub kdf: String,
    /// KDF salt.
    pub salt: Vec<u8>,
    key_nonce: Vec<u8>,
    key_ct: Vec<u8>,
    body: Vec<u8>,
}

impl Envelope {
    /// Parse the plaintext framing of a store file.
    ///
    /// # Errors
    /// - `Input` if the magic or framing is malformed
    /// - `Unsupported` on an unknown format version
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() + 4 || &bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::Input("Not a valid store file".to_string()));
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + 4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_start = MAGIC.len() + 4;
        let body_start = header_start
            .checked_add(header_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| Error::Input("Truncated store file".to_string()))?;

        let header: Header = serde_json::from_slice(&bytes[header_start..body_start])
            .map_err(|_| Error::Input("Malformed store header".to_string()))?;
        if header.version != FORMAT_VERSION {
            return Err(Error::Unsupported(format!(
                "Unsupported store format version: {}",
                header.version
            )));
        }
        Ok(Self {
            kdf: header.kdf,
            salt: decode_hex(&header.salt)?,
            key_nonce: decode_hex(&header.key_nonce)?,
            key_ct: decode_hex(&header.key_ct)?,
            body: bytes[body_start..].to_vec(),
        })
    }

    /// Recover the store key using the derived master key.
    ///
    /// # Errors
    /// - `Encryption` if the master key does not match (wrong pass key)
    pub fn unwrap_store_key(&self, master: &MasterKey) -> Result<LocalKey> {
        let wrapping = LocalKey::from_secret_bytes(KeyAlg::Chacha20Xc20P, master.as_bytes())?;
        wrapping
            .unwrap_key(KeyAlg::Chacha20Xc20P, &self.key_ct, None, &self.key_nonce)
            .map_err(|_| Error::Encryption("Store key could not be unwrapped".to_string()))
    }

    /// Decrypt and deserialize the store body.
    ///
    /// # Errors
    /// - `Encryption` on authentication failure
    /// - `Input` if the decrypted body does not deserialize
    pub fn decrypt_body(&self, store_key: &LocalKey) -> Result<StoreData> {
        let (nonce_len, _) = store_key.aead_params()?;
        if self.body.len() < nonce_len {
            return Err(Error::Input("Truncated store body".to_string()));
        }
        let plaintext =
            store_key.aead_decrypt(&self.body[nonce_len..], None, &self.body[..nonce_len], MAGIC)?;
        serde_json::from_slice(&plaintext)
            .map_err(|_| Error::Input("Malformed store body".to_string()))
    }
}

/// Serialize and encrypt a complete store file.
pub fn seal(
    data: &StoreData,
    store_key: &LocalKey,
    kdf_uri: &str,
    salt: &[u8],
    master: &MasterKey,
) -> Result<Vec<u8>> {
    let wrapping = LocalKey::from_secret_bytes(KeyAlg::Chacha20Xc20P, master.as_bytes())?;
    let wrapped = wrapping.wrap_key(store_key, &[])?;

    let header = Header {
        version: FORMAT_VERSION,
        kdf: kdf_uri.to_string(),
        salt: hex::encode(salt),
        key_nonce: hex::encode(&wrapped.nonce),
        key_ct: hex::encode(wrapped.ciphertext_with_tag()),
    };
    let header_json = serde_json::to_vec(&header)
        .map_err(|e| Error::Unexpected(format!("Header serialization failed: {}", e)))?;

    let body_json = serde_json::to_vec(data)
        .map_err(|e| Error::Unexpected(format!("Store serialization failed: {}", e)))?;
    let enc = store_key.aead_encrypt(&body_json, &[], MAGIC)?;

    let mut out = Vec::with_capacity(
        MAGIC.len() + 4 + header_json.len() + enc.nonce.len() + body_json.len() + 16,
    );
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(header_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(&enc.nonce);
    out.extend_from_slice(&enc.ciphertext_with_tag());
    Ok(out)
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| Error::Input("Malformed store header".to_string()))
}

mod serde_bytes_hex {
    //! Hex encoding for entry values in the body JSON, which would
    //! otherwise serialize as integer lists.

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(&encoded).map_err(|_| serde::de::Error::custom("invalid hex value"))
    }
}
