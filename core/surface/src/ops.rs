//! Handle-based operations over stores, sessions, scans, and keys.
//!
//! Every function addresses its objects through arena handles and records
//! failures in the thread-local last-error slot before returning them.
//! Parameters that cross the surface as strings (key methods, algorithms,
//! tag JSON) are parsed here; the inner crates only see typed values.

use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use keyfort_common::{
    tags_from_json, Entry, EntryOperation, EntryTag, Error, Result, TagFilter,
};
use keyfort_crypto::{Encrypted, KdfMethod, KeyAlg, LocalKey, SignatureType};
use keyfort_store::{KeyEntry, Scan, Session, Store};

use crate::error::track;
use crate::handles::{
    EntryListHandle, HandleMap, KeyEntryListHandle, LocalKeyHandle, ScanHandle, SessionHandle,
    StoreHandle,
};

static STORES: Lazy<HandleMap<Store>> = Lazy::new(HandleMap::new);
static SESSIONS: Lazy<HandleMap<Mutex<Session>>> = Lazy::new(HandleMap::new);
static SCANS: Lazy<HandleMap<Mutex<Scan>>> = Lazy::new(HandleMap::new);
static ENTRY_LISTS: Lazy<HandleMap<Vec<Entry>>> = Lazy::new(HandleMap::new);
static KEY_ENTRY_LISTS: Lazy<HandleMap<Vec<KeyEntry>>> = Lazy::new(HandleMap::new);
static KEYS: Lazy<HandleMap<LocalKey>> = Lazy::new(HandleMap::new);

fn parse_key_method(method: Option<&str>) -> Result<Option<KdfMethod>> {
    method.map(KdfMethod::from_str).transpose()
}

fn parse_tag_filter(filter: Option<&str>) -> Result<Option<TagFilter>> {
    match filter {
        Some(json) => {
            let value: serde_json::Value = serde_json::from_str(json)
                .map_err(|_| Error::Input("Malformed tag filter JSON".to_string()))?;
            Ok(Some(TagFilter::from_json(value)?))
        }
        None => Ok(None),
    }
}

fn parse_tags(tags: Option<&str>) -> Result<Option<Vec<EntryTag>>> {
    match tags {
        Some(json) => {
            let value: serde_json::Value = serde_json::from_str(json)
                .map_err(|_| Error::Input("Malformed tags JSON".to_string()))?;
            Ok(Some(tags_from_json(value)?))
        }
        None => Ok(None),
    }
}

// ----- store lifecycle -----

/// Generate a raw store key for the `raw` key method.
pub fn store_generate_raw_key(seed: Option<&[u8]>) -> String {
    keyfort_crypto::generate_raw_key(seed)
}

pub async fn store_provision(
    uri: &str,
    key_method: Option<&str>,
    pass_key: &str,
    profile: Option<&str>,
    recreate: bool,
) -> Result<StoreHandle> {
    track(async {
        let method = parse_key_method(key_method)?.unwrap_or_default();
        let store = Store::provision(uri, method, pass_key, profile, recreate).await?;
        Ok(StoreHandle(STORES.insert(store)))
    }
    .await)
}

pub async fn store_open(
    uri: &str,
    key_method: Option<&str>,
    pass_key: &str,
    profile: Option<&str>,
) -> Result<StoreHandle> {
    track(async {
        let method = parse_key_method(key_method)?;
        let store = Store::open(uri, method, pass_key, profile).await?;
        Ok(StoreHandle(STORES.insert(store)))
    }
    .await)
}

pub async fn store_remove(uri: &str) -> Result<bool> {
    track(Store::remove(uri).await)
}

/// Close a store, optionally deleting its backing storage.
pub async fn store_close(handle: StoreHandle, remove: bool) -> Result<()> {
    track(async {
        let store = STORES.remove(handle.0)?;
        let uri = store.uri().to_string();
        match Arc::try_unwrap(store) {
            Ok(store) => store.close(remove).await,
            Err(_) if remove => Store::remove(&uri).await.map(|_| ()),
            Err(_) => Ok(()),
        }
    }
    .await)
}

pub fn store_get_uri(handle: StoreHandle) -> Result<String> {
    track(STORES.get(handle.0).map(|store| store.uri().to_string()))
}

pub fn store_get_profile_name(handle: StoreHandle) -> Result<String> {
    track(
        STORES
            .get(handle.0)
            .map(|store| store.profile_name().to_string()),
    )
}

pub async fn store_rekey(handle: StoreHandle, key_method: Option<&str>, pass_key: &str) -> Result<()> {
    track(async {
        let store = STORES.get(handle.0)?;
        let method = parse_key_method(key_method)?.unwrap_or_default();
        store.rekey(method, pass_key).await
    }
    .await)
}

pub async fn store_copy_to(
    handle: StoreHandle,
    target_uri: &str,
    key_method: Option<&str>,
    pass_key: &str,
    recreate: bool,
) -> Result<StoreHandle> {
    track(async {
        let store = STORES.get(handle.0)?;
        let method = parse_key_method(key_method)?.unwrap_or_default();
        let copy = store.copy_to(target_uri, method, pass_key, recreate).await?;
        Ok(StoreHandle(STORES.insert(copy)))
    }
    .await)
}

pub async fn store_create_profile(handle: StoreHandle, profile: Option<&str>) -> Result<String> {
    track(async { STORES.get(handle.0)?.create_profile(profile).await }.await)
}

pub async fn store_remove_profile(handle: StoreHandle, profile: &str) -> Result<bool> {
    track(async { STORES.get(handle.0)?.remove_profile(profile).await }.await)
}

pub async fn store_list_profiles(handle: StoreHandle) -> Result<Vec<String>> {
    track(async { STORES.get(handle.0)?.list_profiles().await }.await)
}

pub async fn store_get_default_profile(handle: StoreHandle) -> Result<String> {
    track(async { STORES.get(handle.0)?.get_default_profile().await }.await)
}

pub async fn store_set_default_profile(handle: StoreHandle, profile: &str) -> Result<()> {
    track(async { STORES.get(handle.0)?.set_default_profile(profile).await }.await)
}

// ----- sessions -----

pub async fn session_start(
    store: StoreHandle,
    profile: Option<&str>,
    as_transaction: bool,
) -> Result<SessionHandle> {
    track(async {
        let store = STORES.get(store.0)?;
        let session = if as_transaction {
            store.transaction(profile).await?
        } else {
            store.session(profile).await?
        };
        Ok(SessionHandle(SESSIONS.insert(Mutex::new(session))))
    }
    .await)
}

/// Close a session, committing or rolling back a transaction.
pub async fn session_close(handle: SessionHandle, commit: bool) -> Result<()> {
    track(async {
        let session = SESSIONS.remove(handle.0)?;
        let session = Arc::try_unwrap(session)
            .map_err(|_| Error::Busy("Session is in use on another task".to_string()))?
            .into_inner();
        if commit {
            session.commit().await
        } else {
            session.rollback().await
        }
    }
    .await)
}

pub async fn session_count(
    handle: SessionHandle,
    category: Option<&str>,
    tag_filter: Option<&str>,
) -> Result<i64> {
    track(async {
        let filter = parse_tag_filter(tag_filter)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        session.count(category, filter).await
    }
    .await)
}

pub async fn session_fetch(
    handle: SessionHandle,
    category: &str,
    name: &str,
    for_update: bool,
) -> Result<Option<EntryListHandle>> {
    track(async {
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        Ok(session
            .fetch(category, name, for_update)
            .await?
            .map(|entry| EntryListHandle(ENTRY_LISTS.insert(vec![entry]))))
    }
    .await)
}

pub async fn session_fetch_all(
    handle: SessionHandle,
    category: Option<&str>,
    tag_filter: Option<&str>,
    limit: Option<i64>,
    for_update: bool,
) -> Result<EntryListHandle> {
    track(async {
        let filter = parse_tag_filter(tag_filter)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        let entries = session.fetch_all(category, filter, limit, for_update).await?;
        Ok(EntryListHandle(ENTRY_LISTS.insert(entries)))
    }
    .await)
}

#[allow(clippy::too_many_arguments)]
pub async fn session_update(
    handle: SessionHandle,
    operation: EntryOperation,
    category: &str,
    name: &str,
    value: &[u8],
    tags: Option<&str>,
    expiry_ms: Option<i64>,
) -> Result<()> {
    track(async {
        let tags = parse_tags(tags)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        session
            .update(operation, category, name, value, tags, expiry_ms)
            .await
    }
    .await)
}

pub async fn session_remove_all(
    handle: SessionHandle,
    category: Option<&str>,
    tag_filter: Option<&str>,
) -> Result<i64> {
    track(async {
        let filter = parse_tag_filter(tag_filter)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        session.remove_all(category, filter).await
    }
    .await)
}

pub async fn session_insert_key(
    handle: SessionHandle,
    key: LocalKeyHandle,
    name: &str,
    metadata: Option<&str>,
    tags: Option<&str>,
    expiry_ms: Option<i64>,
) -> Result<()> {
    track(async {
        let tags = parse_tags(tags)?;
        let key = KEYS.get(key.0)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        session
            .insert_key(name, &key, metadata, tags, expiry_ms)
            .await
    }
    .await)
}

pub async fn session_fetch_key(
    handle: SessionHandle,
    name: &str,
    for_update: bool,
) -> Result<Option<KeyEntryListHandle>> {
    track(async {
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        Ok(session
            .fetch_key(name, for_update)
            .await?
            .map(|entry| KeyEntryListHandle(KEY_ENTRY_LISTS.insert(vec![entry]))))
    }
    .await)
}

pub async fn session_fetch_all_keys(
    handle: SessionHandle,
    algorithm: Option<&str>,
    thumbprint: Option<&str>,
    tag_filter: Option<&str>,
    limit: Option<i64>,
) -> Result<KeyEntryListHandle> {
    track(async {
        let algorithm = algorithm.map(KeyAlg::from_str).transpose()?;
        let filter = parse_tag_filter(tag_filter)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        let keys = session
            .fetch_all_keys(algorithm, thumbprint, filter, limit)
            .await?;
        Ok(KeyEntryListHandle(KEY_ENTRY_LISTS.insert(keys)))
    }
    .await)
}

pub async fn session_update_key(
    handle: SessionHandle,
    name: &str,
    metadata: Option<&str>,
    tags: Option<&str>,
    expiry_ms: Option<i64>,
) -> Result<()> {
    track(async {
        let tags = parse_tags(tags)?;
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        session.update_key(name, metadata, tags, expiry_ms).await
    }
    .await)
}

pub async fn session_remove_key(handle: SessionHandle, name: &str) -> Result<()> {
    track(async {
        let session = SESSIONS.get(handle.0)?;
        let mut session = session.lock().await;
        session.remove_key(name).await
    }
    .await)
}

// ----- scans -----

pub async fn scan_start(
    store: StoreHandle,
    profile: Option<&str>,
    category: Option<&str>,
    tag_filter: Option<&str>,
    offset: Option<i64>,
    limit: Option<i64>,
) -> Result<ScanHandle> {
    track(async {
        let filter = parse_tag_filter(tag_filter)?;
        let store = STORES.get(store.0)?;
        let scan = store.scan(profile, category, filter, offset, limit).await?;
        Ok(ScanHandle(SCANS.insert(Mutex::new(scan))))
    }
    .await)
}

/// Fetch the next page of a scan, or `None` when exhausted.
pub async fn scan_next(handle: ScanHandle) -> Result<Option<EntryListHandle>> {
    track(async {
        let scan = SCANS.get(handle.0)?;
        let mut scan = scan.lock().await;
        Ok(scan
            .fetch_next()
            .await?
            .map(|page| EntryListHandle(ENTRY_LISTS.insert(page))))
    }
    .await)
}

pub fn scan_free(handle: ScanHandle) -> Result<()> {
    track(SCANS.remove(handle.0).map(|_| ()))
}

// ----- entry lists -----

pub fn entry_list_count(handle: EntryListHandle) -> Result<usize> {
    track(ENTRY_LISTS.get(handle.0).map(|list| list.len()))
}

pub fn entry_list_get(handle: EntryListHandle, index: usize) -> Result<Entry> {
    track((|| {
        let list = ENTRY_LISTS.get(handle.0)?;
        list.get(index)
            .cloned()
            .ok_or_else(|| Error::Input(format!("Entry list index out of range: {}", index)))
    })())
}

pub fn entry_list_free(handle: EntryListHandle) -> Result<()> {
    track(ENTRY_LISTS.remove(handle.0).map(|_| ()))
}

// ----- key entry lists -----

pub fn key_entry_list_count(handle: KeyEntryListHandle) -> Result<usize> {
    track(KEY_ENTRY_LISTS.get(handle.0).map(|list| list.len()))
}

fn key_entry_at(handle: KeyEntryListHandle, index: usize) -> Result<KeyEntry> {
    let list = KEY_ENTRY_LISTS.get(handle.0)?;
    list.get(index)
        .cloned()
        .ok_or_else(|| Error::Input(format!("Key entry list index out of range: {}", index)))
}

pub fn key_entry_list_get_name(handle: KeyEntryListHandle, index: usize) -> Result<String> {
    track(key_entry_at(handle, index).map(|entry| entry.name))
}

pub fn key_entry_list_get_algorithm(handle: KeyEntryListHandle, index: usize) -> Result<String> {
    track(key_entry_at(handle, index).map(|entry| entry.algorithm.to_string()))
}

pub fn key_entry_list_get_metadata(
    handle: KeyEntryListHandle,
    index: usize,
) -> Result<Option<String>> {
    track(key_entry_at(handle, index).map(|entry| entry.metadata))
}

pub fn key_entry_list_get_tags(handle: KeyEntryListHandle, index: usize) -> Result<Vec<EntryTag>> {
    track(key_entry_at(handle, index).map(|entry| entry.tags))
}

/// Load the key at an index into its own handle.
pub fn key_entry_list_load_local(
    handle: KeyEntryListHandle,
    index: usize,
) -> Result<LocalKeyHandle> {
    track(
        key_entry_at(handle, index)
            .map(|entry| LocalKeyHandle(KEYS.insert(entry.load_local_key()))),
    )
}

pub fn key_entry_list_free(handle: KeyEntryListHandle) -> Result<()> {
    track(KEY_ENTRY_LISTS.remove(handle.0).map(|_| ()))
}

// ----- keys -----

pub fn key_generate(algorithm: &str, ephemeral: bool) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        Ok(LocalKeyHandle(KEYS.insert(LocalKey::generate(alg, ephemeral)?)))
    })())
}

pub fn key_from_seed(algorithm: &str, seed: &[u8]) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        Ok(LocalKeyHandle(KEYS.insert(LocalKey::from_seed(alg, seed)?)))
    })())
}

pub fn key_from_secret_bytes(algorithm: &str, secret: &[u8]) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        Ok(LocalKeyHandle(
            KEYS.insert(LocalKey::from_secret_bytes(alg, secret)?),
        ))
    })())
}

pub fn key_from_public_bytes(algorithm: &str, public: &[u8]) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        Ok(LocalKeyHandle(
            KEYS.insert(LocalKey::from_public_bytes(alg, public)?),
        ))
    })())
}

pub fn key_from_jwk(jwk: &str) -> Result<LocalKeyHandle> {
    track(LocalKey::from_jwk(jwk).map(|key| LocalKeyHandle(KEYS.insert(key))))
}

pub fn key_from_key_exchange(
    algorithm: &str,
    secret_key: LocalKeyHandle,
    public_key: LocalKeyHandle,
) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        let sk = KEYS.get(secret_key.0)?;
        let pk = KEYS.get(public_key.0)?;
        Ok(LocalKeyHandle(
            KEYS.insert(LocalKey::from_key_exchange(alg, &sk, &pk)?),
        ))
    })())
}

pub fn key_get_algorithm(handle: LocalKeyHandle) -> Result<String> {
    track(KEYS.get(handle.0).map(|key| key.algorithm().to_string()))
}

pub fn key_get_ephemeral(handle: LocalKeyHandle) -> Result<bool> {
    track(KEYS.get(handle.0).map(|key| key.is_ephemeral()))
}

pub fn key_get_public_bytes(handle: LocalKeyHandle) -> Result<Vec<u8>> {
    track(KEYS.get(handle.0)?.to_public_bytes())
}

pub fn key_get_secret_bytes(handle: LocalKeyHandle) -> Result<Vec<u8>> {
    track(
        KEYS.get(handle.0)?
            .to_secret_bytes()
            .map(|secret| secret.as_bytes().to_vec()),
    )
}

pub fn key_get_jwk_public(handle: LocalKeyHandle, algorithm: Option<&str>) -> Result<String> {
    track((|| {
        let alg = algorithm.map(KeyAlg::from_str).transpose()?;
        KEYS.get(handle.0)?.to_jwk_public(alg)
    })())
}

pub fn key_get_jwk_secret(handle: LocalKeyHandle) -> Result<String> {
    track(KEYS.get(handle.0)?.to_jwk_secret())
}

pub fn key_get_jwk_thumbprint(handle: LocalKeyHandle, algorithm: Option<&str>) -> Result<String> {
    track((|| {
        let alg = algorithm.map(KeyAlg::from_str).transpose()?;
        KEYS.get(handle.0)?.to_jwk_thumbprint(alg)
    })())
}

pub fn key_convert(handle: LocalKeyHandle, algorithm: &str) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        let converted = KEYS.get(handle.0)?.convert_key(alg)?;
        Ok(LocalKeyHandle(KEYS.insert(converted)))
    })())
}

pub fn key_sign_message(
    handle: LocalKeyHandle,
    message: &[u8],
    sig_type: Option<&str>,
) -> Result<Vec<u8>> {
    track((|| {
        let sig_type = sig_type.map(SignatureType::from_str).transpose()?;
        KEYS.get(handle.0)?.sign_message(message, sig_type)
    })())
}

pub fn key_verify_signature(
    handle: LocalKeyHandle,
    message: &[u8],
    signature: &[u8],
    sig_type: Option<&str>,
) -> Result<bool> {
    track((|| {
        let sig_type = sig_type.map(SignatureType::from_str).transpose()?;
        KEYS.get(handle.0)?.verify_signature(message, signature, sig_type)
    })())
}

/// AEAD parameters of a key: (nonce length, tag length).
pub fn key_aead_get_params(handle: LocalKeyHandle) -> Result<(usize, usize)> {
    track(KEYS.get(handle.0)?.aead_params())
}

pub fn key_aead_random_nonce(handle: LocalKeyHandle) -> Result<Vec<u8>> {
    track(KEYS.get(handle.0)?.aead_random_nonce())
}

pub fn key_aead_encrypt(
    handle: LocalKeyHandle,
    message: &[u8],
    nonce: &[u8],
    aad: &[u8],
) -> Result<Encrypted> {
    track(KEYS.get(handle.0)?.aead_encrypt(message, nonce, aad))
}

pub fn key_aead_decrypt(
    handle: LocalKeyHandle,
    ciphertext: &[u8],
    tag: Option<&[u8]>,
    nonce: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    track(KEYS.get(handle.0)?.aead_decrypt(ciphertext, tag, nonce, aad))
}

pub fn key_wrap_key(
    handle: LocalKeyHandle,
    other: LocalKeyHandle,
    nonce: &[u8],
) -> Result<Encrypted> {
    track((|| {
        let kek = KEYS.get(handle.0)?;
        let target = KEYS.get(other.0)?;
        kek.wrap_key(&target, nonce)
    })())
}

pub fn key_unwrap_key(
    handle: LocalKeyHandle,
    algorithm: &str,
    ciphertext: &[u8],
    tag: Option<&[u8]>,
    nonce: &[u8],
) -> Result<LocalKeyHandle> {
    track((|| {
        let alg = KeyAlg::from_str(algorithm)?;
        let unwrapped = KEYS.get(handle.0)?.unwrap_key(alg, ciphertext, tag, nonce)?;
        Ok(LocalKeyHandle(KEYS.insert(unwrapped)))
    })())
}

pub fn key_crypto_box_random_nonce() -> Vec<u8> {
    keyfort_crypto::crypto_box_random_nonce()
}

pub fn key_crypto_box(
    recipient: LocalKeyHandle,
    sender: LocalKeyHandle,
    message: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>> {
    track((|| {
        let recip = KEYS.get(recipient.0)?;
        let sender = KEYS.get(sender.0)?;
        keyfort_crypto::crypto_box(&recip, &sender, message, nonce)
    })())
}

pub fn key_crypto_box_open(
    recipient: LocalKeyHandle,
    sender: LocalKeyHandle,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>> {
    track((|| {
        let recip = KEYS.get(recipient.0)?;
        let sender = KEYS.get(sender.0)?;
        keyfort_crypto::crypto_box_open(&recip, &sender, ciphertext, nonce)
    })())
}

pub fn key_crypto_box_seal(recipient: LocalKeyHandle, message: &[u8]) -> Result<Vec<u8>> {
    track((|| {
        let recip = KEYS.get(recipient.0)?;
        keyfort_crypto::crypto_box_seal(&recip, message)
    })())
}

pub fn key_crypto_box_seal_open(recipient: LocalKeyHandle, ciphertext: &[u8]) -> Result<Vec<u8>> {
    track((|| {
        let recip = KEYS.get(recipient.0)?;
        keyfort_crypto::crypto_box_seal_open(&recip, ciphertext)
    })())
}

pub fn key_free(handle: LocalKeyHandle) -> Result<()> {
    track(KEYS.remove(handle.0).map(|_| ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_uri(tag: &str) -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!(
            "memory://surface-{}-{}",
            tag,
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[tokio::test]
    async fn test_store_and_session_over_handles() {
        let uri = mem_uri("roundtrip");
        let key = store_generate_raw_key(None);

        let store = store_provision(&uri, Some("raw"), &key, None, false)
            .await
            .unwrap();
        assert_eq!(store_get_uri(store).unwrap(), uri);
        assert_eq!(store_get_profile_name(store).unwrap(), "default");

        let session = session_start(store, None, false).await.unwrap();
        session_update(
            session,
            EntryOperation::Insert,
            "item",
            "one",
            b"value",
            Some(r#"{"color": "blue", "~kind": "demo"}"#),
            None,
        )
        .await
        .unwrap();

        let found = session_fetch(session, "item", "one", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry_list_count(found).unwrap(), 1);
        let entry = entry_list_get(found, 0).unwrap();
        assert_eq!(entry.value, b"value");
        assert_eq!(entry.tags.len(), 2);
        entry_list_free(found).unwrap();

        assert_eq!(
            session_count(session, Some("item"), Some(r#"{"color": "blue"}"#))
                .await
                .unwrap(),
            1
        );

        session_close(session, true).await.unwrap();
        store_close(store, false).await.unwrap();

        // Freed handles are invalid
        assert!(session_count(session, None, None).await.is_err());
        assert!(store_get_uri(store).is_err());
    }

    #[tokio::test]
    async fn test_error_is_recorded_for_failures() {
        crate::error::clear_last_error();
        let uri = mem_uri("errors");
        let result = store_open(&uri, None, "passkey", None).await;
        assert!(result.is_err());

        let (code, message) = crate::error::get_current_error();
        assert_eq!(code, 6);
        assert!(message.unwrap().contains("No store found"));
    }

    #[tokio::test]
    async fn test_transaction_over_handles() {
        let uri = mem_uri("txn");
        let key = store_generate_raw_key(None);
        let store = store_provision(&uri, Some("raw"), &key, None, false)
            .await
            .unwrap();

        let txn = session_start(store, None, true).await.unwrap();
        session_update(txn, EntryOperation::Insert, "item", "a", b"1", None, None)
            .await
            .unwrap();
        // Closing without commit discards the buffered write
        session_close(txn, false).await.unwrap();

        let session = session_start(store, None, false).await.unwrap();
        assert!(session_fetch(session, "item", "a", false)
            .await
            .unwrap()
            .is_none());
        session_close(session, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_over_handles() {
        let uri = mem_uri("scan");
        let key = store_generate_raw_key(None);
        let store = store_provision(&uri, Some("raw"), &key, None, false)
            .await
            .unwrap();

        let session = session_start(store, None, false).await.unwrap();
        for index in 0..40 {
            session_update(
                session,
                EntryOperation::Insert,
                "item",
                &format!("entry-{:02}", index),
                b"v",
                None,
                None,
            )
            .await
            .unwrap();
        }
        session_close(session, true).await.unwrap();

        let scan = scan_start(store, None, Some("item"), None, None, None)
            .await
            .unwrap();
        let first = scan_next(scan).await.unwrap().unwrap();
        assert_eq!(entry_list_count(first).unwrap(), 32);
        entry_list_free(first).unwrap();

        let second = scan_next(scan).await.unwrap().unwrap();
        assert_eq!(entry_list_count(second).unwrap(), 8);
        entry_list_free(second).unwrap();

        assert!(scan_next(scan).await.unwrap().is_none());
        scan_free(scan).unwrap();
    }

    #[tokio::test]
    async fn test_key_management_over_handles() {
        let uri = mem_uri("keys");
        let raw = store_generate_raw_key(None);
        let store = store_provision(&uri, Some("raw"), &raw, None, false)
            .await
            .unwrap();
        let session = session_start(store, None, false).await.unwrap();

        let key = key_generate("ed25519", false).unwrap();
        session_insert_key(session, key, "signing", Some("meta"), None, None)
            .await
            .unwrap();

        let list = session_fetch_all_keys(session, Some("ed25519"), None, None, None)
            .await
            .unwrap();
        assert_eq!(key_entry_list_count(list).unwrap(), 1);
        assert_eq!(key_entry_list_get_name(list, 0).unwrap(), "signing");
        assert_eq!(key_entry_list_get_algorithm(list, 0).unwrap(), "ed25519");

        let loaded = key_entry_list_load_local(list, 0).unwrap();
        let signature = key_sign_message(loaded, b"message", None).unwrap();
        assert!(key_verify_signature(key, b"message", &signature, None).unwrap());

        key_entry_list_free(list).unwrap();
        key_free(loaded).unwrap();
        key_free(key).unwrap();
        assert!(key_get_algorithm(key).is_err());
    }

    #[test]
    fn test_key_handle_surface() {
        let alice = key_generate("x25519", false).unwrap();
        let bob = key_generate("x25519", false).unwrap();

        let shared = key_from_key_exchange("xc20p", alice, bob).unwrap();
        let nonce = key_aead_random_nonce(shared).unwrap();
        let enc = key_aead_encrypt(shared, b"secret", &nonce, &[]).unwrap();
        let decrypted =
            key_aead_decrypt(shared, &enc.ciphertext, Some(&enc.tag), &enc.nonce, &[]).unwrap();
        assert_eq!(decrypted, b"secret");

        let jwk = key_get_jwk_public(alice, None).unwrap();
        let restored = key_from_jwk(&jwk).unwrap();
        assert_eq!(
            key_get_public_bytes(restored).unwrap(),
            key_get_public_bytes(alice).unwrap()
        );
        assert_eq!(
            key_get_jwk_thumbprint(alice, None).unwrap(),
            key_get_jwk_thumbprint(restored, None).unwrap()
        );

        for handle in [alice, bob, shared, restored] {
            key_free(handle).unwrap();
        }
    }
}
