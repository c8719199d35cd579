//! Sessions and transactions over a store profile.
//!
//! An auto-commit session applies and persists every mutation immediately.
//! A transaction buffers its mutations on a working copy of the profile and
//! applies them atomically at commit; the commit fails with `Busy` when
//! another writer changed the profile in the meantime. Reads inside a
//! transaction see its own uncommitted writes.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use keyfort_common::{expiry_timestamp, Entry, EntryOperation, EntryTag, Error, Result, TagFilter};
use keyfort_crypto::{KeyAlg, LocalKey};

use crate::format::StoredEntry;
use crate::store::StoreInner;

/// Entry category reserved for managed keys.
pub const KEY_CATEGORY: &str = "$key";

/// A stored key with its parameters.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub name: String,
    pub algorithm: KeyAlg,
    pub metadata: Option<String>,
    pub tags: Vec<EntryTag>,
    key: LocalKey,
}

impl KeyEntry {
    /// The key object, ready for cryptographic operations.
    pub fn load_local_key(&self) -> LocalKey {
        self.key.clone()
    }
}

#[derive(Serialize, Deserialize)]
struct KeyParams {
    alg: String,
    jwk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
}

/// An open session or transaction on one profile.
pub struct Session {
    store: Arc<StoreInner>,
    profile: String,
    is_txn: bool,
    base_version: u64,
    // Working copy of the profile; only consulted in transaction mode
    working: Vec<StoredEntry>,
}

impl Session {
    pub(crate) fn new(
        store: Arc<StoreInner>,
        profile: String,
        is_txn: bool,
        base_version: u64,
        working: Vec<StoredEntry>,
    ) -> Self {
        Self {
            store,
            profile,
            is_txn,
            base_version,
            working,
        }
    }

    /// The profile this session operates on.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Whether this session is a transaction.
    pub fn is_transaction(&self) -> bool {
        self.is_txn
    }

    /// Count entries matching the category and tag filter.
    pub async fn count(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<TagFilter>,
    ) -> Result<i64> {
        let entries = self.snapshot().await?;
        let now = Utc::now();
        let mut count = 0i64;
        for stored in &entries {
            if entry_matches(stored, category, tag_filter.as_ref(), &now) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Fetch a single entry by category and name.
    ///
    /// Returns `None` when absent or expired. `for_update` is accepted for
    /// API compatibility; writers are always serialized here.
    pub async fn fetch(
        &mut self,
        category: &str,
        name: &str,
        _for_update: bool,
    ) -> Result<Option<Entry>> {
        check_category(category)?;
        let entries = self.snapshot().await?;
        let now = Utc::now();
        Ok(entries
            .iter()
            .find(|e| e.category == category && e.name == name && !e.is_expired(&now))
            .map(StoredEntry::to_entry))
    }

    /// Fetch all entries matching the category and tag filter.
    pub async fn fetch_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<TagFilter>,
        limit: Option<i64>,
        _for_update: bool,
    ) -> Result<Vec<Entry>> {
        if let Some(category) = category {
            check_category(category)?;
        }
        let entries = self.snapshot().await?;
        let now = Utc::now();
        let mut found = Vec::new();
        for stored in &entries {
            if entry_matches(stored, category, tag_filter.as_ref(), &now) {
                found.push(stored.to_entry());
                if let Some(limit) = limit {
                    if found.len() as i64 >= limit {
                        break;
                    }
                }
            }
        }
        Ok(found)
    }

    /// Insert, replace, or remove an entry.
    ///
    /// # Errors
    /// - `Duplicate` when inserting over an existing entry
    /// - `NotFound` when replacing or removing a missing entry
    /// - `Input` for the reserved key category or an invalid expiry
    pub async fn update(
        &mut self,
        operation: EntryOperation,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<Vec<EntryTag>>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        check_category(category)?;
        let expiry = expiry_ms.map(expiry_timestamp).transpose()?;
        let tags = tags.unwrap_or_default();
        let entry = StoredEntry::new(category, name, value, &tags, expiry);
        debug!(profile = %self.profile, category, name, ?operation, "updating entry");
        self.mutate(move |entries| apply_update(entries, operation, entry))
            .await
    }

    /// Remove all entries matching the category and tag filter.
    ///
    /// Returns the number of entries removed.
    pub async fn remove_all(
        &mut self,
        category: Option<&str>,
        tag_filter: Option<TagFilter>,
    ) -> Result<i64> {
        if let Some(category) = category {
            check_category(category)?;
        }
        let category = category.map(str::to_string);
        let now = Utc::now();
        self.mutate(move |entries| {
            let before = entries.len();
            entries.retain(|stored| {
                !entry_matches(stored, category.as_deref(), tag_filter.as_ref(), &now)
            });
            Ok((before - entries.len()) as i64)
        })
        .await
    }

    /// Store a key under a name.
    ///
    /// # Errors
    /// - `Duplicate` if a key with this name exists
    pub async fn insert_key(
        &mut self,
        name: &str,
        key: &LocalKey,
        metadata: Option<&str>,
        tags: Option<Vec<EntryTag>>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        let jwk = if key.has_secret() {
            key.to_jwk_secret()?
        } else {
            key.to_jwk_public(None)?
        };
        let params = KeyParams {
            alg: key.algorithm().to_string(),
            jwk,
            metadata: metadata.map(str::to_string),
        };
        let value = serde_json::to_vec(&params)
            .map_err(|e| Error::Unexpected(format!("Key serialization failed: {}", e)))?;
        let expiry = expiry_ms.map(expiry_timestamp).transpose()?;
        let tags = tags.unwrap_or_default();
        let entry = StoredEntry::new(KEY_CATEGORY, name, &value, &tags, expiry);
        debug!(profile = %self.profile, name, "inserting key");
        self.mutate(move |entries| apply_update(entries, EntryOperation::Insert, entry))
            .await
    }

    /// Fetch a stored key by name.
    pub async fn fetch_key(&mut self, name: &str, _for_update: bool) -> Result<Option<KeyEntry>> {
        let entries = self.snapshot().await?;
        let now = Utc::now();
        entries
            .iter()
            .find(|e| e.category == KEY_CATEGORY && e.name == name && !e.is_expired(&now))
            .map(decode_key_entry)
            .transpose()
    }

    /// Fetch all stored keys matching the filters.
    ///
    /// Keys may be filtered by algorithm, JWK thumbprint, and user tags.
    pub async fn fetch_all_keys(
        &mut self,
        algorithm: Option<KeyAlg>,
        thumbprint: Option<&str>,
        tag_filter: Option<TagFilter>,
        limit: Option<i64>,
    ) -> Result<Vec<KeyEntry>> {
        let entries = self.snapshot().await?;
        let now = Utc::now();
        let mut found = Vec::new();
        for stored in &entries {
            if stored.category != KEY_CATEGORY || stored.is_expired(&now) {
                continue;
            }
            let key_entry = decode_key_entry(stored)?;
            if let Some(algorithm) = algorithm {
                if key_entry.algorithm != algorithm {
                    continue;
                }
            }
            if let Some(thumbprint) = thumbprint {
                match key_entry.key.to_jwk_thumbprint(None) {
                    Ok(thumb) if thumb == thumbprint => {}
                    _ => continue,
                }
            }
            if let Some(filter) = &tag_filter {
                if !filter.matches(&key_entry.tags) {
                    continue;
                }
            }
            found.push(key_entry);
            if let Some(limit) = limit {
                if found.len() as i64 >= limit {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Update the metadata, tags, or expiry of a stored key.
    ///
    /// The key material itself is immutable.
    ///
    /// # Errors
    /// - `NotFound` if no key with this name exists
    pub async fn update_key(
        &mut self,
        name: &str,
        metadata: Option<&str>,
        tags: Option<Vec<EntryTag>>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        let existing = self
            .fetch_key(name, true)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Key not found: {}", name)))?;
        let jwk = if existing.key.has_secret() {
            existing.key.to_jwk_secret()?
        } else {
            existing.key.to_jwk_public(None)?
        };
        let params = KeyParams {
            alg: existing.algorithm.to_string(),
            jwk,
            metadata: metadata.map(str::to_string),
        };
        let value = serde_json::to_vec(&params)
            .map_err(|e| Error::Unexpected(format!("Key serialization failed: {}", e)))?;
        let expiry = expiry_ms.map(expiry_timestamp).transpose()?;
        let tags = tags.unwrap_or_else(|| existing.tags.clone());
        let entry = StoredEntry::new(KEY_CATEGORY, name, &value, &tags, expiry);
        self.mutate(move |entries| apply_update(entries, EntryOperation::Replace, entry))
            .await
    }

    /// Remove a stored key.
    ///
    /// # Errors
    /// - `NotFound` if no key with this name exists
    pub async fn remove_key(&mut self, name: &str) -> Result<()> {
        let entry = StoredEntry::new(KEY_CATEGORY, name, &[], &[], None);
        self.mutate(move |entries| apply_update(entries, EntryOperation::Remove, entry))
            .await
    }

    /// Commit the session.
    ///
    /// For a transaction, applies all buffered mutations atomically.
    ///
    /// # Errors
    /// - `Busy` when another writer modified the profile since the
    ///   transaction began
    /// - `NotFound` when the profile was removed in the meantime
    pub async fn commit(mut self) -> Result<()> {
        if !self.is_txn {
            return Ok(());
        }
        let _guard = self.store.commit_lock.lock().await;
        let mut state = self.store.state.write().await;
        if state.profile_version(&self.profile) != self.base_version {
            return Err(Error::Busy(format!(
                "Profile '{}' was modified by a concurrent writer",
                self.profile
            )));
        }
        let profile = state
            .data
            .profiles
            .get_mut(&self.profile)
            .ok_or_else(|| Error::NotFound(format!("Unknown profile: {}", self.profile)))?;

        // Expired entries are purged at commit
        let now = Utc::now();
        self.working.retain(|e| !e.is_expired(&now));
        profile.entries = std::mem::take(&mut self.working);
        state.bump_version(&self.profile);
        let data = state.data.clone();
        drop(state);
        self.store.persist(&data).await?;
        debug!(profile = %self.profile, "committed transaction");
        Ok(())
    }

    /// Discard the session.
    ///
    /// For a transaction, all buffered mutations are dropped. Auto-commit
    /// sessions have nothing pending; their mutations are already applied.
    pub async fn rollback(self) -> Result<()> {
        if self.is_txn {
            debug!(profile = %self.profile, "rolled back transaction");
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<StoredEntry>> {
        if self.is_txn {
            return Ok(self.working.clone());
        }
        let state = self.store.state.read().await;
        Ok(state
            .data
            .profiles
            .get(&self.profile)
            .ok_or_else(|| Error::NotFound(format!("Unknown profile: {}", self.profile)))?
            .entries
            .clone())
    }

    async fn mutate<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Vec<StoredEntry>) -> Result<R>,
    {
        if self.is_txn {
            return f(&mut self.working);
        }
        let _guard = self.store.commit_lock.lock().await;
        let mut state = self.store.state.write().await;
        let profile = state
            .data
            .profiles
            .get_mut(&self.profile)
            .ok_or_else(|| Error::NotFound(format!("Unknown profile: {}", self.profile)))?;
        let result = f(&mut profile.entries)?;
        state.bump_version(&self.profile);
        let data = state.data.clone();
        drop(state);
        self.store.persist(&data).await?;
        Ok(result)
    }
}

fn check_category(category: &str) -> Result<()> {
    if category == KEY_CATEGORY {
        return Err(Error::Input(format!(
            "Category '{}' is reserved for managed keys",
            KEY_CATEGORY
        )));
    }
    Ok(())
}

fn entry_matches(
    stored: &StoredEntry,
    category: Option<&str>,
    tag_filter: Option<&TagFilter>,
    now: &chrono::DateTime<Utc>,
) -> bool {
    if stored.is_expired(now) {
        return false;
    }
    match category {
        Some(category) => {
            if stored.category != category {
                return false;
            }
        }
        // Managed keys are invisible to unscoped entry operations
        None => {
            if stored.category == KEY_CATEGORY {
                return false;
            }
        }
    }
    match tag_filter {
        Some(filter) => filter.matches(&stored.to_entry().tags),
        None => true,
    }
}

fn apply_update(
    entries: &mut Vec<StoredEntry>,
    operation: EntryOperation,
    entry: StoredEntry,
) -> Result<()> {
    let now = Utc::now();
    let position = entries
        .iter()
        .position(|e| e.category == entry.category && e.name == entry.name);

    // An expired entry counts as absent
    let position = match position {
        Some(idx) if entries[idx].is_expired(&now) => {
            entries.remove(idx);
            None
        }
        other => other,
    };

    match (operation, position) {
        (EntryOperation::Insert, None) => {
            entries.push(entry);
            Ok(())
        }
        (EntryOperation::Insert, Some(_)) => Err(Error::Duplicate(format!(
            "Entry already exists: {}/{}",
            entry.category, entry.name
        ))),
        (EntryOperation::Replace, Some(idx)) => {
            entries[idx] = entry;
            Ok(())
        }
        (EntryOperation::Remove, Some(idx)) => {
            entries.remove(idx);
            Ok(())
        }
        (EntryOperation::Replace | EntryOperation::Remove, None) => Err(Error::NotFound(format!(
            "Entry not found: {}/{}",
            entry.category, entry.name
        ))),
    }
}

fn decode_key_entry(stored: &StoredEntry) -> Result<KeyEntry> {
    let params: KeyParams = serde_json::from_slice(&stored.value)
        .map_err(|_| Error::Unexpected(format!("Malformed key record: {}", stored.name)))?;
    let algorithm = KeyAlg::from_str(&params.alg)?;
    let key = LocalKey::from_jwk(&params.jwk)?;
    Ok(KeyEntry {
        name: stored.name.clone(),
        algorithm,
        metadata: params.metadata,
        tags: stored.to_entry().tags,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use keyfort_crypto::KdfMethod;

    async fn test_store(tag: &str) -> Store {
        use rand::RngCore;
        let mut id = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut id);
        let uri = format!("memory://session-{}-{}", tag, hex::encode(id));
        Store::provision(
            &uri,
            KdfMethod::Raw,
            &keyfort_crypto::generate_raw_key(None),
            None,
            false,
        )
        .await
        .unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> Option<Vec<EntryTag>> {
        Some(
            pairs
                .iter()
                .map(|(name, value)| EntryTag::Encrypted(name.to_string(), value.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_insert_fetch_roundtrip() {
        let store = test_store("roundtrip").await;
        let mut session = store.session(None).await.unwrap();

        session
            .update(
                EntryOperation::Insert,
                "item",
                "one",
                b"value-one",
                tags(&[("color", "blue")]),
                None,
            )
            .await
            .unwrap();

        let entry = session.fetch("item", "one", false).await.unwrap().unwrap();
        assert_eq!(entry.value, b"value-one");
        assert_eq!(entry.tags.len(), 1);
        assert!(session.fetch("item", "missing", false).await.unwrap().is_none());
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let store = test_store("duplicate").await;
        let mut session = store.session(None).await.unwrap();

        session
            .update(EntryOperation::Insert, "item", "one", b"a", None, None)
            .await
            .unwrap();
        let result = session
            .update(EntryOperation::Insert, "item", "one", b"b", None, None)
            .await;
        assert!(matches!(result, Err(Error::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_replace_and_remove() {
        let store = test_store("replace").await;
        let mut session = store.session(None).await.unwrap();

        assert!(matches!(
            session
                .update(EntryOperation::Replace, "item", "one", b"x", None, None)
                .await,
            Err(Error::NotFound(_))
        ));

        session
            .update(EntryOperation::Insert, "item", "one", b"a", None, None)
            .await
            .unwrap();
        session
            .update(EntryOperation::Replace, "item", "one", b"b", None, None)
            .await
            .unwrap();
        let entry = session.fetch("item", "one", false).await.unwrap().unwrap();
        assert_eq!(entry.value, b"b");

        session
            .update(EntryOperation::Remove, "item", "one", &[], None, None)
            .await
            .unwrap();
        assert!(session.fetch("item", "one", false).await.unwrap().is_none());
        assert!(matches!(
            session
                .update(EntryOperation::Remove, "item", "one", &[], None, None)
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_count_and_fetch_all_with_filter() {
        let store = test_store("filter").await;
        let mut session = store.session(None).await.unwrap();

        for (name, color) in [("one", "blue"), ("two", "blue"), ("three", "red")] {
            session
                .update(
                    EntryOperation::Insert,
                    "item",
                    name,
                    b"v",
                    tags(&[("color", color)]),
                    None,
                )
                .await
                .unwrap();
        }
        session
            .update(EntryOperation::Insert, "other", "four", b"v", None, None)
            .await
            .unwrap();

        assert_eq!(session.count(Some("item"), None).await.unwrap(), 3);
        assert_eq!(session.count(None, None).await.unwrap(), 4);

        let filter = TagFilter::from_json(serde_json::json!({ "color": "blue" })).unwrap();
        assert_eq!(session.count(Some("item"), Some(filter.clone())).await.unwrap(), 2);

        let found = session
            .fetch_all(Some("item"), Some(filter.clone()), None, false)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let limited = session
            .fetch_all(Some("item"), Some(filter), Some(1), false)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_all() {
        let store = test_store("remove-all").await;
        let mut session = store.session(None).await.unwrap();

        for (name, color) in [("one", "blue"), ("two", "red")] {
            session
                .update(
                    EntryOperation::Insert,
                    "item",
                    name,
                    b"v",
                    tags(&[("color", color)]),
                    None,
                )
                .await
                .unwrap();
        }

        let filter = TagFilter::from_json(serde_json::json!({ "color": "blue" })).unwrap();
        assert_eq!(session.remove_all(Some("item"), Some(filter)).await.unwrap(), 1);
        assert_eq!(session.count(Some("item"), None).await.unwrap(), 1);
        assert_eq!(session.remove_all(None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_invisible() {
        let store = test_store("expiry").await;
        let mut session = store.session(None).await.unwrap();

        session
            .update(
                EntryOperation::Insert,
                "item",
                "short-lived",
                b"v",
                None,
                Some(-1000),
            )
            .await
            .unwrap();

        assert!(session
            .fetch("item", "short-lived", false)
            .await
            .unwrap()
            .is_none());
        assert_eq!(session.count(Some("item"), None).await.unwrap(), 0);

        // Inserting over an expired entry succeeds
        session
            .update(EntryOperation::Insert, "item", "short-lived", b"v2", None, None)
            .await
            .unwrap();
        assert!(session
            .fetch("item", "short-lived", false)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reserved_category_rejected() {
        let store = test_store("reserved").await;
        let mut session = store.session(None).await.unwrap();
        assert!(matches!(
            session
                .update(EntryOperation::Insert, KEY_CATEGORY, "k", b"v", None, None)
                .await,
            Err(Error::Input(_))
        ));
        assert!(session.fetch(KEY_CATEGORY, "k", false).await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_commit_applies_atomically() {
        let store = test_store("txn-commit").await;

        let mut txn = store.transaction(None).await.unwrap();
        txn.update(EntryOperation::Insert, "item", "one", b"a", None, None)
            .await
            .unwrap();
        txn.update(EntryOperation::Insert, "item", "two", b"b", None, None)
            .await
            .unwrap();

        // Uncommitted writes are visible inside the transaction only
        assert_eq!(txn.count(Some("item"), None).await.unwrap(), 2);
        let mut outside = store.session(None).await.unwrap();
        assert_eq!(outside.count(Some("item"), None).await.unwrap(), 0);

        txn.commit().await.unwrap();
        assert_eq!(outside.count(Some("item"), None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards() {
        let store = test_store("txn-rollback").await;

        let mut txn = store.transaction(None).await.unwrap();
        txn.update(EntryOperation::Insert, "item", "one", b"a", None, None)
            .await
            .unwrap();
        txn.rollback().await.unwrap();

        let mut session = store.session(None).await.unwrap();
        assert!(session.fetch("item", "one", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_conflict_is_busy() {
        let store = test_store("txn-conflict").await;

        let mut txn = store.transaction(None).await.unwrap();
        txn.update(EntryOperation::Insert, "item", "mine", b"a", None, None)
            .await
            .unwrap();

        // A concurrent auto-commit write bumps the profile version
        let mut session = store.session(None).await.unwrap();
        session
            .update(EntryOperation::Insert, "item", "theirs", b"b", None, None)
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert!(matches!(txn.commit().await, Err(Error::Busy(_))));

        // The concurrent write survives, the failed transaction leaves no trace
        let mut check = store.session(None).await.unwrap();
        assert!(check.fetch("item", "theirs", false).await.unwrap().is_some());
        assert!(check.fetch("item", "mine", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_key_store_roundtrip() {
        let store = test_store("keys").await;
        let mut session = store.session(None).await.unwrap();

        let key = LocalKey::generate(KeyAlg::Ed25519, false).unwrap();
        session
            .insert_key("signing", &key, Some("primary"), None, None)
            .await
            .unwrap();

        let found = session.fetch_key("signing", false).await.unwrap().unwrap();
        assert_eq!(found.algorithm, KeyAlg::Ed25519);
        assert_eq!(found.metadata.as_deref(), Some("primary"));

        // The restored key signs and the original verifies
        let restored = found.load_local_key();
        let signature = restored.sign_message(b"message", None).unwrap();
        assert!(key.verify_signature(b"message", &signature, None).unwrap());

        assert!(matches!(
            session.insert_key("signing", &key, None, None, None).await,
            Err(Error::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_symmetric_key_roundtrip_preserves_algorithm() {
        let store = test_store("key-symmetric").await;
        let mut session = store.session(None).await.unwrap();

        for alg in [
            KeyAlg::Aes128Gcm,
            KeyAlg::Aes256Gcm,
            KeyAlg::Aes128Kw,
            KeyAlg::Aes256Kw,
            KeyAlg::Chacha20C20P,
            KeyAlg::Chacha20Xc20P,
        ] {
            let name = alg.to_string();
            let key = LocalKey::generate(alg, false).unwrap();
            session.insert_key(&name, &key, None, None, None).await.unwrap();

            let found = session.fetch_key(&name, false).await.unwrap().unwrap();
            assert_eq!(found.algorithm, alg);
            let restored = found.load_local_key();
            assert_eq!(restored.algorithm(), alg, "{}", alg);
            assert_eq!(
                restored.to_secret_bytes().unwrap(),
                key.to_secret_bytes().unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_fetch_all_keys_filters() {
        let store = test_store("key-filters").await;
        let mut session = store.session(None).await.unwrap();

        let ed = LocalKey::generate(KeyAlg::Ed25519, false).unwrap();
        let x = LocalKey::generate(KeyAlg::X25519, false).unwrap();
        session.insert_key("ed", &ed, None, None, None).await.unwrap();
        session.insert_key("x", &x, None, None, None).await.unwrap();

        let found = session
            .fetch_all_keys(Some(KeyAlg::Ed25519), None, None, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "ed");

        let thumb = ed.to_jwk_thumbprint(None).unwrap();
        let found = session
            .fetch_all_keys(None, Some(&thumb), None, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "ed");

        // Keys are invisible to generic entry operations
        assert_eq!(session.count(None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_and_remove_key() {
        let store = test_store("key-update").await;
        let mut session = store.session(None).await.unwrap();

        let key = LocalKey::generate(KeyAlg::Ed25519, false).unwrap();
        session.insert_key("k", &key, None, None, None).await.unwrap();

        session
            .update_key("k", Some("rotated"), None, None)
            .await
            .unwrap();
        let found = session.fetch_key("k", false).await.unwrap().unwrap();
        assert_eq!(found.metadata.as_deref(), Some("rotated"));
        assert_eq!(
            found.load_local_key().to_secret_bytes().unwrap(),
            key.to_secret_bytes().unwrap()
        );

        session.remove_key("k").await.unwrap();
        assert!(session.fetch_key("k", false).await.unwrap().is_none());
        assert!(matches!(
            session.remove_key("k").await,
            Err(Error::NotFound(_))
        ));
    }
}
