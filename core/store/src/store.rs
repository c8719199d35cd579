//! Store lifecycle and profile management.
//!
//! A store is one encrypted blob holding any number of profiles, each an
//! isolated namespace of entries. All content is decrypted once at open
//! and held behind a read-write lock; mutations are serialized by a commit
//! lock and written back through the backend on every commit.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use rand::RngCore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use keyfort_common::{Error, Result, TagFilter};
use keyfort_crypto::kdf::SALT_LENGTH;
use keyfort_crypto::{derive_master_key, KdfMethod, KeyAlg, LocalKey, MasterKey};

use crate::backend::{FileBackend, MemoryBackend, StorageBackend};
use crate::format::{self, Envelope, ProfileData, StoreData};
use crate::scan::Scan;
use crate::session::Session;

/// Profile name used when none is given at provision time.
pub const DEFAULT_PROFILE: &str = "default";

/// A parsed store location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSpec {
    /// Process-local store, shared by name.
    Memory(String),
    /// File-backed store.
    File(PathBuf),
}

impl StoreSpec {
    /// Parse a store URI.
    ///
    /// Accepts `memory://name`, `file://path`, or a bare filesystem path.
    ///
    /// # Errors
    /// - `Unsupported` for any other scheme
    /// - `Input` for an empty location
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(name) = uri.strip_prefix("memory://") {
            if name.is_empty() {
                return Err(Error::Input("Memory store requires a name".to_string()));
            }
            return Ok(StoreSpec::Memory(name.to_string()));
        }
        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(Error::Input("File store requires a path".to_string()));
            }
            return Ok(StoreSpec::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            return Err(Error::Unsupported(format!(
                "Unsupported store scheme: {}",
                scheme
            )));
        }
        if uri.is_empty() {
            return Err(Error::Input("Store URI cannot be empty".to_string()));
        }
        Ok(StoreSpec::File(PathBuf::from(uri)))
    }

    fn into_backend(self, uri: &str) -> Arc<dyn StorageBackend> {
        match self {
            StoreSpec::Memory(name) => Arc::new(MemoryBackend::new(&name, uri)),
            StoreSpec::File(path) => Arc::new(FileBackend::new(path, uri)),
        }
    }
}

// Per-target registry: handles opened on the same URI share one
// StoreInner so their writers serialize through one commit lock, and
// structural operations (provision/open/remove) on a target exclude
// each other.
struct Target {
    structural: Arc<Mutex<()>>,
    inner: Weak<StoreInner>,
}

static TARGETS: Lazy<std::sync::Mutex<HashMap<String, Target>>> =
    Lazy::new(|| std::sync::Mutex::new(HashMap::new()));

fn targets() -> std::sync::MutexGuard<'static, HashMap<String, Target>> {
    match TARGETS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn target_lock(uri: &str) -> Arc<Mutex<()>> {
    targets()
        .entry(uri.to_string())
        .or_insert_with(|| Target {
            structural: Arc::new(Mutex::new(())),
            inner: Weak::new(),
        })
        .structural
        .clone()
}

fn shared_inner(uri: &str) -> Option<Arc<StoreInner>> {
    targets().get(uri).and_then(|target| target.inner.upgrade())
}

fn register_inner(uri: &str, inner: &Arc<StoreInner>) {
    if let Some(target) = targets().get_mut(uri) {
        target.inner = Arc::downgrade(inner);
    }
}

struct KdfState {
    method: KdfMethod,
    salt: Vec<u8>,
    master: MasterKey,
}

pub(crate) struct StoreState {
    pub(crate) data: StoreData,
    // Per-profile commit counters backing optimistic transaction checks
    pub(crate) versions: HashMap<String, u64>,
}

impl StoreState {
    pub(crate) fn profile_version(&self, profile: &str) -> u64 {
        self.versions.get(profile).copied().unwrap_or(0)
    }

    pub(crate) fn bump_version(&mut self, profile: &str) {
        *self.versions.entry(profile.to_string()).or_insert(0) += 1;
    }
}

pub(crate) struct StoreInner {
    backend: Arc<dyn StorageBackend>,
    kdf: RwLock<KdfState>,
    store_key: LocalKey,
    pub(crate) state: RwLock<StoreState>,
    pub(crate) commit_lock: Mutex<()>,
}

impl StoreInner {
    /// Serialize and save the given content.
    ///
    /// Callers must hold the commit lock.
    pub(crate) async fn persist(&self, data: &StoreData) -> Result<()> {
        let kdf = self.kdf.read().await;
        let bytes = format::seal(
            data,
            &self.store_key,
            kdf.method.as_uri(),
            &kdf.salt,
            &kdf.master,
        )?;
        drop(kdf);
        self.backend.save(bytes).await
    }
}

/// An open store.
///
/// Cloning is cheap and all clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    // Profile used by sessions when none is given, fixed at open time
    session_profile: String,
}

impl Store {
    /// Create a new store at the given location.
    ///
    /// # Preconditions
    /// - For the raw key method, `pass_key` must be a generated raw key
    ///
    /// # Postconditions
    /// - The store exists with a single empty profile, which is the default
    ///
    /// # Errors
    /// - `Duplicate` if the location already holds a store and `recreate`
    ///   is not set
    pub async fn provision(
        uri: &str,
        key_method: KdfMethod,
        pass_key: &str,
        profile: Option<&str>,
        recreate: bool,
    ) -> Result<Store> {
        let backend = StoreSpec::parse(uri)?.into_backend(uri);
        let structural = target_lock(uri);
        let _guard = structural.lock().await;
        if !recreate && backend.load().await?.is_some() {
            return Err(Error::Duplicate(format!(
                "A store already exists at '{}'",
                uri
            )));
        }

        let mut salt = vec![0u8; SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let master = derive_master_key(key_method, pass_key, &salt)?;
        let store_key = LocalKey::generate(KeyAlg::Chacha20Xc20P, false)?;

        let profile = profile.unwrap_or(DEFAULT_PROFILE).to_string();
        let data = StoreData::new(&profile);

        let inner = Arc::new(StoreInner {
            backend,
            kdf: RwLock::new(KdfState {
                method: key_method,
                salt,
                master,
            }),
            store_key,
            state: RwLock::new(StoreState {
                data: data.clone(),
                versions: HashMap::new(),
            }),
            commit_lock: Mutex::new(()),
        });
        inner.persist(&data).await?;
        register_inner(uri, &inner);
        info!(uri, profile = %profile, "provisioned store");

        Ok(Store {
            inner,
            session_profile: profile,
        })
    }

    /// Open an existing store.
    ///
    /// The key method is read from the store header unless given. With a
    /// profile, sessions default to that profile instead of the store's
    /// default.
    ///
    /// # Errors
    /// - `NotFound` if no store exists at the location, or the requested
    ///   profile does not exist
    /// - `Encryption` if the pass key is incorrect
    pub async fn open(
        uri: &str,
        key_method: Option<KdfMethod>,
        pass_key: &str,
        profile: Option<&str>,
    ) -> Result<Store> {
        let backend = StoreSpec::parse(uri)?.into_backend(uri);
        let structural = target_lock(uri);
        let _guard = structural.lock().await;
        let bytes = backend
            .load()
            .await?
            .ok_or_else(|| Error::NotFound(format!("No store found at '{}'", uri)))?;

        // The pass key is always verified against the persisted envelope,
        // even when the target is already open in this process
        let envelope = Envelope::parse(&bytes)?;
        let method = match key_method {
            Some(method) => method,
            None => envelope.kdf.parse()?,
        };
        let master = derive_master_key(method, pass_key, &envelope.salt)?;
        let store_key = envelope.unwrap_store_key(&master)?;
        let data = envelope.decrypt_body(&store_key)?;

        if let Some(existing) = shared_inner(uri) {
            let state = existing.state.read().await;
            let session_profile = match profile {
                Some(name) => {
                    if !state.data.profiles.contains_key(name) {
                        return Err(Error::NotFound(format!("Unknown profile: {}", name)));
                    }
                    name.to_string()
                }
                None => state.data.default_profile.clone(),
            };
            drop(state);
            debug!(uri, profile = %session_profile, "opened store (shared)");
            return Ok(Store {
                inner: existing,
                session_profile,
            });
        }

        let session_profile = match profile {
            Some(name) => {
                if !data.profiles.contains_key(name) {
                    return Err(Error::NotFound(format!("Unknown profile: {}", name)));
                }
                name.to_string()
            }
            None => data.default_profile.clone(),
        };
        debug!(uri, profile = %session_profile, "opened store");

        let inner = Arc::new(StoreInner {
            backend,
            kdf: RwLock::new(KdfState {
                method,
                salt: envelope.salt.clone(),
                master,
            }),
            store_key,
            state: RwLock::new(StoreState {
                data,
                versions: HashMap::new(),
            }),
            commit_lock: Mutex::new(()),
        });
        register_inner(uri, &inner);

        Ok(Store {
            inner,
            session_profile,
        })
    }

    /// Delete the store at the given location.
    ///
    /// Returns whether a store existed.
    pub async fn remove(uri: &str) -> Result<bool> {
        let backend = StoreSpec::parse(uri)?.into_backend(uri);
        let structural = target_lock(uri);
        let _guard = structural.lock().await;
        let removed = backend.remove().await?;
        if removed {
            info!(uri, "removed store");
        }
        Ok(removed)
    }

    /// The location string the store was opened from.
    pub fn uri(&self) -> &str {
        self.inner.backend.location()
    }

    /// The profile sessions use when none is named, fixed at open time.
    pub fn profile_name(&self) -> &str {
        &self.session_profile
    }

    /// Close the store, optionally deleting the backing storage.
    ///
    /// All content is already persisted; this drops the in-memory state
    /// (including the decrypted store key) once the last clone is gone.
    /// Removal is irreversible.
    pub async fn close(self, remove: bool) -> Result<()> {
        debug!(uri = self.inner.backend.location(), remove, "closing store");
        if remove {
            self.inner.backend.remove().await?;
        }
        Ok(())
    }

    /// Change the pass key and/or derivation method protecting the store.
    ///
    /// Only the key wrapping header changes; the store key and all content
    /// remain intact, so open sessions are unaffected.
    pub async fn rekey(&self, key_method: KdfMethod, pass_key: &str) -> Result<()> {
        let _guard = self.inner.commit_lock.lock().await;

        let mut salt = vec![0u8; SALT_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let master = derive_master_key(key_method, pass_key, &salt)?;
        {
            let mut kdf = self.inner.kdf.write().await;
            kdf.method = key_method;
            kdf.salt = salt;
            kdf.master = master;
        }
        let data = self.inner.state.read().await.data.clone();
        self.inner.persist(&data).await?;
        info!(uri = self.inner.backend.location(), "rekeyed store");
        Ok(())
    }

    /// Copy the full store content to a new location under a new pass key.
    ///
    /// # Errors
    /// - `Duplicate` if the target exists and `recreate` is not set
    pub async fn copy_to(
        &self,
        target_uri: &str,
        key_method: KdfMethod,
        pass_key: &str,
        recreate: bool,
    ) -> Result<Store> {
        let data = self.inner.state.read().await.data.clone();
        let target = Store::provision(target_uri, key_method, pass_key, None, recreate).await?;
        {
            let _guard = target.inner.commit_lock.lock().await;
            let mut state = target.inner.state.write().await;
            state.data = data.clone();
            let snapshot = state.data.clone();
            drop(state);
            target.inner.persist(&snapshot).await?;
        }
        info!(from = self.uri(), to = target_uri, "copied store");
        Ok(Store {
            session_profile: data.default_profile,
            inner: target.inner,
        })
    }

    /// Create a new empty profile.
    ///
    /// A random name is generated when none is given. Returns the name.
    ///
    /// # Errors
    /// - `Duplicate` if the profile already exists
    pub async fn create_profile(&self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) if !name.is_empty() => name.to_string(),
            Some(_) => return Err(Error::Input("Profile name cannot be empty".to_string())),
            None => {
                let mut id = [0u8; 16];
                rand::rngs::OsRng.fill_bytes(&mut id);
                hex::encode(id)
            }
        };

        let _guard = self.inner.commit_lock.lock().await;
        let mut state = self.inner.state.write().await;
        if state.data.profiles.contains_key(&name) {
            return Err(Error::Duplicate(format!("Profile already exists: {}", name)));
        }
        state.data.profiles.insert(name.clone(), ProfileData::default());
        let data = state.data.clone();
        drop(state);
        self.inner.persist(&data).await?;
        debug!(profile = %name, "created profile");
        Ok(name)
    }

    /// Remove a profile and all of its entries.
    ///
    /// Returns whether the profile existed.
    ///
    /// # Errors
    /// - `Input` when removing the default profile
    pub async fn remove_profile(&self, name: &str) -> Result<bool> {
        let _guard = self.inner.commit_lock.lock().await;
        let mut state = self.inner.state.write().await;
        if name == state.data.default_profile {
            return Err(Error::Input(
                "Cannot remove the default profile".to_string(),
            ));
        }
        let removed = state.data.profiles.remove(name).is_some();
        if removed {
            state.bump_version(name);
            let data = state.data.clone();
            drop(state);
            self.inner.persist(&data).await?;
            debug!(profile = %name, "removed profile");
        }
        Ok(removed)
    }

    /// List all profile names.
    pub async fn list_profiles(&self) -> Result<Vec<String>> {
        let state = self.inner.state.read().await;
        Ok(state.data.profiles.keys().cloned().collect())
    }

    /// The profile used when a session does not name one.
    pub async fn get_default_profile(&self) -> Result<String> {
        Ok(self.inner.state.read().await.data.default_profile.clone())
    }

    /// Change the store's default profile.
    ///
    /// # Errors
    /// - `NotFound` if the profile does not exist
    pub async fn set_default_profile(&self, name: &str) -> Result<()> {
        let _guard = self.inner.commit_lock.lock().await;
        let mut state = self.inner.state.write().await;
        if !state.data.profiles.contains_key(name) {
            return Err(Error::NotFound(format!("Unknown profile: {}", name)));
        }
        state.data.default_profile = name.to_string();
        let data = state.data.clone();
        drop(state);
        self.inner.persist(&data).await
    }

    /// Start an auto-commit session.
    ///
    /// Each mutation is applied and persisted immediately.
    ///
    /// # Errors
    /// - `NotFound` if the profile does not exist
    pub async fn session(&self, profile: Option<&str>) -> Result<Session> {
        self.start_session(profile, false).await
    }

    /// Start a transaction.
    ///
    /// Mutations are buffered on a working copy and applied atomically at
    /// commit. Commit fails with `Busy` when the profile was modified by
    /// another writer in the meantime.
    pub async fn transaction(&self, profile: Option<&str>) -> Result<Session> {
        self.start_session(profile, true).await
    }

    async fn start_session(&self, profile: Option<&str>, is_txn: bool) -> Result<Session> {
        let profile = profile.unwrap_or(&self.session_profile).to_string();
        let state = self.inner.state.read().await;
        let entries = state
            .data
            .profiles
            .get(&profile)
            .ok_or_else(|| Error::NotFound(format!("Unknown profile: {}", profile)))?
            .entries
            .clone();
        let base_version = state.profile_version(&profile);
        drop(state);
        Ok(Session::new(
            self.inner.clone(),
            profile,
            is_txn,
            base_version,
            entries,
        ))
    }

    /// Scan entries in a profile with a snapshot cursor.
    ///
    /// The result set is fixed when the scan is created; later writes are
    /// not reflected in subsequent pages.
    ///
    /// # Errors
    /// - `NotFound` if the profile does not exist
    /// - `Input` on a negative offset or limit
    pub async fn scan(
        &self,
        profile: Option<&str>,
        category: Option<&str>,
        tag_filter: Option<TagFilter>,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Scan> {
        let offset = match offset {
            Some(n) if n < 0 => return Err(Error::Input("Scan offset cannot be negative".to_string())),
            Some(n) => n as usize,
            None => 0,
        };
        let limit = match limit {
            Some(n) if n < 0 => return Err(Error::Input("Scan limit cannot be negative".to_string())),
            Some(n) => Some(n as usize),
            None => None,
        };

        let profile = profile.unwrap_or(&self.session_profile);
        let now = chrono::Utc::now();
        let state = self.inner.state.read().await;
        let entries = state
            .data
            .profiles
            .get(profile)
            .ok_or_else(|| Error::NotFound(format!("Unknown profile: {}", profile)))?;

        let mut matched = Vec::new();
        for stored in &entries.entries {
            if stored.category == crate::session::KEY_CATEGORY {
                continue;
            }
            if stored.is_expired(&now) {
                continue;
            }
            if let Some(category) = category {
                if stored.category != category {
                    continue;
                }
            }
            let entry = stored.to_entry();
            if let Some(filter) = &tag_filter {
                if !filter.matches(&entry.tags) {
                    continue;
                }
            }
            matched.push(entry);
        }

        let matched: Vec<_> = match limit {
            Some(limit) => matched.into_iter().skip(offset).take(limit).collect(),
            None => matched.into_iter().skip(offset).collect(),
        };
        Ok(Scan::new(matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_key() -> String {
        keyfort_crypto::generate_raw_key(None)
    }

    fn mem_uri(tag: &str) -> String {
        use rand::RngCore;
        let mut id = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut id);
        format!("memory://{}-{}", tag, hex::encode(id))
    }

    #[test]
    fn test_spec_parsing() {
        assert_eq!(
            StoreSpec::parse("memory://test").unwrap(),
            StoreSpec::Memory("test".to_string())
        );
        assert_eq!(
            StoreSpec::parse("file:///tmp/store.kf").unwrap(),
            StoreSpec::File(PathBuf::from("/tmp/store.kf"))
        );
        assert_eq!(
            StoreSpec::parse("/tmp/store.kf").unwrap(),
            StoreSpec::File(PathBuf::from("/tmp/store.kf"))
        );
        assert!(matches!(
            StoreSpec::parse("postgres://db"),
            Err(Error::Unsupported(_))
        ));
        assert!(StoreSpec::parse("").is_err());
        assert!(StoreSpec::parse("memory://").is_err());
    }

    #[tokio::test]
    async fn test_provision_open_roundtrip() {
        let uri = mem_uri("provision");
        let key = raw_key();

        let store = Store::provision(&uri, KdfMethod::Raw, &key, None, false)
            .await
            .unwrap();
        assert_eq!(store.get_default_profile().await.unwrap(), DEFAULT_PROFILE);
        store.close(false).await.unwrap();

        let store = Store::open(&uri, None, &key, None).await.unwrap();
        assert_eq!(store.uri(), uri);
        assert_eq!(store.list_profiles().await.unwrap(), vec![DEFAULT_PROFILE]);
    }

    #[tokio::test]
    async fn test_provision_duplicate_fails() {
        let uri = mem_uri("duplicate");
        let key = raw_key();
        Store::provision(&uri, KdfMethod::Raw, &key, None, false)
            .await
            .unwrap();
        assert!(matches!(
            Store::provision(&uri, KdfMethod::Raw, &key, None, false).await,
            Err(Error::Duplicate(_))
        ));
        // recreate wipes the existing store
        Store::provision(&uri, KdfMethod::Raw, &key, None, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_handles_share_state() {
        let uri = mem_uri("shared");
        let key = raw_key();

        let first = Store::provision(&uri, KdfMethod::Raw, &key, None, false)
            .await
            .unwrap();
        let second = Store::open(&uri, None, &key, None).await.unwrap();

        // Writes through either handle are visible to the other
        let mut session = first.session(None).await.unwrap();
        session
            .update(keyfort_common::EntryOperation::Insert, "item", "a", b"1", None, None)
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut session = second.session(None).await.unwrap();
        session
            .update(keyfort_common::EntryOperation::Insert, "item", "b", b"2", None, None)
            .await
            .unwrap();
        assert_eq!(session.count(Some("item"), None).await.unwrap(), 2);
        session.commit().await.unwrap();

        let mut check = first.session(None).await.unwrap();
        assert_eq!(check.count(Some("item"), None).await.unwrap(), 2);

        // Transactions on separate handles still conflict
        let mut txn_a = first.transaction(None).await.unwrap();
        let mut txn_b = second.transaction(None).await.unwrap();
        txn_a
            .update(keyfort_common::EntryOperation::Insert, "item", "c", b"3", None, None)
            .await
            .unwrap();
        txn_b
            .update(keyfort_common::EntryOperation::Insert, "item", "d", b"4", None, None)
            .await
            .unwrap();
        txn_a.commit().await.unwrap();
        assert!(matches!(txn_b.commit().await, Err(Error::Busy(_))));
    }

    #[tokio::test]
    async fn test_scan_ignores_writes_after_creation() {
        let uri = mem_uri("scan-snapshot");
        let store = Store::provision(&uri, KdfMethod::Raw, &raw_key(), None, false)
            .await
            .unwrap();

        // Populate more than one page so later pages come from the snapshot too
        let mut session = store.session(None).await.unwrap();
        for idx in 0..crate::scan::PAGE_SIZE + 8 {
            session
                .update(
                    keyfort_common::EntryOperation::Insert,
                    "item",
                    &format!("n{:03}", idx),
                    b"v",
                    None,
                    None,
                )
                .await
                .unwrap();
        }
        session.commit().await.unwrap();

        let mut scan = store.scan(None, Some("item"), None, None, None).await.unwrap();
        let first_page = scan.fetch_next().await.unwrap().unwrap();
        assert_eq!(first_page.len(), crate::scan::PAGE_SIZE);

        // Mutate the committed state while the cursor is open
        let mut session = store.session(None).await.unwrap();
        session
            .update(keyfort_common::EntryOperation::Insert, "item", "zzz", b"late", None, None)
            .await
            .unwrap();
        session
            .update(keyfort_common::EntryOperation::Remove, "item", "n000", &[], None, None)
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut remaining = Vec::new();
        while let Some(page) = scan.fetch_next().await.unwrap() {
            remaining.extend(page);
        }
        assert_eq!(remaining.len(), 8);
        assert!(remaining.iter().all(|entry| entry.name != "zzz"));
        assert!(first_page.iter().any(|entry| entry.name == "n000"));

        // A fresh scan sees the new state
        let fresh = store
            .scan(None, Some("item"), None, None, None)
            .await
            .unwrap()
            .fetch_all()
            .await
            .unwrap();
        assert_eq!(fresh.len(), crate::scan::PAGE_SIZE + 8);
        assert!(fresh.iter().any(|entry| entry.name == "zzz"));
        assert!(fresh.iter().all(|entry| entry.name != "n000"));
    }

    #[tokio::test]
    async fn test_open_wrong_key_fails() {
        let uri = mem_uri("wrongkey");
        Store::provision(&uri, KdfMethod::Raw, &raw_key(), None, false)
            .await
            .unwrap();
        assert!(matches!(
            Store::open(&uri, None, &raw_key(), None).await,
            Err(Error::Encryption(_))
        ));
    }

    #[tokio::test]
    async fn test_open_missing_store_fails() {
        assert!(matches!(
            Store::open(&mem_uri("missing"), None, &raw_key(), None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_store() {
        let uri = mem_uri("remove");
        let key = raw_key();
        Store::provision(&uri, KdfMethod::Raw, &key, None, false)
            .await
            .unwrap();
        assert!(Store::remove(&uri).await.unwrap());
        assert!(!Store::remove(&uri).await.unwrap());
        assert!(Store::open(&uri, None, &key, None).await.is_err());
    }

    #[tokio::test]
    async fn test_rekey() {
        let uri = mem_uri("rekey");
        let old_key = raw_key();
        let new_key = raw_key();

        let store = Store::provision(&uri, KdfMethod::Raw, &old_key, None, false)
            .await
            .unwrap();
        let mut session = store.session(None).await.unwrap();
        session
            .update(
                keyfort_common::EntryOperation::Insert,
                "item",
                "survives",
                b"rekey",
                None,
                None,
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        store.rekey(KdfMethod::Raw, &new_key).await.unwrap();
        store.close(false).await.unwrap();

        // Old key no longer opens the store
        assert!(matches!(
            Store::open(&uri, None, &old_key, None).await,
            Err(Error::Encryption(_))
        ));

        // Content survives under the new key
        let store = Store::open(&uri, None, &new_key, None).await.unwrap();
        let mut session = store.session(None).await.unwrap();
        let entry = session.fetch("item", "survives", false).await.unwrap();
        assert_eq!(entry.unwrap().value, b"rekey");
    }

    #[tokio::test]
    async fn test_copy_to() {
        let source_uri = mem_uri("copy-src");
        let target_uri = mem_uri("copy-dst");
        let source_key = raw_key();
        let target_key = raw_key();

        let store = Store::provision(&source_uri, KdfMethod::Raw, &source_key, None, false)
            .await
            .unwrap();
        let mut session = store.session(None).await.unwrap();
        session
            .update(
                keyfort_common::EntryOperation::Insert,
                "item",
                "copied",
                b"value",
                None,
                None,
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        store
            .copy_to(&target_uri, KdfMethod::Raw, &target_key, false)
            .await
            .unwrap();

        let copy = Store::open(&target_uri, None, &target_key, None).await.unwrap();
        let mut session = copy.session(None).await.unwrap();
        let entry = session.fetch("item", "copied", false).await.unwrap();
        assert_eq!(entry.unwrap().value, b"value");
    }

    #[tokio::test]
    async fn test_profile_management() {
        let uri = mem_uri("profiles");
        let store = Store::provision(&uri, KdfMethod::Raw, &raw_key(), None, false)
            .await
            .unwrap();

        let name = store.create_profile(Some("tenant-a")).await.unwrap();
        assert_eq!(name, "tenant-a");
        assert!(matches!(
            store.create_profile(Some("tenant-a")).await,
            Err(Error::Duplicate(_))
        ));

        // Generated names are unique
        let generated = store.create_profile(None).await.unwrap();
        assert_ne!(generated, "tenant-a");

        let mut profiles = store.list_profiles().await.unwrap();
        profiles.sort();
        assert_eq!(profiles.len(), 3);
        assert!(profiles.contains(&"tenant-a".to_string()));

        store.set_default_profile("tenant-a").await.unwrap();
        assert_eq!(store.get_default_profile().await.unwrap(), "tenant-a");
        assert!(matches!(
            store.set_default_profile("missing").await,
            Err(Error::NotFound(_))
        ));

        // The default profile cannot be removed
        assert!(matches!(
            store.remove_profile("tenant-a").await,
            Err(Error::Input(_))
        ));
        assert!(store.remove_profile(DEFAULT_PROFILE).await.unwrap());
        assert!(!store.remove_profile(DEFAULT_PROFILE).await.unwrap());
    }

    #[tokio::test]
    async fn test_profile_isolation() {
        let uri = mem_uri("isolation");
        let store = Store::provision(&uri, KdfMethod::Raw, &raw_key(), None, false)
            .await
            .unwrap();
        store.create_profile(Some("other")).await.unwrap();

        let mut session = store.session(None).await.unwrap();
        session
            .update(
                keyfort_common::EntryOperation::Insert,
                "item",
                "private",
                b"default profile",
                None,
                None,
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        let mut other = store.session(Some("other")).await.unwrap();
        assert!(other.fetch("item", "private", false).await.unwrap().is_none());
        assert_eq!(other.count(Some("item"), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_session_unknown_profile_fails() {
        let uri = mem_uri("unknown-profile");
        let store = Store::provision(&uri, KdfMethod::Raw, &raw_key(), None, false)
            .await
            .unwrap();
        assert!(matches!(
            store.session(Some("missing")).await,
            Err(Error::NotFound(_))
        ));
    }
}
