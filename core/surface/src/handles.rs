//! Handle arenas for surface-managed objects.
//!
//! Every object exposed through the surface lives in a process-wide arena
//! and is addressed by an opaque non-zero integer handle. Handles stay
//! valid until explicitly freed, independent of borrow lifetimes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use keyfort_common::{Error, Result};

/// A concurrent arena mapping integer handles to shared objects.
pub struct HandleMap<T> {
    items: RwLock<HashMap<u64, Arc<T>>>,
    next: AtomicU64,
}

impl<T> HandleMap<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            // Zero is reserved as the null handle
            next: AtomicU64::new(1),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<u64, Arc<T>>> {
        match self.items.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Insert an object and return its new handle.
    pub fn insert(&self, value: T) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        self.write().insert(handle, Arc::new(value));
        handle
    }

    /// Look up an object by handle.
    ///
    /// # Errors
    /// - `Input` for an unknown or already freed handle
    pub fn get(&self, handle: u64) -> Result<Arc<T>> {
        let items = match self.items.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        items
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::Input(format!("Invalid handle: {}", handle)))
    }

    /// Remove an object, invalidating its handle.
    ///
    /// # Errors
    /// - `Input` for an unknown or already freed handle
    pub fn remove(&self, handle: u64) -> Result<Arc<T>> {
        self.write()
            .remove(&handle)
            .ok_or_else(|| Error::Input(format!("Invalid handle: {}", handle)))
    }

    /// Number of live objects, for leak diagnostics.
    pub fn len(&self) -> usize {
        match self.items.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

typed_handle!(
    /// Handle to an open store.
    StoreHandle
);
typed_handle!(
    /// Handle to a session or transaction.
    SessionHandle
);
typed_handle!(
    /// Handle to an active scan cursor.
    ScanHandle
);
typed_handle!(
    /// Handle to a fetched list of entries.
    EntryListHandle
);
typed_handle!(
    /// Handle to a fetched list of key entries.
    KeyEntryListHandle
);
typed_handle!(
    /// Handle to a key object.
    LocalKeyHandle
);
