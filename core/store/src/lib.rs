//! Encrypted, profile-partitioned storage for entries and managed keys.
//!
//! A store is a single encrypted blob addressed by a URI (`memory://name`
//! or a file path). Its content is partitioned into profiles, each an
//! isolated namespace. Access goes through sessions (auto-commit) and
//! transactions (atomic, optimistic), plus snapshot scans for paged reads.
//!
//! # Security Guarantees
//! - All content is encrypted under a random store key; the store key is
//!   wrapped under a pass-key-derived master key
//! - Rekeying rewrites only the key wrapping, never the content
//! - Decrypted state never leaves the process; the backend sees ciphertext

pub mod backend;
pub mod format;
pub mod scan;
pub mod session;
pub mod store;

pub use keyfort_common::{Entry, EntryOperation, EntryTag, Error, Result, TagFilter};
pub use scan::{Scan, PAGE_SIZE};
pub use session::{KeyEntry, Session, KEY_CATEGORY};
pub use store::{Store, StoreSpec, DEFAULT_PROFILE};
