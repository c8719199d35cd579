//! Handle-based operation surface for the Keyfort engine.
//!
//! Embedders address stores, sessions, scans, entry lists, and keys
//! through opaque integer handles backed by process-wide arenas. Every
//! operation records failures in a thread-local last-error slot, and the
//! logging layer can forward events to a caller-provided sink.

pub mod error;
pub mod handles;
pub mod logger;
pub mod ops;

pub use error::{clear_last_error, get_current_error, set_last_error};
pub use handles::{
    EntryListHandle, HandleMap, KeyEntryListHandle, LocalKeyHandle, ScanHandle, SessionHandle,
    StoreHandle,
};
pub use logger::{set_custom_logger, set_default_logger, set_max_log_level, LogSink};
