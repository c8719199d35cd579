//! Common types shared across the Keyfort engine.
//!
//! This crate defines the error model, entry and tag records, and the
//! tag-filter query language used by the store and surface crates.

pub mod error;
pub mod tags;
pub mod types;

pub use error::{Error, Result};
pub use tags::TagFilter;
pub use types::{expiry_timestamp, tags_from_json, tags_to_json, Entry, EntryOperation, EntryTag};
