//! Entry and tag records.
//!
//! An entry is a (category, name) keyed record holding an opaque value and
//! a set of tags. Tags marked as plaintext are stored searchable; their
//! names carry a `~` prefix in the JSON representation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single tag attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryTag {
    /// Tag stored encrypted alongside the entry value.
    Encrypted(String, String),
    /// Tag stored in the searchable plaintext index.
    Plaintext(String, String),
}

impl EntryTag {
    /// The tag name, without any prefix.
    pub fn name(&self) -> &str {
        match self {
            EntryTag::Encrypted(name, _) | EntryTag::Plaintext(name, _) => name,
        }
    }

    /// The tag value.
    pub fn value(&self) -> &str {
        match self {
            EntryTag::Encrypted(_, value) | EntryTag::Plaintext(_, value) => value,
        }
    }

    /// Whether this tag is plaintext-indexed.
    pub fn is_plaintext(&self) -> bool {
        matches!(self, EntryTag::Plaintext(..))
    }
}

/// Convert a JSON object into a tag list.
///
/// Plaintext tags use a `~`-prefixed name. String values map to a single
/// tag; array values map to one tag per element (value sets).
///
/// # Errors
/// - `Input` if the value is not an object or a tag value is not a string
///   or array of strings
pub fn tags_from_json(value: serde_json::Value) -> Result<Vec<EntryTag>> {
    let map = match value {
        serde_json::Value::Object(map) => map,
        _ => return Err(Error::Input("Tags must be a JSON object".to_string())),
    };

    let mut tags = Vec::new();
    for (name, value) in map {
        let (plaintext, name) = match name.strip_prefix('~') {
            Some(stripped) => (true, stripped.to_string()),
            None => (false, name),
        };
        let mut push = |val: String| {
            if plaintext {
                tags.push(EntryTag::Plaintext(name.clone(), val));
            } else {
                tags.push(EntryTag::Encrypted(name.clone(), val));
            }
        };
        match value {
            serde_json::Value::String(s) => push(s),
            serde_json::Value::Array(vals) => {
                for val in vals {
                    match val {
                        serde_json::Value::String(s) => push(s),
                        _ => {
                            return Err(Error::Input(format!(
                                "Invalid value for tag '{}': expected string",
                                name
                            )))
                        }
                    }
                }
            }
            _ => {
                return Err(Error::Input(format!(
                    "Invalid value for tag '{}': expected string or array",
                    name
                )))
            }
        }
    }
    Ok(tags)
}

/// Convert a tag list back into its JSON object form.
///
/// Repeated names collapse into an array value.
pub fn tags_to_json(tags: &[EntryTag]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for tag in tags {
        let key = if tag.is_plaintext() {
            format!("~{}", tag.name())
        } else {
            tag.name().to_string()
        };
        let value = serde_json::Value::String(tag.value().to_string());
        match map.get_mut(&key) {
            None => {
                map.insert(key, value);
            }
            Some(serde_json::Value::Array(vals)) => vals.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = serde_json::Value::Array(vec![first, value]);
            }
        }
    }
    serde_json::Value::Object(map)
}

/// A keyed record fetched from a store profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry category.
    pub category: String,
    /// Entry name, unique within (profile, category).
    pub name: String,
    /// Opaque entry value.
    pub value: Vec<u8>,
    /// Attached tags.
    pub tags: Vec<EntryTag>,
}

impl Entry {
    /// Create a new entry record.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Vec<u8>>,
        tags: Vec<EntryTag>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            value: value.into(),
            tags,
        }
    }
}

/// The kind of mutation applied by a session update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOperation {
    /// Insert a new entry; fails if (category, name) exists.
    Insert,
    /// Replace an existing entry; fails if absent.
    Replace,
    /// Remove an existing entry; fails if absent.
    Remove,
}

/// Compute an absolute expiry timestamp from a millisecond offset.
///
/// # Errors
/// - `Input` if the offset overflows the representable time range
pub fn expiry_timestamp(expiry_ms: i64) -> Result<DateTime<Utc>> {
    Utc::now()
        .checked_add_signed(Duration::milliseconds(expiry_ms))
        .ok_or_else(|| Error::Input("Invalid expiry timestamp".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tags_from_json() {
        let tags = tags_from_json(json!({"enc": "a", "~plain": "b"})).unwrap();
        assert!(tags.contains(&EntryTag::Encrypted("enc".into(), "a".into())));
        assert!(tags.contains(&EntryTag::Plaintext("plain".into(), "b".into())));
    }

    #[test]
    fn test_tags_from_json_value_set() {
        let tags = tags_from_json(json!({"t": ["x", "y"]})).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name(), "t");
        assert_eq!(tags[1].value(), "y");
    }

    #[test]
    fn test_tags_from_json_rejects_non_object() {
        assert!(tags_from_json(json!("nope")).is_err());
        assert!(tags_from_json(json!({"t": 1})).is_err());
    }

    #[test]
    fn test_tags_roundtrip_json() {
        let input = json!({"enc": "a", "~plain": "b", "multi": ["x", "y"]});
        let tags = tags_from_json(input.clone()).unwrap();
        assert_eq!(tags_to_json(&tags), input);
    }

    #[test]
    fn test_expiry_timestamp_in_future() {
        let expiry = expiry_timestamp(60_000).unwrap();
        assert!(expiry > Utc::now());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn entry_tag() -> impl Strategy<Value = EntryTag> {
            (
                any::<bool>(),
                "[a-z][a-z0-9_]{0,8}",
                "[a-zA-Z0-9 _.:-]{0,16}",
            )
                .prop_map(|(plaintext, name, value)| {
                    if plaintext {
                        EntryTag::Plaintext(name, value)
                    } else {
                        EntryTag::Encrypted(name, value)
                    }
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn tags_survive_json_roundtrip(
                tags in prop::collection::vec(entry_tag(), 0..12),
            ) {
                let json = tags_to_json(&tags);
                let mut restored = tags_from_json(json).unwrap();
                let mut expected = tags.clone();
                restored.sort();
                expected.sort();
                prop_assert_eq!(restored, expected);
            }
        }
    }
}
