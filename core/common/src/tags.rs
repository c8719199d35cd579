//! Tag-filter query model.
//!
//! Filters are expressed as JSON in the wallet query language style:
//! a plain object is a conjunction of equality checks, `$and`/`$or`/`$not`
//! combine subqueries, `$exist` tests tag presence, and per-field operator
//! objects support `$neq`, `$in`, `$like`, `$gt`, `$gte`, `$lt` and `$lte`.
//! Filter names with a `~` prefix target plaintext tags.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::EntryTag;

/// A parsed tag-filter query, evaluated in memory against entry tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagFilter {
    /// All subfilters must match.
    And(Vec<TagFilter>),
    /// At least one subfilter must match.
    Or(Vec<TagFilter>),
    /// The subfilter must not match.
    Not(Box<TagFilter>),
    /// Tag equals value.
    Eq(TagName, String),
    /// Tag does not equal value (still requires the tag to exist).
    Neq(TagName, String),
    /// Tag value is one of the listed values.
    In(TagName, Vec<String>),
    /// All named tags exist.
    Exist(Vec<TagName>),
    /// Tag value matches a SQL-style `%` wildcard pattern.
    Like(TagName, String),
    /// Lexicographic comparison.
    Gt(TagName, String),
    /// Lexicographic comparison.
    Gte(TagName, String),
    /// Lexicographic comparison.
    Lt(TagName, String),
    /// Lexicographic comparison.
    Lte(TagName, String),
}

/// A tag name reference within a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagName {
    /// Name without the `~` prefix.
    pub name: String,
    /// Whether the reference targets plaintext tags.
    pub plaintext: bool,
}

impl TagName {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('~') {
            Some(stripped) => Self {
                name: stripped.to_string(),
                plaintext: true,
            },
            None => Self {
                name: raw.to_string(),
                plaintext: false,
            },
        }
    }

    fn selects(&self, tag: &EntryTag) -> bool {
        tag.is_plaintext() == self.plaintext && tag.name() == self.name
    }
}

impl TagFilter {
    /// Parse a filter from its JSON representation.
    ///
    /// # Errors
    /// - `Input` on unknown operators or malformed structure
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let map = match value {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(Error::Input(
                    "Tag filter must be a JSON object".to_string(),
                ))
            }
        };

        let mut clauses = Vec::new();
        for (key, value) in map {
            clauses.push(Self::parse_clause(&key, value)?);
        }
        Ok(match clauses.len() {
            1 => clauses.into_iter().next().unwrap_or(TagFilter::And(vec![])),
            _ => TagFilter::And(clauses),
        })
    }

    fn parse_clause(key: &str, value: serde_json::Value) -> Result<Self> {
        match key {
            "$and" | "$or" => {
                let subs = match value {
                    serde_json::Value::Array(vals) => vals
                        .into_iter()
                        .map(Self::from_json)
                        .collect::<Result<Vec<_>>>()?,
                    _ => {
                        return Err(Error::Input(format!(
                            "Expected array argument for '{}'",
                            key
                        )))
                    }
                };
                Ok(if key == "$and" {
                    TagFilter::And(subs)
                } else {
                    TagFilter::Or(subs)
                })
            }
            "$not" => Ok(TagFilter::Not(Box::new(Self::from_json(value)?))),
            "$exist" => {
                let names = match value {
                    serde_json::Value::String(name) => vec![TagName::parse(&name)],
                    serde_json::Value::Array(vals) => vals
                        .into_iter()
                        .map(|val| match val {
                            serde_json::Value::String(name) => Ok(TagName::parse(&name)),
                            _ => Err(Error::Input(
                                "Expected string arguments for '$exist'".to_string(),
                            )),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => {
                        return Err(Error::Input(
                            "Expected string or array argument for '$exist'".to_string(),
                        ))
                    }
                };
                Ok(TagFilter::Exist(names))
            }
            _ if key.starts_with('$') => {
                Err(Error::Input(format!("Unknown query operator: '{}'", key)))
            }
            name => {
                let name = TagName::parse(name);
                match value {
                    serde_json::Value::String(val) => Ok(TagFilter::Eq(name, val)),
                    serde_json::Value::Object(ops) => Self::parse_field_ops(name, ops),
                    _ => Err(Error::Input(format!(
                        "Invalid filter value for tag '{}'",
                        name.name
                    ))),
                }
            }
        }
    }

    fn parse_field_ops(
        name: TagName,
        ops: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self> {
        let mut clauses = Vec::new();
        for (op, value) in ops {
            let clause = match (op.as_str(), value) {
                ("$neq", serde_json::Value::String(val)) => TagFilter::Neq(name.clone(), val),
                ("$like", serde_json::Value::String(val)) => TagFilter::Like(name.clone(), val),
                ("$gt", serde_json::Value::String(val)) => TagFilter::Gt(name.clone(), val),
                ("$gte", serde_json::Value::String(val)) => TagFilter::Gte(name.clone(), val),
                ("$lt", serde_json::Value::String(val)) => TagFilter::Lt(name.clone(), val),
                ("$lte", serde_json::Value::String(val)) => TagFilter::Lte(name.clone(), val),
                ("$in", serde_json::Value::Array(vals)) => {
                    let vals = vals
                        .into_iter()
                        .map(|val| match val {
                            serde_json::Value::String(s) => Ok(s),
                            _ => Err(Error::Input(
                                "Expected string arguments for '$in'".to_string(),
                            )),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    TagFilter::In(name.clone(), vals)
                }
                (op, _) => {
                    return Err(Error::Input(format!(
                        "Unsupported operator '{}' for tag '{}'",
                        op, name.name
                    )))
                }
            };
            clauses.push(clause);
        }
        Ok(match clauses.len() {
            1 => clauses.into_iter().next().unwrap_or(TagFilter::And(vec![])),
            _ => TagFilter::And(clauses),
        })
    }

    /// Evaluate the filter against an entry's tags.
    pub fn matches(&self, tags: &[EntryTag]) -> bool {
        match self {
            TagFilter::And(subs) => subs.iter().all(|sub| sub.matches(tags)),
            TagFilter::Or(subs) => subs.iter().any(|sub| sub.matches(tags)),
            TagFilter::Not(sub) => !sub.matches(tags),
            TagFilter::Eq(name, val) => tags
                .iter()
                .any(|tag| name.selects(tag) && tag.value() == val),
            TagFilter::Neq(name, val) => tags
                .iter()
                .any(|tag| name.selects(tag) && tag.value() != val),
            TagFilter::In(name, vals) => tags
                .iter()
                .any(|tag| name.selects(tag) && vals.iter().any(|v| v == tag.value())),
            TagFilter::Exist(names) => names
                .iter()
                .all(|name| tags.iter().any(|tag| name.selects(tag))),
            TagFilter::Like(name, pattern) => tags
                .iter()
                .any(|tag| name.selects(tag) && like_match(pattern, tag.value())),
            TagFilter::Gt(name, val) => tags
                .iter()
                .any(|tag| name.selects(tag) && tag.value() > val.as_str()),
            TagFilter::Gte(name, val) => tags
                .iter()
                .any(|tag| name.selects(tag) && tag.value() >= val.as_str()),
            TagFilter::Lt(name, val) => tags
                .iter()
                .any(|tag| name.selects(tag) && tag.value() < val.as_str()),
            TagFilter::Lte(name, val) => tags
                .iter()
                .any(|tag| name.selects(tag) && tag.value() <= val.as_str()),
        }
    }
}

/// Match a SQL-LIKE pattern where `%` is a multi-character wildcard.
fn like_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return pattern == value;
    }

    let mut remainder = value;
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if idx == parts.len() - 1 {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags() -> Vec<EntryTag> {
        vec![
            EntryTag::Encrypted("color".into(), "blue".into()),
            EntryTag::Plaintext("size".into(), "10".into()),
            EntryTag::Encrypted("multi".into(), "a".into()),
            EntryTag::Encrypted("multi".into(), "b".into()),
        ]
    }

    #[test]
    fn test_equality_conjunction() {
        let filter = TagFilter::from_json(json!({"color": "blue", "~size": "10"})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"color": "red"})).unwrap();
        assert!(!filter.matches(&tags()));
    }

    #[test]
    fn test_plaintext_prefix_targets_index() {
        // "size" without the prefix refers to an encrypted tag, which is absent
        let filter = TagFilter::from_json(json!({"size": "10"})).unwrap();
        assert!(!filter.matches(&tags()));
    }

    #[test]
    fn test_or_and_not() {
        let filter =
            TagFilter::from_json(json!({"$or": [{"color": "red"}, {"color": "blue"}]})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"$not": {"color": "blue"}})).unwrap();
        assert!(!filter.matches(&tags()));
    }

    #[test]
    fn test_exist() {
        let filter = TagFilter::from_json(json!({"$exist": ["color", "~size"]})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"$exist": "missing"})).unwrap();
        assert!(!filter.matches(&tags()));
    }

    #[test]
    fn test_field_operators() {
        let filter = TagFilter::from_json(json!({"color": {"$neq": "red"}})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"multi": {"$in": ["b", "z"]}})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"color": {"$like": "bl%"}})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"~size": {"$gte": "10"}})).unwrap();
        assert!(filter.matches(&tags()));

        let filter = TagFilter::from_json(json!({"~size": {"$lt": "10"}})).unwrap();
        assert!(!filter.matches(&tags()));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert!(TagFilter::from_json(json!({"$nope": []})).is_err());
        assert!(TagFilter::from_json(json!({"t": {"$regex": "x"}})).is_err());
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("abc", "abc"));
        assert!(like_match("a%", "abc"));
        assert!(like_match("%c", "abc"));
        assert!(like_match("%b%", "abc"));
        assert!(like_match("a%c", "abc"));
        assert!(!like_match("a%z", "abc"));
        assert!(!like_match("b%", "abc"));
    }
}
