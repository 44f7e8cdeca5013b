//! Cache record and name set types.
//!
//! `CacheRecord` is the single shared value published under `cache:twin`.
//! Its set fields may be `null` or missing in stored JSON written by older
//! instances; they are normalized to empty sets here, at the deserialization
//! boundary, so no other code has to deal with absent sets.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

/// Deserialize an optional set, mapping `null` to the empty set.
fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeSet<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Tag and reported-property names, as produced by upstream services
/// and by whitelist filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameSet {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reported_properties: BTreeSet<String>,
}

impl NameSet {
    pub fn new<T, R>(tags: T, reported_properties: R) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            reported_properties: reported_properties.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.reported_properties.is_empty()
    }

    /// Add every name of `other` into `self`.
    pub fn union_with(&mut self, other: &NameSet) {
        self.tags.extend(other.tags.iter().cloned());
        self.reported_properties
            .extend(other.reported_properties.iter().cloned());
    }
}

/// The shared cache value.
///
/// `rebuilding` doubles as an advisory lock: while it is `true` some
/// instance claims to be rebuilding the name sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheRecord {
    #[serde(default)]
    pub rebuilding: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub reported: BTreeSet<String>,
}

impl CacheRecord {
    pub fn new<T, R>(tags: T, reported: R) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            rebuilding: false,
            tags: tags.into_iter().map(Into::into).collect(),
            reported: reported.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a committed (not rebuilding) record from discovered names.
    pub fn from_names(names: NameSet) -> Self {
        Self {
            rebuilding: false,
            tags: names.tags,
            reported: names.reported_properties,
        }
    }

    /// True when both name sets are empty. The flag is not considered.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.reported.is_empty()
    }

    /// Grow-only union of the name sets. The result is never rebuilding.
    pub fn union(&self, other: &CacheRecord) -> CacheRecord {
        CacheRecord {
            rebuilding: false,
            tags: self.tags.union(&other.tags).cloned().collect(),
            reported: self.reported.union(&other.reported).cloned().collect(),
        }
    }

    /// Total number of names held, used by the merge convergence check.
    pub fn name_counts(&self) -> (usize, usize) {
        (self.tags.len(), self.reported.len())
    }
}
