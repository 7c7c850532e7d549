//! Position → document id mapping with representation-agnostic lookups.
//!
//! A position may reach us as a native `usize`, a fixed-width integer, or its
//! decimal string (the persisted mapping is string-keyed). Keys are normalized to
//! one canonical `u64` when the mapping is built, and every lookup converts its
//! key at the boundary, so all three forms of the same position resolve to the
//! same document id.

use std::collections::BTreeMap;
use std::fmt;

/// A position identifier in whatever form the caller holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PositionKey {
    Native(usize),
    Fixed(i64),
    Text(String),
}

impl PositionKey {
    /// The canonical position, if this key denotes a non-negative integer.
    /// Strings must be in canonical decimal form: `"7"`, not `" 7"`, `"+7"` or `"07"`.
    pub fn canonical(&self) -> Option<u64> {
        match self {
            PositionKey::Native(n) => u64::try_from(*n).ok(),
            PositionKey::Fixed(n) => u64::try_from(*n).ok(),
            PositionKey::Text(s) => parse_decimal(s),
        }
    }
}

fn parse_decimal(s: &str) -> Option<u64> {
    let canonical = !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'));
    if canonical {
        s.parse().ok()
    } else {
        None
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionKey::Native(n) => write!(f, "{n}"),
            PositionKey::Fixed(n) => write!(f, "{n}"),
            PositionKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<usize> for PositionKey {
    fn from(n: usize) -> Self {
        PositionKey::Native(n)
    }
}

impl From<i64> for PositionKey {
    fn from(n: i64) -> Self {
        PositionKey::Fixed(n)
    }
}

impl From<i32> for PositionKey {
    fn from(n: i32) -> Self {
        PositionKey::Fixed(i64::from(n))
    }
}

impl From<u32> for PositionKey {
    fn from(n: u32) -> Self {
        PositionKey::Fixed(i64::from(n))
    }
}

impl From<u64> for PositionKey {
    fn from(n: u64) -> Self {
        match i64::try_from(n) {
            Ok(fixed) => PositionKey::Fixed(fixed),
            Err(_) => PositionKey::Text(n.to_string()),
        }
    }
}

impl From<&str> for PositionKey {
    fn from(s: &str) -> Self {
        PositionKey::Text(s.to_string())
    }
}

impl From<String> for PositionKey {
    fn from(s: String) -> Self {
        PositionKey::Text(s)
    }
}

impl From<&String> for PositionKey {
    fn from(s: &String) -> Self {
        PositionKey::Text(s.clone())
    }
}

/// Normalized position → document id mapping.
///
/// Entries whose key is not integer-like, or whose position was claimed by more
/// than one document id, are kept verbatim in `retained` but never resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionMap {
    by_position: BTreeMap<u64, String>,
    retained: Vec<(String, String)>,
}

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw entries, normalizing every integer-like key.
    ///
    /// Never fails: entries that cannot be normalized are retained unchanged.
    /// Running it over the [Self::entries] of its own output yields an equal map.
    pub fn normalize<K, I>(raw: I) -> Self
    where
        K: Into<PositionKey>,
        I: IntoIterator<Item = (K, String)>,
    {
        let mut claims: BTreeMap<u64, Vec<(String, String)>> = BTreeMap::new();
        let mut retained = Vec::new();
        for (key, id) in raw {
            let key: PositionKey = key.into();
            match key.canonical() {
                Some(pos) => claims.entry(pos).or_default().push((key.to_string(), id)),
                None => {
                    tracing::debug!(key = %key, "mapping key is not an integer; kept as-is");
                    retained.push((key.to_string(), id));
                }
            }
        }

        let mut by_position = BTreeMap::new();
        for (pos, entries) in claims {
            let first_id = &entries[0].1;
            if entries.iter().all(|(_, id)| id == first_id) {
                by_position.insert(pos, first_id.clone());
            } else {
                tracing::warn!(position = pos, "position maps to several document ids; left unresolved");
                retained.extend(entries);
            }
        }
        retained.sort();
        retained.dedup();
        Self { by_position, retained }
    }

    /// Record that `position` holds document `id`.
    pub fn insert(&mut self, position: u64, id: impl Into<String>) {
        self.by_position.insert(position, id.into());
    }

    /// Document id at a position, given in any representation.
    pub fn get(&self, key: impl Into<PositionKey>) -> Option<&str> {
        let key: PositionKey = key.into();
        let pos = key.canonical()?;
        self.by_position.get(&pos).map(String::as_str)
    }

    pub fn contains(&self, key: impl Into<PositionKey>) -> bool {
        self.get(key).is_some()
    }

    /// Number of resolvable positions.
    pub fn len(&self) -> usize {
        self.by_position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    /// Entries that did not normalize.
    pub fn retained(&self) -> &[(String, String)] {
        &self.retained
    }

    /// Resolvable positions in ascending order, with their document ids.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.by_position.iter().map(|(p, id)| (*p, id.as_str()))
    }

    /// Every entry, resolvable or not, in the raw key form.
    pub fn entries(&self) -> Vec<(PositionKey, String)> {
        self.by_position
            .iter()
            .map(|(p, id)| (PositionKey::from(*p), id.clone()))
            .chain(
                self.retained
                    .iter()
                    .map(|(k, id)| (PositionKey::Text(k.clone()), id.clone())),
            )
            .collect()
    }

    /// String-keyed table for persistence.
    pub fn to_table(&self) -> BTreeMap<String, String> {
        let mut table: BTreeMap<String, String> = self
            .retained
            .iter()
            .map(|(k, id)| (k.clone(), id.clone()))
            .collect();
        for (p, id) in &self.by_position {
            table.insert(p.to_string(), id.clone());
        }
        table
    }
}
