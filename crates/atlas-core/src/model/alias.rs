//! The alias-to-canonical mapping. Always derived, never
//! persisted as a first-class table.

use std::collections::HashMap;

/// A mapping from any known alias (including canonical names themselves) to
/// the canonical name they resolve to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    map: HashMap<String, String>,
}

impl AliasMap {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to its canonical form, or `name` itself if unknown.
    #[must_use]
    pub fn canonical_of<'a>(&'a self, name: &'a str) -> &'a str {
        self.map.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Whether `name` is registered as a canonical name (maps to itself).
    #[must_use]
    pub fn is_canonical(&self, name: &str) -> bool {
        self.map.get(name).is_some_and(|c| c == name)
    }

    /// Record that `alias` resolves to `canonical`. Also ensures `canonical`
    /// maps to itself, satisfying spec §8 invariant 3.
    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        let canonical = canonical.into();
        self.map.insert(canonical.clone(), canonical.clone());
        self.map.insert(alias.into(), canonical);
    }

    /// Number of entries (aliases + canonical self-entries).
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterate `(alias, canonical)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    /// Check the two invariants spec §8 demands of every `AliasMap`:
    /// every canonical name maps to itself, and no canonical name is mapped
    /// to a *different* canonical name. Returns the offending names, if any.
    #[must_use]
    pub fn find_invariant_violations(&self) -> Vec<String> {
        let canonicals: std::collections::HashSet<&str> = self
        .map
        .iter()
        .filter(|(k, v)| k == v)
        .map(|(k, _)| k.as_str())
        .collect();

        let mut offenders = Vec::new();
        for canonical in &canonicals {
            let resolved = self.canonical_of(canonical);
            if resolved != *canonical {
                offenders.push((*canonical).to_string());
            }
        }
        offenders
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_maps_to_itself() {
        let mut m = AliasMap::new();
        m.insert("美猴王", "孙悟空");
        assert_eq!(m.canonical_of("孙悟空"), "孙悟空");
        assert_eq!(m.canonical_of("美猴王"), "孙悟空");
        assert!(m.is_canonical("孙悟空"));
        assert!(!m.is_canonical("美猴王"));
    }

    #[test]
    fn unknown_name_resolves_to_itself() {
        let m = AliasMap::new();
        assert_eq!(m.canonical_of("无名氏"), "无名氏");
    }

    #[test]
    fn no_invariant_violations_in_a_well_formed_map() {
        let mut m = AliasMap::new();
        m.insert("美猴王", "孙悟空");
        m.insert("齐天大圣", "孙悟空");
        assert!(m.find_invariant_violations().is_empty());
    }
}
