//! The entity dictionary produced by the Entity Pre-Scanner and
//! persisted once per novel.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// The coarse category the Pre-Scanner's LLM classification pass assigns a
/// candidate name to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person / character.
    Person,
    /// A location.
    Location,
    /// An item or artifact.
    Item,
    /// An organization, sect, or faction.
    Org,
    /// An abstract concept (a cultivation system, a title, a custom term).
    Concept,
}

/// Which mining pass surfaced a dictionary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    /// Surfaced by frequency/POS statistics or suffix-pattern mining.
    Stats,
    /// Surfaced by the naming-pattern regex (叫作/名叫/绰号/...), which
    /// bypasses the top-500 candidate cut.
    NamingPattern,
}

/// One entry in the [`EntityDictionary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictEntry {
    /// The classified entity type.
    pub entity_type: EntityType,
    /// Known aliases for this entity.
    pub aliases: BTreeSet<String>,
    /// Observed frequency in the source text.
    pub frequency: u64,
    /// Which mining pass produced this entry.
    pub source: EntitySource,
}

/// The dictionary produced once per novel by the Entity Pre-Scanner,
/// invalidated and rebuilt only on explicit user request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityDictionary {
    entries: HashMap<String, DictEntry>,
}

/// The Chinese numerals whose presence as a name's first character triggers
/// POS-tag recovery in the Pre-Scanner and the
/// short-form/long-form merge in steps 5 and in the Validator's dictionary
/// -driven correction.
pub const CHINESE_NUMERAL_PREFIXES: [char; 10] =
['一', '二', '三', '四', '五', '六', '七', '八', '九', '十'];

impl EntityDictionary {
    /// An empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry.
    pub fn insert(&mut self, name: impl Into<String>, entry: DictEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// Look up an entry by exact name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&DictEntry> {
        self.entries.get(name)
    }

    /// Whether `name` is a registered dictionary entity of any type.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether `name` is a registered *person* entity specifically — used
    /// by the Validator's surname cross-reference rule.
    #[must_use]
    pub fn is_person(&self, name: &str) -> bool {
        matches!(
            self.entries.get(name),
            Some(e) if e.entity_type == EntityType::Person
        )
    }

    /// Iterate all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DictEntry)> {
        self.entries.iter()
    }

    /// Number of dictionary entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by descending frequency, for the Context Summary
    /// Builder's frequency-capped injection.
    #[must_use]
    pub fn sorted_by_frequency(&self) -> Vec<(&String, &DictEntry)> {
        let mut v: Vec<_> = self.entries.iter().collect();
        v.sort_by(|a, b| b.1.frequency.cmp(&a.1.frequency).then_with(|| a.0.cmp(b.0)));
        v
    }

    /// Build the `short -> long` name-correction table: for every dictionary person whose name starts with a
    /// Chinese numeral, if the name with that numeral prefix stripped is
    /// *not itself* a registered dictionary entity, map the short form to
    /// the long form.
    #[must_use]
    pub fn build_name_corrections(&self) -> HashMap<String, String> {
        let mut corrections = HashMap::new();
        for (name, entry) in &self.entries {
            if entry.entity_type != EntityType::Person {
                continue;
            }
            let Some(first) = name.chars().next() else {
                continue;
            };
            if !CHINESE_NUMERAL_PREFIXES.contains(&first) {
                continue;
            }
            let short: String = name.chars().skip(1).collect();
            if short.is_empty() {
                continue;
            }
            if !self.contains(&short) {
                corrections.insert(short, name.clone());
            }
        }
        corrections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(freq: u64) -> DictEntry {
        DictEntry {
            entity_type: EntityType::Person,
            aliases: BTreeSet::new(),
            frequency: freq,
            source: EntitySource::Stats,
        }
    }

    #[test]
    fn name_correction_maps_short_to_long_when_short_is_unregistered() {
        let mut dict = EntityDictionary::new();
        dict.insert("二愣子", person(30));
        let corrections = dict.build_name_corrections();
        assert_eq!(corrections.get("愣子"), Some(&"二愣子".to_string()));
    }

    #[test]
    fn name_correction_skipped_when_short_form_is_itself_legitimate() {
        let mut dict = EntityDictionary::new();
        dict.insert("二愣子", person(30));
        dict.insert("愣子", person(5));
        let corrections = dict.build_name_corrections();
        assert!(!corrections.contains_key("愣子"));
    }

    #[test]
    fn non_numeral_prefixed_names_are_untouched() {
        let mut dict = EntityDictionary::new();
        dict.insert("孙悟空", person(100));
        let corrections = dict.build_name_corrections();
        assert!(corrections.is_empty());
    }

    #[test]
    fn sorted_by_frequency_is_descending() {
        let mut dict = EntityDictionary::new();
        dict.insert("甲", person(5));
        dict.insert("乙", person(50));
        let sorted = dict.sorted_by_frequency();
        assert_eq!(sorted[0].0, "乙");
    }
}
