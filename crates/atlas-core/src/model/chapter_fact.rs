//! The primary per-chapter extraction output.

use crate::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Confidence an extracted spatial relationship was asserted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Stated outright in the text ("位于...之内").
    High,
    /// Reasonably inferred.
    Medium,
    /// Weakly inferred, e.g. from a single ambiguous mention.
    Low,
}

/// The kind of spatial relationship asserted between two locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// `source` geographically contains `target`.
    Contains,
    /// `source` and `target` border each other without a clear direction.
    Adjacent,
    /// `target` lies north of `source`.
    NorthOf,
    /// `target` lies south of `source`.
    SouthOf,
    /// `target` lies east of `source`.
    EastOf,
    /// `target` lies west of `source`.
    WestOf,
    /// `source` and `target` are described as close, without a direction.
    Near,
    /// `source` and `target` are described as distant.
    Far,
    /// `source` and `target` are separated by some barrier (the barrier is
    /// recorded in `value`).
    SeparatedBy,
    /// `target` lies between `source` and a third location (in `value`).
    Between,
    /// `target`'s terrain resembles `source`'s (used for procedural terrain
    /// hints, not containment).
    TerrainLike,
}

/// Whether an extracted location was the chapter's actual setting, merely
/// referenced in passing, or a boundary marker between two settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRole {
    /// The chapter's action actually takes place here.
    Setting,
    /// Mentioned but not visited in this chapter.
    Referenced,
    /// A transitional marker between two settings (a gate, a border).
    Boundary,
}

/// One appearance of a character, scoped to the chapters it spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    /// Free-text description of what the character did.
    pub description: String,
    /// Chapters this appearance covers.
    pub chapters: Vec<u32>,
}

/// A character extracted from one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Character {
    /// Canonical-for-this-chapter name (post name-correction, pre alias
    /// resolution — alias resolution happens at aggregation time, not here).
    pub name: String,
    /// Known aliases, from the dictionary or prior chapters.
    pub aliases: BTreeSet<String>,
    /// Aliases newly observed in this chapter, not yet in the dictionary.
    pub new_aliases: BTreeSet<String>,
    /// Locations the character was present in, in first-mention order, with
    /// no duplicates.
    pub locations_in_chapter: Vec<String>,
    /// Notable abilities or skills displayed or mentioned.
    pub abilities: Vec<String>,
    /// Appearances making up this character's presence in the chapter.
    pub appearances: Vec<Appearance>,
}

impl Character {
    /// Push a location onto `locations_in_chapter`, preserving first-mention
    /// order and skipping duplicates (it is an ordered *set*, spec §3).
    pub fn record_location(&mut self, location: impl Into<String>) {
        let location = location.into();
        if !self.locations_in_chapter.contains(&location) {
            self.locations_in_chapter.push(location);
        }
    }
}

/// A location extracted from one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocationRecord {
    /// The location's name as extracted (subject to later validation and
    /// homonym-disambiguation renaming).
    pub name: String,
    /// Free-text type description ("city", "mountain", "inn"...).
    pub loc_type: String,
    /// Parent location mentioned in this chapter, if any.
    pub parent: Option<String>,
    /// Role this location played in the chapter.
    pub role: Option<LocationRole>,
    /// Tier classification, if already known (otherwise inferred later by
    /// the Hierarchy Consolidator).
    pub tier: Option<String>,
    /// Free-text description.
    pub description: String,
}

/// A spatial relationship asserted between two named locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialRelationship {
    /// The relationship's subject location.
    pub source: String,
    /// The relationship's object location.
    pub target: String,
    /// The kind of relationship.
    pub relation_type: RelationType,
    /// Free-text detail (e.g. the barrier name for `SeparatedBy`).
    pub value: String,
    /// How confidently the text supports this relationship.
    pub confidence: Confidence,
    /// Chapters this relationship was observed in.
    pub chapters: Vec<u32>,
}

/// A relationship asserted between two characters in a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRelation {
    /// One side of the relationship, as extracted (pre alias resolution).
    pub person_a: String,
    /// The other side, as extracted.
    pub person_b: String,
    /// Free-text relation label as extracted ("师生", "结拜兄弟",...),
    /// normalized later by `aggregator::normalize_relation_type`.
    pub relation_type: String,
    /// Free-text evidence for this relationship.
    pub evidence: String,
    /// Chapters this relationship was observed in.
    pub chapters: Vec<u32>,
}

/// A generic domain record for items, organizations, plain events, and new
/// concepts — each keyed by `(name, chapter)` per spec §3. These four record
/// kinds don't carry bespoke structure beyond a name and a free-text
/// description, so one type backs all four lists on [`ChapterFact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    /// The record's name.
    pub name: String,
    /// Chapter this record was extracted from.
    pub chapter: u32,
    /// Free-text description.
    pub description: String,
}

impl DomainRecord {
    /// The `(name, chapter)` dedup key used across §4.4's fact-union step.
    #[must_use]
    pub fn key(&self) -> (&str, u32) {
        (self.name.as_str(), self.chapter)
    }
}

/// Metadata about how a chapter's extraction was carried out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractionMeta {
    /// Whether the chapter text had to be truncated to fit the budget.
    pub is_truncated: bool,
    /// Number of segments the chapter was split into (>= 1).
    pub segment_count: u32,
    /// Classified failure, if the extraction did not fully succeed.
    pub error_type: Option<FailureKind>,
    /// Wall-clock milliseconds spent on this chapter's extraction.
    pub elapsed_ms: u64,
}

/// The full structured record extracted from one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChapterFact {
    /// 1-based chapter number, unique per novel.
    pub chapter_num: u32,
    /// Characters present or mentioned in this chapter.
    pub characters: Vec<Character>,
    /// Locations present or mentioned in this chapter.
    pub locations: Vec<LocationRecord>,
    /// Spatial relationships asserted in this chapter.
    pub spatial_relationships: Vec<SpatialRelationship>,
    /// Relationships asserted between characters in this chapter.
    pub character_relations: Vec<CharacterRelation>,
    /// Item-centric events.
    pub item_events: Vec<DomainRecord>,
    /// Organization-centric events.
    pub org_events: Vec<DomainRecord>,
    /// Plain plot events, not tied to an item or organization.
    pub events: Vec<DomainRecord>,
    /// Concepts (terminology, cultivation systems, etc.) introduced here.
    pub new_concepts: Vec<DomainRecord>,
    /// Extraction metadata.
    pub extraction_meta: ExtractionMeta,
}

impl ChapterFact {
    /// An empty-but-valid fact for a chapter with zero extracted entities
    ///.
    #[must_use]
    pub fn empty(chapter_num: u32) -> Self {
        Self {
            chapter_num,
            ..Default::default()
        }
    }

    /// Every location name mentioned anywhere in this fact: as a location
    /// record, as a character's `locations_in_chapter` entry, or as a
    /// spatial-relationship endpoint. Used by the homonym rename propagation
    /// step and by hierarchy vote accumulation.
    #[must_use]
    pub fn all_location_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for loc in &self.locations {
            names.insert(loc.name.clone());
        }
        for character in &self.characters {
            for loc in &character.locations_in_chapter {
                names.insert(loc.clone());
            }
        }
        for rel in &self.spatial_relationships {
            names.insert(rel.source.clone());
            names.insert(rel.target.clone());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chapter_fact_is_valid_and_empty() {
        let fact = ChapterFact::empty(3);
        assert_eq!(fact.chapter_num, 3);
        assert!(fact.characters.is_empty());
        assert!(fact.locations.is_empty());
        assert_eq!(fact.extraction_meta.segment_count, 0);
    }

    #[test]
    fn record_location_deduplicates_and_preserves_order() {
        let mut c = Character::default();
        c.record_location("花果山");
        c.record_location("水帘洞");
        c.record_location("花果山");
        assert_eq!(c.locations_in_chapter, vec!["花果山", "水帘洞"]);
    }

    #[test]
    fn all_location_names_gathers_every_source() {
        let mut fact = ChapterFact::empty(1);
        fact.locations.push(LocationRecord {
                name: "花果山".into(),
                ..Default::default()
        });
        fact.spatial_relationships.push(SpatialRelationship {
                source: "花果山".into(),
                target: "水帘洞".into(),
                relation_type: RelationType::Contains,
                value: String::new(),
                confidence: Confidence::High,
                chapters: vec![1],
        });
        let names = fact.all_location_names();
        assert!(names.contains("花果山"));
        assert!(names.contains("水帘洞"));
    }
}
