//! Data model shared across every pipeline stage.

pub mod alias;
pub mod chapter_fact;
pub mod dictionary;
pub mod hierarchy;
pub mod layout;
pub mod world;

pub use alias::AliasMap;
pub use chapter_fact::{
    Appearance, CharacterRelation, ChapterFact, Character, Confidence, DomainRecord, ExtractionMeta,
    LocationRecord, LocationRole, RelationType, SpatialRelationship,
};
pub use dictionary::{DictEntry, EntityDictionary, EntitySource, EntityType, CHINESE_NUMERAL_PREFIXES};
pub use hierarchy::LocationHierarchy;
pub use layout::{ConstraintType, LayoutConstraint, LayoutEntry, LayoutMode, MapLayout};
pub use world::{GeoType, MapLayer, ParentVotes, Portal, TierClass, VoteWeight, WorldStructure};
