//! The Entity Aggregator: on-demand aggregation of chapter
//! facts into entity profiles, using the [`AliasMap`] to fold every alias
//! of an entity back to its canonical name.

use crate::model::{AliasMap, Appearance, ChapterFact, WorldStructure};
use std::collections::{BTreeSet, HashMap, HashSet};

/// The coarse relationship bucket a normalized relation type falls into
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationCategory {
    /// Blood or marriage kinship.
    Family,
    /// Romantic or otherwise intimate bonds.
    Intimate,
    /// Master/disciple, ruler/subject, lord/servant — rendered with a
    /// distinct color channel.
    Hierarchical,
    /// Ordinary social ties (friends, acquaintances, colleagues).
    Social,
    /// Enmity, rivalry, open conflict.
    Hostile,
    /// Anything not covered by the above.
    Other,
}

/// Exact-then-substring relation-type normalization table: the
/// raw extracted label is looked up verbatim first, then by substring
/// match, mapping loose phrasing onto a fixed vocabulary ("师生" → "师徒").
const RELATION_NORMALIZATION_TABLE: &[(&str, &str)] = &[
    ("师徒", "师徒"),
    ("师生", "师徒"),
    ("师父与徒弟", "师徒"),
    ("主仆", "主仆"),
    ("主人与仆人", "主仆"),
    ("君臣", "君臣"),
    ("君主与臣子", "君臣"),
    ("父子", "父子"),
    ("母子", "母子"),
    ("父女", "父子"),
    ("母女", "母子"),
    ("兄弟", "兄弟"),
    ("结拜兄弟", "兄弟"),
    ("姐妹", "姐妹"),
    ("夫妻", "夫妻"),
    ("夫妇", "夫妻"),
    ("情侣", "情侣"),
    ("恋人", "情侣"),
    ("朋友", "朋友"),
    ("好友", "朋友"),
    ("同门", "同门"),
    ("师兄弟", "同门"),
    ("敌人", "敌对"),
    ("仇人", "敌对"),
    ("对手", "敌对"),
];

/// Normalize a raw extracted relation label: exact match against
/// [`RELATION_NORMALIZATION_TABLE`] first, then substring match (the raw
/// label contains, or is contained by, a table key), otherwise the raw
/// label passes through unchanged.
#[must_use]
pub fn normalize_relation_type(raw: &str) -> String {
    for (key, normalized) in RELATION_NORMALIZATION_TABLE {
        if raw == *key {
            return (*normalized).to_string();
        }
    }
    for (key, normalized) in RELATION_NORMALIZATION_TABLE {
        if raw.contains(key) {
            return (*normalized).to_string();
        }
    }
    raw.to_string()
}

/// Classify a normalized relation type into its [`RelationCategory`] (spec
/// §4.9).
#[must_use]
pub fn classify_relation_category(normalized: &str) -> RelationCategory {
    const FAMILY: [&str; 4] = ["父子", "母子", "兄弟", "姐妹"];
    const INTIMATE: [&str; 2] = ["夫妻", "情侣"];
    const HIERARCHICAL: [&str; 3] = ["师徒", "主仆", "君臣"];
    const HOSTILE: [&str; 1] = ["敌对"];
    const SOCIAL: [&str; 2] = ["朋友", "同门"];

    if FAMILY.contains(&normalized) {
        RelationCategory::Family
    } else if INTIMATE.contains(&normalized) {
        RelationCategory::Intimate
    } else if HIERARCHICAL.contains(&normalized) {
        RelationCategory::Hierarchical
    } else if HOSTILE.contains(&normalized) {
        RelationCategory::Hostile
    } else if SOCIAL.contains(&normalized) {
        RelationCategory::Social
    } else {
        RelationCategory::Other
    }
}

/// One stage of a [`RelationChain`]: a single normalized relation type
/// observed between two people, with the chapters and evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationStage {
    /// The normalized relation type.
    pub relation_type: String,
    /// Chapters this stage was observed in.
    pub chapters: Vec<u32>,
    /// Deduplicated free-text evidence strings.
    pub evidences: Vec<String>,
    /// First evidence string, kept as a scalar field for callers that
    /// only want one representative quote.
    pub evidence: String,
}

/// The full relationship history between a profile's subject and one
/// other person: one stage per distinct normalized relation type observed
/// across the novel, in first-observed order (a mentor who later becomes
/// an enemy gets two stages, not one overwritten record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationChain {
    /// The other person's canonical name.
    pub other: String,
    /// The relation category of the chain's most recent stage.
    pub category: RelationCategory,
    /// Stages in first-observed order.
    pub stages: Vec<RelationStage>,
}

/// An aggregated person profile.
#[derive(Debug, Clone, Default)]
pub struct PersonProfile {
    /// The canonical name this profile was built for.
    pub canonical_name: String,
    /// Every alias observed for this person across the gathered facts.
    pub aliases: BTreeSet<String>,
    /// Appearances across every chapter gathered.
    pub appearances: Vec<Appearance>,
    /// Deduplicated abilities.
    pub abilities: Vec<String>,
    /// Locations visited, first-mention order, deduplicated.
    pub locations: Vec<String>,
    /// Relation chains to every other person with at least one observed
    /// relationship, sorted by other's canonical name.
    pub relations: Vec<RelationChain>,
}

/// An aggregated location profile.
#[derive(Debug, Clone, Default)]
pub struct LocationProfile {
    /// The canonical name this profile was built for.
    pub canonical_name: String,
    /// Parent location, read from `WorldStructure.location_parents` (which
    /// overrides whatever parent a chapter fact asserted).
    pub parent: Option<String>,
    /// Direct children, from the inverse of the same hierarchy.
    pub children: Vec<String>,
    /// Characters (canonical names) who visited this location, grouped
    /// and deduplicated.
    pub visitors: Vec<String>,
    /// Free-text descriptions gathered from every chapter fact mentioning
    /// this location.
    pub descriptions: Vec<String>,
}

/// An aggregated item or organization profile — both are backed by the
/// same shape since neither carries bespoke structure in the data model
/// beyond name-keyed domain records.
#[derive(Debug, Clone, Default)]
pub struct DomainProfile {
    /// The canonical name this profile was built for.
    pub canonical_name: String,
    /// Chapters this entity was mentioned in, ascending.
    pub chapters: Vec<u32>,
    /// Free-text descriptions, one per mention.
    pub descriptions: Vec<String>,
}

/// One aggregated relationship graph edge between two canonical people
///.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// One endpoint's canonical name.
    pub from: String,
    /// The other endpoint's canonical name.
    pub to: String,
    /// The most frequently observed normalized relation type on this edge.
    pub relation_type: String,
    /// Every normalized type observed on this edge, sorted by descending
    /// frequency (ties broken alphabetically).
    pub all_types: Vec<(String, u32)>,
    /// Render color channel: hierarchical relations get a distinct
    /// "purple" channel; everything else falls back to a keyword-based
    /// default.
    pub color: &'static str,
}

/// Render color for an edge whose dominant type is `normalized_type`
///.
#[must_use]
fn relation_color(category: RelationCategory) -> &'static str {
    match category {
        RelationCategory::Hierarchical => "purple",
        RelationCategory::Family => "green",
        RelationCategory::Intimate => "pink",
        RelationCategory::Hostile => "red",
        RelationCategory::Social => "blue",
        RelationCategory::Other => "gray",
    }
}

/// Every distinct pair `(a, b)` with `a < b` lexicographically, each side
/// already resolved to its canonical name, that a `CharacterRelation`
/// asserts across `facts`.
fn canonical_pair(alias_map: &AliasMap, a: &str, b: &str) -> Option<(String, String)> {
    let ca = alias_map.canonical_of(a).to_string();
    let cb = alias_map.canonical_of(b).to_string();
    if ca == cb {
        return None;
    }
    Some(if ca < cb { (ca, cb) } else { (cb, ca) })
}

/// Gather every `(other_canonical, relation_type, chapter, evidence)` tuple
/// in which `canonical_name` is one side, across every fact.
fn gather_relation_tuples<'a>(
    canonical_name: &str,
    facts: &'a [ChapterFact],
    alias_map: &AliasMap,
) -> Vec<(String, &'a str, u32, &'a str)> {
    let mut tuples = Vec::new();
    for fact in facts {
        for relation in &fact.character_relations {
            let ca = alias_map.canonical_of(&relation.person_a);
            let cb = alias_map.canonical_of(&relation.person_b);
            let other = if ca == canonical_name {
                Some(cb)
            } else if cb == canonical_name {
                Some(ca)
            } else {
                None
            };
            if let Some(other) = other {
                if other != canonical_name {
                    tuples.push((
                            other.to_string(),
                            relation.relation_type.as_str(),
                            fact.chapter_num,
                            relation.evidence.as_str(),
                    ));
                }
            }
        }
    }
    tuples
}

/// Build [`RelationChain`]s for `canonical_name` against every other
/// person it has at least one asserted relationship with, in
/// first-observed stage order per chain.
fn build_relation_chains(canonical_name: &str, facts: &[ChapterFact], alias_map: &AliasMap) -> Vec<RelationChain> {
    let tuples = gather_relation_tuples(canonical_name, facts, alias_map);

    let mut others: Vec<&str> = tuples.iter().map(|(o,..)| o.as_str()).collect();
    others.sort_unstable();
    others.dedup();

    let mut chains = Vec::new();
    for other in others {
        let mut stage_order: Vec<String> = Vec::new();
        let mut stage_chapters: HashMap<String, BTreeSet<u32>> = HashMap::new();
        let mut stage_evidences: HashMap<String, Vec<String>> = HashMap::new();

        for (o, raw_type, chapter, evidence) in &tuples {
            if o != other {
                continue;
            }
            let normalized = normalize_relation_type(raw_type);
            if !stage_order.contains(&normalized) {
                stage_order.push(normalized.clone());
            }
            stage_chapters.entry(normalized.clone()).or_default().insert(*chapter);
            let evidences = stage_evidences.entry(normalized).or_default();
            if !evidence.is_empty() && !evidences.iter().any(|e| e == evidence) {
                evidences.push((*evidence).to_string());
            }
        }

        let stages: Vec<RelationStage> = stage_order
        .into_iter()
        .map(|relation_type| {
                let chapters: Vec<u32> = stage_chapters.get(&relation_type).cloned().unwrap_or_default().into_iter().collect();
                let evidences = stage_evidences.get(&relation_type).cloned().unwrap_or_default();
                let evidence = evidences.first().cloned().unwrap_or_default();
                RelationStage { relation_type, chapters, evidences, evidence }
        })
        .collect();

        let category = stages
        .last()
        .map(|s| classify_relation_category(&s.relation_type))
        .unwrap_or(RelationCategory::Other);

        chains.push(RelationChain { other: other.to_string(), category, stages });
    }
    chains
}

/// Aggregate every chapter-fact character whose name or any alias resolves
/// to `canonical_name` into a [`PersonProfile`].
#[must_use]
pub fn aggregate_person(canonical_name: &str, facts: &[ChapterFact], alias_map: &AliasMap) -> PersonProfile {
    let mut profile = PersonProfile { canonical_name: canonical_name.to_string(),..Default::default() };
    let mut seen_abilities = HashSet::new();
    let mut seen_locations = HashSet::new();

    for fact in facts {
        for character in &fact.characters {
            if alias_map.canonical_of(&character.name) != canonical_name {
                continue;
            }
            profile.aliases.insert(character.name.clone());
            profile.aliases.extend(character.aliases.iter().cloned());
            profile.aliases.extend(character.new_aliases.iter().cloned());
            profile.appearances.extend(character.appearances.iter().cloned());
            for ability in &character.abilities {
                if seen_abilities.insert(ability.clone()) {
                    profile.abilities.push(ability.clone());
                }
            }
            for location in &character.locations_in_chapter {
                if seen_locations.insert(location.clone()) {
                    profile.locations.push(location.clone());
                }
            }
        }
    }
    profile.aliases.remove(canonical_name);
    profile.relations = build_relation_chains(canonical_name, facts, alias_map);
    profile
}

/// Aggregate a [`LocationProfile`] for `canonical_name`: parent/children come from the live
/// `WorldStructure`, which overrides whatever a chapter fact claimed.
#[must_use]
pub fn aggregate_location(canonical_name: &str, facts: &[ChapterFact], world: &WorldStructure) -> LocationProfile {
    let mut profile = LocationProfile { canonical_name: canonical_name.to_string(),..Default::default() };
    profile.parent = world.location_parents.parent_of(canonical_name).map(str::to_string);
    profile.children = world
    .location_parents
    .direct_children_of(canonical_name)
    .into_iter()
    .map(str::to_string)
    .collect();
    profile.children.sort_unstable();

    let mut seen_visitors = HashSet::new();
    for fact in facts {
        for location in &fact.locations {
            if location.name == canonical_name && !location.description.is_empty() {
                profile.descriptions.push(location.description.clone());
            }
        }
        for character in &fact.characters {
            if character.locations_in_chapter.iter().any(|l| l == canonical_name)
            && seen_visitors.insert(character.name.clone())
            {
                profile.visitors.push(character.name.clone());
            }
        }
    }
    profile
}

/// Shared implementation for [`aggregate_item`] and [`aggregate_org`]: both
/// pull from a name-keyed `DomainRecord` list with identical shape.
fn aggregate_domain_records<'a>(
    canonical_name: &str,
    facts: &'a [ChapterFact],
    records_of: impl Fn(&'a ChapterFact) -> &'a [crate::model::DomainRecord],
) -> DomainProfile {
    let mut profile = DomainProfile { canonical_name: canonical_name.to_string(),..Default::default() };
    for fact in facts {
        for record in records_of(fact) {
            if record.name == canonical_name {
                profile.chapters.push(record.chapter);
                if !record.description.is_empty() {
                    profile.descriptions.push(record.description.clone());
                }
            }
        }
    }
    profile.chapters.sort_unstable();
    profile.chapters.dedup();
    profile
}

/// Aggregate an item's profile.
#[must_use]
pub fn aggregate_item(canonical_name: &str, facts: &[ChapterFact]) -> DomainProfile {
    aggregate_domain_records(canonical_name, facts, |fact| &fact.item_events)
}

/// Aggregate an organization's profile.
#[must_use]
pub fn aggregate_org(canonical_name: &str, facts: &[ChapterFact]) -> DomainProfile {
    aggregate_domain_records(canonical_name, facts, |fact| &fact.org_events)
}

/// Build the full relationship graph across every character pair with at
/// least one asserted relationship:
/// one [`GraphEdge`] per canonical pair, with `relation_type = argmax` and
/// `all_types` sorted by descending frequency.
#[must_use]
pub fn build_relation_graph(facts: &[ChapterFact], alias_map: &AliasMap) -> Vec<GraphEdge> {
    let mut counts: HashMap<(String, String), HashMap<String, u32>> = HashMap::new();

    for fact in facts {
        for relation in &fact.character_relations {
            let Some((a, b)) = canonical_pair(alias_map, &relation.person_a, &relation.person_b) else { continue };
            let normalized = normalize_relation_type(&relation.relation_type);
            *counts.entry((a, b)).or_default().entry(normalized).or_insert(0) += 1;
        }
    }

    let mut edges: Vec<GraphEdge> = counts
    .into_iter()
    .map(|((from, to), type_counts)| {
            let mut all_types: Vec<(String, u32)> = type_counts.into_iter().collect();
            all_types.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let dominant = all_types[0].0.clone();
            let color = relation_color(classify_relation_category(&dominant));
            GraphEdge { from, to, relation_type: dominant, all_types, color }
    })
    .collect();

    edges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Character, CharacterRelation};

    fn fact_with_relation(chapter: u32, a: &str, b: &str, rel: &str, evidence: &str) -> ChapterFact {
        let mut fact = ChapterFact::empty(chapter);
        fact.characters.push(Character { name: a.into(),..Default::default() });
        fact.characters.push(Character { name: b.into(),..Default::default() });
        fact.character_relations.push(CharacterRelation {
                person_a: a.into(),
                person_b: b.into(),
                relation_type: rel.into(),
                evidence: evidence.into(),
                chapters: vec![chapter],
        });
        fact
    }

    #[test]
    fn normalize_relation_type_matches_exact_then_substring() {
        assert_eq!(normalize_relation_type("师生"), "师徒");
        assert_eq!(normalize_relation_type("他们情同师生关系"), "师徒");
        assert_eq!(normalize_relation_type("萍水相逢"), "萍水相逢");
    }

    #[test]
    fn classify_relation_category_buckets_known_types() {
        assert_eq!(classify_relation_category("师徒"), RelationCategory::Hierarchical);
        assert_eq!(classify_relation_category("兄弟"), RelationCategory::Family);
        assert_eq!(classify_relation_category("敌对"), RelationCategory::Hostile);
    }

    #[test]
    fn aggregate_person_gathers_aliases_and_locations() {
        let mut fact = ChapterFact::empty(1);
        let mut c = Character { name: "美猴王".into(),..Default::default() };
        c.record_location("花果山");
        fact.characters.push(c);
        let alias_map = {
            let mut m = AliasMap::new();
            m.insert("美猴王", "孙悟空");
            m
        };
        let profile = aggregate_person("孙悟空", &[fact], &alias_map);
        assert!(profile.aliases.contains("美猴王"));
        assert_eq!(profile.locations, vec!["花果山".to_string()]);
    }

    #[test]
    fn relation_chain_accumulates_stages_across_chapters() {
        let facts = vec![
            fact_with_relation(1, "孙悟空", "菩提祖师", "师生", "学艺七年"),
            fact_with_relation(5, "孙悟空", "菩提祖师", "师生", "习得七十二变"),
        ];
        let alias_map = AliasMap::new();
        let profile = aggregate_person("孙悟空", &facts, &alias_map);
        assert_eq!(profile.relations.len(), 1);
        let chain = &profile.relations[0];
        assert_eq!(chain.other, "菩提祖师");
        assert_eq!(chain.stages.len(), 1);
        assert_eq!(chain.stages[0].relation_type, "师徒");
        assert_eq!(chain.stages[0].chapters, vec![1, 5]);
        assert_eq!(chain.stages[0].evidences.len(), 2);
        assert_eq!(chain.category, RelationCategory::Hierarchical);
    }

    #[test]
    fn build_relation_graph_picks_argmax_and_sorts_all_types() {
        let facts = vec![
            fact_with_relation(1, "孙悟空", "猪八戒", "师兄弟", "同门学艺"),
            fact_with_relation(2, "孙悟空", "猪八戒", "师兄弟", "并肩作战"),
            fact_with_relation(3, "孙悟空", "猪八戒", "朋友", "结伴同行"),
        ];
        let alias_map = AliasMap::new();
        let edges = build_relation_graph(&facts, &alias_map);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation_type, "同门");
        assert_eq!(edges[0].all_types[0], ("同门".to_string(), 2));
        assert_eq!(edges[0].color, "blue");
    }

    #[test]
    fn aggregate_item_collects_descriptions_across_chapters() {
        let mut fact1 = ChapterFact::empty(1);
        fact1.item_events.push(crate::model::DomainRecord { name: "金箍棒".into(), chapter: 1, description: "定海神针".into() });
        let mut fact2 = ChapterFact::empty(2);
        fact2.item_events.push(crate::model::DomainRecord { name: "金箍棒".into(), chapter: 2, description: "变化如意".into() });
        let profile = aggregate_item("金箍棒", &[fact1, fact2]);
        assert_eq!(profile.chapters, vec![1, 2]);
        assert_eq!(profile.descriptions.len(), 2);
    }
}
