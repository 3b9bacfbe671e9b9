//! The Alias Resolver: a safety-tiered Union-Find merge of
//! alias groups (from the dictionary and per-chapter facts) into an
//! [`AliasMap`], with canonical-name selection.

use crate::model::{AliasMap, ChapterFact, EntityDictionary, EntityType};
use petgraph::unionfind::UnionFind;
use std::collections::{BTreeSet, HashMap};

/// Kinship terms that hard-block a name from ever bridging two
/// characters.
const KINSHIP_TERMS: [&str; 8] = ["大哥", "妈妈", "爹", "娘", "父亲", "母亲", "兄长", "姐姐"];

/// Suffixes that mark a name as kinship-derived even if not an exact
/// match against [`KINSHIP_TERMS`].
const KINSHIP_SUFFIXES: [&str; 4] = ["哥", "姐", "叔", "婶"];

/// Generic person references, soft-blocked.
const GENERIC_PERSON_REFS: [&str; 6] = ["老人", "少年", "妖精", "那怪", "书生", "姑娘"];

/// Pure titles, soft-blocked.
const PURE_TITLES: [&str; 6] = ["堂主", "长老", "掌门", "真人", "方丈", "教主"];

/// Collective markers, soft-blocked.
const COLLECTIVE_MARKERS: [&str; 3] = ["众", "群", "们"];

/// The three-tier safety classification every candidate alias name is
/// run through before it may bridge a Union-Find group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AliasSafety {
    /// Tier 0: kinship terms, possessive phrases, kinship-suffixed names.
    /// Never allowed to union with anything, under any primary.
    HardBlock,
    /// Tier 1: generic person references, pure titles, names longer than
    /// 8 characters, collective markers.
    SoftBlock,
    /// Tier 2: everything else — safe to register as a Union-Find node.
    Safe,
}

/// Classify `name`'s alias safety tier.
#[must_use]
pub fn alias_safety_level(name: &str) -> AliasSafety {
    if KINSHIP_TERMS.contains(&name)
        || name.contains('的')
        || KINSHIP_SUFFIXES.iter().any(|s| name.ends_with(s))
    {
        return AliasSafety::HardBlock;
    }
    if GENERIC_PERSON_REFS.contains(&name)
        || PURE_TITLES.contains(&name)
        || name.chars().count() > 8
        || COLLECTIVE_MARKERS.iter().any(|m| name.contains(m))
    {
        return AliasSafety::SoftBlock;
    }
    AliasSafety::Safe
}

/// One character's worth of alias evidence fed into [`build`]: a primary
/// name plus the aliases asserted for it, from either the dictionary or a
/// chapter fact's `aliases`/`new_aliases`.
#[derive(Debug, Clone)]
struct AliasCandidate {
    primary_name: String,
    aliases: BTreeSet<String>,
}

fn gather_candidates(dictionary: &EntityDictionary, facts: &[ChapterFact]) -> Vec<AliasCandidate> {
    let mut candidates = Vec::new();
    for (name, entry) in dictionary.iter() {
        if entry.entity_type != EntityType::Person {
            continue;
        }
        candidates.push(AliasCandidate { primary_name: name.clone(), aliases: entry.aliases.clone() });
    }
    for fact in facts {
        for character in &fact.characters {
            let mut aliases = character.aliases.clone();
            aliases.extend(character.new_aliases.clone());
            candidates.push(AliasCandidate { primary_name: character.name.clone(), aliases });
        }
    }
    candidates
}

/// Appearance-count proxy used by canonical selection: a primary's frequency accumulates from the
/// dictionary and from every chapter appearance; an alias's frequency
/// accumulates once per mention as someone else's alias.
fn accumulate_frequencies(dictionary: &EntityDictionary, facts: &[ChapterFact]) -> HashMap<String, u64> {
    let mut freq: HashMap<String, u64> = HashMap::new();
    for (name, entry) in dictionary.iter() {
        if entry.entity_type == EntityType::Person {
            *freq.entry(name.clone()).or_insert(0) += entry.frequency;
        }
    }
    for fact in facts {
        for character in &fact.characters {
            *freq.entry(character.name.clone()).or_insert(0) += 1;
            for alias in character.aliases.iter().chain(character.new_aliases.iter()) {
                *freq.entry(alias.clone()).or_insert(0) += 1;
            }
        }
    }
    freq
}

/// The Union-Find scaffolding: a stable index per safe node name (fixed
/// up front from a first pass over every candidate, so the underlying
/// union-find never needs to grow mid-resolution), plus a per-root
/// "owning primary" used to veto bridging unions.
struct SafeGraph {
    index_of: HashMap<String, usize>,
    names: Vec<String>,
    uf: UnionFind<usize>,
    owner_of_root: Vec<Option<String>>,
}

impl SafeGraph {
    /// Pre-size the graph for exactly the safe node names that will ever
    /// be registered, computed from `candidates` up front.
    fn for_candidates(candidates: &[AliasCandidate]) -> Self {
        let mut index_of = HashMap::new();
        let mut names = Vec::new();
        let mut register = |name: &str, index_of: &mut HashMap<String, usize>, names: &mut Vec<String>| {
            if !index_of.contains_key(name) {
                index_of.insert(name.to_string(), names.len());
                names.push(name.to_string());
            }
        };
        for candidate in candidates {
            if alias_safety_level(&candidate.primary_name) == AliasSafety::Safe {
                register(&candidate.primary_name, &mut index_of, &mut names);
            }
            for alias in &candidate.aliases {
                if alias_safety_level(alias) == AliasSafety::Safe {
                    register(alias, &mut index_of, &mut names);
                }
            }
        }
        let n = names.len();
        Self { index_of, names, uf: UnionFind::new(n), owner_of_root: vec![None; n] }
    }

    fn node(&self, name: &str) -> usize {
        self.index_of[name]
    }

    /// Mark `idx` as owned by `primary` (a registered safe primary's own
    /// node claims itself at registration time).
    fn claim(&mut self, idx: usize, primary: &str) {
        let root = self.uf.find(idx);
        if self.owner_of_root[root].is_none() {
            self.owner_of_root[root] = Some(primary.to_string());
        }
    }

    /// Union `a` and `b`, skipping the union (and returning `false`) if it
    /// would bridge two distinct safe primaries' groups.
    fn union_guarded(&mut self, a: usize, b: usize) -> bool {
        let ra = self.uf.find(a);
        let rb = self.uf.find(b);
        if ra == rb {
            return true;
        }
        let owner_a = self.owner_of_root[ra].clone();
        let owner_b = self.owner_of_root[rb].clone();
        if let (Some(oa), Some(ob)) = (&owner_a, &owner_b) {
            if oa != ob {
                return false;
            }
        }
        self.uf.union(a, b);
        let new_root = self.uf.find(a);
        let resolved_owner = owner_a.or(owner_b);
        self.owner_of_root[new_root] = resolved_owner;
        true
    }

    fn groups(&self) -> HashMap<usize, Vec<String>> {
        let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
        for (idx, name) in self.names.iter().enumerate() {
            let root = self.uf.find(idx);
            groups.entry(root).or_default().push(name.clone());
        }
        groups
    }
}

/// Choose the canonical name for one Union-Find group: keep members with
/// frequency >= 50% of the group max, then take the shortest, ties broken
/// lexicographically.
fn pick_canonical(members: &[String], freq: &HashMap<String, u64>) -> String {
    let max_freq = members.iter().map(|m| freq.get(m).copied().unwrap_or(0)).max().unwrap_or(0);
    let threshold = max_freq as f64 * 0.5;
    let mut eligible: Vec<&String> =
        members.iter().filter(|m| freq.get(*m).copied().unwrap_or(0) as f64 >= threshold).collect();
    if eligible.is_empty() {
        eligible = members.iter().collect();
    }
    eligible.sort_by(|a, b| a.chars().count().cmp(&b.chars().count()).then_with(|| a.cmp(b)));
    eligible[0].clone()
}

/// Build the [`AliasMap`] for a novel from its dictionary and every
/// chapter fact analyzed so far.
///
/// Never persisted — callers rebuild this on demand, and a read at a
/// narrower chapter range may produce a different canonical choice than a
/// read at a wider one.
#[must_use]
pub fn build(dictionary: &EntityDictionary, facts: &[ChapterFact]) -> AliasMap {
    let candidates = gather_candidates(dictionary, facts);
    let freq = accumulate_frequencies(dictionary, facts);

    let mut graph = SafeGraph::for_candidates(&candidates);

    for candidate in &candidates {
        let primary_safe = alias_safety_level(&candidate.primary_name) == AliasSafety::Safe;
        let safe_aliases: Vec<&String> =
            candidate.aliases.iter().filter(|a| alias_safety_level(a) == AliasSafety::Safe).collect();

        let mut nodes = Vec::new();
        if primary_safe {
            let idx = graph.node(&candidate.primary_name);
            graph.claim(idx, &candidate.primary_name);
            nodes.push(idx);
        }
        for alias in &safe_aliases {
            nodes.push(graph.node(alias));
        }

        for pair in nodes.windows(2) {
            graph.union_guarded(pair[0], pair[1]);
        }
    }

    let mut alias_map = AliasMap::new();
    for members in graph.groups().into_values() {
        if members.is_empty() {
            continue;
        }
        let canonical = pick_canonical(&members, &freq);
        for member in members {
            alias_map.insert(member, canonical.clone());
        }
    }
    alias_map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Character, DictEntry, EntitySource};

    fn person(aliases: &[&str], freq: u64) -> DictEntry {
        DictEntry {
            entity_type: EntityType::Person,
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            frequency: freq,
            source: EntitySource::Stats,
        }
    }

    #[test]
    fn kinship_terms_are_hard_blocked() {
        assert_eq!(alias_safety_level("大哥"), AliasSafety::HardBlock);
        assert_eq!(alias_safety_level("张三的"), AliasSafety::HardBlock);
    }

    #[test]
    fn generic_refs_and_titles_are_soft_blocked() {
        assert_eq!(alias_safety_level("众人"), AliasSafety::SoftBlock);
        assert_eq!(alias_safety_level("堂主"), AliasSafety::SoftBlock);
        assert_eq!(alias_safety_level("一二三四五六七八九"), AliasSafety::SoftBlock);
    }

    #[test]
    fn ordinary_names_are_safe() {
        assert_eq!(alias_safety_level("孙悟空"), AliasSafety::Safe);
        assert_eq!(alias_safety_level("美猴王"), AliasSafety::Safe);
    }

    #[test]
    fn seed_scenario_one_sun_wukong_alias_resolves() {
        let mut dict = EntityDictionary::new();
        dict.insert("孙悟空", person(&["美猴王"], 100));
        let map = build(&dict, &[]);
        assert_eq!(map.canonical_of("美猴王"), "孙悟空");
        assert!(map.is_canonical("孙悟空"));
    }

    #[test]
    fn seed_scenario_three_shared_unsafe_alias_does_not_merge_groups() {
        let mut fact = ChapterFact::empty(1);
        let mut a = Character { name: "甲".into(),..Default::default() };
        a.aliases.insert("妖精".into());
        let mut b = Character { name: "乙".into(),..Default::default() };
        b.aliases.insert("妖精".into());
        fact.characters.push(a);
        fact.characters.push(b);

        let dict = EntityDictionary::new();
        let map = build(&dict, &[fact]);
        assert_ne!(map.canonical_of("甲"), map.canonical_of("乙"));
    }

    #[test]
    fn safe_primaries_are_never_bridged_through_a_shared_safe_alias_when_independently_claimed() {
        // Two independent dictionary persons that happen to list a
        // common safe alias should not silently merge into one group —
        // the first claimant keeps it, the guard should prevent a
        // cross-character union from the second.
        let mut dict = EntityDictionary::new();
        dict.insert("孙悟空", person(&["大圣"], 100));
        dict.insert("牛魔王", person(&["大圣"], 90));
        let map = build(&dict, &[]);
        // Exactly one of them keeps the shared alias; the two primaries
        // must not resolve to the same canonical name.
        assert_ne!(map.canonical_of("孙悟空"), map.canonical_of("牛魔王"));
    }

    #[test]
    fn canonical_selection_prefers_shortest_above_frequency_threshold() {
        let mut dict = EntityDictionary::new();
        dict.insert("孙悟空", person(&["美猴王", "齐天大圣"], 100));
        let map = build(&dict, &[]);
        let canonical = map.canonical_of("美猴王");
        assert_eq!(canonical, "孙悟空");
    }

    // Property-based tests
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        // Distinct dictionary primaries, safe by construction.
        fn primary_name() -> impl Strategy<Value = String> {
            prop_oneof!["甲", "乙", "丙", "丁", "戊"]
        }

        proptest! {
            /// Property: two distinct safe primaries that only ever share a
            /// soft-blocked alias never resolve to the same canonical name
            ///.
            #[test]
            fn prop_soft_blocked_shared_alias_never_bridges_distinct_primaries(
                names in proptest::collection::hash_set(primary_name(), 2..=5),
            ) {
                let mut dict = EntityDictionary::new();
                for name in &names {
                    // "众人" is soft-blocked (a collective marker); every
                    // primary claims it as a shared alias.
                    dict.insert(name.as_str(), person(&["众人"], 10));
                }
                let map = build(&dict, &[]);
                let canonicals: std::collections::HashSet<&str> = names.iter().map(|n| map.canonical_of(n.as_str())).collect();
                prop_assert_eq!(canonicals.len(), names.len());
            }
        }
    }
}
