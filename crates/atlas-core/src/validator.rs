//! The Fact Validator: morphological and structural
//! filters applied to a freshly extracted [`ChapterFact`] before
//! persistence.

use crate::model::{ChapterFact, EntityDictionary};
use crate::suffix::{infer_location_type, is_homonym_prone};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Generic tail words with no proper-name head in front of them ("山上",
/// "村外") — rule (ii).
const GENERIC_TAILS: [&str; 6] = ["山上", "村外", "城里", "屋内", "门外", "路边"];

/// Furniture/object exact matches rejected outright as locations — rule
/// (iv).
const FURNITURE_EXACT_MATCHES: [&str; 4] = ["炕桌", "火盆", "椅子", "桌子"];

/// Descriptive adjectives that, combined with a generic tail, name no
/// specific place — rule (iii).
const DESCRIPTIVE_PREFIXES: [&str; 4] = ["偏僻", "荒凉", "破旧", "简陋"];

/// Demonstrative prefixes that mark a transient reference rather than a
/// proper name ("这座山", "那间屋") — rule (vi).
const DEMONSTRATIVE_PREFIXES: [&str; 4] = ["这", "那", "某", "此"];

/// Room/chamber suffixes used by rule (v) ("character name + room
/// suffix", e.g. "宝玉屋内").
const ROOM_SUFFIXES: [&str; 4] = ["屋内", "房中", "院内", "室内"];

/// Pure directional words with no proper-name head — rule (viii).
const DIRECTIONAL_REFS: [&str; 12] =
    ["东边", "西边", "南边", "北边", "东侧", "西侧", "南侧", "北侧", "前方", "后方", "左边", "右边"];

/// Demonstrative + generic place word fused into a single fixed phrase —
/// rule (ix).
const PRONOMINAL_PLACE_WORDS: [&str; 8] = ["这里", "那里", "此处", "彼处", "别处", "他处", "哪里", "何处"];

/// Vague-proximity references with no proper-name head — rule (x).
const VAGUE_PROXIMITY_REFS: [&str; 6] = ["附近", "远处", "近处", "不远处", "远方", "一旁"];

/// Bracket/quote characters that mark a stray annotation leaking into the
/// name field rather than a location — rule (xi).
const ANNOTATION_MARKERS: [char; 6] = ['（', '(', '【', '[', '「', '『'];

/// Quantifier-only references with no proper-name head — rule (xiii).
const QUANTIFIER_ONLY_REFS: [&str; 5] = ["一处", "某处", "几处", "某地", "一地"];

/// Direction-word prefixes checked against [`GENERIC_TAIL_FRAGMENTS`] for
/// rule (xiv) ("东边小路", "西侧角落").
const DIRECTION_PREFIXES: [&str; 8] = ["东边", "西边", "南边", "北边", "东侧", "西侧", "南侧", "北侧"];

/// Generic tail fragments that, combined with a direction prefix, name no
/// specific place — rule (xiv).
const GENERIC_TAIL_FRAGMENTS: [&str; 6] = ["小路", "角落", "一角", "一带", "空地", "树下"];

/// Time words whose presence marks a temporal phrase that leaked into the
/// location field — rule (xvi).
const TEMPORAL_LEAK_WORDS: [&str; 5] = ["今日", "昨夜", "当时", "此刻", "片刻"];

/// Sentence-final particles marking a stray dialogue fragment rather than
/// a name — rule (xvii).
const DIALOGUE_FINAL_PARTICLES: [char; 4] = ['啊', '呀', '吧', '呢'];

/// Pure title words rejected as person names outright.
const PURE_TITLES: [&str; 6] = ["堂主", "长老", "掌门", "真人", "方丈", "教主"];

/// Pure generic person references, not specific individuals.
const GENERIC_PERSON_REFS: [&str; 6] = ["众人", "老人", "少年", "妖精", "那怪", "小厮"];

fn numeric_only_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9一二三四五六七八九十百千万]+$").expect("fixed pattern"))
}

fn ordinal_only_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^第[0-9一二三四五六七八九十]+[间处座个]$").expect("fixed pattern"))
}

/// Whether `name` should be rejected as a location name by the 18
/// location rules (spec.md §4.5).
#[must_use]
pub fn is_rejected_location_name(name: &str) -> bool {
    let char_count = name.chars().count();

    // (i) single-character names
    if char_count <= 1 {
        return true;
    }
    // (ii) generic tails without a proper-name head
    if GENERIC_TAILS.contains(&name) {
        return true;
    }
    // (iii) descriptive adjective + generic tail ("偏僻地方", "荒凉之地")
    if DESCRIPTIVE_PREFIXES.iter().any(|p| name.starts_with(p)) && (name.ends_with("地方") || name.ends_with("之地"))
    {
        return true;
    }
    // (iv) furniture/object exact matches
    if FURNITURE_EXACT_MATCHES.contains(&name) {
        return true;
    }
    // (v) character name + room suffix, combined length >= 4 ("宝玉屋内")
    if char_count >= 4 && ROOM_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        return true;
    }
    // (vi) demonstrative-prefix transient references ("这座山", "那间屋")
    if DEMONSTRATIVE_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return true;
    }
    // (vii) numeric-only names
    if numeric_only_regex().is_match(name) {
        return true;
    }
    // (viii) pure directional references ("东边", "前方")
    if DIRECTIONAL_REFS.contains(&name) {
        return true;
    }
    // (ix) demonstrative + generic place word fused into one phrase
    // ("这里", "此处")
    if PRONOMINAL_PLACE_WORDS.contains(&name) {
        return true;
    }
    // (x) vague-proximity references with no proper-name head ("附近", "远处")
    if VAGUE_PROXIMITY_REFS.contains(&name) {
        return true;
    }
    // (xi) bracket/quote annotation artifacts leaking into the name field
    if name.chars().any(|c| ANNOTATION_MARKERS.contains(&c)) {
        return true;
    }
    // (xii) possessive-marker names ("他的家")
    if name.contains('的') {
        return true;
    }
    // (xiii) quantifier-only references ("一处", "某地")
    if QUANTIFIER_ONLY_REFS.contains(&name) {
        return true;
    }
    // (xiv) direction prefix + generic tail fragment ("东边小路", "西侧角落")
    if DIRECTION_PREFIXES.iter().any(|p| name.starts_with(p))
        && GENERIC_TAIL_FRAGMENTS.iter().any(|t| name.ends_with(t))
    {
        return true;
    }
    // (xv) repeated single-character padding ("山山", "水水")
    if char_count == 2 {
        let mut chars = name.chars();
        let (a, b) = (chars.next(), chars.next());
        if a == b {
            return true;
        }
    }
    // (xvi) temporal phrase leaking into the location field ("今日", "此刻")
    if TEMPORAL_LEAK_WORDS.iter().any(|w| name.contains(w)) {
        return true;
    }
    // (xvii) stray dialogue fragment ending in a sentence-final particle
    if name.chars().count() > 1 && name.chars().last().is_some_and(|c| DIALOGUE_FINAL_PARTICLES.contains(&c)) {
        return true;
    }
    // (xviii) ordinal + generic tail ("第一间", "第三座")
    if ordinal_only_regex().is_match(name) {
        return true;
    }
    false
}

/// Whether `name` should be rejected as a person name, given the set of
/// other person names already known in the novel (for the length-1
/// surname cross-reference exception).
#[must_use]
pub fn is_rejected_person_name(name: &str, known_person_names: &[String]) -> bool {
    if PURE_TITLES.contains(&name) || GENERIC_PERSON_REFS.contains(&name) {
        return true;
    }
    let char_count = name.chars().count();
    if char_count == 1 {
        let surname = name.chars().next();
        let has_surname_match = known_person_names.iter().any(|other| {
                other.chars().count() >= 2 && other.chars().next() == surname
        });
        return !has_surname_match;
    }
    false
}

/// Apply the dictionary-driven `short -> long` name correction to every
/// character name in `fact`: for every dictionary person
/// starting with a Chinese numeral whose short form is not itself a
/// legitimate entry, rewrite the short form to the long form.
pub fn apply_name_corrections(fact: &mut ChapterFact, dictionary: &EntityDictionary) {
    let corrections = dictionary.build_name_corrections();
    if corrections.is_empty() {
        return;
    }
    for character in &mut fact.characters {
        if let Some(long_form) = corrections.get(&character.name) {
            character.name = long_form.clone();
        }
    }
}

/// Drop characters and locations that fail the morphological rules.
pub fn apply_morphological_filters(fact: &mut ChapterFact) {
    let known_person_names: Vec<String> = fact.characters.iter().map(|c| c.name.clone()).collect();
    fact.characters
    .retain(|c| !is_rejected_person_name(&c.name, &known_person_names));
    fact.locations.retain(|l| !is_rejected_location_name(&l.name));
}

/// After name-dedup, merge any character B into character A when A lists
/// B in `aliases`/`new_aliases` and B also appears as its own record
///: union of aliases,
/// locations, abilities, appearances.
pub fn merge_aliased_characters(fact: &mut ChapterFact) {
    loop {
        let merge_pair = fact.characters.iter().enumerate().find_map(|(a_idx, a)| {
                fact.characters.iter().enumerate().find_map(|(b_idx, b)| {
                        if a_idx == b_idx {
                            return None;
                        }
                        if a.aliases.contains(&b.name) || a.new_aliases.contains(&b.name) {
                            Some((a_idx, b_idx))
                        } else {
                            None
                        }
                })
        });

        let Some((a_idx, b_idx)) = merge_pair else { break };
        let b = fact.characters.remove(b_idx);
        let a_idx = if b_idx < a_idx { a_idx - 1 } else { a_idx };
        let a = &mut fact.characters[a_idx];

        a.aliases.extend(b.aliases);
        a.new_aliases.extend(b.new_aliases);
        for location in b.locations_in_chapter {
            a.record_location(location);
        }
        for ability in b.abilities {
            if !a.abilities.contains(&ability) {
                a.abilities.push(ability);
            }
        }
        a.appearances.extend(b.appearances);
    }
}

/// The final step of `validate()`: rename every homonym-prone location
/// with a non-null parent to `"{parent}·{name}"`, propagating the rename
/// everywhere the old name appeared.
pub fn disambiguate_homonym_locations(fact: &mut ChapterFact) {
    let renames: HashMap<String, String> = fact
    .locations
    .iter()
    .filter_map(|loc| {
            let parent = loc.parent.as_ref()?;
            if is_homonym_prone(&loc.name) {
                Some((loc.name.clone(), format!("{parent}\u{b7}{}", loc.name)))
            } else {
                None
            }
    })
    .collect();

    if renames.is_empty() {
        return;
    }

    for location in &mut fact.locations {
        if let Some(new_name) = renames.get(&location.name) {
            location.name = new_name.clone();
        }
        if let Some(parent) = &location.parent {
            if let Some(new_name) = renames.get(parent) {
                location.parent = Some(new_name.clone());
            }
        }
    }
    for character in &mut fact.characters {
        for loc_name in &mut character.locations_in_chapter {
            if let Some(new_name) = renames.get(loc_name) {
                *loc_name = new_name.clone();
            }
        }
    }
    for relation in &mut fact.spatial_relationships {
        if let Some(new_name) = renames.get(&relation.source) {
            relation.source = new_name.clone();
        }
        if let Some(new_name) = renames.get(&relation.target) {
            relation.target = new_name.clone();
        }
    }
}

/// Infer a type label for a location the Validator must synthesize (a
/// parent referenced but never separately extracted), from its name
/// suffix rather than a hard-coded default.
#[must_use]
pub fn infer_missing_parent_type(name: &str) -> &'static str {
    infer_location_type(name)
}

/// Run the full validation pipeline over `fact` in place, in the order
/// spec §4.5 requires: name correction, morphological filters, alias
/// merge, then homonym disambiguation last.
pub fn validate(fact: &mut ChapterFact, dictionary: &EntityDictionary) {
    apply_name_corrections(fact, dictionary);
    apply_morphological_filters(fact);
    merge_aliased_characters(fact);
    disambiguate_homonym_locations(fact);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Character, LocationRecord};

    #[test]
    fn single_character_location_names_are_rejected() {
        assert!(is_rejected_location_name("山"));
    }

    #[test]
    fn furniture_exact_matches_are_rejected() {
        assert!(is_rejected_location_name("炕桌"));
    }

    #[test]
    fn ordinary_proper_names_survive() {
        assert!(!is_rejected_location_name("花果山"));
        assert!(!is_rejected_location_name("水帘洞"));
    }

    #[test]
    fn pure_directional_references_are_rejected() {
        assert!(is_rejected_location_name("东边"));
        assert!(is_rejected_location_name("前方"));
    }

    #[test]
    fn pronominal_place_words_are_rejected() {
        assert!(is_rejected_location_name("这里"));
        assert!(is_rejected_location_name("此处"));
    }

    #[test]
    fn vague_proximity_references_are_rejected() {
        assert!(is_rejected_location_name("附近"));
    }

    #[test]
    fn bracketed_annotation_artifacts_are_rejected() {
        assert!(is_rejected_location_name("花果山（疑似）"));
    }

    #[test]
    fn possessive_marker_locations_are_rejected() {
        assert!(is_rejected_location_name("他的家"));
    }

    #[test]
    fn direction_prefix_plus_generic_tail_is_rejected() {
        assert!(is_rejected_location_name("东边小路"));
    }

    #[test]
    fn repeated_character_padding_is_rejected() {
        assert!(is_rejected_location_name("山山"));
    }

    #[test]
    fn temporal_leak_words_are_rejected() {
        assert!(is_rejected_location_name("今日花园"));
    }

    #[test]
    fn dialogue_fragment_particles_are_rejected() {
        assert!(is_rejected_location_name("快走吧"));
    }

    #[test]
    fn ordinal_plus_generic_tail_is_rejected() {
        assert!(is_rejected_location_name("第三间"));
    }

    #[test]
    fn pure_titles_are_rejected_as_person_names() {
        assert!(is_rejected_person_name("堂主", &[]));
    }

    #[test]
    fn single_character_name_survives_with_surname_match() {
        let known = vec!["孙悟空".to_string()];
        assert!(!is_rejected_person_name("孙", &known));
    }

    #[test]
    fn single_character_name_rejected_without_surname_match() {
        let known = vec!["猪八戒".to_string()];
        assert!(is_rejected_person_name("孙", &known));
    }

    #[test]
    fn homonym_location_is_renamed_and_propagated() {
        let mut fact = ChapterFact::empty(1);
        fact.locations.push(LocationRecord {
                name: "夹道".into(),
                parent: Some("大观园".into()),
                ..Default::default()
        });
        let mut character = Character { name: "宝玉".into(),..Default::default() };
        character.record_location("夹道");
        fact.characters.push(character);

        disambiguate_homonym_locations(&mut fact);

        assert_eq!(fact.locations[0].name, "大观园·夹道");
        assert_eq!(fact.characters[0].locations_in_chapter[0], "大观园·夹道");
    }

    #[test]
    fn alias_merge_unions_locations_and_abilities() {
        let mut fact = ChapterFact::empty(1);
        let mut a = Character { name: "孙悟空".into(),..Default::default() };
        a.aliases.insert("美猴王".to_string());
        a.record_location("花果山");
        fact.characters.push(a);
        let mut b = Character { name: "美猴王".into(),..Default::default() };
        b.record_location("水帘洞");
        b.abilities.push("七十二变".into());
        fact.characters.push(b);

        merge_aliased_characters(&mut fact);

        assert_eq!(fact.characters.len(), 1);
        assert_eq!(fact.characters[0].locations_in_chapter.len(), 2);
        assert_eq!(fact.characters[0].abilities, vec!["七十二变".to_string()]);
    }
}
