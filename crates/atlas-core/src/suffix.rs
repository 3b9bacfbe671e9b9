//! The name-suffix tier table driving suffix-rank direction validation in
//! the Location Hierarchy Engine and the Pre-Scanner's
//! suffix-pattern mining.
//!
//! Lower rank means larger geographic scale. Ranks are not unique per
//! suffix — several suffixes share a rank where the source text doesn't
//! distinguish their scale (城 and 京 are both rank 3, for instance).

/// `(suffix, rank)` pairs, ordered by descending suffix length so that
/// [`suffix_rank`] always matches the longest applicable suffix first
/// (e.g. "码头" before "头"). Lower rank = larger scale.
const NAME_SUFFIX_TIER: &[(&str, u32)] = &[
    // rank 1: cosmological / realm scale
    ("界", 1),
    ("天", 1),
    ("域", 1),
    // rank 2: nation / continent scale
    ("国", 2),
    ("洲", 2),
    ("朝", 2),
    // rank 3: city / capital scale
    ("城", 3),
    ("京", 3),
    ("都", 3),
    ("府", 3),
    ("州", 3),
    ("郡", 3),
    ("县", 3),
    // rank 4: district / valley scale
    ("谷", 4),
    ("镇", 4),
    ("村", 4),
    ("庄", 4),
    ("寨", 4),
    ("坊", 4),
    ("区", 4),
    // rank 5: large-building / estate scale
    ("殿", 5),
    ("宫", 5),
    ("阁", 5),
    ("院", 5),
    ("府邸", 5),
    ("楼", 5),
    ("庙", 5),
    ("寺", 5),
    ("观", 5),
    ("祠", 5),
    ("塔", 5),
    // rank 6: cave / room / small-structure scale
    ("洞", 6),
    ("窟", 6),
    ("室", 6),
    ("房", 6),
    ("屋", 6),
    ("厅", 6),
    ("堂", 6),
    ("亭", 6),
    ("轩", 6),
    ("斋", 6),
    // micro suffixes: smaller still, not assigned a numbered tier rank but
    // treated as sub-location markers by `_is_sub_location_name`
    ("沟", 7),
    ("街", 7),
    ("巷", 7),
    ("墓", 7),
    ("陵", 7),
    ("桥", 7),
    ("坝", 7),
    ("堡", 7),
    ("哨", 7),
    ("弄", 7),
    ("码头", 7),
    ("渡口", 7),
    ("胡同", 7),
    ("居", 7),
];

/// Suffixes that mark a location as a plausible sibling when the same
/// suffix appears on both sides of a single-direction hierarchy edge
///.
pub const SIBLING_CANDIDATE_SUFFIXES: [&str; 8] = ["府", "城", "寨", "庄", "镇", "村", "国", "州"];

/// Look up the suffix rank for `name`, matching the longest table entry
/// that is a proper suffix of `name`. Returns `None` when no suffix in the
/// table applies.
#[must_use]
pub fn suffix_rank(name: &str) -> Option<u32> {
    NAME_SUFFIX_TIER
    .iter()
    .filter(|(suffix, _)| name.ends_with(suffix) && name != *suffix)
    .max_by_key(|(suffix, _)| suffix.chars().count())
    .map(|(_, rank)| *rank)
}

/// Whether `name` ends in one of [`SIBLING_CANDIDATE_SUFFIXES`].
#[must_use]
pub fn is_sibling_candidate_suffix(name: &str) -> bool {
    SIBLING_CANDIDATE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Names that, despite ending in a recognizable place suffix, are
/// frequently homonymous across unrelated locations in long-form fiction
/// and therefore require stricter disambiguation before being merged
///. Not exhaustive —
/// entries a particular novel needs beyond this set surface as ordinary
/// validator warnings rather than blocking extraction.
pub const HOMONYM_PRONE_NAMES: [&str; 6] = ["夹道", "后门", "前厅", "小院", "后山", "东厢房"];

/// Whether `name` is in the curated homonym watch-list.
#[must_use]
pub fn is_homonym_prone(name: &str) -> bool {
    HOMONYM_PRONE_NAMES.contains(&name)
}

/// Infer a generic type label for a location name purely from its suffix
/// rank, for when the Validator must synthesize a missing parent location
/// that was referenced but never extracted. Returns `"区域"` only when no suffix in the table
/// applies, matching the rank-less fallback.
#[must_use]
pub fn infer_location_type(name: &str) -> &'static str {
    match suffix_rank(name) {
        Some(1) => "界域",
        Some(2) => "国家",
        Some(3) => "城池",
        Some(4) => "村镇",
        Some(5..=6) => "建筑",
        Some(_) => "地点",
        None => "区域",
    }
}

/// Whether `name`'s suffix places it below city scale (rank > 4) — the
/// threshold the Hierarchy Consolidator's tiered catch-all step uses to
/// decide whether an orphan may fall through to the uber-root at all
///.
#[must_use]
pub fn is_sub_city_scale(name: &str) -> bool {
    suffix_rank(name).map_or(true, |rank| rank > 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realm_ranks_above_nation() {
        assert!(suffix_rank("仙界").unwrap() < suffix_rank("大唐国").unwrap());
    }

    #[test]
    fn longest_suffix_match_wins_over_shorter_one() {
        // "码头" (rank 7) should win over a coincidental single-char match.
        assert_eq!(suffix_rank("黄沙码头"), Some(7));
    }

    #[test]
    fn unrecognized_suffix_returns_none() {
        assert_eq!(suffix_rank("阿福"), None);
    }

    #[test]
    fn sibling_candidate_suffixes_detected() {
        assert!(is_sibling_candidate_suffix("荣国府"));
        assert!(!is_sibling_candidate_suffix("花果山"));
    }

    #[test]
    fn city_scale_and_above_are_not_sub_city() {
        assert!(!is_sub_city_scale("大唐国"));
        assert!(is_sub_city_scale("水帘洞"));
    }

    #[test]
    fn infer_location_type_falls_back_to_generic_region() {
        assert_eq!(infer_location_type("阿福"), "区域");
        assert_eq!(infer_location_type("水帘洞"), "建筑");
    }
}
