//! Geographic dataset selection: deciding whether a novel's
//! world is grounded in real-world geography, and resolving individual
//! location names against a supplied [`GeoGazetteer`].

use crate::config::GenreHint;
use crate::error::Result;
use crate::model::GeoType;
use crate::storage::{GazetteerMatch, GeoGazetteer};
use std::collections::HashMap;

/// Which gazetteer dataset the core decided to query for a novel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoScope {
    /// Query the Chinese administrative-geography dataset.
    Cn,
    /// Query the world (GeoNames-style) dataset.
    World,
    /// No gazetteer lookups are worth attempting (genre hint says fantasy,
    /// or the location set is too small to bother).
    None,
}

/// The fraction of CJK characters among `locations`' names above which
/// the CN dataset is the natural first choice over the world dataset.
const CJK_DOMINANT_RATIO: f64 = 0.8;

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}')
}

fn cjk_ratio(locations: &[String]) -> f64 {
    let total: usize = locations.iter().map(|l| l.chars().count()).sum();
    if total == 0 {
        return 0.0;
    }
    let cjk: usize = locations.iter().map(|l| l.chars().filter(|c| is_cjk(*c)).count()).sum();
    cjk as f64 / total as f64
}

/// Decide which gazetteer dataset to query, from the genre hint and the
/// location set's script composition.
#[must_use]
pub fn detect_geo_scope(genre_hint: GenreHint, locations: &[String]) -> GeoScope {
    if matches!(genre_hint, GenreHint::Fantasy | GenreHint::Xianxia) {
        return GeoScope::None;
    }
    if locations.is_empty() {
        return GeoScope::None;
    }
    if cjk_ratio(locations) >= CJK_DOMINANT_RATIO {
        GeoScope::Cn
    } else {
        GeoScope::World
    }
}

/// `>= 20%` notable matches -> `realistic`; `>= 5%` -> `mixed`; below that
/// -> `fantasy`.
#[must_use]
fn classify_notable_ratio(ratio: f64) -> GeoType {
    if ratio >= 0.20 {
        GeoType::Realistic
    } else if ratio >= 0.05 {
        GeoType::Mixed
    } else {
        GeoType::Fantasy
    }
}

async fn notable_ratio(gazetteer: &dyn GeoGazetteer, locations: &[String]) -> Result<f64> {
    if locations.is_empty() {
        return Ok(0.0);
    }
    let mut notable = 0usize;
    for name in locations {
        let matches = gazetteer.lookup(name).await?;
        if matches.iter().any(GazetteerMatch::is_notable) {
            notable += 1;
        }
    }
    Ok(notable as f64 / locations.len() as f64)
}

/// Count notable matches (population >= 5,000 or a county-level+ admin
/// feature code, matched by exact name with no suffix stripping) against
/// `locations`, and classify the result. Genres `{fantasy,
/// xianxia}` short-circuit without a single lookup. If the CN dataset
/// yields below 5% notable matches, retries against the world dataset
///.
pub async fn detect_geo_type(
    cn_gazetteer: Option<&dyn GeoGazetteer>,
    world_gazetteer: Option<&dyn GeoGazetteer>,
    genre_hint: GenreHint,
    locations: &[String],
) -> Result<GeoType> {
    if matches!(genre_hint, GenreHint::Fantasy | GenreHint::Xianxia) {
        return Ok(GeoType::Fantasy);
    }

    if let Some(cn) = cn_gazetteer {
        let ratio = notable_ratio(cn, locations).await?;
        if ratio >= 0.05 {
            return Ok(classify_notable_ratio(ratio));
        }
    }

    if let Some(world) = world_gazetteer {
        let ratio = notable_ratio(world, locations).await?;
        return Ok(classify_notable_ratio(ratio));
    }

    Ok(GeoType::Fantasy)
}

/// Chinese administrative/geographic suffixes stripped as the last-resort
/// name-resolution tier.
const STRIPPABLE_SUFFIXES: [&str; 12] = ["城", "府", "州", "县", "镇", "村", "山", "河", "湖", "郡", "关", "岛"];

/// Strip one recognized administrative/geographic suffix from `name`,
/// returning the stem if one matched and the stem is non-empty.
#[must_use]
fn strip_known_suffix(name: &str) -> Option<&str> {
    for suffix in STRIPPABLE_SUFFIXES {
        if let Some(stem) = name.strip_suffix(suffix) {
            if !stem.is_empty() {
                return Some(stem);
            }
        }
    }
    None
}

/// Great-circle distance in kilometers between two `(lat, lng)` points
/// (haversine formula), used by the two-pass parent-proximity validation
///.
#[must_use]
fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Maximum distance a suffix-stripped match may sit from its hierarchy
/// parent before it's discarded as implausible.
const MAX_PARENT_DISTANCE_KM: f64 = 1_000.0;

/// Pick the best candidate among ambiguous suffix-stripped matches: higher
/// population first, then a county-level-or-above admin code as a
/// tiebreak.
#[must_use]
fn pick_best_candidate(candidates: Vec<GazetteerMatch>) -> Option<GazetteerMatch> {
    candidates.into_iter().max_by(|a, b| {
            a.population
            .unwrap_or(0)
            .cmp(&b.population.unwrap_or(0))
            .then_with(|| a.is_notable().cmp(&b.is_notable()))
    })
}

/// Resolve one location name to a gazetteer hit through the four-tiered
/// lookup: curated supplement, zh-alias index (world dataset),
/// exact match, then suffix-stripped match validated against the parent's
/// coordinates if one is known.
pub async fn resolve_location_name(
    name: &str,
    parent_coords: Option<(f64, f64)>,
    curated_supplement: &HashMap<String, GazetteerMatch>,
    zh_alias_index: &HashMap<String, String>,
    gazetteer: &dyn GeoGazetteer,
) -> Result<Option<GazetteerMatch>> {
    if let Some(hit) = curated_supplement.get(name) {
        return Ok(Some(hit.clone()));
    }

    if let Some(canonical) = zh_alias_index.get(name) {
        if let Some(hit) = pick_best_candidate(gazetteer.lookup(canonical).await?) {
            return Ok(Some(hit));
        }
    }

    if let Some(hit) = pick_best_candidate(gazetteer.lookup(name).await?) {
        return Ok(Some(hit));
    }

    let Some(stem) = strip_known_suffix(name) else { return Ok(None) };
    let Some(candidate) = pick_best_candidate(gazetteer.lookup(stem).await?) else { return Ok(None) };

    if let Some(parent) = parent_coords {
        let distance = haversine_km(parent, (candidate.lat, candidate.lng));
        if distance > MAX_PARENT_DISTANCE_KM {
            return Ok(None);
        }
    }
    Ok(Some(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedGazetteer {
        hits: HashMap<&'static str, Vec<GazetteerMatch>>,
    }

    #[async_trait]
    impl GeoGazetteer for FixedGazetteer {
        async fn lookup(&self, name: &str) -> Result<Vec<GazetteerMatch>> {
            Ok(self.hits.get(name).cloned().unwrap_or_default())
        }
    }

    fn notable_hit(lat: f64, lng: f64, population: u64) -> GazetteerMatch {
        GazetteerMatch { lat, lng, admin_code: None, population: Some(population), sources: vec!["test".into()] }
    }

    #[test]
    fn geo_scope_short_circuits_to_none_for_fantasy_genre() {
        let locations = vec!["花果山".to_string()];
        assert_eq!(detect_geo_scope(GenreHint::Fantasy, &locations), GeoScope::None);
        assert_eq!(detect_geo_scope(GenreHint::Xianxia, &locations), GeoScope::None);
    }

    #[test]
    fn geo_scope_prefers_cn_dataset_for_cjk_dominant_names() {
        let locations = vec!["长安城".to_string(), "洛阳".to_string()];
        assert_eq!(detect_geo_scope(GenreHint::Unknown, &locations), GeoScope::Cn);
    }

    #[test]
    fn geo_scope_prefers_world_dataset_for_latin_names() {
        let locations = vec!["Paris".to_string(), "London".to_string()];
        assert_eq!(detect_geo_scope(GenreHint::Unknown, &locations), GeoScope::World);
    }

    #[tokio::test]
    async fn fantasy_genre_short_circuits_geo_type_without_any_lookup() {
        let gazetteer = FixedGazetteer { hits: HashMap::new() };
        let geo_type =
        detect_geo_type(Some(&gazetteer), None, GenreHint::Xianxia, &["花果山".to_string()]).await.unwrap();
        assert_eq!(geo_type, GeoType::Fantasy);
    }

    #[tokio::test]
    async fn high_notable_ratio_classifies_as_realistic() {
        let mut hits = HashMap::new();
        hits.insert("西安", vec![notable_hit(34.3, 108.9, 1_000_000)]);
        hits.insert("北京", vec![notable_hit(39.9, 116.4, 2_000_000)]);
        let gazetteer = FixedGazetteer { hits };
        let locations = vec!["西安".to_string(), "北京".to_string()];
        let geo_type = detect_geo_type(Some(&gazetteer), None, GenreHint::Unknown, &locations).await.unwrap();
        assert_eq!(geo_type, GeoType::Realistic);
    }

    #[tokio::test]
    async fn low_notable_ratio_falls_through_to_world_dataset() {
        let cn = FixedGazetteer { hits: HashMap::new() };
        let mut world_hits = HashMap::new();
        world_hits.insert("长安", vec![notable_hit(34.3, 108.9, 500_000)]);
        let world = FixedGazetteer { hits: world_hits };
        let locations = vec!["长安".to_string()];
        let geo_type = detect_geo_type(Some(&cn), Some(&world), GenreHint::Unknown, &locations).await.unwrap();
        assert_eq!(geo_type, GeoType::Realistic);
    }

    #[tokio::test]
    async fn no_gazetteer_matches_at_all_is_fantasy() {
        let gazetteer = FixedGazetteer { hits: HashMap::new() };
        let locations = vec!["花果山".to_string(), "水帘洞".to_string()];
        let geo_type = detect_geo_type(Some(&gazetteer), None, GenreHint::Unknown, &locations).await.unwrap();
        assert_eq!(geo_type, GeoType::Fantasy);
    }

    #[tokio::test]
    async fn curated_supplement_short_circuits_resolution() {
        let gazetteer = FixedGazetteer { hits: HashMap::new() };
        let mut curated = HashMap::new();
        curated.insert("花果山".to_string(), notable_hit(18.3, 109.5, 0));
        let resolved = resolve_location_name("花果山", None, &curated, &HashMap::new(), &gazetteer).await.unwrap();
        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn exact_match_is_preferred_over_suffix_stripping() {
        let mut hits = HashMap::new();
        hits.insert("长安城", vec![notable_hit(34.3, 108.9, 900_000)]);
        hits.insert("长安", vec![notable_hit(0.0, 0.0, 1)]);
        let gazetteer = FixedGazetteer { hits };
        let resolved =
        resolve_location_name("长安城", None, &HashMap::new(), &HashMap::new(), &gazetteer).await.unwrap().unwrap();
        assert_eq!(resolved.population, Some(900_000));
    }

    #[tokio::test]
    async fn suffix_stripped_match_too_far_from_parent_is_discarded() {
        let mut hits = HashMap::new();
        // "长安城" has no exact entry; "长安" (stripped) resolves somewhere
        // far from the supplied parent coordinates.
        hits.insert("长安", vec![notable_hit(51.5, -0.1, 1_000_000)]);
        let gazetteer = FixedGazetteer { hits };
        let parent_coords = Some((34.3, 108.9));
        let resolved =
        resolve_location_name("长安城", parent_coords, &HashMap::new(), &HashMap::new(), &gazetteer)
        .await
        .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn suffix_stripped_match_near_parent_is_kept() {
        let mut hits = HashMap::new();
        hits.insert("长安", vec![notable_hit(34.3, 108.9, 1_000_000)]);
        let gazetteer = FixedGazetteer { hits };
        let parent_coords = Some((34.0, 108.0));
        let resolved =
        resolve_location_name("长安城", parent_coords, &HashMap::new(), &HashMap::new(), &gazetteer)
        .await
        .unwrap();
        assert!(resolved.is_some());
    }

    #[test]
    fn haversine_distance_is_zero_for_identical_points() {
        assert_eq!(haversine_km((34.3, 108.9), (34.3, 108.9)), 0.0);
    }
}
