//! The Location Hierarchy Engine's parent-voting algorithm:
//! accumulates `(child, candidate_parent)` evidence from chapter facts and
//! resolves it into a single acyclic `LocationHierarchy`.

use crate::model::{ChapterFact, Confidence, LocationRole, ParentVotes, RelationType, TierClass, WorldStructure};
use crate::storage::{MapUserOverride, WorldStructureOverride};
use crate::suffix;
use std::collections::{HashMap, HashSet};

/// Weight a single `contains` spatial relationship casts, by confidence
///.
fn contains_weight(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::High => 2.0,
        Confidence::Medium | Confidence::Low => 1.0,
    }
}

/// Weight of one chapter primary-setting co-occurrence (spec §4.10 "cast
/// +2 for `(orphan -> primary)`").
const PRIMARY_SETTING_WEIGHT: f64 = 2.0;

/// Weight baseline-injected for an existing `location_parents` edge before
/// a rebuild folds in fresh chapter evidence.
const REBUILD_BASELINE_WEIGHT: f64 = 2.0;

/// Minimum accumulated votes a micro-location-pattern name needs before it
/// participates in direction validation and cycle detection.
const MIN_MICRO_VOTES: f64 = 3.0;

/// Name-fragment patterns that mark a location as a micro-location too
/// granular for its own direction-validated slot in the hierarchy (spec
/// §4.10 step 4 `_is_sub_location_name`; examples given in spec are "门外,
/// 墙下, 粪窖边").
const SUB_LOCATION_PATTERNS: [&str; 7] = ["门外", "墙下", "窖边", "床边", "桌旁", "井边", "灶台"];

/// Whether `name` matches a sub-location pattern.
#[must_use]
fn is_sub_location_name(name: &str) -> bool {
    SUB_LOCATION_PATTERNS.iter().any(|p| name.contains(p))
}

/// Cast explicit `locations[].parent` mentions for one chapter fact.
fn cast_explicit_parent_mentions(votes: &mut ParentVotes, fact: &ChapterFact) {
    for location in &fact.locations {
        if let Some(parent) = &location.parent {
            if parent != &location.name {
                votes.cast(location.name.clone(), parent.clone(), 1.0);
            }
        }
    }
}

/// Cast `contains` spatial-relationship votes for one chapter fact.
fn cast_contains_relationships(votes: &mut ParentVotes, fact: &ChapterFact) {
    for relation in &fact.spatial_relationships {
        if relation.relation_type == RelationType::Contains && relation.source != relation.target {
            votes.cast(relation.target.clone(), relation.source.clone(), contains_weight(relation.confidence));
        }
    }
}

/// The chapter's primary setting: the `role = setting` location with the
/// largest geographic scale (lowest suffix rank), falling back to the
/// first non-generic (named) location in the chapter.
fn primary_setting(fact: &ChapterFact) -> Option<&str> {
    let settings: Vec<&str> = fact
    .locations
    .iter()
    .filter(|l| l.role == Some(LocationRole::Setting))
    .map(|l| l.name.as_str())
    .collect();

    if let Some(name) = settings
    .iter()
    .copied()
    .min_by_key(|name| suffix::suffix_rank(name).unwrap_or(u32::MAX))
    {
        return Some(name);
    }

    fact.locations.first().map(|l| l.name.as_str())
}

/// Cast primary-setting co-occurrence votes: every orphan location in the
/// chapter that is smaller than the primary setting (by suffix rank) and
/// not `referenced`/`boundary` votes toward the primary.
fn cast_primary_setting_votes(votes: &mut ParentVotes, fact: &ChapterFact) {
    let Some(primary) = primary_setting(fact) else { return };
    let primary_rank = suffix::suffix_rank(primary).unwrap_or(u32::MAX);

    for location in &fact.locations {
        if location.name == primary {
            continue;
        }
        if matches!(location.role, Some(LocationRole::Referenced) | Some(LocationRole::Boundary)) {
            continue;
        }
        let rank = suffix::suffix_rank(&location.name).unwrap_or(u32::MAX);
        if rank > primary_rank {
            votes.cast(location.name.clone(), primary.to_string(), PRIMARY_SETTING_WEIGHT);
        }
    }
}

/// Fold one chapter fact's evidence into the live vote table.
pub fn accumulate_chapter_votes(votes: &mut ParentVotes, fact: &ChapterFact) {
    cast_explicit_parent_mentions(votes, fact);
    cast_contains_relationships(votes, fact);
    cast_primary_setting_votes(votes, fact);
}

/// Weight cast for one scene-transition inference (rebuild stage
/// "scene-transition analysis", spec §4.11).
const SCENE_TRANSITION_WEIGHT: f64 = 1.0;

/// Infer additional parent-vote evidence from characters moving between
/// chapters: when a character's prior chapter placed them at a location
/// that already has a winning parent, and this chapter moves them
/// somewhere new, cast a vote for the new location under that same
/// parent — consecutive scenes tend to stay within one region even when
/// no `contains` relationship or explicit parent mention says so.
/// `facts` must already be in ascending `chapter_num` order (spec §5
/// "Ordering guarantees").
pub fn cast_scene_transition_votes(votes: &mut ParentVotes, facts: &[ChapterFact]) {
    let mut last_location: HashMap<String, String> = HashMap::new();
    for fact in facts {
        for character in &fact.characters {
            let Some(current) = character.locations_in_chapter.first() else { continue };
            if let Some(previous) = last_location.get(&character.name) {
                if previous != current {
                    if let Some((parent, _)) = votes.winner_for(previous) {
                        if parent != *current {
                            votes.cast(current.clone(), parent, SCENE_TRANSITION_WEIGHT);
                        }
                    }
                }
            }
            last_location.insert(character.name.clone(), current.clone());
        }
    }
}

/// Inject the existing `location_parents` hierarchy as baseline votes
/// before folding in fresh chapter evidence, so a rebuild with sparse
/// facts can't wipe out a well-established hierarchy.
pub fn rebuild_parent_votes(world: &mut WorldStructure, facts: &[ChapterFact]) {
    let mut votes = ParentVotes::new();
    for (child, parent) in world.location_parents.edges() {
        votes.cast(child.clone(), parent.clone(), REBUILD_BASELINE_WEIGHT);
    }
    for fact in facts {
        accumulate_chapter_votes(&mut votes, fact);
    }
    world.parent_votes = votes;
}

/// Force `child`'s resolved parent to `parent`, overriding any vote
/// outcome.
pub fn apply_user_overrides(resolved: &mut HashMap<String, String>, overrides: &[WorldStructureOverride]) {
    for entry in overrides {
        if entry.override_type == crate::storage::OverrideType::LocationParent {
            resolved.insert(entry.override_key.clone(), entry.value.clone());
        }
    }
}

/// Whether `locked_parent` should still be treated as pinned for
/// `location` given its current `map_user_overrides` record.
#[must_use]
pub fn is_locked_by_map_override(location: &str, overrides: &HashMap<String, MapUserOverride>) -> bool {
    overrides
    .get(location)
    .is_some_and(|o| o.constraint_type == crate::storage::MapConstraintType::Locked)
}

/// Phase 1: `argmax` over each child's candidate parents, ties broken by
/// descending weight then alphabetically (already implemented by
/// [`ParentVotes::winner_for`]).
fn compute_winners(votes: &ParentVotes) -> HashMap<String, (String, f64)> {
    votes
    .children()
    .into_iter()
    .filter_map(|child| votes.winner_for(child).map(|w| (child.to_string(), w)))
    .collect()
}

/// Whether suffix-rank evidence requires flipping a proposed `child ->
/// parent` edge: the parent must have the strictly lower (larger-scale)
/// rank whenever both endpoints have a recognizable suffix.
fn suffix_direction_conflicts(child: &str, parent: &str) -> bool {
    match (suffix::suffix_rank(child), suffix::suffix_rank(parent)) {
        // Equal ranks are a tie, not a conflict — same-suffix sibling
        // promotion (phase 3) handles those instead of direction flipping.
        (Some(child_rank), Some(parent_rank)) => parent_rank > child_rank,
        _ => false,
    }
}

/// Phase 2: bidirectional-conflict / sibling detection. If both `A -> B`
/// and `B -> A` have comparable weight (ratio < 2:1) and either share a
/// suffix rank or both are unranked, treat them as siblings and look for
/// a common parent.
fn resolve_bidirectional_conflicts(votes: &ParentVotes, winners: &mut HashMap<String, (String, f64)>) {
    let pairs: Vec<(String, String)> = winners
    .iter()
    .filter_map(|(child, (parent, _))| {
            if child < parent {
                Some((child.clone(), parent.clone()))
            } else {
                None
            }
    })
    .collect();

    for (a, b) in pairs {
        let forward = votes.weight_of(&a, &b);
        let backward = votes.weight_of(&b, &a);
        if forward <= 0.0 || backward <= 0.0 {
            continue;
        }
        let ratio = forward.max(backward) / forward.min(backward);
        let same_rank_or_unknown = match (suffix::suffix_rank(&a), suffix::suffix_rank(&b)) {
            (Some(ra), Some(rb)) => ra == rb,
            (None, None) => true,
            _ => false,
        };
        if ratio < 2.0 && same_rank_or_unknown {
            if let Some(common) = find_common_parent(votes, winners, &a, &b) {
                winners.insert(a.clone(), (common.clone(), votes.weight_of(&a, &common)));
                winners.insert(b.clone(), (common, votes.weight_of(&b, &a)));
            }
        }
    }
}

/// Search both candidates' vote lists for a shared third-party parent
/// (preferred), falling back to the highest-voted non-sibling parent of
/// either.
fn find_common_parent(
    votes: &ParentVotes,
    winners: &HashMap<String, (String, f64)>,
    a: &str,
    b: &str,
) -> Option<String> {
    let a_candidates: HashSet<&str> = votes.candidates_for(a).into_iter().map(|(p, _)| p).collect();
    let b_candidates: HashMap<&str, f64> = votes.candidates_for(b).into_iter().collect();

    let mut shared: Vec<(&str, f64)> = a_candidates
    .iter()
    .filter(|p| **p != a && **p != b)
    .filter_map(|p| b_candidates.get(p).map(|w| (*p, *w)))
    .collect();
    shared.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| x.0.cmp(y.0)));
    if let Some((parent, _)) = shared.first() {
        return Some((*parent).to_string());
    }

    let mut fallback: Vec<(&str, f64)> = votes
    .candidates_for(a)
    .into_iter()
    .chain(votes.candidates_for(b))
    .filter(|(p, _)| *p != a && *p != b)
    .collect();
    fallback.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| x.0.cmp(y.0)));
    fallback.first().map(|(p, _)| (*p).to_string()).or_else(|| winners.get(a).map(|(p, _)| p.clone()))
}

/// Phase 3: same-suffix sibling promotion, post-direction-validation. For
/// any single-direction edge between two names sharing a
/// sibling-candidate suffix, re-run [`find_common_parent`]; keep the
/// original edge if no common parent exists.
fn promote_same_suffix_siblings(votes: &ParentVotes, winners: &mut HashMap<String, (String, f64)>) {
    let edges: Vec<(String, String)> = winners.iter().map(|(c, (p, _))| (c.clone(), p.clone())).collect();
    for (child, parent) in edges {
        if !suffix::is_sibling_candidate_suffix(&child) || !suffix::is_sibling_candidate_suffix(&parent) {
            continue;
        }
        let child_suffix_rank = suffix::suffix_rank(&child);
        let parent_suffix_rank = suffix::suffix_rank(&parent);
        if child_suffix_rank.is_none() || child_suffix_rank != parent_suffix_rank {
            continue;
        }
        if let Some(common) = find_common_parent(votes, winners, &child, &parent) {
            if common != child && common != parent {
                winners.insert(child.clone(), (common, votes.weight_of(&child, &parent)));
            }
        }
    }
}

/// Flip any edge whose direction conflicts with suffix-rank evidence (spec
/// §4.10 "conflicting evidence is flipped"), skipping micro-location names
/// below [`MIN_MICRO_VOTES`] per step 4.
fn validate_direction(votes: &ParentVotes, winners: &mut HashMap<String, (String, f64)>) {
    let edges: Vec<(String, String, f64)> =
    winners.iter().map(|(c, (p, w))| (c.clone(), p.clone(), *w)).collect();

    for (child, parent, weight) in edges {
        if is_sub_location_name(&child) && weight < MIN_MICRO_VOTES {
            continue;
        }
        if suffix_direction_conflicts(&child, &parent) {
            let flipped_weight = votes.weight_of(&parent, &child);
            if flipped_weight > 0.0 {
                winners.insert(parent.clone(), (child.clone(), flipped_weight));
            }
            winners.remove(&child);
        }
    }
}

/// Phase 5: break the weakest-voted edge in every remaining cycle, never
/// touching micro-location names below [`MIN_MICRO_VOTES`].
fn break_resolved_cycles(winners: &mut HashMap<String, (String, f64)>) {
    loop {
        let mut path = Vec::new();
        let mut seen = HashSet::new();
        let cycle_start = winners.keys().find_map(|start| {
                path.clear();
                seen.clear();
                let mut current = start.clone();
                path.push(current.clone());
                seen.insert(current.clone());
                while let Some((parent, _)) = winners.get(&current) {
                    if seen.contains(parent) {
                        let pos = path.iter().position(|n| n == parent).unwrap();
                        return Some(path[pos..].to_vec());
                    }
                    path.push(parent.clone());
                    seen.insert(parent.clone());
                    current = parent.clone();
                }
                None
        });

        let Some(cycle) = cycle_start else { break };
        let weakest = cycle
        .iter()
        .filter(|n| !is_sub_location_name(n) || winners.get(*n).map_or(true, |(_, w)| *w >= MIN_MICRO_VOTES))
        .min_by(|a, b| {
                let wa = winners.get(*a).map_or(0.0, |(_, w)| *w);
                let wb = winners.get(*b).map_or(0.0, |(_, w)| *w);
                wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .or_else(|| cycle.first());
        if let Some(node) = weakest {
            winners.remove(node);
        } else {
            break;
        }
    }
}

/// Run the full `_resolve_parents` algorithm over
/// the current vote table, producing a resolved `child -> parent` map.
#[must_use]
pub fn resolve_parents(votes: &ParentVotes) -> HashMap<String, String> {
    let mut winners = compute_winners(votes);
    resolve_bidirectional_conflicts(votes, &mut winners);
    validate_direction(votes, &mut winners);
    promote_same_suffix_siblings(votes, &mut winners);
    break_resolved_cycles(&mut winners);
    winners.into_iter().map(|(c, (p, _))| (c, p)).collect()
}

/// Detect whether the resolved parent for `child` flipped between the
/// pre-rebuild and post-rebuild hierarchies, and whether that flip is
/// justified (clear suffix-rank or tier difference). Unjustified flips are
/// reverted.
#[must_use]
pub fn dampen_oscillation(
    child: &str,
    before: Option<&str>,
    after: &str,
    tiers: &HashMap<String, TierClass>,
) -> String {
    let Some(before) = before else { return after.to_string() };
    if before == after {
        return after.to_string();
    }

    let rank_before = suffix::suffix_rank(before);
    let rank_after = suffix::suffix_rank(after);
    if rank_before != rank_after {
        return after.to_string();
    }

    let tier_before = tiers.get(before).copied();
    let tier_after = tiers.get(after).copied();
    if tier_before != tier_after {
        return after.to_string();
    }

    before.to_string()
}

/// Apply a resolved parent map onto a [`WorldStructure`]'s hierarchy,
/// overwriting existing edges for every resolved child.
pub fn apply_resolution(world: &mut WorldStructure, resolved: HashMap<String, String>) {
    for (child, parent) in resolved {
        world.location_parents.set_parent(child, parent);
    }
}
