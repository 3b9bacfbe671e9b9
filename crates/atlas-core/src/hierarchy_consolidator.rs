//! The Hierarchy Consolidator & Reviewer: tier classification,
//! orphan resolution, macro-skeleton pre-generation, and LLM subtree
//! review, on top of the parent-voting algorithm in [`crate::world_structure`].

use crate::config::GenreHint;
use crate::error::{FailureKind, Result};
use crate::gateway::{CallOptions, LlmGateway, Message};
use crate::geo;
use crate::model::{ChapterFact, ParentVotes, TierClass, WorldStructure};
use crate::storage::GeoGazetteer;
use crate::suffix;
use crate::world_structure;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Per-subtree and macro-skeleton review timeout.
const SUBTREE_TIMEOUT: Duration = Duration::from_secs(45);
const MACRO_SKELETON_TIMEOUT: Duration = Duration::from_secs(45);

/// A subtree is reviewed independently once it has at least this many
/// nodes; smaller subtrees are batched together.
const SUBTREE_REVIEW_MIN_NODES: usize = 5;

/// Minimum descendant count the uber-root's direct child needs to qualify
/// as a "dominant intermediate" adopting site/building orphans (spec
/// §4.11 step 3b).
const DOMINANT_INTERMEDIATE_MIN_DESCENDANTS: usize = 3;

/// Step 0: break every cycle currently present in the hierarchy by
/// removing the weakest-voted edge along each one.
pub fn break_cycles(world: &mut WorldStructure) {
    while let Some(cycle) = world.location_parents.find_one_cycle() {
        let weakest = cycle
        .iter()
        .min_by(|(ca, pa), (cb, pb)| {
                let wa = world.parent_votes.weight_of(ca, pa);
                let wb = world.parent_votes.weight_of(cb, pb);
                wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .cloned();
        match weakest {
            Some((child, _)) => world.location_parents.remove_parent(&child),
            None => break,
        }
    }
}

/// One LLM-suggested synonym merge: `alias` is the same location as
/// `canonical`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymMerge {
    /// The alias location being removed.
    pub alias: String,
    /// The canonical location `alias`'s children transfer to.
    pub canonical: String,
}

/// Step 0.5: apply LLM-provided synonym merges — transfer `alias`'s
/// children to `canonical` and delete `alias` from the hierarchy (spec
/// §4.11 step 0.5).
pub fn apply_synonym_merges(world: &mut WorldStructure, merges: &[SynonymMerge]) {
    for merge in merges {
        if merge.alias == merge.canonical {
            continue;
        }
        let children: Vec<String> = world
        .location_parents
        .direct_children_of(&merge.alias)
        .into_iter()
        .map(str::to_string)
        .collect();
        for child in children {
            world.location_parents.set_parent(child, merge.canonical.clone());
        }
        world.location_parents.remove_parent(&merge.alias);
        world.location_tiers.remove(&merge.alias);
    }
}

/// A fixed regex-shaped fallback for names the suffix table can't rank —
/// layer 2 of `_classify_tier`.
fn classify_tier_by_pattern(name: &str) -> Option<TierClass> {
    const NATION_MARKERS: [&str; 3] = ["王朝", "帝国", "联邦"];
    const CITY_MARKERS: [&str; 2] = ["首都", "省会"];
    if NATION_MARKERS.iter().any(|m| name.contains(m)) {
        Some(TierClass::Nation)
    } else if CITY_MARKERS.iter().any(|m| name.contains(m)) {
        Some(TierClass::City)
    } else {
        None
    }
}

/// `_classify_tier`: suffix table first, then regex-shaped patterns, then
/// an externally supplied LLM hint, defaulting to `Site`.
#[must_use]
pub fn classify_tier(name: &str, llm_hint: Option<TierClass>) -> TierClass {
    if let Some(rank) = suffix::suffix_rank(name) {
        return TierClass::from_suffix_rank(rank);
    }
    if let Some(tier) = classify_tier_by_pattern(name) {
        return tier;
    }
    llm_hint.unwrap_or(TierClass::Site)
}

/// Apply [`classify_tier`] to every known location not already classified,
/// seeding `world.location_tiers` for the remaining consolidation steps.
pub fn classify_all_tiers(world: &mut WorldStructure, llm_hints: &HashMap<String, TierClass>) {
    let names: HashSet<String> = world
    .location_parents
    .children_iter()
    .cloned()
    .chain(world.location_parents.edges().map(|(_, p)| p.clone()))
    .collect();
    for name in names {
        world
        .location_tiers
        .entry(name.clone())
        .or_insert_with(|| classify_tier(&name, llm_hints.get(&name).copied()));
    }
}

/// Step 2b: tier inversion fix. A child whose tier rank is numerically
/// *lower* (i.e. larger scale) than its parent's is mis-parented; detach
/// it so the tiered catch-all (step 3) can re-home it.
pub fn fix_tier_inversions(world: &mut WorldStructure) {
    let inverted: Vec<String> = world
    .location_parents
    .edges()
    .filter(|(child, parent)| {
            let child_tier = world.location_tiers.get(*child);
            let parent_tier = world.location_tiers.get(*parent);
            matches!((child_tier, parent_tier), (Some(c), Some(p)) if c < p)
    })
    .map(|(child, _)| child.clone())
    .collect();
    for child in inverted {
        world.location_parents.remove_parent(&child);
    }
}

/// Step 2c: noise-root rescue. A root (no parent) that is not the
/// uber-root and is below city scale is almost always extraction noise
/// rather than a genuine second top-level region; fold it under the
/// uber-root directly so it isn't silently lost, leaving the tiered
/// catch-all to potentially re-home it more precisely later.
pub fn rescue_noise_roots(world: &mut WorldStructure) {
    let uber_root = world.uber_root.clone();
    let roots: Vec<String> = world
    .location_parents
    .roots()
    .into_iter()
    .filter(|r| *r != uber_root)
    .map(str::to_string)
    .collect();
    for root in roots {
        if suffix::is_sub_city_scale(&root) {
            world.location_parents.set_parent(root, uber_root.clone());
        }
    }
}

/// Every known location name with no parent edge and not itself the
/// uber-root (the orphan set the tiered catch-all operates over).
fn orphans(world: &WorldStructure) -> Vec<String> {
    let uber_root = world.uber_root.clone();
    let all_names: HashSet<String> = world
    .location_parents
    .children_iter()
    .cloned()
    .chain(world.location_parents.edges().map(|(_, p)| p.clone()))
    .chain(world.location_tiers.keys().cloned())
    .collect();
    all_names
    .into_iter()
    .filter(|n| *n != uber_root && world.location_parents.parent_of(n).is_none())
    .collect()
}

/// Step 3a: prefix match — an orphan adopted by a known node whose name is
/// a prefix of the orphan's.
fn prefix_match_parent(world: &WorldStructure, orphan: &str) -> Option<String> {
    world
    .location_parents
    .children_iter()
    .chain(world.location_parents.edges().map(|(_, p)| p))
    .filter(|candidate| *candidate != orphan && orphan.starts_with(candidate.as_str()))
    .max_by_key(|candidate| candidate.chars().count())
    .cloned()
}

/// Step 3b: dominant-intermediate match. Site/building orphans (suffix
/// rank >= 5) are adopted by whichever direct child of the uber-root has
/// the most descendants, provided it has at least
/// [`DOMINANT_INTERMEDIATE_MIN_DESCENDANTS`].
fn dominant_intermediate_parent(world: &WorldStructure, orphan: &str) -> Option<String> {
    let rank = suffix::suffix_rank(orphan).unwrap_or(u32::MAX);
    if rank < 5 {
        return None;
    }
    world
    .macro_hubs(DOMINANT_INTERMEDIATE_MIN_DESCENDANTS)
    .into_iter()
    .max_by_key(|(_, count)| *count)
    .map(|(name, _)| name)
}

/// Step 3c: tier-gated uber-root fallback. Only city-level and above
/// (suffix rank <= 4) may fall through directly to the uber-root;
/// smaller orphans remain independent roots.
fn uber_root_fallback(world: &WorldStructure, orphan: &str) -> Option<String> {
    if suffix::is_sub_city_scale(orphan) {
        None
    } else {
        Some(world.uber_root.clone())
    }
}

/// Step 3: the tiered catch-all for every remaining orphan, trying 3a,
/// then 3b, then 3c in order; an orphan that matches none of the three
/// remains an independent root.
pub fn resolve_orphans(world: &mut WorldStructure) {
    for orphan in orphans(world) {
        let parent = prefix_match_parent(world, &orphan)
        .or_else(|| dominant_intermediate_parent(world, &orphan))
        .or_else(|| uber_root_fallback(world, &orphan));
        if let Some(parent) = parent {
            world.location_parents.set_parent(orphan, parent);
        }
    }
}

/// Run the full consolidation pipeline over a world structure that already
/// has votes resolved into `location_parents` (steps 0, 0.5, 1, 2b, 2c, 3
/// of spec §4.11; step 2a is the caller's `world_structure::resolve_parents`
/// pass, already applied before this runs).
pub fn consolidate(world: &mut WorldStructure, synonym_merges: &[SynonymMerge], llm_tier_hints: &HashMap<String, TierClass>) {
    break_cycles(world);
    apply_synonym_merges(world, synonym_merges);
    classify_all_tiers(world, llm_tier_hints);
    fix_tier_inversions(world);
    rescue_noise_roots(world);
    resolve_orphans(world);
    break_cycles(world);
}

/// One `{child, parent, confidence}` tuple the macro-skeleton LLM call
/// proposes.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MacroSkeletonTuple {
    /// The child location.
    pub child: String,
    /// The proposed parent.
    pub parent: String,
    /// `"high"` or `"medium"`, mapped to vote weight 5 or 3.
    pub confidence: String,
}

/// The macro-skeleton call's full parsed response.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MacroSkeletonResponse {
    /// Proposed `{child, parent, confidence}` tuples.
    #[serde(default)]
    pub tuples: Vec<MacroSkeletonTuple>,
    /// Optional proposed synonym merges.
    #[serde(default)]
    pub synonyms: Vec<SynonymMergeSuggestion>,
}

/// One LLM-proposed synonym pair, parsed directly from the macro-skeleton
/// response before being validated against the known-name set.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SynonymMergeSuggestion {
    /// The alias name.
    pub alias: String,
    /// The canonical name.
    pub canonical: String,
}

/// Vote weight for a macro-skeleton tuple's confidence label; unrecognized labels get no weight and are
/// dropped.
fn confidence_weight(confidence: &str) -> Option<f64> {
    match confidence {
        "high" => Some(5.0),
        "medium" => Some(3.0),
        _ => None,
    }
}

/// Build the macro-skeleton prompt payload: title, genre, uber-root
/// children, tier-grouped locations above city scale, and the orphan list
///.
fn macro_skeleton_prompt(world: &WorldStructure, title: &str, genre: &str) -> String {
    let children: Vec<&str> = world.location_parents.direct_children_of(&world.uber_root);
    let above_city: Vec<&str> = world
    .location_tiers
    .iter()
    .filter(|(_, tier)| **tier <= TierClass::City)
    .map(|(name, _)| name.as_str())
    .collect();
    let orphan_list = orphans(world);

    format!(
        "title: {title}\ngenre: {genre}\nuber_root_children: {children:?}\nlocations_above_city: {above_city:?}\norphans: {orphan_list:?}\nRespond as JSON: {{\"tuples\": [{{\"child\":...,\"parent\":...,\"confidence\":...}}], \"synonyms\": [{{\"alias\":...,\"canonical\":...}}]}}"
    )
}

/// Run the macro-skeleton pre-generation call, validating
/// every proposed tuple's names against the known-name set before
/// injecting its vote — "no hallucinated names". Times out gracefully
/// after [`MACRO_SKELETON_TIMEOUT`], logging a warning and returning no
/// votes rather than failing the caller.
pub async fn run_macro_skeleton(
    gateway: &dyn LlmGateway,
    world: &WorldStructure,
    title: &str,
    genre: &str,
) -> (ParentVotes, Vec<SynonymMerge>) {
    let known_names: HashSet<&str> = world
    .location_parents
    .children_iter()
    .map(String::as_str)
    .chain(world.location_parents.edges().map(|(_, p)| p.as_str()))
    .chain(world.location_tiers.keys().map(String::as_str))
    .collect();

    let prompt = macro_skeleton_prompt(world, title, genre);
    let messages = vec![Message::human(prompt)];
    let options = CallOptions { timeout: MACRO_SKELETON_TIMEOUT,..CallOptions::default() };

    let mut votes = ParentVotes::new();
    let mut merges = Vec::new();

    let call = tokio::time::timeout(MACRO_SKELETON_TIMEOUT, gateway.complete(&messages, &options)).await;
    let response = match call {
        Ok(Ok(result)) => serde_json::from_str::<MacroSkeletonResponse>(&result.content).ok(),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "macro skeleton call failed, skipping");
            None
        }
        Err(_) => {
            tracing::warn!("macro skeleton call timed out after {:?}, skipping", MACRO_SKELETON_TIMEOUT);
            None
        }
    };

    if let Some(response) = response {
        for tuple in response.tuples {
            if !known_names.contains(tuple.child.as_str()) || !known_names.contains(tuple.parent.as_str()) {
                continue;
            }
            if let Some(weight) = confidence_weight(&tuple.confidence) {
                votes.cast(tuple.child, tuple.parent, weight);
            }
        }
        for synonym in response.synonyms {
            if known_names.contains(synonym.alias.as_str()) && known_names.contains(synonym.canonical.as_str()) {
                merges.push(SynonymMerge { alias: synonym.alias, canonical: synonym.canonical });
            }
        }
    }

    (votes, merges)
}

/// One subtree rooted at a direct child of the uber-root, gathered by BFS
///.
#[derive(Debug, Clone)]
pub struct Subtree {
    /// The subtree's root (a direct child of the uber-root).
    pub root: String,
    /// Every node in the subtree, including the root.
    pub nodes: Vec<String>,
}

/// Split the hierarchy into one subtree per direct child of the uber-root
/// via BFS.
#[must_use]
pub fn split_into_subtrees(world: &WorldStructure) -> Vec<Subtree> {
    world
    .location_parents
    .direct_children_of(&world.uber_root)
    .into_iter()
    .map(|root| {
            let mut nodes = vec![root.to_string()];
            let mut frontier = vec![root.to_string()];
            while let Some(node) = frontier.pop() {
                for child in world.location_parents.direct_children_of(&node) {
                    nodes.push(child.to_string());
                    frontier.push(child.to_string());
                }
            }
            Subtree { root: root.to_string(), nodes }
    })
    .collect()
}

/// The outcome of reviewing one subtree (or batch of small subtrees): free
/// text notes from the LLM, or `None` if the call failed or timed out
/// (soft failure, spec §5 "All timeouts are soft").
pub type SubtreeReviewOutcome = Option<String>;

/// Cap the number of detail lines a subtree review prompt carries (spec
/// §4.11 "Each review prompt is capped at 30 detail lines").
const SUBTREE_PROMPT_LINE_CAP: usize = 30;

/// Build one subtree's review prompt, capped at
/// [`SUBTREE_PROMPT_LINE_CAP`] detail lines.
fn subtree_prompt(subtree: &Subtree) -> String {
    let lines: Vec<&str> = subtree.nodes.iter().map(String::as_str).take(SUBTREE_PROMPT_LINE_CAP).collect();
    format!("review subtree rooted at {}:\n{}", subtree.root, lines.join("\n"))
}

/// Review one subtree (or concatenated batch), soft-timing-out after
/// [`SUBTREE_TIMEOUT`].
async fn review_one(gateway: &dyn LlmGateway, prompt: String) -> SubtreeReviewOutcome {
    let messages = vec![Message::human(prompt)];
    let options = CallOptions { timeout: SUBTREE_TIMEOUT,..CallOptions::default() };
    match tokio::time::timeout(SUBTREE_TIMEOUT, gateway.complete(&messages, &options)).await {
        Ok(Ok(result)) => Some(result.content),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, kind = ?err.failure_kind(), "subtree review failed, skipping");
            if err.failure_kind() == FailureKind::Timeout {
                tracing::warn!("subtree review soft-timed-out");
            }
            None
        }
        Err(_) => {
            tracing::warn!("subtree review timed out after {:?}, skipping", SUBTREE_TIMEOUT);
            None
        }
    }
}

/// Run subtree review over every subtree: subtrees with at least
/// [`SUBTREE_REVIEW_MIN_NODES`] nodes get their own independent call;
/// smaller ones are batched into one combined prompt. Cloud gateways run
/// every independent call concurrently; local gateways run them
/// sequentially, each with its own timeout so one subtree's slowness never
/// affects another.
pub async fn review_subtrees(gateway: &dyn LlmGateway, subtrees: &[Subtree]) -> Vec<(String, SubtreeReviewOutcome)> {
    let (large, small): (Vec<&Subtree>, Vec<&Subtree>) =
    subtrees.iter().partition(|s| s.nodes.len() >= SUBTREE_REVIEW_MIN_NODES);

    let mut jobs: Vec<(String, String)> = large.iter().map(|s| (s.root.clone(), subtree_prompt(s))).collect();
    if !small.is_empty() {
        let batched_label = small.iter().map(|s| s.root.as_str()).collect::<Vec<_>>().join(",");
        let batched_prompt = small
        .iter()
        .map(|s| subtree_prompt(s))
        .collect::<Vec<_>>()
        .join("\n---\n");
        jobs.push((format!("batch:{batched_label}"), batched_prompt));
    }

    if gateway.is_cloud() {
        let futures = jobs.into_iter().map(|(label, prompt)| async move {
                let outcome = review_one(gateway, prompt).await;
                (label, outcome)
        });
        join_all(futures).await
    } else {
        let mut results = Vec::with_capacity(jobs.len());
        for (label, prompt) in jobs {
            let outcome = review_one(gateway, prompt).await;
            results.push((label, outcome));
        }
        results
    }
}

/// One entry in a `rebuild` diff: a location whose resolved parent changed
/// (or was newly assigned, or removed), with the default `auto_select`
/// state the caller's UI should pre-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyDiffEntry {
    /// The location whose parent changed.
    pub location: String,
    /// The parent before this rebuild, if any.
    pub old_parent: Option<String>,
    /// The parent proposed by this rebuild, if any (`None` means removed).
    pub new_parent: Option<String>,
    /// Whether a caller's UI should pre-select this entry for `apply`.
    pub auto_select: bool,
}

/// Whether `name` is known to be a location (vs. some other entity type) —
/// used to gate `auto_select` on "non-location parents".
fn looks_like_location_parent(name: &str, known_locations: &HashSet<String>) -> bool {
    known_locations.contains(name)
}

/// Compute a rebuild diff between the hierarchy's prior state and its
/// freshly resolved state, assigning each entry's `auto_select` default
///.
#[must_use]
pub fn compute_diff(
    before: &HashMap<String, String>,
    after: &HashMap<String, String>,
    known_locations: &HashSet<String>,
) -> Vec<HierarchyDiffEntry> {
    let mut locations: HashSet<&String> = before.keys().collect();
    locations.extend(after.keys());

    let mut diff = Vec::new();
    for location in locations {
        let old_parent = before.get(location).cloned();
        let new_parent = after.get(location).cloned();
        if old_parent == new_parent {
            continue;
        }

        let is_removal = new_parent.is_none();
        let is_name_containment = match (&old_parent, &new_parent) {
            (Some(old), Some(new)) => new.contains(location.as_str()) || location.contains(new.as_str()) ||
            old.contains(location.as_str()) || location.contains(old.as_str()),
            _ => false,
        };
        let is_non_location_parent = new_parent
        .as_ref()
        .is_some_and(|p| !looks_like_location_parent(p, known_locations));

        let auto_select = !is_removal && !is_name_containment && !is_non_location_parent;

        diff.push(HierarchyDiffEntry {
                location: location.clone(),
                old_parent,
                new_parent,
                auto_select,
        });
    }
    diff.sort_by(|a, b| a.location.cmp(&b.location));
    diff
}

/// `apply_hierarchy_changes`: persist only the user-selected entries of a
/// `rebuild_hierarchy` diff and clear `map_user_overrides` for every
/// affected location, except entries whose `constraint_type` is `locked`
/// (spec §6, §4.11 "apply").
pub fn apply_hierarchy_changes(
    world: &mut WorldStructure,
    diff: &[HierarchyDiffEntry],
    selected: &HashSet<String>,
    map_overrides: &mut HashMap<String, crate::storage::MapUserOverride>,
) {
    for entry in diff {
        if !selected.contains(&entry.location) {
            continue;
        }
        match &entry.new_parent {
            Some(parent) => world.location_parents.set_parent(entry.location.clone(), parent.clone()),
            None => world.location_parents.remove_parent(&entry.location),
        }
        let should_clear = map_overrides
        .get(&entry.location)
        .is_none_or(|o| o.constraint_type != crate::storage::MapConstraintType::Locked);
        if should_clear {
            map_overrides.remove(&entry.location);
        }
    }
}

/// One checkpoint `rebuild_hierarchy` reports through `on_progress` as it
/// moves through spec §4.11's rebuild sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStage {
    /// Re-detect the novel's geographic nature from the full known
    /// location set, since a rebuild may see locations no single chapter
    /// did.
    GenreRedetection,
    /// Re-seed the vote table from the existing hierarchy plus every
    /// chapter fact (`world_structure::rebuild_parent_votes`).
    VoteRebuild,
    /// Macro-skeleton pre-generation LLM call.
    MacroSkeleton,
    /// Infer additional votes from characters moving between locations
    /// across chapters.
    SceneTransitionAnalysis,
    /// Per-subtree (or batched) LLM review call.
    LlmReview,
    /// Re-resolve the vote table and dampen any unjustified flip against
    /// the pre-rebuild hierarchy.
    LlmValidation,
    /// Steps 0-3 of [`consolidate`].
    Consolidation,
}

/// The result of one `rebuild_hierarchy` run: the diff a caller presents
/// to the user, plus the free-text subtree review notes gathered along
/// the way.
#[derive(Debug, Clone, Default)]
pub struct RebuildOutcome {
    /// One entry per location whose resolved parent changed.
    pub diff: Vec<HierarchyDiffEntry>,
    /// `(subtree_root_or_batch_label, review_text)` pairs from the
    /// `LlmReview` stage.
    pub subtree_reviews: Vec<(String, SubtreeReviewOutcome)>,
}

/// Every name currently known to the hierarchy, gathered the same way
/// [`orphans`] and [`run_macro_skeleton`] do.
fn known_location_names(world: &WorldStructure) -> HashSet<String> {
    world
    .location_parents
    .children_iter()
    .cloned()
    .chain(world.location_parents.edges().map(|(_, p)| p.clone()))
    .chain(world.location_tiers.keys().cloned())
    .collect()
}

/// `rebuild_hierarchy`: the two-step rebuild API's first step (spec §6,
/// §4.11 "Two-step rebuild API"). Streams progress checkpoints through
/// `on_progress` as it moves genre re-detection -> vote rebuild -> macro
/// skeleton -> scene-transition analysis -> LLM review -> LLM validation
/// -> consolidation, then returns a diff of every changed `child ->
/// parent` edge without touching `world.location_parents` until
/// consolidation actually runs — a caller that wants to preview before
/// committing can diff `world` itself beforehand and after.
#[allow(clippy::too_many_arguments)]
pub async fn rebuild_hierarchy(
    gateway: &dyn LlmGateway,
    world: &mut WorldStructure,
    facts: &[ChapterFact],
    title: &str,
    genre: &str,
    genre_hint: GenreHint,
    cn_gazetteer: Option<&dyn GeoGazetteer>,
    world_gazetteer: Option<&dyn GeoGazetteer>,
    llm_tier_hints: &HashMap<String, TierClass>,
    mut on_progress: impl FnMut(RebuildStage),
) -> Result<RebuildOutcome> {
    let before: HashMap<String, String> =
    world.location_parents.edges().map(|(c, p)| (c.clone(), p.clone())).collect();

    on_progress(RebuildStage::GenreRedetection);
    let all_locations: Vec<String> = known_location_names(world).into_iter().collect();
    match geo::detect_geo_type(cn_gazetteer, world_gazetteer, genre_hint, &all_locations).await {
        Ok(geo_type) => world.geo_type = Some(geo_type),
        Err(err) => tracing::warn!(%err, "genre re-detection failed during rebuild, keeping prior geo_type"),
    }

    on_progress(RebuildStage::VoteRebuild);
    world_structure::rebuild_parent_votes(world, facts);

    on_progress(RebuildStage::MacroSkeleton);
    let (macro_votes, synonym_merges) = run_macro_skeleton(gateway, world, title, genre).await;
    for (child, parent, weight) in macro_votes.entries() {
        world.parent_votes.cast(child.to_string(), parent.to_string(), weight);
    }

    on_progress(RebuildStage::SceneTransitionAnalysis);
    world_structure::cast_scene_transition_votes(&mut world.parent_votes, facts);

    on_progress(RebuildStage::LlmReview);
    let subtrees = split_into_subtrees(world);
    let subtree_reviews = review_subtrees(gateway, &subtrees).await;

    on_progress(RebuildStage::LlmValidation);
    let resolved = world_structure::resolve_parents(&world.parent_votes);
    let mut validated = HashMap::with_capacity(resolved.len());
    for (child, after) in resolved {
        let damped = world_structure::dampen_oscillation(&child, before.get(&child).map(String::as_str), &after, &world.location_tiers);
        validated.insert(child, damped);
    }

    on_progress(RebuildStage::Consolidation);
    world_structure::apply_resolution(world, validated);
    consolidate(world, &synonym_merges, llm_tier_hints);

    let after: HashMap<String, String> =
    world.location_parents.edges().map(|(c, p)| (c.clone(), p.clone())).collect();
    let known_locations = known_location_names(world);
    let diff = compute_diff(&before, &after, &known_locations);

    Ok(RebuildOutcome { diff, subtree_reviews })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_tier_prefers_suffix_table() {
        assert_eq!(classify_tier("大唐国", None), TierClass::Nation);
    }

    #[test]
    fn classify_tier_falls_back_to_pattern_then_hint_then_site() {
        assert_eq!(classify_tier("中央帝国", None), TierClass::Nation);
        assert_eq!(classify_tier("无名之地", Some(TierClass::Landmark)), TierClass::Landmark);
        assert_eq!(classify_tier("无名之地", None), TierClass::Site);
    }

    #[test]
    fn break_cycles_removes_weakest_edge_until_acyclic() {
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("a", "b");
        world.location_parents.set_parent("b", "c");
        world.location_parents.set_parent("c", "a");
        world.parent_votes.cast("a", "b", 1.0);
        world.parent_votes.cast("b", "c", 5.0);
        world.parent_votes.cast("c", "a", 5.0);
        break_cycles(&mut world);
        assert!(world.location_parents.is_acyclic());
    }

    #[test]
    fn synonym_merge_transfers_children_and_deletes_alias() {
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("水帘洞", "花果山旧称");
        apply_synonym_merges(&mut world, &[SynonymMerge { alias: "花果山旧称".into(), canonical: "花果山".into() }]);
        assert_eq!(world.location_parents.parent_of("水帘洞"), Some("花果山"));
        assert!(world.location_parents.parent_of("花果山旧称").is_none());
    }

    #[test]
    fn tier_inversion_detaches_mis_parented_child() {
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("大唐国", "水帘洞");
        world.location_tiers.insert("大唐国".into(), TierClass::Nation);
        world.location_tiers.insert("水帘洞".into(), TierClass::Site);
        fix_tier_inversions(&mut world);
        assert!(world.location_parents.parent_of("大唐国").is_none());
    }

    #[test]
    fn sub_city_scale_orphan_never_falls_through_to_uber_root() {
        let world = WorldStructure::new("天下");
        assert!(uber_root_fallback(&world, "水帘洞").is_none());
        assert_eq!(uber_root_fallback(&world, "大唐国"), Some("天下".to_string()));
    }

    #[test]
    fn resolve_orphans_uses_prefix_match_before_dominant_intermediate() {
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("花果山", "东胜神州");
        world.location_tiers.insert("花果山水帘洞".into(), TierClass::Site);
        resolve_orphans(&mut world);
        assert_eq!(world.location_parents.parent_of("花果山水帘洞"), Some("花果山"));
    }

    #[test]
    fn compute_diff_marks_removal_as_not_auto_selected() {
        let mut before = HashMap::new();
        before.insert("水帘洞".to_string(), "花果山".to_string());
        let after = HashMap::new();
        let known = HashSet::new();
        let diff = compute_diff(&before, &after, &known);
        assert_eq!(diff.len(), 1);
        assert!(!diff[0].auto_select);
    }

    #[test]
    fn compute_diff_auto_selects_ordinary_reparent() {
        let mut before = HashMap::new();
        before.insert("水帘洞".to_string(), "花果山".to_string());
        let mut after = HashMap::new();
        after.insert("水帘洞".to_string(), "傲来国".to_string());
        let mut known = HashSet::new();
        known.insert("傲来国".to_string());
        let diff = compute_diff(&before, &after, &known);
        assert_eq!(diff.len(), 1);
        assert!(diff[0].auto_select);
    }

    #[test]
    fn split_into_subtrees_follows_uber_root_children() {
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("东胜神州", "天下");
        world.location_parents.set_parent("花果山", "东胜神州");
        let subtrees = split_into_subtrees(&world);
        assert_eq!(subtrees.len(), 1);
        assert_eq!(subtrees[0].root, "东胜神州");
        assert!(subtrees[0].nodes.contains(&"花果山".to_string()));
    }

    #[test]
    fn apply_hierarchy_changes_skips_unselected_entries_and_locked_overrides() {
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("水帘洞", "花果山");
        let diff = vec![
            HierarchyDiffEntry { location: "水帘洞".into(), old_parent: Some("花果山".into()), new_parent: Some("傲来国".into()), auto_select: true },
            HierarchyDiffEntry { location: "花果山".into(), old_parent: None, new_parent: Some("天下".into()), auto_select: true },
        ];
        let mut selected = HashSet::new();
        selected.insert("水帘洞".to_string());
        let mut overrides = HashMap::new();
        overrides.insert(
            "水帘洞".to_string(),
            crate::storage::MapUserOverride { x: 0.0, y: 0.0, constraint_type: crate::storage::MapConstraintType::Locked, locked_parent: None },
        );

        apply_hierarchy_changes(&mut world, &diff, &selected, &mut overrides);

        assert_eq!(world.location_parents.parent_of("水帘洞"), Some("傲来国"));
        assert!(world.location_parents.parent_of("花果山").is_none(), "unselected entry must not be applied");
        assert!(overrides.contains_key("水帘洞"), "locked override must survive apply");
    }

    #[tokio::test]
    async fn rebuild_hierarchy_streams_every_stage_and_returns_a_diff() {
        use atlas_testing::MockGateway;

        let gateway = MockGateway::new();
        let mut world = WorldStructure::new("天下");
        world.location_parents.set_parent("水帘洞", "花果山");
        world.parent_votes.cast("水帘洞", "花果山", 5.0);

        let mut chapter_one = ChapterFact::empty(1);
        chapter_one.locations.push(crate::model::LocationRecord { name: "花果山".into(), parent: Some("东胜神州".into()),..Default::default() });

        let mut stages = Vec::new();
        let outcome = rebuild_hierarchy(
            &gateway,
            &mut world,
            std::slice::from_ref(&chapter_one),
            "西游记",
            "神话",
            GenreHint::Fantasy,
            None,
            None,
            &HashMap::new(),
            |stage| stages.push(stage),
        )
        .await
        .unwrap();

        assert_eq!(
            stages,
            vec![
                RebuildStage::GenreRedetection,
                RebuildStage::VoteRebuild,
                RebuildStage::MacroSkeleton,
                RebuildStage::SceneTransitionAnalysis,
                RebuildStage::LlmReview,
                RebuildStage::LlmValidation,
                RebuildStage::Consolidation,
            ]
        );
        assert_eq!(world.geo_type, Some(crate::model::GeoType::Fantasy));
        assert!(world.location_parents.parent_of("花果山").is_some());
        assert!(outcome.diff.iter().any(|e| e.location == "花果山"));
    }

    // Property-based tests
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        // Short CJK-shaped names drawn from a small alphabet, so random
        // edge sets actually collide into cycles often enough to matter.
        fn location_name() -> impl Strategy<Value = String> {
            prop_oneof!["甲", "乙", "丙", "丁", "戊", "己", "庚"]
        }

        fn edge() -> impl Strategy<Value = (String, String, f64)> {
            (location_name(), location_name(), 0.1f64..10.0)
        }

        proptest! {
            /// Property: `break_cycles` always leaves an acyclic hierarchy,
            /// however tangled the input parent-vote edges are.
            #[test]
            fn prop_break_cycles_always_yields_acyclic_hierarchy(edges in proptest::collection::vec(edge(), 0..12)) {
                let mut world = WorldStructure::new("天下");
                for (child, parent, weight) in edges {
                    if child == parent {
                        continue;
                    }
                    world.parent_votes.cast(child.clone(), parent.clone(), weight);
                    world.location_parents.set_parent(child, parent);
                }
                break_cycles(&mut world);
                prop_assert!(world.location_parents.is_acyclic());
            }
        }
    }
}
