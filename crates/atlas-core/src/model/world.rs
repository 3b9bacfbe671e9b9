//! The multi-region world structure, built on top of a
//! [`LocationHierarchy`] with layers, portals, regions, and tiers.

use super::hierarchy::LocationHierarchy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The overall geographic nature of the novel's world, detected from
/// gazetteer match rate and cached independently of hierarchy
/// changes — it is a property of the novel, not of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoType {
    /// >= 20% of matchable locations are notable real-world gazetteer hits.
    Realistic,
    /// >= 5% but < 20%.
    Mixed,
    /// < 5%, or the genre hint short-circuited here.
    Fantasy,
}

/// One renderable layer of the map (e.g. an overworld layer and a
/// dungeon/cave layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLayer {
    /// Stable layer identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Locations belonging to this layer.
    pub locations: Vec<String>,
}

/// A named passage between two locations that isn't a normal hierarchy
/// parent/child edge (a teleportation array, a hidden tunnel).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portal {
    /// The portal's origin location.
    pub from: String,
    /// The portal's destination location.
    pub to: String,
    /// Free-text description.
    pub description: String,
}

/// A coarse geographic-scale classification for a location, independent of
/// the fine-grained suffix rank — used by the Consolidator's
/// tiered catch-all and the dominant-intermediate match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierClass {
    /// The uber-root itself (天下, 地球).
    Realm,
    /// Nation/kingdom/continent scale (suffix rank 1-2).
    Nation,
    /// City scale (suffix rank 3-4).
    City,
    /// Building/landmark scale (suffix rank 5-6).
    Landmark,
    /// Anything smaller still (suffix rank 7+, or unrankable).
    Site,
}

impl TierClass {
    /// Classify from a suffix rank (lower rank = larger scale), per the
    /// tier table referenced by spec §4.10/§4.11.
    #[must_use]
    pub fn from_suffix_rank(rank: u32) -> Self {
        match rank {
            0 => TierClass::Realm,
            1..=2 => TierClass::Nation,
            3..=4 => TierClass::City,
            5..=6 => TierClass::Landmark,
            _ => TierClass::Site,
        }
    }
}

/// Accumulated evidence for a single `(child, candidate_parent)` pair
///.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteWeight(pub f64);

impl VoteWeight {
    /// Add more weight to this vote.
    pub fn add(&mut self, amount: f64) {
        self.0 += amount;
    }
}

/// The full `(child, candidate_parent) -> accumulated weight` vote table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentVotes {
    votes: HashMap<(String, String), VoteWeight>,
}

impl ParentVotes {
    /// An empty vote table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cast (or accumulate) `amount` of weight for `child -> parent`.
    pub fn cast(&mut self, child: impl Into<String>, parent: impl Into<String>, amount: f64) {
        self.votes
        .entry((child.into(), parent.into()))
        .or_default()
        .add(amount);
    }

    /// All candidate parents and their accumulated weight for `child`.
    #[must_use]
    pub fn candidates_for(&self, child: &str) -> Vec<(&str, f64)> {
        self.votes
        .iter()
        .filter(|((c, _), _)| c == child)
        .map(|((_, p), w)| (p.as_str(), w.0))
        .collect()
    }

    /// The winning parent for `child`: highest weight, ties broken first by
    /// weight descending (already guaranteed by max-by), then alphabetical
    ///.
    #[must_use]
    pub fn winner_for(&self, child: &str) -> Option<(String, f64)> {
        self.candidates_for(child)
        .into_iter()
        .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0))
        })
        .map(|(p, w)| (p.to_string(), w))
    }

    /// Raw weight for one specific `(child, parent)` pair.
    #[must_use]
    pub fn weight_of(&self, child: &str, parent: &str) -> f64 {
        self.votes
        .get(&(child.to_string(), parent.to_string()))
        .map_or(0.0, |w| w.0)
    }

    /// Every distinct child with at least one vote.
    #[must_use]
    pub fn children(&self) -> std::collections::BTreeSet<&str> {
        self.votes.keys().map(|(c, _)| c.as_str()).collect()
    }

    /// Every `(child, parent, weight)` triple in the table, for folding
    /// one vote table's evidence into another (e.g. the macro-skeleton
    /// call's proposed votes into the live rebuild table).
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.votes.iter().map(|((c, p), w)| (c.as_str(), p.as_str(), w.0))
    }
}

/// `{layers, portals, location_region_map, location_parents, location_tiers,
/// location_layer_map, geo_type, parent_votes, uber_root}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldStructure {
    /// Renderable map layers.
    pub layers: Vec<MapLayer>,
    /// Named non-hierarchy passages.
    pub portals: Vec<Portal>,
    /// Which geopolitical region each location belongs to.
    pub location_region_map: HashMap<String, String>,
    /// The location hierarchy (owned exclusively by the World Structure
    /// Agent, spec §3 "Ownership").
    pub location_parents: LocationHierarchy,
    /// Coarse tier classification per location.
    pub location_tiers: HashMap<String, TierClass>,
    /// Which render layer each location belongs to.
    pub location_layer_map: HashMap<String, String>,
    /// Detected geographic nature, if determined yet.
    pub geo_type: Option<GeoType>,
    /// Accumulated parent-vote evidence, kept live across chapters.
    pub parent_votes: ParentVotes,
    /// The synthetic top-level root name (天下, 地球,...).
    pub uber_root: String,
}

impl WorldStructure {
    /// A fresh structure for a novel, with the given uber-root name.
    #[must_use]
    pub fn new(uber_root: impl Into<String>) -> Self {
        Self {
            uber_root: uber_root.into(),
            ..Default::default()
        }
    }

    /// Direct children of the uber-root with at least `min_descendants`
    /// descendants — the "macro hub" definition from spec §4.6/Glossary.
    #[must_use]
    pub fn macro_hubs(&self, min_descendants: usize) -> Vec<(String, usize)> {
        let mut hubs: Vec<(String, usize)> = self
        .location_parents
        .direct_children_of(&self.uber_root)
        .into_iter()
        .map(|child| (child.to_string(), self.count_descendants(child)))
        .filter(|(_, count)| *count >= min_descendants)
        .collect();
        hubs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hubs
    }

    /// Total descendant count of `name` in the current hierarchy.
    #[must_use]
    pub fn count_descendants(&self, name: &str) -> usize {
        let mut count = 0;
        let mut frontier = vec![name.to_string()];
        let mut seen = std::collections::HashSet::new();
        seen.insert(name.to_string());
        while let Some(node) = frontier.pop() {
            for child in self.location_parents.direct_children_of(&node) {
                if seen.insert(child.to_string()) {
                    count += 1;
                    frontier.push(child.to_string());
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_hubs_require_minimum_descendants() {
        let mut ws = WorldStructure::new("天下");
        ws.location_parents.set_parent("东胜神州", "天下");
        ws.location_parents.set_parent("花果山", "东胜神州");
        ws.location_parents.set_parent("水帘洞", "花果山");
        ws.location_parents.set_parent("傲来国", "东胜神州");

        let hubs = ws.macro_hubs(2);
        assert_eq!(hubs.len(), 1);
        assert_eq!(hubs[0].0, "东胜神州");
        assert_eq!(hubs[0].1, 3);
    }

    #[test]
    fn parent_votes_winner_picks_highest_weight() {
        let mut votes = ParentVotes::new();
        votes.cast("夹道", "荣国府", 1.0);
        votes.cast("夹道", "大观园", 3.0);
        let (winner, weight) = votes.winner_for("夹道").unwrap();
        assert_eq!(winner, "大观园");
        assert_eq!(weight, 3.0);
    }

    #[test]
    fn tier_class_from_suffix_rank() {
        assert_eq!(TierClass::from_suffix_rank(1), TierClass::Nation);
        assert_eq!(TierClass::from_suffix_rank(3), TierClass::City);
        assert_eq!(TierClass::from_suffix_rank(9), TierClass::Site);
    }
}
