//! The Context Summary Builder: assembles the prior-context
//! block injected into every chapter's extraction prompt.

use crate::model::{ChapterFact, EntityDictionary, EntitySource, LocationRole, WorldStructure};
use crate::suffix::suffix_rank;
use atlas_budget::Budget;

/// Truncate `text` to at most `max_chars` characters, cutting at the last
/// newline boundary within the limit when one exists so a section never
/// ends mid-line.
fn truncate_preserving_structure(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind('\n') {
        Some(idx) if idx > 0 => cut[..idx].to_string(),
        _ => cut,
    }
}

/// Section 1: entity dictionary injection. Naming-source entries appear
/// first in a visually distinct block, then the remaining entries
/// frequency-sorted, capped by the sum of the per-type injection caps.
fn build_dictionary_section(dictionary: &EntityDictionary, budget: &Budget) -> String {
    let cap = budget.injection_caps.characters + budget.injection_caps.locations + budget.injection_caps.items;

    let mut naming_source: Vec<_> = dictionary
    .iter()
    .filter(|(_, entry)| entry.source == EntitySource::NamingPattern)
    .collect();
    naming_source.sort_by(|a, b| a.0.cmp(b.0));

    let mut lines = vec!["## 已知实体词典".to_string()];
    if !naming_source.is_empty() {
        lines.push("### 命名来源（高置信度）".to_string());
        for (name, entry) in &naming_source {
            lines.push(format!("- {name} ({:?})", entry.entity_type));
        }
    }

    lines.push("### 按频率排序".to_string());
    for (name, entry) in dictionary.sorted_by_frequency().into_iter().take(cap) {
        if entry.source == EntitySource::NamingPattern {
            continue;
        }
        lines.push(format!("- {name} ({:?}, freq={})", entry.entity_type, entry.frequency));
    }

    lines.join("\n")
}

/// Section 2: scene focus — the primary setting (largest suffix scale
/// among `role=setting` locations, falling back to the first non-generic
/// location) and its co-occurring locations from the most recent chapter
/// fact.
fn build_scene_focus_section(preceding_facts: &[ChapterFact]) -> String {
    let Some(last) = preceding_facts.last() else {
        return "## 场景焦点\n（暂无前情）".to_string();
    };

    let settings: Vec<&str> = last
    .locations
    .iter()
    .filter(|l| l.role == Some(LocationRole::Setting))
    .map(|l| l.name.as_str())
    .collect();

    let primary = settings
    .iter()
    .min_by_key(|name| suffix_rank(name).unwrap_or(u32::MAX))
    .copied()
    .or_else(|| last.locations.first().map(|l| l.name.as_str()));

    let Some(primary) = primary else {
        return "## 场景焦点\n（暂无场景）".to_string();
    };

    let co_occurring: Vec<&str> = last
    .locations
    .iter()
    .map(|l| l.name.as_str())
    .filter(|name| *name != primary)
    .collect();

    let mut lines = vec!["## 场景焦点".to_string(), format!("主场景：{primary}")];
    if !co_occurring.is_empty() {
        lines.push(format!("同场景地点：{}", co_occurring.join("、")));
    }
    lines.join("\n")
}

/// Section 3: macro hub anchoring — the uber-root's direct children with
/// at least 3 descendants, top `macro_hub_top_k` by descendant count, each
/// with up to 5 sub-children.
fn build_macro_hub_section(world: &WorldStructure, budget: &Budget) -> String {
    let hubs = world.macro_hubs(3);
    if hubs.is_empty() {
        return String::new();
    }

    let mut lines = vec!["## 主要区域".to_string()];
    for (hub, descendant_count) in hubs.into_iter().take(budget.macro_hub_top_k) {
        let mut sub_children = world.location_parents.direct_children_of(&hub);
        sub_children.sort_unstable();
        sub_children.truncate(5);
        lines.push(format!("- {hub}（{descendant_count} 个下级地点）：{}", sub_children.join("、")));
    }
    lines.join("\n")
}

/// Section 4: hierarchy chains, up to `hierarchy_chain_depth` deep.
fn build_hierarchy_chain_section(world: &WorldStructure, budget: &Budget) -> String {
    let mut children: Vec<&str> = world.location_parents.children_iter().map(String::as_str).collect();
    children.sort_unstable();

    let mut lines = vec!["## 层级关系".to_string()];
    for child in children {
        let chain = world.location_parents.ancestor_chain(child);
        let depth = budget.hierarchy_chain_depth.min(chain.len());
        if depth == 0 {
            continue;
        }
        let mut parts = vec![child.to_string()];
        parts.extend(chain.into_iter().take(depth));
        lines.push(format!("- {}", parts.join(" → ")));
    }
    if lines.len() == 1 {
        return String::new();
    }
    lines.join("\n")
}

/// Section 5: known locations sorted by mention frequency (not recency),
/// with the explicit coreference instruction.
fn build_known_locations_section(dictionary: &EntityDictionary) -> String {
    let mut locations: Vec<_> = dictionary
    .iter()
    .filter(|(_, entry)| entry.entity_type == crate::model::EntityType::Location)
    .collect();
    locations.sort_by(|a, b| b.1.frequency.cmp(&a.1.frequency).then_with(|| a.0.cmp(b.0)));

    if locations.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        "## 已知地点".to_string(),
        "提示：请将指代性表述（如“小城”“此地”）映射到下列规范名称。".to_string(),
    ];
    for (name, _) in locations {
        lines.push(format!("- {name}"));
    }
    lines.join("\n")
}

/// Section 6: world structure summary — region and layer names, capped at
/// a fraction of the overall context budget (the spec's `world_summary_chars`
/// is treated as one sixth of `context_max_chars` since no dedicated field
/// exists on [`Budget`]).
fn build_world_summary_section(world: &WorldStructure, budget: &Budget) -> String {
    if world.layers.is_empty() && world.location_region_map.is_empty() {
        return String::new();
    }
    let mut regions: Vec<&str> = world.location_region_map.values().map(String::as_str).collect();
    regions.sort_unstable();
    regions.dedup();

    let layer_names: Vec<&str> = world.layers.iter().map(|l| l.name.as_str()).collect();

    let mut lines = vec!["## 世界结构概览".to_string()];
    if !regions.is_empty() {
        lines.push(format!("区域：{}", regions.join("、")));
    }
    if !layer_names.is_empty() {
        lines.push(format!("图层：{}", layer_names.join("、")));
    }
    let section = lines.join("\n");
    truncate_preserving_structure(&section, budget.context_max_chars / 6)
}

/// Build the full context string injected ahead of a chapter's text
///. Dictionary injection happens unconditionally, even for
/// chapter 1 with no preceding facts.
#[must_use]
pub fn build(
    preceding_facts: &[ChapterFact],
    dictionary: &EntityDictionary,
    world: &WorldStructure,
    budget: &Budget,
) -> String {
    let sections = [
        build_dictionary_section(dictionary, budget),
        build_scene_focus_section(preceding_facts),
        build_macro_hub_section(world, budget),
        build_hierarchy_chain_section(world, budget),
        build_known_locations_section(dictionary),
        build_world_summary_section(world, budget),
    ];

    let per_section_cap = budget.context_max_chars / sections.len().max(1);
    sections
    .into_iter()
    .filter(|s| !s.is_empty())
    .map(|s| truncate_preserving_structure(&s, per_section_cap))
    .collect::<Vec<_>>()
    .join("\n\n")
}
