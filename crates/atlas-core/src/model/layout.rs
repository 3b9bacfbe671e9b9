//! The 2D map layout produced by the Map Layout Engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of spatial constraint an edge between two locations expresses
/// in the layout energy function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    /// `target` must sit inside `source`'s footprint.
    Containment,
    /// The two locations must sit close together, no particular direction.
    Adjacency,
    /// `target` must sit in a specific compass direction from `source`.
    Direction,
    /// The two locations must sit far apart.
    Separation,
}

/// One placed location in the layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutEntry {
    /// X coordinate in canvas units.
    pub x: f64,
    /// Y coordinate in canvas units.
    pub y: f64,
    /// Placement radius (footprint size), used for overlap checks.
    pub radius: f64,
}

/// Which algorithm produced a [`MapLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMode {
    /// Differential-evolution constraint solver, seeded by a force-directed
    /// layout.
    ConstraintSolver,
    /// Golden-angle sunflower-seed placement for locations the solver
    /// dropped due to the location-count cap.
    SunflowerOverflow,
}

/// A directed spatial constraint between two locations, feeding the layout
/// engine's energy function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConstraint {
    /// The constraint's subject location.
    pub source: String,
    /// The constraint's object location.
    pub target: String,
    /// What kind of constraint this is.
    pub constraint_type: ConstraintType,
    /// Relative importance, used to weight the energy function.
    pub weight: f64,
}

/// The full 2D placement of a novel's locations on the canvas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapLayout {
    /// Per-location placement.
    pub entries: HashMap<String, LayoutEntry>,
    /// Which mode placed each location (solver vs. overflow).
    pub modes: HashMap<String, LayoutMode>,
    /// Canvas width used for this layout.
    pub canvas_width: u32,
    /// Canvas height used for this layout.
    pub canvas_height: u32,
}

impl MapLayout {
    /// A layout for the given canvas dimensions, with no locations placed
    /// yet.
    #[must_use]
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            entries: HashMap::new(),
            modes: HashMap::new(),
            canvas_width,
            canvas_height,
        }
    }

    /// Record a placement for `name`.
    pub fn place(&mut self, name: impl Into<String>, entry: LayoutEntry, mode: LayoutMode) {
        let name = name.into();
        self.entries.insert(name.clone(), entry);
        self.modes.insert(name, mode);
    }

    /// Whether `name` has been placed.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Euclidean distance between two placed locations, if both exist.
    #[must_use]
    pub fn distance(&self, a: &str, b: &str) -> Option<f64> {
        let ea = self.entries.get(a)?;
        let eb = self.entries.get(b)?;
        Some(((ea.x - eb.x).powi(2) + (ea.y - eb.y).powi(2)).sqrt())
    }

    /// Whether any two placed locations overlap (their distance is less
    /// than the sum of their radii) — used by layout-quality tests.
    #[must_use]
    pub fn has_overlap(&self) -> bool {
        let entries: Vec<&LayoutEntry> = self.entries.values().collect();
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let a = entries[i];
                let b = entries[j];
                let dist = ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt();
                if dist < a.radius + b.radius {
                    return true;
                }
            }
        }
        false
    }

    /// Number of placed locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been placed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let mut layout = MapLayout::new(1600, 900);
        layout.place(
            "花果山",
            LayoutEntry { x: 0.0, y: 0.0, radius: 10.0 },
            LayoutMode::ConstraintSolver,
        );
        layout.place(
            "水帘洞",
            LayoutEntry { x: 3.0, y: 4.0, radius: 5.0 },
            LayoutMode::ConstraintSolver,
        );
        assert_eq!(layout.distance("花果山", "水帘洞"), Some(5.0));
    }

    #[test]
    fn detects_overlapping_placements() {
        let mut layout = MapLayout::new(1600, 900);
        layout.place(
            "a",
            LayoutEntry { x: 0.0, y: 0.0, radius: 10.0 },
            LayoutMode::ConstraintSolver,
        );
        layout.place(
            "b",
            LayoutEntry { x: 5.0, y: 0.0, radius: 10.0 },
            LayoutMode::SunflowerOverflow,
        );
        assert!(layout.has_overlap());
    }

    #[test]
    fn no_overlap_when_placements_are_well_spaced() {
        let mut layout = MapLayout::new(1600, 900);
        layout.place(
            "a",
            LayoutEntry { x: 0.0, y: 0.0, radius: 10.0 },
            LayoutMode::ConstraintSolver,
        );
        layout.place(
            "b",
            LayoutEntry { x: 100.0, y: 0.0, radius: 10.0 },
            LayoutMode::ConstraintSolver,
        );
        assert!(!layout.has_overlap());
    }
}
