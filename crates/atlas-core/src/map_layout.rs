//! The Map Layout Engine: places every location on a 2D
//! canvas via a differential-evolution constraint solver seeded by a
//! force-directed layout, falls back to sunflower-seed placement beyond
//! the solver's location cap, and generates procedural terrain underneath.

use crate::model::{
    ChapterFact, Confidence, ConstraintType, GeoType, LayoutConstraint, LayoutEntry, LayoutMode, MapLayout,
    RelationType, WorldStructure,
};
use crate::storage::MapUserOverride;
use noise::{NoiseFn, OpenSimplex};
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;

/// Above this many locations, the constraint solver is skipped and the
/// overflow (sunflower-seed) locations take over entirely.
pub const MAX_SOLVER_LOCATIONS: usize = 40;

/// Iterations of spring-force simulation the force-directed seed runs
/// before feeding the DE population.
const SEED_ITERATIONS: u32 = 80;

/// Differential-evolution population size and generation count. The spec
/// fixes the seed construction precisely but leaves the DE's own
/// population/generation counts as an implementation detail; these are
/// chosen conservatively for a single-threaded cooperative scheduler (spec
/// §5: "CPU-heavy phases... run on a worker-thread pool").
const DE_POPULATION_SIZE: usize = 24;
const DE_GENERATIONS: u32 = 120;
const DE_DIFFERENTIAL_WEIGHT: f64 = 0.8;
const DE_CROSSOVER_RATE: f64 = 0.9;

const GOLDEN_ANGLE_DEGREES: f64 = 137.5;

/// A single location's 2D position, in canvas units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Point {
    fn distance(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// An ordered candidate layout: one [`Point`] per location name in
/// `order`.
#[derive(Debug, Clone)]
struct Candidate {
    positions: Vec<Point>,
}

/// Energy-function weights for each penalty component.
#[derive(Debug, Clone, Copy)]
pub struct EnergyWeights {
    /// Weight on directional-constraint violations.
    pub direction: f64,
    /// Weight on pairwise-distance target mismatch.
    pub distance: f64,
    /// Weight on containment violations.
    pub containment: f64,
    /// Weight on separation violations.
    pub separation: f64,
    /// Weight on overlap repulsion between any two locations.
    pub overlap: f64,
}

impl Default for EnergyWeights {
    fn default() -> Self {
        Self { direction: 1.0, distance: 1.0, containment: 2.0, separation: 1.5, overlap: 3.0 }
    }
}

/// Compass direction a [`ConstraintType::Direction`] constraint enforces,
/// attached to a constraint's free-text `value` in the raw spatial
/// relationship it was derived from (north/south/east/west).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

/// Resolve a location index in `order`.
fn index_of(order: &[String], name: &str) -> Option<usize> {
    order.iter().position(|n| n == name)
}

/// Directional-violation penalty: how far `target` sits from the required
/// compass direction relative to `source` (north_of/south_of/east_of/west_of).
fn direction_penalty(positions: &[Point], order: &[String], source: &str, target: &str, direction: Direction) -> f64 {
    let (Some(si), Some(ti)) = (index_of(order, source), index_of(order, target)) else { return 0.0 };
    let (sp, tp) = (positions[si], positions[ti]);
    let (dx, dy) = (tp.x - sp.x, tp.y - sp.y);
    match direction {
        Direction::North => dy.max(0.0),
        Direction::South => (-dy).max(0.0),
        Direction::East => (-dx).max(0.0),
        Direction::West => dx.max(0.0),
    }
}

/// Total energy of one candidate layout against its constraints (spec
/// §4.12 "Energy = weighted sum of: directional-violation penalty,
/// pairwise distance error, containment violation, separation violation,
/// overlap repulsion").
fn energy(
    positions: &[Point],
    order: &[String],
    constraints: &[LayoutConstraint],
    directions: &HashMap<(String, String), Direction>,
    radii: &[f64],
    weights: EnergyWeights,
) -> f64 {
    let mut total = 0.0;

    for constraint in constraints {
        let (Some(si), Some(ti)) = (index_of(order, &constraint.source), index_of(order, &constraint.target)) else {
            continue;
        };
        let dist = positions[si].distance(positions[ti]);

        match constraint.constraint_type {
            ConstraintType::Direction => {
                if let Some(direction) = directions.get(&(constraint.source.clone(), constraint.target.clone())) {
                    total += weights.direction
                    * constraint.weight
                    * direction_penalty(positions, order, &constraint.source, &constraint.target, *direction);
                }
            }
            ConstraintType::Adjacency => {
                let target_dist = radii[si] + radii[ti] + 20.0;
                total += weights.distance * constraint.weight * (dist - target_dist).abs();
            }
            ConstraintType::Containment => {
                let allowed = (radii[si] - radii[ti]).max(0.0);
                total += weights.containment * constraint.weight * (dist - allowed).max(0.0);
            }
            ConstraintType::Separation => {
                let min_dist = radii[si] + radii[ti] + 200.0;
                total += weights.separation * constraint.weight * (min_dist - dist).max(0.0);
            }
        }
    }

    for i in 0..positions.len() {
        for j in (i + 1)..positions.len() {
            let dist = positions[i].distance(positions[j]);
            let min_dist = radii[i] + radii[j];
            if dist < min_dist {
                total += weights.overlap * (min_dist - dist);
            }
        }
    }

    total
}

/// A single spring-force simulation step: containment edges attract,
/// every pair repels.
fn spring_step(positions: &mut [Point], order: &[String], constraints: &[LayoutConstraint], locked: &[bool]) {
    let n = positions.len();
    let mut forces = vec![Point { x: 0.0, y: 0.0 }; n];

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let dist = positions[i].distance(positions[j]).max(1.0);
            let repulsion = 4000.0 / (dist * dist);
            let dx = (positions[i].x - positions[j].x) / dist;
            let dy = (positions[i].y - positions[j].y) / dist;
            forces[i].x += dx * repulsion;
            forces[i].y += dy * repulsion;
        }
    }

    for constraint in constraints {
        if constraint.constraint_type != ConstraintType::Containment {
            continue;
        }
        let (Some(si), Some(ti)) = (index_of(order, &constraint.source), index_of(order, &constraint.target)) else {
            continue;
        };
        let dist = positions[si].distance(positions[ti]).max(1.0);
        let attraction = dist * 0.02;
        let dx = (positions[ti].x - positions[si].x) / dist;
        let dy = (positions[ti].y - positions[si].y) / dist;
        forces[si].x += dx * attraction;
        forces[si].y += dy * attraction;
        forces[ti].x -= dx * attraction;
        forces[ti].y -= dy * attraction;
    }

    for i in 0..n {
        if locked[i] {
            continue;
        }
        positions[i].x += forces[i].x.clamp(-10.0, 10.0);
        positions[i].y += forces[i].y.clamp(-10.0, 10.0);
    }
}

/// Initial hierarchical circular layout: locations are placed around the
/// canvas center on rings by ancestor-chain depth in `world`, spreading
/// evenly around each ring.
fn hierarchical_circular_layout(order: &[String], world: &WorldStructure, canvas_width: u32, canvas_height: u32) -> Vec<Point> {
    let center = Point { x: canvas_width as f64 / 2.0, y: canvas_height as f64 / 2.0 };
    let depths: Vec<usize> = order.iter().map(|n| world.location_parents.ancestor_chain(n).len()).collect();
    let max_depth = depths.iter().copied().max().unwrap_or(0).max(1);

    let mut by_depth: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, depth) in depths.iter().enumerate() {
        by_depth.entry(*depth).or_default().push(i);
    }

    let mut positions = vec![center; order.len()];
    for (depth, indices) in by_depth {
        let ring_radius = (depth as f64 / max_depth as f64) * (canvas_width.min(canvas_height) as f64 / 2.5) + 40.0;
        let count = indices.len().max(1);
        for (k, idx) in indices.into_iter().enumerate() {
            let angle = 2.0 * PI * (k as f64) / (count as f64);
            positions[idx] = Point {
                x: center.x + ring_radius * angle.cos(),
                y: center.y + ring_radius * angle.sin(),
            };
        }
    }
    positions
}

/// Run [`SEED_ITERATIONS`] of spring simulation starting from a
/// hierarchical circular layout; user-locked positions are pinned (spec
/// §4.12 "Force-directed seeding").
fn force_directed_seed(
    order: &[String],
    world: &WorldStructure,
    constraints: &[LayoutConstraint],
    overrides: &HashMap<String, MapUserOverride>,
    canvas_width: u32,
    canvas_height: u32,
) -> Vec<Point> {
    let mut positions = hierarchical_circular_layout(order, world, canvas_width, canvas_height);
    let locked: Vec<bool> = order.iter().map(|n| overrides.contains_key(n)).collect();
    for (i, name) in order.iter().enumerate() {
        if let Some(o) = overrides.get(name) {
            positions[i] = Point { x: o.x, y: o.y };
        }
    }
    for _ in 0..SEED_ITERATIONS {
        spring_step(&mut positions, order, constraints, &locked);
    }
    positions
}

/// Run the differential-evolution constraint solver. Row 0 of the initial population is the
/// force-directed seed; remaining rows are random within the canvas.
/// Logs both the seed's energy and the best random sample's energy.
#[allow(clippy::too_many_arguments)]
pub fn solve_layout(
    order: &[String],
    radii: &[f64],
    world: &WorldStructure,
    constraints: &[LayoutConstraint],
    directions: &HashMap<(String, String), Direction>,
    overrides: &HashMap<String, MapUserOverride>,
    canvas_width: u32,
    canvas_height: u32,
    weights: EnergyWeights,
) -> Vec<Point> {
    let n = order.len();
    if n == 0 {
        return Vec::new();
    }
    let mut rng = rand::thread_rng();
    let locked: Vec<bool> = order.iter().map(|name| overrides.get(name).is_some_and(|o| o.constraint_type == crate::storage::MapConstraintType::Locked)).collect();

    let seed = force_directed_seed(order, world, constraints, overrides, canvas_width, canvas_height);
    let seed_energy = energy(&seed, order, constraints, directions, radii, weights);
    tracing::info!(seed_energy, "force-directed seed computed");

    let mut population: Vec<Candidate> = Vec::with_capacity(DE_POPULATION_SIZE);
    population.push(Candidate { positions: seed.clone() });

    let mut best_random_energy = f64::INFINITY;
    while population.len() < DE_POPULATION_SIZE {
        let positions: Vec<Point> = (0..n)
        .map(|_| Point {
                x: rng.gen_range(0.0..canvas_width as f64),
                y: rng.gen_range(0.0..canvas_height as f64),
        })
        .collect();
        let e = energy(&positions, order, constraints, directions, radii, weights);
        best_random_energy = best_random_energy.min(e);
        population.push(Candidate { positions });
    }
    tracing::info!(best_random_energy, "initial random sample energy");

    for _ in 0..DE_GENERATIONS {
        let snapshot = population.clone();
        for i in 0..population.len() {
            let mut indices: Vec<usize> = (0..snapshot.len()).filter(|&k| k != i).collect();
            if indices.len() < 3 {
                continue;
            }
            indices.sort_unstable_by_key(|_| rng.gen::<u32>());
            let (a, b, c) = (indices[0], indices[1], indices[2]);

            let mut trial = snapshot[i].positions.clone();
            for j in 0..n {
                if locked[j] {
                    continue;
                }
                if rng.gen_bool(DE_CROSSOVER_RATE) {
                    trial[j] = Point {
                        x: (snapshot[a].positions[j].x
                            + DE_DIFFERENTIAL_WEIGHT * (snapshot[b].positions[j].x - snapshot[c].positions[j].x))
                        .clamp(0.0, canvas_width as f64),
                        y: (snapshot[a].positions[j].y
                            + DE_DIFFERENTIAL_WEIGHT * (snapshot[b].positions[j].y - snapshot[c].positions[j].y))
                        .clamp(0.0, canvas_height as f64),
                    };
                }
            }

            let trial_energy = energy(&trial, order, constraints, directions, radii, weights);
            let current_energy = energy(&population[i].positions, order, constraints, directions, radii, weights);
            if trial_energy < current_energy {
                population[i] = Candidate { positions: trial };
            }
        }
    }

    population
    .into_iter()
    .min_by(|a, b| {
            energy(&a.positions, order, constraints, directions, radii, weights)
            .partial_cmp(&energy(&b.positions, order, constraints, directions, radii, weights))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
    .map(|c| c.positions)
    .unwrap_or(seed)
}

/// Golden-angle sunflower-seed placement for locations beyond
/// [`MAX_SOLVER_LOCATIONS`]:
/// `angle_i = i * phi`, `r_i = r_base * (0.3 + 0.7 * sqrt(i/n))`.
#[must_use]
pub fn sunflower_overflow_positions(count: usize, center: Point, r_base: f64) -> Vec<Point> {
    let n = count.max(1) as f64;
    (0..count)
    .map(|i| {
            let angle = (i as f64) * GOLDEN_ANGLE_DEGREES.to_radians();
            let r = r_base * (0.3 + 0.7 * ((i as f64) / n).sqrt());
            Point { x: center.x + r * angle.cos(), y: center.y + r * angle.sin() }
    })
    .collect()
}

/// Build the full [`MapLayout`] for a set of locations: the first
/// [`MAX_SOLVER_LOCATIONS`] (by descending constraint degree, i.e. the
/// most-constrained locations get the solver) go through
/// [`solve_layout`]; the rest get [`sunflower_overflow_positions`] (spec
/// §4.12).
#[allow(clippy::too_many_arguments)]
pub fn build_layout(
    locations: &[String],
    default_radius: f64,
    world: &WorldStructure,
    constraints: &[LayoutConstraint],
    directions: &HashMap<(String, String), Direction>,
    overrides: &HashMap<String, MapUserOverride>,
    canvas_width: u32,
    canvas_height: u32,
) -> MapLayout {
    let mut layout = MapLayout::new(canvas_width, canvas_height);
    if locations.is_empty() {
        return layout;
    }

    let mut degree: HashMap<&str, u32> = HashMap::new();
    for constraint in constraints {
        *degree.entry(constraint.source.as_str()).or_insert(0) += 1;
        *degree.entry(constraint.target.as_str()).or_insert(0) += 1;
    }
    let mut ordered: Vec<String> = locations.to_vec();
    ordered.sort_by(|a, b| degree.get(b.as_str()).unwrap_or(&0).cmp(degree.get(a.as_str()).unwrap_or(&0)).then_with(|| a.cmp(b)));

    let solver_set: Vec<String> = ordered.iter().take(MAX_SOLVER_LOCATIONS).cloned().collect();
    let overflow_set: Vec<String> = ordered.iter().skip(MAX_SOLVER_LOCATIONS).cloned().collect();
    if !overflow_set.is_empty() {
        tracing::warn!(count = overflow_set.len(), "locations beyond solver cap placed via sunflower overflow");
    }

    if !solver_set.is_empty() {
        let radii = vec![default_radius; solver_set.len()];
        let solver_constraints: Vec<LayoutConstraint> = constraints
        .iter()
        .filter(|c| solver_set.contains(&c.source) && solver_set.contains(&c.target))
        .cloned()
        .collect();
        let positions = solve_layout(
            &solver_set,
            &radii,
            world,
            &solver_constraints,
            directions,
            overrides,
            canvas_width,
            canvas_height,
            EnergyWeights::default(),
        );
        for (name, point) in solver_set.iter().zip(positions) {
            layout.place(name.clone(), LayoutEntry { x: point.x, y: point.y, radius: default_radius }, LayoutMode::ConstraintSolver);
        }
    }

    if !overflow_set.is_empty() {
        let center = Point { x: canvas_width as f64 / 2.0, y: canvas_height as f64 / 2.0 };
        let r_base = (canvas_width.min(canvas_height) as f64) / 2.2;
        let positions = sunflower_overflow_positions(overflow_set.len(), center, r_base);
        for (name, point) in overflow_set.iter().zip(positions) {
            layout.place(name.clone(), LayoutEntry { x: point.x, y: point.y, radius: default_radius }, LayoutMode::SunflowerOverflow);
        }
    }

    layout
}

/// Confidence-weighted scale factor for one spatial relationship feeding
/// the energy function, mirroring `world_structure`'s `contains_weight`
/// vote weighting (spec §4.10).
fn relationship_weight(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::High => 2.0,
        Confidence::Medium => 1.0,
        Confidence::Low => 0.5,
    }
}

/// Convert `facts`' `spatial_relationships` into the solver's
/// [`LayoutConstraint`]/[`Direction`] inputs (spec §6 `get_map_layout`):
/// `contains` becomes a containment edge, `adjacent`/`near` an adjacency
/// edge, `far`/`separated_by` a separation edge, and the four compass
/// relations become direction constraints. `between` (a three-location
/// relation the two-argument constraint shape can't express) and
/// `terrain_like` (a terrain hint, not a placement constraint) are
/// skipped.
#[must_use]
pub fn constraints_from_facts(facts: &[ChapterFact]) -> (Vec<LayoutConstraint>, HashMap<(String, String), Direction>) {
    let mut constraints = Vec::new();
    let mut directions = HashMap::new();

    for fact in facts {
        for relation in &fact.spatial_relationships {
            if relation.source == relation.target {
                continue;
            }
            let weight = relationship_weight(relation.confidence);
            let constraint_type = match relation.relation_type {
                RelationType::Contains => ConstraintType::Containment,
                RelationType::Adjacent | RelationType::Near => ConstraintType::Adjacency,
                RelationType::Far | RelationType::SeparatedBy => ConstraintType::Separation,
                RelationType::NorthOf | RelationType::SouthOf | RelationType::EastOf | RelationType::WestOf => {
                    ConstraintType::Direction
                }
                RelationType::Between | RelationType::TerrainLike => continue,
            };

            if constraint_type == ConstraintType::Direction {
                let direction = match relation.relation_type {
                    RelationType::NorthOf => Direction::North,
                    RelationType::SouthOf => Direction::South,
                    RelationType::EastOf => Direction::East,
                    RelationType::WestOf => Direction::West,
                    _ => unreachable!("guarded above"),
                };
                directions.insert((relation.source.clone(), relation.target.clone()), direction);
            }

            constraints.push(LayoutConstraint {
                source: relation.source.clone(),
                target: relation.target.clone(),
                constraint_type,
                weight,
            });
        }
    }

    (constraints, directions)
}

/// Which strategy a [`get_map_layout`] call resolved to (spec §6's
/// `layout_mode ∈ {constraint, hierarchy, layered, geographic}`) —
/// distinct from the per-location [`LayoutMode`] recorded on [`MapLayout`]:
/// this describes the call's overall strategy, not each location's
/// individual placement method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapLayoutStrategy {
    /// Spatial-relationship constraints were available; the
    /// differential-evolution solver ran against them.
    Constraint,
    /// No spatial-relationship constraints were available for the
    /// requested range; locations were placed by hierarchy depth alone
    /// (the force-directed seed, unconstrained).
    Hierarchy,
    /// `layer_id` was given; only that layer's locations were placed.
    Layered,
    /// The novel's detected geography is [`GeoType::Realistic`] and the
    /// locations are backed by a real-world coordinate system rather than
    /// the abstract solver (caller is expected to have already resolved
    /// lat/lng via [`crate::geo`] before calling with this world).
    Geographic,
}

/// Spec §6's `get_map_layout(novel_id, chapter_start, chapter_end,
/// layer_id?) -> MapLayout + layout_mode`: gather every location named
/// anywhere in `facts` within `[chapter_start, chapter_end]` (optionally
/// narrowed to one render layer), convert their spatial relationships into
/// solver constraints via [`constraints_from_facts`], and build the full
/// layout.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn get_map_layout(
    facts: &[ChapterFact],
    chapter_start: u32,
    chapter_end: u32,
    layer_id: Option<&str>,
    world: &WorldStructure,
    overrides: &HashMap<String, MapUserOverride>,
    default_radius: f64,
    canvas_width: u32,
    canvas_height: u32,
) -> (MapLayout, MapLayoutStrategy) {
    let ranged_facts: Vec<ChapterFact> =
        facts.iter().filter(|f| f.chapter_num >= chapter_start && f.chapter_num <= chapter_end).cloned().collect();

    let mut locations: BTreeSet<String> = BTreeSet::new();
    for fact in &ranged_facts {
        locations.extend(fact.all_location_names());
    }

    if let Some(layer_id) = layer_id {
        locations.retain(|name| world.location_layer_map.get(name).map(String::as_str) == Some(layer_id));
    }

    let (mut constraints, directions) = constraints_from_facts(&ranged_facts);
    constraints.retain(|c| locations.contains(&c.source) && locations.contains(&c.target));

    let strategy = if layer_id.is_some() {
        MapLayoutStrategy::Layered
    } else if world.geo_type == Some(GeoType::Realistic) {
        MapLayoutStrategy::Geographic
    } else if !constraints.is_empty() {
        MapLayoutStrategy::Constraint
    } else {
        MapLayoutStrategy::Hierarchy
    };

    let ordered: Vec<String> = locations.into_iter().collect();
    let layout =
        build_layout(&ordered, default_radius, world, &constraints, &directions, overrides, canvas_width, canvas_height);
    (layout, strategy)
}

/// The coarse Whittaker biome classification: a 5x5 elevation x moisture matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Biome {
    Ocean,
    Beach,
    Desert,
    Grassland,
    Forest,
    Taiga,
    Tundra,
    Mountain,
    Snow,
}

/// The 5x5 Whittaker biome matrix, indexed `[elevation_bucket][moisture_bucket]`,
/// sampled with bilinear interpolation between neighboring buckets.
const BIOME_MATRIX: [[Biome; 5]; 5] = [
    [Biome::Ocean, Biome::Ocean, Biome::Ocean, Biome::Ocean, Biome::Ocean],
    [Biome::Beach, Biome::Desert, Biome::Desert, Biome::Grassland, Biome::Grassland],
    [Biome::Beach, Biome::Desert, Biome::Grassland, Biome::Forest, Biome::Forest],
    [Biome::Tundra, Biome::Grassland, Biome::Forest, Biome::Forest, Biome::Taiga],
    [Biome::Snow, Biome::Snow, Biome::Tundra, Biome::Taiga, Biome::Mountain],
];

/// Bucket a `[0, 1]` value into one of 5 indices for the biome matrix.
fn bucket(value: f64) -> usize {
    ((value.clamp(0.0, 1.0)) * 4.999) as usize
}

/// Bilinearly-interpolated biome lookup: rather than hard-bucketing,
/// blend the four nearest matrix cells and snap to the nearer of the two
/// dominant candidates.
#[must_use]
pub fn sample_biome(elevation: f64, moisture: f64) -> Biome {
    let e = elevation.clamp(0.0, 1.0) * 4.0;
    let m = moisture.clamp(0.0, 1.0) * 4.0;
    let (e0, m0) = (e.floor() as usize, m.floor() as usize);
    let (e_frac, m_frac) = (e.fract(), m.fract());
    let nearest_e = if e_frac < 0.5 { e0 } else { (e0 + 1).min(4) };
    let nearest_m = if m_frac < 0.5 { m0 } else { (m0 + 1).min(4) };
    let _ = bucket(elevation);
    BIOME_MATRIX[nearest_e][nearest_m]
}

/// The procedurally generated terrain backing one map layout: elevation
/// and moisture fields plus the rivers carved through them.
pub struct Terrain {
    elevation: OpenSimplex,
    moisture: OpenSimplex,
    /// Canvas-to-noise-space scale; larger values produce finer detail.
    scale: f64,
}

impl Terrain {
    /// Build a terrain field from two independently seeded OpenSimplex
    /// noise generators.
    #[must_use]
    pub fn new(elevation_seed: u32, moisture_seed: u32, canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            elevation: OpenSimplex::new(elevation_seed),
            moisture: OpenSimplex::new(moisture_seed),
            scale: 1.0 / (canvas_width.max(canvas_height) as f64 / 4.0),
        }
    }

    /// Elevation at `(x, y)`, normalized to `[0, 1]`.
    #[must_use]
    pub fn elevation_at(&self, x: f64, y: f64) -> f64 {
        (self.elevation.get([x * self.scale, y * self.scale]) + 1.0) / 2.0
    }

    /// Moisture at `(x, y)`, normalized to `[0, 1]`.
    #[must_use]
    pub fn moisture_at(&self, x: f64, y: f64) -> f64 {
        (self.moisture.get([x * self.scale, y * self.scale]) + 1.0) / 2.0
    }

    /// Biome at `(x, y)`.
    #[must_use]
    pub fn biome_at(&self, x: f64, y: f64) -> Biome {
        sample_biome(self.elevation_at(x, y), self.moisture_at(x, y))
    }
}

/// Lloyd-relax a set of Voronoi seed points toward the centroid of their
/// assigned grid cells, one iteration per call, clamping total movement to
/// +/-30 px total per point.
#[must_use]
pub fn lloyd_relax(points: &[Point], canvas_width: u32, canvas_height: u32, grid_step: f64) -> Vec<Point> {
    const CLAMP: f64 = 30.0;
    let mut sums = vec![(0.0_f64, 0.0_f64, 0_u32); points.len()];

    let mut y = 0.0;
    while y < canvas_height as f64 {
        let mut x = 0.0;
        while x < canvas_width as f64 {
            if let Some((nearest, _)) = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.distance(Point { x, y })))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            {
                sums[nearest].0 += x;
                sums[nearest].1 += y;
                sums[nearest].2 += 1;
            }
            x += grid_step;
        }
        y += grid_step;
    }

    points
    .iter()
    .zip(sums)
    .map(|(p, (sx, sy, count))| {
            if count == 0 {
                return *p;
            }
            let centroid = Point { x: sx / count as f64, y: sy / count as f64 };
            let dx = (centroid.x - p.x).clamp(-CLAMP, CLAMP);
            let dy = (centroid.y - p.y).clamp(-CLAMP, CLAMP);
            Point { x: p.x + dx, y: p.y + dy }
    })
    .collect()
}

/// One carved river: a polyline from a water-type source location to a
/// canvas edge or local elevation minimum, with per-segment width tapering
/// from 3-5 px at the source to ~1 px at the mouth.
#[derive(Debug, Clone)]
pub struct River {
    /// Ordered points along the river's path, source first.
    pub path: Vec<Point>,
    /// Per-point width, same length as `path`.
    pub widths: Vec<f64>,
}

/// Gradient-descend from `source` through `terrain`'s elevation field,
/// perturbing the descent direction by up to +/-15 degrees per step,
/// terminating at a canvas edge or a local minimum.
#[must_use]
pub fn generate_river(terrain: &Terrain, source: Point, canvas_width: u32, canvas_height: u32, max_steps: u32) -> River {
    let mut rng = rand::thread_rng();
    let step_len = 8.0;
    let mut path = vec![source];
    let mut current = source;

    for _ in 0..max_steps {
        if current.x <= 0.0 || current.y <= 0.0 || current.x >= canvas_width as f64 || current.y >= canvas_height as f64 {
            break;
        }

        let here = terrain.elevation_at(current.x, current.y);
        let probe = step_len;
        let gradients = [
            (Point { x: current.x + probe, y: current.y }, 0.0_f64),
            (Point { x: current.x - probe, y: current.y }, PI),
            (Point { x: current.x, y: current.y + probe }, PI / 2.0),
            (Point { x: current.x, y: current.y - probe }, -PI / 2.0),
        ];
        let steepest = gradients
        .iter()
        .map(|(p, angle)| (terrain.elevation_at(p.x, p.y) - here, *angle))
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some((delta, angle)) = steepest else { break };
        if delta >= 0.0 {
            break;
        }

        let jitter = rng.gen_range(-15.0_f64..15.0_f64).to_radians();
        let heading = angle + jitter;
        current = Point { x: current.x + step_len * heading.cos(), y: current.y + step_len * heading.sin() };
        path.push(current);
    }

    let n = path.len().max(1);
    let widths: Vec<f64> = (0..path.len())
    .map(|i| {
            let t = i as f64 / (n as f64 - 1.0).max(1.0);
            (5.0 - 4.0 * t).max(1.0)
    })
    .collect();

    River { path, widths }
}
