//! The externally-consumed interfaces: `Storage`, `VectorStore`,
//! and `GeoGazetteer`, plus the persisted-state shapes the core reads and
//! writes through them. None of these are implemented here — concrete
//! backends live outside the core's scope — but the shapes are
//! owned by this crate since every component above the storage boundary
//! needs to agree on them.

use crate::error::{FailureKind, Result};
use crate::model::ChapterFact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The Analysis Orchestrator's task lifecycle: `pending ->
/// running`, `running <-> paused`, `running -> {completed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Created but not yet started.
    Pending,
    /// Actively processing chapters.
    Running,
    /// Suspended at a chapter boundary, resumable.
    Paused,
    /// Finished the chapter range (successfully or with some per-chapter
    /// failures, which are separately tracked).
    Completed,
    /// Stopped by caller request before completion.
    Cancelled,
}

impl TaskState {
    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::{Cancelled, Completed, Paused, Pending, Running};
        matches!(
            (self, next),
            (Pending, Running)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Completed)
            | (Running, Cancelled)
            | (Paused, Cancelled)
        )
    }
}

/// Per-chapter outcome recorded on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    /// Extracted, validated, and persisted without error.
    Completed,
    /// Failed and was not recovered by the end-of-run retry pass.
    Failed,
    /// Failed initially but succeeded on the end-of-run retry.
    RetrySuccess,
}

/// Live timing statistics the Orchestrator maintains in memory across a
/// run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveTiming {
    /// Mean elapsed milliseconds per completed chapter so far.
    pub avg_ms: f64,
    /// Fastest chapter observed so far.
    pub min_ms: u64,
    /// Slowest chapter observed so far.
    pub max_ms: u64,
    /// `avg_ms * remaining_chapters`, the rough ETA.
    pub eta_ms: f64,
}

impl LiveTiming {
    /// Fold one more chapter's elapsed time into the running statistics.
    pub fn record(&mut self, elapsed_ms: u64, completed_count: u64, remaining_count: u64) {
        let total = self.avg_ms * (completed_count.saturating_sub(1)) as f64 + elapsed_ms as f64;
        self.avg_ms = total / completed_count.max(1) as f64;
        self.min_ms = if completed_count <= 1 { elapsed_ms } else { self.min_ms.min(elapsed_ms) };
        self.max_ms = self.max_ms.max(elapsed_ms);
        self.eta_ms = self.avg_ms * remaining_count as f64;
    }
}

/// `{chapters_total, chapters_completed, chapters_failed_by_type,
/// timing_summary}`, the task summary surfaced to callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingSummary {
    /// Total chapters in the requested range.
    pub chapters_total: u32,
    /// Chapters that ended in `Completed` or `RetrySuccess`.
    pub chapters_completed: u32,
    /// Count of permanently failed chapters, grouped by failure kind.
    pub chapters_failed_by_type: HashMap<FailureKind, u32>,
    /// Live timing at the point this summary was taken.
    pub timing: LiveTiming,
}

/// A long-running analysis task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    /// Stable task identifier.
    pub task_id: String,
    /// The novel this task analyzes.
    pub novel_id: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// First chapter in the requested range, inclusive.
    pub chapter_start: u32,
    /// Last chapter in the requested range, inclusive.
    pub chapter_end: u32,
    /// Per-chapter outcomes recorded so far.
    pub chapter_statuses: HashMap<u32, ChapterStatus>,
    /// Running summary, refreshed at chapter boundaries.
    pub summary: TimingSummary,
}

impl AnalysisTask {
    /// Recover a task whose persisted state is `Running` at process
    /// startup back to `Paused`:
    /// a crash mid-run must never be mistaken for forward progress.
    pub fn recover_stale(&mut self) {
        if self.state == TaskState::Running {
            self.state = TaskState::Paused;
        }
    }
}

/// The kind of user override a `world_structure_overrides` record carries
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    /// Pins a location's parent, overriding vote resolution.
    LocationParent,
    /// Pins a location's region assignment.
    LocationRegion,
    /// Pins a location's render layer.
    LocationLayer,
    /// Pins a location's tier classification.
    LocationTier,
    /// Adds a named portal.
    AddPortal,
    /// Removes a named portal.
    DeletePortal,
}

/// One `world_structure_overrides` record, keyed by `(override_type,
/// override_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldStructureOverride {
    /// Which override dimension this pins.
    pub override_type: OverrideType,
    /// The subject (usually a location name, or `"from->to"` for
    /// portals).
    pub override_key: String,
    /// The pinned value (a parent name, a region name,...).
    pub value: String,
}

/// How a `map_user_overrides` entry constrains the layout engine (spec
/// §3, §4.11 "apply").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapConstraintType {
    /// A soft hint; the solver may still move this location under strong
    /// competing constraints.
    Position,
    /// A hard pin; the solver treats this location's coordinates as
    /// fixed.
    Locked,
}

/// A user override on one location's map placement. Survives
/// re-analysis and hierarchy rebuilds; cleared by `apply_hierarchy_changes`
/// only for locations whose `constraint_type` is not `Locked` (spec
/// §4.11 "apply").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapUserOverride {
    /// Pinned X coordinate.
    pub x: f64,
    /// Pinned Y coordinate.
    pub y: f64,
    /// Whether this is a soft hint or a hard lock.
    pub constraint_type: MapConstraintType,
    /// The parent this location was locked under at override time, if
    /// any. A later hierarchy rebuild may remove that parent entirely;
    /// per spec §9 this is a known possibly-stale state the core does
    /// not attempt to repair automatically.
    pub locked_parent: Option<String>,
}

/// A durable record of a diagnostic/classification benchmark run. Spec §6
/// lists `benchmark_records` as a persisted table but cost/benchmarking
/// itself is out of scope; this crate only defines the shape so a
/// `Storage` implementation has something concrete to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// The novel this benchmark ran against.
    pub novel_id: String,
    /// Free-text label for the benchmark scenario.
    pub label: String,
    /// Millisecond duration of the run.
    pub elapsed_ms: u64,
}

/// Idempotent persistence for chapter facts, the dictionary, overrides,
/// layout cache, and world structure.
///
/// Every write is upsert-by-key: calling `put_chapter_fact` twice for the
/// same `(novel_id, chapter_num)` replaces the record atomically rather
/// than erroring.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist (or replace) one chapter's fact.
    async fn put_chapter_fact(&self, novel_id: &str, fact: &ChapterFact) -> Result<()>;

    /// Load one chapter's fact, if it has been analyzed.
    async fn get_chapter_fact(&self, novel_id: &str, chapter_num: u32) -> Result<Option<ChapterFact>>;

    /// Load every chapter fact analyzed so far for `novel_id`, in
    /// ascending `chapter_num` order.
    async fn list_chapter_facts(&self, novel_id: &str) -> Result<Vec<ChapterFact>>;

    /// Persist the full entity dictionary.
    async fn put_dictionary(&self, novel_id: &str, dictionary: &crate::model::EntityDictionary) -> Result<()>;

    /// Load the entity dictionary, if the Pre-Scanner has run.
    async fn get_dictionary(&self, novel_id: &str) -> Result<Option<crate::model::EntityDictionary>>;

    /// Persist the world structure (location hierarchy, votes, layers,
    /// tiers, geo type).
    async fn put_world_structure(&self, novel_id: &str, world: &crate::model::WorldStructure) -> Result<()>;

    /// Load the world structure.
    async fn get_world_structure(&self, novel_id: &str) -> Result<Option<crate::model::WorldStructure>>;

    /// Persist one override record, replacing any existing record with
    /// the same `(override_type, override_key)`.
    async fn put_override(&self, novel_id: &str, entry: &WorldStructureOverride) -> Result<()>;

    /// Load every override record for a novel.
    async fn list_overrides(&self, novel_id: &str) -> Result<Vec<WorldStructureOverride>>;

    /// Persist (or replace) the cached map layout.
    async fn put_map_layout(&self, novel_id: &str, layout: &crate::model::MapLayout) -> Result<()>;

    /// Load the cached map layout.
    async fn get_map_layout(&self, novel_id: &str) -> Result<Option<crate::model::MapLayout>>;

    /// Persist (or replace) one location's user override.
    async fn put_map_override(&self, novel_id: &str, location: &str, entry: &MapUserOverride) -> Result<()>;

    /// Load every map user override for a novel.
    async fn list_map_overrides(&self, novel_id: &str) -> Result<HashMap<String, MapUserOverride>>;

    /// Persist the current state of a long-running analysis task.
    async fn put_task(&self, task: &AnalysisTask) -> Result<()>;

    /// Load a task by id.
    async fn get_task(&self, task_id: &str) -> Result<Option<AnalysisTask>>;

    /// List every task whose persisted state was `Running` at the moment
    /// this is called — used at process startup for stale-task recovery
    ///.
    async fn list_running_tasks(&self) -> Result<Vec<AnalysisTask>>;
}

/// The vector store used for semantic search over extracted facts. Its
/// internals are out of scope; the core only ever triggers
/// re-embedding after an analysis completes.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Request re-embedding of everything persisted for `novel_id` so far
    /// (e.g. after a chapter range finishes analyzing). Fire-and-forget
    /// from the core's point of view — failures here are logged, not
    /// propagated, since the vector store is an external collaborator.
    async fn request_reembed(&self, novel_id: &str);
}

/// One gazetteer hit for a name lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteerMatch {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lng: f64,
    /// Administrative feature code (`ADM1`-`ADM3`, `PPLA`-`PPLA3`, `PPLC`,
    ///...), when the dataset classifies it.
    pub admin_code: Option<String>,
    /// Reported population, when the dataset has it.
    pub population: Option<u64>,
    /// Which dataset(s) contributed this match.
    pub sources: Vec<String>,
}

impl GazetteerMatch {
    /// Whether this hit counts as "notable" (spec Glossary): population
    /// >= 5,000, or a county-level-or-above admin feature code.
    #[must_use]
    pub fn is_notable(&self) -> bool {
        const COUNTY_PLUS_CODES: [&str; 6] = ["ADM1", "ADM2", "ADM3", "PPLA", "PPLA2", "PPLC"];
        self.population.is_some_and(|p| p >= 5_000)
        || self
        .admin_code
        .as_deref()
        .is_some_and(|c| COUNTY_PLUS_CODES.contains(&c))
    }
}

/// A geographic name dataset consumed for real-world location lookups
///. The core decides *which* dataset to query (`detect_geo_scope`,
/// `detect_geo_type` in [`crate::geo`]); this trait abstracts over the
/// dataset itself, which is supplied by the caller.
#[async_trait]
pub trait GeoGazetteer: Send + Sync {
    /// Exact-name lookup, returning every candidate match.
    async fn lookup(&self, name: &str) -> Result<Vec<GazetteerMatch>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_may_only_transition_to_running() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Completed));
    }

    #[test]
    fn running_may_pause_complete_or_cancel() {
        assert!(TaskState::Running.can_transition_to(TaskState::Paused));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Cancelled));
    }

    #[test]
    fn completed_is_terminal() {
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Paused));
    }

    #[test]
    fn stale_running_task_recovers_to_paused() {
        let mut task = AnalysisTask {
            task_id: "t1".into(),
            novel_id: "n1".into(),
            state: TaskState::Running,
            chapter_start: 1,
            chapter_end: 10,
            chapter_statuses: HashMap::new(),
            summary: TimingSummary::default(),
        };
        task.recover_stale();
        assert_eq!(task.state, TaskState::Paused);
    }

    #[test]
    fn non_running_tasks_are_unaffected_by_recovery() {
        let mut task = AnalysisTask {
            task_id: "t1".into(),
            novel_id: "n1".into(),
            state: TaskState::Completed,
            chapter_start: 1,
            chapter_end: 10,
            chapter_statuses: HashMap::new(),
            summary: TimingSummary::default(),
        };
        task.recover_stale();
        assert_eq!(task.state, TaskState::Completed);
    }

    #[test]
    fn notable_match_by_population() {
        let m = GazetteerMatch { lat: 0.0, lng: 0.0, admin_code: None, population: Some(10_000), sources: vec![] };
        assert!(m.is_notable());
    }

    #[test]
    fn notable_match_by_admin_code() {
        let m = GazetteerMatch { lat: 0.0, lng: 0.0, admin_code: Some("ADM2".into()), population: None, sources: vec![] };
        assert!(m.is_notable());
    }

    #[test]
    fn small_village_with_no_admin_code_is_not_notable() {
        let m = GazetteerMatch { lat: 0.0, lng: 0.0, admin_code: None, population: Some(100), sources: vec![] };
        assert!(!m.is_notable());
    }
}
