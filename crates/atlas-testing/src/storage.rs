//! An in-memory [`Storage`] implementation for tests.

use async_trait::async_trait;
use atlas_core::error::Result;
use atlas_core::model::{ChapterFact, EntityDictionary, MapLayout, WorldStructure};
use atlas_core::storage::{AnalysisTask, MapUserOverride, Storage, TaskState, WorldStructureOverride};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct NovelRecord {
    facts: HashMap<u32, ChapterFact>,
    dictionary: Option<EntityDictionary>,
    world_structure: Option<WorldStructure>,
    overrides: Vec<WorldStructureOverride>,
    map_layout: Option<MapLayout>,
    map_overrides: HashMap<String, MapUserOverride>,
}

/// A single-process, in-memory `Storage`. Every write is visible to every
/// subsequent read on the same instance; nothing is persisted across
/// instances, so each test gets a clean slate from `InMemoryStorage::new()`.
#[derive(Default)]
pub struct InMemoryStorage {
    novels: Mutex<HashMap<String, NovelRecord>>,
    tasks: Mutex<HashMap<String, AnalysisTask>>,
}

impl InMemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn put_chapter_fact(&self, novel_id: &str, fact: &ChapterFact) -> Result<()> {
        self.novels.lock().entry(novel_id.to_string()).or_default().facts.insert(fact.chapter_num, fact.clone());
        Ok(())
    }

    async fn get_chapter_fact(&self, novel_id: &str, chapter_num: u32) -> Result<Option<ChapterFact>> {
        Ok(self.novels.lock().get(novel_id).and_then(|record| record.facts.get(&chapter_num).cloned()))
    }

    async fn list_chapter_facts(&self, novel_id: &str) -> Result<Vec<ChapterFact>> {
        let novels = self.novels.lock();
        let Some(record) = novels.get(novel_id) else { return Ok(Vec::new()) };
        let mut facts: Vec<ChapterFact> = record.facts.values().cloned().collect();
        facts.sort_by_key(|fact| fact.chapter_num);
        Ok(facts)
    }

    async fn put_dictionary(&self, novel_id: &str, dictionary: &EntityDictionary) -> Result<()> {
        self.novels.lock().entry(novel_id.to_string()).or_default().dictionary = Some(dictionary.clone());
        Ok(())
    }

    async fn get_dictionary(&self, novel_id: &str) -> Result<Option<EntityDictionary>> {
        Ok(self.novels.lock().get(novel_id).and_then(|record| record.dictionary.clone()))
    }

    async fn put_world_structure(&self, novel_id: &str, world: &WorldStructure) -> Result<()> {
        self.novels.lock().entry(novel_id.to_string()).or_default().world_structure = Some(world.clone());
        Ok(())
    }

    async fn get_world_structure(&self, novel_id: &str) -> Result<Option<WorldStructure>> {
        Ok(self.novels.lock().get(novel_id).and_then(|record| record.world_structure.clone()))
    }

    async fn put_override(&self, novel_id: &str, entry: &WorldStructureOverride) -> Result<()> {
        self.novels.lock().entry(novel_id.to_string()).or_default().overrides.push(entry.clone());
        Ok(())
    }

    async fn list_overrides(&self, novel_id: &str) -> Result<Vec<WorldStructureOverride>> {
        Ok(self.novels.lock().get(novel_id).map(|record| record.overrides.clone()).unwrap_or_default())
    }

    async fn put_map_layout(&self, novel_id: &str, layout: &MapLayout) -> Result<()> {
        self.novels.lock().entry(novel_id.to_string()).or_default().map_layout = Some(layout.clone());
        Ok(())
    }

    async fn get_map_layout(&self, novel_id: &str) -> Result<Option<MapLayout>> {
        Ok(self.novels.lock().get(novel_id).and_then(|record| record.map_layout.clone()))
    }

    async fn put_map_override(&self, novel_id: &str, location: &str, entry: &MapUserOverride) -> Result<()> {
        self.novels
            .lock()
            .entry(novel_id.to_string())
            .or_default()
            .map_overrides
            .insert(location.to_string(), entry.clone());
        Ok(())
    }

    async fn list_map_overrides(&self, novel_id: &str) -> Result<HashMap<String, MapUserOverride>> {
        Ok(self.novels.lock().get(novel_id).map(|record| record.map_overrides.clone()).unwrap_or_default())
    }

    async fn put_task(&self, task: &AnalysisTask) -> Result<()> {
        self.tasks.lock().insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<AnalysisTask>> {
        Ok(self.tasks.lock().get(task_id).cloned())
    }

    async fn list_running_tasks(&self) -> Result<Vec<AnalysisTask>> {
        Ok(self.tasks.lock().values().filter(|task| task.state == TaskState::Running).cloned().collect())
    }
}
