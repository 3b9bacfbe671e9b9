//! The Analysis Orchestrator (C7, §4.7): the per-chapter extraction loop,
//! task lifecycle, end-of-run retry pass, and the hierarchy-consolidation
//! trigger that follows a completed run.
//!
//! Concurrency model: cooperative single-threaded execution with
//! asynchronous I/O. A semaphore of size 1 bounds concurrent LLM calls per
//! novel — single-GPU local inference needs it, and cloud mode still
//! benefits from in-order logging and stable progress. Pause/resume/cancel
//! are inspected only at chapter boundaries.

use crate::config::PipelineConfig;
use crate::context_builder;
use crate::error::{FailureKind, Result};
use crate::extractor;
use crate::gateway::LlmGateway;
use crate::hierarchy_consolidator::{self, SynonymMerge};
use crate::model::{ChapterFact, EntityDictionary, TierClass, WorldStructure};
use crate::storage::{AnalysisTask, ChapterStatus, Storage, TaskState};
use crate::validator;
use crate::world_structure;
use atlas_budget::compute_budget;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// One chapter's raw input text, already split from the source novel
/// (chapter splitting itself is out of this crate's scope, spec §1).
#[derive(Debug, Clone)]
pub struct ChapterInput {
    /// 1-based chapter number.
    pub chapter_num: u32,
    /// The chapter's raw text.
    pub text: String,
}

/// Static prompt material the Fact Extractor needs, assembled once per
/// run. Authoring the actual prompt
/// strings is out of scope; this just carries whatever the
/// caller supplies.
#[derive(Debug, Clone, Default)]
pub struct PromptConfig {
    /// The system prompt prefixed to every extraction call.
    pub system_prompt: String,
    /// Few-shot examples, truncated per-call to `budget.fewshot_example_count`.
    pub fewshot_examples: Vec<String>,
}

/// `_classify_error`: every Fact-Extractor/Validator
/// failure is already typed by the time it reaches the orchestrator, so
/// this is just the accessor the spec names, not a string match.
#[must_use]
pub fn classify_error(fact: &ChapterFact) -> Option<FailureKind> {
    fact.extraction_meta.error_type
}

/// Recover every task whose persisted state is `Running` at process
/// startup back to `Paused`: a crash
/// mid-run must never be mistaken for forward progress.
pub async fn recover_stale_tasks(storage: &dyn Storage) -> Result<Vec<AnalysisTask>> {
    let mut recovered = Vec::new();
    for mut task in storage.list_running_tasks().await? {
        task.recover_stale();
        storage.put_task(&task).await?;
        recovered.push(task);
    }
    Ok(recovered)
}

/// Move `task` into `next` if the transition is legal,
/// persisting the new state. A caller requesting an illegal transition
/// (e.g. pausing a completed task) gets back `Ok(false)` rather than an
/// error — pause/resume/cancel requests racing the loop's own boundary
/// checks are expected, not exceptional.
pub async fn transition_task(storage: &dyn Storage, task: &mut AnalysisTask, next: TaskState) -> Result<bool> {
    if !task.state.can_transition_to(next) {
        return Ok(false);
    }
    task.state = next;
    storage.put_task(task).await?;
    Ok(true)
}

/// The per-novel concurrency primitive: one LLM-call semaphore, held for
/// the duration of each chapter's extraction call.
pub struct Orchestrator {
    llm_semaphore: Arc<Semaphore>,
}

impl Orchestrator {
    /// Build an orchestrator bounding concurrent LLM calls at
    /// `config.llm_concurrency` (1 in production, spec §5).
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            llm_semaphore: Arc::new(Semaphore::new(config.llm_concurrency)),
        }
    }

    /// Run the full per-chapter loop over `chapters` for `task`, implementing
    /// spec §4.7's protocol end to end:
    ///
    /// 1. Build context (C6), extract (C4) under the LLM semaphore, validate
    /// (C5), persist, and feed the fact into the live vote accumulator.
    /// 2. Track live timing and per-chapter status.
    /// 3. After the main loop, retry failed chapters once, skipping
    /// `content_policy`.
    /// 4. Trigger hierarchy consolidation + subtree review, soft-timed-out.
    ///
    /// Pause/cancel are checked at each chapter boundary by re-reading the
    /// task's persisted state — an external caller pauses or cancels by
    /// writing to storage concurrently. On `Paused`, the loop stops and
    /// returns normally; calling `run` again later resumes from the first
    /// chapter without a recorded status.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        gateway: &dyn LlmGateway,
        storage: &dyn Storage,
        config: &PipelineConfig,
        prompts: &PromptConfig,
        novel_id: &str,
        uber_root: &str,
        task: &mut AnalysisTask,
        chapters: &[ChapterInput],
    ) -> Result<()> {
        if !transition_task(storage, task, TaskState::Running).await? && task.state != TaskState::Running {
            // Already terminal (Completed/Cancelled) or an illegal starting
            // state; nothing to do.
            return Ok(());
        }

        let dictionary = storage.get_dictionary(novel_id).await?.unwrap_or_default();
        let mut world = storage
        .get_world_structure(novel_id)
        .await?
        .unwrap_or_else(|| WorldStructure::new(uber_root));

        // Every fact known so far for this novel, in ascending chapter
        // order — includes chapters from
        // earlier runs and, on resume, chapters already completed in this
        // range, so context building never loses visibility into them.
        let mut preceding_facts = storage.list_chapter_facts(novel_id).await?;

        let mut failed_chapters: Vec<u32> = Vec::new();

        for chapter in chapters {
            if task.chapter_statuses.contains_key(&chapter.chapter_num) {
                continue;
            }

            // Boundary check: pause/cancel are only honored here.
            if let Some(latest) = storage.get_task(&task.task_id).await? {
                task.state = latest.state;
            }
            match task.state {
                TaskState::Paused => return Ok(()),
                TaskState::Cancelled => return Ok(()),
                _ => {}
            }

            let fact = self
            .run_one_chapter(gateway, config, prompts, &dictionary, &world, &preceding_facts, chapter)
            .await;

            storage.put_chapter_fact(novel_id, &fact).await?;
            world_structure::accumulate_chapter_votes(&mut world.parent_votes, &fact);
            let resolved = world_structure::resolve_parents(&world.parent_votes);
            world_structure::apply_resolution(&mut world, resolved);
            storage.put_world_structure(novel_id, &world).await?;

            let error_type = classify_error(&fact);
            let status = if error_type.is_none() {
                ChapterStatus::Completed
            } else {
                failed_chapters.push(chapter.chapter_num);
                ChapterStatus::Failed
            };

            let completed_count = task.summary.chapters_completed as u64 + 1;
            let remaining_count = (task.chapter_end - chapter.chapter_num) as u64;
            task.summary.timing.record(fact.extraction_meta.elapsed_ms, completed_count, remaining_count);
            task.summary.chapters_total = task.chapter_end - task.chapter_start + 1;
            if status == ChapterStatus::Completed {
                task.summary.chapters_completed += 1;
            } else if let Some(kind) = error_type {
                *task.summary.chapters_failed_by_type.entry(kind).or_insert(0) += 1;
            }
            task.chapter_statuses.insert(chapter.chapter_num, status);
            storage.put_task(task).await?;

            preceding_facts.push(fact);
        }

        self.retry_failed_chapters(gateway, storage, config, prompts, &dictionary, &world, novel_id, task, chapters, &failed_chapters)
        .await?;

        transition_task(storage, task, TaskState::Completed).await?;

        self.run_hierarchy_review(gateway, storage, config, novel_id, &mut world).await;

        Ok(())
    }

    async fn run_one_chapter(
        &self,
        gateway: &dyn LlmGateway,
        config: &PipelineConfig,
        prompts: &PromptConfig,
        dictionary: &EntityDictionary,
        world: &WorldStructure,
        preceding_facts: &[ChapterFact],
        chapter: &ChapterInput,
    ) -> ChapterFact {
        let budget = compute_budget(gateway.context_window_tokens(), gateway.is_cloud(), config.provider_family);
        let context = context_builder::build(preceding_facts, dictionary, world, &budget);

        let _permit = self.llm_semaphore.acquire().await.expect("semaphore never closed");
        let mut fact = extractor::extract(
            gateway,
            &chapter.text,
            chapter.chapter_num,
            &context,
            &prompts.system_prompt,
            &prompts.fewshot_examples,
            &budget,
        )
        .await;
        drop(_permit);

        validator::validate(&mut fact, dictionary);
        fact
    }

    /// Step 3: retry every chapter that ended the main loop `Failed`,
    /// skipping `content_policy` (never worth retrying — spec §4.4, §4.7).
    /// A chapter that succeeds on retry is recorded `RetrySuccess`.
    #[allow(clippy::too_many_arguments)]
    async fn retry_failed_chapters(
        &self,
        gateway: &dyn LlmGateway,
        storage: &dyn Storage,
        config: &PipelineConfig,
        prompts: &PromptConfig,
        dictionary: &EntityDictionary,
        world: &WorldStructure,
        novel_id: &str,
        task: &mut AnalysisTask,
        chapters: &[ChapterInput],
        failed_chapters: &[u32],
    ) -> Result<()> {
        let preceding_facts = storage.list_chapter_facts(novel_id).await?;

        for &chapter_num in failed_chapters {
            let Some(chapter) = chapters.iter().find(|c| c.chapter_num == chapter_num) else { continue };
            let Some(prior) = storage.get_chapter_fact(novel_id, chapter_num).await? else { continue };
            if prior.extraction_meta.error_type == Some(FailureKind::ContentPolicy) {
                tracing::info!(chapter_num, "skipping content_policy failure on retry");
                continue;
            }

            let fact = self
            .run_one_chapter(gateway, config, prompts, dictionary, world, &preceding_facts, chapter)
            .await;
            storage.put_chapter_fact(novel_id, &fact).await?;

            if classify_error(&fact).is_none() {
                tracing::info!(chapter_num, "retry_success");
                task.chapter_statuses.insert(chapter_num, ChapterStatus::RetrySuccess);
                task.summary.chapters_completed += 1;
                if let Some(prior_kind) = prior.extraction_meta.error_type {
                    if let Some(count) = task.summary.chapters_failed_by_type.get_mut(&prior_kind) {
                        *count = count.saturating_sub(1);
                    }
                }
                storage.put_task(task).await?;
            }
        }
        Ok(())
    }

    /// Step 4: consolidate the hierarchy and run the subtree LLM review,
    /// wrapped in `hierarchy_review_timeout_s`. On timeout, log a warning
    /// and continue non-fatally — a hierarchy-review failure never fails
    /// the run.
    async fn run_hierarchy_review(
        &self,
        gateway: &dyn LlmGateway,
        storage: &dyn Storage,
        config: &PipelineConfig,
        novel_id: &str,
        world: &mut WorldStructure,
    ) {
        let budget = compute_budget(gateway.context_window_tokens(), gateway.is_cloud(), config.provider_family);
        let timeout = Duration::from_secs(budget.hierarchy_review_timeout_s);

        let synonym_merges: Vec<SynonymMerge> = Vec::new();
        let llm_tier_hints: HashMap<String, TierClass> = HashMap::new();

        let outcome = tokio::time::timeout(timeout, async {
                hierarchy_consolidator::consolidate(world, &synonym_merges, &llm_tier_hints);
                let subtrees = hierarchy_consolidator::split_into_subtrees(world);
                hierarchy_consolidator::review_subtrees(gateway, &subtrees).await
        })
        .await;

        match outcome {
            Ok(_) => {
                if let Err(err) = storage.put_world_structure(novel_id, world).await {
                    tracing::warn!(%err, "failed to persist world structure after hierarchy review");
                }
            }
            Err(_) => {
                tracing::warn!("地点层级优化超时，已跳过");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExtractionMeta, WorldStructure};
    use crate::storage::TimingSummary;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStorage {
        facts: SyncMutex<HashMap<(String, u32), ChapterFact>>,
        dictionary: SyncMutex<Option<EntityDictionary>>,
        world: SyncMutex<Option<WorldStructure>>,
        tasks: SyncMutex<HashMap<String, AnalysisTask>>,
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn put_chapter_fact(&self, novel_id: &str, fact: &ChapterFact) -> Result<()> {
            self.facts.lock().insert((novel_id.to_string(), fact.chapter_num), fact.clone());
            Ok(())
        }
        async fn get_chapter_fact(&self, novel_id: &str, chapter_num: u32) -> Result<Option<ChapterFact>> {
            Ok(self.facts.lock().get(&(novel_id.to_string(), chapter_num)).cloned())
        }
        async fn list_chapter_facts(&self, novel_id: &str) -> Result<Vec<ChapterFact>> {
            let mut facts: Vec<ChapterFact> = self
            .facts
            .lock()
            .iter()
            .filter(|((n, _), _)| n == novel_id)
            .map(|(_, f)| f.clone())
            .collect();
            facts.sort_by_key(|f| f.chapter_num);
            Ok(facts)
        }
        async fn put_dictionary(&self, _novel_id: &str, dictionary: &EntityDictionary) -> Result<()> {
            *self.dictionary.lock() = Some(dictionary.clone());
            Ok(())
        }
        async fn get_dictionary(&self, _novel_id: &str) -> Result<Option<EntityDictionary>> {
            Ok(self.dictionary.lock().clone())
        }
        async fn put_world_structure(&self, _novel_id: &str, world: &WorldStructure) -> Result<()> {
            *self.world.lock() = Some(world.clone());
            Ok(())
        }
        async fn get_world_structure(&self, _novel_id: &str) -> Result<Option<WorldStructure>> {
            Ok(self.world.lock().clone())
        }
        async fn put_override(&self, _novel_id: &str, _entry: &crate::storage::WorldStructureOverride) -> Result<()> {
            Ok(())
        }
        async fn list_overrides(&self, _novel_id: &str) -> Result<Vec<crate::storage::WorldStructureOverride>> {
            Ok(vec![])
        }
        async fn put_map_layout(&self, _novel_id: &str, _layout: &crate::model::MapLayout) -> Result<()> {
            Ok(())
        }
        async fn get_map_layout(&self, _novel_id: &str) -> Result<Option<crate::model::MapLayout>> {
            Ok(None)
        }
        async fn put_map_override(
            &self,
            _novel_id: &str,
            _location: &str,
            _entry: &crate::storage::MapUserOverride,
        ) -> Result<()> {
            Ok(())
        }
        async fn list_map_overrides(&self, _novel_id: &str) -> Result<HashMap<String, crate::storage::MapUserOverride>> {
            Ok(HashMap::new())
        }
        async fn put_task(&self, task: &AnalysisTask) -> Result<()> {
            self.tasks.lock().insert(task.task_id.clone(), task.clone());
            Ok(())
        }
        async fn get_task(&self, task_id: &str) -> Result<Option<AnalysisTask>> {
            Ok(self.tasks.lock().get(task_id).cloned())
        }
        async fn list_running_tasks(&self) -> Result<Vec<AnalysisTask>> {
            Ok(self.tasks.lock().values().filter(|t| t.state == TaskState::Running).cloned().collect())
        }
    }

    struct StubGateway;

    #[async_trait]
    impl LlmGateway for StubGateway {
        async fn complete(
            &self,
            _messages: &[crate::gateway::Message],
            _options: &crate::gateway::CallOptions,
        ) -> Result<crate::gateway::ChatResult> {
            Ok(crate::gateway::ChatResult {
                    content: "{}".to_string(),
                    usage: None,
                    model_name: "stub".to_string(),
            })
        }
        fn context_window_tokens(&self) -> u32 {
            32_768
        }
        fn is_cloud(&self) -> bool {
            true
        }
        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn new_task(task_id: &str, novel_id: &str, start: u32, end: u32) -> AnalysisTask {
        AnalysisTask {
            task_id: task_id.to_string(),
            novel_id: novel_id.to_string(),
            state: TaskState::Pending,
            chapter_start: start,
            chapter_end: end,
            chapter_statuses: HashMap::new(),
            summary: TimingSummary::default(),
        }
    }

    #[tokio::test]
    async fn running_task_completes_all_chapters_and_transitions_to_completed() {
        let storage = MemStorage::default();
        let gateway = StubGateway;
        let config = PipelineConfig::cloud(atlas_budget::ProviderFamily::OpenAi).build();
        let prompts = PromptConfig::default();
        let mut task = new_task("t1", "novel1", 1, 3);
        let chapters = vec![
            ChapterInput { chapter_num: 1, text: "孙悟空大闹天宫".to_string() },
            ChapterInput { chapter_num: 2, text: "八戒巡山".to_string() },
            ChapterInput { chapter_num: 3, text: "沙僧挑担".to_string() },
        ];

        let orchestrator = Orchestrator::new(&config);
        orchestrator
        .run(&gateway, &storage, &config, &prompts, "novel1", "天下", &mut task, &chapters)
        .await
        .unwrap();

        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.chapter_statuses.len(), 3);
        let facts = storage.list_chapter_facts("novel1").await.unwrap();
        assert_eq!(facts.len(), 3);
    }

    #[tokio::test]
    async fn recover_stale_tasks_moves_running_back_to_paused() {
        let storage = MemStorage::default();
        let mut task = new_task("t1", "novel1", 1, 5);
        task.state = TaskState::Running;
        storage.put_task(&task).await.unwrap();

        let recovered = recover_stale_tasks(&storage).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].state, TaskState::Paused);

        let stored = storage.get_task("t1").await.unwrap().unwrap();
        assert_eq!(stored.state, TaskState::Paused);
    }

    #[tokio::test]
    async fn paused_task_stops_at_the_next_chapter_boundary() {
        let storage = MemStorage::default();
        let gateway = StubGateway;
        let config = PipelineConfig::cloud(atlas_budget::ProviderFamily::OpenAi).build();
        let prompts = PromptConfig::default();
        let mut task = new_task("t1", "novel1", 1, 3);
        task.state = TaskState::Running;
        storage.put_task(&task).await.unwrap();

        // Simulate an external pause request landing before the loop starts.
        let mut paused = task.clone();
        paused.state = TaskState::Paused;
        storage.put_task(&paused).await.unwrap();

        let chapters = vec![
            ChapterInput { chapter_num: 1, text: "第一章".to_string() },
            ChapterInput { chapter_num: 2, text: "第二章".to_string() },
        ];

        let orchestrator = Orchestrator::new(&config);
        orchestrator
        .run(&gateway, &storage, &config, &prompts, "novel1", "天下", &mut task, &chapters)
        .await
        .unwrap();

        let facts = storage.list_chapter_facts("novel1").await.unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn classify_error_reads_extraction_meta() {
        let mut fact = ChapterFact::empty(1);
        fact.extraction_meta = ExtractionMeta {
            is_truncated: false,
            segment_count: 1,
            error_type: Some(FailureKind::Timeout),
            elapsed_ms: 0,
        };
        assert_eq!(classify_error(&fact), Some(FailureKind::Timeout));
    }
}
