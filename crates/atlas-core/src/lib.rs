//! # atlas-core
//!
//! The extraction, aggregation, and world-construction pipeline for
//! long-form Chinese fiction: chapter-fact extraction, alias resolution,
//! location-hierarchy construction, and 2D map layout.
//!
//! Components, in dependency order (leaves first):
//!
//! - [`gateway`] — the provider-agnostic [`gateway::LlmGateway`] trait
//!   (C2). Concrete providers live in the sibling `atlas-llm-*` crates.
//! - [`segmenter`] — Chinese word segmentation (`TextSegmenter`).
//! - [`suffix`] — the name-suffix tier table driving direction validation.
//! - [`retry`] — the shared retry policy (C4 §4.4, C7 §4.7).
//! - [`prescan`] — the Entity Pre-Scanner (C3, §4.3).
//! - [`extractor`] — the Fact Extractor (C4, §4.4).
//! - [`validator`] — the Fact Validator (C5, §4.5).
//! - [`context_builder`] — the Context Summary Builder (C6, §4.6).
//! - [`orchestrator`] — the Analysis Orchestrator (C7, §4.7).
//! - [`alias_resolver`] — the Alias Resolver (C8, §4.8).
//! - [`aggregator`] — the Entity Aggregator (C9, §4.9).
//! - [`world_structure`] — the World Structure Agent's parent-vote
//!   accumulation and resolution algorithm (C10, §4.10).
//! - [`hierarchy_consolidator`] — consolidation and subtree LLM review
//!   (C11, §4.11).
//! - [`map_layout`] — the Map Layout Engine (C12, §4.12).
//! - [`geo`] — geographic dataset selection and gazetteer tiering.
//! - [`storage`] — the `Storage`/`VectorStore`/`GeoGazetteer` consumed
//! interfaces and the persisted-state shapes they operate over.
//! - [`model`] — the shared data model.
//! - [`config`] — [`config::PipelineConfig`].
//! - [`error`] — the crate-wide error type and §7 failure taxonomy.

pub mod aggregator;
pub mod alias_resolver;
pub mod config;
pub mod context_builder;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod geo;
pub mod hierarchy_consolidator;
pub mod map_layout;
pub mod model;
pub mod orchestrator;
pub mod prescan;
pub mod retry;
pub mod segmenter;
pub mod storage;
pub mod suffix;
pub mod validator;
pub mod world_structure;

pub use error::{Error, FailureKind, Result};
