//! Pipeline-wide configuration, injected rather than read from a process
//! global (see spec §9 "Global mutable state").

use atlas_budget::ProviderFamily;
use std::env;

/// Read an environment variable, falling back to a default when unset —
/// the same pattern the donor codebase's provider crates use to avoid
/// hard-coding credentials (`env_string_or_default`).
#[must_use]
pub fn env_string_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// The genre hint a caller can supply to short-circuit geo-type detection
/// and to steer the macro-skeleton pre-generation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenreHint {
    /// Fantasy or wuxia/xianxia settings — geo type short-circuits to
    /// `fantasy` regardless of gazetteer match rate.
    Fantasy,
    /// Xianxia specifically; treated identically to `Fantasy` for geo type.
    Xianxia,
    /// Contemporary or historical settings grounded in the real world.
    Realistic,
    /// No hint supplied; geo type is decided purely from gazetteer matches.
    #[default]
    Unknown,
}

/// Canvas dimensions the Map Layout Engine lays locations out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    /// Canvas width in layout units.
    pub width: u32,
    /// Canvas height in layout units.
    pub height: u32,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1600,
            height: 900,
        }
    }
}

/// Pipeline-wide configuration, built once per analysis run and threaded
/// through every component rather than read from a global.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Whether the configured LLM provider is a cloud API (affects both the
    /// Budget Planner's context-window cap and whether subtree reviews run
    /// concurrently or sequentially — spec §4.11).
    pub is_cloud: bool,
    /// The provider family, used by the Budget Planner's Anthropic default.
    pub provider_family: ProviderFamily,
    /// Optional genre hint for geo-type short-circuiting.
    pub genre_hint: GenreHint,
    /// Map canvas dimensions.
    pub canvas: Canvas,
    /// Concurrent LLM calls permitted per novel. Spec §5 fixes this at 1 in
    /// production; only test harnesses fanning out independent novels in
    /// parallel should raise it.
    pub llm_concurrency: usize,
}

impl PipelineConfig {
    /// Start building a config for a cloud provider.
    #[must_use]
    pub fn cloud(provider_family: ProviderFamily) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(true, provider_family)
    }

    /// Start building a config for a locally hosted provider.
    #[must_use]
    pub fn local(provider_family: ProviderFamily) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(false, provider_family)
    }
}

/// Builder for [`PipelineConfig`], mirroring the donor provider crates'
/// `with_*` builder style (`ChatOpenAI::with_model`, etc.).
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    is_cloud: bool,
    provider_family: ProviderFamily,
    genre_hint: GenreHint,
    canvas: Canvas,
    llm_concurrency: usize,
}

impl PipelineConfigBuilder {
    fn new(is_cloud: bool, provider_family: ProviderFamily) -> Self {
        Self {
            is_cloud,
            provider_family,
            genre_hint: GenreHint::Unknown,
            canvas: Canvas::default(),
            llm_concurrency: 1,
        }
    }

    /// Set the genre hint.
    #[must_use]
    pub fn genre_hint(mut self, hint: GenreHint) -> Self {
        self.genre_hint = hint;
        self
    }

    /// Override the map canvas dimensions.
    #[must_use]
    pub fn canvas(mut self, width: u32, height: u32) -> Self {
        self.canvas = Canvas { width, height };
        self
    }

    /// Override LLM call concurrency. Production code should never call
    /// this — it exists for test harnesses exercising multiple novels at
    /// once without serializing on a single semaphore.
    #[must_use]
    pub fn llm_concurrency(mut self, n: usize) -> Self {
        self.llm_concurrency = n.max(1);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> PipelineConfig {
        PipelineConfig {
            is_cloud: self.is_cloud,
            provider_family: self.provider_family,
            genre_hint: self.genre_hint,
            canvas: self.canvas,
            llm_concurrency: self.llm_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_canvas_matches_spec() {
        let cfg = PipelineConfig::cloud(ProviderFamily::OpenAi).build();
        assert_eq!(cfg.canvas.width, 1600);
        assert_eq!(cfg.canvas.height, 900);
    }

    #[test]
    fn default_concurrency_is_one() {
        let cfg = PipelineConfig::local(ProviderFamily::Ollama).build();
        assert_eq!(cfg.llm_concurrency, 1);
    }

    #[test]
    fn env_string_or_default_falls_back() {
        assert_eq!(env_string_or_default("ATLAS_DOES_NOT_EXIST_XYZ", "fallback"), "fallback");
    }
}
