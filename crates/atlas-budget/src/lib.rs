//! # Budget Planner
//!
//! Computes the context-window-dependent limits every downstream LLM call in
//! the extraction pipeline is bound by: chapter truncation sizes, few-shot
//! example counts, per-entity injection caps for the context summary, and
//! review timeouts.
//!
//! Values are linearly interpolated between two calibrated points —
//! `8192` tokens ("local conservative") and `131072` tokens ("cloud
//! generous") — and clamped at each end. Local (non-cloud) providers have
//! their context window capped at `16384` regardless of what they report,
//! to avoid KV-cache thrashing on consumer GPUs.
//!
//! ```
//! use atlas_budget::{compute_budget, ProviderFamily};
//!
//! let budget = compute_budget(8192, false, ProviderFamily::Ollama);
//! assert_eq!(budget.fewshot_example_count, 1);
//! ```

mod error;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// The provider family a context window was detected from.
///
/// `Anthropic` is called out specially because the Gateway's context-window
/// probe (see `atlas-core::gateway`) has no reliable introspection endpoint
/// for it and instead defaults to its documented window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// Anthropic Claude models — context window defaults to 200,000 tokens
    /// when not otherwise detected.
    Anthropic,
    /// OpenAI and OpenAI-compatible (Azure, most cloud aggregators) models.
    OpenAi,
    /// Locally-hosted models served through Ollama or an equivalent runtime.
    Ollama,
    /// Any other provider family; treated the same as `OpenAi` for budgeting.
    Other,
}

/// Anthropic's documented context window, used when the Gateway cannot
/// introspect it directly.
pub const ANTHROPIC_DEFAULT_CONTEXT_WINDOW: u32 = 200_000;

/// Local providers never budget past this many tokens, no matter what the
/// model reports, to keep KV-cache memory bounded on consumer GPUs.
pub const LOCAL_CONTEXT_WINDOW_CAP: u32 = 16_384;

const CALIBRATION_LOW_CTX: f64 = 8_192.0;
const CALIBRATION_HIGH_CTX: f64 = 131_072.0;

/// Number of macro hubs (uber-root direct children with >= 3 descendants)
/// shown in the context summary. Fixed regardless of budget.
pub const MACRO_HUB_TOP_K: usize = 8;

/// Hierarchy-review soft timeout in seconds. Fixed regardless of budget.
pub const HIERARCHY_REVIEW_TIMEOUT_S: u64 = 60;

/// Subtree-review soft timeout in seconds. Fixed regardless of budget.
pub const SUBTREE_REVIEW_TIMEOUT_S: u64 = 45;

/// Per-entity injection caps for one context-summary section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionCaps {
    /// Maximum dictionary characters (persons) injected.
    pub characters: usize,
    /// Maximum relation records injected.
    pub relations: usize,
    /// Maximum known locations injected.
    pub locations: usize,
    /// Maximum items injected.
    pub items: usize,
}

/// The full set of limits every downstream call in one analysis run is
/// bound by. Recomputed (via [`compute_budget`]) whenever the model or mode
/// changes — see `atlas-core`'s orchestrator for the `update_on_model_change`
/// hook that owns this recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    /// Effective context window this budget was computed for, after the
    /// local-provider cap has been applied.
    pub effective_context_window: u32,
    /// Maximum characters of chapter text sent to the LLM before
    /// segmentation kicks in.
    pub max_chapter_chars: usize,
    /// Characters to re-truncate to on a parse-failure retry.
    pub retry_chars: usize,
    /// Whether oversized chapters may be segmented at paragraph boundaries.
    pub segment_enabled: bool,
    /// `num_ctx`-style context length to request from the model itself.
    pub extraction_num_ctx: u32,
    /// 1 for context windows <= 16384, 2 otherwise.
    pub fewshot_example_count: u8,
    /// Maximum characters in the assembled context-summary string.
    pub context_max_chars: usize,
    /// Per-section entity injection caps for the context summary.
    pub injection_caps: InjectionCaps,
    /// Fixed at [`MACRO_HUB_TOP_K`].
    pub macro_hub_top_k: usize,
    /// Maximum depth of `child -> parent -> grandparent` hierarchy chains
    /// shown in the context summary.
    pub hierarchy_chain_depth: usize,
    /// Maximum tokens for a world-structure LLM call (macro skeleton,
    /// subtree review).
    pub ws_max_tokens: u32,
    /// Soft timeout in seconds for a single world-structure LLM call.
    pub ws_timeout_s: u64,
    /// Fixed at [`HIERARCHY_REVIEW_TIMEOUT_S`].
    pub hierarchy_review_timeout_s: u64,
    /// Fixed at [`SUBTREE_REVIEW_TIMEOUT_S`].
    pub subtree_review_timeout_s: u64,
    /// Maximum characters of chapter text considered when inferring the
    /// primary scene setting.
    pub scene_max_chapter_chars: usize,
}

fn lerp(low: f64, high: f64, t: f64) -> f64 {
    low + (high - low) * t
}

fn lerp_usize(low: usize, high: usize, t: f64) -> usize {
    lerp(low as f64, high as f64, t).round() as usize
}

fn lerp_u32(low: u32, high: u32, t: f64) -> u32 {
    lerp(low as f64, high as f64, t).round() as u32
}

/// Compute the [`Budget`] for a call context.
///
/// `context_window_tokens` is the raw value the Gateway detected (or a
/// fallback). `is_cloud` distinguishes a cloud API call from a locally
/// hosted model; non-cloud windows are capped at [`LOCAL_CONTEXT_WINDOW_CAP`]
/// before anything else happens. `provider_family` only affects the default
/// used when the caller has no better number for Anthropic.
#[must_use]
pub fn compute_budget(
    context_window_tokens: u32,
    is_cloud: bool,
    provider_family: ProviderFamily,
) -> Budget {
    let raw = if context_window_tokens == 0 && matches!(provider_family, ProviderFamily::Anthropic) {
        ANTHROPIC_DEFAULT_CONTEXT_WINDOW
    } else {
        context_window_tokens
    };

    let effective = if is_cloud {
        raw
    } else {
        raw.min(LOCAL_CONTEXT_WINDOW_CAP)
    };

    // Clamp the interpolation fraction to [0, 1] so a window far outside the
    // calibrated range still produces a sane (clamped) budget rather than
    // extrapolating past the generous end.
    let t = ((f64::from(effective) - CALIBRATION_LOW_CTX) / (CALIBRATION_HIGH_CTX - CALIBRATION_LOW_CTX)).clamp(0.0, 1.0);

    let max_chapter_chars = lerp_usize(3_000, 12_000, t);

    Budget {
        effective_context_window: effective,
        max_chapter_chars,
        retry_chars: lerp_usize(1_500, 6_000, t),
        // Large context windows still benefit from segmentation for chapters
        // that genuinely run long (epic-length set pieces); the donor's
        // calibration only shrinks how *often* it triggers, never disables it.
        segment_enabled: true,
        extraction_num_ctx: effective,
        fewshot_example_count: if effective <= 16_384 { 1 } else { 2 },
        context_max_chars: lerp_usize(2_000, 12_000, t),
        injection_caps: InjectionCaps {
            characters: lerp_usize(30, 80, t),
            relations: lerp_usize(20, 60, t),
            locations: lerp_usize(20, 60, t),
            items: lerp_usize(15, 50, t),
        },
        macro_hub_top_k: MACRO_HUB_TOP_K,
        hierarchy_chain_depth: lerp_usize(2, 5, t),
        ws_max_tokens: lerp_u32(1_024, 8_192, t),
        ws_timeout_s: lerp_u32(30, 90, t) as u64,
        hierarchy_review_timeout_s: HIERARCHY_REVIEW_TIMEOUT_S,
        subtree_review_timeout_s: SUBTREE_REVIEW_TIMEOUT_S,
        scene_max_chapter_chars: lerp_usize(1_500, 6_000, t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_conservative_endpoint() {
        let b = compute_budget(8_192, false, ProviderFamily::Ollama);
        assert_eq!(b.max_chapter_chars, 3_000);
        assert_eq!(b.fewshot_example_count, 1);
        assert_eq!(b.hierarchy_review_timeout_s, 60);
        assert_eq!(b.subtree_review_timeout_s, 45);
    }

    #[test]
    fn cloud_generous_endpoint() {
        let b = compute_budget(131_072, true, ProviderFamily::OpenAi);
        assert_eq!(b.max_chapter_chars, 12_000);
        assert_eq!(b.fewshot_example_count, 2);
    }

    #[test]
    fn local_provider_is_capped_before_interpolation() {
        // A local model self-reporting a huge window must still be treated
        // as if it were 16384.
        let capped = compute_budget(131_072, false, ProviderFamily::Ollama);
        let at_cap = compute_budget(16_384, false, ProviderFamily::Ollama);
        assert_eq!(capped, at_cap);
        assert_eq!(capped.effective_context_window, LOCAL_CONTEXT_WINDOW_CAP);
    }

    #[test]
    fn anthropic_defaults_to_200k_when_undetected() {
        let b = compute_budget(0, true, ProviderFamily::Anthropic);
        assert_eq!(b.effective_context_window, ANTHROPIC_DEFAULT_CONTEXT_WINDOW);
    }

    #[test]
    fn fewshot_invariant_holds_at_the_boundary() {
        // fewshot_example_count == 1 iff ctx <= 16384.
        for ctx in [1, 8_192, 16_384, 16_385, 20_000, 131_072] {
            let b = compute_budget(ctx, true, ProviderFamily::OpenAi);
            let expect_one = ctx <= 16_384;
            assert_eq!(b.fewshot_example_count == 1, expect_one, "ctx={ctx}");
        }
    }

    #[test]
    fn out_of_range_window_clamps_rather_than_extrapolates() {
        let beyond = compute_budget(1_000_000, true, ProviderFamily::OpenAi);
        let at_high = compute_budget(131_072, true, ProviderFamily::OpenAi);
        assert_eq!(beyond.max_chapter_chars, at_high.max_chapter_chars);
    }
}
