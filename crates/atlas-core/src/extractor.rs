//! The Fact Extractor: turns one chapter's raw text into a
//! [`ChapterFact`], truncating and segmenting oversized chapters and
//! retrying transient failures exactly once.

use crate::error::{Error, FailureKind, Result};
use crate::gateway::{CallOptions, LlmGateway, Message};
use crate::model::{
    Character, CharacterRelation, ChapterFact, DomainRecord, ExtractionMeta, LocationRecord,
    SpatialRelationship,
};
use atlas_budget::Budget;
use std::collections::HashSet;
use std::time::Instant;

/// The shape an extraction call's JSON response is parsed into, before
/// being folded into a [`ChapterFact`]. Mirrors `ChapterFact` minus
/// `chapter_num`/`extraction_meta`, which the extractor fills in itself.
#[derive(Debug, Default, serde::Deserialize)]
struct RawExtraction {
    #[serde(default)]
    characters: Vec<Character>,
    #[serde(default)]
    locations: Vec<LocationRecord>,
    #[serde(default)]
    spatial_relationships: Vec<SpatialRelationship>,
    #[serde(default)]
    character_relations: Vec<CharacterRelation>,
    #[serde(default)]
    item_events: Vec<DomainRecord>,
    #[serde(default)]
    org_events: Vec<DomainRecord>,
    #[serde(default)]
    events: Vec<DomainRecord>,
    #[serde(default)]
    new_concepts: Vec<DomainRecord>,
}

/// Truncate `text` to at most `max_chars` Chinese characters.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

fn assemble_prompt(
    system_prompt: &str,
    fewshot_examples: &[String],
    fewshot_example_count: usize,
    prior_context: &str,
    segment_text: &str,
) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];
    for example in fewshot_examples.iter().take(fewshot_example_count) {
        messages.push(Message::assistant(example.clone()));
    }
    if !prior_context.is_empty() {
        messages.push(Message::system(prior_context));
    }
    messages.push(Message::human(segment_text));
    messages
}

/// Call the gateway once for `segment_text`, parsing the response as JSON.
/// A parse failure is surfaced as `FailureKind::ParseError`; an HTTP/API
/// failure comes back already classified by the gateway implementation.
async fn extract_segment(
    gateway: &dyn LlmGateway,
    system_prompt: &str,
    fewshot_examples: &[String],
    fewshot_example_count: usize,
    prior_context: &str,
    segment_text: &str,
    max_tokens: u32,
) -> Result<RawExtraction> {
    let messages = assemble_prompt(
        system_prompt,
        fewshot_examples,
        fewshot_example_count,
        prior_context,
        segment_text,
    );
    let options = CallOptions { max_tokens,..CallOptions::default() };
    let chat_result = gateway.complete(&messages, &options).await?;

    serde_json::from_str(&chat_result.content).map_err(|_| Error::Llm {
            kind: FailureKind::ParseError,
            message: format!("could not parse extraction response: {}", chat_result.content),
    })
}

/// Fold the deduplicated union of every segment's raw extraction into one
/// [`ChapterFact`] body.
fn union_segments(chapter_num: u32, segments: Vec<RawExtraction>) -> ChapterFact {
    let mut fact = ChapterFact::empty(chapter_num);

    let mut seen_characters = HashSet::new();
    let mut seen_locations = HashSet::new();
    let mut seen_relations = HashSet::new();
    let mut seen_character_relations = HashSet::new();
    let mut seen_items = HashSet::new();
    let mut seen_orgs = HashSet::new();
    let mut seen_events = HashSet::new();
    let mut seen_concepts = HashSet::new();

    for segment in segments {
        for character in segment.characters {
            if seen_characters.insert((character.name.clone(), chapter_num)) {
                fact.characters.push(character);
            }
        }
        for location in segment.locations {
            if seen_locations.insert((location.name.clone(), chapter_num)) {
                fact.locations.push(location);
            }
        }
        for relation in segment.spatial_relationships {
            let key = (relation.source.clone(), relation.target.clone(), relation.relation_type as u8 as u32);
            if seen_relations.insert(key) {
                fact.spatial_relationships.push(relation);
            }
        }
        for relation in segment.character_relations {
            let key = (relation.person_a.clone(), relation.person_b.clone(), relation.relation_type.clone());
            if seen_character_relations.insert(key) {
                fact.character_relations.push(relation);
            }
        }
        for record in segment.item_events {
            if seen_items.insert((record.name.clone(), record.chapter)) {
                fact.item_events.push(record);
            }
        }
        for record in segment.org_events {
            if seen_orgs.insert((record.name.clone(), record.chapter)) {
                fact.org_events.push(record);
            }
        }
        for record in segment.events {
            if seen_events.insert((record.name.clone(), record.chapter)) {
                fact.events.push(record);
            }
        }
        for record in segment.new_concepts {
            if seen_concepts.insert((record.name.clone(), record.chapter)) {
                fact.new_concepts.push(record);
            }
        }
    }

    fact
}

/// Extract one chapter's [`ChapterFact`], implementing the full protocol:
/// truncation, segmentation of oversized chapters, retry-once on transient
/// failure with a smaller `retry_chars` window, and content-policy
/// failures recorded rather than retried.
#[allow(clippy::too_many_arguments)]
pub async fn extract(
    gateway: &dyn LlmGateway,
    chapter_text: &str,
    chapter_num: u32,
    prior_context: &str,
    system_prompt: &str,
    fewshot_examples: &[String],
    budget: &Budget,
) -> ChapterFact {
    let started = Instant::now();
    let char_count = chapter_text.chars().count();
    let is_truncated = char_count > budget.max_chapter_chars;
    let truncated_text = truncate_chars(chapter_text, budget.max_chapter_chars);

    let segments: Vec<String> = if is_truncated && budget.segment_enabled {
        atlas_text_chunking::segment_chapter(truncated_text, budget.max_chapter_chars)
        .map(|segs| segs.into_iter().map(|s| s.text).collect())
        .unwrap_or_else(|_| vec![truncated_text.to_string()])
    } else {
        vec![truncated_text.to_string()]
    };
    let segment_count = segments.len().max(1) as u32;

    let mut raw_segments = Vec::with_capacity(segments.len());
    let mut error_type = None;

    for segment_text in &segments {
        let first_attempt = extract_segment(
            gateway,
            system_prompt,
            fewshot_examples,
            budget.fewshot_example_count,
            prior_context,
            segment_text.as_str(),
            budget.ws_max_tokens,
        )
        .await;

        match first_attempt {
            Ok(raw) => raw_segments.push(raw),
            Err(err) => {
                let kind = err.failure_kind();
                if kind == FailureKind::ContentPolicy {
                    error_type = Some(kind);
                    continue;
                }
                if !kind.is_transient() {
                    error_type = Some(kind);
                    continue;
                }
                let retry_text = truncate_chars(segment_text, budget.retry_chars);
                match extract_segment(
                    gateway,
                    system_prompt,
                    fewshot_examples,
                    budget.fewshot_example_count,
                    prior_context,
                    retry_text,
                    budget.ws_max_tokens,
                )
                .await
                {
                    Ok(raw) => raw_segments.push(raw),
                    Err(retry_err) => error_type = Some(retry_err.failure_kind()),
                }
            }
        }
    }

    let mut fact = union_segments(chapter_num, raw_segments);
    fact.extraction_meta = ExtractionMeta {
        is_truncated,
        segment_count,
        error_type,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    fact
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_respects_character_boundaries_not_bytes() {
        let text = "孙悟空大闹天宫";
        assert_eq!(truncate_chars(text, 3), "孙悟空");
    }

    #[test]
    fn truncate_chars_is_noop_when_text_is_shorter() {
        let text = "悟空";
        assert_eq!(truncate_chars(text, 10), "悟空");
    }

    #[test]
    fn union_segments_deduplicates_characters_by_name_and_chapter() {
        let mut a = RawExtraction::default();
        a.characters.push(Character { name: "孙悟空".into(),..Default::default() });
        let mut b = RawExtraction::default();
        b.characters.push(Character { name: "孙悟空".into(),..Default::default() });
        let fact = union_segments(1, vec![a, b]);
        assert_eq!(fact.characters.len(), 1);
    }

    #[test]
    fn union_segments_deduplicates_domain_records_by_name_and_chapter() {
        let mut a = RawExtraction::default();
        a.events.push(DomainRecord { name: "大闹天宫".into(), chapter: 7, description: "x".into() });
        let mut b = RawExtraction::default();
        b.events.push(DomainRecord { name: "大闹天宫".into(), chapter: 7, description: "y".into() });
        let fact = union_segments(7, vec![a, b]);
        assert_eq!(fact.events.len(), 1);
    }
}
