//! The Entity Pre-Scanner: mines a novel's full text for
//! candidate entity names before per-chapter extraction begins, then
//! classifies the survivors with one batched LLM call per ~100 candidates.

use crate::error::Result;
use crate::gateway::{CallOptions, LlmGateway, Message};
use crate::model::{DictEntry, EntityDictionary, EntitySource, EntityType};
use crate::segmenter::{is_candidate_token, TextSegmenter};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// How many candidates a single classification call covers.
pub const CLASSIFICATION_BATCH_SIZE: usize = 100;

/// Only the top-scoring candidates by frequency are sent for
/// classification, except naming-source candidates which bypass this cut
/// entirely.
pub const TOP_CANDIDATE_CUT: usize = 500;

/// Verbs that commonly introduce reported speech, used to harvest speaker
/// names from the token preceding them.
const DIALOGUE_VERBS: [&str; 3] = ["说道", "道", "喝道"];

/// Naming-pattern phrases after which the following span up to the next
/// punctuation mark is a naming-source candidate.
const NAMING_PATTERN_MARKERS: [&str; 6] = ["叫作", "名叫", "绰号", "人称", "号曰", "自称"];

fn naming_pattern_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
            let alternation = NAMING_PATTERN_MARKERS.join("|");
            Regex::new(&format!(r"(?:{alternation})([^，。！？；：\s]{{1,12}})"))
            .expect("naming pattern regex is a fixed valid pattern")
    })
}

/// Raw per-candidate statistics accumulated by the mining passes, before
/// LLM classification.
#[derive(Debug, Clone)]
struct CandidateStats {
    frequency: u64,
    source: EntitySource,
}

/// Step 1: accumulate frequency of candidate tokens (length >= 2,
/// name-like POS or numeral-prefix recovered).
fn mine_segmentation_frequency(tokens: &[crate::segmenter::Token]) -> HashMap<String, u64> {
    let mut freq = HashMap::new();
    for token in tokens {
        if is_candidate_token(token) {
            *freq.entry(token.text.clone()).or_insert(0) += 1;
        }
    }
    freq
}

/// Step 2: harvest the token immediately preceding a dialogue verb as a
/// speaker-name candidate.
fn mine_dialogue_speakers(tokens: &[crate::segmenter::Token]) -> HashSet<String> {
    let mut speakers = HashSet::new();
    for window in tokens.windows(2) {
        let [candidate, verb] = window else { continue };
        if DIALOGUE_VERBS.contains(&verb.text.as_str()) && candidate.char_len() >= 2 {
            speakers.insert(candidate.text.clone());
        }
    }
    speakers
}

/// Step 3: collect candidate tokens whose suffix is in the tier table, as
/// place/org name candidates.
fn mine_suffix_patterns(tokens: &[crate::segmenter::Token]) -> HashSet<String> {
    tokens
    .iter()
    .filter(|t| t.char_len() >= 2 && crate::suffix::suffix_rank(&t.text).is_some())
    .map(|t| t.text.clone())
    .collect()
}

/// Step 4: naming-pattern regex extraction over the original (unsegmented)
/// text. These candidates bypass the top-N cut entirely.
fn mine_naming_pattern_candidates(text: &str) -> HashSet<String> {
    naming_pattern_regex()
    .captures_iter(text)
    .filter_map(|c| c.get(1))
    .map(|m| m.as_str().to_string())
    .filter(|s| s.chars().count() >= 2)
    .collect()
}

/// Step 5: candidate merge. For any pair where `long` is exactly `short`
/// with one extra leading character (the numeral-nickname case, e.g.
/// "二愣子"/"愣子"), delete the short form and transfer its frequency to
/// the long form.
fn merge_short_into_long_forms(freq: &mut HashMap<String, u64>) {
    let candidates: Vec<String> = freq.keys().cloned().collect();
    let mut transfers: Vec<(String, String, u64)> = Vec::new();

    for long in &candidates {
        let mut chars = long.chars();
        let Some(_first) = chars.next() else { continue };
        let short: String = chars.collect();
        if short.chars().count() < 2 {
            continue;
        }
        if let Some(&short_freq) = freq.get(&short) {
            transfers.push((short, long.clone(), short_freq));
        }
    }

    for (short, long, short_freq) in transfers {
        *freq.entry(long).or_insert(0) += short_freq;
        freq.remove(&short);
    }
}

/// Run every mining pass and fold the results into one candidate table,
/// then apply the short/long merge. Naming-source candidates are tracked
/// separately so they can bypass the frequency cut in [`select_for_classification`].
fn mine_all(
    segmenter: &dyn TextSegmenter,
    text: &str,
) -> (HashMap<String, CandidateStats>, HashSet<String>) {
    let tokens = segmenter.segment(text);
    let mut freq = mine_segmentation_frequency(&tokens);
    for speaker in mine_dialogue_speakers(&tokens) {
        *freq.entry(speaker).or_insert(0) += 1;
    }
    for suffixed in mine_suffix_patterns(&tokens) {
        *freq.entry(suffixed).or_insert(0) += 1;
    }
    merge_short_into_long_forms(&mut freq);

    let naming_sources = mine_naming_pattern_candidates(text);
    let mut stats: HashMap<String, CandidateStats> = freq
    .into_iter()
    .map(|(name, frequency)| (name, CandidateStats { frequency, source: EntitySource::Stats }))
    .collect();
    for name in &naming_sources {
        stats
        .entry(name.clone())
        .and_modify(|s| s.source = EntitySource::NamingPattern)
        .or_insert(CandidateStats { frequency: 1, source: EntitySource::NamingPattern });
    }
    (stats, naming_sources)
}

/// Select which candidates go to classification: naming-source candidates
/// always survive; the rest are cut to the top [`TOP_CANDIDATE_CUT`] by
/// frequency.
fn select_for_classification(stats: &HashMap<String, CandidateStats>) -> Vec<String> {
    let mut naming_sources: Vec<&String> = stats
    .iter()
    .filter(|(_, s)| s.source == EntitySource::NamingPattern)
    .map(|(name, _)| name)
    .collect();
    naming_sources.sort();

    let mut ranked: Vec<(&String, u64)> = stats
    .iter()
    .filter(|(_, s)| s.source == EntitySource::Stats)
    .map(|(name, s)| (name, s.frequency))
    .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let mut selected: Vec<String> = naming_sources.into_iter().cloned().collect();
    for (name, _) in ranked.into_iter().take(TOP_CANDIDATE_CUT) {
        if !selected.contains(name) {
            selected.push(name.clone());
        }
    }
    selected
}

/// A batch classification verdict for one candidate name: its entity type
/// and any alias suggestions, or `None` if the LLM rejected it as not a
/// real entity.
pub type ClassificationVerdict = Option<(EntityType, Vec<String>)>;

/// Classify one batch of candidates with a single LLM call, parsing a
/// `{name: {type, aliases}}` JSON object out of the response. Invalid
/// `type` values are dropped per candidate rather than failing the batch.
async fn classify_batch(
    gateway: &dyn LlmGateway,
    batch: &[String],
) -> Result<HashMap<String, ClassificationVerdict>> {
    let prompt = format!(
        "Classify each of the following candidate names into exactly one of \
        person, location, item, org, concept. Respond with a JSON object \
        mapping each name to {{\"type\":..., \"aliases\": [...]}}. Reject \
                names that are not real entities by omitting them.\n\nCandidates: {}",
                batch.join("、")
            );
            let result = gateway
            .complete(&[Message::human(prompt)], &CallOptions::default())
            .await?;

            #[derive(serde::Deserialize)]
            struct RawVerdict {
                #[serde(rename = "type")]
                entity_type: String,
                #[serde(default)]
                aliases: Vec<String>,
            }

            let parsed: HashMap<String, RawVerdict> =
            serde_json::from_str(&result.content).unwrap_or_default();

            let mut verdicts = HashMap::new();
            for name in batch {
                let verdict = parsed.get(name).and_then(|raw| {
                        let entity_type = match raw.entity_type.as_str() {
                            "person" => EntityType::Person,
                            "location" => EntityType::Location,
                            "item" => EntityType::Item,
                            "org" => EntityType::Org,
                            "concept" => EntityType::Concept,
                            _ => return None,
                        };
                        Some((entity_type, raw.aliases.clone()))
                });
                verdicts.insert(name.clone(), verdict);
            }
            Ok(verdicts)
        }

        /// Run the full Pre-Scanner pipeline over a novel's concatenated text and
        /// produce its [`EntityDictionary`].
        pub async fn run_prescan(
            gateway: &dyn LlmGateway,
            segmenter: &dyn TextSegmenter,
            full_text: &str,
        ) -> Result<EntityDictionary> {
            let (stats, naming_sources) = mine_all(segmenter, full_text);
            let selected = select_for_classification(&stats);

            let mut dictionary = EntityDictionary::new();
            for batch in selected.chunks(CLASSIFICATION_BATCH_SIZE) {
                let verdicts = classify_batch(gateway, batch).await?;
                for name in batch {
                    let Some(Some((entity_type, aliases))) = verdicts.get(name).map(Clone::clone) else {
                        continue;
                    };
                    let frequency = stats.get(name).map_or(0, |s| s.frequency);
                    let source = if naming_sources.contains(name) {
                        EntitySource::NamingPattern
                    } else {
                        EntitySource::Stats
                    };
                    dictionary.insert(
                        name.clone(),
                        DictEntry {
                            entity_type,
                            aliases: aliases.into_iter().collect(),
                            frequency,
                            source,
                        },
                    );
                }
            }
            Ok(dictionary)
        }
