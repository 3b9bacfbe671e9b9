//! Chinese word segmentation with part-of-speech tags, feeding the Entity
//! Pre-Scanner's frequency pass.

/// One segmented token with its part-of-speech tag, in the `jieba`
/// tagging convention (`n` noun, `v` verb, `nr` person name, `ns` place
/// name,...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token's surface text.
    pub text: String,
    /// The tagger's part-of-speech label.
    pub pos: String,
}

impl Token {
    /// Token length in Chinese characters (not bytes) — the length
    /// threshold the Pre-Scanner's frequency pass filters on.
    #[must_use]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// The numerals whose presence as a token's first character exempts it
/// from POS filtering: nicknames like "二愣子" are
/// frequently mis-tagged as verbs by general-purpose segmenters.
pub const NUMERAL_POS_RECOVERY_PREFIXES: [char; 10] =
['一', '二', '三', '四', '五', '六', '七', '八', '九', '十'];

/// POS tags the Pre-Scanner treats as plausible entity-name candidates.
/// Conservative middle ground between jieba's full tagset and a
/// strict person/place-only filter — letting through generic nouns (`n`)
/// catches items, concepts, and orgs that person/place tags alone miss.
const CANDIDATE_POS_TAGS: [&str; 5] = ["nr", "ns", "nt", "n", "nz"];

/// Whether `token` should be retained as an entity-name candidate by the
/// Pre-Scanner's frequency pass: either its POS tag looks like a name, or
/// it qualifies for numeral-prefix POS recovery.
#[must_use]
pub fn is_candidate_token(token: &Token) -> bool {
    if token.char_len() < 2 {
        return false;
    }
    if CANDIDATE_POS_TAGS.contains(&token.pos.as_str()) {
        return true;
    }
    token
    .text
    .chars()
    .next()
    .is_some_and(|c| NUMERAL_POS_RECOVERY_PREFIXES.contains(&c))
}

/// A Chinese word segmenter with POS tagging. Abstracted behind a trait so
/// the Pre-Scanner never depends on a specific backend directly — mirrors
/// how the gateway crates are kept behind [`crate::gateway::LlmGateway`].
pub trait TextSegmenter: Send + Sync {
    /// Segment `text` into tagged tokens.
    fn segment(&self, text: &str) -> Vec<Token>;
}

/// The default segmenter backend, built on `jieba-rs`'s HMM-augmented
/// dictionary tagger.
#[cfg(feature = "segmenter-jieba")]
pub struct JiebaSegmenter {
    jieba: jieba_rs::Jieba,
}

#[cfg(feature = "segmenter-jieba")]
impl JiebaSegmenter {
    /// Build a segmenter from jieba's bundled default dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self { jieba: jieba_rs::Jieba::new() }
    }
}

#[cfg(feature = "segmenter-jieba")]
impl Default for JiebaSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "segmenter-jieba")]
impl TextSegmenter for JiebaSegmenter {
    fn segment(&self, text: &str) -> Vec<Token> {
        self.jieba
        .tag(text, true)
        .into_iter()
        .map(|t| Token { text: t.word.to_string(), pos: t.tag.to_string() })
        .collect()
    }
}

/// A dependency-free fallback segmenter used by tests and by
/// `atlas-testing`'s mocks: splits on whitespace and CJK punctuation,
/// tagging every token `"n"`. Not a substitute for a real tagger in
/// production — registered only when the `segmenter-jieba` feature is off.
#[derive(Debug, Default)]
pub struct WhitespaceSegmenter;

impl TextSegmenter for WhitespaceSegmenter {
    fn segment(&self, text: &str) -> Vec<Token> {
        text.split(|c: char| c.is_whitespace() || "，。！？、；：\n".contains(c))
        .filter(|s| !s.is_empty())
        .map(|s| Token { text: s.to_string(), pos: "n".to_string() })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeral_prefixed_tokens_are_candidates_regardless_of_pos() {
        let token = Token { text: "二愣子".into(), pos: "v".into() };
        assert!(is_candidate_token(&token));
    }

    #[test]
    fn short_tokens_are_never_candidates() {
        let token = Token { text: "山".into(), pos: "ns".into() };
        assert!(!is_candidate_token(&token));
    }

    #[test]
    fn non_name_pos_without_numeral_prefix_is_rejected() {
        let token = Token { text: "走过去".into(), pos: "v".into() };
        assert!(!is_candidate_token(&token));
    }

    #[test]
    fn whitespace_segmenter_splits_on_punctuation() {
        let seg = WhitespaceSegmenter;
        let tokens = seg.segment("孙悟空，大闹天宫。");
        assert_eq!(tokens[0].text, "孙悟空");
        assert_eq!(tokens[1].text, "大闹天宫");
    }
}
