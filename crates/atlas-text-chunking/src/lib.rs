//! Paragraph-boundary chunking for chapters that exceed the Budget
//! Planner's `max_chapter_chars`.
//!
//! Splitting happens at blank-line paragraph boundaries rather than at a
//! fixed character offset so a chunk never cuts a sentence (or, worse, a
//! character's name) in half mid-token for the LLM.

mod error;

pub use error::{Error, Result};

/// One contiguous piece of a chapter, in original reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based position of this segment within the chapter.
    pub index: usize,
    /// The segment's text.
    pub text: String,
}

/// Split `chapter_text` into segments of at most `max_chars` characters,
/// breaking only at paragraph boundaries (`\n\n`).
///
/// A single paragraph longer than `max_chars` is emitted as its own
/// over-sized segment rather than being cut mid-sentence; the caller
/// (the Fact Extractor) is responsible for deciding whether that still
/// counts as "truncated".
///
/// Returns a single segment — the whole chapter — when it already fits.
pub fn segment_chapter(chapter_text: &str, max_chars: usize) -> Result<Vec<Segment>> {
    if max_chars == 0 {
        return Err(Error::InvalidMaxChars(max_chars));
    }

    if chapter_text.chars().count() <= max_chars {
        return Ok(vec![Segment {
            index: 0,
            text: chapter_text.to_string(),
        }]);
    }

    let paragraphs: Vec<&str> = chapter_text.split("\n\n").collect();
    let mut segments = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        let would_be_len = if current.is_empty() {
            paragraph.chars().count()
        } else {
            current.chars().count() + 2 + paragraph.chars().count()
        };

        if would_be_len > max_chars && !current.is_empty() {
            segments.push(flush(&mut current, segments.len()));
        }

        if paragraph.chars().count() > max_chars {
            // A single paragraph alone exceeds the budget. Flush anything
            // pending first, then emit the paragraph whole rather than
            // fragment it mid-sentence.
            if !current.is_empty() {
                segments.push(flush(&mut current, segments.len()));
            }
            tracing::warn!(
                paragraph_chars = paragraph.chars().count(),
                max_chars,
                "paragraph exceeds max_chapter_chars on its own; emitting as an oversized segment"
            );
            segments.push(Segment {
                index: segments.len(),
                text: paragraph.to_string(),
            });
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        segments.push(flush(&mut current, segments.len()));
    }

    Ok(segments)
}

fn flush(current: &mut String, index: usize) -> Segment {
    let text = std::mem::take(current);
    Segment { index, text }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_in_one_segment() {
        let segs = segment_chapter("hello world", 100).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].text, "hello world");
    }

    #[test]
    fn splits_at_paragraph_boundaries() {
        let text = "para one is short\n\npara two is also short\n\npara three rounds it out";
        let segs = segment_chapter(text, 30).unwrap();
        assert!(segs.len() >= 2);
        for seg in &segs {
            assert!(seg.text.chars().count() <= 30 || seg.text.split("\n\n").count() == 1);
        }
    }

    #[test]
    fn oversized_single_paragraph_survives_whole() {
        let huge = "字".repeat(500);
        let segs = segment_chapter(&huge, 100).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].text.chars().count(), 500);
    }

    #[test]
    fn segment_indices_are_sequential() {
        let text = "a\n\n".to_string() + &"b".repeat(50) + "\n\n" + &"c".repeat(50);
        let segs = segment_chapter(&text, 40).unwrap();
        for (i, seg) in segs.iter().enumerate() {
            assert_eq!(seg.index, i);
        }
    }

    #[test]
    fn rejects_zero_max_chars() {
        assert!(matches!(
            segment_chapter("text", 0),
            Err(Error::InvalidMaxChars(0))
        ));
    }
}
