//! Incremental sentence detection over streamed prose.
//!
//! Splits on the fixed punctuation class `[。？！；.?!;]`. Short fragments
//! (at most five code points) that carry no quotation characters are held
//! and merged with the next fragment; fragments containing quotation
//! characters are emitted as their own unit. The final unterminated
//! remainder is retained across calls and surfaced by [`finish`].
//!
//! [`finish`]: SentenceDetector::finish

/// Punctuation that ends a sentence (CJK and ASCII).
const BOUNDARIES: [char; 8] = ['。', '？', '！', '；', '.', '?', '!', ';'];

/// Quotation characters that force a fragment out on its own.
const QUOTES: [char; 6] = ['"', '\'', '“', '”', '‘', '’'];

/// Fragments of this many code points or fewer are merged forward.
const SHORT_FRAGMENT_LIMIT: usize = 5;

/// Incremental splitter over streamed text.
#[derive(Debug, Default)]
pub struct SentenceDetector {
    buffer: String,
    held: String,
}

impl SentenceDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every sentence completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut sentences = Vec::new();

        while let Some((idx, boundary)) = find_boundary(&self.buffer) {
            let mut end = idx + boundary.len_utf8();
            // Closing quotes directly after the punctuation stay with the
            // fragment they terminate.
            for c in self.buffer[end..].chars() {
                if QUOTES.contains(&c) {
                    end += c.len_utf8();
                } else {
                    break;
                }
            }
            let fragment: String = self.buffer[..end].to_string();
            self.buffer.drain(..end);

            let mut candidate = std::mem::take(&mut self.held);
            candidate.push_str(&fragment);
            let trimmed = candidate.trim();
            if trimmed.is_empty() {
                continue;
            }

            let is_short = trimmed.chars().count() <= SHORT_FRAGMENT_LIMIT;
            if is_short && !contains_quote(trimmed) {
                // Too short to stand alone; merge into the next fragment.
                self.held = candidate;
                continue;
            }
            sentences.push(trimmed.to_string());
        }
        sentences
    }

    /// Flush the unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        let mut tail = std::mem::take(&mut self.held);
        tail.push_str(&self.buffer);
        self.buffer.clear();
        let trimmed = tail.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Drop all pending state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.held.clear();
    }
}

fn find_boundary(text: &str) -> Option<(usize, char)> {
    text.char_indices().find(|(_, c)| BOUNDARIES.contains(c))
}

fn contains_quote(text: &str) -> bool {
    text.chars().any(|c| QUOTES.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_complete_sentence() {
        let mut detector = SentenceDetector::new();
        let sentences = detector.feed("Hello there, friend.");
        assert_eq!(sentences, vec!["Hello there, friend."]);
    }

    #[test]
    fn splits_across_chunks() {
        let mut detector = SentenceDetector::new();
        assert!(detector.feed("Hello, wor").is_empty());
        let sentences = detector.feed("ld. More text");
        assert_eq!(sentences, vec!["Hello, world."]);
        assert_eq!(detector.finish().as_deref(), Some("More text"));
    }

    #[test]
    fn handles_cjk_punctuation() {
        let mut detector = SentenceDetector::new();
        let sentences = detector.feed("今日は良い天気ですね。散歩に行きましょう！");
        assert_eq!(
            sentences,
            vec!["今日は良い天気ですね。", "散歩に行きましょう！"]
        );
    }

    #[test]
    fn short_fragment_is_merged_forward() {
        let mut detector = SentenceDetector::new();
        // "Wait." is 5 code points: held and merged with the next fragment.
        let first = detector.feed("Wait.");
        assert!(first.is_empty());
        let second = detector.feed(" Then we continue onward.");
        assert_eq!(second, vec!["Wait. Then we continue onward."]);
    }

    #[test]
    fn short_quoted_fragment_is_emitted_alone() {
        let mut detector = SentenceDetector::new();
        let sentences = detector.feed("\"No.\" She left without another word.");
        assert_eq!(
            sentences,
            vec!["\"No.\"", "She left without another word."]
        );
    }

    #[test]
    fn trims_whitespace() {
        let mut detector = SentenceDetector::new();
        let sentences = detector.feed("   Plenty of leading space here.   ");
        assert_eq!(sentences, vec!["Plenty of leading space here."]);
        assert!(detector.finish().is_none());
    }

    #[test]
    fn finish_returns_held_and_remainder() {
        let mut detector = SentenceDetector::new();
        assert!(detector.feed("Hm.").is_empty());
        assert!(detector.feed(" unfinished tail").is_empty());
        assert_eq!(detector.finish().as_deref(), Some("Hm. unfinished tail"));
        assert!(detector.finish().is_none());
    }

    #[test]
    fn multiple_boundaries_in_one_chunk() {
        let mut detector = SentenceDetector::new();
        let sentences = detector.feed("First sentence here. Second one follows! A third; and tail");
        assert_eq!(
            sentences,
            vec![
                "First sentence here.",
                "Second one follows!",
                "A third;"
            ]
        );
        assert_eq!(detector.finish().as_deref(), Some("and tail"));
    }

    #[test]
    fn reset_drops_pending_state() {
        let mut detector = SentenceDetector::new();
        detector.feed("partial text without boundary");
        detector.reset();
        assert!(detector.finish().is_none());
    }

    #[test]
    fn consecutive_punctuation_is_not_emitted_empty() {
        let mut detector = SentenceDetector::new();
        let sentences = detector.feed("Really?!... Yes, quite sure about it.");
        // The bare "!", ".", ".." fragments are empty/short and fold forward.
        assert!(sentences.iter().all(|s| !s.is_empty()));
        assert!(!sentences.is_empty());
    }
}
