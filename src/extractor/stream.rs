//! Streaming tool-call extractor state machine.
//!
//! [`ToolCallExtractor`] consumes an LLM token stream and separates
//! user-visible prose from embedded tool invocations. It is a pure state
//! machine: `feed` returns the events completed by each chunk and holds
//! everything else across calls. Dispatching the extracted calls is the
//! job of [`StreamDispatcher`](super::dispatch::StreamDispatcher).
//!
//! In prose mode every code point up to the first `{` (or `｛`) is
//! prose: it is emitted as a `TextChunk` and fed to the sentence
//! detector. The opening brace switches to call mode, where the JSON
//! scanner accumulates the candidate. A completed candidate is parsed
//! leniently and normalized into a `ToolCall`; anything unparseable
//! becomes a `ParseError` event and the extractor returns to prose mode.
//! A stray `}` at depth zero is ordinary prose.

use tracing::{debug, warn};

use super::call::ToolCall;
use super::events::StreamEvent;
use super::json_stream::{JsonScanner, ScanStep, parse_lenient};
use super::sentence::SentenceDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Prose,
    InCall,
}

/// Incremental prose/tool-call separator.
#[derive(Debug)]
pub struct ToolCallExtractor {
    mode: Mode,
    scanner: JsonScanner,
    sentences: SentenceDetector,
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCallExtractor {
    /// Create an extractor in prose mode.
    pub fn new() -> Self {
        Self {
            mode: Mode::Prose,
            scanner: JsonScanner::default(),
            sentences: SentenceDetector::new(),
        }
    }

    /// Consume one chunk; returns the events it completed, in byte order.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let mut prose = String::new();

        for c in chunk.chars() {
            match self.mode {
                Mode::Prose => {
                    if c == '{' || c == '｛' {
                        self.flush_prose(&mut prose, &mut events);
                        self.scanner.begin(c);
                        self.mode = Mode::InCall;
                    } else {
                        prose.push(c);
                    }
                }
                Mode::InCall => {
                    if let ScanStep::Complete(raw) = self.scanner.push(c) {
                        self.mode = Mode::Prose;
                        events.push(self.complete_candidate(raw));
                    }
                }
            }
        }
        self.flush_prose(&mut prose, &mut events);
        events
    }

    /// Signal end-of-stream.
    ///
    /// Flushes the sentence remainder and surfaces an unterminated tool
    /// call, if any, as a `ParseError`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.mode == Mode::InCall {
            let raw = self.scanner.take_raw();
            warn!(len = raw.len(), "stream ended inside a tool call");
            self.mode = Mode::Prose;
            events.push(StreamEvent::ParseError { raw });
        }
        if let Some(tail) = self.sentences.finish() {
            events.push(StreamEvent::Sentence { text: tail });
        }
        events
    }

    /// Convenience batch path: feed everything, then finish.
    pub fn extract_all(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = self.feed(text);
        events.extend(self.finish());
        events
    }

    /// Reset to a fresh prose state for the next turn.
    pub fn reset(&mut self) {
        self.mode = Mode::Prose;
        self.scanner.take_raw();
        self.sentences.reset();
    }

    fn flush_prose(&mut self, prose: &mut String, events: &mut Vec<StreamEvent>) {
        if prose.is_empty() {
            return;
        }
        let text = std::mem::take(prose);
        events.push(StreamEvent::TextChunk { text: text.clone() });
        for sentence in self.sentences.feed(&text) {
            events.push(StreamEvent::Sentence { text: sentence });
        }
    }

    fn complete_candidate(&mut self, raw: String) -> StreamEvent {
        let Some(value) = parse_lenient(&raw) else {
            debug!(raw = raw.as_str(), "tool-call candidate failed to parse");
            return StreamEvent::ParseError { raw };
        };
        match ToolCall::from_value(&value) {
            Ok(call) => {
                debug!(
                    service = call.service.as_str(),
                    fingerprint = %call.fingerprint,
                    "extracted tool call"
                );
                StreamEvent::ToolCall {
                    fingerprint: call.fingerprint,
                    call,
                }
            }
            Err(reason) => {
                debug!(reason = reason.as_str(), "tool-call candidate rejected");
                StreamEvent::ParseError { raw }
            }
        }
    }
}
