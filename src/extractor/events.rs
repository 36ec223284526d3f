//! Typed event stream emitted by the tool-call extractor.
//!
//! Subscribers (UI, voice output, the LLM loop) receive an ordered
//! sequence of [`StreamEvent`]s. Events are delivered in the order their
//! triggering bytes were consumed, except that a `ToolResult` for a given
//! fingerprint may arrive later than subsequent text events; it carries
//! the fingerprint so consumers can correlate.

use serde::{Deserialize, Serialize};

use super::call::{ToolCall, ToolResult};
use crate::fingerprint::Fingerprint;

/// One event in the extractor's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Prose, as received.
    TextChunk {
        /// Raw prose text.
        text: String,
    },

    /// A completed sentence derived from prose.
    Sentence {
        /// Trimmed sentence text.
        text: String,
    },

    /// A parsed tool call, after normalization.
    ToolCall {
        /// Dedup key for correlating the eventual result.
        fingerprint: Fingerprint,
        /// The normalized call.
        call: ToolCall,
    },

    /// The dispatched result for an earlier `ToolCall`.
    ToolResult {
        /// The result record (carries its own fingerprint).
        result: ToolResult,
    },

    /// An embedded candidate that could not be parsed.
    ParseError {
        /// The raw candidate bytes.
        raw: String,
    },
}

impl StreamEvent {
    /// The prose text carried by a `TextChunk`, if any.
    pub fn as_text_chunk(&self) -> Option<&str> {
        match self {
            Self::TextChunk { text } => Some(text),
            _ => None,
        }
    }

    /// The sentence text, if any.
    pub fn as_sentence(&self) -> Option<&str> {
        match self {
            Self::Sentence { text } => Some(text),
            _ => None,
        }
    }

    /// The tool call, if any.
    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall { call, .. } => Some(call),
            _ => None,
        }
    }

    /// The tool result, if any.
    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Self::ToolResult { result } => Some(result),
            _ => None,
        }
    }
}
