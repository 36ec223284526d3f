//! Streaming tool-call extraction.
//!
//! An LLM's token stream mixes user-visible prose with embedded JSON
//! tool invocations. This module separates the two incrementally,
//! dispatches the invocations, and delivers everything to subscribers
//! as an ordered [`StreamEvent`](events::StreamEvent) sequence.
//!
//! Layering, bottom up:
//! - [`json_stream`] — code-point-level JSON object scanning
//! - [`sentence`] — incremental sentence detection over prose
//! - [`call`] — normalized `ToolCall` / `ToolResult` records
//! - [`stream`] — the pure extractor state machine
//! - [`dispatch`] — async routing, dedup, and registry dispatch
//! - [`loop_engine`] — the bounded extractor → LLM → extractor loop

pub mod call;
pub mod dispatch;
pub mod events;
pub mod json_stream;
pub mod loop_engine;
pub mod sentence;
pub mod stream;

pub use call::{CallKind, DispatchStatus, ToolCall, ToolResult};
pub use dispatch::StreamDispatcher;
pub use events::StreamEvent;
pub use loop_engine::{ExtractorLoop, LoopOutcome};
pub use sentence::SentenceDetector;
pub use stream::ToolCallExtractor;
