//! Extractor → LLM → extractor loop.
//!
//! After a streamed response ends, any tool results are injected back
//! into the conversation and a follow-up completion is requested, up to
//! [`ExtractorConfig::max_loops`](crate::config::ExtractorConfig) times.
//! An iteration with no tool calls terminates the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::dispatch::StreamDispatcher;
use super::events::StreamEvent;
use crate::config::ExtractorConfig;
use crate::error::Result;
use crate::extractor::call::ToolResult;
use crate::fingerprint::InflightCache;
use crate::provider::{ChatMessage, Oracle};
use crate::registry::ServiceRegistry;

/// Outcome of one user turn driven through the loop.
#[derive(Debug)]
pub struct LoopOutcome {
    /// The assistant's final text (last iteration's prose).
    pub final_text: String,
    /// Number of LLM iterations consumed.
    pub loops_used: u32,
    /// The full conversation after the loop, for history keeping.
    pub messages: Vec<ChatMessage>,
}

/// Drives the tool-call loop for one conversation.
pub struct ExtractorLoop {
    oracle: Arc<dyn Oracle>,
    registry: Arc<ServiceRegistry>,
    inflight: Arc<InflightCache<ToolResult>>,
    config: ExtractorConfig,
}

impl ExtractorLoop {
    /// Create a loop engine.
    pub fn new(
        oracle: Arc<dyn Oracle>,
        registry: Arc<ServiceRegistry>,
        inflight: Arc<InflightCache<ToolResult>>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            oracle,
            registry,
            inflight,
            config,
        }
    }

    /// Run one user turn.
    ///
    /// Each iteration requests a completion, streams it through a fresh
    /// [`StreamDispatcher`] emitting to `events`. When tool calls
    /// occurred, the rendered results are appended as a user message
    /// for the next iteration.
    ///
    /// # Errors
    ///
    /// Returns the oracle's error if a completion fails, or
    /// [`SelkieError::Channel`](crate::error::SelkieError) when the
    /// subscriber hangs up. Tool failures never error here; they flow
    /// through as `ToolResult` events and rendered text.
    pub async fn run(
        &self,
        mut messages: Vec<ChatMessage>,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<LoopOutcome> {
        let mut final_text = String::new();
        let mut loops_used = 0;

        for iteration in 1..=self.config.max_loops.max(1) {
            loops_used = iteration;
            let reply = self.oracle.complete(&messages).await?;
            debug!(iteration, reply_len = reply.len(), "oracle reply received");

            let mut dispatcher = StreamDispatcher::new(
                self.registry.clone(),
                self.inflight.clone(),
                events.clone(),
            );
            dispatcher.feed(&reply).await?;
            dispatcher.finish().await?;

            if dispatcher.calls_seen() == 0 {
                info!(iteration, "no tool calls; loop complete");
                final_text = reply;
                messages.push(ChatMessage::assistant(final_text.clone()));
                break;
            }

            let resolved = dispatcher.drain().await;
            let rendered: Vec<String> = resolved
                .iter()
                .filter_map(|(label, result)| {
                    result.as_ref().map(|r| r.render_for_llm(label))
                })
                .collect();

            final_text = reply.clone();
            messages.push(ChatMessage::assistant(reply));
            messages.push(ChatMessage::user(rendered.join("\n\n---\n\n")));
        }

        Ok(LoopOutcome {
            final_text,
            loops_used,
            messages,
        })
    }
}
