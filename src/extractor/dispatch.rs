//! Async event routing and deduplicated tool dispatch.
//!
//! [`StreamDispatcher`] wraps the pure [`ToolCallExtractor`] state
//! machine with the pieces the behavioral model needs:
//!
//! - events go to a bounded `mpsc` channel, so a slow subscriber
//!   back-pressures the caller instead of growing a buffer;
//! - each extracted call is dispatched without blocking the stream:
//!   the `ToolCall` event is emitted immediately and the registry call
//!   runs on its own task, emitting `ToolResult` when it resolves;
//! - duplicate fingerprints share one execution through the
//!   [`InflightCache`]; every occurrence still gets its own
//!   `ToolResult` event;
//! - cancellation stops event emission and drops pending dispatch
//!   futures, which is the registry's stop signal.
//!
//! One dispatcher handles one stream; state is never shared between
//! streams. The in-flight cache and registry are shared globally.

use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::call::{ToolCall, ToolResult};
use super::events::StreamEvent;
use super::stream::ToolCallExtractor;
use crate::error::{Result, SelkieError};
use crate::fingerprint::{InflightCache, InflightSlot, await_result};
use crate::registry::ServiceRegistry;

/// Default subscriber channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One stream's extraction + dispatch pipeline.
pub struct StreamDispatcher {
    extractor: ToolCallExtractor,
    registry: Arc<ServiceRegistry>,
    inflight: Arc<InflightCache<ToolResult>>,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    pending: Vec<(String, JoinHandle<Option<ToolResult>>)>,
    calls_seen: usize,
}

impl StreamDispatcher {
    /// Create a dispatcher emitting to `events`.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        inflight: Arc<InflightCache<ToolResult>>,
        events: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            extractor: ToolCallExtractor::new(),
            registry,
            inflight,
            events,
            cancel: CancellationToken::new(),
            pending: Vec::new(),
            calls_seen: 0,
        }
    }

    /// Token observed by this dispatcher and its spawned dispatches.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop emitting events and signal pending dispatches to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Number of tool calls extracted since the last [`reset`](Self::reset).
    pub fn calls_seen(&self) -> usize {
        self.calls_seen
    }

    /// Consume one chunk of the LLM stream.
    ///
    /// # Errors
    ///
    /// Returns [`SelkieError::Channel`] when the subscriber dropped its
    /// receiver while the stream is still active.
    pub async fn feed(&mut self, chunk: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let events = self.extractor.feed(chunk);
        self.route(events).await
    }

    /// Drive an entire chunk stream through the dispatcher, then
    /// signal end-of-stream.
    ///
    /// # Errors
    ///
    /// Same contract as [`feed`](Self::feed).
    pub async fn run_stream<S>(&mut self, stream: S) -> Result<()>
    where
        S: Stream<Item = String> + Unpin + Send,
    {
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.feed(&chunk).await?;
        }
        self.finish().await
    }

    /// Signal end-of-stream, flushing remainders.
    pub async fn finish(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        let events = self.extractor.finish();
        self.route(events).await
    }

    /// Await every dispatch started on this stream, in call order.
    ///
    /// Returns `(label, result)` pairs; `None` results correspond to
    /// cancelled dispatches. The subscriber channel must be drained
    /// concurrently or emission can stall on backpressure.
    pub async fn drain(&mut self) -> Vec<(String, Option<ToolResult>)> {
        let mut resolved = Vec::new();
        for (label, handle) in self.pending.drain(..) {
            let result = handle.await.unwrap_or(None);
            resolved.push((label, result));
        }
        resolved
    }

    /// Reset extractor state and counters for the next turn. Pending
    /// dispatches from the previous turn are dropped.
    pub fn reset(&mut self) {
        self.extractor.reset();
        self.pending.clear();
        self.calls_seen = 0;
    }

    async fn route(&mut self, events: Vec<StreamEvent>) -> Result<()> {
        for event in events {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let call = event.as_tool_call().cloned();
            self.events
                .send(event)
                .await
                .map_err(|_| SelkieError::Channel("event subscriber closed".into()))?;
            if let Some(call) = call {
                self.begin_dispatch(call);
            }
        }
        Ok(())
    }

    fn begin_dispatch(&mut self, call: ToolCall) {
        self.calls_seen += 1;
        let fingerprint = call.fingerprint;
        let label = call.label().to_string();
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        let handle = match self.inflight.claim(fingerprint) {
            InflightSlot::Owner(slot) => {
                debug!(%fingerprint, service = call.service.as_str(), "dispatching");
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    let result = tokio::select! {
                        // Dropping the dispatch future is the stop signal.
                        _ = cancel.cancelled() => return None,
                        result = registry.dispatch(&call) => result,
                    };
                    slot.send_replace(Some(result.clone()));
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let _ = events
                        .send(StreamEvent::ToolResult {
                            result: result.clone(),
                        })
                        .await;
                    Some(result)
                })
            }
            InflightSlot::Follower(rx) => {
                debug!(%fingerprint, "duplicate call shares pending dispatch");
                tokio::spawn(async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        result = await_result(rx) => result?,
                    };
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let _ = events
                        .send(StreamEvent::ToolResult {
                            result: result.clone(),
                        })
                        .await;
                    Some(result)
                })
            }
        };
        self.pending.push((label, handle));
    }
}
