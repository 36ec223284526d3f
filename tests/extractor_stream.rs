//! End-to-end scenarios for the streaming tool-call extractor:
//! prose conservation, tool isolation, dedup, ordering, and replay
//! equivalence over the full dispatch pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use selkie::config::DispatchConfig;
use selkie::extractor::dispatch::EVENT_CHANNEL_CAPACITY;
use selkie::{
    CallKind, DispatchStatus, InflightCache, Result, ServiceEntry, ServiceHandler,
    ServiceRegistry, StreamDispatcher, StreamEvent, ToolCall, ToolCallExtractor,
};

struct CountingHandler {
    invocations: Arc<AtomicUsize>,
}

#[async_trait]
impl ServiceHandler for CountingHandler {
    async fn call(&self, call: &ToolCall) -> Result<String> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({"echo": call.args}).to_string())
    }
}

struct Harness {
    dispatcher: StreamDispatcher,
    rx: mpsc::Receiver<StreamEvent>,
    invocations: Arc<AtomicUsize>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn harness() -> Harness {
    init_tracing();
    let config = DispatchConfig::default();
    let registry = Arc::new(ServiceRegistry::new(&config));
    let invocations = Arc::new(AtomicUsize::new(0));
    registry.register(ServiceEntry::new(
        "S",
        CallKind::Mcp,
        "scenario service",
        Arc::new(CountingHandler {
            invocations: invocations.clone(),
        }),
    ));
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    Harness {
        dispatcher: StreamDispatcher::new(
            registry,
            Arc::new(InflightCache::new(config.inflight_capacity)),
            tx,
        ),
        rx,
        invocations,
    }
}

async fn run_stream(chunks: &[&str]) -> (Vec<StreamEvent>, usize) {
    let mut h = harness();
    for chunk in chunks {
        h.dispatcher.feed(chunk).await.expect("feed");
    }
    h.dispatcher.finish().await.expect("finish");
    h.dispatcher.drain().await;
    let invocations = h.invocations.load(Ordering::SeqCst);
    drop(h.dispatcher);

    let mut events = Vec::new();
    while let Some(event) = h.rx.recv().await {
        events.push(event);
    }
    (events, invocations)
}

fn text_concat(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(StreamEvent::as_text_chunk)
        .collect()
}

// ── Plain prose ───────────────────────────────────────────────

#[tokio::test]
async fn plain_prose_preserves_text_and_sentences() {
    let (events, invocations) = run_stream(&["Hel", "lo, ", "worl", "d."]).await;

    let chunks: Vec<&str> = events
        .iter()
        .filter_map(StreamEvent::as_text_chunk)
        .collect();
    assert_eq!(chunks, vec!["Hel", "lo, ", "worl", "d."]);
    assert_eq!(text_concat(&events), "Hello, world.");

    let sentences: Vec<&str> = events.iter().filter_map(StreamEvent::as_sentence).collect();
    assert_eq!(sentences, vec!["Hello, world."]);

    assert_eq!(invocations, 0);
    assert!(events.iter().all(|e| {
        matches!(
            e,
            StreamEvent::TextChunk { .. } | StreamEvent::Sentence { .. }
        )
    }));
}

// ── Single embedded MCP call ───────────────────────────────────────

#[tokio::test]
async fn embedded_mcp_call_splits_prose_and_dispatches() {
    let input =
        "Please wait: {\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\",\"x\":\"1\"} done.";
    let (events, invocations) = run_stream(&[input]).await;

    assert_eq!(text_concat(&events), "Please wait:  done.");

    let calls: Vec<&ToolCall> = events.iter().filter_map(StreamEvent::as_tool_call).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::Mcp);
    assert_eq!(calls[0].service, "S");
    assert_eq!(calls[0].tool.as_deref(), Some("t"));
    assert_eq!(calls[0].args["x"], serde_json::json!("1"));

    let results: Vec<_> = events.iter().filter_map(StreamEvent::as_tool_result).collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DispatchStatus::Ok);
    assert_eq!(results[0].fingerprint, calls[0].fingerprint);
    assert_eq!(invocations, 1);

    // Event ordering: prose before the call, the call before its result.
    let call_pos = events
        .iter()
        .position(|e| e.as_tool_call().is_some())
        .expect("call");
    let first_text = events
        .iter()
        .position(|e| e.as_text_chunk().is_some())
        .expect("text");
    let result_pos = events
        .iter()
        .position(|e| e.as_tool_result().is_some())
        .expect("result");
    assert!(first_text < call_pos);
    assert!(call_pos < result_pos);
}

// ── Full-width braces ─────────────────────────────────────────────

#[tokio::test]
async fn full_width_braces_parse_as_agent_call() {
    let registry = Arc::new(ServiceRegistry::new(&DispatchConfig::default()));
    registry.register(ServiceEntry::new(
        "A",
        CallKind::Agent,
        "delegation target",
        Arc::new(CountingHandler {
            invocations: Arc::new(AtomicUsize::new(0)),
        }),
    ));
    let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let mut dispatcher =
        StreamDispatcher::new(registry, Arc::new(InflightCache::new(1024)), tx);

    dispatcher
        .feed("｛\"agentType\":\"agent\",\"agent_name\":\"A\",\"prompt\":\"p\"｝")
        .await
        .expect("feed");
    dispatcher.finish().await.expect("finish");
    dispatcher.drain().await;
    drop(dispatcher);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let calls: Vec<&ToolCall> = events.iter().filter_map(StreamEvent::as_tool_call).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::Agent);
    assert_eq!(calls[0].service, "A");
    assert_eq!(calls[0].prompt.as_deref(), Some("p"));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::ParseError { .. })));
}

// ── Broken JSON ───────────────────────────────────────────────

#[tokio::test]
async fn broken_json_reports_raw_and_recovers() {
    let (events, invocations) = run_stream(&["{oops}", " All good now."]).await;

    let raws: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ParseError { raw } => Some(raw.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(raws, vec!["{oops}"]);
    assert_eq!(invocations, 0);
    assert_eq!(text_concat(&events), " All good now.");
    assert!(
        events
            .iter()
            .any(|e| e.as_sentence() == Some("All good now."))
    );
}

// ── Duplicate call dedup ──────────────────────────────────────

#[tokio::test]
async fn duplicate_calls_share_one_dispatch() {
    let call = "{\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\",\"x\":\"1\"}";
    let input = format!("{call} meanwhile {call}");
    let (events, invocations) = run_stream(&[&input]).await;

    let calls: Vec<&ToolCall> = events.iter().filter_map(StreamEvent::as_tool_call).collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].fingerprint, calls[1].fingerprint);

    let results: Vec<_> = events.iter().filter_map(StreamEvent::as_tool_result).collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0].fingerprint, calls[0].fingerprint);

    assert_eq!(invocations, 1, "identical fingerprints must share one dispatch");
}

// ── Prose conservation ────────────────────────────────────────

#[tokio::test]
async fn call_free_stream_is_byte_identical() {
    let source = "No calls here. Only honest prose; spread over chunks! Right?";
    let chunks: Vec<String> = source.chars().map(|c| c.to_string()).collect();
    let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
    let (events, _) = run_stream(&refs).await;
    assert_eq!(text_concat(&events), source);
}

// ── Tool isolation ────────────────────────────────────────────

#[tokio::test]
async fn call_bytes_never_reach_prose() {
    let input = "a {\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\"} b";
    let (events, _) = run_stream(&[input]).await;
    let prose = text_concat(&events);
    for call in events.iter().filter_map(StreamEvent::as_tool_call) {
        assert!(!prose.contains(&call.canonical()));
    }
    assert!(!prose.contains("agentType"));
}

// ── Brace balance at end of stream ────────────────────────────

#[tokio::test]
async fn balanced_stream_ends_in_prose_mode() {
    let input = "Nested call: {\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\",\"o\":{\"i\":{}}} tail.";
    let (events, _) = run_stream(&[input]).await;
    // No parse errors means the state machine ended in prose mode with
    // zero depth; the trailing prose proves it kept consuming.
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::ParseError { .. })));
    assert!(text_concat(&events).ends_with(" tail."));
}

// ── Event order follows byte order ────────────────────────────

#[tokio::test]
async fn synchronous_events_follow_byte_order() {
    let input = "one {\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\"} two {bad} three";
    let (events, _) = run_stream(&[input]).await;

    let positions: Vec<(usize, &str)> = events
        .iter()
        .enumerate()
        .filter_map(|(i, e)| match e {
            StreamEvent::TextChunk { text } if text.contains("one") => Some((i, "one")),
            StreamEvent::ToolCall { .. } => Some((i, "call")),
            StreamEvent::TextChunk { text } if text.contains("two") => Some((i, "two")),
            StreamEvent::ParseError { .. } => Some((i, "bad")),
            StreamEvent::TextChunk { text } if text.contains("three") => Some((i, "three")),
            _ => None,
        })
        .collect();
    let order: Vec<&str> = positions.iter().map(|(_, tag)| *tag).collect();
    assert_eq!(order, vec!["one", "call", "two", "bad", "three"]);
}

// ── Replay equivalence ─────────────────────────────────────────

#[tokio::test]
async fn chunked_replay_matches_single_feed() {
    let source = "alpha {\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\",\"x\":\"1\"} beta {\"agentType\":\"agent\",\"agent_name\":\"A\",\"prompt\":\"p\"} gamma.";

    let mut whole = ToolCallExtractor::new();
    let whole_events = whole.extract_all(source);

    let mut chunked = ToolCallExtractor::new();
    let mut chunked_events = Vec::new();
    // Split at awkward 3-byte-ish boundaries (char-safe).
    let chars: Vec<char> = source.chars().collect();
    for group in chars.chunks(3) {
        let piece: String = group.iter().collect();
        chunked_events.extend(chunked.feed(&piece));
    }
    chunked_events.extend(chunked.finish());

    let concat = |events: &[StreamEvent]| -> String {
        events
            .iter()
            .filter_map(StreamEvent::as_text_chunk)
            .collect()
    };
    assert_eq!(concat(&whole_events), concat(&chunked_events));

    let fingerprints = |events: &[StreamEvent]| -> Vec<String> {
        events
            .iter()
            .filter_map(StreamEvent::as_tool_call)
            .map(|c| c.fingerprint.to_hex())
            .collect()
    };
    assert_eq!(fingerprints(&whole_events), fingerprints(&chunked_events));
}

// ── Unknown service surfaces as not_found ─────────────────────

#[tokio::test]
async fn unknown_service_yields_not_found_result() {
    let input = "{\"agentType\":\"mcp\",\"service_name\":\"ghost\",\"tool_name\":\"t\"}";
    let (events, _) = run_stream(&[input]).await;
    let results: Vec<_> = events.iter().filter_map(StreamEvent::as_tool_result).collect();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DispatchStatus::NotFound);
}

// ── Args with non-string scalars round-trip ───────────────────

#[tokio::test]
async fn numeric_and_bool_args_survive() {
    let input =
        "{\"agentType\":\"mcp\",\"service_name\":\"S\",\"tool_name\":\"t\",\"n\":3,\"b\":true}";
    let (events, _) = run_stream(&[input]).await;
    let call = events
        .iter()
        .filter_map(StreamEvent::as_tool_call)
        .next()
        .expect("call");
    assert_eq!(call.args["n"], serde_json::json!(3));
    assert_eq!(call.args["b"], serde_json::json!(true));
    let mut args = BTreeMap::new();
    args.insert("n".to_string(), serde_json::json!(3));
    args.insert("b".to_string(), serde_json::json!(true));
    assert_eq!(call.fingerprint, ToolCall::mcp("S", "t", args).fingerprint);
}
