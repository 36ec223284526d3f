//! Registry contract tests over the public API: hot swap with in-flight
//! dispatches, timeout classification, and the extractor → LLM loop
//! driving real dispatches end to end.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use selkie::config::{DispatchConfig, ExtractorConfig};
use selkie::{
    CallKind, ChatMessage, DispatchStatus, ExtractorLoop, InflightCache, Oracle, Result,
    ServiceEntry, ServiceHandler, ServiceRegistry, ToolCall,
};

struct SlowFixedHandler {
    payload: &'static str,
    delay_ms: u64,
}

#[async_trait]
impl ServiceHandler for SlowFixedHandler {
    async fn call(&self, _call: &ToolCall) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(self.payload.to_string())
    }
}

fn call(service: &str) -> ToolCall {
    ToolCall::mcp(service, "t", BTreeMap::new())
}

#[tokio::test]
async fn inflight_dispatch_survives_hot_swap() {
    let registry = Arc::new(ServiceRegistry::new(&DispatchConfig::default()));
    registry.register(ServiceEntry::new(
        "svc",
        CallKind::Mcp,
        "v1",
        Arc::new(SlowFixedHandler {
            payload: "\"v1\"",
            delay_ms: 100,
        }),
    ));

    // Start a dispatch against v1, then replace the entry mid-flight.
    let inflight_registry = registry.clone();
    let inflight = tokio::spawn(async move { inflight_registry.dispatch(&call("svc")).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    registry.register(ServiceEntry::new(
        "svc",
        CallKind::Mcp,
        "v2",
        Arc::new(SlowFixedHandler {
            payload: "\"v2\"",
            delay_ms: 0,
        }),
    ));

    // The in-flight dispatch completes against the entry it started with.
    let old = inflight.await.expect("join");
    assert_eq!(old.payload.as_deref(), Some("\"v1\""));

    // New dispatches see the replacement.
    let new = registry.dispatch(&call("svc")).await;
    assert_eq!(new.payload.as_deref(), Some("\"v2\""));
}

#[tokio::test]
async fn timeout_and_not_found_are_distinct() {
    let registry = ServiceRegistry::new(&DispatchConfig {
        tool_timeout_ms: 30,
        ..Default::default()
    });
    registry.register(ServiceEntry::new(
        "slow",
        CallKind::Mcp,
        "never finishes in time",
        Arc::new(SlowFixedHandler {
            payload: "\"late\"",
            delay_ms: 10_000,
        }),
    ));

    let timed_out = registry.dispatch(&call("slow")).await;
    assert_eq!(timed_out.status, DispatchStatus::Timeout);
    assert!(timed_out.payload.is_none());

    let missing = registry.dispatch(&call("ghost")).await;
    assert_eq!(missing.status, DispatchStatus::NotFound);
}

// ── Extractor loop end to end ─────────────────────────────────

/// First reply requests a lookup; once the result is injected, the
/// oracle answers with prose.
struct LookupOracle;

#[async_trait]
impl Oracle for LookupOracle {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let has_results = messages
            .iter()
            .any(|m| m.content.contains("Results from tool"));
        if has_results {
            Ok("Kyoto is sunny today.".to_string())
        } else {
            Ok("Checking the weather. {\"agentType\":\"mcp\",\"service_name\":\"weather\",\"tool_name\":\"lookup\",\"city\":\"Kyoto\"}"
                .to_string())
        }
    }
}

#[tokio::test]
async fn loop_injects_results_and_finishes_with_prose() {
    let registry = Arc::new(ServiceRegistry::new(&DispatchConfig::default()));
    registry.register(ServiceEntry::new(
        "weather",
        CallKind::Mcp,
        "weather lookups",
        Arc::new(SlowFixedHandler {
            payload: "{\"condition\":\"sunny\"}",
            delay_ms: 0,
        }),
    ));

    let engine = ExtractorLoop::new(
        Arc::new(LookupOracle),
        registry,
        Arc::new(InflightCache::new(1024)),
        ExtractorConfig::default(),
    );

    let (tx, rx) = mpsc::channel(256);
    let collector = tokio::spawn(async move {
        let mut rx = rx;
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });

    let outcome = engine
        .run(vec![ChatMessage::user("what's the weather in Kyoto?")], tx)
        .await
        .expect("loop");

    assert_eq!(outcome.loops_used, 2);
    assert_eq!(outcome.final_text, "Kyoto is sunny today.");
    let injected = outcome
        .messages
        .iter()
        .find(|m| m.content.contains("Results from tool \"lookup\""))
        .expect("injected tool results");
    assert!(injected.content.contains("sunny"));

    let events = collector.await.expect("collector");
    assert!(events.iter().any(|e| e.as_tool_call().is_some()));
    assert!(events.iter().any(|e| e.as_tool_result().is_some()));
    assert!(
        events
            .iter()
            .any(|e| e.as_sentence() == Some("Kyoto is sunny today."))
    );
}
