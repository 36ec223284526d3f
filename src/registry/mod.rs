//! Service registry: name → handler table with capability metadata.
//!
//! Services register at startup and may be replaced on configuration
//! reload. [`ServiceRegistry::dispatch`] is the only execution path:
//! it applies the per-entry timeout, converts handler failures (including
//! panics) into typed [`ToolResult`]s, and never lets an error escape to
//! the extractor. Re-registering a name atomically replaces the entry;
//! in-flight dispatches keep a strong reference to the entry they
//! started with and proceed to completion.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::extractor::call::{CallKind, ToolCall, ToolResult};

/// Capability metadata for one tool exposed by a service.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Tool name as it appears in `tool_name`.
    pub name: String,
    /// What the tool does; searched by keyword.
    pub description: String,
}

impl ToolSpec {
    /// Create a tool spec.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A service handler.
///
/// Handlers return their payload as a JSON string; anything richer is
/// serialized by the handler itself so the registry boundary stays
/// uniform. Cancellation is delivered by dropping the returned future.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Execute one call.
    ///
    /// # Errors
    ///
    /// Any error is translated by the registry into a
    /// `status = error` result; it never propagates further.
    async fn call(&self, call: &ToolCall) -> Result<String>;
}

/// A registered service.
pub struct ServiceEntry {
    /// Service name as it appears in `service_name` / `agent_name`.
    pub name: String,
    /// MCP service or agent.
    pub kind: CallKind,
    /// Human-readable description; searched by keyword.
    pub description: String,
    /// Tools the service exposes (MCP services).
    pub tools: Vec<ToolSpec>,
    /// Optional JSON schema for the service's arguments.
    pub schema: Option<serde_json::Value>,
    /// Whether a failed dispatch may be retried once.
    pub idempotent: bool,
    /// Per-entry timeout override.
    pub timeout_ms: Option<u64>,
    handler: Arc<dyn ServiceHandler>,
}

impl ServiceEntry {
    /// Create an entry with the given handler.
    pub fn new(
        name: impl Into<String>,
        kind: CallKind,
        description: impl Into<String>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            tools: Vec::new(),
            schema: None,
            idempotent: false,
            timeout_ms: None,
            handler,
        }
    }

    /// Attach tool metadata.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    /// Attach an argument schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Mark the handler as safe to retry once on error.
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Override the registry's default dispatch timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tools", &self.tools.len())
            .field("idempotent", &self.idempotent)
            .finish()
    }
}

/// Name → service table.
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, Arc<ServiceEntry>>>,
    default_timeout: Duration,
    limiter: Option<Arc<tokio::sync::Semaphore>>,
}

impl ServiceRegistry {
    /// Create a registry with dispatch settings from `config`.
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_timeout: Duration::from_millis(config.tool_timeout_ms),
            limiter: None,
        }
    }

    /// Count dispatches against a shared concurrency semaphore, so LLM
    /// and tool traffic obey one global limit with FIFO queueing.
    pub fn with_limiter(mut self, limiter: Arc<tokio::sync::Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Register a service, atomically replacing any entry with the same
    /// name.
    pub fn register(&self, entry: ServiceEntry) {
        let name = entry.name.clone();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let replaced = entries.insert(name.clone(), Arc::new(entry)).is_some();
        info!(service = name.as_str(), replaced, "service registered");
    }

    /// Remove a service. Returns true if it was present.
    pub fn unregister(&self, name: &str) -> bool {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.remove(name).is_some()
    }

    /// Look up a service by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.get(name).cloned()
    }

    /// All registered services, sorted by name.
    pub fn list(&self) -> Vec<Arc<ServiceEntry>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all: Vec<Arc<ServiceEntry>> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Case-insensitive capability search over names, descriptions, and
    /// tool metadata.
    pub fn search(&self, keyword: &str) -> Vec<Arc<ServiceEntry>> {
        let needle = keyword.to_lowercase();
        self.list()
            .into_iter()
            .filter(|entry| {
                entry.name.to_lowercase().contains(&needle)
                    || entry.description.to_lowercase().contains(&needle)
                    || entry.tools.iter().any(|t| {
                        t.name.to_lowercase().contains(&needle)
                            || t.description.to_lowercase().contains(&needle)
                    })
            })
            .collect()
    }

    /// Execute a call.
    ///
    /// Always returns a result: unknown services yield `not_found`,
    /// handler failures yield `error` (retried once for idempotent
    /// entries), and deadline overruns yield `timeout`.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();
        let _permit = match &self.limiter {
            Some(limiter) => limiter.acquire().await.ok(),
            None => None,
        };
        let Some(entry) = self.lookup(&call.service) else {
            warn!(service = call.service.as_str(), "dispatch to unknown service");
            return ToolResult::not_found(
                call.fingerprint,
                &call.service,
                elapsed_ms(started),
            );
        };

        let timeout = entry
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let first = self.invoke(&entry, call, timeout, started).await;
        if first.status == crate::extractor::call::DispatchStatus::Error && entry.idempotent {
            debug!(service = call.service.as_str(), "retrying idempotent handler");
            return self.invoke(&entry, call, timeout, started).await;
        }
        first
    }

    async fn invoke(
        &self,
        entry: &Arc<ServiceEntry>,
        call: &ToolCall,
        timeout: Duration,
        started: Instant,
    ) -> ToolResult {
        // Run the handler on its own task so a panic is contained and
        // surfaces as a join error instead of unwinding through the
        // dispatcher.
        let task_entry = entry.clone();
        let task_call = call.clone();
        let handle =
            tokio::spawn(async move { task_entry.handler.call(&task_call).await });

        match tokio::time::timeout(timeout, handle).await {
            Err(_) => {
                warn!(
                    service = call.service.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "dispatch timed out"
                );
                ToolResult::timeout(call.fingerprint, elapsed_ms(started))
            }
            Ok(Err(join_err)) => ToolResult::error(
                call.fingerprint,
                format!("handler panicked: {join_err}"),
                elapsed_ms(started),
            ),
            Ok(Ok(Err(err))) => ToolResult::error(
                call.fingerprint,
                err.message().to_string(),
                elapsed_ms(started),
            ),
            Ok(Ok(Ok(payload))) => {
                ToolResult::ok(call.fingerprint, payload, elapsed_ms(started))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
