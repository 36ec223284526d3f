//! Normalized tool-call and tool-result records.
//!
//! Tool calls arrive embedded in LLM output as standalone JSON objects
//! (an `"agentType"` discriminator plus either
//! `service_name`/`tool_name` for MCP services or `agent_name`/`prompt`
//! for agent delegation). [`ToolCall::from_value`] normalizes a parsed
//! object into a typed record and computes its [`Fingerprint`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Which kind of collaborator a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// An MCP service tool.
    Mcp,
    /// A named agent invoked with a free-form prompt.
    Agent,
}

/// A normalized tool invocation.
///
/// Exactly one of `tool` / `prompt` is populated according to `kind`.
/// `args` is keyed in sorted order so the canonical form is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// MCP service or agent call.
    pub kind: CallKind,
    /// Service name (MCP) or agent name (agent).
    pub service: String,
    /// Tool name; present iff `kind == Mcp`.
    pub tool: Option<String>,
    /// Prompt text; present iff `kind == Agent`.
    pub prompt: Option<String>,
    /// Remaining argument keys, sorted.
    pub args: BTreeMap<String, serde_json::Value>,
    /// Stable hash of the canonical form.
    pub fingerprint: Fingerprint,
}

impl ToolCall {
    /// Build an MCP call.
    pub fn mcp(
        service: impl Into<String>,
        tool: impl Into<String>,
        args: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let mut call = Self {
            kind: CallKind::Mcp,
            service: service.into(),
            tool: Some(tool.into()),
            prompt: None,
            args,
            fingerprint: Fingerprint::of(""),
        };
        call.fingerprint = Fingerprint::of(&call.canonical());
        call
    }

    /// Build an agent call.
    pub fn agent(service: impl Into<String>, prompt: impl Into<String>) -> Self {
        let mut call = Self {
            kind: CallKind::Agent,
            service: service.into(),
            tool: None,
            prompt: Some(prompt.into()),
            args: BTreeMap::new(),
            fingerprint: Fingerprint::of(""),
        };
        call.fingerprint = Fingerprint::of(&call.canonical());
        call
    }

    /// Normalize a parsed JSON object into a call.
    ///
    /// Returns a human-readable reason on rejection; the extractor turns
    /// that into a `ParseError` event rather than an error.
    pub fn from_value(value: &serde_json::Value) -> std::result::Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "tool call is not a JSON object".to_string())?;

        let agent_type = obj
            .get("agentType")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing agentType".to_string())?
            .to_ascii_lowercase();

        match agent_type.as_str() {
            "mcp" => {
                let service = require_str(obj, "service_name")?;
                let tool = require_str(obj, "tool_name")?;
                let mut args = BTreeMap::new();
                for (key, val) in obj {
                    if matches!(key.as_str(), "agentType" | "service_name" | "tool_name") {
                        continue;
                    }
                    args.insert(key.clone(), val.clone());
                }
                Ok(Self::mcp(service, tool, args))
            }
            "agent" => {
                let name = require_str(obj, "agent_name")?;
                let prompt = require_str(obj, "prompt")?;
                Ok(Self::agent(name, prompt))
            }
            other => Err(format!("unknown agentType {other:?}")),
        }
    }

    /// Canonical UTF-8 serialization: kind, service, tool or prompt, and
    /// sorted args. Fingerprints are computed over this form.
    pub fn canonical(&self) -> String {
        let body = match self.kind {
            CallKind::Mcp => self.tool.as_deref().unwrap_or_default(),
            CallKind::Agent => self.prompt.as_deref().unwrap_or_default(),
        };
        let kind = match self.kind {
            CallKind::Mcp => "mcp",
            CallKind::Agent => "agent",
        };
        // BTreeMap keeps keys sorted, so this serialization is stable.
        let args = serde_json::to_string(&self.args).unwrap_or_default();
        format!("{kind}\u{1f}{}\u{1f}{body}\u{1f}{args}", self.service)
    }

    /// Display label used when framing results for the LLM.
    pub fn label(&self) -> &str {
        match self.kind {
            CallKind::Mcp => self.tool.as_deref().unwrap_or(&self.service),
            CallKind::Agent => &self.service,
        }
    }
}

fn require_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> std::result::Result<String, String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing {key}"))
}

/// Outcome category of a dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Handler completed.
    Ok,
    /// Handler failed (or panicked).
    Error,
    /// Dispatch exceeded its deadline.
    Timeout,
    /// No registered service under the requested name.
    NotFound,
}

/// Result of one dispatched [`ToolCall`].
///
/// Produced exactly once per dispatch; duplicate calls sharing a
/// fingerprint each receive their own copy of the shared result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Fingerprint of the call this result answers.
    pub fingerprint: Fingerprint,
    /// Outcome category.
    pub status: DispatchStatus,
    /// JSON-string payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Failure detail when `status != ok`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall-clock dispatch duration.
    pub duration_ms: u64,
}

impl ToolResult {
    /// Successful result carrying a JSON-string payload.
    pub fn ok(fingerprint: Fingerprint, payload: String, duration_ms: u64) -> Self {
        Self {
            fingerprint,
            status: DispatchStatus::Ok,
            payload: Some(payload),
            error_message: None,
            duration_ms,
        }
    }

    /// Handler failure.
    pub fn error(fingerprint: Fingerprint, message: String, duration_ms: u64) -> Self {
        Self {
            fingerprint,
            status: DispatchStatus::Error,
            payload: None,
            error_message: Some(message),
            duration_ms,
        }
    }

    /// Deadline exceeded.
    pub fn timeout(fingerprint: Fingerprint, duration_ms: u64) -> Self {
        Self {
            fingerprint,
            status: DispatchStatus::Timeout,
            payload: None,
            error_message: None,
            duration_ms,
        }
    }

    /// Unknown service name.
    pub fn not_found(fingerprint: Fingerprint, service: &str, duration_ms: u64) -> Self {
        Self {
            fingerprint,
            status: DispatchStatus::NotFound,
            payload: None,
            error_message: Some(format!("service {service:?} is not registered")),
            duration_ms,
        }
    }

    /// Text form injected into the follow-up LLM turn.
    pub fn render_for_llm(&self, label: &str) -> String {
        match self.status {
            DispatchStatus::Ok => format!(
                "Results from tool {label:?}:\n{}",
                self.payload.as_deref().unwrap_or("null")
            ),
            DispatchStatus::Timeout => {
                format!("Tool {label:?} timed out after {} ms", self.duration_ms)
            }
            DispatchStatus::NotFound | DispatchStatus::Error => format!(
                "Tool {label:?} failed: {}",
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
