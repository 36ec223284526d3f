//! LLM oracle trait and shared rate limiting.
//!
//! The core treats the language model as an oracle behind the [`Oracle`]
//! trait. Concrete adapters (HTTP providers, local inference) live in
//! external collaborators; tests use stub implementations.
//!
//! [`LimitedOracle`] wraps any oracle with the global concurrency
//! semaphore and the per-call timeout from
//! [`OracleConfig`](crate::config::OracleConfig). All LLM traffic in the
//! core goes through one such wrapper so the `concurrency_limit` applies
//! globally, with excess work queued in FIFO order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::config::OracleConfig;
use crate::error::{Result, SelkieError};

/// The speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions that frame the conversation.
    System,
    /// The end user (or a tool result injected on their behalf).
    User,
    /// The model's own prior output.
    Assistant,
}

/// One message in a conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who produced the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// An LLM completion oracle.
///
/// Implementations must be cheap to share (`Arc`) and safe to call
/// concurrently; the core imposes its own concurrency limit on top.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Complete a conversation, returning the assistant's full text.
    ///
    /// # Errors
    ///
    /// Returns [`SelkieError::Oracle`] when the underlying model call
    /// fails. Timeouts are applied by [`LimitedOracle`], not here.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// An [`Oracle`] wrapper enforcing the global concurrency limit and the
/// per-call timeout.
pub struct LimitedOracle {
    inner: Arc<dyn Oracle>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl LimitedOracle {
    /// Wrap `inner` with limits from `config`.
    pub fn new(inner: Arc<dyn Oracle>, config: &OracleConfig) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(config.concurrency_limit.max(1))),
            timeout: Duration::from_millis(config.llm_timeout_ms),
        }
    }

    /// Share an existing semaphore so LLM and tool traffic count against
    /// the same global limit.
    pub fn with_semaphore(
        inner: Arc<dyn Oracle>,
        permits: Arc<Semaphore>,
        config: &OracleConfig,
    ) -> Self {
        Self {
            inner,
            permits,
            timeout: Duration::from_millis(config.llm_timeout_ms),
        }
    }

    /// The shared semaphore backing this wrapper.
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.permits.clone()
    }
}

#[async_trait]
impl Oracle for LimitedOracle {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        // Tokio semaphores are FIFO-fair, which gives queued work the
        // ordering the concurrency model requires.
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| SelkieError::Oracle("oracle limiter closed".into()))?;

        match tokio::time::timeout(self.timeout, self.inner.complete(messages)).await {
            Ok(result) => result,
            Err(_) => Err(SelkieError::Timeout(format!(
                "oracle call exceeded {} ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoOracle;

    #[async_trait]
    impl Oracle for EchoOracle {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            Ok(messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default())
        }
    }

    /// Records the peak number of concurrent calls.
    struct GaugeOracle {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Oracle for GaugeOracle {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(String::new())
        }
    }

    struct StuckOracle;

    #[async_trait]
    impl Oracle for StuckOracle {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn limited_oracle_passes_through() {
        let oracle = LimitedOracle::new(Arc::new(EchoOracle), &OracleConfig::default());
        let reply = oracle
            .complete(&[ChatMessage::user("hello")])
            .await
            .expect("echo");
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn concurrency_limit_is_enforced() {
        let gauge = Arc::new(GaugeOracle {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let config = OracleConfig {
            concurrency_limit: 3,
            ..Default::default()
        };
        let oracle = Arc::new(LimitedOracle::new(gauge.clone(), &config));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let oracle = oracle.clone();
            handles.push(tokio::spawn(async move {
                oracle.complete(&[ChatMessage::user("x")]).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("complete");
        }
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn timeout_maps_to_timeout_error() {
        let config = OracleConfig {
            llm_timeout_ms: 10,
            ..Default::default()
        };
        let oracle = LimitedOracle::new(Arc::new(StuckOracle), &config);
        let err = oracle
            .complete(&[ChatMessage::user("x")])
            .await
            .expect_err("must time out");
        assert_eq!(err.code(), "TIMEOUT_ERROR");
    }

    #[test]
    fn chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, ChatRole::System);
        assert_eq!(ChatMessage::user("u").role, ChatRole::User);
        assert_eq!(ChatMessage::assistant("a").role, ChatRole::Assistant);
    }

    #[test]
    fn chat_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatRole::Assistant).expect("serialize");
        assert_eq!(json, "\"assistant\"");
    }
}
