//! Configuration types for the selkie core.
//!
//! Only the options the core itself reads live here. File loading, CLI
//! flags, and environment variables belong to external collaborators.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the conversational core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Streaming tool-call extractor settings.
    pub extractor: ExtractorConfig,
    /// Tool registry dispatch settings.
    pub dispatch: DispatchConfig,
    /// Shared LLM oracle settings.
    pub oracle: OracleConfig,
    /// Self-game engine settings.
    pub game: GameConfig,
    /// Novelty checker settings.
    pub novelty: NoveltyConfig,
}

/// Streaming extractor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Maximum extractor → LLM → extractor loops per user turn.
    pub max_loops: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { max_loops: 5 }
    }
}

/// Tool dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-dispatch timeout in milliseconds.
    pub tool_timeout_ms: u64,
    /// Capacity of the fingerprint → pending-result cache.
    pub inflight_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tool_timeout_ms: 30_000,
            inflight_capacity: 1024,
        }
    }
}

/// Shared LLM oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Per-call timeout in milliseconds.
    pub llm_timeout_ms: u64,
    /// Maximum parallel LLM/tool calls, enforced by a global semaphore.
    /// Excess work queues in FIFO order.
    pub concurrency_limit: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            llm_timeout_ms: 60_000,
            concurrency_limit: 3,
        }
    }
}

/// Self-game engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Per-session bound on round count.
    pub max_iterations: u32,
    /// Per-agent cap on self-loop refinements.
    pub max_self_route_iterations: u32,
    /// Parallel actor branches per agent per round.
    pub branches_per_agent: u32,
    /// `avg_critical` at or above which a round terminates (0..=1).
    pub quality_threshold: f64,
    /// Threshold on round-over-round stability (0..=1). A round converges
    /// when `|Δavg_critical| / 10 <= 1 - convergence_threshold`.
    pub convergence_threshold: f64,
    /// `avg_novelty` at or above which a round terminates (0..=10).
    pub novelty_threshold: f64,
    /// Wall-clock limit for a whole session in milliseconds. 0 = unlimited.
    pub session_timeout_ms: u64,
    /// Minimum and maximum number of generated executor roles.
    pub min_agents: u32,
    /// See `min_agents`.
    pub max_agents: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_self_route_iterations: 10,
            branches_per_agent: 5,
            quality_threshold: 0.7,
            convergence_threshold: 0.8,
            novelty_threshold: 6.0,
            session_timeout_ms: 600_000,
            min_agents: 3,
            max_agents: 6,
        }
    }
}

/// Novelty checker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoveltyConfig {
    /// Approximate block size in tokens for splitting content.
    pub novelty_block_tokens: usize,
    /// Mean prediction error above which the score is boosted (else damped).
    pub prediction_threshold: f64,
    /// Dimension of the hash-projected embedding vectors.
    pub embedding_dim: usize,
}

impl Default for NoveltyConfig {
    fn default() -> Self {
        Self {
            novelty_block_tokens: 100,
            prediction_threshold: 0.6,
            embedding_dim: 64,
        }
    }
}
