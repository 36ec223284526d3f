//! Data model for the multi-agent self-game engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A task handed to the game engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier.
    pub id: String,
    /// What the agents are asked to accomplish.
    pub description: String,
}

impl Task {
    /// Create a task with a fresh id.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
        }
    }
}

/// A participant in the self-game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Stable identifier.
    pub id: String,
    /// Display name (also used in permission tables).
    pub name: String,
    /// Role description.
    pub role: String,
    /// What the agent is responsible for.
    pub responsibilities: Vec<String>,
    /// Skill tags.
    pub skills: Vec<String>,
    /// The agent's system prompt.
    pub system_prompt: String,
    /// Names of agents this one may contact.
    pub connection_permissions: Vec<String>,
    /// Hard bound on this agent's generation rounds.
    pub max_iterations: u32,
    /// Rounds this agent has generated in so far. Monotone
    /// non-decreasing and never exceeds `max_iterations`.
    pub current_iteration: u32,
    /// True for the synthetic node representing the external user.
    pub is_requester: bool,
    /// Priority in `1..=10`; higher runs hotter.
    pub priority: u8,
}

impl Agent {
    /// Create an executor agent with defaults.
    pub fn executor(name: impl Into<String>, role: impl Into<String>, priority: u8) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            role: role.into(),
            responsibilities: Vec::new(),
            skills: Vec::new(),
            system_prompt: String::new(),
            connection_permissions: Vec::new(),
            max_iterations: 10,
            current_iteration: 0,
            is_requester: false,
            priority: priority.clamp(1, 10),
        }
    }

    /// Create the synthetic requester node.
    pub fn requester() -> Self {
        let mut agent = Self::executor("Requester", "External requester", 10);
        agent.is_requester = true;
        agent.max_iterations = 0;
        agent
    }
}

/// A role record as produced by the LLM (wire schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedRole {
    /// Role name.
    pub name: String,
    /// Role category.
    pub role_type: String,
    /// Responsibilities list.
    #[serde(default)]
    pub responsibilities: Vec<String>,
    /// Skills list.
    #[serde(default)]
    pub skills: Vec<String>,
    /// What the role's output should look like.
    #[serde(default)]
    pub output_requirements: String,
    /// Priority in `1..=10`.
    #[serde(default = "default_priority")]
    pub priority_level: i64,
}

fn default_priority() -> i64 {
    5
}

/// One agent's generated content for one (round, branch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorOutput {
    /// Unique per (agent, round, branch).
    pub output_id: String,
    /// The generating agent.
    pub agent_id: String,
    /// The generating agent's name.
    pub agent_name: String,
    /// Round index, 1-based.
    pub round: u32,
    /// Branch index, 1-based.
    pub branch: u32,
    /// Generated content (empty on error).
    pub content: String,
    /// True when the generation call failed.
    pub error: bool,
}

/// One critique of one [`ActorOutput`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticOutput {
    /// The critiqued output.
    pub target_output_id: String,
    /// The critic agent.
    pub critic_id: String,
    /// Quality judgment in `0..=1`.
    pub critique_score: f64,
    /// Requester-satisfaction judgment in `0..=1`.
    pub satisfaction_score: f64,
    /// From round 2 onward: how well the actor responded to the last
    /// critique, in `0..=1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_score: Option<f64>,
    /// Improvement suggestions.
    pub suggestions: Vec<String>,
    /// Free-form analysis.
    pub analysis: String,
    /// True when the critique call failed or did not parse.
    pub error: bool,
}

/// One novelty assessment of one [`ActorOutput`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltyOutput {
    /// The assessed output.
    pub target_output_id: String,
    /// Novelty in `0..=10`.
    pub score: f64,
    /// Per-pair prediction errors.
    pub prediction_errors: Vec<f64>,
    /// Number of content blocks assessed.
    pub block_count: usize,
}

/// Why a round ended the session (or didn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundDecision {
    /// Another round follows.
    Continue,
    /// The round-count bound was reached.
    ReachedMax,
    /// Average critical score met the quality threshold.
    QualityMet,
    /// Round-over-round change fell inside the convergence band.
    Converged,
    /// Average novelty met the novelty threshold.
    NoveltyMet,
    /// The session was cancelled at this round's barrier.
    Cancelled,
    /// The round could not be completed.
    Failed,
}

/// One completed round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRound {
    /// 1-based round index.
    pub index: u32,
    /// Every branch's generation.
    pub actor_outputs: Vec<ActorOutput>,
    /// One critique per actor output.
    pub critic_outputs: Vec<CriticOutput>,
    /// One novelty assessment per actor output.
    pub novelty_outputs: Vec<NoveltyOutput>,
    /// Mean critique score.
    pub avg_critical: f64,
    /// Mean novelty score.
    pub avg_novelty: f64,
    /// Mean satisfaction score.
    pub avg_satisfaction: f64,
    /// Outcome of the termination test.
    pub decision: RoundDecision,
    /// Wall-clock round time.
    pub elapsed_ms: u64,
}

/// Terminal session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Ran to a terminating decision.
    Completed,
    /// Aborted (`failure_reason` says why).
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

/// The last round's selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalSelection {
    /// Output with the highest mean of (critical, satisfaction, novelty).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<ActorOutput>,
    /// All outputs not dominated on the three axes.
    pub pareto_front: Vec<ActorOutput>,
}

/// A complete self-game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    /// Unique session id.
    pub session_id: String,
    /// The task played.
    pub task: Task,
    /// Participants, including the requester.
    pub agents: Vec<Agent>,
    /// Rounds in order.
    pub rounds: Vec<GameRound>,
    /// Winner and pareto front from the last round.
    pub final_selection: FinalSelection,
    /// Terminal status.
    pub status: SessionStatus,
    /// Failure detail (`"timeout"`, `"llm_unavailable"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Total wall-clock time.
    pub elapsed_ms: u64,
}
