//! The self-game round loop.
//!
//! Each round runs three barriers in order: every generation task
//! completes (successfully or with a recorded failure) before critique
//! begins, every critique before novelty, every novelty before the
//! termination test. Round metrics are computed from the barrier
//! snapshot and are stable thereafter.
//!
//! Termination predicates, first match wins:
//! 1. round index reached `max_iterations`
//! 2. `avg_critical >= quality_threshold`
//! 3. `|Δavg_critical| / 10 <= 1 - convergence_threshold`
//! 4. `avg_novelty >= novelty_threshold`
//!
//! A cancelled session halts at the next round barrier with partial
//! rounds retained; a session past its wall-clock limit fails with
//! `reason = "timeout"`; a round whose every output errored fails the
//! session with `reason = "llm_unavailable"`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{GameConfig, NoveltyConfig};
use crate::provider::{ChatMessage, Oracle};

use super::extract_json_object;
use super::novelty::NoveltyChecker;
use super::types::{
    ActorOutput, Agent, CriticOutput, FinalSelection, GameRound, GameSession, NoveltyOutput,
    RoundDecision, SessionStatus, Task,
};

/// Aggregate statistics over the sessions an engine has run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SessionStats {
    /// Sessions started.
    pub total_sessions: usize,
    /// Sessions that completed.
    pub completed: usize,
    /// Sessions that failed.
    pub failed: usize,
    /// Sessions cancelled by the caller.
    pub cancelled: usize,
    /// Mean rounds per session.
    pub average_rounds: f64,
    /// Mean session wall-clock time.
    pub average_elapsed_ms: f64,
}

#[derive(Debug, Clone, Copy)]
struct SessionSummary {
    rounds: usize,
    status: SessionStatus,
    elapsed_ms: u64,
}

/// Drives complete self-game sessions.
pub struct GameEngine {
    config: GameConfig,
    oracle: Arc<dyn Oracle>,
    novelty: NoveltyChecker,
    cancel: CancellationToken,
    history: Mutex<Vec<SessionSummary>>,
}

impl GameEngine {
    /// Create an engine. The oracle is expected to already carry the
    /// global concurrency limit
    /// ([`LimitedOracle`](crate::provider::LimitedOracle)).
    pub fn new(oracle: Arc<dyn Oracle>, config: GameConfig, novelty_config: NoveltyConfig) -> Self {
        Self {
            config,
            oracle,
            novelty: NoveltyChecker::new(novelty_config),
            cancel: CancellationToken::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Token that halts the session at the next round barrier.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run a complete session over `agents`.
    ///
    /// Never fails outright: every outcome is a [`GameSession`] whose
    /// `status` and `failure_reason` describe what happened.
    pub async fn run(
        &self,
        task: Task,
        mut agents: Vec<Agent>,
        context: Option<String>,
    ) -> GameSession {
        let session_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = (self.config.session_timeout_ms > 0)
            .then(|| started + Duration::from_millis(self.config.session_timeout_ms));

        info!(
            session = session_id.as_str(),
            agents = agents.len(),
            max_iterations = self.config.max_iterations,
            "self-game session started"
        );

        let mut rounds: Vec<GameRound> = Vec::new();
        let mut context = context.unwrap_or_default();
        let mut status = SessionStatus::Completed;
        let mut failure_reason = None;

        for index in 1..=self.config.max_iterations {
            if self.cancel.is_cancelled() {
                status = SessionStatus::Cancelled;
                if let Some(last) = rounds.last_mut() {
                    if last.decision == RoundDecision::Continue {
                        last.decision = RoundDecision::Cancelled;
                    }
                }
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(session = session_id.as_str(), "session wall-clock limit hit");
                status = SessionStatus::Failed;
                failure_reason = Some("timeout".to_string());
                break;
            }

            let round_started = Instant::now();
            let actor_outputs = self
                .generation_phase(&task, &mut agents, index, &context, rounds.last())
                .await;
            if actor_outputs.is_empty() {
                debug!(round = index, "no eligible agents remain; stopping");
                break;
            }
            if actor_outputs.iter().all(|o| o.error) {
                status = SessionStatus::Failed;
                failure_reason = Some("llm_unavailable".to_string());
                rounds.push(GameRound {
                    index,
                    actor_outputs,
                    critic_outputs: Vec::new(),
                    novelty_outputs: Vec::new(),
                    avg_critical: 0.0,
                    avg_novelty: 0.0,
                    avg_satisfaction: 0.0,
                    decision: RoundDecision::Failed,
                    elapsed_ms: round_started.elapsed().as_millis() as u64,
                });
                break;
            }

            let critic_outputs = self
                .critique_phase(&task, &agents, &actor_outputs, index)
                .await;

            let novelty_outputs: Vec<NoveltyOutput> = actor_outputs
                .iter()
                .map(|output| self.novelty.score(&output.content, &output.output_id, None))
                .collect();

            let avg_critical = mean(critic_outputs.iter().map(|c| c.critique_score));
            let avg_satisfaction = mean(critic_outputs.iter().map(|c| c.satisfaction_score));
            let avg_novelty = mean(novelty_outputs.iter().map(|n| n.score));

            let decision = self.termination_test(index, avg_critical, avg_novelty, rounds.last());
            debug!(
                round = index,
                avg_critical, avg_novelty, avg_satisfaction, ?decision, "round complete"
            );

            context = next_round_context(index, avg_critical, avg_novelty, &critic_outputs);
            rounds.push(GameRound {
                index,
                actor_outputs,
                critic_outputs,
                novelty_outputs,
                avg_critical,
                avg_novelty,
                avg_satisfaction,
                decision,
                elapsed_ms: round_started.elapsed().as_millis() as u64,
            });

            if decision != RoundDecision::Continue {
                break;
            }
        }

        let final_selection = select_final(&rounds);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            session = session_id.as_str(),
            rounds = rounds.len(),
            ?status,
            elapsed_ms,
            "self-game session finished"
        );

        self.record(SessionSummary {
            rounds: rounds.len(),
            status,
            elapsed_ms,
        });

        GameSession {
            session_id,
            task,
            agents,
            rounds,
            final_selection,
            status,
            failure_reason,
            started_at,
            elapsed_ms,
        }
    }

    /// Statistics over every session this engine has run.
    pub fn statistics(&self) -> SessionStats {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if history.is_empty() {
            return SessionStats::default();
        }
        let total = history.len();
        SessionStats {
            total_sessions: total,
            completed: history
                .iter()
                .filter(|s| s.status == SessionStatus::Completed)
                .count(),
            failed: history
                .iter()
                .filter(|s| s.status == SessionStatus::Failed)
                .count(),
            cancelled: history
                .iter()
                .filter(|s| s.status == SessionStatus::Cancelled)
                .count(),
            average_rounds: history.iter().map(|s| s.rounds as f64).sum::<f64>() / total as f64,
            average_elapsed_ms: history.iter().map(|s| s.elapsed_ms as f64).sum::<f64>()
                / total as f64,
        }
    }

    fn record(&self, summary: SessionSummary) {
        let mut history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push(summary);
    }

    // ── Generation ────────────────────────────────────────────

    async fn generation_phase(
        &self,
        task: &Task,
        agents: &mut [Agent],
        round: u32,
        context: &str,
        previous: Option<&GameRound>,
    ) -> Vec<ActorOutput> {
        let branches = self.config.branches_per_agent.max(1);
        let previous_summary = previous.map(summarize_outputs).unwrap_or_default();

        let mut handles = Vec::new();
        let mut participants = Vec::new();
        for agent in agents.iter().filter(|a| !a.is_requester) {
            let cap = agent
                .max_iterations
                .min(self.config.max_self_route_iterations);
            if agent.current_iteration >= cap {
                debug!(agent = agent.name.as_str(), "iteration cap reached; skipping");
                continue;
            }
            participants.push(agent.id.clone());
            for branch in 1..=branches {
                let oracle = self.oracle.clone();
                let output_id = format!("{}-r{round}-b{branch}", agent.id);
                let agent_id = agent.id.clone();
                let agent_name = agent.name.clone();
                let messages = actor_messages(agent, task, context, &previous_summary, branch);
                handles.push(tokio::spawn(async move {
                    match oracle.complete(&messages).await {
                        Ok(content) => ActorOutput {
                            output_id,
                            agent_id,
                            agent_name,
                            round,
                            branch,
                            content,
                            error: false,
                        },
                        Err(err) => {
                            warn!(agent = agent_name.as_str(), error = %err, "generation failed");
                            ActorOutput {
                                output_id,
                                agent_id,
                                agent_name,
                                round,
                                branch,
                                content: String::new(),
                                error: true,
                            }
                        }
                    }
                }));
            }
        }

        let mut outputs = Vec::new();
        for handle in handles {
            if let Ok(output) = handle.await {
                outputs.push(output);
            }
        }

        // The round counts against every agent that generated in it.
        for agent in agents.iter_mut() {
            if participants.contains(&agent.id) && agent.current_iteration < agent.max_iterations {
                agent.current_iteration += 1;
            }
        }
        outputs
    }

    // ── Critique ──────────────────────────────────────────────

    async fn critique_phase(
        &self,
        task: &Task,
        agents: &[Agent],
        actor_outputs: &[ActorOutput],
        round: u32,
    ) -> Vec<CriticOutput> {
        let mut handles = Vec::new();
        for output in actor_outputs {
            // One critic per output: the first agent that isn't the author.
            let Some(critic) = agents.iter().find(|a| a.id != output.agent_id) else {
                continue;
            };
            let oracle = self.oracle.clone();
            let messages = critic_messages(critic, task, output, round);
            let target = output.output_id.clone();
            let critic_id = critic.id.clone();
            let ask_response_score = round >= 2;
            handles.push(tokio::spawn(async move {
                let reply = oracle.complete(&messages).await;
                parse_critique(reply, target, critic_id, ask_response_score)
            }));
        }

        let mut critiques = Vec::new();
        for handle in handles {
            if let Ok(critique) = handle.await {
                critiques.push(critique);
            }
        }
        critiques
    }

    // ── Termination ───────────────────────────────────────────

    fn termination_test(
        &self,
        index: u32,
        avg_critical: f64,
        avg_novelty: f64,
        previous: Option<&GameRound>,
    ) -> RoundDecision {
        if index >= self.config.max_iterations {
            return RoundDecision::ReachedMax;
        }
        if avg_critical >= self.config.quality_threshold {
            return RoundDecision::QualityMet;
        }
        if let Some(prev) = previous {
            let drift = (avg_critical - prev.avg_critical).abs() / 10.0;
            if drift <= 1.0 - self.config.convergence_threshold {
                return RoundDecision::Converged;
            }
        }
        if avg_novelty >= self.config.novelty_threshold {
            return RoundDecision::NoveltyMet;
        }
        RoundDecision::Continue
    }
}

// ── Prompts ───────────────────────────────────────────────────

fn actor_messages(
    agent: &Agent,
    task: &Task,
    context: &str,
    previous_summary: &str,
    branch: u32,
) -> Vec<ChatMessage> {
    let mut user = format!("Task: {}\n", task.description);
    if !context.is_empty() {
        user.push_str(&format!("\nContext from the previous round:\n{context}\n"));
    }
    if !previous_summary.is_empty() {
        user.push_str(&format!("\nRecent outputs:\n{previous_summary}\n"));
    }
    user.push_str(&format!(
        "\nProduce your contribution. Take an independent angle for attempt {branch}."
    ));
    vec![
        ChatMessage::system(agent.system_prompt.clone()),
        ChatMessage::user(user),
    ]
}

fn critic_messages(
    critic: &Agent,
    task: &Task,
    output: &ActorOutput,
    round: u32,
) -> Vec<ChatMessage> {
    let response_clause = if round >= 2 {
        "\n  \"response_score\": <0..1, how well the author responded to the last critique>,"
    } else {
        ""
    };
    let user = format!(
        "You are reviewing a teammate's contribution to this task:\n{task}\n\n\
         Contribution by {author}:\n{content}\n\n\
         Return STRICT JSON only:\n\
         {{\n  \"critique_score\": <0..1>,\n  \"satisfaction_score\": <0..1>,{response_clause}\n  \
         \"improvement_suggestions\": [\"<string>\"],\n  \"analysis\": \"<string>\"\n}}",
        task = task.description,
        author = output.agent_name,
        content = output.content,
    );
    vec![
        ChatMessage::system(critic.system_prompt.clone()),
        ChatMessage::user(user),
    ]
}

fn summarize_outputs(round: &GameRound) -> String {
    round
        .actor_outputs
        .iter()
        .rev()
        .take(3)
        .map(|output| {
            let excerpt: String = output.content.chars().take(200).collect();
            format!(
                "- {} round {}: {excerpt}...",
                output.agent_name, output.round
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn next_round_context(
    index: u32,
    avg_critical: f64,
    avg_novelty: f64,
    critiques: &[CriticOutput],
) -> String {
    let mut lines = vec![
        format!("## Round {index} summary"),
        format!("- average critique score: {avg_critical:.2}"),
        format!("- average novelty score: {avg_novelty:.2}"),
    ];
    let suggestions: Vec<&String> = critiques
        .iter()
        .flat_map(|c| c.suggestions.iter().take(2))
        .take(3)
        .collect();
    if !suggestions.is_empty() {
        lines.push("- main improvement suggestions:".to_string());
        for (i, suggestion) in suggestions.iter().enumerate() {
            lines.push(format!("  {}. {suggestion}", i + 1));
        }
    }
    lines.push("\nKeep improving on this basis.".to_string());
    lines.join("\n")
}

// ── Critique parsing ──────────────────────────────────────────

fn parse_critique(
    reply: crate::error::Result<String>,
    target_output_id: String,
    critic_id: String,
    expect_response_score: bool,
) -> CriticOutput {
    let fallback = |error: bool| CriticOutput {
        target_output_id: target_output_id.clone(),
        critic_id: critic_id.clone(),
        critique_score: 0.5,
        satisfaction_score: 0.5,
        response_score: expect_response_score.then_some(0.5),
        suggestions: Vec::new(),
        analysis: String::new(),
        error,
    };

    let Ok(text) = reply else {
        return fallback(true);
    };
    let Some(value) = extract_json_object(&text) else {
        return fallback(true);
    };

    let score = |key: &str| value.get(key).and_then(serde_json::Value::as_f64);
    let Some(critique_score) = score("critique_score") else {
        return fallback(true);
    };

    CriticOutput {
        target_output_id,
        critic_id,
        critique_score: critique_score.clamp(0.0, 1.0),
        satisfaction_score: score("satisfaction_score").unwrap_or(0.5).clamp(0.0, 1.0),
        response_score: if expect_response_score {
            Some(score("response_score").unwrap_or(0.5).clamp(0.0, 1.0))
        } else {
            None
        },
        suggestions: value
            .get("improvement_suggestions")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
        analysis: value
            .get("analysis")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        error: false,
    }
}

// ── Final selection ───────────────────────────────────────────

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Score triple for one output: (critical, satisfaction, novelty).
type Triple = (f64, f64, f64);

fn triple_in(round: &GameRound, output_id: &str) -> Triple {
    let critical = round
        .critic_outputs
        .iter()
        .filter(|c| c.target_output_id == output_id)
        .map(|c| c.critique_score)
        .fold(0.0, f64::max);
    let satisfaction = round
        .critic_outputs
        .iter()
        .filter(|c| c.target_output_id == output_id)
        .map(|c| c.satisfaction_score)
        .fold(0.0, f64::max);
    let novelty = round
        .novelty_outputs
        .iter()
        .filter(|n| n.target_output_id == output_id)
        .map(|n| n.score)
        .fold(0.0, f64::max);
    (critical, satisfaction, novelty)
}

fn select_final(rounds: &[GameRound]) -> FinalSelection {
    let Some(last) = rounds.last() else {
        return FinalSelection::default();
    };

    // Selection pool: the last round's outputs, plus the final-round
    // outputs of agents that hit their iteration cap earlier.
    let mut seen_agents: HashSet<&str> = HashSet::new();
    let mut pool: Vec<(&GameRound, &ActorOutput)> = Vec::new();
    for output in &last.actor_outputs {
        seen_agents.insert(output.agent_id.as_str());
        pool.push((last, output));
    }
    for round in rounds.iter().rev().skip(1) {
        for output in &round.actor_outputs {
            if !seen_agents.contains(output.agent_id.as_str()) {
                pool.push((round, output));
            }
        }
        for output in &round.actor_outputs {
            seen_agents.insert(output.agent_id.as_str());
        }
    }
    if pool.is_empty() {
        return FinalSelection::default();
    }

    let scored: Vec<(usize, &ActorOutput, Triple)> = pool
        .iter()
        .enumerate()
        .map(|(i, (round, output))| (i, *output, triple_in(round, &output.output_id)))
        .collect();

    // Preferred winner: maximum mean, ties broken by critical, then
    // novelty, then arrival order.
    let winner = scored
        .iter()
        .max_by(|(ia, _, a), (ib, _, b)| {
            let mean_a = (a.0 + a.1 + a.2) / 3.0;
            let mean_b = (b.0 + b.1 + b.2) / 3.0;
            mean_a
                .total_cmp(&mean_b)
                .then(a.0.total_cmp(&b.0))
                .then(a.2.total_cmp(&b.2))
                .then(ib.cmp(ia)) // earlier arrival wins ties
        })
        .map(|(_, output, _)| (*output).clone());

    // Pareto front: outputs not dominated on all three axes.
    let dominated = |a: &Triple, b: &Triple| -> bool {
        b.0 >= a.0 && b.1 >= a.1 && b.2 >= a.2 && b != a
    };
    let mut front: Vec<(usize, &ActorOutput, Triple)> = scored
        .iter()
        .filter(|(_, _, t)| !scored.iter().any(|(_, _, other)| dominated(t, other)))
        .cloned()
        .collect();
    front.sort_by(|(ia, _, a), (ib, _, b)| {
        b.0.total_cmp(&a.0)
            .then(b.2.total_cmp(&a.2))
            .then(ia.cmp(ib))
    });

    FinalSelection {
        winner,
        pareto_front: front.into_iter().map(|(_, output, _)| output.clone()).collect(),
    }
}
