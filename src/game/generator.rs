//! Agent generation from a task description.
//!
//! The LLM is used as an oracle three times: once for role records,
//! once for connection permissions, and once per agent for a system
//! prompt. Every oracle step has a deterministic validation and
//! fallback path, so generation always yields a usable agent set even
//! when the model misbehaves.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::error::{Result, SelkieError};
use crate::provider::{ChatMessage, Oracle};

use super::extract_json_object;
use super::graph::InteractionGraph;
use super::types::{Agent, GeneratedRole, Task};

/// Generates a task-specific agent set and its interaction graph.
pub struct AgentGenerator {
    oracle: Arc<dyn Oracle>,
    config: GameConfig,
}

impl AgentGenerator {
    /// Create a generator backed by `oracle`.
    pub fn new(oracle: Arc<dyn Oracle>, config: GameConfig) -> Self {
        Self { oracle, config }
    }

    /// Generate with the configured default count range.
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub async fn generate_default(&self, task: &Task) -> Result<(Vec<Agent>, InteractionGraph)> {
        self.generate(task, (self.config.min_agents, self.config.max_agents))
            .await
    }

    /// Generate between `min` and `max` executor agents for `task`,
    /// plus the synthetic requester, wired into an interaction graph.
    ///
    /// # Errors
    ///
    /// Only configuration errors (`min > max` or `min == 0`) fail;
    /// oracle failures are absorbed by the fallback paths.
    pub async fn generate(
        &self,
        task: &Task,
        range: (u32, u32),
    ) -> Result<(Vec<Agent>, InteractionGraph)> {
        let (min, max) = range;
        if min == 0 || min > max {
            return Err(SelkieError::Config(format!(
                "invalid agent count range {min}..={max}"
            )));
        }

        let roles = self.generate_roles(task, min, max).await;
        info!(roles = roles.len(), task = task.id.as_str(), "roles generated");

        let mut agents: Vec<Agent> = roles
            .iter()
            .map(|role| self.agent_from_role(role))
            .collect();

        let permissions = self.generate_permissions(&roles).await;
        let graph = self.build_graph(&mut agents, &permissions)?;

        for agent in agents.iter_mut().filter(|a| !a.is_requester) {
            agent.system_prompt = self.generate_system_prompt(agent, task).await;
        }

        graph.validate(&agents)?;
        Ok((agents, graph))
    }

    // ── Roles ─────────────────────────────────────────────────

    async fn generate_roles(&self, task: &Task, min: u32, max: u32) -> Vec<GeneratedRole> {
        let mut roles = self
            .request_roles(task, min, max, false)
            .await
            .unwrap_or_default();

        if (roles.len() as u32) < min {
            debug!(
                got = roles.len(),
                min, "role generation came up short; issuing stricter retry"
            );
            if let Some(retry) = self.request_roles(task, min, max, true).await {
                if retry.len() > roles.len() {
                    roles = retry;
                }
            }
        }

        // Synthesize generic executors from the task text to reach the
        // minimum; no fixed role list.
        let mut counter = roles.len();
        while (roles.len() as u32) < min {
            counter += 1;
            roles.push(GeneratedRole {
                name: format!("Executor {counter}"),
                role_type: "executor".to_string(),
                responsibilities: vec![format!("Advance the task: {}", task.description)],
                skills: vec!["analysis".to_string(), "synthesis".to_string()],
                output_requirements: "A concrete contribution toward the task".to_string(),
                priority_level: 5,
            });
        }

        // Trim by priority when over the maximum.
        if (roles.len() as u32) > max {
            roles.sort_by(|a, b| b.priority_level.cmp(&a.priority_level));
            roles.truncate(max as usize);
        }
        roles
    }

    async fn request_roles(
        &self,
        task: &Task,
        min: u32,
        max: u32,
        strict: bool,
    ) -> Option<Vec<GeneratedRole>> {
        let strictness = if strict {
            "Respond with STRICT JSON only. No prose, no code fences, no commentary."
        } else {
            "Respond with JSON only."
        };
        let prompt = format!(
            "Design between {min} and {max} specialist roles to accomplish this task:\n\
             {task}\n\n\
             {strictness}\n\
             Schema: {{\"roles\":[{{\"name\":\"<string>\",\"role_type\":\"<string>\",\
             \"responsibilities\":[\"<string>\"],\"skills\":[\"<string>\"],\
             \"output_requirements\":\"<string>\",\"priority_level\":<1-10>}}]}}",
            task = task.description,
        );

        let reply = match self.oracle.complete(&[ChatMessage::user(prompt)]).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, "role generation oracle call failed");
                return None;
            }
        };
        let value = extract_json_object(&reply)?;
        let raw: Vec<GeneratedRole> =
            serde_json::from_value(value.get("roles")?.clone()).ok()?;

        let valid: Vec<GeneratedRole> = raw
            .into_iter()
            .filter(|role| {
                !role.name.trim().is_empty()
                    && !role.role_type.trim().is_empty()
                    && !role.responsibilities.is_empty()
                    && !role.skills.is_empty()
            })
            .map(|mut role| {
                role.priority_level = role.priority_level.clamp(1, 10);
                role
            })
            .collect();
        Some(valid)
    }

    fn agent_from_role(&self, role: &GeneratedRole) -> Agent {
        let mut agent = Agent::executor(
            role.name.clone(),
            role.role_type.clone(),
            role.priority_level as u8,
        );
        agent.responsibilities = role.responsibilities.clone();
        agent.skills = role.skills.clone();
        agent.max_iterations = self.config.max_self_route_iterations;
        agent
    }

    // ── Permissions ───────────────────────────────────────────

    async fn generate_permissions(
        &self,
        roles: &[GeneratedRole],
    ) -> HashMap<String, Vec<String>> {
        let names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
        let prompt = format!(
            "Given these collaborating roles: {names:?}\n\
             Decide which roles may contact which. Respond with JSON only.\n\
             Schema: {{\"permissions\":{{\"<role_name>\":[\"<role_name>\"]}}}}"
        );

        let parsed = match self.oracle.complete(&[ChatMessage::user(prompt)]).await {
            Ok(reply) => extract_json_object(&reply)
                .and_then(|value| value.get("permissions").cloned())
                .and_then(|value| {
                    serde_json::from_value::<HashMap<String, Vec<String>>>(value).ok()
                }),
            Err(err) => {
                warn!(error = %err, "permission oracle call failed");
                None
            }
        };

        match parsed {
            Some(mut permissions) => {
                // Drop references to names that don't exist.
                permissions.retain(|from, _| names.contains(&from.as_str()));
                for targets in permissions.values_mut() {
                    targets.retain(|to| names.contains(&to.as_str()));
                }
                permissions
            }
            None => {
                warn!("permission generation failed; using hub fallback topology");
                self.hub_topology(roles)
            }
        }
    }

    /// Highest-priority role becomes the hub; everyone talks to the hub
    /// and to their list neighbors.
    fn hub_topology(&self, roles: &[GeneratedRole]) -> HashMap<String, Vec<String>> {
        let mut permissions: HashMap<String, Vec<String>> = HashMap::new();
        let Some(hub) = roles.iter().max_by_key(|r| r.priority_level) else {
            return permissions;
        };
        for (i, role) in roles.iter().enumerate() {
            let mut targets = Vec::new();
            if role.name != hub.name {
                targets.push(hub.name.clone());
            }
            if let Some(next) = roles.get(i + 1) {
                if next.name != role.name && !targets.contains(&next.name) {
                    targets.push(next.name.clone());
                }
            }
            permissions.insert(role.name.clone(), targets);
        }
        // The hub reaches everyone.
        let hub_targets: Vec<String> = roles
            .iter()
            .filter(|r| r.name != hub.name)
            .map(|r| r.name.clone())
            .collect();
        permissions.insert(hub.name.clone(), hub_targets);
        permissions
    }

    // ── Graph assembly ────────────────────────────────────────

    fn build_graph(
        &self,
        agents: &mut Vec<Agent>,
        permissions: &HashMap<String, Vec<String>>,
    ) -> Result<InteractionGraph> {
        let mut graph = InteractionGraph::new();
        let name_to_id: HashMap<String, String> = agents
            .iter()
            .map(|a| (a.name.clone(), a.id.clone()))
            .collect();
        for agent in agents.iter() {
            graph.add_node(agent.id.clone());
        }

        for (from_name, targets) in permissions {
            let Some(from_id) = name_to_id.get(from_name) else {
                continue;
            };
            for to_name in targets {
                if to_name == from_name {
                    continue;
                }
                if let Some(to_id) = name_to_id.get(to_name) {
                    graph.add_edge(from_id, to_id)?;
                }
            }
        }

        // Highest-priority executor anchors the requester.
        let top = agents
            .iter()
            .max_by_key(|a| a.priority)
            .map(|a| a.id.clone())
            .ok_or_else(|| SelkieError::Config("no agents to anchor requester".into()))?;

        let mut requester = Agent::requester();
        requester.connection_permissions = agents
            .iter()
            .filter(|a| a.id == top)
            .map(|a| a.name.clone())
            .collect();
        let requester_id = requester.id.clone();
        graph.add_node(requester_id.clone());
        graph.set_requester(requester_id.clone());
        graph.add_edge(&requester_id, &top)?;
        graph.add_edge(&top, &requester_id)?;

        // Every executor needs an outgoing edge; orphans attach to the
        // top executor.
        let orphan_ids: Vec<String> = agents
            .iter()
            .filter(|a| a.id != top && graph.neighbors(&a.id).is_empty())
            .map(|a| a.id.clone())
            .collect();
        for id in orphan_ids {
            graph.add_edge(&id, &top)?;
        }

        // Mirror the graph into each agent's permission list.
        let id_to_name: HashMap<String, String> = agents
            .iter()
            .map(|a| (a.id.clone(), a.name.clone()))
            .collect();
        for agent in agents.iter_mut() {
            agent.connection_permissions = graph
                .neighbors(&agent.id)
                .into_iter()
                .filter_map(|id| id_to_name.get(&id).cloned())
                .collect();
        }

        agents.insert(0, requester);
        Ok(graph)
    }

    // ── System prompts ────────────────────────────────────────

    async fn generate_system_prompt(&self, agent: &Agent, task: &Task) -> String {
        let prompt = format!(
            "Write a system prompt for an agent in a collaborative task team.\n\
             Role: {role}\n\
             Responsibilities: {responsibilities:?}\n\
             Skills: {skills:?}\n\
             Collaborators: {collaborators:?}\n\
             Task: {task}\n\
             The prompt should address the agent directly and fit in one page.",
            role = agent.role,
            responsibilities = agent.responsibilities,
            skills = agent.skills,
            collaborators = agent.connection_permissions,
            task = task.description,
        );

        match self.oracle.complete(&[ChatMessage::user(prompt)]).await {
            Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(_) | Err(_) => {
                warn!(agent = agent.name.as_str(), "system prompt fallback used");
                fallback_system_prompt(agent, task)
            }
        }
    }
}

/// Structured fallback prompt built from the agent's own fields.
fn fallback_system_prompt(agent: &Agent, task: &Task) -> String {
    let mut lines = vec![
        format!("You are {}, acting as: {}.", agent.name, agent.role),
        format!("Task: {}", task.description),
        "Responsibilities:".to_string(),
    ];
    for r in &agent.responsibilities {
        lines.push(format!("- {r}"));
    }
    lines.push("Skills:".to_string());
    for s in &agent.skills {
        lines.push(format!("- {s}"));
    }
    if !agent.connection_permissions.is_empty() {
        lines.push("You may contact:".to_string());
        for c in &agent.connection_permissions {
            lines.push(format!("- {c}"));
        }
    }
    lines.join("\n")
}
