//! Directed interaction graph over agents.
//!
//! Two parallel adjacency maps hold allowed and forbidden edges; the
//! invariant `allowed ∩ forbidden = ∅` is enforced at mutation time.
//! Self-loops are implicitly permitted for executor agents (single-node
//! multi-iteration refinement) unless explicitly forbidden; the
//! requester never self-loops. Reachability is a plain BFS.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Result, SelkieError};

use super::types::Agent;

/// Directed graph of agent ids with allowed/forbidden edges.
#[derive(Debug, Default, Clone)]
pub struct InteractionGraph {
    nodes: HashSet<String>,
    allowed: HashMap<String, HashSet<String>>,
    forbidden: HashMap<String, HashSet<String>>,
    requester_id: Option<String>,
}

impl InteractionGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Idempotent.
    pub fn add_node(&mut self, id: impl Into<String>) {
        self.nodes.insert(id.into());
    }

    /// Mark `id` as the requester node.
    pub fn set_requester(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.nodes.insert(id.clone());
        self.requester_id = Some(id);
    }

    /// The requester node, if set.
    pub fn requester(&self) -> Option<&str> {
        self.requester_id.as_deref()
    }

    /// Permit the directed edge `from → to`.
    ///
    /// # Errors
    ///
    /// Rejects unknown endpoints and edges already forbidden (the two
    /// sets stay disjoint).
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        self.check_nodes(from, to)?;
        if self.is_forbidden(from, to) {
            return Err(SelkieError::Graph(format!(
                "edge {from} -> {to} is forbidden"
            )));
        }
        self.allowed.entry(from.to_string()).or_default().insert(to.to_string());
        Ok(())
    }

    /// Remove a permitted edge. Returns true if it existed.
    pub fn remove_edge(&mut self, from: &str, to: &str) -> bool {
        self.allowed
            .get_mut(from)
            .is_some_and(|set| set.remove(to))
    }

    /// Forbid the directed edge `from → to`.
    ///
    /// # Errors
    ///
    /// Rejects unknown endpoints and edges already allowed.
    pub fn forbid_edge(&mut self, from: &str, to: &str) -> Result<()> {
        self.check_nodes(from, to)?;
        if self.allowed.get(from).is_some_and(|set| set.contains(to)) {
            return Err(SelkieError::Graph(format!(
                "edge {from} -> {to} is already allowed"
            )));
        }
        self.forbidden
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        Ok(())
    }

    /// Whether `from` may contact `to`.
    ///
    /// Self-queries defer to [`permits_self_loop`](Self::permits_self_loop).
    pub fn is_allowed(&self, from: &str, to: &str) -> bool {
        if from == to {
            return self.permits_self_loop(from);
        }
        self.allowed.get(from).is_some_and(|set| set.contains(to))
    }

    /// Whether `id` may route to itself.
    ///
    /// Executors may, unless explicitly forbidden; the requester may not.
    pub fn permits_self_loop(&self, id: &str) -> bool {
        if !self.nodes.contains(id) {
            return false;
        }
        if self.requester_id.as_deref() == Some(id) {
            return false;
        }
        !self.is_forbidden(id, id)
    }

    /// Ids reachable from `id` over allowed edges (excluding `id`
    /// itself), in BFS order with sorted neighbor expansion.
    pub fn reachable_from(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        seen.insert(id);
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            let mut neighbors: Vec<&String> = self
                .allowed
                .get(current)
                .map(|set| set.iter().collect())
                .unwrap_or_default();
            neighbors.sort();
            for next in neighbors {
                if seen.insert(next) {
                    order.push(next.clone());
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Outgoing allowed edges of `id`.
    pub fn neighbors(&self, id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .allowed
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Validate the structural invariants against an agent list.
    ///
    /// # Errors
    ///
    /// - every non-requester agent needs at least one outgoing allowed
    ///   edge;
    /// - the requester needs exactly one outgoing edge;
    /// - at least one executor must have an edge back to the requester.
    pub fn validate(&self, agents: &[Agent]) -> Result<()> {
        for agent in agents {
            let out_degree = self.allowed.get(&agent.id).map_or(0, HashSet::len);
            if agent.is_requester {
                if out_degree != 1 {
                    return Err(SelkieError::Graph(format!(
                        "requester {} has {out_degree} outgoing edges, expected 1",
                        agent.name
                    )));
                }
            } else if out_degree == 0 {
                return Err(SelkieError::Graph(format!(
                    "agent {} has no outgoing edges",
                    agent.name
                )));
            }
        }
        if let Some(requester) = &self.requester_id {
            let reaches_back = self
                .allowed
                .iter()
                .any(|(from, set)| from != requester && set.contains(requester));
            if !reaches_back {
                return Err(SelkieError::Graph(
                    "no executor routes back to the requester".into(),
                ));
            }
        }
        Ok(())
    }

    fn check_nodes(&self, from: &str, to: &str) -> Result<()> {
        for id in [from, to] {
            if !self.nodes.contains(id) {
                return Err(SelkieError::Graph(format!("unknown node {id:?}")));
            }
        }
        Ok(())
    }

    fn is_forbidden(&self, from: &str, to: &str) -> bool {
        self.forbidden.get(from).is_some_and(|set| set.contains(to))
    }
}
