//! Multi-agent self-game engine.
//!
//! A bounded iterative coordinator: an [`AgentGenerator`] turns a task
//! into a role set wired through an [`InteractionGraph`], then the
//! [`GameEngine`] drives rounds of generation, critique, and novelty
//! scoring until a termination predicate fires, selecting the final
//! outputs by pareto dominance.

pub mod engine;
pub mod generator;
pub mod graph;
pub mod novelty;
pub mod types;

pub use engine::{GameEngine, SessionStats};
pub use generator::AgentGenerator;
pub use graph::InteractionGraph;
pub use novelty::{BlockEmbedder, HashEmbedder, NoveltyChecker};
pub use types::{
    ActorOutput, Agent, CriticOutput, FinalSelection, GameRound, GameSession, GeneratedRole,
    NoveltyOutput, RoundDecision, SessionStatus, Task,
};

use crate::extractor::json_stream::{JsonScanner, ScanStep, parse_lenient};

/// Extract the first balanced JSON object embedded in `text` and parse
/// it leniently. Tolerates surrounding prose and code fences.
pub(crate) fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find(['{', '｛'])?;
    let mut chars = text[start..].chars();
    let mut scanner = JsonScanner::default();
    scanner.begin(chars.next()?);
    for c in chars {
        if let ScanStep::Complete(raw) = scanner.push(c) {
            return parse_lenient(&raw);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_object_from_fenced_reply() {
        let reply = "Sure, here you go:\n```json\n{\"roles\": []}\n```";
        let value = extract_json_object(reply).expect("object");
        assert!(value["roles"].as_array().is_some_and(Vec::is_empty));
    }

    #[test]
    fn extracts_nested_object() {
        let value = extract_json_object("x {\"a\": {\"b\": 1}} y").expect("object");
        assert_eq!(value["a"]["b"], 1);
    }

    #[test]
    fn returns_none_without_object() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{truncated").is_none());
    }
}
