//! Selkie: conversational assistant core.
//!
//! This crate implements the two subsystems that carry a desktop
//! assistant's real engineering load:
//!
//! - **Streaming tool-call extraction**: an incremental parser that
//!   separates user-visible prose from tool invocations embedded in an
//!   LLM's token stream, dispatches them through a service registry,
//!   and feeds results back into the conversation:
//!   [`extractor`] and [`registry`].
//! - **Multi-agent self-game**: a bounded Actor → Criticizer →
//!   Novelty-Checker loop over a generated agent set, with per-agent
//!   iteration caps, pareto-front selection, and convergence/quality
//!   termination: [`game`].
//!
//! # Architecture
//!
//! ```text
//! LLM token stream → ToolCallExtractor → StreamEvent subscribers
//!                          │                    (UI / voice)
//!                          ▼
//!                   ServiceRegistry → ToolResult events
//!
//! Task → AgentGenerator → InteractionGraph → GameEngine → GameSession
//! ```
//!
//! Everything peripheral (GUI, TTS, audio, weather, browser control,
//! persistence) lives in external collaborators; the core only speaks
//! the typed interfaces in these modules.

pub mod config;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod game;
pub mod provider;
pub mod registry;

pub use config::CoreConfig;
pub use error::{Result, SelkieError};
pub use extractor::{
    CallKind, DispatchStatus, ExtractorLoop, StreamDispatcher, StreamEvent, ToolCall,
    ToolCallExtractor, ToolResult,
};
pub use fingerprint::{Fingerprint, InflightCache};
pub use game::{AgentGenerator, GameEngine, GameSession, InteractionGraph, NoveltyChecker, Task};
pub use provider::{ChatMessage, ChatRole, LimitedOracle, Oracle};
pub use registry::{ServiceEntry, ServiceHandler, ServiceRegistry, ToolSpec};
