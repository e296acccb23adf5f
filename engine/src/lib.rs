//! Cycle engine for LLM-driven software work.
//!
//! Composes the store, the selector, the method surface and an external LLM
//! runner into audited single-transition cycles:
//!
//! - [`engine`] - the cycle orchestrator and its result type
//! - [`context`] - per-cycle rehydrated context (the context-reset invariant)
//! - [`handshake`] - completion handshake with bounded follow-ups
//! - [`audit`] - audit logging over the audit store
//! - [`prompt`] - role prompt templates
//! - [`runner`] - the runner contract and the scripted test runner

pub mod audit;
pub mod context;
pub mod engine;
pub mod handshake;
pub mod prompt;
pub mod runner;

pub use audit::AuditLogger;
pub use context::CycleContext;
pub use engine::{CycleEngine, CycleResult, EngineConfig};
pub use handshake::{HandshakeConfig, HandshakeEnforcer, HandshakeReport,
    DEFAULT_FOLLOW_UP_TEMPLATE};
pub use prompt::PromptLibrary;
pub use runner::{AgentRunner, RunnerOutcome, ScriptedCall, ScriptedRunner};
