//! Cycle Core Library
//!
//! This crate provides the foundational domain models, the task state
//! machine, selection and transition logic, and the trait interfaces for the
//! cycle engine. All other crates depend on the types and interfaces defined
//! here.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`models`] - Core domain models (Task, Requirement, Artifact, AuditEntry)
//! - [`states`] - The eleven-state lifecycle machine and the handover table
//! - [`error`] - Error types and result handling
//! - [`store`] - Store traits for durable persistence
//! - [`selector`] - Dependency-aware next-task selection
//! - [`transition`] - Transition validation decision logic
//! - [`roles`] - Agent roles as capability sets
//! - [`protocol`] - Handler trait and parameter types for the method surface
//! - [`validation`] - Field-level validation for externally supplied records
//!
//! # Example
//!
//! ```rust
//! use cycle_core::{
//!     models::NewTask,
//!     validation::RecordValidator,
//! };
//!
//! let new_task = NewTask::new("T-auth", "Auth", "Add JWT-based authentication")
//!     .with_priority(7);
//!
//! // Validate the task before creation
//! RecordValidator::validate_new_task(&new_task).unwrap();
//! ```

pub mod error;
pub mod models;
pub mod protocol;
pub mod roles;
pub mod selector;
pub mod states;
pub mod store;
pub mod transition;
pub mod validation;

// Re-export commonly used types at the crate root for convenience
pub use error::{Result, TaskError};
pub use models::{
    Artifact, ArtifactRef, AuditEntry, AuditReport, CycleOutcome, FollowUp, NewAuditEntry,
    NewRequirement, NewTask, Requirement, RequirementKind, Task, TaskFilter, TaskNote,
};
pub use protocol::{
    AppendNoteParams, GetArtifactParams, GetTaskParams, ListArtifactsParams, ListRequirementsParams,
    ListTasksParams, SurfaceHandler, TaskWithArtifacts, UpdateStateParams, UpsertArtifactParams,
};
pub use roles::{AgentRole, RoleTable};
pub use selector::{select_next, Selection, SelectorConfig, TieBreaker};
pub use states::{required_handover, TaskState, ALL_STATES, REQUIRED_HANDOVERS};
pub use store::{
    AgentStore, ArtifactStore, AuditStore, LockStore, RequirementStore, Store, TaskStore,
};
pub use transition::{TransitionBlocker, TransitionInspection};
pub use validation::RecordValidator;

/// Current version of the core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Current crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
