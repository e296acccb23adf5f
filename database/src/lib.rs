//! Database layer for the cycle store.
//!
//! This crate provides the SQLite implementation of the store traits defined
//! in `cycle-core`, including:
//!
//! - Task persistence with the transactional transition path
//! - Append-only artifact versioning
//! - Requirement records and task links
//! - The append-only audit log
//! - The persisted agent-role table
//! - Per-task advisory locks
//!
//! # Example
//!
//! ```rust,no_run
//! use database::SqliteStore;
//! use cycle_core::{models::NewTask, store::TaskStore};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteStore::new("sqlite://relay.db").await?;
//! store.migrate().await?;
//!
//! let task = store
//!     .create_task(NewTask::new("T-auth", "Auth", "Add authentication"))
//!     .await?;
//! println!("created {} in {}", task.id, task.state);
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod sqlite;

pub use sqlite::SqliteStore;
