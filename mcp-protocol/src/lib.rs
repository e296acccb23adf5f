//! Method surface for the cycle engine.
//!
//! Exposes the store to the LLM agent as a line-delimited JSON-RPC 2.0
//! protocol with namespaced methods (`tasks.*`, `artifacts.*`,
//! `requirements.*`, `plan.*`). Two bindings share one dispatch path: a
//! generic byte-stream session (stdio piping) and a local TCP socket.
//!
//! - [`handler`] - `CycleSurfaceHandler`, the per-cycle bridge to the store
//! - [`server`] - transports, protocol state machine, capability advertisement
//! - [`error`] - JSON-RPC error codes and TaskError mapping
//! - [`serialization`] - envelope helpers and typed parameter extraction

pub mod error;
pub mod handler;
pub mod serialization;
pub mod server;

pub use error::McpError;
pub use handler::CycleSurfaceHandler;
pub use server::{SurfaceServer, TcpSurfaceServer, PROTOCOL_VERSION, SURFACE_METHODS};
