//! Server lifecycle orchestration business logic
//!
//! This crate contains the core state machine for managing sandbox VM
//! servers: the record store and audit trail, the compute backend
//! policy layer, the infra job dispatcher, the remote desktop gateway
//! adapter, and the idle-server sweeper. It is consumed by the
//! sandbox-api HTTP service but can also be used by CLI commands,
//! background workers, or other entry points.

pub mod compute;
pub mod db;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod infra;
pub mod lifecycle;
pub mod locks;
pub mod model;
pub mod notify;
pub mod store;
pub mod sweeper;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{LifecycleError, ResourceKind, Result};
pub use lifecycle::LifecycleOrchestrator;
pub use model::{
    CompletionState, CompletionUpdate, CreateServerRequest, Event, EventStatus, Server,
    ServerPatch, ServerState,
};
pub use store::ServerStore;
pub use sweeper::{IdleSweeper, SweepConfig, SweepOutcome, SweepPreview};
