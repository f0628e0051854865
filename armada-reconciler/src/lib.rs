//! Changeset reconciler: plans and executes code-host operations for queued
//! changesets, with bounded retries.

mod error;
pub mod executor;
pub mod host;
pub mod plan;
mod runtime;

pub use error::{HostError, ReconcilerError};
pub use executor::Executor;
pub use host::{ChangesetRequest, CodeHost, HostEvent, MemoryHost, PushRequest};
pub use plan::{determine_plan, transition, Action, Plan, ReconcilerOperation, Trigger};
pub use runtime::{
    init_tracing, serve, start_blocking, Checkpoint, Outcome, Reconciler, RunMode,
    DEFAULT_BASE_URL,
};
