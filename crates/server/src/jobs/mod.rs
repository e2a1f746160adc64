// crates/server/src/jobs/mod.rs
//! Job orchestration: lifecycle state machine, executor, supervisor.
//!
//! Provides:
//! - `LifecycleMachine` — single authority for status transitions
//! - `Executor` — drives one job's work plan (internal)
//! - `JobSupervisor` — explicit table of active executors + checkpoints
//! - `ProgressEmitter` — coalesced snapshot emission (internal)

pub mod emitter;
pub mod executor;
pub mod lifecycle;
pub mod supervisor;

pub use executor::ControlSignal;
pub use lifecycle::{LifecycleError, LifecycleMachine};
pub use supervisor::JobSupervisor;
