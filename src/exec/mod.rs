// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`backend`] defines the [`TaskExecutor`] boundary plus the request types
//!   the dispatcher hands to it.
//! - [`logic`] evaluates logic tasks inside the master.
//! - [`command`] is the embedded local worker that runs shell commands with
//!   `tokio::process::Command` and reports back through the active runnable
//!   repository.

pub mod backend;
pub mod command;
pub mod logic;

pub use backend::{ControlTarget, DispatchRequest, ExecFuture, TaskExecutor};
pub use command::LocalCommandExecutor;
pub use logic::InProcessLogicExecutor;
