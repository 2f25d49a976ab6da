// src/engine/mod.rs

//! Event-driven orchestration engine.
//!
//! This module ties together:
//! - the closed set of [`WorkflowEvent`]s and the per-instance
//!   [`EventRepository`] queue
//! - the [`ActiveRunnableRepository`], the single inbound channel for
//!   events coming from outside (API, executors, failover)
//! - the operators that apply an event to its runnable and carry out the
//!   resulting commands
//! - the [`EventEngine`] scan loop with its in-flight markers
//!
//! The state machines themselves live in [`crate::workflow`]; this module is
//! the async shell around them.

pub mod event;
pub mod event_loop;
pub mod failover;
pub mod launcher;
pub mod operator;
pub mod repository;
pub mod runnables;

pub use event::{EventKind, WorkflowEvent};
pub use event_loop::{EngineOptions, EventEngine};
pub use failover::{handle_dead_hosts, run_failover_loop};
pub use launcher::{recover_unfinished, start_workflow};
pub use operator::OperatorContext;
pub use repository::{EventRepository, InMemoryEventRepository};
pub use runnables::ActiveRunnableRepository;
