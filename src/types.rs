use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a workflow does once a task has failed with no retries left.
///
/// - `End`: fail fast. No new task is dispatched, still-active tasks are
///   asked to stop, and the workflow ends `FAILED`.
/// - `Continue`: branches that do not depend on the failed task keep
///   running; the workflow ends `FAILED` once nothing else can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureStrategy {
    #[default]
    End,
    Continue,
}

impl FromStr for FailureStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "end" => Ok(FailureStrategy::End),
            "continue" => Ok(FailureStrategy::Continue),
            other => Err(format!(
                "invalid failure_strategy: {other} (expected \"end\" or \"continue\")"
            )),
        }
    }
}

/// Host selection algorithm used by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    Random,
    RoundRobin,
    #[default]
    LowerWeight,
}

impl FromStr for SelectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(SelectorKind::Random),
            "round_robin" => Ok(SelectorKind::RoundRobin),
            "lower_weight" => Ok(SelectorKind::LowerWeight),
            other => Err(format!(
                "invalid selector: {other} (expected \"random\", \"round_robin\" or \"lower_weight\")"
            )),
        }
    }
}

/// What happens to tasks that were dispatched to a worker that is judged
/// dead (either it stopped itself or its heartbeat went stale).
///
/// - `FailInFlight`: every dispatched/running task on that worker is failed
///   right away (retries still apply).
/// - `AwaitRecovery`: tasks are left alone until the worker reports again
///   or an operator intervenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    #[default]
    FailInFlight,
    AwaitRecovery,
}
