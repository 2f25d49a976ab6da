// src/dispatch/mod.rs

//! Host identity, host selection and task routing.

pub mod dispatcher;
pub mod host;
pub mod selector;

pub use dispatcher::{Route, TaskDispatcher};
pub use host::{Host, HostWeight};
pub use selector::{
    LoadFactors, LowerWeightRoundRobin, RandomSelector, RoundRobinSelector, Selector, selector_for,
};
