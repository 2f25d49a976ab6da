// src/dispatch/selector.rs

//! Host selection strategies.
//!
//! Every selector is called with a freshly obtained candidate list, so host
//! churn is picked up on the next call. The only state a selector keeps is
//! its rotation cursors, one per candidate set. One selector serves every
//! worker group, so calls for different groups never move each other's
//! rotation.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;

use crate::dispatch::host::HostWeight;
use crate::errors::SelectorError;
use crate::types::SelectorKind;

pub trait Selector: Send + Sync {
    /// `Err` when the caller offered no candidates at all (a caller bug);
    /// `Ok(None)` is the transient "no eligible host right now".
    fn select(&self, hosts: &[HostWeight]) -> Result<Option<HostWeight>, SelectorError>;
}

/// Uniform random pick.
#[derive(Debug, Default)]
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn select(&self, hosts: &[HostWeight]) -> Result<Option<HostWeight>, SelectorError> {
        if hosts.is_empty() {
            return Err(SelectorError::EmptyCandidates);
        }
        let idx = rand::thread_rng().gen_range(0..hosts.len());
        Ok(Some(hosts[idx].clone()))
    }
}

/// Rotation cursors keyed by candidate-set signature.
///
/// A set seen for the first time starts at index 0, so a change in the
/// composition of a group restarts its rotation. Signatures of sets that
/// disappeared are dropped once the table outgrows `MAX_TRACKED_SETS`.
#[derive(Debug, Default)]
struct Cursors {
    by_set: DashMap<String, usize>,
}

const MAX_TRACKED_SETS: usize = 256;

impl Cursors {
    /// Current index for `signature`, advancing it for the next call.
    fn next(&self, signature: String) -> usize {
        if self.by_set.len() >= MAX_TRACKED_SETS && !self.by_set.contains_key(&signature) {
            self.by_set.clear();
        }
        let mut cursor = self.by_set.entry(signature).or_insert(0);
        let idx = *cursor;
        *cursor = idx.wrapping_add(1);
        idx
    }
}

/// Group plus sorted addresses: identifies a candidate set regardless of
/// the order it was offered in.
fn set_signature<'a>(hosts: impl IntoIterator<Item = &'a HostWeight>) -> String {
    let mut group = String::new();
    let mut addrs: Vec<String> = hosts
        .into_iter()
        .map(|h| {
            if group.is_empty() {
                group = h.worker_group.clone();
            }
            h.host.address()
        })
        .collect();
    addrs.sort();
    format!("{group}|{}", addrs.join(","))
}

/// Plain rotation over the offered hosts, in the order offered.
///
/// Each candidate set has its own cursor; when the set changes the rotation
/// starts over at the first host of the new set.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    cursors: Cursors,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Selector for RoundRobinSelector {
    fn select(&self, hosts: &[HostWeight]) -> Result<Option<HostWeight>, SelectorError> {
        if hosts.is_empty() {
            return Err(SelectorError::EmptyCandidates);
        }

        let idx = self.cursors.next(set_signature(hosts)) % hosts.len();
        Ok(Some(hosts[idx].clone()))
    }
}

/// Relative weight of each load metric in the composite score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadFactors {
    pub cpu: f64,
    pub memory: f64,
    pub tasks: f64,
}

impl Default for LoadFactors {
    fn default() -> Self {
        Self {
            cpu: 0.4,
            memory: 0.3,
            tasks: 0.3,
        }
    }
}

/// Picks the host with the lowest composite load score.
///
/// Score per host:
///
/// ```text
/// (1 + cpu * f_cpu + memory * f_mem + tasks / max_tasks * f_tasks) * 100 / weight
/// ```
///
/// multiplied by a warm-up factor in `0.1 ..= 1.0` for hosts registered less
/// than `warm_up` ago, so a freshly joined worker is preferred until it has
/// been up for the whole window. Hosts with the same score are rotated in
/// address order, with one cursor per set of tied hosts.
#[derive(Debug)]
pub struct LowerWeightRoundRobin {
    factors: LoadFactors,
    warm_up: Duration,
    cursors: Cursors,
}

const SCORE_EPSILON: f64 = 1e-9;
const MIN_WARM_UP_FACTOR: f64 = 0.1;

impl LowerWeightRoundRobin {
    pub fn new(factors: LoadFactors, warm_up: Duration) -> Self {
        Self {
            factors,
            warm_up,
            cursors: Cursors::default(),
        }
    }

    /// Same as [`Selector::select`] with an explicit clock.
    pub fn select_at(&self, hosts: &[HostWeight], now: DateTime<Utc>) -> Option<HostWeight> {
        if hosts.is_empty() {
            return None;
        }

        let max_tasks = hosts.iter().map(|h| h.running_tasks).max().unwrap_or(0);
        let scored: Vec<(f64, &HostWeight)> = hosts
            .iter()
            .map(|h| (self.score(h, max_tasks, now), h))
            .collect();

        let best = scored
            .iter()
            .map(|(s, _)| *s)
            .fold(f64::INFINITY, f64::min);

        let mut ties: Vec<&HostWeight> = scored
            .iter()
            .filter(|(s, _)| (*s - best).abs() <= SCORE_EPSILON)
            .map(|(_, h)| *h)
            .collect();
        ties.sort_by(|a, b| a.host.cmp(&b.host));

        let idx = self.cursors.next(set_signature(ties.iter().copied())) % ties.len();
        Some(ties[idx].clone())
    }

    pub fn score(&self, host: &HostWeight, max_tasks: u32, now: DateTime<Utc>) -> f64 {
        let tasks = if max_tasks == 0 {
            0.0
        } else {
            f64::from(host.running_tasks) / f64::from(max_tasks)
        };
        let load = 1.0
            + host.cpu_load.clamp(0.0, 1.0) * self.factors.cpu
            + host.memory_usage.clamp(0.0, 1.0) * self.factors.memory
            + tasks * self.factors.tasks;
        let base = load * 100.0 / f64::from(host.weight.max(1));

        base * self.warm_up_factor(host, now)
    }

    fn warm_up_factor(&self, host: &HostWeight, now: DateTime<Utc>) -> f64 {
        if self.warm_up.is_zero() {
            return 1.0;
        }
        let uptime = (now - host.registered_at).to_std().unwrap_or(Duration::ZERO);
        if uptime >= self.warm_up {
            return 1.0;
        }
        (uptime.as_secs_f64() / self.warm_up.as_secs_f64()).clamp(MIN_WARM_UP_FACTOR, 1.0)
    }
}

impl Selector for LowerWeightRoundRobin {
    fn select(&self, hosts: &[HostWeight]) -> Result<Option<HostWeight>, SelectorError> {
        Ok(self.select_at(hosts, Utc::now()))
    }
}

pub fn selector_for(kind: SelectorKind, factors: LoadFactors, warm_up: Duration) -> Box<dyn Selector> {
    match kind {
        SelectorKind::Random => Box::new(RandomSelector),
        SelectorKind::RoundRobin => Box::new(RoundRobinSelector::new()),
        SelectorKind::LowerWeight => Box::new(LowerWeightRoundRobin::new(factors, warm_up)),
    }
}
