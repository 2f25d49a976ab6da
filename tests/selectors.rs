// tests/selectors.rs

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dagmaster::dispatch::{
    Host, HostWeight, LoadFactors, LowerWeightRoundRobin, RandomSelector, RoundRobinSelector,
    Selector, TaskDispatcher,
};
use dagmaster::errors::{DispatchError, SelectorError};
use dagmaster::exec::DispatchRequest;
use dagmaster::registry::{HostDiscovery, InMemoryRegistry, NodeHeartbeatSource, Registry};
use dagmaster::workflow::TaskKind;
use dagmaster_test_utils::fake_executor::RecordingExecutor;
use dagmaster_test_utils::harness::register_worker;

fn host(last: u8) -> HostWeight {
    HostWeight::new(Host::new(format!("10.0.0.{last}"), 1234), "default")
}

fn picked(sel: &dyn Selector, hosts: &[HostWeight]) -> String {
    sel.select(hosts).unwrap().unwrap().host.ip
}

#[test]
fn round_robin_rotates_and_restarts_when_the_set_changes() {
    common::init_tracing();
    let sel = RoundRobinSelector::new();
    let a = host(1);
    let b = host(2);
    let both = vec![a.clone(), b.clone()];

    let seq: Vec<String> = (0..4).map(|_| picked(&sel, &both)).collect();
    assert_eq!(seq, vec!["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.2"]);

    // B goes away: only A is left.
    assert_eq!(picked(&sel, &[a.clone()]), "10.0.0.1");
    assert_eq!(picked(&sel, &[a]), "10.0.0.1");
}

fn grouped(last: u8, group: &str) -> HostWeight {
    HostWeight::new(Host::new(format!("10.0.{}.{last}", group.len()), 1234), group)
}

#[test]
fn round_robin_keeps_one_rotation_per_group() {
    let sel = RoundRobinSelector::new();
    let etl = vec![grouped(1, "etl"), grouped(2, "etl")];
    let gpu = vec![grouped(1, "gpu-pool")];

    let mut etl_picks = Vec::new();
    for _ in 0..4 {
        etl_picks.push(picked(&sel, &etl));
        assert_eq!(picked(&sel, &gpu), "10.0.8.1");
    }
    assert_eq!(etl_picks, vec!["10.0.3.1", "10.0.3.2", "10.0.3.1", "10.0.3.2"]);
}

#[test]
fn lower_weight_ties_rotate_across_interleaved_groups() {
    let now = Utc::now();
    let sel = LowerWeightRoundRobin::new(LoadFactors::default(), Duration::ZERO);
    let etl = vec![grouped(1, "etl"), grouped(2, "etl")];
    let gpu = vec![grouped(1, "gpu-pool")];

    let mut etl_picks = Vec::new();
    for _ in 0..4 {
        etl_picks.push(sel.select_at(&etl, now).unwrap().host.ip);
        assert_eq!(sel.select_at(&gpu, now).unwrap().host.ip, "10.0.8.1");
    }
    assert_eq!(etl_picks, vec!["10.0.3.1", "10.0.3.2", "10.0.3.1", "10.0.3.2"]);
}

#[test]
fn empty_candidate_set_is_a_caller_error() {
    assert_eq!(
        RoundRobinSelector::new().select(&[]).unwrap_err(),
        SelectorError::EmptyCandidates
    );
    assert_eq!(
        RandomSelector.select(&[]).unwrap_err(),
        SelectorError::EmptyCandidates
    );
    // The load-based selector treats it as "nothing eligible right now".
    let lw = LowerWeightRoundRobin::new(LoadFactors::default(), Duration::ZERO);
    assert_eq!(lw.select(&[]).unwrap(), None);
}

#[test]
fn random_selector_only_returns_offered_hosts() {
    let hosts = vec![host(1), host(2), host(3)];
    for _ in 0..50 {
        let h = RandomSelector.select(&hosts).unwrap().unwrap();
        assert!(hosts.contains(&h));
    }
}

#[test]
fn lower_weight_prefers_the_least_loaded_host() {
    let now = Utc::now();
    let sel = LowerWeightRoundRobin::new(LoadFactors::default(), Duration::ZERO);

    let mut busy = host(1);
    busy.cpu_load = 0.9;
    busy.running_tasks = 8;
    let mut idle = host(2);
    idle.cpu_load = 0.1;
    idle.running_tasks = 1;

    for _ in 0..3 {
        let h = sel.select_at(&[busy.clone(), idle.clone()], now).unwrap();
        assert_eq!(h.host, idle.host);
    }
}

#[test]
fn lower_weight_honours_static_weight() {
    let now = Utc::now();
    let sel = LowerWeightRoundRobin::new(LoadFactors::default(), Duration::ZERO);

    let small = host(1);
    let mut big = host(2);
    big.weight = 200;

    assert!(sel.score(&big, 0, now) < sel.score(&small, 0, now));
    assert_eq!(sel.select_at(&[small, big.clone()], now).unwrap().host, big.host);
}

#[test]
fn lower_weight_rotates_over_equal_scores() {
    let now = Utc::now();
    let sel = LowerWeightRoundRobin::new(LoadFactors::default(), Duration::ZERO);
    let hosts = vec![host(2), host(1)];

    let seq: Vec<String> = (0..4)
        .map(|_| sel.select_at(&hosts, now).unwrap().host.ip)
        .collect();
    assert_eq!(seq, vec!["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.2"]);
}

#[test]
fn warming_up_host_is_picked_first() {
    let now = Utc::now();
    let sel = LowerWeightRoundRobin::new(LoadFactors::default(), Duration::from_secs(600));

    let mut veteran = host(1);
    veteran.registered_at = now - TimeDelta::hours(2);
    let mut newcomer = host(2);
    newcomer.registered_at = now - TimeDelta::seconds(30);

    assert!(sel.score(&newcomer, 0, now) < sel.score(&veteran, 0, now));
    let h = sel.select_at(&[veteran, newcomer.clone()], now).unwrap();
    assert_eq!(h.host, newcomer.host);
}

fn request(kind: TaskKind, group: &str) -> DispatchRequest {
    DispatchRequest {
        workflow_instance_id: 1,
        task: "A".to_string(),
        task_type: if kind == TaskKind::Logic { "SWITCH" } else { "SHELL" }.to_string(),
        kind,
        command: "echo A".to_string(),
        worker_group: group.to_string(),
        retry_times: 0,
        attempt: 1,
        host: None,
    }
}

#[test]
fn dispatcher_routes_by_task_kind_and_group() {
    let registry = Arc::new(InMemoryRegistry::new());
    let worker = Host::new("10.0.0.9", 1234);
    let master = Host::new("10.0.0.1", 5678);
    register_worker(registry.as_ref(), "etl", &worker);

    let dispatcher = TaskDispatcher::new(
        HostDiscovery::new(registry.clone(), Duration::from_secs(60)),
        Box::new(RoundRobinSelector::new()),
        Arc::new(RecordingExecutor::new()),
        Arc::new(RecordingExecutor::new()),
        master.clone(),
    );

    let logic = dispatcher.route(&request(TaskKind::Logic, "etl")).unwrap();
    assert_eq!(logic.host, master);

    let physical = dispatcher.route(&request(TaskKind::Physical, "etl")).unwrap();
    assert_eq!(physical.host, worker);

    assert_eq!(
        dispatcher
            .route(&request(TaskKind::Physical, "ml"))
            .err()
            .unwrap(),
        DispatchError::NoHostAvailable("ml".to_string())
    );
}

#[test]
fn dispatcher_spreads_each_group_over_its_workers() {
    let registry = Arc::new(InMemoryRegistry::new());
    let etl_a = Host::new("10.0.1.1", 1234);
    let etl_b = Host::new("10.0.1.2", 1234);
    let ml = Host::new("10.0.2.1", 1234);
    register_worker(registry.as_ref(), "etl", &etl_a);
    register_worker(registry.as_ref(), "etl", &etl_b);
    register_worker(registry.as_ref(), "ml", &ml);

    let dispatcher = TaskDispatcher::new(
        HostDiscovery::new(registry.clone(), Duration::from_secs(60)),
        Box::new(RoundRobinSelector::new()),
        Arc::new(RecordingExecutor::new()),
        Arc::new(RecordingExecutor::new()),
        Host::new("10.0.0.1", 5678),
    );

    let mut etl_hosts = Vec::new();
    for _ in 0..4 {
        etl_hosts.push(dispatcher.route(&request(TaskKind::Physical, "etl")).unwrap().host);
        let other = dispatcher.route(&request(TaskKind::Physical, "ml")).unwrap();
        assert_eq!(other.host, ml);
    }
    assert_eq!(etl_hosts.iter().filter(|h| **h == etl_a).count(), 2);
    assert_eq!(etl_hosts.iter().filter(|h| **h == etl_b).count(), 2);
}

#[test]
fn dispatcher_skips_busy_and_dead_workers() {
    let registry = Arc::new(InMemoryRegistry::new());
    let busy = Host::new("10.0.0.8", 1234);
    let beat = dagmaster::registry::HeartbeatSource::heartbeat(
        &NodeHeartbeatSource::new(busy.clone(), "etl")
            .with_running_tasks(|| 4)
            .with_busy_threshold(4),
    );
    let path = dagmaster::registry::worker_path("etl", &busy);
    registry.put(&path, &beat.encode().unwrap(), true).unwrap();

    let dead = Host::new("10.0.0.7", 1234);
    register_worker(registry.as_ref(), "etl", &dead);
    let dead_path = dagmaster::registry::worker_path("etl", &dead);
    registry
        .put(&dagmaster::registry::dead_path(&dead_path), "x", false)
        .unwrap();

    let discovery = HostDiscovery::new(registry.clone(), Duration::from_secs(60));
    assert!(discovery.workers("etl", Utc::now()).unwrap().is_empty());
}
