// tests/heartbeat.rs

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dagmaster::dispatch::Host;
use dagmaster::errors::RegistryError;
use dagmaster::registry::{
    ConnectionListener, HeartBeat, HeartbeatMonitor, HeartbeatTask, HeartbeatTick,
    HostDiscovery, InMemoryRegistry, NodeHeartbeatSource, PeerHealth, Registry, SessionWatch,
    StopReason, dead_path, worker_path,
};
use tokio::sync::watch;

use common::TestResult;

/// Registry whose `put` can be switched to fail; counts every `put` call.
#[derive(Default)]
struct FlakyRegistry {
    inner: InMemoryRegistry,
    fail_puts: AtomicBool,
    puts: AtomicUsize,
}

impl Registry for FlakyRegistry {
    fn put(&self, key: &str, value: &str, ephemeral: bool) -> Result<(), RegistryError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("flaky".to_string()));
        }
        self.inner.put(key, value, ephemeral)
    }

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        self.inner.get(key)
    }

    fn exists(&self, key: &str) -> Result<bool, RegistryError> {
        self.inner.exists(key)
    }

    fn children(&self, key: &str) -> Result<Vec<String>, RegistryError> {
        self.inner.children(key)
    }

    fn delete(&self, key: &str) -> Result<(), RegistryError> {
        self.inner.delete(key)
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.inner.add_connection_listener(listener)
    }
}

fn worker_task(registry: Arc<dyn Registry>, host: &Host, max_failures: u32) -> HeartbeatTask {
    HeartbeatTask::new(
        registry,
        Arc::new(NodeHeartbeatSource::new(host.clone(), "default")),
        vec![worker_path("default", host)],
        Duration::from_millis(10),
        max_failures,
    )
}

#[test]
fn heartbeat_stops_after_exactly_max_failures_attempts() {
    common::init_tracing();
    let registry = Arc::new(FlakyRegistry::default());
    registry.fail_puts.store(true, Ordering::SeqCst);
    let host = Host::new("10.0.0.2", 1234);
    let mut task = worker_task(registry.clone(), &host, 3);

    assert_eq!(task.tick(), HeartbeatTick::Failed { consecutive: 1 });
    assert_eq!(task.tick(), HeartbeatTick::Failed { consecutive: 2 });
    assert_eq!(task.tick(), HeartbeatTick::Stop(StopReason::TooManyFailures));
    assert_eq!(registry.puts.load(Ordering::SeqCst), 3);
}

#[test]
fn a_success_resets_the_failure_count() {
    let registry = Arc::new(FlakyRegistry::default());
    let host = Host::new("10.0.0.2", 1234);
    let mut task = worker_task(registry.clone(), &host, 2);

    registry.fail_puts.store(true, Ordering::SeqCst);
    assert_eq!(task.tick(), HeartbeatTick::Failed { consecutive: 1 });

    registry.fail_puts.store(false, Ordering::SeqCst);
    assert_eq!(task.tick(), HeartbeatTick::Published);
    assert_eq!(task.consecutive_failures(), 0);

    registry.fail_puts.store(true, Ordering::SeqCst);
    assert_eq!(task.tick(), HeartbeatTick::Failed { consecutive: 1 });
}

#[test]
fn node_marked_dead_stops_on_next_tick() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let host = Host::new("10.0.0.2", 1234);
    let mut task = worker_task(registry.clone(), &host, 3);
    assert_eq!(task.tick(), HeartbeatTick::Published);

    let monitor = HeartbeatMonitor::new(registry.clone(), Duration::from_millis(10), 3);
    monitor.mark_dead(&worker_path("default", &host), Utc::now())?;

    assert!(registry.exists(&dead_path(&worker_path("default", &host)))?);
    assert_eq!(task.tick(), HeartbeatTick::Stop(StopReason::MarkedDead));
    // The dead node is not re-registered.
    assert!(!registry.exists(&worker_path("default", &host))?);
    Ok(())
}

#[tokio::test]
async fn run_removes_paths_on_shutdown() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let host = Host::new("10.0.0.2", 1234);
    let task = worker_task(registry.clone(), &host, 3);
    let path = worker_path("default", &host);
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(task.run(rx));
    {
        let registry = registry.clone();
        let path = path.clone();
        common::wait_until(move || registry.exists(&path).unwrap_or(false)).await;
    }

    tx.send(true)?;
    let reason = common::with_timeout(handle).await?;
    assert_eq!(reason, StopReason::Shutdown);
    assert!(!registry.exists(&path)?);
    Ok(())
}

#[test]
fn monitor_judges_stale_and_missing_peers() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let interval = Duration::from_secs(10);
    let monitor = HeartbeatMonitor::new(registry.clone(), interval, 3);
    let host = Host::new("10.0.0.2", 1234);
    let path = worker_path("default", &host);
    let now = Utc::now();

    // Never seen: missing first, dead after more than one interval.
    assert_eq!(monitor.judge(&path, now)?, PeerHealth::Missing);
    assert_eq!(
        monitor.judge(&path, now + TimeDelta::seconds(11))?,
        PeerHealth::Dead
    );

    let beat = dagmaster::registry::HeartbeatSource::heartbeat(&NodeHeartbeatSource::new(
        host.clone(),
        "default",
    ));
    registry.put(&path, &beat.encode()?, true)?;
    assert_eq!(monitor.judge(&path, now)?, PeerHealth::Alive);

    // Older than interval * dead_after_missed.
    let later = beat.report_time + TimeDelta::seconds(31);
    assert_eq!(monitor.judge(&path, later)?, PeerHealth::Dead);
    Ok(())
}

#[test]
fn sweep_marks_vanished_workers_dead() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let monitor = HeartbeatMonitor::new(registry.clone(), Duration::from_secs(10), 3);
    let host = Host::new("10.0.0.2", 1234);
    let mut task = worker_task(registry.clone(), &host, 3);
    assert_eq!(task.tick(), HeartbeatTick::Published);

    let now = Utc::now();
    assert!(monitor.sweep_workers(now)?.is_empty());

    // Session lost: the ephemeral key is gone.
    registry.disconnect();
    registry.reconnect();
    assert!(monitor.sweep_workers(now + TimeDelta::seconds(1))?.is_empty());
    let dead = monitor.sweep_workers(now + TimeDelta::seconds(12))?;
    assert_eq!(dead, vec![host.clone()]);

    // Reported once only.
    assert!(monitor.sweep_workers(now + TimeDelta::seconds(20))?.is_empty());
    assert_eq!(task.tick(), HeartbeatTick::Stop(StopReason::MarkedDead));
    Ok(())
}

#[test]
fn heartbeat_payload_is_readable_by_discovery() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let host = Host::new("10.0.0.2", 1234);
    let mut task = worker_task(registry.clone(), &host, 3);
    task.tick();
    task.tick();

    let path = worker_path("default", &host);
    let raw = registry.get(&path)?.expect("heartbeat written");
    let beat = HeartBeat::decode(&path, &raw)?;
    assert_eq!(beat.host, "10.0.0.2");
    assert_eq!(beat.port, 1234);
    assert_eq!(beat.sequence, 2);
    Ok(())
}

#[test]
fn restarted_node_clears_its_old_dead_marker() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let host = Host::new("10.0.0.2", 1234);
    let path = worker_path("default", &host);
    let monitor = HeartbeatMonitor::new(registry.clone(), Duration::from_secs(10), 3);

    let mut first = worker_task(registry.clone(), &host, 3);
    assert_eq!(first.tick(), HeartbeatTick::Published);
    monitor.mark_dead(&path, Utc::now())?;
    assert_eq!(first.tick(), HeartbeatTick::Stop(StopReason::MarkedDead));

    // Same address, new process.
    let mut restarted = worker_task(registry.clone(), &host, 3);
    restarted.register()?;
    assert!(!registry.exists(&dead_path(&path))?);
    assert!(registry.exists(&path)?);
    assert_eq!(restarted.tick(), HeartbeatTick::Published);

    let discovery = HostDiscovery::new(registry.clone(), Duration::from_secs(60));
    assert_eq!(discovery.workers("default", Utc::now())?.len(), 1);

    // A fresh marker still stops it.
    monitor.mark_dead(&path, Utc::now())?;
    assert_eq!(restarted.tick(), HeartbeatTick::Stop(StopReason::MarkedDead));
    Ok(())
}

#[test]
fn suspended_connection_pauses_sweeps() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let session = Arc::new(SessionWatch::new());
    registry.add_connection_listener(session.clone());
    let monitor = HeartbeatMonitor::new(registry.clone(), Duration::from_secs(10), 3)
        .with_session(session.clone());
    let host = Host::new("10.0.0.2", 1234);
    let mut task = worker_task(registry.clone(), &host, 3);
    assert_eq!(task.tick(), HeartbeatTick::Published);

    let now = Utc::now();
    assert!(monitor.sweep_workers(now)?.is_empty());

    registry.set_available(false);
    assert!(session.is_suspended());
    // No registry call is made, so no error either.
    assert!(monitor.sweep_workers(now + TimeDelta::seconds(60))?.is_empty());

    registry.set_available(true);
    assert!(!session.is_suspended());
    assert_eq!(task.tick(), HeartbeatTick::Published);
    assert!(monitor.sweep_workers(Utc::now())?.is_empty());
    Ok(())
}

#[test]
fn reconnect_restarts_missing_timers() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let session = Arc::new(SessionWatch::new());
    registry.add_connection_listener(session.clone());
    let monitor = HeartbeatMonitor::new(registry.clone(), Duration::from_secs(10), 3)
        .with_session(session.clone());
    let host = Host::new("10.0.0.2", 1234);
    let path = worker_path("default", &host);
    let mut task = worker_task(registry.clone(), &host, 3);
    assert_eq!(task.tick(), HeartbeatTick::Published);

    let now = Utc::now();
    assert!(monitor.sweep_workers(now)?.is_empty());
    registry.delete(&path)?;
    assert!(monitor.sweep_workers(now + TimeDelta::seconds(1))?.is_empty());

    registry.disconnect();
    registry.reconnect();
    assert_eq!(session.lost_sessions(), 1);

    // Eleven seconds after it went missing, but only just after the reconnect.
    assert!(monitor.sweep_workers(now + TimeDelta::seconds(12))?.is_empty());
    let dead = monitor.sweep_workers(now + TimeDelta::seconds(23))?;
    assert_eq!(dead, vec![host]);
    Ok(())
}

#[tokio::test]
async fn heartbeat_republishes_after_session_loss() -> TestResult {
    let registry = Arc::new(InMemoryRegistry::new());
    let session = Arc::new(SessionWatch::new());
    registry.add_connection_listener(session.clone());
    let host = Host::new("10.0.0.2", 1234);
    let path = worker_path("default", &host);
    let task = HeartbeatTask::new(
        registry.clone(),
        Arc::new(NodeHeartbeatSource::new(host.clone(), "default")),
        vec![path.clone()],
        Duration::from_secs(3600),
        3,
    )
    .with_session(&session);
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(task.run(rx));
    {
        let registry = registry.clone();
        let path = path.clone();
        common::wait_until(move || registry.exists(&path).unwrap_or(false)).await;
    }

    registry.disconnect();
    registry.reconnect();
    assert!(!registry.exists(&path)?);

    // Long before the next interval tick.
    {
        let registry = registry.clone();
        let path = path.clone();
        common::wait_until(move || registry.exists(&path).unwrap_or(false)).await;
    }

    tx.send(true)?;
    let reason = common::with_timeout(handle).await?;
    assert_eq!(reason, StopReason::Shutdown);
    Ok(())
}
