use super::*;
use crate::flock::{AgeGroup, Breed, FlockBlock, NewFlockBlock};
use crate::sensor::{AlertEvent, Reading, StoredAlert, StoredReading};
use crate::storage::{AlertFilter, BlockDirectory, MonitoringStore, ReadingFilter, SqliteStore};
use anyhow::anyhow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn setup(number_of_birds: u32, breed: Breed, age_group: AgeGroup) -> (Arc<SqliteStore>, FlockBlock) {
    let store = Arc::new(SqliteStore::new(":memory:").expect("Failed to create test store"));
    let block = store
        .create_block(&NewFlockBlock {
            owner_id: 1,
            name: "Test block".to_string(),
            number_of_birds,
            breed,
            age_group,
            description: None,
        })
        .unwrap();
    (store, block)
}

fn options() -> SimulationOptions {
    SimulationOptions::default().with_seed(1234)
}

fn registry(store: Arc<SqliteStore>) -> SimulationRegistry {
    SimulationRegistry::new(store, options())
}

/// Store whose every write fails
#[derive(Default)]
struct FailingStore {
    attempts: AtomicU64,
}

impl MonitoringStore for FailingStore {
    fn create_reading(&self, _: &Reading) -> anyhow::Result<i64> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("disk full"))
    }
    fn prune_readings(&self, _: i64, _: i64) -> anyhow::Result<usize> {
        Err(anyhow!("disk full"))
    }
    fn create_alert(&self, _: &AlertEvent) -> anyhow::Result<i64> {
        Err(anyhow!("disk full"))
    }
    fn count_readings(&self, _: &ReadingFilter) -> anyhow::Result<u64> {
        Ok(0)
    }
    fn filter_readings(&self, _: &ReadingFilter) -> anyhow::Result<Vec<StoredReading>> {
        Ok(vec![])
    }
    fn latest_reading(&self, _: &ReadingFilter) -> anyhow::Result<Option<StoredReading>> {
        Ok(None)
    }
    fn filter_alerts(&self, _: &AlertFilter) -> anyhow::Result<Vec<StoredAlert>> {
        Ok(vec![])
    }
    fn resolve_alert(&self, _: i64) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Store that panics on the first write of every tick
struct PanickingStore;

impl MonitoringStore for PanickingStore {
    fn create_reading(&self, _: &Reading) -> anyhow::Result<i64> {
        panic!("storage driver crashed");
    }
    fn prune_readings(&self, _: i64, _: i64) -> anyhow::Result<usize> {
        Ok(0)
    }
    fn create_alert(&self, _: &AlertEvent) -> anyhow::Result<i64> {
        Ok(0)
    }
    fn count_readings(&self, _: &ReadingFilter) -> anyhow::Result<u64> {
        Ok(0)
    }
    fn filter_readings(&self, _: &ReadingFilter) -> anyhow::Result<Vec<StoredReading>> {
        Ok(vec![])
    }
    fn latest_reading(&self, _: &ReadingFilter) -> anyhow::Result<Option<StoredReading>> {
        Ok(None)
    }
    fn filter_alerts(&self, _: &AlertFilter) -> anyhow::Result<Vec<StoredAlert>> {
        Ok(vec![])
    }
    fn resolve_alert(&self, _: i64) -> anyhow::Result<bool> {
        Ok(false)
    }
}

fn assert_in_bounds(r: &StoredReading) {
    let v = &r.reading.values;
    assert!((24.0..=40.0).contains(&v.temperature), "{:?}", v);
    assert!((45.0..=90.0).contains(&v.humidity), "{:?}", v);
    assert!(v.feed_level >= 0.0, "{:?}", v);
    assert!(v.water_level >= 0.0, "{:?}", v);
    assert!((0.0..=100.0).contains(&v.ammonia), "{:?}", v);
    assert!((5.0..=100.0).contains(&v.activity_level), "{:?}", v);
}

// --- SimulationRunner ---

#[test]
fn test_tick_persists_reading() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let mut runner = SimulationRunner::new(block.clone(), store.clone(), options());

    let report = runner.tick();

    assert_eq!(report.failures, 0);
    assert_eq!(report.reading.block_id, block.id);
    assert_eq!(report.reading.owner_id, block.owner_id);
    assert!((report.reading.values.temperature - 32.0).abs() <= 0.2 + 1e-9);

    let stored = store
        .latest_reading(&ReadingFilter::for_block(block.id))
        .unwrap()
        .unwrap();
    assert_eq!(stored.reading.values, report.reading.values);

    let stats = runner.stats().lock().unwrap().clone();
    assert_eq!(stats.ticks, 1);
    assert_eq!(stats.readings_written, 1);
    assert_eq!(stats.write_failures, 0);
}

#[test]
fn test_every_breach_is_persisted_as_alert() {
    // 500 birds empty feeders and drinkers within a few hundred ticks
    let (store, block) = setup(500, Breed::Layer, AgeGroup::Chick);
    let mut runner = SimulationRunner::new(block.clone(), store.clone(), options());

    let mut raised = 0;
    let mut saw_low_feed = false;
    for _ in 0..400 {
        let report = runner.tick();
        assert_eq!(report.alerts, evaluate(&report.reading));
        raised += report.alerts.len();
        saw_low_feed |= report
            .alerts
            .iter()
            .any(|a| a.category == "feed_level too low");
    }

    assert!(saw_low_feed);
    let stored = store
        .filter_alerts(&AlertFilter::for_block(block.id))
        .unwrap();
    assert_eq!(stored.len(), raised);
    assert!(stored.iter().all(|a| !a.alert.resolved));
    assert_eq!(runner.stats().lock().unwrap().alerts_written, raised as u64);
}

#[test]
fn test_persisted_readings_respect_bounds() {
    let (store, block) = setup(80, Breed::Kuroiler, AgeGroup::Grower);
    let mut runner = SimulationRunner::new(block.clone(), store.clone(), options());

    for _ in 0..300 {
        runner.tick();
    }

    let readings = store
        .filter_readings(&ReadingFilter {
            ascending: true,
            ..ReadingFilter::for_block(block.id)
        })
        .unwrap();
    assert_eq!(readings.len(), 300);
    readings.iter().for_each(assert_in_bounds);

    for pair in readings.windows(2) {
        assert!(pair[1].reading.values.feed_level <= pair[0].reading.values.feed_level);
        assert!(pair[1].reading.values.water_level <= pair[0].reading.values.water_level);
    }
}

#[test]
fn test_zero_birds_runs() {
    let (store, block) = setup(0, Breed::Local, AgeGroup::Chick);
    let mut runner = SimulationRunner::new(block, store, options());
    for _ in 0..10 {
        assert_eq!(runner.tick().failures, 0);
    }
}

#[test]
fn test_failed_writes_do_not_abort_tick() {
    let (_, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let store = Arc::new(FailingStore::default());
    let mut runner = SimulationRunner::new(block, store.clone(), options());

    let first = runner.tick();
    let second = runner.tick();

    // reading + prune at minimum, plus one per alert
    assert_eq!(first.failures, 2 + first.alerts.len());
    assert_eq!(second.failures, 2 + second.alerts.len());
    assert_eq!(store.attempts.load(Ordering::SeqCst), 2);

    let stats = runner.stats().lock().unwrap().clone();
    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.readings_written, 0);
    assert!(stats.last_error.unwrap().contains("disk full"));
}

#[test]
fn test_writes_after_block_deleted_are_logged_not_fatal() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let mut runner = SimulationRunner::new(block.clone(), store.clone(), options());
    runner.tick();

    assert!(store.delete_block(block.id).unwrap());

    let report = runner.tick();
    assert!(report.failures >= 1);
    assert_eq!(runner.stats().lock().unwrap().ticks, 2);
}

#[test]
fn test_next_sleep_jitter_and_floor() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let mut runner = SimulationRunner::new(block.clone(), store.clone(), options());
    for _ in 0..200 {
        let pause = runner.next_sleep().as_secs_f64();
        assert!((2.85..=3.15).contains(&pause), "{}", pause);
    }

    let mut fast = SimulationRunner::new(
        block,
        store,
        options().with_interval(Duration::from_millis(100)),
    );
    assert_eq!(fast.next_sleep(), Duration::from_millis(500));
}

#[test]
fn test_next_sleep_saturates_huge_interval() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let mut runner = SimulationRunner::new(
        block,
        store,
        options().with_interval(Duration::MAX),
    );
    for _ in 0..50 {
        let pause = runner.next_sleep();
        assert!(pause >= Duration::from_secs(1_000_000_000), "{:?}", pause);
    }
}

#[test]
fn test_options_from_config() {
    let config = crate::config::SimulationConfig {
        default_interval_seconds: 2.0,
        jitter_fraction: 0.1,
        min_sleep_seconds: 1.0,
        retention_days: 7,
    };
    let opts = SimulationOptions::from(&config);
    assert_eq!(opts.interval, Duration::from_secs(2));
    assert_eq!(opts.min_sleep, Duration::from_secs(1));
    assert_eq!(opts.retention_days, 7);
    assert!(opts.max_ticks.is_none());

    assert_eq!(SimulationOptions::default().interval, DEFAULT_INTERVAL);
}

// --- SimulationRegistry ---

#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store);

    let first = registry.start(&block);
    assert!(registry.is_running(block.id));

    let second = registry.start_with_interval(&block, Duration::from_secs(10));
    assert_eq!(first.run_id(), second.run_id());
    assert_eq!(second.interval(), DEFAULT_INTERVAL);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.running_blocks(), vec![block.id]);

    assert!(registry.stop(block.id));
}

#[tokio::test(start_paused = true)]
async fn test_stop_twice() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store);

    let handle = registry.start(&block);
    assert!(registry.stop(block.id));
    assert!(!registry.is_running(block.id));
    assert!(!registry.stop(block.id));

    handle.terminated().await;
    assert_eq!(handle.state(), RunnerState::Terminated);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_stop_unknown_block() {
    let (store, _) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store);

    assert!(!registry.stop(999));
    assert!(!registry.is_running(999));
    assert!(registry.handle(999).is_none());
    assert_eq!(registry.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_five_tick_scenario() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store.clone());

    let handle = registry.start_with(
        &block,
        options()
            .with_interval(Duration::from_secs(3))
            .with_max_ticks(5),
    );
    handle.terminated().await;

    assert!(!registry.is_running(block.id));
    assert_eq!(handle.stats().ticks, 5);

    let readings = store
        .filter_readings(&ReadingFilter {
            ascending: true,
            ..ReadingFilter::for_block(block.id)
        })
        .unwrap();
    assert_eq!(readings.len(), 5);
    readings.iter().for_each(assert_in_bounds);

    // One-decimal rounding is monotone, so a step of at most 0.2 stays within 0.2
    assert!((readings[0].reading.values.temperature - 32.0).abs() <= 0.2 + 1e-9);
    for pair in readings.windows(2) {
        let delta = pair[1].reading.values.temperature - pair[0].reading.values.temperature;
        assert!(delta.abs() <= 0.2 + 1e-9, "{}", delta);
    }
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_natural_exit() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store);

    let first = registry.start_with(&block, options().with_max_ticks(1));
    first.terminated().await;
    assert!(!registry.is_running(block.id));

    let second = registry.start(&block);
    assert_ne!(first.run_id(), second.run_id());
    assert!(registry.is_running(block.id));
    registry.stop_and_wait(block.id).await;
}

#[tokio::test(start_paused = true)]
async fn test_old_runner_exit_keeps_new_registration() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store);

    let old = registry.start(&block);
    assert!(registry.stop(block.id));
    let new = registry.start(&block);

    old.terminated().await;

    assert!(registry.is_running(block.id));
    assert_eq!(registry.handle(block.id).unwrap().run_id(), new.run_id());
    assert!(registry.stop_and_wait(block.id).await);
}

#[tokio::test(start_paused = true)]
async fn test_runner_keeps_ticking_while_running() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store.clone());

    let handle = registry.start(&block);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(registry.is_running(block.id));
    assert_eq!(handle.state(), RunnerState::Running);
    let ticks = handle.stats().ticks;
    assert!((3..=5).contains(&ticks), "{}", ticks);
    assert_eq!(
        store
            .count_readings(&ReadingFilter::for_block(block.id))
            .unwrap(),
        ticks
    );

    assert!(registry.stop_and_wait(block.id).await);
    let after_stop = handle.stats().ticks;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.stats().ticks, after_stop);
}

#[tokio::test(start_paused = true)]
async fn test_failing_store_keeps_loop_alive() {
    let (_, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = SimulationRegistry::new(Arc::new(FailingStore::default()), options());

    let handle = registry.start(&block);
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(registry.is_running(block.id));
    let stats = handle.stats();
    assert!(stats.ticks >= 3);
    assert!(stats.write_failures >= 2 * stats.ticks);
    registry.shutdown();
    handle.terminated().await;
}

#[tokio::test(start_paused = true)]
async fn test_crashed_runner_unregisters_and_can_restart() {
    let (_, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = SimulationRegistry::new(Arc::new(PanickingStore), options());

    let crashed = registry.start(&block);
    crashed.terminated().await;

    assert_eq!(crashed.state(), RunnerState::Terminated);
    assert!(!registry.is_running(block.id));
    assert!(registry.handle(block.id).is_none());
    assert_eq!(registry.len(), 0);

    let restarted = registry.start(&block);
    assert_ne!(restarted.run_id(), crashed.run_id());
    restarted.terminated().await;
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_huge_interval_keeps_runner_alive() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store.clone());

    let handle = registry.start_with_interval(&block, Duration::MAX);
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(registry.is_running(block.id));
    assert_eq!(handle.stats().ticks, 1);
    assert!(registry.stop_and_wait(block.id).await);
    assert_eq!(handle.state(), RunnerState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_registry_stops_runners() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = registry(store);

    let handle = registry.start(&block);
    drop(registry);

    handle.terminated().await;
    assert_eq!(handle.state(), RunnerState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let store = Arc::new(SqliteStore::new(":memory:").unwrap());
    let registry = SimulationRegistry::new(store.clone(), options());

    let mut handles = Vec::new();
    for name in ["a", "b", "c"] {
        let block = store
            .create_block(&NewFlockBlock {
                owner_id: 1,
                name: name.to_string(),
                number_of_birds: 10,
                breed: Breed::Layer,
                age_group: AgeGroup::Grower,
                description: None,
            })
            .unwrap();
        handles.push(registry.start(&block));
    }
    assert_eq!(registry.len(), 3);

    assert_eq!(registry.shutdown(), 3);
    assert!(registry.is_empty());
    for handle in &handles {
        handle.terminated().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_creates_one_runner() {
    let (store, block) = setup(10, Breed::Broiler, AgeGroup::Adult);
    let registry = Arc::new(registry(store));

    let mut tasks = Vec::new();
    for _ in 0..32 {
        let registry = Arc::clone(&registry);
        let block = block.clone();
        tasks.push(tokio::spawn(async move { registry.start(&block).run_id() }));
    }

    let mut run_ids = Vec::new();
    for task in tasks {
        run_ids.push(task.await.unwrap());
    }
    run_ids.dedup();
    assert_eq!(run_ids.len(), 1);
    assert_eq!(registry.len(), 1);

    assert!(registry.stop_and_wait(block.id).await);
    assert!(!registry.is_running(block.id));
}
