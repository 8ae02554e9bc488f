//! Per-block simulation loop.
//!
//! Each tick generates a reading, stores it, prunes expired history,
//! evaluates thresholds and stores any alerts, then sleeps a jittered
//! interval. Every storage phase is isolated: a failed write is logged and
//! counted, and the loop carries on with the next phase and the next tick.

use super::generator::ReadingGenerator;
use super::thresholds;
use crate::config::SimulationConfig;
use crate::flock::FlockBlock;
use crate::sensor::{AlertEvent, Reading};
use crate::storage::MonitoringStore;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Tick interval used when none is given
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOptions {
    pub interval: Duration,
    /// Sleep jitter as a fraction of `interval`
    pub jitter_fraction: f64,
    /// Floor for the jittered sleep
    pub min_sleep: Duration,
    pub retention_days: i64,
    /// Exit after this many ticks. `None` runs until stopped.
    pub max_ticks: Option<u64>,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self::from(&SimulationConfig::default())
    }
}

impl From<&SimulationConfig> for SimulationOptions {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            interval: config.default_interval(),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
            min_sleep: config.min_sleep(),
            retention_days: config.retention_days,
            max_ticks: None,
            seed: None,
        }
    }
}

impl SimulationOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = Some(max_ticks);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Lifecycle of one runner: Created → Running → Stopping → Terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Created,
    Running,
    Stopping,
    Terminated,
}

/// Counters for one runner, readable while it runs.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunnerStats {
    pub ticks: u64,
    pub readings_written: u64,
    pub alerts_written: u64,
    pub write_failures: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What a single tick produced
#[derive(Debug, Clone)]
pub struct TickReport {
    pub reading: Reading,
    pub alerts: Vec<AlertEvent>,
    /// Storage calls that failed during the tick
    pub failures: usize,
}

pub struct SimulationRunner {
    block: FlockBlock,
    generator: ReadingGenerator,
    store: Arc<dyn MonitoringStore>,
    options: SimulationOptions,
    rng: StdRng,
    ticks: u64,
    stats: Arc<Mutex<RunnerStats>>,
}

impl SimulationRunner {
    /// Builds a runner from a snapshot of the block's attributes.
    pub fn new(block: FlockBlock, store: Arc<dyn MonitoringStore>, options: SimulationOptions) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            generator: ReadingGenerator::new(&block),
            block,
            store,
            options,
            rng,
            ticks: 0,
            stats: Arc::new(Mutex::new(RunnerStats::default())),
        }
    }

    pub fn block(&self) -> &FlockBlock {
        &self.block
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.options
    }

    pub fn generator(&self) -> &ReadingGenerator {
        &self.generator
    }

    /// Shared stats handle for external monitoring
    pub fn stats(&self) -> Arc<Mutex<RunnerStats>> {
        Arc::clone(&self.stats)
    }

    /// Runs one tick. Storage failures are logged and reported, never returned.
    pub fn tick(&mut self) -> TickReport {
        let block_id = self.block.id;
        let owner_id = self.block.owner_id;
        let mut errors: Vec<String> = Vec::new();

        let reading = Reading {
            block_id,
            owner_id,
            timestamp: Utc::now(),
            values: self.generator.step(&mut self.rng),
        };

        let reading_written = match self.store.create_reading(&reading) {
            Ok(_) => true,
            Err(e) => {
                error!(block_id, error = %e, "Failed to save reading");
                errors.push(format!("save reading: {:#}", e));
                false
            }
        };

        match self.store.prune_readings(owner_id, self.options.retention_days) {
            Ok(0) => {}
            Ok(removed) => debug!(block_id, owner_id, removed, "Pruned expired readings"),
            Err(e) => {
                error!(block_id, error = %e, "Failed to prune readings");
                errors.push(format!("prune readings: {:#}", e));
            }
        }

        let alerts = thresholds::evaluate(&reading);
        let mut alerts_written = 0u64;
        for alert in &alerts {
            match self.store.create_alert(alert) {
                Ok(_) => alerts_written += 1,
                Err(e) => {
                    error!(block_id, category = %alert.category, error = %e, "Failed to save alert");
                    errors.push(format!("save alert: {:#}", e));
                }
            }
        }
        if !alerts.is_empty() {
            debug!(block_id, count = alerts.len(), "Threshold alerts raised");
        }

        self.ticks += 1;
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.ticks = self.ticks;
            stats.last_tick = Some(reading.timestamp);
            if reading_written {
                stats.readings_written += 1;
            }
            stats.alerts_written += alerts_written;
            stats.write_failures += errors.len() as u64;
            if let Some(last) = errors.last() {
                stats.last_error = Some(last.clone());
            }
        }

        TickReport {
            reading,
            alerts,
            failures: errors.len(),
        }
    }

    /// Interval ± jitter, never below the configured floor.
    pub fn next_sleep(&mut self) -> Duration {
        let fraction = self.options.jitter_fraction;
        let jitter = if fraction > 0.0 {
            self.rng.gen_range(-fraction..=fraction)
        } else {
            0.0
        };
        let secs = (self.options.interval.as_secs_f64() * (1.0 + jitter)).max(0.0);
        // Saturate instead of panicking on intervals near Duration::MAX
        Duration::try_from_secs_f64(secs)
            .unwrap_or(Duration::MAX)
            .max(self.options.min_sleep)
    }

    fn tick_limit_reached(&self) -> bool {
        self.options.max_ticks.is_some_and(|max| self.ticks >= max)
    }

    /// Drives ticks until stopped.
    ///
    /// Exits when `stop` is set or its sender is dropped, or when the tick
    /// limit is reached. A stop observed mid-sleep cuts the sleep short; a
    /// tick already in progress is finished first.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>, state: &watch::Sender<RunnerState>) {
        let block_id = self.block.id;
        state.send_replace(RunnerState::Running);
        info!(
            block_id,
            interval_ms = self.options.interval.as_millis() as u64,
            "Simulation running"
        );

        loop {
            if *stop.borrow() {
                debug!(block_id, "Stop signal observed");
                break;
            }
            if self.tick_limit_reached() {
                break;
            }

            self.tick();

            if self.tick_limit_reached() {
                info!(block_id, ticks = self.ticks, "Tick limit reached");
                break;
            }

            let pause = self.next_sleep();
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        warn!(block_id, "Stop channel closed, shutting down simulation");
                        break;
                    }
                }
            }
        }

        state.send_replace(RunnerState::Stopping);
        debug!(block_id, ticks = self.ticks, "Simulation loop finished");
    }
}
