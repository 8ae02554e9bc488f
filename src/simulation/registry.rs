//! Process-wide directory of running simulations.
//!
//! The registry owns one entry per block with a live runner. All inserts,
//! removals and lookups go through a single mutex that is held only for the
//! map operation itself, never across a sleep, a storage call or an await.

use super::runner::{RunnerState, RunnerStats, SimulationOptions, SimulationRunner};
use crate::flock::FlockBlock;
use crate::storage::MonitoringStore;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

type Entries = Mutex<HashMap<i64, RunnerEntry>>;

struct RunnerEntry {
    handle: RunnerHandle,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RunnerEntry {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Caller-facing view of one runner launch.
///
/// Cloning is cheap. A handle stays valid after its runner exits; it then
/// reports [`RunnerState::Terminated`].
#[derive(Clone, Debug)]
pub struct RunnerHandle {
    block_id: i64,
    run_id: Uuid,
    interval: Duration,
    started_at: DateTime<Utc>,
    stats: Arc<Mutex<RunnerStats>>,
    state: watch::Receiver<RunnerState>,
}

impl RunnerHandle {
    /// Block this runner simulates
    pub fn block_id(&self) -> i64 {
        self.block_id
    }

    /// Unique per launch; a restart of the same block gets a new id
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Mean tick interval; actual sleeps are jittered around it
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current lifecycle state.
    ///
    /// # Returns
    /// * `RunnerState::Terminated` - Once the loop has exited, including after a crash
    /// * Any earlier state while the task is still alive
    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Snapshot of the runner's counters at the time of the call
    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Resolves once the runner's loop has exited.
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        // Err means the sender is gone, which also means the task is gone
        let _ = state
            .wait_for(|s| *s == RunnerState::Terminated)
            .await;
    }
}

/// Unregisters a runner when its task ends, however it ends.
struct ExitGuard {
    entries: Weak<Entries>,
    block_id: i64,
    run_id: Uuid,
    state: watch::Sender<RunnerState>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(block_id = self.block_id, run_id = %self.run_id, "Simulation loop crashed");
        }

        // Only remove our own entry: the block may have been restarted since
        if let Some(entries) = self.entries.upgrade() {
            let mut map = lock(&entries);
            if map
                .get(&self.block_id)
                .is_some_and(|entry| entry.handle.run_id == self.run_id)
            {
                map.remove(&self.block_id);
                debug!(block_id = self.block_id, "Runner unregistered itself");
            }
        }

        self.state.send_replace(RunnerState::Terminated);
        info!(block_id = self.block_id, run_id = %self.run_id, "Block simulator exited");
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<i64, RunnerEntry>> {
    // Nothing panics while holding the lock, but a poisoned map is still usable
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

/// Starts, stops and reports on per-block simulation runners.
///
/// Construct one per process and share it by `Arc`. Dropping the registry
/// signals every runner to stop. Methods that launch runners must be called
/// from within a Tokio runtime.
pub struct SimulationRegistry {
    entries: Arc<Entries>,
    store: Arc<dyn MonitoringStore>,
    defaults: SimulationOptions,
}

impl SimulationRegistry {
    pub fn new(store: Arc<dyn MonitoringStore>, defaults: SimulationOptions) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            store,
            defaults,
        }
    }

    pub fn defaults(&self) -> &SimulationOptions {
        &self.defaults
    }

    /// Starts a runner with the default options.
    pub fn start(&self, block: &FlockBlock) -> RunnerHandle {
        self.start_with(block, self.defaults.clone())
    }

    pub fn start_with_interval(&self, block: &FlockBlock, interval: Duration) -> RunnerHandle {
        self.start_with(block, self.defaults.clone().with_interval(interval))
    }

    /// Starts a runner for `block` unless one is already alive.
    ///
    /// Idempotent: if a live runner exists its handle is returned unchanged
    /// and `options` are ignored. Concurrent calls for the same block create
    /// exactly one runner. A dead entry left behind is replaced.
    ///
    /// # Arguments
    /// * `block` - Block to simulate; its attributes are captured at start
    /// * `options` - Interval, jitter, seed and tick limit for a new runner
    ///
    /// # Returns
    /// Handle of the live runner, either the existing one or the new one
    pub fn start_with(&self, block: &FlockBlock, options: SimulationOptions) -> RunnerHandle {
        let mut map = lock(&self.entries);

        if let Some(existing) = map.get(&block.id) {
            if existing.is_alive() {
                info!(block_id = block.id, name = %block.name, "Simulator already running");
                return existing.handle.clone();
            }
            debug!(block_id = block.id, "Replacing stale simulator entry");
            map.remove(&block.id);
        }

        let runner = SimulationRunner::new(block.clone(), Arc::clone(&self.store), options);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(RunnerState::Created);

        let handle = RunnerHandle {
            block_id: block.id,
            run_id: Uuid::new_v4(),
            interval: runner.options().interval,
            started_at: Utc::now(),
            stats: runner.stats(),
            state: state_rx,
        };

        let guard = ExitGuard {
            entries: Arc::downgrade(&self.entries),
            block_id: block.id,
            run_id: handle.run_id,
            state: state_tx,
        };

        // The task cannot unregister before the insert below: its guard
        // needs this lock.
        let task = tokio::spawn(async move {
            let guard = guard;
            runner.run(stop_rx, &guard.state).await;
        });

        map.insert(
            block.id,
            RunnerEntry {
                handle: handle.clone(),
                stop_tx,
                task,
            },
        );

        info!(
            block_id = block.id,
            name = %block.name,
            run_id = %handle.run_id,
            "Started simulator"
        );
        handle
    }

    /// Signals the block's runner to stop and forgets it.
    ///
    /// Does not wait for the loop to exit; see
    /// [`SimulationRegistry::stop_and_wait`].
    ///
    /// # Returns
    /// * `true` - A runner was registered and has been signalled
    /// * `false` - Nothing was running for `block_id`
    pub fn stop(&self, block_id: i64) -> bool {
        self.take(block_id).is_some()
    }

    /// Like [`SimulationRegistry::stop`], but resolves once the loop has exited.
    ///
    /// A tick already in progress finishes first, so no write from the old
    /// runner lands after this returns.
    pub async fn stop_and_wait(&self, block_id: i64) -> bool {
        match self.take(block_id) {
            Some(handle) => {
                handle.terminated().await;
                true
            }
            None => false,
        }
    }

    fn take(&self, block_id: i64) -> Option<RunnerHandle> {
        let removed = lock(&self.entries).remove(&block_id);
        match removed {
            Some(entry) => {
                entry.stop_tx.send_replace(true);
                info!(block_id, run_id = %entry.handle.run_id, "Stopped simulator");
                Some(entry.handle)
            }
            None => {
                debug!(block_id, "No running simulator found");
                None
            }
        }
    }

    /// True iff a runner is registered for the block and its task is alive.
    pub fn is_running(&self, block_id: i64) -> bool {
        lock(&self.entries)
            .get(&block_id)
            .is_some_and(RunnerEntry::is_alive)
    }

    /// Handle of the block's live runner, if any
    pub fn handle(&self, block_id: i64) -> Option<RunnerHandle> {
        lock(&self.entries)
            .get(&block_id)
            .filter(|entry| entry.is_alive())
            .map(|entry| entry.handle.clone())
    }

    /// Ids of blocks with a live runner, ascending
    pub fn running_blocks(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = lock(&self.entries)
            .iter()
            .filter(|(_, entry)| entry.is_alive())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live runners
    pub fn len(&self) -> usize {
        lock(&self.entries)
            .values()
            .filter(|entry| entry.is_alive())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Signals every runner to stop. Returns how many were registered.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<RunnerEntry> = lock(&self.entries).drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.stop_tx.send_replace(true);
        }
        if count > 0 {
            info!(runner_count = count, "Signalled all simulators to stop");
        }
        count
    }
}
