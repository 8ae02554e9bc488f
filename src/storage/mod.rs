// Storage collaborators consumed by the simulator and the API

mod sqlite;

pub use sqlite::SqliteStore;

use crate::flock::{FlockBlock, FlockBlockUpdate, NewFlockBlock};
use crate::sensor::{AlertEvent, Reading, StoredAlert, StoredReading};
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Reading and alert persistence.
///
/// Each call is independently atomic. Writes are scoped by block id, so
/// runners for different blocks never contend on the same rows.
pub trait MonitoringStore: Send + Sync {
    /// Appends a reading. Fails if the block no longer exists.
    fn create_reading(&self, reading: &Reading) -> Result<i64>;

    /// Deletes the owner's readings older than `older_than_days`. Returns rows removed.
    fn prune_readings(&self, owner_id: i64, older_than_days: i64) -> Result<usize>;

    /// Appends an alert. Fails if the block no longer exists.
    fn create_alert(&self, alert: &AlertEvent) -> Result<i64>;

    fn count_readings(&self, filter: &ReadingFilter) -> Result<u64>;

    fn filter_readings(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>>;

    /// Newest reading matching the filter (limit and order are ignored)
    fn latest_reading(&self, filter: &ReadingFilter) -> Result<Option<StoredReading>>;

    fn filter_alerts(&self, filter: &AlertFilter) -> Result<Vec<StoredAlert>>;

    /// Marks an alert resolved. Returns false if no such alert exists.
    fn resolve_alert(&self, alert_id: i64) -> Result<bool>;
}

/// Source of block attributes for starting simulations.
pub trait BlockDirectory: Send + Sync {
    fn create_block(&self, new: &NewFlockBlock) -> Result<FlockBlock>;

    /// Creates a block unless its owner already has `max_per_owner` blocks.
    ///
    /// The count and the insert happen atomically, so concurrent calls for
    /// one owner never exceed the limit.
    ///
    /// # Returns
    /// * `Ok(Some(FlockBlock))` - Block created
    /// * `Ok(None)` - The owner is at the limit
    /// * `Err` - If the database operation fails
    fn create_block_within_limit(
        &self,
        new: &NewFlockBlock,
        max_per_owner: usize,
    ) -> Result<Option<FlockBlock>>;

    fn get_block(&self, block_id: i64) -> Result<Option<FlockBlock>>;

    fn list_blocks(&self, owner_id: i64) -> Result<Vec<FlockBlock>>;

    fn update_block(&self, block_id: i64, update: &FlockBlockUpdate) -> Result<Option<FlockBlock>>;

    /// Deletes a block with its readings and alerts. Returns false if absent.
    fn delete_block(&self, block_id: i64) -> Result<bool>;
}

/// Query for readings. Unset fields do not constrain the result.
#[derive(Clone, Debug, Default)]
pub struct ReadingFilter {
    pub owner_id: Option<i64>,
    pub block_id: Option<i64>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Oldest first when true, newest first otherwise
    pub ascending: bool,
}

impl ReadingFilter {
    pub fn for_block(block_id: i64) -> Self {
        Self {
            block_id: Some(block_id),
            ..Default::default()
        }
    }

    pub fn for_owner(owner_id: i64) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct AlertFilter {
    pub owner_id: Option<i64>,
    pub block_id: Option<i64>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn for_block(block_id: i64) -> Self {
        Self {
            block_id: Some(block_id),
            ..Default::default()
        }
    }

    pub fn for_owner(owner_id: i64) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn unresolved(mut self) -> Self {
        self.resolved = Some(false);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
