//! The snapshot module contains the traits and structs for caching aggregate
//! state.
//!
//! A snapshot is never authoritative: it can always be re-derived from the
//! log, and callers treat a missing snapshot as "replay from the start".
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Aggregate, Result, Snapshot};

/// Represents a stored snapshot, including metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct StoredSnapshot<S: Snapshot> {
    /// The ID of the aggregate this snapshot belongs to.
    aggregate_id: Uuid,
    /// The version of the aggregate when this snapshot was taken.
    version: u64,
    /// When the snapshot was written.
    taken_at: DateTime<Utc>,
    /// The snapshot payload itself.
    snapshot: S,
}

impl<S: Snapshot> StoredSnapshot<S> {
    /// Creates a new stored snapshot, stamped with the current time.
    pub fn new(aggregate_id: Uuid, version: u64, snapshot: S) -> Self {
        Self {
            aggregate_id,
            version,
            taken_at: Utc::now(),
            snapshot,
        }
    }

    /// Returns the aggregate ID.
    pub fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }

    /// Returns the version of the aggregate when this snapshot was taken.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns when the snapshot was written.
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Returns the inner snapshot.
    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    /// Consumes the stored snapshot and returns the inner snapshot.
    pub fn into_snapshot(self) -> S {
        self.snapshot
    }
}

/// A snapshot store is responsible for persisting and loading snapshots.
///
/// Snapshots are an optimization to reduce the time it takes to hydrate an
/// aggregate. Instead of replaying all events from the beginning of time, an
/// aggregate can be restored from a recent snapshot and then only replay the
/// events that occurred after it.
#[async_trait]
pub trait SnapshotStore<A: Aggregate>: Send + Sync {
    /// Saves a snapshot for a given aggregate.
    ///
    /// This should overwrite any existing snapshot for the same aggregate.
    async fn save(&self, aggregate_id: Uuid, version: u64, snapshot: A::Snapshot) -> Result<()>;

    /// Loads the latest snapshot for a given aggregate.
    async fn load(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot<A::Snapshot>>>;
}
