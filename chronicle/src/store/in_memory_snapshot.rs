//! An in-memory snapshot store.
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    Aggregate, Result,
    snapshot::{SnapshotStore, StoredSnapshot},
};

/// An in-memory, thread-safe snapshot store.
///
/// This is useful for testing or for applications that do not require a
/// persistent snapshot store.
#[derive(Debug)]
pub struct InMemorySnapshotStore<A: Aggregate> {
    snapshots: DashMap<Uuid, StoredSnapshot<A::Snapshot>>,
}

impl<A: Aggregate> Default for InMemorySnapshotStore<A> {
    fn default() -> Self {
        Self {
            snapshots: DashMap::new(),
        }
    }
}

#[async_trait]
impl<A> SnapshotStore<A> for InMemorySnapshotStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self, snapshot))]
    async fn save(&self, aggregate_id: Uuid, version: u64, snapshot: A::Snapshot) -> Result<()> {
        self.snapshots.insert(
            aggregate_id,
            StoredSnapshot::new(aggregate_id, version, snapshot),
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self, aggregate_id: Uuid) -> Result<Option<StoredSnapshot<A::Snapshot>>> {
        Ok(self.snapshots.get(&aggregate_id).map(|r| r.clone()))
    }
}
