//! Provides a generic repository for interacting with aggregates.
use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{Aggregate, EventLog, Result, snapshot::SnapshotStore};

/// Defines the standard interface for a repository.
#[async_trait]
pub trait Repository<A: Aggregate>: Send + Sync {
    /// Loads an aggregate by replaying its stream.
    ///
    /// Returns `Ok(None)` when the aggregate has no events.
    async fn load(&self, id: Uuid) -> Result<Option<A>>;

    /// Appends the aggregate's uncommitted events and clears its buffer.
    ///
    /// On [`Error::ConcurrencyConflict`](crate::Error::ConcurrencyConflict)
    /// the buffer is left intact; the caller reloads the aggregate and
    /// reissues its command. There is no automatic retry.
    async fn save(&self, aggregate: &mut A) -> Result<()>;
}

/// A generic, high-level repository for loading and saving aggregates.
///
/// This repository orchestrates an [`EventLog`] and an optional
/// [`SnapshotStore`].
pub struct GenericRepository<A, L, SS>
where
    A: Aggregate,
    L: EventLog<A::Event>,
    SS: SnapshotStore<A>,
{
    log: Arc<L>,
    snapshot_store: Option<Arc<SS>>,
    snapshot_frequency: Option<u64>,
    _phantom: PhantomData<A>,
}

impl<A, L, SS> GenericRepository<A, L, SS>
where
    A: Aggregate,
    L: EventLog<A::Event>,
    SS: SnapshotStore<A>,
{
    /// Creates a new `GenericRepository`.
    pub fn new(log: Arc<L>, snapshot_store: Option<Arc<SS>>) -> Self {
        Self {
            log,
            snapshot_store,
            snapshot_frequency: None,
            _phantom: PhantomData,
        }
    }

    /// Sets the frequency at which snapshots should be created.
    ///
    /// For example, a value of `Some(100)` means a snapshot will be created
    /// every 100 events. `Some(0)` is treated as `None`.
    pub fn with_snapshot_frequency(mut self, frequency: Option<u64>) -> Self {
        self.snapshot_frequency = frequency.filter(|f| *f > 0);
        self
    }

    /// Returns the log this repository writes to.
    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    async fn restore_from_snapshot(&self, id: Uuid) -> Result<Option<A>> {
        let Some(snapshot_store) = &self.snapshot_store else {
            return Ok(None);
        };
        let Some(stored) = snapshot_store.load(id).await? else {
            return Ok(None);
        };

        let stream_version = self.log.stream_version(id).await?;
        if stored.version() > stream_version {
            warn!(
                snapshot.version = stored.version(),
                stream_version, "snapshot is ahead of the stream, replaying from scratch"
            );
            return Ok(None);
        }

        let version = stored.version();
        Ok(Some(A::from_snapshot(id, version, stored.into_snapshot())))
    }
}

#[async_trait]
impl<A, L, SS> Repository<A> for GenericRepository<A, L, SS>
where
    A: Aggregate,
    L: EventLog<A::Event> + 'static,
    SS: SnapshotStore<A> + 'static,
{
    #[instrument(skip(self), fields(aggregate.id = %id))]
    async fn load(&self, id: Uuid) -> Result<Option<A>> {
        // Hydrate from a snapshot first so only the delta of events that
        // occurred afterwards is replayed.
        if let Some(mut aggregate) = self.restore_from_snapshot(id).await? {
            let delta = self.log.read(id, aggregate.version() + 1).await?;
            debug!(
                snapshot.version = aggregate.version(),
                delta = delta.len(),
                "replaying from snapshot"
            );
            aggregate.replay(delta)?;
            return Ok(Some(aggregate));
        }

        let events = self.log.read(id, 0).await?;
        if events.is_empty() {
            return Ok(None);
        }
        A::from_events(events).map(Some)
    }

    #[instrument(skip(self, aggregate), fields(aggregate.id = %aggregate.id()))]
    async fn save(&self, aggregate: &mut A) -> Result<()> {
        let uncommitted = aggregate.uncommitted_events().to_vec();
        if uncommitted.is_empty() {
            return Ok(());
        }

        let version_after_save = aggregate.version();
        let version_before_save = version_after_save - uncommitted.len() as u64;

        self.log
            .append(aggregate.id(), version_before_save, uncommitted)
            .await?;
        aggregate.clear_uncommitted_events();

        if let (Some(snapshot_store), Some(frequency)) =
            (&self.snapshot_store, self.snapshot_frequency)
        {
            // The events are already committed; a failed snapshot only costs
            // a longer replay later.
            if version_after_save / frequency > version_before_save / frequency {
                if let Err(error) = snapshot_store
                    .save(aggregate.id(), version_after_save, aggregate.snapshot())
                    .await
                {
                    warn!(%error, version = version_after_save, "failed to write snapshot");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<A, R> Repository<A> for Arc<R>
where
    A: Aggregate,
    R: Repository<A> + Send + Sync,
{
    async fn load(&self, id: Uuid) -> Result<Option<A>> {
        (**self).load(id).await
    }

    async fn save(&self, aggregate: &mut A) -> Result<()> {
        (**self).save(aggregate).await
    }
}
