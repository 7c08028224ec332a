//! An in-memory event log, useful for testing and single-node deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{Error, Event, EventEnvelope, EventLog, Result};

type EventStream<E> = Vec<EventEnvelope<E>>;

/// Thread-safe map keyed by aggregate id
type StreamMap<E> = DashMap<Uuid, EventStream<E>>;

/// An in-memory, thread-safe event log.
///
/// Each aggregate's stream lives in its own map entry, so the version check
/// and the extension of a stream happen under that entry's lock while other
/// aggregates stay writable. A second, global index keeps every event in
/// position order; it is only locked for the instant a batch is published.
pub struct InMemoryEventLog<E: Event> {
    streams: StreamMap<E>,
    global: RwLock<Vec<EventEnvelope<E>>>,
}

impl<E: Event> Default for InMemoryEventLog<E> {
    fn default() -> Self {
        Self {
            streams: DashMap::new(),
            global: RwLock::new(Vec::new()),
        }
    }
}

impl<E: Event> InMemoryEventLog<E> {
    /// Returns the total number of events in the log.
    pub fn len(&self) -> usize {
        self.global.read().len()
    }

    /// Whether the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.global.read().is_empty()
    }

    /// Checks, sequences and publishes a batch. The caller holds the
    /// stream's entry lock for the duration.
    fn commit(
        &self,
        stream: &mut EventStream<E>,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<Vec<EventEnvelope<E>>> {
        let current_version = stream.len() as u64;
        if current_version != expected_version {
            debug!(current_version, "rejecting append on version mismatch");
            return Err(Error::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let mut batch = sequence_batch(aggregate_id, current_version, events)?;
        if batch.is_empty() {
            return Ok(batch);
        }

        // Positions are handed out under the global lock so the global index
        // never exposes a position before every lower one is visible.
        {
            let mut global = self.global.write();
            let mut position = global.len() as u64;
            for event in &mut batch {
                position += 1;
                event.position = Some(position);
            }
            global.extend(batch.iter().cloned());
        }
        stream.extend(batch.iter().cloned());

        debug!(version = stream.len(), "appended batch");
        Ok(batch)
    }
}

/// Checks a batch against the stream's current version and stamps it.
fn sequence_batch<E: Event>(
    aggregate_id: Uuid,
    current_version: u64,
    events: Vec<EventEnvelope<E>>,
) -> Result<Vec<EventEnvelope<E>>> {
    let mut expected = current_version;
    events
        .into_iter()
        .map(|event| {
            expected += 1;
            let found = event.version();
            if found != 0 && found != expected {
                return Err(Error::SequenceViolation {
                    aggregate_id,
                    expected,
                    found,
                });
            }
            Ok(event.stamped(aggregate_id, expected))
        })
        .collect()
}

#[async_trait]
impl<E: Event> EventLog<E> for InMemoryEventLog<E> {
    #[instrument(skip(self, events), fields(batch = events.len()))]
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<Vec<EventEnvelope<E>>> {
        let mut stream = self.streams.entry(aggregate_id).or_default();
        let result = self.commit(&mut stream, aggregate_id, expected_version, events);

        // A write that stored nothing must not leave an empty stream behind.
        if stream.is_empty() {
            drop(stream);
            self.streams.remove_if(&aggregate_id, |_, stream| stream.is_empty());
        }
        result
    }

    #[instrument(skip(self))]
    async fn read(&self, aggregate_id: Uuid, from_version: u64) -> Result<Vec<EventEnvelope<E>>> {
        match self.streams.get(&aggregate_id) {
            Some(stream) => Ok(stream
                .iter()
                .filter(|e| e.version() >= from_version)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    #[instrument(skip(self))]
    async fn read_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<EventEnvelope<E>>> {
        let mut events: Vec<_> = self
            .global
            .read()
            .iter()
            .filter(|e| since.is_none_or(|since| e.timestamp() >= since))
            .cloned()
            .collect();
        // Stable, so equal timestamps keep position order.
        events.sort_by_key(|e| e.timestamp());
        Ok(events)
    }

    #[instrument(skip(self))]
    async fn read_all_after(&self, position: u64) -> Result<Vec<EventEnvelope<E>>> {
        let global = self.global.read();
        // Position `n` lives at index `n - 1`.
        let start = usize::try_from(position)
            .unwrap_or(usize::MAX)
            .min(global.len());
        Ok(global[start..].to_vec())
    }

    async fn stream_version(&self, aggregate_id: Uuid) -> Result<u64> {
        Ok(self
            .streams
            .get(&aggregate_id)
            .map_or(0, |stream| stream.len() as u64))
    }
}
