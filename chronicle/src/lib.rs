//! # Event-Sourced State Core
//!
//! `chronicle` keeps application state as a fold over an append-only event
//! log. It provides the pieces needed to write through aggregates and read
//! through projections:
//!
//! - **[`EventLog`]**: per-aggregate ordered, append-only event storage with
//!   optimistic concurrency control and a global position for every event.
//! - **[`Aggregate`]**: a consistency boundary whose state is exactly the
//!   left-fold of its own events. Commands validate against that state and
//!   raise at most one event each.
//! - **[`Repository`](repository::Repository)**: loads aggregates by replay
//!   and saves them by appending their uncommitted events.
//! - **[`SnapshotStore`](snapshot::SnapshotStore)**: an optional cache of
//!   aggregate state used to shortcut replay.
//! - **[`ProjectionEngine`](projection::ProjectionEngine)**: feeds read models
//!   from the global stream, either by full rebuild or incremental catch-up.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chronicle::{
//!     Aggregate,
//!     order::{LineItem, Order, OrderEvent, OrderSummaryView},
//!     projection::ProjectionEngine,
//!     repository::{GenericRepository, Repository},
//!     store::{in_memory::InMemoryEventLog, in_memory_snapshot::InMemorySnapshotStore},
//! };
//! use uuid::Uuid;
//!
//! async fn place_order() -> chronicle::Result<()> {
//!     let log = Arc::new(InMemoryEventLog::<OrderEvent>::default());
//!     let repo = GenericRepository::<Order, _, InMemorySnapshotStore<Order>>::new(log.clone(), None);
//!
//!     let mut order = Order::new(Uuid::new_v4());
//!     order.create(
//!         Uuid::new_v4(),
//!         vec![LineItem::new(Uuid::new_v4(), "Widget A", 2, 29.99)],
//!         "USD",
//!     )?;
//!     repo.save(&mut order).await?;
//!
//!     let mut engine = ProjectionEngine::new(log);
//!     engine.register("summary", OrderSummaryView::default());
//!     engine.catch_up().await?;
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

// Lets `#[derive(Event)]` refer to `chronicle::Event` from inside this crate.
extern crate self as chronicle;

use std::{collections::BTreeMap, fmt::Debug};

pub use async_trait::async_trait;
pub use chronicle_derive::Event;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

pub mod clock;
pub mod codec;
pub mod order;
pub mod projection;
pub mod repository;
pub mod snapshot;
pub mod store;

pub use clock::{Clock, SystemClock};

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum Error {
    /// The stream's current version did not match the version the writer
    /// expected. The log is unchanged; reload and retry the command.
    #[error(
        "concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The aggregate whose stream was written to.
        aggregate_id: Uuid,
        /// The version the writer based its events on.
        expected: u64,
        /// The stream's actual version.
        actual: u64,
    },
    /// A batch's versions were not contiguous from the expected version.
    #[error(
        "sequence violation on aggregate {aggregate_id}: expected version {expected}, found {found}"
    )]
    SequenceViolation {
        /// The aggregate whose stream was written to.
        aggregate_id: Uuid,
        /// The version the next event had to carry.
        expected: u64,
        /// The version it actually carried.
        found: u64,
    },
    /// A command precondition was violated, or an event stream cannot build
    /// the aggregate.
    #[error("domain error: {0}")]
    Domain(String),
    /// An event record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Wraps an error from the underlying event or snapshot store.
    #[error("event store error: {0}")]
    Store(String),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A closed set of event payloads belonging to one domain.
///
/// Implemented on an enum with one variant per event kind. The variant name is
/// the event type discriminator. The [`Event`](derive@Event) derive macro
/// implements both methods.
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Returns the discriminator of this payload.
    fn event_type(&self) -> &'static str;

    /// Returns every discriminator this payload type declares.
    fn event_types() -> &'static [&'static str];
}

/// A marker trait for snapshots.
pub trait Snapshot: Serialize + DeserializeOwned + Clone + Debug + Send + Sync {}

/// An immutable fact: a payload plus the identity and ordering data the log
/// needs.
///
/// A freshly raised envelope carries no aggregate id and version `0`; the
/// aggregate (or the log) stamps both. The global `position` is assigned by
/// the log on append and is `None` until then.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope<E: Event> {
    pub(crate) event_id: Uuid,
    pub(crate) aggregate_id: Option<Uuid>,
    pub(crate) version: u64,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) metadata: BTreeMap<String, serde_json::Value>,
    pub(crate) position: Option<u64>,
    pub(crate) payload: E,
}

impl<E: Event> EventEnvelope<E> {
    /// Wraps a payload with a fresh event id, stamped with the current time.
    pub fn new(payload: E) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Wraps a payload with a fresh event id and the given timestamp.
    pub fn at(payload: E, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id: None,
            version: 0,
            timestamp,
            metadata: BTreeMap::new(),
            position: None,
            payload,
        }
    }

    /// Attaches a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stamps the owning aggregate and the version within its stream.
    #[must_use]
    pub fn stamped(mut self, aggregate_id: Uuid, version: u64) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self.version = version;
        self
    }

    /// Records the global position assigned by a log.
    #[must_use]
    pub fn at_position(mut self, position: u64) -> Self {
        self.position = Some(position);
        self
    }

    /// Returns the unique id of this event.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }
    /// Returns the owning aggregate, if assigned.
    pub fn aggregate_id(&self) -> Option<Uuid> {
        self.aggregate_id
    }
    /// Returns the event type discriminator.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
    /// Returns the version within the aggregate stream (`0` if unassigned).
    pub fn version(&self) -> u64 {
        self.version
    }
    /// Returns when the event was raised.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
    /// Returns the metadata map.
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }
    /// Returns the global position, if the event has been appended.
    pub fn position(&self) -> Option<u64> {
        self.position
    }
    /// Returns the event payload.
    pub fn payload(&self) -> &E {
        &self.payload
    }
    /// Consumes the envelope and returns the payload.
    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// An aggregate is a consistency boundary whose state is the fold of its own
/// events.
///
/// Implementors own their state, version counter and uncommitted buffer. State
/// changes only in [`apply`](Aggregate::apply); commands validate against the
/// current state and hand their single event to [`raise`](Aggregate::raise).
pub trait Aggregate: Sized + Send + Sync + 'static {
    /// The events this aggregate produces and folds.
    type Event: Event;
    /// The cached form of this aggregate's state.
    type Snapshot: Snapshot;

    /// Creates an empty aggregate at version `0`.
    fn new(id: Uuid) -> Self;

    /// Returns the unique identifier of the aggregate.
    fn id(&self) -> Uuid;

    /// Returns the number of events folded into this aggregate.
    fn version(&self) -> u64;

    /// Folds one event into the state and sets the version to the event's.
    ///
    /// Must accept every variant of [`Self::Event`]; variants irrelevant to
    /// the state still advance the version.
    fn apply(&mut self, event: &EventEnvelope<Self::Event>);

    /// Whether `event` is the event that starts this aggregate's stream.
    fn is_creation(event: &Self::Event) -> bool;

    /// Returns events raised but not yet persisted.
    fn uncommitted_events(&self) -> &[EventEnvelope<Self::Event>];

    /// Mutable access to the uncommitted buffer.
    fn uncommitted_events_mut(&mut self) -> &mut Vec<EventEnvelope<Self::Event>>;

    /// Creates a snapshot of the aggregate's current state.
    fn snapshot(&self) -> Self::Snapshot;

    /// Restores an aggregate from a snapshot taken at `version`.
    fn from_snapshot(id: Uuid, version: u64, snapshot: Self::Snapshot) -> Self;

    /// The clock used to timestamp raised events.
    fn clock(&self) -> &dyn Clock {
        &SystemClock
    }

    /// Clears the uncommitted buffer after persistence.
    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events_mut().clear();
    }

    /// Stamps a new event with this aggregate's id and next version, folds it
    /// and buffers it for persistence.
    fn raise(&mut self, payload: Self::Event) {
        let event =
            EventEnvelope::at(payload, self.clock().now()).stamped(self.id(), self.version() + 1);
        self.apply(&event);
        self.uncommitted_events_mut().push(event);
    }

    /// Folds already-persisted events onto the current state.
    ///
    /// Each event must carry the next version; a gap or repeat fails with
    /// [`Error::SequenceViolation`] and leaves the events after it unapplied.
    fn replay<I>(&mut self, events: I) -> Result<()>
    where
        I: IntoIterator<Item = EventEnvelope<Self::Event>>,
    {
        for event in events {
            let expected = self.version() + 1;
            if event.version() != expected {
                return Err(Error::SequenceViolation {
                    aggregate_id: self.id(),
                    expected,
                    found: event.version(),
                });
            }
            self.apply(&event);
        }
        Ok(())
    }

    /// Reconstructs an aggregate from its full stream.
    ///
    /// The stream must be non-empty and start with the creation event.
    fn from_events<I>(events: I) -> Result<Self>
    where
        I: IntoIterator<Item = EventEnvelope<Self::Event>>,
    {
        let mut events = events.into_iter().peekable();
        let first = events
            .peek()
            .ok_or_else(|| Error::Domain("cannot build an aggregate from an empty stream".into()))?;
        if !Self::is_creation(first.payload()) {
            return Err(Error::Domain(format!(
                "stream must start with a creation event, found {}",
                first.event_type()
            )));
        }
        let id = first
            .aggregate_id()
            .ok_or_else(|| Error::Domain("creation event has no aggregate id".into()))?;

        let mut aggregate = Self::new(id);
        aggregate.replay(events)?;
        Ok(aggregate)
    }
}

/// The trait for event logs.
///
/// Implementations must make `append` atomic per aggregate id: the version
/// check and the extension of the stream happen as one unit, and a batch is
/// either fully visible to readers or not at all. Appends to different
/// aggregates must not serialize on each other's version checks.
#[async_trait]
pub trait EventLog<E: Event>: Send + Sync {
    /// Appends a batch of events to an aggregate's stream.
    ///
    /// Fails with [`Error::ConcurrencyConflict`] if the stream's length is not
    /// `expected_version`, and with [`Error::SequenceViolation`] if an
    /// event's already-assigned version is not the next one in the batch.
    /// Events with version `0` are assigned the next version. Every event is
    /// stamped with `aggregate_id` and a global position. Returns the stored
    /// events.
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<Vec<EventEnvelope<E>>>;

    /// Loads an aggregate's events with `version >= from_version`, in order.
    ///
    /// An unknown aggregate yields an empty stream.
    async fn read(&self, aggregate_id: Uuid, from_version: u64) -> Result<Vec<EventEnvelope<E>>>;

    /// Loads every event in the log ordered by timestamp, ties broken by
    /// append order, optionally keeping only `timestamp >= since`.
    async fn read_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<EventEnvelope<E>>>;

    /// Loads every event whose global position is greater than `position`,
    /// in position order.
    async fn read_all_after(&self, position: u64) -> Result<Vec<EventEnvelope<E>>>;

    /// Returns the current length of an aggregate's stream.
    async fn stream_version(&self, aggregate_id: Uuid) -> Result<u64>;
}
