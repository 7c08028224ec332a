//! Read models maintained from the global event stream.
//!
//! A [`ProjectionEngine`] owns a set of named read models and feeds them
//! events from an [`EventLog`]. Each model keeps its own high-water mark, the
//! global position of the last event it consumed, so catch-up never
//! re-delivers an event and never skips one that shares a timestamp with the
//! previous batch's last event.

use std::{any::Any, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::{Error, Event, EventEnvelope, EventLog, Result};

/// A queryable view derived purely from the ordered event stream.
///
/// # Contract
///
/// - [`handle`](ReadModel::handle) must be deterministic: the same sequence
///   of events, delivered whole or in increments, yields the same state.
/// - Event types the model does not care about are ignored, not errors.
/// - `Default` is the state before any event; a rebuild starts from it.
pub trait ReadModel<E: Event>: Default + Send + Sync + 'static {
    /// Folds one event into the view.
    fn handle(&mut self, event: &EventEnvelope<E>);
}

/// How far a read model has consumed the global stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighWaterMark {
    /// Global position of the last consumed event (`0` before any).
    pub position: u64,
    /// Latest timestamp among the consumed events.
    pub timestamp: Option<DateTime<Utc>>,
}

impl HighWaterMark {
    fn advance<E: Event>(&mut self, event: &EventEnvelope<E>, position: u64) {
        self.position = position;
        self.timestamp = self.timestamp.max(Some(event.timestamp()));
    }
}

// Type-erased so models of different concrete types share one registry.
trait ErasedReadModel<E: Event>: Send + Sync {
    fn handle(&mut self, event: &EventEnvelope<E>);
    fn reset(&mut self);
    fn as_any(&self) -> &dyn Any;
}

impl<E: Event, M: ReadModel<E>> ErasedReadModel<E> for M {
    fn handle(&mut self, event: &EventEnvelope<E>) {
        ReadModel::handle(self, event);
    }

    fn reset(&mut self) {
        *self = M::default();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct Registered<E: Event> {
    name: String,
    model: Box<dyn ErasedReadModel<E>>,
    mark: HighWaterMark,
}

impl<E: Event> Registered<E> {
    fn deliver(&mut self, event: &EventEnvelope<E>, position: u64) -> bool {
        if position <= self.mark.position {
            return false;
        }
        self.model.handle(event);
        self.mark.advance(event, position);
        true
    }
}

fn position_of<E: Event>(event: &EventEnvelope<E>) -> Result<u64> {
    event.position().ok_or_else(|| {
        Error::Store(format!(
            "event {} was returned without a global position",
            event.event_id()
        ))
    })
}

/// Drives registered read models from an event log.
pub struct ProjectionEngine<E: Event, L: EventLog<E>> {
    log: Arc<L>,
    models: Vec<Registered<E>>,
}

impl<E: Event, L: EventLog<E>> ProjectionEngine<E, L> {
    /// Creates an engine with no read models.
    pub fn new(log: Arc<L>) -> Self {
        Self {
            log,
            models: Vec::new(),
        }
    }

    /// Registers a read model under `name`, replacing any model already
    /// registered under it.
    ///
    /// The model starts at the beginning of the stream and is brought up to
    /// date by the next [`catch_up`](Self::catch_up) or
    /// [`rebuild_all`](Self::rebuild_all).
    pub fn register<M: ReadModel<E>>(&mut self, name: impl Into<String>, model: M) {
        let name = name.into();
        let registered = Registered {
            name,
            model: Box::new(model),
            mark: HighWaterMark::default(),
        };
        match self.models.iter_mut().find(|r| r.name == registered.name) {
            Some(existing) => *existing = registered,
            None => self.models.push(registered),
        }
    }

    /// Returns the read model registered under `name`, if it has type `M`.
    pub fn read_model<M: ReadModel<E>>(&self, name: &str) -> Option<&M> {
        self.models
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.model.as_any().downcast_ref::<M>())
    }

    /// Returns the names of the registered read models in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(|r| r.name.as_str())
    }

    /// Returns the high-water mark of the model registered under `name`.
    pub fn mark_of(&self, name: &str) -> Option<HighWaterMark> {
        self.models.iter().find(|r| r.name == name).map(|r| r.mark)
    }

    /// Returns the point up to which every registered model has consumed the
    /// stream: the lowest mark across models.
    pub fn high_water_mark(&self) -> HighWaterMark {
        self.models
            .iter()
            .map(|r| r.mark)
            .min_by_key(|m| m.position)
            .unwrap_or_default()
    }

    /// Resets every model and replays the whole log into it.
    #[instrument(skip(self), fields(models = self.models.len()))]
    pub async fn rebuild_all(&mut self) -> Result<()> {
        let events = self.log.read_all_after(0).await?;

        for registered in &mut self.models {
            registered.model.reset();
            registered.mark = HighWaterMark::default();
        }
        for event in &events {
            let position = position_of(event)?;
            for registered in &mut self.models {
                registered.deliver(event, position);
            }
        }

        debug!(events = events.len(), position = ?self.high_water_mark().position, "rebuilt projections");
        Ok(())
    }

    /// Delivers events appended since each model's mark.
    ///
    /// Returns the number of events read from the log.
    #[instrument(skip(self), fields(models = self.models.len()))]
    pub async fn catch_up(&mut self) -> Result<usize> {
        if self.models.is_empty() {
            return Ok(0);
        }

        let from = self.high_water_mark().position;
        let events = self.log.read_all_after(from).await?;

        for event in &events {
            let position = position_of(event)?;
            for registered in &mut self.models {
                registered.deliver(event, position);
            }
        }

        debug!(from, events = events.len(), "caught up projections");
        Ok(events.len())
    }
}
