//! The event wire format.
//!
//! Every event is written as one record:
//!
//! ```json
//! {
//!   "event_id": "6f1c…",
//!   "aggregate_id": "0b7e…",
//!   "event_type": "OrderShipped",
//!   "version": 4,
//!   "timestamp": "2025-01-15T10:00:00Z",
//!   "metadata": {},
//!   "data": { "tracking_number": "TRACK123", "carrier": "FedEx" }
//! }
//! ```
//!
//! `event_type` is the payload variant name and `data` holds its fields.
//! `aggregate_id` is `null` for events not yet assigned to a stream, and a
//! `position` field is present only once a log has assigned one. Identifier
//! fields inside `data` decode back into their native [`Uuid`] type.
//!
//! A record that fails to decode is reported on its own; it never affects
//! other records decoded in the same batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Event, EventEnvelope, Result};

#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    event_id: Uuid,
    aggregate_id: Option<Uuid>,
    event_type: String,
    version: u64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
    #[serde(default)]
    data: Value,
}

fn encode<E: Event>(event: &EventEnvelope<E>) -> Result<WireEvent> {
    let event_type = event.event_type();
    let data = match serde_json::to_value(event.payload())
        .map_err(|e| Error::Serialization(format!("failed to serialise {event_type}: {e}")))?
    {
        // Struct and newtype variants: `{ "Variant": { ..fields } }`.
        Value::Object(mut tagged) if tagged.len() == 1 => tagged
            .remove(event_type)
            .ok_or_else(|| {
                Error::Serialization(format!("payload is not tagged as {event_type}"))
            })?,
        // Unit variants: `"Variant"`.
        Value::String(tag) if tag == event_type => Value::Object(serde_json::Map::new()),
        other => {
            return Err(Error::Serialization(format!(
                "{event_type} did not serialise as a tagged variant: {other}"
            )));
        }
    };

    Ok(WireEvent {
        event_id: event.event_id(),
        aggregate_id: event.aggregate_id(),
        event_type: event_type.to_owned(),
        version: event.version(),
        timestamp: event.timestamp(),
        metadata: event.metadata().clone(),
        position: event.position(),
        data,
    })
}

fn decode<E: Event>(wire: WireEvent) -> Result<EventEnvelope<E>> {
    let event_type = E::event_types()
        .iter()
        .find(|t| **t == wire.event_type)
        .copied()
        .ok_or_else(|| Error::Serialization(format!("unknown event type: {}", wire.event_type)))?;

    let payload = decode_payload::<E>(event_type, wire.data)?;
    if payload.event_type() != event_type {
        return Err(Error::Serialization(format!(
            "record tagged {event_type} decoded as {}",
            payload.event_type()
        )));
    }

    Ok(EventEnvelope {
        event_id: wire.event_id,
        aggregate_id: wire.aggregate_id,
        version: wire.version,
        timestamp: wire.timestamp,
        metadata: wire.metadata,
        position: wire.position,
        payload,
    })
}

fn decode_payload<E: Event>(event_type: &str, data: Value) -> Result<E> {
    let fieldless = match &data {
        Value::Null => true,
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    if fieldless {
        if let Ok(payload) = serde_json::from_value(Value::String(event_type.to_owned())) {
            return Ok(payload);
        }
    }

    let mut tagged = serde_json::Map::new();
    tagged.insert(event_type.to_owned(), data);
    serde_json::from_value(Value::Object(tagged))
        .map_err(|e| Error::Serialization(format!("malformed {event_type} payload: {e}")))
}

/// Encodes an event as a wire record.
pub fn to_value<E: Event>(event: &EventEnvelope<E>) -> Result<Value> {
    serde_json::to_value(encode(event)?).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decodes an event from a wire record.
pub fn from_value<E: Event>(record: Value) -> Result<EventEnvelope<E>> {
    let wire: WireEvent =
        serde_json::from_value(record).map_err(|e| Error::Serialization(e.to_string()))?;
    decode(wire)
}

/// Encodes an event as a JSON string.
pub fn to_json<E: Event>(event: &EventEnvelope<E>) -> Result<String> {
    serde_json::to_string(&encode(event)?).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decodes an event from a JSON string.
pub fn from_json<E: Event>(record: &str) -> Result<EventEnvelope<E>> {
    let wire: WireEvent =
        serde_json::from_str(record).map_err(|e| Error::Serialization(e.to_string()))?;
    decode(wire)
}

/// Decodes many JSON records, one result per record.
pub fn decode_batch<E, I, S>(records: I) -> Vec<Result<EventEnvelope<E>>>
where
    E: Event,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    records
        .into_iter()
        .map(|record| from_json(record.as_ref()))
        .collect()
}

impl<E: Event> Serialize for EventEnvelope<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        encode(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de, E: Event> Deserialize<'de> for EventEnvelope<E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        decode(WireEvent::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}
