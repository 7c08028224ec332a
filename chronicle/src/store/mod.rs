//! The store module contains the in-memory implementations of the event log
//! and snapshot store. Durable backends implement the same traits outside
//! this crate.

// Compiled when the `in-memory` feature is enabled (this is the default).
#[cfg(feature = "in-memory")]
/// An in-memory event log.
pub mod in_memory;

#[cfg(feature = "in-memory")]
/// An in-memory snapshot store.
pub mod in_memory_snapshot;
