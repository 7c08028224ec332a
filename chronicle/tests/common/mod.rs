//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::{collections::BTreeMap, sync::Arc};

use chronicle::{
    Aggregate,
    order::{LineItem, Order, OrderEvent},
    repository::GenericRepository,
    store::{in_memory::InMemoryEventLog, in_memory_snapshot::InMemorySnapshotStore},
};
use uuid::Uuid;

pub type Log = InMemoryEventLog<OrderEvent>;
pub type Snapshots = InMemorySnapshotStore<Order>;
pub type Repo = GenericRepository<Order, Log, Snapshots>;

/// A repository over a fresh log, without snapshots.
pub fn repository() -> (Arc<Log>, Repo) {
    let log = Arc::new(Log::default());
    let repo = GenericRepository::new(log.clone(), None);
    (log, repo)
}

/// Two widgets at 29.99 and one at 49.99.
pub fn two_widgets() -> Vec<LineItem> {
    vec![
        LineItem::new(Uuid::new_v4(), "Widget A", 2, 29.99),
        LineItem::new(Uuid::new_v4(), "Widget B", 1, 49.99),
    ]
}

/// A created, unsaved order for a fresh customer.
pub fn created_order(items: Vec<LineItem>) -> Order {
    let mut order = Order::new(Uuid::new_v4());
    order
        .create(Uuid::new_v4(), items, "USD")
        .expect("create order");
    order
}

pub fn address() -> BTreeMap<String, String> {
    [
        ("street", "123 Main St"),
        ("city", "Anytown"),
        ("state", "CA"),
        ("zip", "12345"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect()
}

pub fn assert_money(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
