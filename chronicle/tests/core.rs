//! Integration tests for the event log, snapshot store and repository.

mod common;

use std::sync::Arc;

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use chronicle::{
    Aggregate, Error, EventEnvelope, EventLog,
    order::{Order, OrderEvent},
    repository::{GenericRepository, Repository},
    snapshot::SnapshotStore,
};

use common::{Log, Snapshots, created_order, repository, two_widgets};

fn created(customer_id: Uuid) -> EventEnvelope<OrderEvent> {
    EventEnvelope::new(OrderEvent::OrderCreated {
        customer_id,
        items: Vec::new(),
        total_amount: 0.0,
        currency: "USD".into(),
    })
}

// -- Event log -------------------------------------------------------------

#[test]
fn append_and_read_stream() {
    let log = Log::default();
    let id = Uuid::new_v4();

    let stored = block_on(log.append(id, 0, vec![created(Uuid::new_v4())])).expect("append should succeed");
    assert_eq!(stored.len(), 1, "one event should be stored");

    let loaded = block_on(log.read(id, 0)).expect("read should succeed");
    assert_eq!(loaded, stored);
    assert_eq!(loaded[0].event_type(), "OrderCreated");
    assert_eq!(loaded[0].aggregate_id(), Some(id));
}

#[test]
fn stale_expected_version_conflicts_and_leaves_stream_unchanged() {
    let log = Log::default();
    let id = Uuid::new_v4();
    block_on(log.append(id, 0, vec![created(Uuid::new_v4())])).expect("initial append");
    let before = block_on(log.read(id, 0)).unwrap();

    for expected in [0, 2, 7] {
        let err = block_on(log.append(id, expected, vec![created(Uuid::new_v4())]))
            .expect_err("should conflict");
        assert_eq!(
            err,
            Error::ConcurrencyConflict {
                aggregate_id: id,
                expected,
                actual: 1,
            }
        );
    }

    assert_eq!(block_on(log.read(id, 0)).unwrap(), before);
    assert_eq!(log.len(), 1);
}

#[test]
fn assigned_versions_are_validated_not_overwritten() {
    let log = Log::default();
    let id = Uuid::new_v4();

    let err = block_on(log.append(id, 0, vec![created(Uuid::new_v4()).stamped(id, 2)]))
        .expect_err("version 2 cannot follow version 0");
    assert_eq!(
        err,
        Error::SequenceViolation {
            aggregate_id: id,
            expected: 1,
            found: 2,
        }
    );

    let stored = block_on(log.append(id, 0, vec![created(Uuid::new_v4()).stamped(id, 1)])).unwrap();
    assert_eq!(stored[0].version(), 1);
}

#[test]
fn read_all_orders_by_timestamp_and_filters_since() {
    use chrono::{Duration, TimeZone, Utc};

    let log = Log::default();
    let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    // Appended out of timestamp order; `b`'s two events share a timestamp.
    let late = EventEnvelope::at(created(Uuid::new_v4()).into_payload(), t0 + Duration::seconds(10));
    let tie_1 = EventEnvelope::at(created(Uuid::new_v4()).into_payload(), t0);
    let tie_2 = EventEnvelope::at(
        OrderEvent::OrderCancelled {
            reason: "dup".into(),
            refund_amount: 0.0,
        },
        t0,
    );
    block_on(log.append(a, 0, vec![late])).unwrap();
    block_on(log.append(b, 0, vec![tie_1, tie_2])).unwrap();

    let all = block_on(log.read_all(None)).unwrap();
    assert_eq!(
        all.iter().map(|e| e.position()).collect::<Vec<_>>(),
        vec![Some(2), Some(3), Some(1)]
    );

    let since = block_on(log.read_all(Some(t0 + Duration::seconds(1)))).unwrap();
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].aggregate_id(), Some(a));
}

// -- Snapshots -------------------------------------------------------------

#[test]
fn snapshot_store_save_and_load() {
    let snaps = Snapshots::default();
    let order = created_order(two_widgets());

    assert!(block_on(snaps.load(order.id())).expect("load").is_none());
    block_on(snaps.save(order.id(), 1, order.snapshot())).expect("save snapshot");

    let loaded = block_on(snaps.load(order.id()))
        .expect("load")
        .expect("snapshot should exist");
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.aggregate_id(), order.id());
    assert_eq!(loaded.snapshot(), order.state());
}

// -- Repository ------------------------------------------------------------

#[test]
fn save_then_load_round_trips_state_and_version() {
    let (_, repo) = repository();
    let mut order = created_order(two_widgets());
    order.process_payment("credit_card", 109.97, "txn_1").unwrap();

    block_on(repo.save(&mut order)).expect("save events");
    assert!(order.uncommitted_events().is_empty());

    let loaded = block_on(repo.load(order.id())).expect("load").expect("order exists");
    assert_eq!(loaded.version(), order.version());
    assert_eq!(loaded.state(), order.state());
    assert!(loaded.uncommitted_events().is_empty());
}

#[test]
fn load_unknown_aggregate_is_none() {
    let (_, repo) = repository();
    assert!(block_on(repo.load(Uuid::new_v4())).expect("load").is_none());
}

#[test]
fn save_without_changes_is_a_no_op() {
    let (log, repo) = repository();
    let mut order = Order::new(Uuid::new_v4());

    block_on(repo.save(&mut order)).expect("nothing to save");
    assert!(log.is_empty());
}

#[test]
fn conflicting_save_keeps_uncommitted_events() {
    let (log, repo) = repository();
    let mut order = created_order(two_widgets());
    block_on(repo.save(&mut order)).unwrap();

    let mut first = block_on(repo.load(order.id())).unwrap().unwrap();
    let mut second = block_on(repo.load(order.id())).unwrap().unwrap();
    first.process_payment("card", 109.97, "txn_a").unwrap();
    second.cancel("changed my mind").unwrap();

    block_on(repo.save(&mut first)).expect("first writer wins");
    let err = block_on(repo.save(&mut second)).expect_err("second writer conflicts");

    assert!(matches!(err, Error::ConcurrencyConflict { expected: 1, actual: 2, .. }));
    assert_eq!(second.uncommitted_events().len(), 1);
    assert_eq!(block_on(log.stream_version(order.id())).unwrap(), 2);

    // The caller reloads and reissues the command against fresh state.
    let mut retry = block_on(repo.load(order.id())).unwrap().unwrap();
    retry.cancel("changed my mind").unwrap();
    block_on(repo.save(&mut retry)).expect("retry succeeds");
}

#[test]
fn replaying_twice_is_deterministic() {
    let (log, repo) = repository();
    let mut order = created_order(two_widgets());
    let extra = Uuid::new_v4();
    order.add_item(extra, "Gadget", 3, 5.0).unwrap();
    order.remove_item(extra, 1).unwrap();
    order.process_payment("card", 119.97, "txn").unwrap();
    block_on(repo.save(&mut order)).unwrap();

    let stream = block_on(log.read(order.id(), 0)).unwrap();
    let once = Order::from_events(stream.clone()).unwrap();
    let twice = Order::from_events(stream).unwrap();

    assert_eq!(once.state(), twice.state());
    assert_eq!(once.version(), twice.version());
    assert_eq!(once.state(), order.state());
}

#[test]
fn repository_writes_and_uses_snapshots() {
    let log = Arc::new(Log::default());
    let snapshots = Arc::new(Snapshots::default());
    let repo = GenericRepository::new(log.clone(), Some(snapshots.clone()))
        .with_snapshot_frequency(Some(2));

    let mut order = created_order(two_widgets());
    block_on(repo.save(&mut order)).unwrap();
    assert!(block_on(snapshots.load(order.id())).unwrap().is_none());

    order.add_item(Uuid::new_v4(), "Gadget", 1, 1.0).unwrap();
    block_on(repo.save(&mut order)).unwrap();
    let snap = block_on(snapshots.load(order.id()))
        .unwrap()
        .expect("snapshot written at version 2");
    assert_eq!(snap.version(), 2);

    order.process_payment("card", 110.97, "txn").unwrap();
    block_on(repo.save(&mut order)).unwrap();

    let loaded = block_on(repo.load(order.id())).unwrap().unwrap();
    assert_eq!(loaded.version(), 3);
    assert_eq!(loaded.state(), order.state());
}

#[test]
fn snapshot_ahead_of_stream_is_ignored() {
    let log = Arc::new(Log::default());
    let snapshots = Arc::new(Snapshots::default());
    let repo = GenericRepository::new(log.clone(), Some(snapshots.clone()));

    let mut order = created_order(two_widgets());
    block_on(repo.save(&mut order)).unwrap();

    let mut bogus = order.snapshot();
    bogus.total_amount = 1.0;
    block_on(snapshots.save(order.id(), 5, bogus)).unwrap();

    let loaded = block_on(repo.load(order.id())).unwrap().unwrap();
    assert_eq!(loaded.version(), 1);
    assert_eq!(loaded.state(), order.state());
}
