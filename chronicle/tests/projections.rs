//! The order read models, fed through the projection engine.

mod common;

use std::sync::Arc;

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use chronicle::{
    Aggregate,
    order::{CustomerHistoryView, InventoryView, LineItem, Order, OrderStatus, OrderSummaryView},
    projection::ProjectionEngine,
    repository::Repository,
};

use common::{Log, Repo, address, assert_money, repository};

const SUMMARY: &str = "order_summary";
const INVENTORY: &str = "inventory";
const CUSTOMERS: &str = "customer_history";

fn engine(log: Arc<Log>) -> ProjectionEngine<chronicle::order::OrderEvent, Log> {
    let mut engine = ProjectionEngine::new(log);
    engine.register(SUMMARY, OrderSummaryView::default());
    engine.register(INVENTORY, InventoryView::default());
    engine.register(CUSTOMERS, CustomerHistoryView::default());
    engine
}

struct Catalog {
    widget: Uuid,
    gadget: Uuid,
}

/// Runs a mixed workload of three orders for two customers, calling `after`
/// once every save.
fn workload(repo: &Repo, catalog: &Catalog, mut after: impl FnMut()) -> [(Uuid, Uuid); 3] {
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let mut save = |order: &mut Order| {
        block_on(repo.save(order)).unwrap();
        after();
    };

    let mut shipped = Order::new(Uuid::new_v4());
    shipped
        .create(alice, vec![LineItem::new(catalog.widget, "Widget", 2, 10.0)], "USD")
        .unwrap();
    save(&mut shipped);
    shipped.add_item(catalog.gadget, "Gadget", 1, 5.0).unwrap();
    shipped.process_payment("card", 25.0, "txn_1").unwrap();
    save(&mut shipped);

    let mut cancelled = Order::new(Uuid::new_v4());
    cancelled
        .create(bob, vec![LineItem::new(catalog.widget, "Widget", 4, 10.0)], "USD")
        .unwrap();
    save(&mut cancelled);

    shipped.ship(address(), "TRACK1", "UPS").unwrap();
    save(&mut shipped);

    cancelled.remove_item(catalog.widget, 1).unwrap();
    cancelled.cancel("changed mind").unwrap();
    save(&mut cancelled);

    let mut open = Order::new(Uuid::new_v4());
    open.create(alice, vec![LineItem::new(catalog.gadget, "Gadget", 3, 5.0)], "USD")
        .unwrap();
    open.process_payment("paypal", 15.0, "txn_3").unwrap();
    save(&mut open);

    [
        (shipped.id(), alice),
        (cancelled.id(), bob),
        (open.id(), alice),
    ]
}

fn catalog() -> Catalog {
    Catalog {
        widget: Uuid::new_v4(),
        gadget: Uuid::new_v4(),
    }
}

#[test]
fn rebuild_matches_incremental_catch_up() {
    let (log, repo) = repository();
    let mut incremental = engine(log.clone());

    workload(&repo, &catalog(), || {
        block_on(incremental.catch_up()).unwrap();
    });

    let mut rebuilt = engine(log.clone());
    block_on(rebuilt.rebuild_all()).unwrap();

    assert_eq!(
        rebuilt.read_model::<OrderSummaryView>(SUMMARY),
        incremental.read_model::<OrderSummaryView>(SUMMARY)
    );
    assert_eq!(
        rebuilt.read_model::<InventoryView>(INVENTORY),
        incremental.read_model::<InventoryView>(INVENTORY)
    );
    assert_eq!(
        rebuilt.read_model::<CustomerHistoryView>(CUSTOMERS),
        incremental.read_model::<CustomerHistoryView>(CUSTOMERS)
    );
    assert_eq!(rebuilt.high_water_mark(), incremental.high_water_mark());
    assert_eq!(rebuilt.high_water_mark().position, log.len() as u64);
}

#[test]
fn rebuilding_twice_is_idempotent() {
    let (log, repo) = repository();
    workload(&repo, &catalog(), || {});

    let mut engine = engine(log);
    block_on(engine.rebuild_all()).unwrap();
    let first = engine.read_model::<OrderSummaryView>(SUMMARY).cloned();
    block_on(engine.rebuild_all()).unwrap();

    assert_eq!(engine.read_model::<OrderSummaryView>(SUMMARY).cloned(), first);
    assert_eq!(block_on(engine.catch_up()).unwrap(), 0);
}

#[test]
fn order_summary_tracks_each_order() {
    let (log, repo) = repository();
    let [(shipped, alice), (cancelled, bob), (open, _)] = workload(&repo, &catalog(), || {});

    let mut engine = engine(log);
    block_on(engine.catch_up()).unwrap();
    let view = engine
        .read_model::<OrderSummaryView>(SUMMARY)
        .expect("summary registered");

    assert_eq!(view.len(), 3);
    let summary = view.get(shipped).unwrap();
    assert_eq!(summary.status, OrderStatus::Shipped);
    assert_eq!(summary.item_count(), 2);
    assert_money(summary.total_amount, 25.0);
    assert_eq!(summary.payment_method.as_deref(), Some("card"));
    assert_eq!(summary.tracking_number.as_deref(), Some("TRACK1"));
    assert!(summary.shipped_at.is_some());

    let summary = view.get(cancelled).unwrap();
    assert_eq!(summary.status, OrderStatus::Cancelled);
    assert_money(summary.total_amount, 30.0);
    assert_eq!(summary.cancel_reason.as_deref(), Some("changed mind"));

    assert_eq!(view.get(open).unwrap().status, OrderStatus::Confirmed);
    assert_eq!(view.by_customer(alice).len(), 2);
    assert_eq!(view.by_customer(bob).len(), 1);
    assert_eq!(view.by_status(OrderStatus::Shipped).len(), 1);
    assert!(view.by_status(OrderStatus::Pending).is_empty());
}

#[test]
fn inventory_reserves_until_ship_or_cancel() {
    let (log, repo) = repository();
    let catalog = catalog();
    workload(&repo, &catalog, || {});

    let mut engine = engine(log);
    block_on(engine.catch_up()).unwrap();
    let view = engine.read_model::<InventoryView>(INVENTORY).unwrap();

    // Only the open order still holds stock.
    assert_eq!(view.reserved_quantity(catalog.widget), 0);
    assert_eq!(view.reserved_quantity(catalog.gadget), 3);
    assert_eq!(view.shipped_quantity(catalog.widget), 2);
    assert_eq!(view.shipped_quantity(catalog.gadget), 1);
    assert_eq!(view.reserved_quantity(Uuid::new_v4()), 0);
}

#[test]
fn customer_history_counts_orders_and_spend() {
    let (log, repo) = repository();
    let [(shipped, alice), (cancelled, bob), (open, _)] = workload(&repo, &catalog(), || {});

    let mut engine = engine(log);
    block_on(engine.catch_up()).unwrap();
    let view = engine.read_model::<CustomerHistoryView>(CUSTOMERS).unwrap();

    let orders = view.orders(alice);
    assert_eq!(
        orders.iter().map(|o| (o.order_id, o.status)).collect::<Vec<_>>(),
        vec![(shipped, OrderStatus::Shipped), (open, OrderStatus::Confirmed)]
    );
    let stats = view.stats(alice).unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_money(stats.total_spent, 40.0);
    assert!(stats.first_order_date <= stats.last_order_date);

    assert_eq!(view.orders(bob)[0].order_id, cancelled);
    assert_eq!(view.orders(bob)[0].status, OrderStatus::Cancelled);
    assert_money(view.stats(bob).unwrap().total_spent, 0.0);

    assert!(view.orders(Uuid::new_v4()).is_empty());
    assert!(view.stats(Uuid::new_v4()).is_none());
}

#[test]
fn catch_up_resumes_after_the_mark() {
    let (log, repo) = repository();
    let mut engine = engine(log.clone());

    let mut order = Order::new(Uuid::new_v4());
    order
        .create(Uuid::new_v4(), vec![LineItem::new(Uuid::new_v4(), "Widget", 1, 1.0)], "USD")
        .unwrap();
    block_on(repo.save(&mut order)).unwrap();
    assert_eq!(block_on(engine.catch_up()).unwrap(), 1);

    order.process_payment("card", 1.0, "txn").unwrap();
    block_on(repo.save(&mut order)).unwrap();
    assert_eq!(block_on(engine.catch_up()).unwrap(), 1);
    assert_eq!(block_on(engine.catch_up()).unwrap(), 0);

    let summary = engine.read_model::<OrderSummaryView>(SUMMARY).unwrap();
    assert_eq!(summary.get(order.id()).unwrap().status, OrderStatus::Confirmed);
    assert_eq!(engine.high_water_mark().position, 2);
}
