//! Read models over the order stream.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::events::{LineItem, OrderEvent, OrderStatus, add_line, remove_line, total_of};
use crate::{EventEnvelope, projection::ReadModel};

/// One row of [`OrderSummaryView`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    /// The order.
    pub order_id: Uuid,
    /// Who placed it.
    pub customer_id: Uuid,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Current lines keyed by product.
    pub items: BTreeMap<Uuid, LineItem>,
    /// Sum of the lines' subtotals.
    pub total_amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// When the order was placed.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the latest event for the order.
    pub last_updated: DateTime<Utc>,
    /// Set once paid.
    pub payment_method: Option<String>,
    /// Set once shipped.
    pub tracking_number: Option<String>,
    /// Set once shipped.
    pub carrier: Option<String>,
    /// Set once shipped.
    pub shipped_at: Option<DateTime<Utc>>,
    /// Set once cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set once cancelled.
    pub cancel_reason: Option<String>,
}

impl OrderSummary {
    /// Number of distinct products on the order.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

/// Order summaries, queryable by order, customer or status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSummaryView {
    orders: BTreeMap<Uuid, OrderSummary>,
}

impl OrderSummaryView {
    /// Returns the summary of one order.
    pub fn get(&self, order_id: Uuid) -> Option<&OrderSummary> {
        self.orders.get(&order_id)
    }

    /// Returns every order placed by a customer.
    pub fn by_customer(&self, customer_id: Uuid) -> Vec<&OrderSummary> {
        self.orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .collect()
    }

    /// Returns every order in a given state.
    pub fn by_status(&self, status: OrderStatus) -> Vec<&OrderSummary> {
        self.orders.values().filter(|o| o.status == status).collect()
    }

    /// Number of orders seen.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether no order has been seen.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

impl ReadModel<OrderEvent> for OrderSummaryView {
    fn handle(&mut self, event: &EventEnvelope<OrderEvent>) {
        let Some(order_id) = event.aggregate_id() else {
            return;
        };
        let at = event.timestamp();

        if let OrderEvent::OrderCreated {
            customer_id,
            items,
            total_amount,
            currency,
        } = event.payload()
        {
            self.orders.insert(
                order_id,
                OrderSummary {
                    order_id,
                    customer_id: *customer_id,
                    status: OrderStatus::Pending,
                    items: items.iter().map(|l| (l.product_id, l.clone())).collect(),
                    total_amount: *total_amount,
                    currency: currency.clone(),
                    created_at: at,
                    last_updated: at,
                    payment_method: None,
                    tracking_number: None,
                    carrier: None,
                    shipped_at: None,
                    cancelled_at: None,
                    cancel_reason: None,
                },
            );
            return;
        }

        let Some(summary) = self.orders.get_mut(&order_id) else {
            return;
        };
        summary.last_updated = at;
        match event.payload() {
            OrderEvent::OrderCreated { .. } => {}
            OrderEvent::OrderItemAdded {
                product_id,
                quantity,
                unit_price,
                item_name,
            } => {
                add_line(&mut summary.items, *product_id, item_name, *quantity, *unit_price);
                summary.total_amount = total_of(summary.items.values());
            }
            OrderEvent::OrderItemRemoved {
                product_id,
                quantity,
            } => {
                remove_line(&mut summary.items, *product_id, *quantity);
                summary.total_amount = total_of(summary.items.values());
            }
            OrderEvent::PaymentProcessed { payment_method, .. } => {
                summary.status = OrderStatus::Confirmed;
                summary.payment_method = Some(payment_method.clone());
            }
            OrderEvent::OrderShipped {
                tracking_number,
                carrier,
                ..
            } => {
                summary.status = OrderStatus::Shipped;
                summary.tracking_number = Some(tracking_number.clone());
                summary.carrier = Some(carrier.clone());
                summary.shipped_at = Some(at);
            }
            OrderEvent::OrderCancelled { reason, .. } => {
                summary.status = OrderStatus::Cancelled;
                summary.cancelled_at = Some(at);
                summary.cancel_reason = Some(reason.clone());
            }
        }
    }
}

/// Stock reserved by open orders and committed by shipped ones, per product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryView {
    reserved: BTreeMap<Uuid, u32>,
    shipped: BTreeMap<Uuid, u32>,
    held_by_order: BTreeMap<Uuid, BTreeMap<Uuid, u32>>,
}

impl InventoryView {
    /// Units of a product held by orders that have not shipped.
    pub fn reserved_quantity(&self, product_id: Uuid) -> u32 {
        self.reserved.get(&product_id).copied().unwrap_or(0)
    }

    /// Units of a product that have left in shipped orders.
    pub fn shipped_quantity(&self, product_id: Uuid) -> u32 {
        self.shipped.get(&product_id).copied().unwrap_or(0)
    }

    fn reserve(&mut self, order_id: Uuid, product_id: Uuid, quantity: u32) {
        let reserved = self.reserved.entry(product_id).or_default();
        *reserved = reserved.saturating_add(quantity);
        let held = self
            .held_by_order
            .entry(order_id)
            .or_default()
            .entry(product_id)
            .or_default();
        *held = held.saturating_add(quantity);
    }

    fn release(&mut self, order_id: Uuid, product_id: Uuid, quantity: u32) {
        let Some(held) = self.held_by_order.get_mut(&order_id) else {
            return;
        };
        let Some(units) = held.get_mut(&product_id) else {
            return;
        };
        let released = quantity.min(*units);
        *units -= released;
        if *units == 0 {
            held.remove(&product_id);
        }
        if let Some(reserved) = self.reserved.get_mut(&product_id) {
            *reserved = reserved.saturating_sub(released);
        }
    }

    fn release_order(&mut self, order_id: Uuid) -> BTreeMap<Uuid, u32> {
        let held = self.held_by_order.remove(&order_id).unwrap_or_default();
        for (product_id, units) in &held {
            if let Some(reserved) = self.reserved.get_mut(product_id) {
                *reserved = reserved.saturating_sub(*units);
            }
        }
        held
    }
}

impl ReadModel<OrderEvent> for InventoryView {
    fn handle(&mut self, event: &EventEnvelope<OrderEvent>) {
        let Some(order_id) = event.aggregate_id() else {
            return;
        };
        match event.payload() {
            OrderEvent::OrderCreated { items, .. } => {
                for line in items {
                    self.reserve(order_id, line.product_id, line.quantity);
                }
            }
            OrderEvent::OrderItemAdded {
                product_id,
                quantity,
                ..
            } => self.reserve(order_id, *product_id, *quantity),
            OrderEvent::OrderItemRemoved {
                product_id,
                quantity,
            } => self.release(order_id, *product_id, *quantity),
            OrderEvent::OrderShipped { .. } => {
                for (product_id, units) in self.release_order(order_id) {
                    let shipped = self.shipped.entry(product_id).or_default();
                    *shipped = shipped.saturating_add(units);
                }
            }
            OrderEvent::OrderCancelled { .. } => {
                self.release_order(order_id);
            }
            OrderEvent::PaymentProcessed { .. } => {}
        }
    }
}

/// One order in a customer's history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerOrder {
    /// The order.
    pub order_id: Uuid,
    /// When it was placed.
    pub created_at: DateTime<Utc>,
    /// Total at creation.
    pub total_amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Lifecycle state.
    pub status: OrderStatus,
}

/// Aggregates over a customer's orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerStats {
    /// Orders placed.
    pub total_orders: u32,
    /// Sum of processed payments.
    pub total_spent: f64,
    /// When the first order was placed.
    pub first_order_date: DateTime<Utc>,
    /// When the latest order was placed.
    pub last_order_date: DateTime<Utc>,
}

/// Each customer's orders and spend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerHistoryView {
    orders: BTreeMap<Uuid, Vec<CustomerOrder>>,
    stats: BTreeMap<Uuid, CustomerStats>,
    customer_of: BTreeMap<Uuid, Uuid>,
}

impl CustomerHistoryView {
    /// Returns a customer's orders, oldest first.
    pub fn orders(&self, customer_id: Uuid) -> &[CustomerOrder] {
        self.orders
            .get(&customer_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns a customer's statistics, if they have ordered.
    pub fn stats(&self, customer_id: Uuid) -> Option<&CustomerStats> {
        self.stats.get(&customer_id)
    }

    fn order_mut(&mut self, order_id: Uuid) -> Option<(Uuid, &mut CustomerOrder)> {
        let customer_id = *self.customer_of.get(&order_id)?;
        let order = self
            .orders
            .get_mut(&customer_id)?
            .iter_mut()
            .find(|o| o.order_id == order_id)?;
        Some((customer_id, order))
    }
}

impl ReadModel<OrderEvent> for CustomerHistoryView {
    fn handle(&mut self, event: &EventEnvelope<OrderEvent>) {
        let Some(order_id) = event.aggregate_id() else {
            return;
        };
        let at = event.timestamp();

        match event.payload() {
            OrderEvent::OrderCreated {
                customer_id,
                total_amount,
                currency,
                ..
            } => {
                self.customer_of.insert(order_id, *customer_id);
                self.orders.entry(*customer_id).or_default().push(CustomerOrder {
                    order_id,
                    created_at: at,
                    total_amount: *total_amount,
                    currency: currency.clone(),
                    status: OrderStatus::Pending,
                });
                let stats = self.stats.entry(*customer_id).or_insert(CustomerStats {
                    total_orders: 0,
                    total_spent: 0.0,
                    first_order_date: at,
                    last_order_date: at,
                });
                stats.total_orders = stats.total_orders.saturating_add(1);
                stats.last_order_date = at;
            }
            OrderEvent::PaymentProcessed { amount, .. } => {
                if let Some((customer_id, order)) = self.order_mut(order_id) {
                    order.status = OrderStatus::Confirmed;
                    if let Some(stats) = self.stats.get_mut(&customer_id) {
                        stats.total_spent += amount;
                    }
                }
            }
            OrderEvent::OrderShipped { .. } => {
                if let Some((_, order)) = self.order_mut(order_id) {
                    order.status = OrderStatus::Shipped;
                }
            }
            OrderEvent::OrderCancelled { .. } => {
                if let Some((_, order)) = self.order_mut(order_id) {
                    order.status = OrderStatus::Cancelled;
                }
            }
            OrderEvent::OrderItemAdded { .. } | OrderEvent::OrderItemRemoved { .. } => {}
        }
    }
}
