//! The order aggregate.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{LineItem, OrderEvent, OrderStatus, add_line, remove_line, total_of};
use crate::{Aggregate, Clock, Error, EventEnvelope, Result, Snapshot, SystemClock};

/// How an order was paid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentInfo {
    /// Payment method name.
    pub method: String,
    /// Amount charged.
    pub amount: f64,
    /// Provider reference.
    pub transaction_id: String,
    /// When the payment event was raised.
    pub processed_at: DateTime<Utc>,
}

/// Where and how an order was shipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingInfo {
    /// Destination address fields.
    pub address: BTreeMap<String, String>,
    /// Carrier tracking reference.
    pub tracking_number: String,
    /// Carrier name.
    pub carrier: String,
    /// When the shipping event was raised.
    pub shipped_at: DateTime<Utc>,
}

/// The materialized state of an order. Also its snapshot form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    /// Who placed the order; `None` until created.
    pub customer_id: Option<Uuid>,
    /// Lines keyed by product.
    pub items: BTreeMap<Uuid, LineItem>,
    /// Sum of the lines' subtotals.
    pub total_amount: f64,
    /// ISO currency code.
    pub currency: String,
    /// Lifecycle state.
    pub status: OrderStatus,
    /// Set once paid.
    pub payment: Option<PaymentInfo>,
    /// Set once shipped.
    pub shipping: Option<ShippingInfo>,
}

impl Default for OrderState {
    fn default() -> Self {
        Self {
            customer_id: None,
            items: BTreeMap::new(),
            total_amount: 0.0,
            currency: "USD".to_owned(),
            status: OrderStatus::Pending,
            payment: None,
            shipping: None,
        }
    }
}

impl Snapshot for OrderState {}

/// An order, rebuilt from its events.
pub struct Order {
    id: Uuid,
    version: u64,
    state: OrderState,
    uncommitted: Vec<EventEnvelope<OrderEvent>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Order")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("uncommitted", &self.uncommitted.len())
            .finish()
    }
}

impl Order {
    /// Creates an empty order whose events are stamped by `clock`.
    pub fn with_clock(id: Uuid, clock: Arc<dyn Clock>) -> Self {
        Self {
            id,
            version: 0,
            state: OrderState::default(),
            uncommitted: Vec::new(),
            clock,
        }
    }

    /// Returns the materialized state.
    pub fn state(&self) -> &OrderState {
        &self.state
    }

    /// Returns the lifecycle state.
    pub fn status(&self) -> OrderStatus {
        self.state.status
    }

    /// Returns the order total.
    pub fn total_amount(&self) -> f64 {
        self.state.total_amount
    }

    fn ensure_created(&self) -> Result<()> {
        if self.state.customer_id.is_none() {
            return Err(Error::Domain(format!("order {} does not exist", self.id)));
        }
        Ok(())
    }

    fn ensure_pending(&self, action: &str) -> Result<()> {
        self.ensure_created()?;
        if self.state.status != OrderStatus::Pending {
            return Err(Error::Domain(format!(
                "cannot {action} order {} while it is {}",
                self.id, self.state.status
            )));
        }
        Ok(())
    }

    /// Places the order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if the order already exists, a line has
    /// zero quantity or two lines name the same product.
    pub fn create(&mut self, customer_id: Uuid, items: Vec<LineItem>, currency: &str) -> Result<()> {
        if self.version != 0 || self.state.customer_id.is_some() {
            return Err(Error::Domain(format!("order {} already exists", self.id)));
        }
        if let Some(line) = items.iter().find(|line| line.quantity == 0) {
            return Err(Error::Domain(format!(
                "line for product {} has zero quantity",
                line.product_id
            )));
        }
        let mut seen = BTreeSet::new();
        if let Some(line) = items.iter().find(|line| !seen.insert(line.product_id)) {
            return Err(Error::Domain(format!(
                "product {} appears on more than one line",
                line.product_id
            )));
        }

        let total_amount = total_of(&items);
        self.raise(OrderEvent::OrderCreated {
            customer_id,
            items,
            total_amount,
            currency: currency.to_owned(),
        });
        Ok(())
    }

    /// Adds units of a product.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] unless the order is pending, `quantity` is
    /// positive and the product's line can hold the extra units.
    pub fn add_item(
        &mut self,
        product_id: Uuid,
        item_name: &str,
        quantity: u32,
        unit_price: f64,
    ) -> Result<()> {
        self.ensure_pending("modify")?;
        if quantity == 0 {
            return Err(Error::Domain("quantity must be positive".into()));
        }
        let held = self.state.items.get(&product_id).map_or(0, |line| line.quantity);
        if held.checked_add(quantity).is_none() {
            return Err(Error::Domain(format!(
                "adding {quantity} units of product {product_id} exceeds the line limit"
            )));
        }

        self.raise(OrderEvent::OrderItemAdded {
            product_id,
            quantity,
            unit_price,
            item_name: item_name.to_owned(),
        });
        Ok(())
    }

    /// Removes units of a product.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] unless the order is pending, the product is
    /// on the order and `quantity` is positive.
    pub fn remove_item(&mut self, product_id: Uuid, quantity: u32) -> Result<()> {
        self.ensure_pending("modify")?;
        if !self.state.items.contains_key(&product_id) {
            return Err(Error::Domain(format!(
                "product {product_id} is not on order {}",
                self.id
            )));
        }
        if quantity == 0 {
            return Err(Error::Domain("quantity must be positive".into()));
        }

        self.raise(OrderEvent::OrderItemRemoved {
            product_id,
            quantity,
        });
        Ok(())
    }

    /// Records payment, confirming the order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] unless the order is pending.
    pub fn process_payment(&mut self, payment_method: &str, amount: f64, transaction_id: &str) -> Result<()> {
        self.ensure_pending("pay for")?;

        self.raise(OrderEvent::PaymentProcessed {
            payment_method: payment_method.to_owned(),
            amount,
            transaction_id: transaction_id.to_owned(),
        });
        Ok(())
    }

    /// Ships a confirmed order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if the order has no items or is not
    /// confirmed.
    pub fn ship(
        &mut self,
        shipping_address: BTreeMap<String, String>,
        tracking_number: &str,
        carrier: &str,
    ) -> Result<()> {
        self.ensure_created()?;
        if self.state.items.is_empty() {
            return Err(Error::Domain(format!(
                "cannot ship order {} with no items",
                self.id
            )));
        }
        if self.state.status != OrderStatus::Confirmed {
            return Err(Error::Domain(format!(
                "order {} must be confirmed before shipping, it is {}",
                self.id, self.state.status
            )));
        }

        self.raise(OrderEvent::OrderShipped {
            shipping_address,
            tracking_number: tracking_number.to_owned(),
            carrier: carrier.to_owned(),
        });
        Ok(())
    }

    /// Cancels a pending or confirmed order, refunding its total.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Domain`] if the order is shipped or already
    /// cancelled.
    pub fn cancel(&mut self, reason: &str) -> Result<()> {
        self.ensure_created()?;
        if !matches!(self.state.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(Error::Domain(format!(
                "cannot cancel order {} while it is {}",
                self.id, self.state.status
            )));
        }

        self.raise(OrderEvent::OrderCancelled {
            reason: reason.to_owned(),
            refund_amount: self.state.total_amount,
        });
        Ok(())
    }
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Snapshot = OrderState;

    fn new(id: Uuid) -> Self {
        Self::with_clock(id, Arc::new(SystemClock))
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, event: &EventEnvelope<OrderEvent>) {
        let state = &mut self.state;
        match event.payload() {
            OrderEvent::OrderCreated {
                customer_id,
                items,
                total_amount,
                currency,
            } => {
                state.customer_id = Some(*customer_id);
                state.items = items
                    .iter()
                    .map(|line| (line.product_id, line.clone()))
                    .collect();
                state.total_amount = *total_amount;
                state.currency.clone_from(currency);
                state.status = OrderStatus::Pending;
            }
            OrderEvent::OrderItemAdded {
                product_id,
                quantity,
                unit_price,
                item_name,
            } => {
                add_line(&mut state.items, *product_id, item_name, *quantity, *unit_price);
                state.total_amount = total_of(state.items.values());
            }
            OrderEvent::OrderItemRemoved {
                product_id,
                quantity,
            } => {
                remove_line(&mut state.items, *product_id, *quantity);
                state.total_amount = total_of(state.items.values());
            }
            OrderEvent::PaymentProcessed {
                payment_method,
                amount,
                transaction_id,
            } => {
                state.status = OrderStatus::Confirmed;
                state.payment = Some(PaymentInfo {
                    method: payment_method.clone(),
                    amount: *amount,
                    transaction_id: transaction_id.clone(),
                    processed_at: event.timestamp(),
                });
            }
            OrderEvent::OrderShipped {
                shipping_address,
                tracking_number,
                carrier,
            } => {
                state.status = OrderStatus::Shipped;
                state.shipping = Some(ShippingInfo {
                    address: shipping_address.clone(),
                    tracking_number: tracking_number.clone(),
                    carrier: carrier.clone(),
                    shipped_at: event.timestamp(),
                });
            }
            OrderEvent::OrderCancelled { .. } => {
                state.status = OrderStatus::Cancelled;
            }
        }
        self.version = event.version();
    }

    fn is_creation(event: &OrderEvent) -> bool {
        matches!(event, OrderEvent::OrderCreated { .. })
    }

    fn uncommitted_events(&self) -> &[EventEnvelope<OrderEvent>] {
        &self.uncommitted
    }

    fn uncommitted_events_mut(&mut self) -> &mut Vec<EventEnvelope<OrderEvent>> {
        &mut self.uncommitted
    }

    fn snapshot(&self) -> OrderState {
        self.state.clone()
    }

    fn from_snapshot(id: Uuid, version: u64, snapshot: OrderState) -> Self {
        Self {
            version,
            state: snapshot,
            ..Self::new(id)
        }
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
