//! Order events and the value types they carry.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;

/// One product line on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// The product ordered.
    pub product_id: Uuid,
    /// Display name of the product.
    pub item_name: String,
    /// Units ordered.
    pub quantity: u32,
    /// Price of one unit.
    pub unit_price: f64,
}

impl LineItem {
    /// Creates a line item.
    pub fn new(product_id: Uuid, item_name: impl Into<String>, quantity: u32, unit_price: f64) -> Self {
        Self {
            product_id,
            item_name: item_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Quantity times unit price.
    pub fn subtotal(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

/// Where an order is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, items may still change.
    #[default]
    Pending,
    /// Paid for.
    Confirmed,
    /// Handed to a carrier.
    Shipped,
    /// Withdrawn before shipping.
    Cancelled,
}

impl OrderStatus {
    /// The status as it is written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Shipped => "SHIPPED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can happen to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Event)]
pub enum OrderEvent {
    /// The order was placed.
    OrderCreated {
        /// Who placed it.
        customer_id: Uuid,
        /// Lines present at creation.
        items: Vec<LineItem>,
        /// Sum of the lines' subtotals.
        total_amount: f64,
        /// ISO currency code.
        currency: String,
    },
    /// Units of a product were added.
    OrderItemAdded {
        /// The product added.
        product_id: Uuid,
        /// Units added.
        quantity: u32,
        /// Price of one unit.
        unit_price: f64,
        /// Display name of the product.
        item_name: String,
    },
    /// Units of a product were removed.
    OrderItemRemoved {
        /// The product removed.
        product_id: Uuid,
        /// Units removed; removing at least the held quantity drops the line.
        quantity: u32,
    },
    /// Payment was taken.
    PaymentProcessed {
        /// How the customer paid.
        payment_method: String,
        /// Amount charged.
        amount: f64,
        /// Payment provider reference.
        transaction_id: String,
    },
    /// The order left the warehouse.
    OrderShipped {
        /// Destination address fields.
        shipping_address: BTreeMap<String, String>,
        /// Carrier tracking reference.
        tracking_number: String,
        /// Carrier name.
        carrier: String,
    },
    /// The order was cancelled.
    OrderCancelled {
        /// Why it was cancelled.
        reason: String,
        /// Amount returned to the customer.
        refund_amount: f64,
    },
}

/// Adds `quantity` units of a product to a set of lines, merging with an
/// existing line for the same product.
pub(crate) fn add_line(
    lines: &mut BTreeMap<Uuid, LineItem>,
    product_id: Uuid,
    item_name: &str,
    quantity: u32,
    unit_price: f64,
) {
    lines
        .entry(product_id)
        .and_modify(|line| line.quantity = line.quantity.saturating_add(quantity))
        .or_insert_with(|| LineItem::new(product_id, item_name, quantity, unit_price));
}

/// Removes `quantity` units of a product, dropping the line when nothing
/// remains. Returns how many units were actually removed.
pub(crate) fn remove_line(lines: &mut BTreeMap<Uuid, LineItem>, product_id: Uuid, quantity: u32) -> u32 {
    let Some(line) = lines.get_mut(&product_id) else {
        return 0;
    };
    if line.quantity <= quantity {
        let removed = line.quantity;
        lines.remove(&product_id);
        removed
    } else {
        line.quantity -= quantity;
        quantity
    }
}

/// Sum of the lines' subtotals.
pub(crate) fn total_of<'a>(lines: impl IntoIterator<Item = &'a LineItem>) -> f64 {
    lines.into_iter().map(LineItem::subtotal).sum()
}
