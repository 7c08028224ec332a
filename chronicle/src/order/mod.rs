//! The reference order domain.
//!
//! An [`Order`] moves through `PENDING → CONFIRMED → SHIPPED`, and can be
//! `CANCELLED` from `PENDING` or `CONFIRMED`. Line items may only change while
//! the order is `PENDING`. The read models in [`views`] answer queries over all
//! orders.

mod aggregate;
mod events;
pub mod views;

pub use aggregate::{Order, OrderState, PaymentInfo, ShippingInfo};
pub use events::{LineItem, OrderEvent, OrderStatus};
pub use views::{CustomerHistoryView, InventoryView, OrderSummaryView};
