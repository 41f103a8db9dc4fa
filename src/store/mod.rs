// ============================================================================
// Order Store - durable order headers, order lines and cart entries
// ============================================================================
//
// Every multi-row write is one atomic unit. Order transitions are guarded
// writes: the update only lands when the stored row still matches the
// `WriteGuard` the caller decided on, so a lost race is reported as
// `Ok(false)` instead of overwriting the winner.
//
// ============================================================================

mod memory;
mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use chrono::{DateTime, Utc};

use crate::domain::order::{
    Address, AddressId, CartEntry, CartKey, ItemSnapshot, NewOrder, Order, OrderEvent,
    OrderId, OrderLine, OrderNumber, OrderQuery, OrderStatus, Page, PageResult, Stamp, UserId,
    WriteGuard,
};
use crate::utils::IsTransient;

pub use memory::InMemoryOrderStore;
pub use postgres::PgOrderStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("order number already exists: {0}")]
    DuplicateOrderNumber(OrderNumber),

    #[error("cart of user {0} changed while the order was being placed")]
    CartChanged(UserId),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("order store unavailable")]
    Unavailable,
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::DuplicateOrderNumber(_) | StoreError::CartChanged(_))
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_address(&self, user_id: UserId, address_id: AddressId) -> Result<Option<Address>, StoreError>;

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>, StoreError>;

    /// Increment the entry with this key, or insert it with quantity 1.
    async fn add_to_cart(
        &self,
        key: &CartKey,
        snapshot: &ItemSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CartEntry, StoreError>;

    /// Decrement the entry with this key, deleting it at zero. Returns the
    /// remaining quantity, or `None` when there was no such entry.
    async fn decrease_cart_entry(&self, key: &CartKey) -> Result<Option<i32>, StoreError>;

    async fn clear_cart(&self, user_id: UserId) -> Result<u64, StoreError>;

    /// Add all entries in one unit, summing quantities on matching keys.
    async fn merge_into_cart(&self, entries: &[CartEntry]) -> Result<(), StoreError>;

    /// Turn the owner's cart into the order header and its lines, all in one
    /// atomic unit. `frozen` is the cart the order was priced from; if the
    /// stored cart no longer matches it nothing is written and `CartChanged`
    /// is returned.
    async fn create_order(
        &self,
        order: NewOrder,
        frozen: &[CartEntry],
        stamp: Stamp,
    ) -> Result<Order, StoreError>;

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError>;

    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, StoreError>;

    /// Persist `event` if the row still matches `guard`. Returns whether the
    /// write was applied.
    async fn apply_event(
        &self,
        id: OrderId,
        guard: WriteGuard,
        event: &OrderEvent,
        stamp: Stamp,
    ) -> Result<bool, StoreError>;

    /// Unclaimed orders in `status` whose reference time (dispatch time for
    /// deliveries, placement time otherwise) is before `before`.
    async fn find_overdue(&self, status: OrderStatus, before: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    /// Orders whose refund claim was written before `before`.
    async fn find_stale_claims(&self, before: DateTime<Utc>) -> Result<Vec<Order>, StoreError>;

    async fn count_by_status(&self, status: OrderStatus) -> Result<i64, StoreError>;

    /// Newest first.
    async fn query_orders(&self, query: &OrderQuery, page: Page) -> Result<PageResult<Order>, StoreError>;
}

/// Whether `current` holds exactly the entries (key, quantity and price)
/// that were frozen, in any order.
pub(crate) fn cart_matches(frozen: &[CartEntry], current: &[CartEntry]) -> bool {
    let index = |entries: &[CartEntry]| -> HashMap<CartKey, (i32, i64)> {
        entries
            .iter()
            .map(|e| (e.key.clone(), (e.quantity, e.snapshot.price)))
            .collect()
    };
    frozen.len() == current.len() && index(frozen) == index(current)
}

/// Time an order in `status` has been waiting since.
pub(crate) fn overdue_reference(order: &Order) -> DateTime<Utc> {
    match order.status {
        OrderStatus::DeliveryInProgress => order.dispatched_at.unwrap_or(order.order_time),
        _ => order.order_time,
    }
}
