use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::domain::order::{
    Address, AddressId, CartEntry, CartKey, ItemSnapshot, NewOrder, NewOrderLine, Order, OrderEvent,
    OrderId, OrderLine, OrderNumber, OrderQuery, OrderStatus, Page, PageResult, Stamp, UserId,
    WriteGuard,
};
use super::{cart_matches, overdue_reference, OrderStore, StoreError};

// ============================================================================
// In-memory Order Store
// ============================================================================
//
// One mutex over the whole state: every trait call is a single atomic unit,
// matching the transactional contract of the Postgres store.
//
// ============================================================================

#[derive(Default)]
struct MemoryState {
    next_order_id: i64,
    next_line_id: i64,
    addresses: Vec<Address>,
    cart: Vec<CartEntry>,
    orders: BTreeMap<OrderId, Order>,
    lines: Vec<OrderLine>,
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The address book is owned elsewhere; this seeds it.
    pub async fn insert_address(&self, address: Address) {
        self.state.lock().await.addresses.push(address);
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    #[cfg(test)]
    pub(crate) async fn line_count(&self) -> usize {
        self.state.lock().await.lines.len()
    }
}

fn merge_entry(cart: &mut Vec<CartEntry>, entry: &CartEntry) {
    match cart.iter_mut().find(|e| e.key == entry.key) {
        Some(existing) => existing.quantity += entry.quantity,
        None => cart.push(entry.clone()),
    }
}

fn matches_query(order: &Order, query: &OrderQuery) -> bool {
    query.user_id.map_or(true, |u| order.user_id == u)
        && query.status.map_or(true, |s| order.status == s)
        && query.number.as_deref().map_or(true, |n| order.number.as_str().contains(n))
        && query.phone.as_deref().map_or(true, |p| order.phone.contains(p))
        && query.placed_from.map_or(true, |t| order.order_time >= t)
        && query.placed_to.map_or(true, |t| order.order_time <= t)
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_address(&self, user_id: UserId, address_id: AddressId) -> Result<Option<Address>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .addresses
            .iter()
            .find(|a| a.id == address_id && a.user_id == user_id)
            .cloned())
    }

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.cart.iter().filter(|e| e.key.user_id == user_id).cloned().collect())
    }

    async fn add_to_cart(
        &self,
        key: &CartKey,
        snapshot: &ItemSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CartEntry, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        if let Some(existing) = state.cart.iter_mut().find(|e| &e.key == key) {
            existing.quantity += 1;
            return Ok(existing.clone());
        }

        let entry = CartEntry {
            key: key.clone(),
            snapshot: snapshot.clone(),
            quantity: 1,
            created_at: now,
        };
        state.cart.push(entry.clone());
        Ok(entry)
    }

    async fn decrease_cart_entry(&self, key: &CartKey) -> Result<Option<i32>, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        let Some(pos) = state.cart.iter().position(|e| &e.key == key) else {
            return Ok(None);
        };
        state.cart[pos].quantity -= 1;
        let remaining = state.cart[pos].quantity;
        if remaining <= 0 {
            state.cart.remove(pos);
        }
        Ok(Some(remaining.max(0)))
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let before = state.cart.len();
        state.cart.retain(|e| e.key.user_id != user_id);
        Ok((before - state.cart.len()) as u64)
    }

    async fn merge_into_cart(&self, entries: &[CartEntry]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        for entry in entries {
            merge_entry(&mut state.cart, entry);
        }
        Ok(())
    }

    async fn create_order(
        &self,
        order: NewOrder,
        frozen: &[CartEntry],
        stamp: Stamp,
    ) -> Result<Order, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        if state.orders.values().any(|o| o.number == order.number) {
            return Err(StoreError::DuplicateOrderNumber(order.number));
        }

        let user_id = order.user_id;
        let current: Vec<CartEntry> = state
            .cart
            .iter()
            .filter(|e| e.key.user_id == user_id)
            .cloned()
            .collect();
        if !cart_matches(frozen, &current) {
            return Err(StoreError::CartChanged(user_id));
        }

        state.next_order_id += 1;
        let id = OrderId(state.next_order_id);
        let order = order.into_order(id, stamp);

        for line in frozen.iter().map(NewOrderLine::from) {
            state.next_line_id += 1;
            let line_id = state.next_line_id;
            state.lines.push(OrderLine {
                id: line_id,
                order_id: id,
                item: line.item,
                flavor: line.flavor,
                name: line.name,
                image: line.image,
                price: line.price,
                quantity: line.quantity,
            });
        }
        state.orders.insert(id, order.clone());
        state.cart.retain(|e| e.key.user_id != user_id);

        Ok(order)
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| &o.number == number).cloned())
    }

    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.lines.iter().filter(|l| l.order_id == id).cloned().collect())
    }

    async fn apply_event(
        &self,
        id: OrderId,
        guard: WriteGuard,
        event: &OrderEvent,
        stamp: Stamp,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;

        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.guard() != guard {
            return Ok(false);
        }

        order.apply_event(event);
        order.audit.apply(stamp);
        Ok(true)
    }

    async fn find_overdue(&self, status: OrderStatus, before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.status == status && o.refund_claim.is_none() && overdue_reference(o) < before)
            .cloned()
            .collect())
    }

    async fn find_stale_claims(&self, before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.refund_claim.as_ref().is_some_and(|c| c.requested_at < before))
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: OrderStatus) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.orders.values().filter(|o| o.status == status).count() as i64)
    }

    async fn query_orders(&self, query: &OrderQuery, page: Page) -> Result<PageResult<Order>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Order> = state.orders.values().filter(|o| matches_query(o, query)).collect();
        matching.sort_by(|a, b| b.order_time.cmp(&a.order_time).then(b.id.cmp(&a.id)));

        let total = matching.len() as i64;
        let records = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .cloned()
            .collect();

        Ok(PageResult { total, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::*;
    use crate::utils::IsTransient;

    fn key(user: i64, dish: i64) -> CartKey {
        CartKey {
            user_id: UserId(user),
            item: CatalogItem::Dish(DishId(dish)),
            flavor: None,
        }
    }

    fn snapshot(price: Amount) -> ItemSnapshot {
        ItemSnapshot { name: "noodles".into(), image: None, price }
    }

    fn new_order(number: &str) -> NewOrder {
        NewOrder {
            number: OrderNumber(number.into()),
            user_id: UserId(1),
            amount: 100,
            consignee: "Li".into(),
            phone: "138".into(),
            address: AddressSnapshot {
                province: "P".into(),
                city: "C".into(),
                district: "D".into(),
                detail: "X".into(),
                label: None,
            },
            order_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_add_to_cart_increments_matching_key() {
        let store = InMemoryOrderStore::new();
        store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();
        let entry = store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();
        assert_eq!(entry.quantity, 2);

        store.add_to_cart(&key(1, 6), &snapshot(100), Utc::now()).await.unwrap();
        assert_eq!(store.cart_entries(UserId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_decrease_removes_entry_at_zero() {
        let store = InMemoryOrderStore::new();
        store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();

        assert_eq!(store.decrease_cart_entry(&key(1, 5)).await.unwrap(), Some(0));
        assert!(store.cart_entries(UserId(1)).await.unwrap().is_empty());
        assert_eq!(store.decrease_cart_entry(&key(1, 5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_order_number_is_detected() {
        let store = InMemoryOrderStore::new();
        let stamp = Stamp::insert(Actor::User(UserId(1)), Utc::now());
        store.create_order(new_order("1"), &[], stamp).await.unwrap();

        let err = store.create_order(new_order("1"), &[], stamp).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateOrderNumber(_)));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_guarded_write_rejects_stale_guard() {
        let store = InMemoryOrderStore::new();
        let now = Utc::now();
        let order = store
            .create_order(new_order("2"), &[], Stamp::insert(Actor::User(UserId(1)), now))
            .await
            .unwrap();
        let guard = order.guard();
        let paid = OrderEvent::Paid(OrderPaid { checkout_time: now });

        assert!(store.apply_event(order.id, guard, &paid, Stamp::update(Actor::System, now)).await.unwrap());
        assert!(!store.apply_event(order.id, guard, &paid, Stamp::update(Actor::System, now)).await.unwrap());

        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::ToBeConfirmed);
        assert_eq!(stored.audit.updated_by, Actor::System);
        assert_eq!(stored.audit.created_by, Actor::User(UserId(1)));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_untouched() {
        let store = InMemoryOrderStore::new();
        store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();
        store.fail_writes(true);

        let err = store
            .create_order(new_order("3"), &[], Stamp::insert(Actor::User(UserId(1)), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.cart_entries(UserId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_order_converts_frozen_cart() {
        let store = InMemoryOrderStore::new();
        store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();
        store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();
        store.add_to_cart(&key(2, 5), &snapshot(100), Utc::now()).await.unwrap();
        let frozen = store.cart_entries(UserId(1)).await.unwrap();

        let order = store
            .create_order(new_order("4"), &frozen, Stamp::insert(Actor::User(UserId(1)), Utc::now()))
            .await
            .unwrap();

        let lines = store.order_lines(order.id).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
        assert!(store.cart_entries(UserId(1)).await.unwrap().is_empty());
        assert_eq!(store.cart_entries(UserId(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cart_change_after_freeze_writes_nothing() {
        let store = InMemoryOrderStore::new();
        store.add_to_cart(&key(1, 5), &snapshot(100), Utc::now()).await.unwrap();
        let frozen = store.cart_entries(UserId(1)).await.unwrap();

        store.add_to_cart(&key(1, 6), &snapshot(250), Utc::now()).await.unwrap();

        let err = store
            .create_order(new_order("5"), &frozen, Stamp::insert(Actor::User(UserId(1)), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CartChanged(UserId(1))));
        assert!(err.is_transient());
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.line_count().await, 0);
        assert_eq!(store.cart_entries(UserId(1)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_orders_pages_newest_first() {
        let store = InMemoryOrderStore::new();
        let base = Utc::now();
        for i in 0..5 {
            let mut order = new_order(&format!("10{i}"));
            order.order_time = base + chrono::Duration::minutes(i);
            store
                .create_order(order, &[], Stamp::insert(Actor::User(UserId(1)), base))
                .await
                .unwrap();
        }

        let page = store.query_orders(&OrderQuery::default(), Page::new(1, 2)).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].number.as_str(), "104");

        let query = OrderQuery { number: Some("102".into()), ..Default::default() };
        let page = store.query_orders(&query, Page::new(1, 10)).await.unwrap();
        assert_eq!(page.total, 1);
    }
}
