use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::domain::order::{
    Actor, Address, AddressId, AddressSnapshot, Audit, CartEntry, CartKey, CatalogItem, DishId,
    ItemSnapshot, NewOrder, NewOrderLine, Order, OrderEvent, OrderId, OrderLine, OrderNumber,
    OrderQuery, OrderStatus, Page, PageResult, PayStatus, RefundClaim, SetmealId, Stamp, UserId,
    WriteGuard,
};
use super::{cart_matches, OrderStore, StoreError};

// ============================================================================
// PostgreSQL Order Store
// ============================================================================
//
// Tables: address_book, shopping_cart, orders, order_detail (schema.sql).
//
// Transitions are a single conditional UPDATE:
//   UPDATE orders SET ... WHERE id = $ AND status = $ AND claimed = $
// Zero rows affected means the guard lost a race.
//
// ============================================================================

const ORDER_COLUMNS: &str = "id, number, user_id, status, pay_status, amount, consignee, phone, \
     province_name, city_name, district_name, detail, address_label, order_time, checkout_time, \
     cancel_reason, rejection_reason, cancel_time, dispatched_at, delivery_time, refund_claim, \
     created_at, created_by, updated_at, updated_by";

const CART_COLUMNS: &str = "user_id, dish_id, setmeal_id, flavor, name, image, amount, number, create_time";

const CART_KEY_MATCH: &str = "user_id = $1 AND dish_id IS NOT DISTINCT FROM $2 \
     AND setmeal_id IS NOT DISTINCT FROM $3 AND flavor IS NOT DISTINCT FROM $4";

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!(max_connections = max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(include_str!("schema.sql")).execute(&self.pool).await?;
        tracing::info!("Order schema initialized");
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn item_columns(item: CatalogItem) -> (Option<i64>, Option<i64>) {
    match item {
        CatalogItem::Dish(id) => (Some(id.0), None),
        CatalogItem::Setmeal(id) => (None, Some(id.0)),
    }
}

fn item_from_columns(dish_id: Option<i64>, setmeal_id: Option<i64>) -> Result<CatalogItem, StoreError> {
    match (dish_id, setmeal_id) {
        (Some(id), None) => Ok(CatalogItem::Dish(DishId(id))),
        (None, Some(id)) => Ok(CatalogItem::Setmeal(SetmealId(id))),
        _ => Err(StoreError::Corrupt("line must reference exactly one of dish or setmeal".into())),
    }
}

fn actor_column(row: &PgRow, column: &str) -> Result<Actor, StoreError> {
    let text: String = row.try_get(column)?;
    text.parse().map_err(StoreError::Corrupt)
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status_code: i16 = row.try_get("status")?;
    let status = OrderStatus::from_code(status_code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown order status {status_code}")))?;
    let pay_code: i16 = row.try_get("pay_status")?;
    let pay_status = PayStatus::from_code(pay_code)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown pay status {pay_code}")))?;

    let refund_claim = row
        .try_get::<Option<String>, _>("refund_claim")?
        .map(|json| serde_json::from_str::<RefundClaim>(&json))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("refund claim: {e}")))?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        number: OrderNumber(row.try_get("number")?),
        user_id: UserId(row.try_get("user_id")?),
        status,
        pay_status,
        amount: row.try_get("amount")?,
        consignee: row.try_get("consignee")?,
        phone: row.try_get("phone")?,
        address: AddressSnapshot {
            province: row.try_get("province_name")?,
            city: row.try_get("city_name")?,
            district: row.try_get("district_name")?,
            detail: row.try_get("detail")?,
            label: row.try_get("address_label")?,
        },
        order_time: row.try_get("order_time")?,
        checkout_time: row.try_get("checkout_time")?,
        cancel_reason: row.try_get("cancel_reason")?,
        rejection_reason: row.try_get("rejection_reason")?,
        cancel_time: row.try_get("cancel_time")?,
        dispatched_at: row.try_get("dispatched_at")?,
        delivery_time: row.try_get("delivery_time")?,
        refund_claim,
        audit: Audit {
            created_at: row.try_get("created_at")?,
            created_by: actor_column(row, "created_by")?,
            updated_at: row.try_get("updated_at")?,
            updated_by: actor_column(row, "updated_by")?,
        },
    })
}

fn cart_entry_from_row(row: &PgRow) -> Result<CartEntry, StoreError> {
    Ok(CartEntry {
        key: CartKey {
            user_id: UserId(row.try_get("user_id")?),
            item: item_from_columns(row.try_get("dish_id")?, row.try_get("setmeal_id")?)?,
            flavor: row.try_get("flavor")?,
        },
        snapshot: ItemSnapshot {
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            price: row.try_get("amount")?,
        },
        quantity: row.try_get("number")?,
        created_at: row.try_get("create_time")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<OrderLine, StoreError> {
    Ok(OrderLine {
        id: row.try_get("id")?,
        order_id: OrderId(row.try_get("order_id")?),
        item: item_from_columns(row.try_get("dish_id")?, row.try_get("setmeal_id")?)?,
        flavor: row.try_get("flavor")?,
        name: row.try_get("name")?,
        image: row.try_get("image")?,
        price: row.try_get("amount")?,
        quantity: row.try_get("number")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| db.is_unique_violation())
}

/// Columns an event writes, as a `SET` list.
fn push_event_columns(qb: &mut QueryBuilder<'_, Postgres>, event: &OrderEvent) -> Result<(), StoreError> {
    match event {
        OrderEvent::Paid(e) => {
            qb.push("status = ").push_bind(OrderStatus::ToBeConfirmed.code());
            qb.push(", pay_status = ").push_bind(PayStatus::Paid.code());
            qb.push(", checkout_time = ").push_bind(e.checkout_time);
        }
        OrderEvent::Confirmed(_) => {
            qb.push("status = ").push_bind(OrderStatus::Confirmed.code());
        }
        OrderEvent::Rejected(e) => {
            qb.push("status = ").push_bind(OrderStatus::Cancelled.code());
            qb.push(", rejection_reason = ").push_bind(e.reason.clone());
            qb.push(", cancel_time = ").push_bind(e.cancel_time);
            if e.refunded {
                qb.push(", pay_status = ").push_bind(PayStatus::Refunded.code());
            }
            qb.push(", refund_claim = NULL, refund_requested_at = NULL");
        }
        OrderEvent::Cancelled(e) => {
            qb.push("status = ").push_bind(OrderStatus::Cancelled.code());
            qb.push(", cancel_reason = ").push_bind(e.reason.clone());
            qb.push(", cancel_time = ").push_bind(e.cancel_time);
            if e.refunded {
                qb.push(", pay_status = ").push_bind(PayStatus::Refunded.code());
            }
            qb.push(", refund_claim = NULL, refund_requested_at = NULL");
        }
        OrderEvent::Dispatched(e) => {
            qb.push("status = ").push_bind(OrderStatus::DeliveryInProgress.code());
            qb.push(", dispatched_at = ").push_bind(e.dispatched_at);
        }
        OrderEvent::Completed(e) => {
            qb.push("status = ").push_bind(OrderStatus::Completed.code());
            qb.push(", delivery_time = ").push_bind(e.delivery_time);
        }
        OrderEvent::RefundClaimed(e) => {
            let json = serde_json::to_string(&e.claim)
                .map_err(|err| StoreError::Corrupt(format!("refund claim: {err}")))?;
            qb.push("refund_claim = ").push_bind(json);
            qb.push(", refund_requested_at = ").push_bind(e.claim.requested_at);
        }
        OrderEvent::RefundReleased => {
            qb.push("refund_claim = NULL, refund_requested_at = NULL");
        }
    }
    Ok(())
}

fn push_query_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &OrderQuery) {
    qb.push(" WHERE 1=1");
    if let Some(user_id) = query.user_id {
        qb.push(" AND user_id = ").push_bind(user_id.0);
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.code());
    }
    if let Some(number) = &query.number {
        qb.push(" AND number LIKE ").push_bind(format!("%{}%", number));
    }
    if let Some(phone) = &query.phone {
        qb.push(" AND phone LIKE ").push_bind(format!("%{}%", phone));
    }
    if let Some(from) = query.placed_from {
        qb.push(" AND order_time >= ").push_bind(from);
    }
    if let Some(to) = query.placed_to {
        qb.push(" AND order_time <= ").push_bind(to);
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn find_address(&self, user_id: UserId, address_id: AddressId) -> Result<Option<Address>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, consignee, phone, province_name, city_name, district_name, detail, label
             FROM address_book WHERE id = $1 AND user_id = $2",
        )
        .bind(address_id.0)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(Address {
            id: AddressId(row.try_get("id")?),
            user_id: UserId(row.try_get("user_id")?),
            consignee: row.try_get("consignee")?,
            phone: row.try_get("phone")?,
            province: row.try_get("province_name")?,
            city: row.try_get("city_name")?,
            district: row.try_get("district_name")?,
            detail: row.try_get("detail")?,
            label: row.try_get("label")?,
        }))
    }

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {CART_COLUMNS} FROM shopping_cart WHERE user_id = $1 ORDER BY create_time, id"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(cart_entry_from_row).collect()
    }

    async fn add_to_cart(
        &self,
        key: &CartKey,
        snapshot: &ItemSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CartEntry, StoreError> {
        let (dish_id, setmeal_id) = item_columns(key.item);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            "UPDATE shopping_cart SET number = number + 1 WHERE {CART_KEY_MATCH} RETURNING {CART_COLUMNS}"
        ))
        .bind(key.user_id.0)
        .bind(dish_id)
        .bind(setmeal_id)
        .bind(&key.flavor)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match updated {
            Some(row) => row,
            None => {
                sqlx::query(&format!(
                    "INSERT INTO shopping_cart ({CART_COLUMNS})
                     VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8)
                     RETURNING {CART_COLUMNS}"
                ))
                .bind(key.user_id.0)
                .bind(dish_id)
                .bind(setmeal_id)
                .bind(&key.flavor)
                .bind(&snapshot.name)
                .bind(&snapshot.image)
                .bind(snapshot.price)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        cart_entry_from_row(&row)
    }

    async fn decrease_cart_entry(&self, key: &CartKey) -> Result<Option<i32>, StoreError> {
        let (dish_id, setmeal_id) = item_columns(key.item);
        let mut tx = self.pool.begin().await?;

        let remaining: Option<i32> = sqlx::query_scalar(&format!(
            "UPDATE shopping_cart SET number = number - 1 WHERE {CART_KEY_MATCH} RETURNING number"
        ))
        .bind(key.user_id.0)
        .bind(dish_id)
        .bind(setmeal_id)
        .bind(&key.flavor)
        .fetch_optional(&mut *tx)
        .await?;

        if remaining.is_some_and(|n| n <= 0) {
            sqlx::query(&format!("DELETE FROM shopping_cart WHERE {CART_KEY_MATCH}"))
                .bind(key.user_id.0)
                .bind(dish_id)
                .bind(setmeal_id)
                .bind(&key.flavor)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(remaining.map(|n| n.max(0)))
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM shopping_cart WHERE user_id = $1")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn merge_into_cart(&self, entries: &[CartEntry]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let (dish_id, setmeal_id) = item_columns(entry.key.item);
            let updated = sqlx::query(&format!(
                "UPDATE shopping_cart SET number = number + $5 WHERE {CART_KEY_MATCH}"
            ))
            .bind(entry.key.user_id.0)
            .bind(dish_id)
            .bind(setmeal_id)
            .bind(&entry.key.flavor)
            .bind(entry.quantity)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                sqlx::query(&format!(
                    "INSERT INTO shopping_cart ({CART_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
                ))
                .bind(entry.key.user_id.0)
                .bind(dish_id)
                .bind(setmeal_id)
                .bind(&entry.key.flavor)
                .bind(&entry.snapshot.name)
                .bind(&entry.snapshot.image)
                .bind(entry.snapshot.price)
                .bind(entry.quantity)
                .bind(entry.created_at)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_order(
        &self,
        order: NewOrder,
        frozen: &[CartEntry],
        stamp: Stamp,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Rows added after this statement's snapshot stay in the cart.
        let taken = sqlx::query(&format!(
            "DELETE FROM shopping_cart WHERE user_id = $1 RETURNING {CART_COLUMNS}"
        ))
        .bind(order.user_id.0)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(cart_entry_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        if !cart_matches(frozen, &taken) {
            return Err(StoreError::CartChanged(order.user_id));
        }

        let inserted = sqlx::query(&format!(
            "INSERT INTO orders (
                number, user_id, status, pay_status, amount, consignee, phone,
                province_name, city_name, district_name, detail, address_label, order_time,
                created_at, created_by, updated_at, updated_by
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $14, $15)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.number.as_str())
        .bind(order.user_id.0)
        .bind(OrderStatus::PendingPayment.code())
        .bind(PayStatus::Unpaid.code())
        .bind(order.amount)
        .bind(&order.consignee)
        .bind(&order.phone)
        .bind(&order.address.province)
        .bind(&order.address.city)
        .bind(&order.address.district)
        .bind(&order.address.detail)
        .bind(&order.address.label)
        .bind(order.order_time)
        .bind(stamp.at)
        .bind(stamp.by.to_string())
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::DuplicateOrderNumber(order.number));
            }
            Err(err) => return Err(err.into()),
        };
        let created = order_from_row(&row)?;

        let lines: Vec<NewOrderLine> = frozen.iter().map(NewOrderLine::from).collect();
        if !lines.is_empty() {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO order_detail (order_id, dish_id, setmeal_id, flavor, name, image, amount, number) ",
            );
            qb.push_values(lines, |mut b, line| {
                let (dish_id, setmeal_id) = item_columns(line.item);
                b.push_bind(created.id.0)
                    .push_bind(dish_id)
                    .push_bind(setmeal_id)
                    .push_bind(line.flavor)
                    .push_bind(line.name)
                    .push_bind(line.image)
                    .push_bind(line.price)
                    .push_bind(line.quantity);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_number(&self, number: &OrderNumber) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"))
            .bind(number.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, order_id, dish_id, setmeal_id, flavor, name, image, amount, number
             FROM order_detail WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(line_from_row).collect()
    }

    async fn apply_event(
        &self,
        id: OrderId,
        guard: WriteGuard,
        event: &OrderEvent,
        stamp: Stamp,
    ) -> Result<bool, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE orders SET ");
        push_event_columns(&mut qb, event)?;
        qb.push(", updated_at = ").push_bind(stamp.at);
        qb.push(", updated_by = ").push_bind(stamp.by.to_string());
        qb.push(" WHERE id = ").push_bind(id.0);
        qb.push(" AND status = ").push_bind(guard.status.code());
        qb.push(" AND (refund_requested_at IS NOT NULL) = ").push_bind(guard.refund_claimed);

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_overdue(&self, status: OrderStatus, before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let reference = match status {
            OrderStatus::DeliveryInProgress => "COALESCE(dispatched_at, order_time)",
            _ => "order_time",
        };
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE status = $1 AND refund_requested_at IS NULL AND {reference} < $2
             ORDER BY id"
        ))
        .bind(status.code())
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn find_stale_claims(&self, before: DateTime<Utc>) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE refund_requested_at IS NOT NULL AND refund_requested_at < $1
             ORDER BY refund_requested_at"
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn count_by_status(&self, status: OrderStatus) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = $1")
            .bind(status.code())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn query_orders(&self, query: &OrderQuery, page: Page) -> Result<PageResult<Order>, StoreError> {
        let mut count_qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_query_filters(&mut count_qb, query);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders"));
        push_query_filters(&mut qb, query);
        qb.push(" ORDER BY order_time DESC, id DESC LIMIT ").push_bind(page.size as i64);
        qb.push(" OFFSET ").push_bind(page.offset());

        let rows = qb.build().fetch_all(&self.pool).await?;
        let records = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(PageResult { total, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_columns_are_exclusive() {
        assert_eq!(item_columns(CatalogItem::Dish(DishId(3))), (Some(3), None));
        assert_eq!(item_columns(CatalogItem::Setmeal(SetmealId(4))), (None, Some(4)));
        assert!(item_from_columns(Some(1), Some(2)).is_err());
        assert!(item_from_columns(None, None).is_err());
        assert_eq!(item_from_columns(None, Some(4)).unwrap(), CatalogItem::Setmeal(SetmealId(4)));
    }

    #[test]
    fn test_guarded_update_sql() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE orders SET ");
        push_event_columns(&mut qb, &OrderEvent::RefundReleased).unwrap();
        assert_eq!(qb.sql(), "UPDATE orders SET refund_claim = NULL, refund_requested_at = NULL");
    }

    #[test]
    fn test_query_filters_only_constrain_given_fields() {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM orders");
        push_query_filters(
            &mut qb,
            &OrderQuery { status: Some(OrderStatus::Confirmed), ..Default::default() },
        );
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM orders WHERE 1=1 AND status = $1");
    }

    // These need a disposable database:
    //   DATABASE_URL=postgres://... cargo test -- --ignored

    async fn live_store() -> PgOrderStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
        let store = PgOrderStore::connect(&url, 2).await.unwrap();
        store.init_schema().await.unwrap();
        store
    }

    fn new_order(user_id: UserId, number: String) -> NewOrder {
        NewOrder {
            number: OrderNumber(number),
            user_id,
            amount: 300,
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

    fn dish(user_id: UserId, id: i64) -> CartKey {
        CartKey { user_id, item: CatalogItem::Dish(DishId(id)), flavor: None }
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_guarded_write_reports_lost_race() {
        let store = live_store().await;
        let now = Utc::now();
        let user_id = UserId(now.timestamp_micros());
        let order = store
            .create_order(new_order(user_id, format!("G{}", user_id)), &[], Stamp::insert(Actor::User(user_id), now))
            .await
            .unwrap();

        let guard = order.guard();
        let paid = OrderEvent::Paid(crate::domain::order::OrderPaid { checkout_time: now });
        let stamp = Stamp::update(Actor::System, now);
        assert!(store.apply_event(order.id, guard, &paid, stamp).await.unwrap());
        assert!(!store.apply_event(order.id, guard, &paid, stamp).await.unwrap());

        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::ToBeConfirmed);
        assert_eq!(stored.pay_status, PayStatus::Paid);
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_create_order_refuses_changed_cart() {
        let store = live_store().await;
        let now = Utc::now();
        let user_id = UserId(now.timestamp_micros());
        let snapshot = ItemSnapshot { name: "noodles".into(), image: None, price: 150 };
        let stamp = Stamp::insert(Actor::User(user_id), now);

        store.add_to_cart(&dish(user_id, 1), &snapshot, now).await.unwrap();
        let frozen = store.cart_entries(user_id).await.unwrap();
        store.add_to_cart(&dish(user_id, 2), &snapshot, now).await.unwrap();

        let err = store
            .create_order(new_order(user_id, format!("C{}", user_id)), &frozen, stamp)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CartChanged(_)));
        assert_eq!(store.cart_entries(user_id).await.unwrap().len(), 2);
        assert!(store.find_by_number(&OrderNumber(format!("C{}", user_id))).await.unwrap().is_none());

        let frozen = store.cart_entries(user_id).await.unwrap();
        let order = store
            .create_order(new_order(user_id, format!("C{}", user_id)), &frozen, stamp)
            .await
            .unwrap();
        assert_eq!(store.order_lines(order.id).await.unwrap().len(), 2);
        assert!(store.cart_entries(user_id).await.unwrap().is_empty());
    }
}
