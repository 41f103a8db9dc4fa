use chrono::Utc;
use std::sync::Arc;

use crate::domain::order::{CartEntry, CartKey, CatalogItem, ItemSnapshot, OrderError, UserId};
use crate::store::OrderStore;

// ============================================================================
// Shopping Cart - collects entries until the user submits an order
// ============================================================================

pub struct CartService {
    store: Arc<dyn OrderStore>,
}

impl CartService {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Add one unit of `item`. The catalog snapshot is only used when the
    /// entry is new; an existing entry keeps the price it was added at.
    pub async fn add(
        &self,
        user_id: UserId,
        item: CatalogItem,
        flavor: Option<String>,
        snapshot: ItemSnapshot,
    ) -> Result<CartEntry, OrderError> {
        let key = CartKey { user_id, item, flavor };
        let entry = self.store.add_to_cart(&key, &snapshot, Utc::now()).await?;
        tracing::debug!(user_id = %user_id, quantity = entry.quantity, "Cart entry added");
        Ok(entry)
    }

    /// Remove one unit, deleting the entry when it reaches zero. Returns the
    /// remaining quantity.
    pub async fn decrease(
        &self,
        user_id: UserId,
        item: CatalogItem,
        flavor: Option<String>,
    ) -> Result<i32, OrderError> {
        let key = CartKey { user_id, item, flavor };
        self.store
            .decrease_cart_entry(&key)
            .await?
            .ok_or(OrderError::CartItemNotFound)
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<CartEntry>, OrderError> {
        Ok(self.store.cart_entries(user_id).await?)
    }

    pub async fn clean(&self, user_id: UserId) -> Result<u64, OrderError> {
        let removed = self.store.clear_cart(user_id).await?;
        tracing::debug!(user_id = %user_id, removed = removed, "Cart cleaned");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{DishId, SetmealId};
    use crate::store::InMemoryOrderStore;

    fn snapshot(price: i64) -> ItemSnapshot {
        ItemSnapshot { name: "set meal".into(), image: Some("a.png".into()), price }
    }

    #[tokio::test]
    async fn test_flavor_is_part_of_entry_identity() {
        let cart = CartService::new(Arc::new(InMemoryOrderStore::new()));
        let user = UserId(1);
        let dish = CatalogItem::Dish(DishId(3));

        cart.add(user, dish, Some("spicy".into()), snapshot(800)).await.unwrap();
        cart.add(user, dish, Some("mild".into()), snapshot(800)).await.unwrap();
        let again = cart.add(user, dish, Some("spicy".into()), snapshot(900)).await.unwrap();

        assert_eq!(again.quantity, 2);
        assert_eq!(again.snapshot.price, 800);
        assert_eq!(cart.list(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_decrease_to_zero_removes_entry() {
        let cart = CartService::new(Arc::new(InMemoryOrderStore::new()));
        let user = UserId(1);
        let meal = CatalogItem::Setmeal(SetmealId(9));

        cart.add(user, meal, None, snapshot(2_000)).await.unwrap();
        cart.add(user, meal, None, snapshot(2_000)).await.unwrap();

        assert_eq!(cart.decrease(user, meal, None).await.unwrap(), 1);
        assert_eq!(cart.decrease(user, meal, None).await.unwrap(), 0);
        assert!(cart.list(user).await.unwrap().is_empty());
        assert!(matches!(
            cart.decrease(user, meal, None).await,
            Err(OrderError::CartItemNotFound)
        ));
    }

    #[tokio::test]
    async fn test_clean_only_touches_own_cart() {
        let cart = CartService::new(Arc::new(InMemoryOrderStore::new()));
        let dish = CatalogItem::Dish(DishId(1));
        cart.add(UserId(1), dish, None, snapshot(100)).await.unwrap();
        cart.add(UserId(2), dish, None, snapshot(100)).await.unwrap();

        assert_eq!(cart.clean(UserId(1)).await.unwrap(), 1);
        assert_eq!(cart.list(UserId(2)).await.unwrap().len(), 1);
    }
}
