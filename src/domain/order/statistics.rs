use serde::Serialize;
use std::sync::Arc;

use crate::store::{OrderStore, StoreError};
use super::value_objects::OrderStatus;

/// Dashboard counters. Read without locking, so they may lag a transition
/// that is committing concurrently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatistics {
    pub to_be_confirmed: i64,
    pub confirmed: i64,
    pub delivery_in_progress: i64,
}

pub struct StatisticsAggregator {
    store: Arc<dyn OrderStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    pub async fn counts(&self) -> Result<OrderStatistics, StoreError> {
        let (to_be_confirmed, confirmed, delivery_in_progress) = tokio::try_join!(
            self.store.count_by_status(OrderStatus::ToBeConfirmed),
            self.store.count_by_status(OrderStatus::Confirmed),
            self.store.count_by_status(OrderStatus::DeliveryInProgress),
        )?;

        Ok(OrderStatistics { to_be_confirmed, confirmed, delivery_in_progress })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::*;
    use crate::store::InMemoryOrderStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_counts_by_status() {
        let store = Arc::new(InMemoryOrderStore::new());
        let now = Utc::now();
        for (i, events) in [0usize, 1, 1, 2].into_iter().enumerate() {
            let order = store
                .create_order(
                    NewOrder {
                        number: OrderNumber(format!("{i}")),
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
                        order_time: now,
                    },
                    &[],
                    Stamp::insert(Actor::System, now),
                )
                .await
                .unwrap();

            let progression = [
                OrderEvent::Paid(OrderPaid { checkout_time: now }),
                OrderEvent::Confirmed(OrderConfirmed { confirmed_at: now }),
            ];
            let mut guard = order.guard();
            for event in progression.iter().take(events) {
                assert!(store.apply_event(order.id, guard, event, Stamp::update(Actor::System, now)).await.unwrap());
                guard = store.find_order(order.id).await.unwrap().unwrap().guard();
            }
        }

        let stats = StatisticsAggregator::new(store).counts().await.unwrap();
        assert_eq!(stats, OrderStatistics { to_be_confirmed: 2, confirmed: 1, delivery_in_progress: 0 });

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["toBeConfirmed"], 2);
        assert_eq!(json["deliveryInProgress"], 0);
    }
}
