use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use super::value_objects::{OrderId, OrderNumber, RefundClaim};

// ============================================================================
// Order Events - facts produced by the state machine
// ============================================================================
//
// The aggregate turns a command into exactly one event; the store persists
// the event as a guarded write and the in-memory model applies it with
// `Order::apply_event`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Paid(OrderPaid),
    Confirmed(OrderConfirmed),
    Rejected(OrderRejected),
    Cancelled(OrderCancelled),
    Dispatched(OrderDispatched),
    Completed(OrderCompleted),
    RefundClaimed(RefundClaimed),
    RefundReleased,
}

impl OrderEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::Paid(_) => "OrderPaid",
            OrderEvent::Confirmed(_) => "OrderConfirmed",
            OrderEvent::Rejected(_) => "OrderRejected",
            OrderEvent::Cancelled(_) => "OrderCancelled",
            OrderEvent::Dispatched(_) => "OrderDispatched",
            OrderEvent::Completed(_) => "OrderCompleted",
            OrderEvent::RefundClaimed(_) => "RefundClaimed",
            OrderEvent::RefundReleased => "RefundReleased",
        }
    }
}

/// Payment success callback accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub checkout_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub confirmed_at: DateTime<Utc>,
}

/// Operator declined the order. `refunded` is set when a refund was issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub reason: String,
    pub cancel_time: DateTime<Utc>,
    pub refunded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub reason: String,
    pub cancel_time: DateTime<Utc>,
    pub refunded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDispatched {
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub delivery_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundClaimed {
    pub claim: RefundClaim,
}

// ============================================================================
// Notifications - pushed to the shop dashboard, never part of order state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderNotification {
    NewOrder { order_id: OrderId, order_number: OrderNumber },
    Reminder { order_id: OrderId, order_number: OrderNumber },
}

impl OrderNotification {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderNotification::NewOrder { order_id, .. }
            | OrderNotification::Reminder { order_id, .. } => *order_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OrderNotification::NewOrder { .. } => "new_order",
            OrderNotification::Reminder { .. } => "reminder",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = OrderEvent::Dispatched(OrderDispatched { dispatched_at: Utc::now() });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Dispatched\""));

        let back: OrderEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_notification_payload_shape() {
        let notification = OrderNotification::Reminder {
            order_id: OrderId(7),
            order_number: OrderNumber("123".into()),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["type"], "reminder");
        assert_eq!(json["order_id"], 7);
        assert_eq!(json["order_number"], "123");
        assert_eq!(notification.kind(), "reminder");
    }
}
