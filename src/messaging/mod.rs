mod redpanda;

use async_trait::async_trait;

use crate::domain::order::OrderNotification;

pub use redpanda::RedpandaNotifier;

// ============================================================================
// Shop notifications (new order, customer reminder)
// ============================================================================
//
// Delivery is best effort: the order transition has already committed when a
// notification is published, so callers log failures and move on.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("notification circuit breaker is open")]
    CircuitOpen,
}

#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError>;
}

/// Used when no broker is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)?;
        tracing::info!(
            kind = notification.kind(),
            order_id = %notification.order_id(),
            payload = %payload,
            "Order notification"
        );
        Ok(())
    }
}
