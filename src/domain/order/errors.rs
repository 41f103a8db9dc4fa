use super::value_objects::{OrderId, OrderNumber, OrderStatus};
use crate::gateway::GatewayError;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Address not found for this user")]
    AddressNotFound,

    #[error("Shopping cart is empty")]
    EmptyCart,

    #[error("Item is not in the shopping cart")]
    CartItemNotFound,

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("No order with number {0}")]
    OrderNumberNotFound(OrderNumber),

    #[error("Order in status {status} does not accept {command}")]
    OrderStatusError { status: OrderStatus, command: &'static str },

    #[error("Order {0} is already paid")]
    AlreadyPaid(OrderNumber),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Order store error: {0}")]
    Store(#[from] StoreError),
}

impl OrderError {
    /// `AlreadyPaid` resolves a payment race; callers treat it as success.
    pub fn is_success_equivalent(&self) -> bool {
        matches!(self, OrderError::AlreadyPaid(_))
    }

    /// Whether the whole operation may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrderError::Gateway(_) | OrderError::Store(_))
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            OrderError::AddressNotFound => "address_not_found",
            OrderError::EmptyCart => "empty_cart",
            OrderError::CartItemNotFound => "cart_item_not_found",
            OrderError::OrderNotFound(_) | OrderError::OrderNumberNotFound(_) => "order_not_found",
            OrderError::OrderStatusError { .. } => "order_status_error",
            OrderError::AlreadyPaid(_) => "already_paid",
            OrderError::Gateway(_) => "gateway_error",
            OrderError::Store(_) => "store_error",
        }
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}
