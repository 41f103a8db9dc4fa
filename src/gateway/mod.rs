// Private module declarations
mod http;
mod resilient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::order::{Amount, OrderNumber};

pub use http::HttpPaymentGateway;
pub use resilient::ResilientGateway;

// ============================================================================
// Payment Gateway Boundary
// ============================================================================
//
// Request/response contract for the external payment provider. Calls are
// slow, may fail, and may be duplicated by retries; callers never hold a
// store transaction open across them.
//
// ============================================================================

/// Identity of the paying user as known to the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerIdentity(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepayRequest {
    pub order_number: OrderNumber,
    pub amount: Amount,
    pub description: String,
    pub payer: PayerIdentity,
}

/// Token the client needs to complete payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepayTicket {
    pub prepay_id: String,
    pub nonce: String,
    pub timestamp: String,
    pub sign_type: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrepayResponse {
    Ticket(PrepayTicket),
    /// Payment success arrived before prepay creation completed.
    AlreadyPaid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_number: OrderNumber,
    pub refund_number: String,
    pub refund_amount: Amount,
    pub original_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_number: String,
    pub refund_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("gateway call timed out")]
    Timeout,

    #[error("gateway circuit breaker is open")]
    CircuitOpen,

    #[error("gateway transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// True when the refund certainly did not happen: the provider refused
    /// it or the request never left. Timeouts and transport errors are
    /// ambiguous.
    pub fn refund_not_sent(&self) -> bool {
        matches!(self, GatewayError::Rejected { .. } | GatewayError::CircuitOpen)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_prepay(&self, request: &PrepayRequest) -> Result<PrepayResponse, GatewayError>;

    /// Must be idempotent per `refund_number`.
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError>;
}
