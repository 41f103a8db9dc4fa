use std::fmt;

// ============================================================================
// Order Commands - Represent user, operator and scheduler intent
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    /// Payment gateway reported success.
    ConfirmPayment,
    Confirm,
    Reject { reason: String },
    /// Operator/admin cancellation of any non-terminal order.
    AdminCancel { reason: String },
    UserCancel,
    Dispatch,
    Complete,
    /// Scheduler: unpaid past the payment grace period.
    PaymentTimeout,
    /// Scheduler: delivery in progress past the delivery grace period.
    DeliveryTimeout,
}

impl OrderCommand {
    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::ConfirmPayment => "confirm_payment",
            OrderCommand::Confirm => "confirm",
            OrderCommand::Reject { .. } => "reject",
            OrderCommand::AdminCancel { .. } => "admin_cancel",
            OrderCommand::UserCancel => "user_cancel",
            OrderCommand::Dispatch => "dispatch",
            OrderCommand::Complete => "complete",
            OrderCommand::PaymentTimeout => "payment_timeout",
            OrderCommand::DeliveryTimeout => "delivery_timeout",
        }
    }
}

impl fmt::Display for OrderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
