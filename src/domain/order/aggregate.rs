use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::gateway::RefundRequest;
use super::value_objects::*;
use super::events::*;
use super::commands::OrderCommand;
use super::errors::OrderError;

pub const USER_CANCELLED_REASON: &str = "user cancelled";
pub const TIMED_OUT_REASON: &str = "timed out";

// ============================================================================
// Order Aggregate - the order lifecycle state machine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: OrderId,
    pub number: OrderNumber,
    pub user_id: UserId,

    // Lifecycle
    pub status: OrderStatus,
    pub pay_status: PayStatus,

    // Frozen at submission
    pub amount: Amount,
    pub consignee: String,
    pub phone: String,
    pub address: AddressSnapshot,
    pub order_time: DateTime<Utc>,

    // Transition records
    pub checkout_time: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancel_time: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub refund_claim: Option<RefundClaim>,

    pub audit: Audit,
}

/// Order header as built at submission, before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub number: OrderNumber,
    pub user_id: UserId,
    pub amount: Amount,
    pub consignee: String,
    pub phone: String,
    pub address: AddressSnapshot,
    pub order_time: DateTime<Utc>,
}

impl NewOrder {
    pub fn into_order(self, id: OrderId, stamp: Stamp) -> Order {
        Order {
            id,
            number: self.number,
            user_id: self.user_id,
            status: OrderStatus::PendingPayment,
            pay_status: PayStatus::Unpaid,
            amount: self.amount,
            consignee: self.consignee,
            phone: self.phone,
            address: self.address,
            order_time: self.order_time,
            checkout_time: None,
            cancel_reason: None,
            rejection_reason: None,
            cancel_time: None,
            dispatched_at: None,
            delivery_time: None,
            refund_claim: None,
            audit: Audit::stamped(stamp),
        }
    }
}

/// Precondition a store write is conditioned on. A write whose guard no
/// longer matches the stored row is not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteGuard {
    pub status: OrderStatus,
    pub refund_claimed: bool,
}

/// Outcome of a legal command: the event to persist and, when the order has
/// been paid, the refund that must succeed before the event may commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub event: OrderEvent,
    pub refund: Option<RefundRequest>,
}

impl Transition {
    fn plain(event: OrderEvent) -> Self {
        Self { event, refund: None }
    }

    /// The claim written ahead of the refund call.
    pub fn refund_claim(&self) -> Option<RefundClaim> {
        self.refund.as_ref()?;
        match &self.event {
            OrderEvent::Rejected(e) => Some(RefundClaim {
                requested_at: e.cancel_time,
                kind: CancelKind::Rejected,
                reason: e.reason.clone(),
            }),
            OrderEvent::Cancelled(e) => Some(RefundClaim {
                requested_at: e.cancel_time,
                kind: CancelKind::Cancelled,
                reason: e.reason.clone(),
            }),
            _ => None,
        }
    }
}

impl RefundClaim {
    /// The cancellation a recovered claim commits once its refund is done.
    pub fn completion_event(&self, now: DateTime<Utc>) -> OrderEvent {
        match self.kind {
            CancelKind::Rejected => OrderEvent::Rejected(OrderRejected {
                reason: self.reason.clone(),
                cancel_time: now,
                refunded: true,
            }),
            CancelKind::Cancelled => OrderEvent::Cancelled(OrderCancelled {
                reason: self.reason.clone(),
                cancel_time: now,
                refunded: true,
            }),
        }
    }
}

/// Legal target state for `command` from `from`, or `None` when illegal.
pub fn target_status(from: OrderStatus, command: &OrderCommand) -> Option<OrderStatus> {
    use OrderStatus::*;

    match (from, command) {
        (PendingPayment, OrderCommand::ConfirmPayment) => Some(ToBeConfirmed),
        (ToBeConfirmed, OrderCommand::Confirm) => Some(Confirmed),
        (ToBeConfirmed, OrderCommand::Reject { .. }) => Some(Cancelled),
        (PendingPayment | ToBeConfirmed | Confirmed | DeliveryInProgress, OrderCommand::AdminCancel { .. }) => {
            Some(Cancelled)
        }
        (PendingPayment | ToBeConfirmed, OrderCommand::UserCancel) => Some(Cancelled),
        (Confirmed, OrderCommand::Dispatch) => Some(DeliveryInProgress),
        (DeliveryInProgress, OrderCommand::Complete) => Some(Completed),
        (PendingPayment, OrderCommand::PaymentTimeout) => Some(Cancelled),
        (DeliveryInProgress, OrderCommand::DeliveryTimeout) => Some(Completed),
        (
            _,
            OrderCommand::ConfirmPayment
            | OrderCommand::Confirm
            | OrderCommand::Reject { .. }
            | OrderCommand::AdminCancel { .. }
            | OrderCommand::UserCancel
            | OrderCommand::Dispatch
            | OrderCommand::Complete
            | OrderCommand::PaymentTimeout
            | OrderCommand::DeliveryTimeout,
        ) => None,
    }
}

impl Order {
    pub fn guard(&self) -> WriteGuard {
        WriteGuard {
            status: self.status,
            refund_claimed: self.refund_claim.is_some(),
        }
    }

    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    /// Full refund of the order amount under its derived refund number.
    pub fn refund_request(&self) -> RefundRequest {
        RefundRequest {
            order_number: self.number.clone(),
            refund_number: self.number.refund_number(),
            refund_amount: self.amount,
            original_amount: self.amount,
        }
    }

    fn status_error(&self, command: &OrderCommand) -> OrderError {
        OrderError::OrderStatusError {
            status: self.status,
            command: command.name(),
        }
    }

    /// Validate `command` against the current state and produce the
    /// transition to persist. Never mutates the order.
    pub fn handle_command(&self, command: &OrderCommand, now: DateTime<Utc>) -> Result<Transition, OrderError> {
        if matches!(command, OrderCommand::ConfirmPayment) && self.pay_status != PayStatus::Unpaid {
            return Err(OrderError::AlreadyPaid(self.number.clone()));
        }

        // A pending refund holds the order until it is committed or released.
        if self.refund_claim.is_some() {
            return Err(self.status_error(command));
        }

        if target_status(self.status, command).is_none() {
            return Err(self.status_error(command));
        }

        let paid = self.pay_status == PayStatus::Paid;
        let refund = paid.then(|| self.refund_request());

        let transition = match command {
            OrderCommand::ConfirmPayment => Transition::plain(OrderEvent::Paid(OrderPaid { checkout_time: now })),
            OrderCommand::Confirm => Transition::plain(OrderEvent::Confirmed(OrderConfirmed { confirmed_at: now })),
            OrderCommand::Reject { reason } => Transition {
                event: OrderEvent::Rejected(OrderRejected {
                    reason: reason.clone(),
                    cancel_time: now,
                    refunded: paid,
                }),
                refund,
            },
            OrderCommand::AdminCancel { reason } => Transition {
                event: OrderEvent::Cancelled(OrderCancelled {
                    reason: reason.clone(),
                    cancel_time: now,
                    refunded: paid,
                }),
                refund,
            },
            OrderCommand::UserCancel => Transition {
                event: OrderEvent::Cancelled(OrderCancelled {
                    reason: USER_CANCELLED_REASON.to_string(),
                    cancel_time: now,
                    refunded: paid,
                }),
                refund,
            },
            OrderCommand::Dispatch => Transition::plain(OrderEvent::Dispatched(OrderDispatched { dispatched_at: now })),
            OrderCommand::Complete | OrderCommand::DeliveryTimeout => {
                Transition::plain(OrderEvent::Completed(OrderCompleted { delivery_time: now }))
            }
            OrderCommand::PaymentTimeout => {
                if paid {
                    return Err(self.status_error(command));
                }
                Transition::plain(OrderEvent::Cancelled(OrderCancelled {
                    reason: TIMED_OUT_REASON.to_string(),
                    cancel_time: now,
                    refunded: false,
                }))
            }
        };

        Ok(transition)
    }

    /// Apply a persisted event to the in-memory model.
    pub fn apply_event(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::Paid(e) => {
                self.status = OrderStatus::ToBeConfirmed;
                self.pay_status = PayStatus::Paid;
                self.checkout_time = Some(e.checkout_time);
            }
            OrderEvent::Confirmed(_) => {
                self.status = OrderStatus::Confirmed;
            }
            OrderEvent::Rejected(e) => {
                self.status = OrderStatus::Cancelled;
                self.rejection_reason = Some(e.reason.clone());
                self.cancel_time = Some(e.cancel_time);
                if e.refunded {
                    self.pay_status = PayStatus::Refunded;
                }
                self.refund_claim = None;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.cancel_time = Some(e.cancel_time);
                if e.refunded {
                    self.pay_status = PayStatus::Refunded;
                }
                self.refund_claim = None;
            }
            OrderEvent::Dispatched(e) => {
                self.status = OrderStatus::DeliveryInProgress;
                self.dispatched_at = Some(e.dispatched_at);
            }
            OrderEvent::Completed(e) => {
                self.status = OrderStatus::Completed;
                self.delivery_time = Some(e.delivery_time);
            }
            OrderEvent::RefundClaimed(e) => {
                self.refund_claim = Some(e.claim.clone());
            }
            OrderEvent::RefundReleased => {
                self.refund_claim = None;
            }
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
