use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::gateway::{PayerIdentity, PaymentGateway, PrepayRequest, PrepayResponse, PrepayTicket};
use crate::messaging::OrderNotifier;
use crate::metrics::Metrics;
use crate::store::OrderStore;
use crate::utils::{retry_on_transient, RetryConfig};

use super::aggregate::{NewOrder, Order};
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::{OrderEvent, OrderNotification, RefundClaimed};
use super::value_objects::*;

const PAYMENT_DESCRIPTION: &str = "Food order";

// ============================================================================
// Order Command Handler
// ============================================================================
//
// Orchestrates: load order -> aggregate decides -> (refund) -> guarded write
//
// Refund-bearing transitions run in three steps so that no store write is
// held open across the gateway call:
//   1. claim:   write the pending cancellation, guarded on "unclaimed"
//   2. refund:  call the gateway (idempotent per refund number)
//   3. commit:  write the cancellation, guarded on "claimed"
// A refusal from the gateway releases the claim. A timeout or transport
// error may hide a refund that went through, so the claim stays and the
// refund recovery sweep re-drives it, as it does after a crash between 2
// and 3.
//
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub lines: Vec<OrderLine>,
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn OrderNotifier>,
    numbers: OrderNumberGenerator,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn OrderNotifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            numbers: OrderNumberGenerator::new(),
            retry: RetryConfig::conservative(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Freeze the user's cart into a new order and clear the cart.
    pub async fn submit(&self, user_id: UserId, address_id: AddressId) -> Result<Order, OrderError> {
        let address = self
            .store
            .find_address(user_id, address_id)
            .await?
            .ok_or(OrderError::AddressNotFound)?;

        let snapshot = AddressSnapshot::from(&address);
        let now = Utc::now();
        let stamp = Stamp::insert(Actor::User(user_id), now);

        // A cart edited mid-submit fails the write and is frozen again.
        let store = &self.store;
        let numbers = &self.numbers;
        let address = &address;
        let snapshot = &snapshot;
        let (order, line_count) = retry_on_transient(self.retry.clone(), move |_attempt| async move {
            let entries = store.cart_entries(user_id).await?;
            if entries.is_empty() {
                return Err(OrderError::EmptyCart);
            }

            let new_order = NewOrder {
                number: numbers.next(Utc::now()),
                user_id,
                amount: entries.iter().map(CartEntry::subtotal).sum(),
                consignee: address.consignee.clone(),
                phone: address.phone.clone(),
                address: snapshot.clone(),
                order_time: now,
            };
            let order = store.create_order(new_order, &entries, stamp).await?;
            Ok::<_, OrderError>((order, entries.len()))
        })
        .await
        .into_result()?;

        if let Some(metrics) = &self.metrics {
            metrics.record_submission();
        }
        tracing::info!(
            order_id = %order.id,
            order_number = %order.number,
            user_id = %user_id,
            amount = order.amount,
            lines = line_count,
            "Order submitted"
        );

        Ok(order)
    }

    // ------------------------------------------------------------------------
    // Payment
    // ------------------------------------------------------------------------

    /// Create a prepay transaction for an unpaid order.
    pub async fn request_payment(
        &self,
        user_id: UserId,
        order_number: &OrderNumber,
        payer: PayerIdentity,
    ) -> Result<PrepayTicket, OrderError> {
        let order = self
            .store
            .find_by_number(order_number)
            .await?
            .filter(|o| o.belongs_to(user_id))
            .ok_or_else(|| OrderError::OrderNumberNotFound(order_number.clone()))?;

        if order.pay_status != PayStatus::Unpaid {
            return Err(OrderError::AlreadyPaid(order.number));
        }
        if order.status != OrderStatus::PendingPayment {
            return Err(OrderError::OrderStatusError {
                status: order.status,
                command: "request_payment",
            });
        }

        let request = PrepayRequest {
            order_number: order.number.clone(),
            amount: order.amount,
            description: PAYMENT_DESCRIPTION.to_string(),
            payer,
        };

        match self.gateway.create_prepay(&request).await? {
            PrepayResponse::Ticket(ticket) => {
                tracing::debug!(order_number = %order.number, "Prepay created");
                Ok(ticket)
            }
            PrepayResponse::AlreadyPaid => {
                tracing::info!(order_number = %order.number, "Gateway reports order already paid");
                Err(OrderError::AlreadyPaid(order.number))
            }
        }
    }

    /// Payment success callback. A repeated callback yields `AlreadyPaid`.
    pub async fn pay_success(&self, order_number: &OrderNumber) -> Result<Order, OrderError> {
        let order = self
            .store
            .find_by_number(order_number)
            .await?
            .ok_or_else(|| OrderError::OrderNumberNotFound(order_number.clone()))?;

        let order = self.execute(order, OrderCommand::ConfirmPayment, Actor::System).await?;

        self.publish(OrderNotification::NewOrder {
            order_id: order.id,
            order_number: order.number.clone(),
        })
        .await;

        Ok(order)
    }

    // ------------------------------------------------------------------------
    // Operator transitions
    // ------------------------------------------------------------------------

    pub async fn confirm(&self, order_id: OrderId, operator: EmployeeId) -> Result<Order, OrderError> {
        self.run(order_id, OrderCommand::Confirm, Actor::Operator(operator)).await
    }

    pub async fn reject(&self, order_id: OrderId, reason: &str, operator: EmployeeId) -> Result<Order, OrderError> {
        let command = OrderCommand::Reject { reason: reason.to_string() };
        self.run(order_id, command, Actor::Operator(operator)).await
    }

    pub async fn admin_cancel(&self, order_id: OrderId, reason: &str, operator: EmployeeId) -> Result<Order, OrderError> {
        let command = OrderCommand::AdminCancel { reason: reason.to_string() };
        self.run(order_id, command, Actor::Operator(operator)).await
    }

    pub async fn dispatch(&self, order_id: OrderId, operator: EmployeeId) -> Result<Order, OrderError> {
        self.run(order_id, OrderCommand::Dispatch, Actor::Operator(operator)).await
    }

    pub async fn complete(&self, order_id: OrderId, operator: EmployeeId) -> Result<Order, OrderError> {
        self.run(order_id, OrderCommand::Complete, Actor::Operator(operator)).await
    }

    // ------------------------------------------------------------------------
    // User operations
    // ------------------------------------------------------------------------

    pub async fn user_cancel(&self, user_id: UserId, order_id: OrderId) -> Result<Order, OrderError> {
        let order = self.load_owned(user_id, order_id).await?;
        self.execute(order, OrderCommand::UserCancel, Actor::User(user_id)).await
    }

    /// Nudge the shop about an order. Never changes the order.
    pub async fn reminder(&self, user_id: UserId, order_id: OrderId) -> Result<(), OrderError> {
        let order = self.load_owned(user_id, order_id).await?;
        self.publish(OrderNotification::Reminder {
            order_id: order.id,
            order_number: order.number,
        })
        .await;
        Ok(())
    }

    /// Put the lines of a past order back into the cart. Returns the cart.
    pub async fn reorder(&self, user_id: UserId, order_id: OrderId) -> Result<Vec<CartEntry>, OrderError> {
        let order = self.load_owned(user_id, order_id).await?;
        let now = Utc::now();
        let entries: Vec<CartEntry> = self
            .store
            .order_lines(order.id)
            .await?
            .iter()
            .map(|line| line.to_cart_entry(user_id, now))
            .collect();

        self.store.merge_into_cart(&entries).await?;
        tracing::debug!(order_id = %order.id, user_id = %user_id, lines = entries.len(), "Order re-added to cart");

        Ok(self.store.cart_entries(user_id).await?)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn details(&self, actor: Actor, order_id: OrderId) -> Result<OrderDetails, OrderError> {
        let order = match actor {
            Actor::User(user_id) => self.load_owned(user_id, order_id).await?,
            Actor::Operator(_) | Actor::System => self.load(order_id).await?,
        };
        let lines = self.store.order_lines(order.id).await?;
        Ok(OrderDetails { order, lines })
    }

    /// The user's own orders with their lines, newest first.
    pub async fn history(
        &self,
        user_id: UserId,
        status: Option<OrderStatus>,
        page: Page,
    ) -> Result<PageResult<OrderDetails>, OrderError> {
        let query = OrderQuery { user_id: Some(user_id), status, ..Default::default() };
        let result = self.store.query_orders(&query, page).await?;

        let records = try_join_all(result.records.into_iter().map(|order| async move {
            let lines = self.store.order_lines(order.id).await?;
            Ok::<_, OrderError>(OrderDetails { order, lines })
        }))
        .await?;

        Ok(PageResult { total: result.total, records })
    }

    pub async fn search(&self, query: &OrderQuery, page: Page) -> Result<PageResult<Order>, OrderError> {
        Ok(self.store.query_orders(query, page).await?)
    }

    // ------------------------------------------------------------------------
    // Reconciliation entry points
    // ------------------------------------------------------------------------

    /// Apply a scheduler command to an order selected by a sweep. The guarded
    /// write makes this a no-op if the order moved on since selection.
    pub async fn force(&self, order: Order, command: OrderCommand) -> Result<Order, OrderError> {
        self.execute(order, command, Actor::System).await
    }

    /// Re-drive a refund claim left behind by an interrupted cancellation.
    pub async fn recover_refund(&self, order: Order) -> Result<Order, OrderError> {
        let Some(claim) = order.refund_claim.clone() else {
            return Err(OrderError::OrderStatusError {
                status: order.status,
                command: "recover_refund",
            });
        };

        let refund = order.refund_request();
        let receipt = self.gateway.refund(&refund).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_refund();
        }
        tracing::info!(
            order_id = %order.id,
            refund_number = %receipt.refund_number,
            "Recovered refund issued"
        );

        let now = Utc::now();
        let command = match claim.kind {
            CancelKind::Rejected => OrderCommand::Reject { reason: claim.reason.clone() },
            CancelKind::Cancelled => OrderCommand::AdminCancel { reason: claim.reason.clone() },
        };
        self.commit(order, &command, claim.completion_event(now), Actor::System, now)
            .await
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn load(&self, order_id: OrderId) -> Result<Order, OrderError> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    /// Orders of other users are reported as missing.
    async fn load_owned(&self, user_id: UserId, order_id: OrderId) -> Result<Order, OrderError> {
        let order = self.load(order_id).await?;
        if !order.belongs_to(user_id) {
            return Err(OrderError::OrderNotFound(order_id));
        }
        Ok(order)
    }

    async fn run(&self, order_id: OrderId, command: OrderCommand, actor: Actor) -> Result<Order, OrderError> {
        let order = self.load(order_id).await?;
        self.execute(order, command, actor).await
    }

    async fn execute(&self, order: Order, command: OrderCommand, actor: Actor) -> Result<Order, OrderError> {
        let now = Utc::now();
        let result = match order.handle_command(&command, now) {
            Ok(transition) => match transition.refund_claim() {
                None => self.commit(order, &command, transition.event, actor, now).await,
                Some(claim) => {
                    self.cancel_with_refund(order, &command, claim, transition.event, actor, now)
                        .await
                }
            },
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            if let Some(metrics) = &self.metrics {
                metrics.record_rejection(command.name(), e.label());
            }
        }
        result
    }

    async fn cancel_with_refund(
        &self,
        order: Order,
        command: &OrderCommand,
        claim: RefundClaim,
        event: OrderEvent,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let refund = order.refund_request();
        let claimed = self
            .commit(order, command, OrderEvent::RefundClaimed(RefundClaimed { claim }), actor, now)
            .await?;

        if let Err(e) = self.gateway.refund(&refund).await {
            if e.refund_not_sent() {
                self.release_claim(&claimed, actor, now).await;
            } else {
                tracing::warn!(
                    order_id = %claimed.id,
                    refund_number = %refund.refund_number,
                    error = %e,
                    "Refund outcome unknown; claim kept for refund recovery"
                );
            }
            return Err(e.into());
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_refund();
        }

        let order_id = claimed.id;
        self.commit(claimed, command, event, actor, now)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    order_id = %order_id,
                    refund_number = %refund.refund_number,
                    error = %e,
                    "Refund issued but cancellation not committed; left for refund recovery"
                );
            })
    }

    async fn release_claim(&self, claimed: &Order, actor: Actor, now: DateTime<Utc>) {
        let released = self
            .store
            .apply_event(claimed.id, claimed.guard(), &OrderEvent::RefundReleased, Stamp::update(actor, now))
            .await;

        match released {
            Ok(true) => {
                tracing::warn!(order_id = %claimed.id, "Refund failed, claim released");
            }
            Ok(false) => {
                tracing::warn!(order_id = %claimed.id, "Refund claim already resolved elsewhere");
            }
            Err(e) => {
                tracing::error!(
                    order_id = %claimed.id,
                    error = %e,
                    "Failed to release refund claim; left for refund recovery"
                );
            }
        }
    }

    /// Guarded write of one event against the state `order` was read in.
    async fn commit(
        &self,
        mut order: Order,
        command: &OrderCommand,
        event: OrderEvent,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let stamp = Stamp::update(actor, now);
        let applied = self.store.apply_event(order.id, order.guard(), &event, stamp).await?;

        if !applied {
            return Err(self.lost_race(order.id, command).await);
        }

        order.apply_event(&event);
        order.audit.apply(stamp);

        if let Some(metrics) = &self.metrics {
            metrics.record_transition(event.event_type());
        }
        tracing::info!(
            order_id = %order.id,
            order_number = %order.number,
            event_type = event.event_type(),
            status = %order.status,
            actor = %actor,
            "Order transition committed"
        );

        Ok(order)
    }

    /// Another transition committed first; report what the winner left.
    async fn lost_race(&self, order_id: OrderId, command: &OrderCommand) -> OrderError {
        let current = match self.store.find_order(order_id).await {
            Ok(Some(current)) => current,
            Ok(None) => return OrderError::OrderNotFound(order_id),
            Err(e) => return e.into(),
        };

        tracing::warn!(
            order_id = %order_id,
            command = command.name(),
            status = %current.status,
            "Order changed concurrently, transition not applied"
        );

        if matches!(command, OrderCommand::ConfirmPayment) && current.pay_status != PayStatus::Unpaid {
            return OrderError::AlreadyPaid(current.number);
        }
        OrderError::OrderStatusError {
            status: current.status,
            command: command.name(),
        }
    }

    async fn publish(&self, notification: OrderNotification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(
                order_id = %notification.order_id(),
                kind = notification.kind(),
                error = %e,
                "Failed to publish order notification"
            );
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
