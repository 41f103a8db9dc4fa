use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use std::sync::Arc;

use crate::metrics::Metrics;

use super::aggregate::Order;
use super::command_handler::OrderService;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::value_objects::OrderStatus;

// ============================================================================
// Reconciliation sweeps
// ============================================================================
//
// Each sweep selects candidates, then drives every order independently
// through the regular command path. An order that moved on between
// selection and update fails its guard and is counted as skipped. Failures
// on one order are logged and never abort the sweep.
//
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationPolicy {
    pub payment_grace: Duration,
    pub delivery_grace: Duration,
    pub refund_recovery_grace: Duration,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            payment_grace: Duration::minutes(15),
            delivery_grace: Duration::minutes(60),
            refund_recovery_grace: Duration::minutes(10),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SweepReport {
    fn record(&mut self, outcome: &Result<Order, OrderError>) {
        match outcome {
            Ok(_) => self.processed += 1,
            Err(
                OrderError::OrderStatusError { .. }
                | OrderError::AlreadyPaid(_)
                | OrderError::OrderNotFound(_),
            ) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }
}

pub struct Reconciler {
    service: Arc<OrderService>,
    policy: ReconciliationPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl Reconciler {
    pub fn new(service: Arc<OrderService>, policy: ReconciliationPolicy) -> Self {
        Self { service, policy, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cancel unpaid orders placed before `now - payment_grace`.
    pub async fn sweep_stale_unpaid(&self, now: DateTime<Utc>) -> Result<SweepReport, OrderError> {
        let candidates = self
            .service
            .store()
            .find_overdue(OrderStatus::PendingPayment, now - self.policy.payment_grace)
            .await?;

        let outcomes = join_all(
            candidates
                .into_iter()
                .map(|order| self.service.force(order, OrderCommand::PaymentTimeout)),
        )
        .await;

        Ok(self.summarize("stale_unpaid", outcomes))
    }

    /// Complete deliveries dispatched before `now - delivery_grace`.
    pub async fn sweep_stuck_deliveries(&self, now: DateTime<Utc>) -> Result<SweepReport, OrderError> {
        let candidates = self
            .service
            .store()
            .find_overdue(OrderStatus::DeliveryInProgress, now - self.policy.delivery_grace)
            .await?;

        let outcomes = join_all(
            candidates
                .into_iter()
                .map(|order| self.service.force(order, OrderCommand::DeliveryTimeout)),
        )
        .await;

        Ok(self.summarize("stuck_delivery", outcomes))
    }

    /// Finish cancellations whose refund claim outlived the recovery grace.
    pub async fn recover_refund_claims(&self, now: DateTime<Utc>) -> Result<SweepReport, OrderError> {
        let candidates = self
            .service
            .store()
            .find_stale_claims(now - self.policy.refund_recovery_grace)
            .await?;

        let outcomes = join_all(
            candidates
                .into_iter()
                .map(|order| self.service.recover_refund(order)),
        )
        .await;

        Ok(self.summarize("refund_recovery", outcomes))
    }

    fn summarize(&self, sweep: &'static str, outcomes: Vec<Result<Order, OrderError>>) -> SweepReport {
        let mut report = SweepReport::default();

        for outcome in &outcomes {
            report.record(outcome);
            if let Err(e) = outcome {
                if !matches!(e, OrderError::OrderStatusError { .. } | OrderError::AlreadyPaid(_)) {
                    tracing::warn!(sweep = sweep, error = %e, "Reconciliation failed for order");
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(sweep, "processed", report.processed);
            metrics.record_sweep(sweep, "skipped", report.skipped);
            metrics.record_sweep(sweep, "failed", report.failed);
        }

        tracing::info!(
            sweep = sweep,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Reconciliation sweep finished"
        );

        report
    }
}
