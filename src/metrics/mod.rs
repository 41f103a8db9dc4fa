// Private module declaration
mod server;

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGaugeVec, Opts, Registry,
};

// Re-export for public API
pub use server::{start_metrics_server, ServerState};

// ============================================================================
// Metrics Module - Prometheus metrics for the order engine
// ============================================================================
//
// - Order submissions and committed transitions
// - Commands rejected by the state machine or a lost race
// - Refunds issued and payment gateway latency
// - Reconciliation sweep outcomes
// - Circuit breaker state per external dependency
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    pub orders_submitted: IntCounter,
    pub order_transitions: IntCounterVec,
    pub commands_rejected: IntCounterVec,

    pub refunds_issued: IntCounter,
    pub gateway_call_duration: HistogramVec,

    pub sweep_orders: IntCounterVec,

    pub circuit_breaker_state: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let orders_submitted = IntCounter::new("orders_submitted_total", "Total orders placed")?;
        registry.register(Box::new(orders_submitted.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_transitions_total", "Committed order transitions"),
            &["event_type"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        let commands_rejected = IntCounterVec::new(
            Opts::new("order_commands_rejected_total", "Order commands that were not applied"),
            &["command", "reason"],
        )?;
        registry.register(Box::new(commands_rejected.clone()))?;

        let refunds_issued = IntCounter::new("refunds_issued_total", "Refunds confirmed by the payment gateway")?;
        registry.register(Box::new(refunds_issued.clone()))?;

        let gateway_call_duration = HistogramVec::new(
            HistogramOpts::new("payment_gateway_call_duration_seconds", "Payment gateway call duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(gateway_call_duration.clone()))?;

        let sweep_orders = IntCounterVec::new(
            Opts::new("reconciliation_orders_total", "Orders handled by reconciliation sweeps"),
            &["sweep", "outcome"],
        )?;
        registry.register(Box::new(sweep_orders.clone()))?;

        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new("circuit_breaker_state", "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)"),
            &["dependency"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            orders_submitted,
            order_transitions,
            commands_rejected,
            refunds_issued,
            gateway_call_duration,
            sweep_orders,
            circuit_breaker_state,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_submission(&self) {
        self.orders_submitted.inc();
    }

    pub fn record_transition(&self, event_type: &str) {
        self.order_transitions.with_label_values(&[event_type]).inc();
    }

    pub fn record_rejection(&self, command: &str, reason: &str) {
        self.commands_rejected.with_label_values(&[command, reason]).inc();
    }

    pub fn record_refund(&self) {
        self.refunds_issued.inc();
    }

    pub fn record_gateway_call(&self, operation: &str, duration_secs: f64, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.gateway_call_duration
            .with_label_values(&[operation, outcome])
            .observe(duration_secs);
    }

    pub fn record_sweep(&self, sweep: &str, outcome: &str, count: u64) {
        self.sweep_orders.with_label_values(&[sweep, outcome]).inc_by(count);
    }

    pub fn update_circuit_breaker_state(&self, dependency: &str, state: i64) {
        self.circuit_breaker_state.with_label_values(&[dependency]).set(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(metrics: &Metrics, name: &str) -> f64 {
        let gathered = metrics.registry.gather();
        let family = gathered.iter().find(|m| m.name() == name).unwrap();
        family.metric.iter().map(|m| m.counter.value.unwrap_or(0.0)).sum()
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_submission();
        assert!(!metrics.registry.gather().is_empty());
        assert_eq!(counter_value(&metrics, "orders_submitted_total"), 1.0);
    }

    #[test]
    fn test_record_transitions_by_event_type() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transition("OrderPaid");
        metrics.record_transition("OrderPaid");
        metrics.record_transition("OrderConfirmed");

        let gathered = metrics.registry.gather();
        let family = gathered.iter().find(|m| m.name() == "order_transitions_total").unwrap();
        assert_eq!(family.metric.len(), 2);
        assert_eq!(counter_value(&metrics, "order_transitions_total"), 3.0);
    }

    #[test]
    fn test_record_sweep_counts() {
        let metrics = Metrics::new().unwrap();
        metrics.record_sweep("stale_unpaid", "processed", 4);
        metrics.record_sweep("stale_unpaid", "skipped", 1);
        assert_eq!(counter_value(&metrics, "reconciliation_orders_total"), 5.0);
    }

    #[test]
    fn test_circuit_breaker_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.update_circuit_breaker_state("payment_gateway", 1);

        let gathered = metrics.registry.gather();
        let state = gathered.iter().find(|m| m.name() == "circuit_breaker_state").unwrap();
        assert_eq!(state.metric[0].gauge.value, Some(1.0));
    }
}
