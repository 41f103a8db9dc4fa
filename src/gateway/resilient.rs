use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use super::{GatewayError, PaymentGateway, PrepayRequest, PrepayResponse, RefundReceipt, RefundRequest};

const DEPENDENCY: &str = "payment_gateway";

/// Wraps a gateway with a call timeout, a circuit breaker and latency metrics.
///
/// A `Rejected` answer means the provider is healthy and said no, so it does
/// not count towards opening the breaker.
pub struct ResilientGateway<G> {
    inner: G,
    breaker: CircuitBreaker,
    call_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl<G: PaymentGateway> ResilientGateway<G> {
    pub fn new(inner: G, call_timeout: Duration, breaker: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(breaker),
            call_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.get_state().await
    }

    /// Shared handle on the breaker, for health probes.
    pub fn breaker(&self) -> CircuitBreaker {
        self.breaker.clone()
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let started = Instant::now();
        let timeout = self.call_timeout;

        // Outer error trips the breaker; inner error is a healthy refusal.
        let outcome = self
            .breaker
            .call(async move {
                match tokio::time::timeout(timeout, call).await {
                    Err(_) => Err(GatewayError::Timeout),
                    Ok(Err(rejected @ GatewayError::Rejected { .. })) => Ok(Err(rejected)),
                    Ok(Err(e)) => Err(e),
                    Ok(Ok(value)) => Ok(Ok(value)),
                }
            })
            .await;

        let result = match outcome {
            Ok(inner) => inner,
            Err(CircuitBreakerError::CircuitOpen) => Err(GatewayError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_gateway_call(operation, started.elapsed().as_secs_f64(), result.is_ok());
            metrics.update_circuit_breaker_state(DEPENDENCY, self.breaker.get_state().await.code());
        }

        if let Err(e) = &result {
            tracing::warn!(operation = operation, error = %e, "Payment gateway call failed");
        }

        result
    }
}

#[async_trait]
impl<G: PaymentGateway> PaymentGateway for ResilientGateway<G> {
    async fn create_prepay(&self, request: &PrepayRequest) -> Result<PrepayResponse, GatewayError> {
        self.guarded("prepay", self.inner.create_prepay(request)).await
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError> {
        self.guarded("refund", self.inner.refund(request)).await
    }
}
