use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};
use std::time::Duration;

use crate::domain::order::OrderNotification;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use super::{NotifyError, OrderNotifier};

/// Publishes shop notifications to a Redpanda/Kafka topic, keyed by order id.
pub struct RedpandaNotifier {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
}

impl RedpandaNotifier {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, NotifyError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| NotifyError::Broker(e.to_string()))?;

        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 3,
        };

        Ok(Self {
            producer,
            topic: topic.to_string(),
            circuit_breaker: CircuitBreaker::new(cb_config),
        })
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.get_state().await
    }

    pub fn breaker(&self) -> CircuitBreaker {
        self.circuit_breaker.clone()
    }
}

#[async_trait]
impl OrderNotifier for RedpandaNotifier {
    async fn notify(&self, notification: &OrderNotification) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notification)?;
        let key = notification.order_id().to_string();

        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
                self.producer
                    .send(record, rdkafka::util::Timeout::After(Duration::from_secs(5)))
                    .await
                    .map_err(|(e, _)| NotifyError::Broker(e.to_string()))?;
                Ok::<(), NotifyError>(())
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = %self.topic,
                    key = %key,
                    kind = notification.kind(),
                    "Published order notification"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => Err(NotifyError::CircuitOpen),
            Err(CircuitBreakerError::OperationFailed(e)) => Err(e),
        }
    }
}
