use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, NaiveTime};
use std::str::FromStr;
use std::time::Duration;

use crate::actors::SweepSchedule;
use crate::domain::order::ReconciliationPolicy;

/// Where orders are persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Postgres { url: String, max_connections: u32 },
    /// Non-durable, for local runs and demos.
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub payment_gateway_url: String,
    pub payment_gateway_timeout: Duration,
    pub kafka_brokers: Option<String>,
    pub notification_topic: String,
    pub metrics_port: u16,
    pub schedule: SweepSchedule,
    pub policy: ReconciliationPolicy,
}

impl AppConfig {
    /// Read configuration from the environment, honouring a `.env` file.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let store = match get("ORDER_STORE").as_deref().unwrap_or("postgres") {
            "postgres" => StoreBackend::Postgres {
                url: get("DATABASE_URL").context("DATABASE_URL must be set when ORDER_STORE=postgres")?,
                max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            },
            "memory" => StoreBackend::Memory,
            other => bail!("ORDER_STORE must be 'postgres' or 'memory', got '{other}'"),
        };

        let schedule = SweepSchedule {
            stale_interval: Duration::from_secs(parse_or(&get, "STALE_SWEEP_INTERVAL_SECS", 300)?),
            refund_recovery_interval: Duration::from_secs(parse_or(&get, "REFUND_RECOVERY_INTERVAL_SECS", 300)?),
            delivery_at: parse_time_or(&get, "DELIVERY_SWEEP_AT", "01:00")?,
        };

        let policy = ReconciliationPolicy {
            payment_grace: ChronoDuration::minutes(parse_or(&get, "PAYMENT_GRACE_MINUTES", 15)?),
            delivery_grace: ChronoDuration::minutes(parse_or(&get, "DELIVERY_GRACE_MINUTES", 60)?),
            refund_recovery_grace: ChronoDuration::minutes(parse_or(&get, "REFUND_RECOVERY_GRACE_MINUTES", 10)?),
        };

        Ok(Self {
            store,
            payment_gateway_url: get("PAYMENT_GATEWAY_URL").unwrap_or_else(|| "http://127.0.0.1:8085".to_string()),
            payment_gateway_timeout: Duration::from_secs(parse_or(&get, "PAYMENT_GATEWAY_TIMEOUT_SECS", 10)?),
            kafka_brokers: get("KAFKA_BROKERS"),
            notification_topic: get("NOTIFICATION_TOPIC").unwrap_or_else(|| "order-notifications".to_string()),
            metrics_port: parse_or(&get, "METRICS_PORT", 9090)?,
            schedule,
            policy,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(name) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid {name}: '{value}'")),
        None => Ok(default),
    }
}

fn parse_time_or(get: &impl Fn(&str) -> Option<String>, name: &str, default: &str) -> Result<NaiveTime> {
    let value = get(name).unwrap_or_else(|| default.to_string());
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("invalid {name}: '{value}', expected HH:MM"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("ORDER_STORE", "memory")]).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.schedule.stale_interval, Duration::from_secs(300));
        assert_eq!(config.schedule.delivery_at, NaiveTime::from_hms_opt(1, 0, 0).unwrap());
        assert_eq!(config.policy.payment_grace, ChronoDuration::minutes(15));
        assert_eq!(config.policy.delivery_grace, ChronoDuration::minutes(60));
        assert!(config.kafka_brokers.is_none());
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        let config = config(&[("DATABASE_URL", "postgres://localhost/orders")]).unwrap();
        assert_eq!(
            config.store,
            StoreBackend::Postgres { url: "postgres://localhost/orders".into(), max_connections: 10 }
        );
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = config(&[("ORDER_STORE", "memory"), ("METRICS_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("METRICS_PORT"));

        let err = config(&[("ORDER_STORE", "memory"), ("DELIVERY_SWEEP_AT", "1am")]).unwrap_err();
        assert!(err.to_string().contains("DELIVERY_SWEEP_AT"));

        assert!(config(&[("ORDER_STORE", "redis")]).is_err());
    }
}
