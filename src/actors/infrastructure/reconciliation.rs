use actix::prelude::*;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::HealthStatus;
use crate::domain::order::{OrderError, Reconciler, SweepReport};
use super::health_monitor::{HealthMonitorActor, UpdateHealth};

// ============================================================================
// Reconciliation Actor - runs the timeout sweeps on a schedule
// ============================================================================
//
// - stale unpaid sweep and refund recovery: fixed interval
// - stuck delivery sweep: once a day at a fixed UTC time, re-armed each run
//
// A sweep still running when its next tick fires is not started twice.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepKind {
    StaleUnpaid,
    StuckDelivery,
    RefundRecovery,
}

impl SweepKind {
    pub fn name(self) -> &'static str {
        match self {
            SweepKind::StaleUnpaid => "stale_unpaid",
            SweepKind::StuckDelivery => "stuck_delivery",
            SweepKind::RefundRecovery => "refund_recovery",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepSchedule {
    pub stale_interval: Duration,
    pub refund_recovery_interval: Duration,
    pub delivery_at: NaiveTime,
}

/// Time from `now` until the next occurrence of `at` (UTC).
pub fn until_next(at: NaiveTime, now: DateTime<Utc>) -> Duration {
    let today = now.date_naive().and_time(at).and_utc();
    let next = if today > now { today } else { today + ChronoDuration::days(1) };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

// ============================================================================
// Messages
// ============================================================================

/// Run one sweep now, outside its schedule.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RunSweep(pub SweepKind);

#[derive(Message)]
#[rtype(result = "()")]
pub struct StopSweeps;

// ============================================================================
// Reconciliation Actor
// ============================================================================

pub struct ReconciliationActor {
    reconciler: Arc<Reconciler>,
    schedule: SweepSchedule,
    health_monitor: Option<Addr<HealthMonitorActor>>,
    in_flight: HashSet<SweepKind>,
}

impl ReconciliationActor {
    pub fn new(reconciler: Arc<Reconciler>, schedule: SweepSchedule) -> Self {
        Self {
            reconciler,
            schedule,
            health_monitor: None,
            in_flight: HashSet::new(),
        }
    }

    pub fn with_health_monitor(mut self, health_monitor: Addr<HealthMonitorActor>) -> Self {
        self.health_monitor = Some(health_monitor);
        self
    }

    fn run_sweep(&mut self, kind: SweepKind, ctx: &mut Context<Self>) {
        if !self.in_flight.insert(kind) {
            tracing::debug!(sweep = kind.name(), "Previous sweep still running, skipping tick");
            return;
        }

        let reconciler = self.reconciler.clone();
        let sweep = async move {
            let now = Utc::now();
            match kind {
                SweepKind::StaleUnpaid => reconciler.sweep_stale_unpaid(now).await,
                SweepKind::StuckDelivery => reconciler.sweep_stuck_deliveries(now).await,
                SweepKind::RefundRecovery => reconciler.recover_refund_claims(now).await,
            }
        };

        ctx.spawn(sweep.into_actor(self).map(move |result, act, _ctx| {
            act.in_flight.remove(&kind);
            act.report(kind, result);
        }));
    }

    fn report(&self, kind: SweepKind, result: Result<SweepReport, OrderError>) {
        let status = match &result {
            Ok(report) if report.failed == 0 => HealthStatus::Healthy,
            Ok(report) => HealthStatus::Degraded(format!("{} orders failed", report.failed)),
            Err(e) => {
                tracing::error!(sweep = kind.name(), error = %e, "Reconciliation sweep could not run");
                HealthStatus::Unhealthy(e.to_string())
            }
        };

        if let Some(monitor) = &self.health_monitor {
            monitor.do_send(UpdateHealth {
                component: format!("sweep_{}", kind.name()),
                status,
                details: None,
            });
        }
    }

    fn schedule_delivery_sweep(&self, ctx: &mut Context<Self>) {
        let delay = until_next(self.schedule.delivery_at, Utc::now());
        tracing::debug!(in_secs = delay.as_secs(), "Next stuck delivery sweep scheduled");

        ctx.run_later(delay, |act, ctx| {
            act.run_sweep(SweepKind::StuckDelivery, ctx);
            act.schedule_delivery_sweep(ctx);
        });
    }
}

impl Actor for ReconciliationActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            stale_interval_secs = self.schedule.stale_interval.as_secs(),
            refund_recovery_interval_secs = self.schedule.refund_recovery_interval.as_secs(),
            delivery_at = %self.schedule.delivery_at,
            "ReconciliationActor started"
        );

        ctx.run_interval(self.schedule.stale_interval, |act, ctx| {
            act.run_sweep(SweepKind::StaleUnpaid, ctx);
        });
        ctx.run_interval(self.schedule.refund_recovery_interval, |act, ctx| {
            act.run_sweep(SweepKind::RefundRecovery, ctx);
        });
        self.schedule_delivery_sweep(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("ReconciliationActor stopped");
    }
}

impl Handler<RunSweep> for ReconciliationActor {
    type Result = ();

    fn handle(&mut self, msg: RunSweep, ctx: &mut Self::Context) {
        self.run_sweep(msg.0, ctx);
    }
}

impl Handler<StopSweeps> for ReconciliationActor {
    type Result = ();

    fn handle(&mut self, _: StopSweeps, ctx: &mut Self::Context) {
        tracing::info!("ReconciliationActor received stop signal");
        ctx.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::infrastructure::GetSystemHealth;
    use crate::domain::order::*;
    use crate::domain::order::Actor;
    use actix::Actor as _;
    use crate::store::{InMemoryOrderStore, OrderStore};
    use crate::testing::{RecordingGateway, RecordingNotifier};
    use chrono::TimeZone;

    #[test]
    fn test_until_next_same_day_and_rollover() {
        let at = NaiveTime::from_hms_opt(1, 0, 0).unwrap();

        let before = Utc.with_ymd_and_hms(2024, 5, 1, 0, 30, 0).unwrap();
        assert_eq!(until_next(at, before), Duration::from_secs(30 * 60));

        let after = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        assert_eq!(until_next(at, after), Duration::from_secs(24 * 3600));
    }

    #[actix::test]
    async fn test_run_sweep_message_cancels_stale_order() {
        let store = Arc::new(InMemoryOrderStore::new());
        let placed_at = Utc::now() - ChronoDuration::minutes(30);
        let order = store
            .create_order(
                NewOrder {
                    number: OrderNumber("1".into()),
                    user_id: UserId(1),
                    amount: 100,
                    consignee: "Li".into(),
                    phone: "138".into(),
                    address: AddressSnapshot {
                        province: "P".into(),
                        city: "C".into(),
                        district: "D".into(),
                        detail: "X".into(),
                        label: None,
                    },
                    order_time: placed_at,
                },
                &[],
                Stamp::insert(Actor::User(UserId(1)), placed_at),
            )
            .await
            .unwrap();

        let service = Arc::new(OrderService::new(
            store.clone(),
            Arc::new(RecordingGateway::new()),
            Arc::new(RecordingNotifier::new()),
        ));
        let reconciler = Arc::new(Reconciler::new(service, ReconciliationPolicy::default()));
        let monitor = HealthMonitorActor::new().start();
        let schedule = SweepSchedule {
            stale_interval: Duration::from_secs(3600),
            refund_recovery_interval: Duration::from_secs(3600),
            delivery_at: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
        };
        let actor = ReconciliationActor::new(reconciler, schedule)
            .with_health_monitor(monitor.clone())
            .start();

        actor.send(RunSweep(SweepKind::StaleUnpaid)).await.unwrap();
        for _ in 0..50 {
            if store.find_order(order.id).await.unwrap().unwrap().status == OrderStatus::Cancelled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            store.find_order(order.id).await.unwrap().unwrap().status,
            OrderStatus::Cancelled
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        let health = monitor.send(GetSystemHealth).await.unwrap();
        assert!(health.components.contains_key("sweep_stale_unpaid"));
    }
}
