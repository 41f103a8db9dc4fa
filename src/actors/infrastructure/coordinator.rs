use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::HealthStatus;
use crate::domain::order::Reconciler;
use super::{
    GetSystemHealth, HealthMonitorActor, ReconciliationActor, RunSweep, StopSweeps, SweepKind, SweepSchedule,
    UpdateHealth,
};

// ============================================================================
// Coordinator Actor - Orchestrates all system actors
// ============================================================================
//
// Actor Hierarchy:
//   CoordinatorActor (Supervisor)
//   ├── ReconciliationActor
//   └── HealthMonitorActor (shared with the HTTP server)
//
// ============================================================================

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub struct CoordinatorActor {
    reconciler: Arc<Reconciler>,
    schedule: SweepSchedule,
    health_monitor: Addr<HealthMonitorActor>,
    reconciliation: Option<Addr<ReconciliationActor>>,
}

impl CoordinatorActor {
    pub fn new(
        reconciler: Arc<Reconciler>,
        schedule: SweepSchedule,
        health_monitor: Addr<HealthMonitorActor>,
    ) -> Self {
        Self {
            reconciler,
            schedule,
            health_monitor,
            reconciliation: None,
        }
    }

    fn start_child_actors(&mut self) {
        tracing::info!("Starting supervised child actors");

        let reconciliation = ReconciliationActor::new(self.reconciler.clone(), self.schedule)
            .with_health_monitor(self.health_monitor.clone())
            .start();

        // Claims left by a previous process are finished right away.
        reconciliation.do_send(RunSweep(SweepKind::RefundRecovery));
        reconciliation.do_send(RunSweep(SweepKind::StaleUnpaid));
        self.reconciliation = Some(reconciliation);

        self.health_monitor.do_send(UpdateHealth {
            component: "reconciliation".to_string(),
            status: HealthStatus::Healthy,
            details: Some("Reconciliation actor started".to_string()),
        });

        tracing::info!("All supervised actors started");
    }
}

impl Actor for CoordinatorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("CoordinatorActor started");
        self.start_child_actors();

        ctx.run_interval(HEALTH_LOG_INTERVAL, |act, _ctx| {
            let health_monitor = act.health_monitor.clone();
            actix::spawn(async move {
                match health_monitor.send(GetSystemHealth).await {
                    Ok(health) => match health.overall_status {
                        HealthStatus::Healthy => {
                            tracing::debug!("System health check: Healthy");
                        }
                        HealthStatus::Degraded(ref msg) => {
                            tracing::warn!("System health check: Degraded - {}", msg);
                        }
                        HealthStatus::Unhealthy(ref msg) => {
                            tracing::error!("System health check: Unhealthy - {}", msg);
                        }
                    },
                    Err(e) => {
                        tracing::error!("Failed to get system health: {}", e);
                    }
                }
            });
        });
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        tracing::info!("CoordinatorActor stopping - initiating graceful shutdown");
        Running::Stop
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        tracing::info!("CoordinatorActor stopped");
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown;

impl Handler<Shutdown> for CoordinatorActor {
    type Result = ();

    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) {
        tracing::info!("Received shutdown signal");

        if let Some(reconciliation) = self.reconciliation.take() {
            reconciliation.do_send(StopSweeps);
        }

        ctx.stop();
    }
}
