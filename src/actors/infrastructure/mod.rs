// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// - Reconciliation scheduling
// - Health monitoring
// - Coordination and supervision
//
// ============================================================================

// Private module declarations
mod coordinator;
mod health_monitor;
mod reconciliation;

// Re-export for public API
pub use coordinator::{CoordinatorActor, Shutdown};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
pub use reconciliation::{ReconciliationActor, RunSweep, StopSweeps, SweepKind, SweepSchedule};
