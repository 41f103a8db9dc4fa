// ============================================================================
// Actors Module
// ============================================================================
//
// Structure:
// - core/           - Health types shared by actors and the HTTP server
// - infrastructure/ - Concrete actors (Coordinator, Reconciliation, Health)
//
// Note: Order transitions go through OrderService, NOT actors. Actors only
//       schedule the reconciliation sweeps and track health.
//
// ============================================================================

// Private module declarations
mod core;
mod infrastructure;

pub use core::ComponentReport;
pub use infrastructure::{
    CoordinatorActor, GetSystemHealth, HealthMonitorActor, Shutdown, SweepSchedule, SystemHealth,
};
