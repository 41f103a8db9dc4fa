// ============================================================================
// Order Domain - the order lifecycle engine
// ============================================================================
//
// - Value objects (identities, statuses, cart entries, order lines)
// - Events and commands of the state machine
// - Errors (OrderError)
// - Aggregate (Order, the transition table)
// - Command handler (OrderService: store + gateway orchestration)
// - Reconciliation sweeps and dashboard statistics
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;
pub mod reconciliation;
pub mod statistics;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
pub use reconciliation::*;
pub use statistics::*;
