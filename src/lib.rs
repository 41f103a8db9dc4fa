// ============================================================================
// order_engine - order lifecycle engine of a food-ordering backend
// ============================================================================
//
// The binary in main.rs wires the scheduler and the operational HTTP
// surface. The services (CartService, OrderService) are the surface an API
// layer calls into.
//
// ============================================================================

pub mod actors;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod messaging;
pub mod metrics;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;
