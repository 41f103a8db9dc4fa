// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The order aggregate lives in its own subdirectory. The cart only collects
// entries until submission and is a thin service over the order store.
//
// ============================================================================

pub mod order;
pub mod cart;
