//! Store implementations
//!
//! Strategy and trigger stores come in two flavors: in-memory (tests and the
//! config-file deployment mode) and PostgreSQL (shared durable storage).

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStrategyStore, MemoryTriggerStore};
pub use postgres::{PgStrategyStore, PgTriggerStore};
