//! Core engine for the escrow broker system.
//!
//! This crate owns the order lifecycle: the state machine guarding status
//! transitions, the order operations that couple transitions to escrow
//! movements, the background sweeper that reminds about and expires stale
//! pending orders, and the engine that wires every service together from
//! configuration.

/// Engine assembly, builder and event bus.
pub mod engine;
/// Order lifecycle operations.
pub mod orders;
/// Order state machine and transition table.
pub mod state;
/// Background sweeper for stale pending orders.
pub mod sweeper;

pub use engine::event_bus::EventBus;
pub use engine::{BrokerBuilder, BrokerEngine, EngineError};
pub use orders::{OrderError, OrderService};
pub use state::{OrderStateError, OrderStateMachine};
pub use sweeper::{SweepStats, Sweeper};
