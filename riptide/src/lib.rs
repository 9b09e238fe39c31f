#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms,
    rust_2024_compatibility
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Riptide
//! Trading core of a multi-exchange cryptocurrency trading platform:
//! * **Event Bus** - single process-wide fan-out of typed domain events,
//!   passed explicitly to every component.
//! * **Order Manager** - indexed in-memory order set driving a
//!   terminal-absorbing status state machine, write-through persisted.
//! * **Order Sync Service** - periodic exchange reconciliation covering
//!   push-update loss, funnelled through the same duplicate-suppression gate
//!   as the streaming path.
//! * **Strategy Runtime** - parallel across strategies, serial per strategy,
//!   with durable snapshots and crash recovery.
//! * **Account Polling Service** - periodic balance/position snapshots and
//!   PnL derivation.

/// Account polling service.
pub mod account;

/// Typed event bus and the order-status suppression gate.
pub mod bus;

/// Process-wide engine configuration.
pub mod config;

/// Engine wiring and lifecycle.
pub mod engine;

/// Engine error taxonomy.
pub mod error;

/// Logging initialisation.
pub mod logging;

/// Order manager: indexed order set and lifecycle transitions.
pub mod orders;

/// Cooperative shutdown signalling.
pub mod shutdown;

/// Strategy state snapshots, persistence and crash recovery.
pub mod state;

/// Persistence store interfaces and implementations.
pub mod store;

/// Strategy contract, runtime and reference strategies.
pub mod strategy;

/// Order sync (exchange reconciliation) service.
pub mod sync;
