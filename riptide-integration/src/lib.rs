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

//! # Riptide-Integration
//! Low-level building blocks shared by the Riptide trading core: typed
//! channel transmitters, state snapshots, bounded collections, retry
//! backoff, and explicit decimal rounding. Nothing in this crate knows about
//! exchanges, orders or strategies.

/// Typed channel transmitter / receiver abstractions.
pub mod channel;

/// Bounded collections, eg/ the [`FixedWindow`](collection::FixedWindow)
/// FIFO used for indicator history and recent-trade buffers.
pub mod collection;

/// Bounded exponential backoff with full jitter.
pub mod backoff;

/// Explicit decimal rounding helpers - rounding on the trading path is
/// always per-operation, never implicit.
pub mod decimal;

/// `Snapshot` new type marking a state-replacing value.
pub mod snapshot;
