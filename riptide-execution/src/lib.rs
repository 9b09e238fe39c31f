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

//! # Riptide-Execution
//! Normalised order, balance and position models for the Riptide trading
//! core, the [`ExchangeConnector`](client::ExchangeConnector) interface every
//! venue adapter implements, a scriptable mock connector for tests and paper
//! trading, and the Binance reference adapter.

use crate::{balance::AssetBalance, position::Position};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use riptide_instrument::exchange::ExchangeId;
use serde::{Deserialize, Serialize};

/// Asset balances.
pub mod balance;

/// Exchange connector interface and shipped adapters.
pub mod client;

/// Typed exchange and order errors.
pub mod error;

/// `Order` record, identifiers, status state machine and intents.
pub mod order;

/// Signed-quantity positions.
pub mod position;

/// Order fills.
pub mod trade;

/// Point-in-time capture of an exchange account: balances and positions.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AccountSnapshot {
    pub exchange: ExchangeId,
    pub balances: Vec<AssetBalance>,
    pub positions: Vec<Position>,
    pub time: DateTime<Utc>,
}
