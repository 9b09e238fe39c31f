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

//! # Riptide-Instrument
//! Core exchange, symbol and market data structures shared by every Riptide
//! crate. Symbols use the canonical internal form `BASE/QUOTE[:SETTLE]`;
//! exchange specific encodings are produced by pure normalisers so the rest
//! of the system never handles venue spellings directly.

use serde::{Deserialize, Serialize};

/// Exchange identifiers and venue symbol normalisers.
pub mod exchange;

/// Canonical `Symbol` and `MarketType` derivation.
pub mod symbol;

/// `Side` of a trade or order.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
}

impl Side {
    /// Opposite `Side`.
    pub fn inverse(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign convention used for position arithmetic: `Buy` is `1`,
    /// `Sell` is `-1`.
    pub fn sign(self) -> i8 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}
