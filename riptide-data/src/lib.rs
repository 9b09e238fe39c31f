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

//! # Riptide-Data
//! Normalised market data for the Riptide trading core: typed ticker, L2
//! order book, public trade and kline events, plus the reference-counted
//! [`SubscriptionManager`](subscription::manager::SubscriptionManager) that
//! coalesces overlapping strategy subscriptions over a websocket-preferred,
//! REST-fallback upstream.

use riptide_instrument::exchange::ExchangeId;
use thiserror::Error;

/// Normalised [`MarketEvent`](event::MarketEvent) and payload kinds.
pub mod event;

/// L2 order book containers.
pub mod books;

/// Subscription keys, payload types, and the reference-counted manager.
pub mod subscription;

/// Venue wire codecs. Binance is the reference implementation.
pub mod exchange;

/// Errors produced while sourcing market data.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("upstream for {exchange} unavailable: {message}")]
    Upstream { exchange: ExchangeId, message: String },

    #[error("subscription not supported by {exchange}: {message}")]
    Unsupported { exchange: ExchangeId, message: String },

    #[error("invalid market data payload: {0}")]
    InvalidPayload(String),

    #[error("subscription channel closed")]
    ChannelClosed,
}
