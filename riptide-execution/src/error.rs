use crate::order::OrderStatus;
use chrono::{DateTime, Utc};
use riptide_instrument::exchange::ExchangeId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an exchange failure, carried on every
/// [`ExchangeError`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeErrorKind {
    Auth,
    RateLimit,
    Network,
    BadSymbol,
    Unknown,
}

/// Typed error reported by an exchange connector.
///
/// `retryable` drives the engine's backoff policy: retryable failures are
/// retried with bounded exponential backoff, non-retryable failures surface
/// as events and pause the affected strategy.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
#[error("{exchange} {kind}: {message}")]
pub struct ExchangeError {
    pub exchange: ExchangeId,
    pub kind: ExchangeErrorKind,
    pub retryable: bool,
    pub message: String,
}

impl ExchangeError {
    pub fn new(
        exchange: ExchangeId,
        kind: ExchangeErrorKind,
        retryable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            kind,
            retryable,
            message: message.into(),
        }
    }

    pub fn auth(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorKind::Auth, false, message)
    }

    pub fn rate_limit(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorKind::RateLimit, true, message)
    }

    pub fn network(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorKind::Network, true, message)
    }

    pub fn bad_symbol(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorKind::BadSymbol, false, message)
    }

    pub fn unknown(exchange: ExchangeId, message: impl Into<String>) -> Self {
        Self::new(exchange, ExchangeErrorKind::Unknown, false, message)
    }
}

/// Rejected [`Order`](crate::order::Order) state transition.
///
/// Every variant is a violation of the order lifecycle invariants; callers
/// decide whether to log-and-skip (stale or duplicate exchange data) or to
/// escalate (local logic bug).
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum OrderError {
    #[error("order is not tracked")]
    Untracked,

    #[error("order is terminal in status {current} - update to {requested} rejected")]
    TerminalStatus {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("update_time {update} is older than current {current} - update rejected")]
    StaleUpdate {
        current: DateTime<Utc>,
        update: DateTime<Utc>,
    },

    #[error("executed quantity {executed} exceeds order quantity {quantity}")]
    ExecutedExceedsQuantity { executed: Decimal, quantity: Decimal },

    #[error("executed quantity decreased from {current} to {update}")]
    ExecutedDecreased { current: Decimal, update: Decimal },

    #[error("status Filled requires executed quantity {executed} to equal order quantity {quantity}")]
    FilledQuantityMismatch { executed: Decimal, quantity: Decimal },
}
