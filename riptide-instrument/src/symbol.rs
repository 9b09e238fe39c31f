use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Market type of a [`Symbol`], derived from its canonical suffix.
///
/// The derivation in [`Symbol::market_type`] is the only source of truth:
/// no other component stores or infers market type independently.
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
pub enum MarketType {
    Spot,
    Margin,
    Perpetual,
    Future,
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SymbolError {
    #[error("symbol missing '/' separator: {0}")]
    MissingSeparator(String),

    #[error("symbol has empty component: {0}")]
    EmptyComponent(String),
}

/// Canonical internal symbol in the form `BASE/QUOTE[:SETTLE[-EXPIRY]]`.
///
/// Presence of `:SETTLE` denotes a derivative settled in that asset: a
/// perpetual when undated (`BTC/USDT:USDT`), a dated future when an expiry
/// is appended (`BTC/USDT:USDT-240628`). Exchange specific spellings are
/// produced by [`ExchangeId::encode_symbol`](crate::exchange::ExchangeId),
/// never stored here.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(try_from = "SmolStr", into = "SmolStr")]
pub struct Symbol {
    base: SmolStr,
    quote: SmolStr,
    settle: Option<SmolStr>,
    expiry: Option<SmolStr>,
}

impl Symbol {
    /// Construct a spot `Symbol`.
    pub fn spot(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().to_uppercase().to_smolstr(),
            quote: quote.as_ref().to_uppercase().to_smolstr(),
            settle: None,
            expiry: None,
        }
    }

    /// Construct a perpetual `Symbol` settled in the provided asset.
    pub fn perpetual(
        base: impl AsRef<str>,
        quote: impl AsRef<str>,
        settle: impl AsRef<str>,
    ) -> Self {
        Self {
            base: base.as_ref().to_uppercase().to_smolstr(),
            quote: quote.as_ref().to_uppercase().to_smolstr(),
            settle: Some(settle.as_ref().to_uppercase().to_smolstr()),
            expiry: None,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    pub fn settle(&self) -> Option<&str> {
        self.settle.as_deref()
    }

    pub fn is_perpetual(&self) -> bool {
        self.settle.is_some() && self.expiry.is_none()
    }

    /// Derive the [`MarketType`] from the canonical suffix.
    pub fn market_type(&self) -> MarketType {
        match (&self.settle, &self.expiry) {
            (None, _) => MarketType::Spot,
            (Some(_), None) => MarketType::Perpetual,
            (Some(_), Some(_)) => MarketType::Future,
        }
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (pair, derivative) = match input.split_once(':') {
            Some((pair, suffix)) => (pair, Some(suffix)),
            None => (input, None),
        };

        let (base, quote) = pair
            .split_once('/')
            .ok_or_else(|| SymbolError::MissingSeparator(input.to_string()))?;

        let (settle, expiry) = match derivative {
            Some(suffix) => match suffix.split_once('-') {
                Some((settle, expiry)) => (Some(settle), Some(expiry)),
                None => (Some(suffix), None),
            },
            None => (None, None),
        };

        if base.is_empty()
            || quote.is_empty()
            || settle.is_some_and(str::is_empty)
            || expiry.is_some_and(str::is_empty)
        {
            return Err(SymbolError::EmptyComponent(input.to_string()));
        }

        Ok(Self {
            base: base.to_uppercase().to_smolstr(),
            quote: quote.to_uppercase().to_smolstr(),
            settle: settle.map(|settle| settle.to_uppercase().to_smolstr()),
            expiry: expiry.map(|expiry| expiry.to_smolstr()),
        })
    }
}

impl TryFrom<SmolStr> for Symbol {
    type Error = SymbolError;

    fn try_from(value: SmolStr) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for SmolStr {
    fn from(value: Symbol) -> Self {
        value.to_smolstr()
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)?;
        if let Some(settle) = &self.settle {
            write!(f, ":{settle}")?;
        }
        if let Some(expiry) = &self.expiry {
            write!(f, "-{expiry}")?;
        }
        Ok(())
    }
}
