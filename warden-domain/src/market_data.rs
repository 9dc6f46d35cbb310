//! Market Data Types
//!
//! Exchange-agnostic market data shared by the backtester (candles) and the
//! live guard (price ticks).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{DomainError, Price, Symbol};

// =============================================================================
// PriceTick
// =============================================================================

/// Last-trade or mark price observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Trading symbol
    pub symbol: Symbol,
    /// Observed price
    pub price: Price,
    /// Exchange timestamp
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    /// Create a new tick.
    pub fn new(symbol: Symbol, price: Price, timestamp: DateTime<Utc>) -> Self {
        Self { symbol, price, timestamp }
    }
}

// =============================================================================
// Candle
// =============================================================================

/// OHLCV candlestick data.
///
/// # Invariants
/// - `low <= open, close <= high`
/// - `open_time <= close_time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Trading symbol
    pub symbol: Symbol,
    /// Open price
    pub open: Price,
    /// High price
    pub high: Price,
    /// Low price
    pub low: Price,
    /// Close price
    pub close: Price,
    /// Total volume traded
    pub volume: Decimal,
    /// Candle open time
    pub open_time: DateTime<Utc>,
    /// Candle close time
    pub close_time: DateTime<Utc>,
}

impl Candle {
    /// Create a validated candle.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPrice` if OHLC ordering is violated,
    /// `DomainError::InvalidQuantity` for negative volume.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Decimal,
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if low > high || open < low || open > high || close < low || close > high {
            return Err(DomainError::InvalidPrice(format!(
                "Inconsistent OHLC: o={} h={} l={} c={}",
                open, high, low, close
            )));
        }
        if volume < Decimal::ZERO {
            return Err(DomainError::InvalidQuantity(format!(
                "Volume must be >= 0, got {}",
                volume
            )));
        }
        if close_time < open_time {
            return Err(DomainError::InvalidStateTransition(
                "Candle closes before it opens".to_string(),
            ));
        }

        Ok(Self {
            symbol,
            open,
            high,
            low,
            close,
            volume,
            open_time,
            close_time,
        })
    }

    /// True if `price` lies within `[low, high]`
    pub fn touches(&self, price: Price) -> bool {
        self.low <= price && price <= self.high
    }

    /// High-low range as a percentage of the open
    pub fn range_percent(&self) -> Decimal {
        (self.high.as_decimal() - self.low.as_decimal()) / self.open.as_decimal()
            * Decimal::ONE_HUNDRED
    }
}

// =============================================================================
// Tests
// =============================================================================
