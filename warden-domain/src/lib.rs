//! Warden Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains value objects, precision math, the trailing stop policy and
//! position entities shared by the backtester and the live guard.

#![warn(clippy::all)]

// Public modules
pub mod entities;
pub mod market_data;
pub mod math;
pub mod trailing;
pub mod value_objects;

// Re-export commonly used types
pub use entities::{ExitReason, NewPosition, Position, PositionId, Trade, TradeExit};
pub use market_data::{Candle, PriceTick};
pub use trailing::{
    evaluate_stop, is_stop_hit, is_take_profit_hit, StopAdjustment, StopAdjustmentReason,
    TrailingConfig, TrailingInput,
};
pub use value_objects::{DomainError, Leverage, OrderSide, Price, Quantity, Side, Symbol};
