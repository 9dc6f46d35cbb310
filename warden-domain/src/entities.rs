//! Domain Entities for Warden
//!
//! `Position` is the single mutable entity: created from a filled entry,
//! adjusted on every price update, converted into an immutable `Trade` on
//! exit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::math;
use crate::trailing::{is_more_protective, StopAdjustment, TrailingInput};
use crate::value_objects::{DomainError, Leverage, Price, Quantity, Side, Symbol};

// =============================================================================
// Position ID
// =============================================================================

/// Unique identifier for a Position
pub type PositionId = Uuid;

// =============================================================================
// Position
// =============================================================================

/// Parameters for opening a position from a filled entry
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Price,
    pub entry_time: DateTime<Utc>,
    pub size: Quantity,
    pub leverage: Leverage,
    pub stop_loss_price: Price,
    pub take_profit_price: Option<Price>,
    pub entry_fee_rate: Decimal,
    pub exit_fee_rate: Decimal,
}

/// One leveraged exposure under protection
///
/// Invariants:
/// - `stop_loss_price` starts strictly on the adverse side of entry
/// - `take_profit_price`, when set, starts strictly on the favorable side
/// - the stop only ever tightens
/// - `last_trailed_roi` never decreases, `break_even_armed` never disarms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub side: Side,

    // Entry
    pub entry_price: Price,
    pub entry_time: DateTime<Utc>,
    pub size: Quantity,
    pub leverage: Leverage,
    pub margin_used: Decimal,

    // Protection
    pub stop_loss_price: Price,
    pub take_profit_price: Option<Price>,
    pub last_trailed_roi: Decimal,
    pub break_even_armed: bool,

    // Costs
    pub fees_paid: Decimal,
    pub slippage_cost: Decimal,
    pub entry_fee_rate: Decimal,
    pub exit_fee_rate: Decimal,
}

impl Position {
    /// Open a position after its entry filled
    ///
    /// # Errors
    ///
    /// - `DomainError::InvalidStopPlacement` if the stop is not strictly
    ///   adverse or the take-profit is not strictly favorable
    /// - `DomainError::InvalidPercent` if a fee rate is negative
    pub fn open(params: NewPosition) -> Result<Self, DomainError> {
        let NewPosition {
            symbol,
            side,
            entry_price,
            entry_time,
            size,
            leverage,
            stop_loss_price,
            take_profit_price,
            entry_fee_rate,
            exit_fee_rate,
        } = params;

        if !is_more_protective(side, entry_price, stop_loss_price) {
            return Err(DomainError::InvalidStopPlacement(format!(
                "{} stop {} must be on the adverse side of entry {}",
                side, stop_loss_price, entry_price
            )));
        }
        if let Some(target) = take_profit_price {
            if !is_more_protective(side, target, entry_price) {
                return Err(DomainError::InvalidStopPlacement(format!(
                    "{} take-profit {} must be on the favorable side of entry {}",
                    side, target, entry_price
                )));
            }
        }
        if entry_fee_rate < Decimal::ZERO || exit_fee_rate < Decimal::ZERO {
            return Err(DomainError::InvalidPercent("Fee rates must be >= 0".to_string()));
        }

        Ok(Self {
            id: Uuid::now_v7(),
            symbol,
            side,
            entry_price,
            entry_time,
            size,
            leverage,
            margin_used: math::margin_used(size, entry_price, leverage),
            stop_loss_price,
            take_profit_price,
            last_trailed_roi: Decimal::ZERO,
            break_even_armed: false,
            fees_paid: Decimal::ZERO,
            slippage_cost: Decimal::ZERO,
            entry_fee_rate,
            exit_fee_rate,
        })
    }

    /// Leveraged ROI percent at `price`
    pub fn roi_at(&self, price: Price) -> Decimal {
        math::price_to_roi(self.side, self.entry_price, price, self.leverage)
    }

    /// Gross unrealized PnL at `price`
    pub fn unrealized_pnl(&self, price: Price) -> Decimal {
        math::unrealized_pnl(self.side, self.entry_price, price, self.size)
    }

    /// Build the trailing policy input for a mark at `price`
    pub fn trailing_input(&self, price: Price) -> TrailingInput {
        TrailingInput {
            side: self.side,
            entry_price: self.entry_price,
            current_stop: self.stop_loss_price,
            current_roi: self.roi_at(price),
            last_trailed_roi: self.last_trailed_roi,
            leverage: self.leverage,
            entry_fee_rate: self.entry_fee_rate,
            exit_fee_rate: self.exit_fee_rate,
            break_even_armed: self.break_even_armed,
        }
    }

    /// Persist a policy decision on the position
    ///
    /// # Errors
    ///
    /// `DomainError::InvalidStopPlacement` if the adjustment would loosen the
    /// stop; the position is left untouched.
    pub fn apply_adjustment(&mut self, adjustment: &StopAdjustment) -> Result<(), DomainError> {
        if is_more_protective(self.side, self.stop_loss_price, adjustment.new_stop) {
            return Err(DomainError::InvalidStopPlacement(format!(
                "Refusing to loosen {} stop from {} to {}",
                self.side, self.stop_loss_price, adjustment.new_stop
            )));
        }

        self.stop_loss_price = adjustment.new_stop;
        self.last_trailed_roi = self.last_trailed_roi.max(adjustment.last_trailed_roi);
        self.break_even_armed |= adjustment.break_even_armed;
        Ok(())
    }

    /// Accumulate fill costs (fee and adverse slippage)
    pub fn record_costs(&mut self, fee: Decimal, slippage: Decimal) {
        self.fees_paid += fee;
        self.slippage_cost += slippage;
    }

    /// Close the position into an immutable trade record
    ///
    /// Slippage is already reflected in the fill prices, so it is reported
    /// on the trade but not deducted again from net PnL.
    pub fn close(self, exit: TradeExit) -> Trade {
        let gross_pnl = self.unrealized_pnl(exit.price);
        let fees = self.fees_paid + exit.fee;
        let net_pnl = gross_pnl - fees;
        let roi_percent = math::roi_percent(net_pnl, self.margin_used).unwrap_or(Decimal::ZERO);

        Trade {
            position_id: self.id,
            symbol: self.symbol,
            side: self.side,
            size: self.size,
            leverage: self.leverage,
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            exit_price: exit.price,
            exit_time: exit.time,
            gross_pnl,
            net_pnl,
            roi_percent,
            fees,
            slippage: self.slippage_cost + exit.slippage,
            exit_reason: exit.reason,
        }
    }
}

// =============================================================================
// Trade
// =============================================================================

/// Exit fill applied when closing a position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeExit {
    pub price: Price,
    pub time: DateTime<Utc>,
    pub fee: Decimal,
    pub slippage: Decimal,
    pub reason: ExitReason,
}

/// Immutable closed-position record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub side: Side,
    pub size: Quantity,
    pub leverage: Leverage,
    pub entry_price: Price,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Price,
    pub exit_time: DateTime<Utc>,
    pub gross_pnl: Decimal,
    pub net_pnl: Decimal,
    pub roi_percent: Decimal,
    pub fees: Decimal,
    pub slippage: Decimal,
    pub exit_reason: ExitReason,
}

/// Exit reason for position closure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Protective stop was hit
    StopLoss,
    /// Take-profit target reached
    TakeProfit,
    /// Data ran out while the position was open
    BacktestEnd,
    /// Closed unconditionally (operator or emergency)
    Forced,
}

// =============================================================================
// Tests
// =============================================================================
