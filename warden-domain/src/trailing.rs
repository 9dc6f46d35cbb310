//! Trailing Stop Policy (Pure Functions)
//!
//! Decides where the protective stop should sit after a price update.
//! All functions are deterministic and have no side effects; the backtester
//! and the live guard call the same code.
//!
//! # Staircase Trailing
//!
//! The stop moves in discrete steps keyed on ROI, not on raw price:
//! - every `step_percent` of ROI gained since the last trail moves the stop
//!   `move_percent` percent of its price in the protective direction
//! - nothing trails until ROI reaches `activation_roi`
//!
//! # Break-even
//!
//! Once ROI crosses the fee-adjusted break-even threshold the stop is pulled
//! to entry (unless trailing already placed it better) and a one-way latch
//! is armed so this happens at most once per position.
//!
//! Key invariants:
//! - The returned stop is never less protective than the input stop
//! - `last_trailed_roi` never decreases
//! - `break_even_armed` never goes from true to false

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::math::{fee_adjusted_break_even, trailed_stop_loss, trailing_steps};
use crate::value_objects::{DomainError, Leverage, Price, Side};

// =============================================================================
// Configuration
// =============================================================================

/// Trailing and break-even parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingConfig {
    /// ROI percent gained per trailing step
    pub step_percent: Decimal,
    /// Stop movement per step, percent of the stop price
    pub move_percent: Decimal,
    /// Extra price-move fraction required on top of fees before break-even
    pub break_even_buffer: Decimal,
    /// ROI percent below which staircase trailing is inactive
    pub activation_roi: Decimal,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            step_percent: dec!(8),
            move_percent: dec!(0.05),
            break_even_buffer: dec!(0.0005),
            activation_roi: dec!(10),
        }
    }
}

impl TrailingConfig {
    /// Reject configurations the math layer cannot evaluate
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.step_percent <= Decimal::ZERO {
            return Err(DomainError::InvalidPercent(format!(
                "step_percent must be > 0, got {}",
                self.step_percent
            )));
        }
        if self.move_percent < Decimal::ZERO || self.break_even_buffer < Decimal::ZERO {
            return Err(DomainError::InvalidPercent(
                "move_percent and break_even_buffer must be >= 0".to_string(),
            ));
        }
        if self.activation_roi < Decimal::ZERO {
            return Err(DomainError::InvalidPercent(format!(
                "activation_roi must be >= 0, got {}",
                self.activation_roi
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Input / Output
// =============================================================================

/// Snapshot of a position as seen by the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingInput {
    pub side: Side,
    pub entry_price: Price,
    pub current_stop: Price,
    pub current_roi: Decimal,
    pub last_trailed_roi: Decimal,
    pub leverage: Leverage,
    pub entry_fee_rate: Decimal,
    pub exit_fee_rate: Decimal,
    pub break_even_armed: bool,
}

/// Why the stop moved (or didn't)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopAdjustmentReason {
    NoChange,
    Trailed,
    BreakEven,
}

/// Result of evaluating the policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopAdjustment {
    pub new_stop: Price,
    pub reason: StopAdjustmentReason,
    pub last_trailed_roi: Decimal,
    pub break_even_armed: bool,
}

impl StopAdjustment {
    /// True when the stop price differs from the input
    pub fn moved(&self) -> bool {
        self.reason != StopAdjustmentReason::NoChange
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Evaluate trailing and break-even for one price update.
///
/// ```
/// # use warden_domain::trailing::{evaluate_stop, StopAdjustmentReason, TrailingConfig, TrailingInput};
/// # use warden_domain::value_objects::{Leverage, Price, Side};
/// # use rust_decimal_macros::dec;
/// let config = TrailingConfig {
///     step_percent: dec!(8),
///     move_percent: dec!(0.1),
///     break_even_buffer: dec!(0),
///     activation_roi: dec!(10),
/// };
/// let input = TrailingInput {
///     side: Side::Long,
///     entry_price: Price::new(dec!(2000)).unwrap(),
///     current_stop: Price::new(dec!(1998.2)).unwrap(),
///     current_roi: dec!(5),
///     last_trailed_roi: dec!(0),
///     leverage: Leverage::from_u32(100).unwrap(),
///     entry_fee_rate: dec!(0.0006),
///     exit_fee_rate: dec!(0.0006),
///     break_even_armed: false,
/// };
///
/// // Below activation and below the 12% break-even threshold
/// let adjustment = evaluate_stop(&input, &config).unwrap();
/// assert_eq!(adjustment.reason, StopAdjustmentReason::NoChange);
/// assert_eq!(adjustment.new_stop, input.current_stop);
/// ```
///
/// # Errors
///
/// Propagates `DomainError` from invalid configuration or fee rates.
pub fn evaluate_stop(
    input: &TrailingInput,
    config: &TrailingConfig,
) -> Result<StopAdjustment, DomainError> {
    config.validate()?;

    let mut new_stop = input.current_stop;
    let mut reason = StopAdjustmentReason::NoChange;
    let mut last_trailed_roi = input.last_trailed_roi;
    let mut break_even_armed = input.break_even_armed;

    // 1. Staircase trailing
    if input.current_roi >= config.activation_roi {
        let steps = trailing_steps(input.current_roi, last_trailed_roi, config.step_percent)?;
        if steps > 0 {
            let candidate =
                trailed_stop_loss(input.side, input.current_stop, steps, config.move_percent)?;
            if is_more_protective(input.side, candidate, new_stop) {
                new_stop = candidate;
                reason = StopAdjustmentReason::Trailed;
            }
            last_trailed_roi += Decimal::from(steps) * config.step_percent;
        }
    }

    // 2. Break-even latch
    if !break_even_armed {
        let threshold = fee_adjusted_break_even(
            input.entry_fee_rate,
            input.exit_fee_rate,
            input.leverage,
            config.break_even_buffer,
        )?;
        if input.current_roi >= threshold {
            if is_more_protective(input.side, input.entry_price, new_stop) {
                new_stop = input.entry_price;
                reason = StopAdjustmentReason::BreakEven;
            }
            break_even_armed = true;
        }
    }

    Ok(StopAdjustment {
        new_stop,
        reason,
        last_trailed_roi,
        break_even_armed,
    })
}

/// True when `candidate` is strictly tighter than `current` for this side
/// (higher for longs, lower for shorts).
pub fn is_more_protective(side: Side, candidate: Price, current: Price) -> bool {
    match side {
        Side::Long => candidate > current,
        Side::Short => candidate < current,
    }
}

/// Check if the stop is hit (should exit)
///
/// # Examples
///
/// ```
/// # use warden_domain::trailing::is_stop_hit;
/// # use warden_domain::value_objects::{Price, Side};
/// # use rust_decimal_macros::dec;
/// let stop = Price::new(dec!(95000)).unwrap();
///
/// // LONG: exit when price drops TO or BELOW stop
/// assert!(is_stop_hit(Side::Long, Price::new(dec!(95000)).unwrap(), stop));
/// assert!(!is_stop_hit(Side::Long, Price::new(dec!(95100)).unwrap(), stop));
///
/// // SHORT: exit when price rises TO or ABOVE stop
/// assert!(is_stop_hit(Side::Short, Price::new(dec!(95100)).unwrap(), stop));
/// assert!(!is_stop_hit(Side::Short, Price::new(dec!(94900)).unwrap(), stop));
/// ```
pub fn is_stop_hit(side: Side, current_price: Price, stop: Price) -> bool {
    match side {
        Side::Long => current_price <= stop,
        Side::Short => current_price >= stop,
    }
}

/// Check if the take-profit is reached
pub fn is_take_profit_hit(side: Side, current_price: Price, take_profit: Price) -> bool {
    match side {
        Side::Long => current_price >= take_profit,
        Side::Short => current_price <= take_profit,
    }
}

// =============================================================================
// Tests
// =============================================================================
