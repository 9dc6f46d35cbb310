//! Precision math for leveraged positions (pure functions)
//!
//! Every leverage-sensitive number (margin, notional, ROI, stop/target and
//! liquidation prices, trailing steps, fee-adjusted break-even) is computed
//! here with `Decimal`. Binary floats never enter these calculations.
//!
//! # Conventions
//!
//! - ROI is a percentage of margin, not notional: a 1% price move at 10x is
//!   10% ROI.
//! - Fee rates are fractions of notional (`0.0006` = 0.06%).
//! - Functions return `DomainError` for inputs outside their documented
//!   domain. There are no silent defaults.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::value_objects::{DomainError, Leverage, Price, Quantity, Side};

// =============================================================================
// ROI <-> Price
// =============================================================================

/// Convert an ROI percentage (on margin) into a price level.
///
/// Positive ROI raises the price for longs and lowers it for shorts.
///
/// ```text
/// price = entry × (1 ± roi / leverage / 100)
/// ```
///
/// # Errors
///
/// `DomainError::OutOfDomain` if the resulting price is not positive.
pub fn roi_to_price(
    side: Side,
    entry: Price,
    roi_percent: Decimal,
    leverage: Leverage,
) -> Result<Price, DomainError> {
    let ratio = roi_percent / leverage.as_decimal() / Decimal::ONE_HUNDRED;
    let price = entry.as_decimal() * (Decimal::ONE + side.direction() * ratio);

    Price::new(price).map_err(|_| {
        DomainError::OutOfDomain(format!(
            "{}% ROI at {} from entry {} gives non-positive price {}",
            roi_percent, leverage, entry, price
        ))
    })
}

/// Convert a price movement into ROI percent on margin.
///
/// ```
/// # use warden_domain::math::price_to_roi;
/// # use warden_domain::value_objects::{Leverage, Price, Side};
/// # use rust_decimal_macros::dec;
/// let entry = Price::new(dec!(2000)).unwrap();
/// let current = Price::new(dec!(2010)).unwrap();
/// let leverage = Leverage::from_u32(100).unwrap();
///
/// // 0.5% move at 100x = 50% ROI
/// assert_eq!(price_to_roi(Side::Long, entry, current, leverage), dec!(50));
/// assert_eq!(price_to_roi(Side::Short, entry, current, leverage), dec!(-50));
/// ```
pub fn price_to_roi(side: Side, entry: Price, current: Price, leverage: Leverage) -> Decimal {
    let change = (current.as_decimal() - entry.as_decimal()) / entry.as_decimal();
    change * Decimal::ONE_HUNDRED * leverage.as_decimal() * side.direction()
}

// =============================================================================
// Stop-loss / Take-profit / Liquidation
// =============================================================================

/// Price at which realized ROI equals `-roi_risk`.
///
/// Always strictly below entry for longs and strictly above entry for shorts.
///
/// # Errors
///
/// - `DomainError::InvalidPercent` if `roi_risk <= 0`
/// - `DomainError::OutOfDomain` if the stop would be at or below zero
///   (long with `roi_risk >= 100 × leverage`)
pub fn stop_loss_price(
    side: Side,
    entry: Price,
    roi_risk: Decimal,
    leverage: Leverage,
) -> Result<Price, DomainError> {
    ensure_positive("roi_risk", roi_risk)?;
    roi_to_price(side, entry, -roi_risk, leverage)
}

/// Price at which realized ROI equals `+roi_reward`.
///
/// Mirror of [`stop_loss_price`]: above entry for longs, below for shorts.
///
/// # Errors
///
/// - `DomainError::InvalidPercent` if `roi_reward <= 0`
/// - `DomainError::OutOfDomain` if a short target would be at or below zero
pub fn take_profit_price(
    side: Side,
    entry: Price,
    roi_reward: Decimal,
    leverage: Leverage,
) -> Result<Price, DomainError> {
    ensure_positive("roi_reward", roi_reward)?;
    roi_to_price(side, entry, roi_reward, leverage)
}

/// Approximate liquidation price for isolated margin.
///
/// ```text
/// LONG:  entry × (1 - 1/leverage + mm/100)
/// SHORT: entry × (1 + 1/leverage - mm/100)
/// ```
///
/// `maint_margin_percent` is the maintenance margin as a percent of notional.
/// This is a sanity bound for stop placement, never a trigger.
///
/// # Errors
///
/// - `DomainError::InvalidPercent` if `maint_margin_percent < 0` or
///   `maint_margin_percent × leverage >= 100` (liquidation at or past entry)
/// - `DomainError::OutOfDomain` for an unliquidatable 1x long with zero
///   maintenance margin
pub fn liquidation_price(
    side: Side,
    entry: Price,
    leverage: Leverage,
    maint_margin_percent: Decimal,
) -> Result<Price, DomainError> {
    if maint_margin_percent < Decimal::ZERO {
        return Err(DomainError::InvalidPercent(format!(
            "maint_margin_percent must be >= 0, got {}",
            maint_margin_percent
        )));
    }
    if maint_margin_percent * leverage.as_decimal() >= Decimal::ONE_HUNDRED {
        return Err(DomainError::InvalidPercent(format!(
            "maint_margin_percent {} at {} leaves no margin before liquidation",
            maint_margin_percent, leverage
        )));
    }

    let distance =
        Decimal::ONE / leverage.as_decimal() - maint_margin_percent / Decimal::ONE_HUNDRED;
    let price = entry.as_decimal() * (Decimal::ONE - side.direction() * distance);

    Price::new(price).map_err(|_| {
        DomainError::OutOfDomain(format!(
            "{} position at {} with {}% maintenance margin cannot be liquidated",
            side, leverage, maint_margin_percent
        ))
    })
}

// =============================================================================
// Break-even
// =============================================================================

/// Minimum ROI percent at which moving the stop to entry cannot lose money.
///
/// ```text
/// (entry_fee + exit_fee + buffer) × leverage × 100
/// ```
///
/// `buffer` is an extra price-move fraction on top of the fees (slippage
/// allowance). The result is bounded below by `(entry_fee + exit_fee) ×
/// leverage × 100` and strictly increasing in `leverage` (for non-zero
/// costs) and in `buffer`.
///
/// ```
/// # use warden_domain::math::fee_adjusted_break_even;
/// # use warden_domain::value_objects::Leverage;
/// # use rust_decimal_macros::dec;
/// let leverage = Leverage::from_u32(100).unwrap();
/// let roi = fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), leverage, dec!(0)).unwrap();
/// assert_eq!(roi, dec!(12)); // 0.12% round trip at 100x
/// ```
///
/// # Errors
///
/// `DomainError::InvalidPercent` if any fee or the buffer is negative.
pub fn fee_adjusted_break_even(
    entry_fee: Decimal,
    exit_fee: Decimal,
    leverage: Leverage,
    buffer: Decimal,
) -> Result<Decimal, DomainError> {
    ensure_non_negative("entry_fee", entry_fee)?;
    ensure_non_negative("exit_fee", exit_fee)?;
    ensure_non_negative("buffer", buffer)?;

    Ok((entry_fee + exit_fee + buffer) * leverage.as_decimal() * Decimal::ONE_HUNDRED)
}

// =============================================================================
// Staircase trailing
// =============================================================================

/// Number of whole trailing steps between the last trailed ROI and now.
///
/// `max(0, floor((current_roi - last_trailed_roi) / step_percent))`
///
/// # Errors
///
/// `DomainError::InvalidPercent` if `step_percent <= 0`.
pub fn trailing_steps(
    current_roi: Decimal,
    last_trailed_roi: Decimal,
    step_percent: Decimal,
) -> Result<u32, DomainError> {
    ensure_positive("step_percent", step_percent)?;

    let gained = current_roi - last_trailed_roi;
    if gained <= Decimal::ZERO {
        return Ok(0);
    }

    Ok((gained / step_percent).floor().to_u32().unwrap_or(u32::MAX))
}

/// Move a stop by `steps × move_percent` percent of its price, protective
/// direction only (up for longs, down for shorts).
///
/// # Errors
///
/// - `DomainError::InvalidPercent` if `move_percent < 0`
/// - `DomainError::OutOfDomain` if a short stop would reach zero
pub fn trailed_stop_loss(
    side: Side,
    current_stop: Price,
    steps: u32,
    move_percent: Decimal,
) -> Result<Price, DomainError> {
    ensure_non_negative("move_percent", move_percent)?;
    if steps == 0 || move_percent.is_zero() {
        return Ok(current_stop);
    }

    let offset = Decimal::from(steps) * move_percent / Decimal::ONE_HUNDRED;
    let price = current_stop.as_decimal() * (Decimal::ONE + side.direction() * offset);

    Price::new(price).map_err(|_| {
        DomainError::OutOfDomain(format!(
            "trailing {} steps of {}% moves short stop {} below zero",
            steps, move_percent, current_stop
        ))
    })
}

// =============================================================================
// Notional / Margin / PnL
// =============================================================================

/// Notional value: `size × price`
pub fn notional(size: Quantity, price: Price) -> Decimal {
    size.as_decimal() * price.as_decimal()
}

/// Margin locked for a position: `notional / leverage`
pub fn margin_used(size: Quantity, price: Price, leverage: Leverage) -> Decimal {
    notional(size, price) / leverage.as_decimal()
}

/// Gross PnL of moving from `entry` to `current` with `size` contracts.
pub fn unrealized_pnl(side: Side, entry: Price, current: Price, size: Quantity) -> Decimal {
    (current.as_decimal() - entry.as_decimal()) * size.as_decimal() * side.direction()
}

/// ROI percent of a PnL amount relative to margin.
///
/// # Errors
///
/// `DomainError::InvalidPercent` if `margin <= 0`.
pub fn roi_percent(pnl: Decimal, margin: Decimal) -> Result<Decimal, DomainError> {
    ensure_positive("margin", margin)?;
    Ok(pnl / margin * Decimal::ONE_HUNDRED)
}

// =============================================================================
// Sizing / Exchange precision
// =============================================================================

/// Size of a position opened with a share of the account balance.
///
/// ```text
/// contracts = floor(balance × position_percent / 100 × leverage / (entry × lot_size))
/// size      = max(contracts, 1) × lot_size
/// ```
///
/// Never sizes below one lot.
///
/// ```
/// # use warden_domain::math::position_size;
/// # use warden_domain::value_objects::{Leverage, Price};
/// # use rust_decimal_macros::dec;
/// let entry = Price::new(dec!(2000)).unwrap();
/// let leverage = Leverage::from_u32(20).unwrap();
///
/// // 1000 × 10% margin × 20x = 2000 notional = 1 ETH = 100 lots of 0.01
/// let size = position_size(dec!(1000), dec!(10), entry, leverage, dec!(0.01)).unwrap();
/// assert_eq!(size.as_decimal(), dec!(1.00));
/// ```
///
/// # Errors
///
/// - `DomainError::InvalidQuantity` if `balance <= 0` or `lot_size <= 0`
/// - `DomainError::InvalidPercent` if `position_percent` is outside `(0, 100]`
pub fn position_size(
    balance: Decimal,
    position_percent: Decimal,
    entry: Price,
    leverage: Leverage,
    lot_size: Decimal,
) -> Result<Quantity, DomainError> {
    if balance <= Decimal::ZERO {
        return Err(DomainError::InvalidQuantity(format!(
            "Account balance must be positive to size a position, got {}",
            balance
        )));
    }
    if lot_size <= Decimal::ZERO {
        return Err(DomainError::InvalidQuantity(format!("lot_size must be > 0, got {}", lot_size)));
    }
    ensure_positive("position_percent", position_percent)?;
    if position_percent > Decimal::ONE_HUNDRED {
        return Err(DomainError::InvalidPercent(format!(
            "position_percent must be <= 100, got {}",
            position_percent
        )));
    }

    let margin = balance * position_percent / Decimal::ONE_HUNDRED;
    let value = margin * leverage.as_decimal();
    let lots = (value / (entry.as_decimal() * lot_size)).floor().max(Decimal::ONE);

    Quantity::new(lots * lot_size)
}

/// Round a stop price onto the exchange tick grid.
///
/// Long stops round down and short stops round up, so the resting stop is
/// never closer to the market than the computed one.
///
/// # Errors
///
/// - `DomainError::InvalidPercent` if `tick_size <= 0`
/// - `DomainError::OutOfDomain` if a long stop rounds down to zero
pub fn round_stop_to_tick(side: Side, stop: Price, tick_size: Decimal) -> Result<Price, DomainError> {
    ensure_positive("tick_size", tick_size)?;

    let ticks = stop.as_decimal() / tick_size;
    let ticks = match side {
        Side::Long => ticks.floor(),
        Side::Short => ticks.ceil(),
    };

    Price::new((ticks * tick_size).normalize()).map_err(|_| {
        DomainError::OutOfDomain(format!("stop {} rounds to zero on tick {}", stop, tick_size))
    })
}

fn ensure_positive(name: &str, value: Decimal) -> Result<(), DomainError> {
    if value <= Decimal::ZERO {
        return Err(DomainError::InvalidPercent(format!("{} must be > 0, got {}", name, value)));
    }
    Ok(())
}

fn ensure_non_negative(name: &str, value: Decimal) -> Result<(), DomainError> {
    if value < Decimal::ZERO {
        return Err(DomainError::InvalidPercent(format!("{} must be >= 0, got {}", name, value)));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn price(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    fn lev(multiplier: u32) -> Leverage {
        Leverage::from_u32(multiplier).unwrap()
    }

    // =========================================================================
    // ROI conversions
    // =========================================================================

    #[test]
    fn test_roi_to_price_long_and_short() {
        // 9% ROI at 100x is a 0.09% price move
        let entry = price(dec!(2000));
        assert_eq!(roi_to_price(Side::Long, entry, dec!(9), lev(100)).unwrap().as_decimal(), dec!(2001.8));
        assert_eq!(roi_to_price(Side::Short, entry, dec!(9), lev(100)).unwrap().as_decimal(), dec!(1998.2));
        assert_eq!(roi_to_price(Side::Long, entry, dec!(-9), lev(100)).unwrap().as_decimal(), dec!(1998.2));
    }

    #[test]
    fn test_price_to_roi_inverts_roi_to_price() {
        let entry = price(dec!(2000));
        let target = roi_to_price(Side::Short, entry, dec!(18), lev(100)).unwrap();
        assert_eq!(price_to_roi(Side::Short, entry, target, lev(100)), dec!(18));
    }

    // =========================================================================
    // Stop-loss / Take-profit
    // =========================================================================

    #[test]
    fn test_stop_loss_price_values() {
        let entry = price(dec!(95000));
        // 50% ROI at 10x = 5% price move
        assert_eq!(stop_loss_price(Side::Long, entry, dec!(50), lev(10)).unwrap().as_decimal(), dec!(90250));
        assert_eq!(stop_loss_price(Side::Short, entry, dec!(50), lev(10)).unwrap().as_decimal(), dec!(99750));
    }

    #[test]
    fn test_take_profit_price_values() {
        let entry = price(dec!(95000));
        assert_eq!(take_profit_price(Side::Long, entry, dec!(50), lev(10)).unwrap().as_decimal(), dec!(99750));
        assert_eq!(take_profit_price(Side::Short, entry, dec!(50), lev(10)).unwrap().as_decimal(), dec!(90250));
    }

    #[test]
    fn test_stop_loss_rejects_non_positive_roi() {
        let entry = price(dec!(100));
        assert!(matches!(
            stop_loss_price(Side::Long, entry, dec!(0), lev(10)),
            Err(DomainError::InvalidPercent(_))
        ));
        assert!(take_profit_price(Side::Long, entry, dec!(-5), lev(10)).is_err());
    }

    #[test]
    fn test_stop_loss_beyond_total_loss_is_out_of_domain() {
        // 100% ROI loss at 1x would put a long stop at zero
        let result = stop_loss_price(Side::Long, price(dec!(100)), dec!(100), lev(1));
        assert!(matches!(result, Err(DomainError::OutOfDomain(_))));
    }

    // =========================================================================
    // Liquidation
    // =========================================================================

    #[test]
    fn test_liquidation_price_values() {
        let entry = price(dec!(2000));
        // 100x, 0.4% maintenance: 1% - 0.4% = 0.6% away
        assert_eq!(liquidation_price(Side::Long, entry, lev(100), dec!(0.4)).unwrap().as_decimal(), dec!(1988));
        assert_eq!(liquidation_price(Side::Short, entry, lev(100), dec!(0.4)).unwrap().as_decimal(), dec!(2012));
    }

    #[test]
    fn test_liquidation_price_rejects_excess_maintenance() {
        let entry = price(dec!(2000));
        assert!(liquidation_price(Side::Long, entry, lev(100), dec!(1)).is_err());
        assert!(liquidation_price(Side::Long, entry, lev(10), dec!(-0.1)).is_err());
    }

    // =========================================================================
    // Break-even
    // =========================================================================

    #[test]
    fn test_fee_adjusted_break_even_lower_bound() {
        let roi = fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), lev(10), dec!(0)).unwrap();
        assert_eq!(roi, dec!(1.2));

        let buffered =
            fee_adjusted_break_even(dec!(0.0006), dec!(0.0006), lev(10), dec!(0.0003)).unwrap();
        assert_eq!(buffered, dec!(1.5));
    }

    #[test]
    fn test_fee_adjusted_break_even_rejects_negative_fee() {
        assert!(fee_adjusted_break_even(dec!(-0.001), dec!(0.0006), lev(10), dec!(0)).is_err());
        assert!(fee_adjusted_break_even(dec!(0.001), dec!(0.0006), lev(10), dec!(-1)).is_err());
    }

    // =========================================================================
    // Trailing steps
    // =========================================================================

    #[test]
    fn test_trailing_steps_floor() {
        assert_eq!(trailing_steps(dec!(26), dec!(0), dec!(8)).unwrap(), 3);
        assert_eq!(trailing_steps(dec!(26), dec!(24), dec!(8)).unwrap(), 0);
        assert_eq!(trailing_steps(dec!(-5), dec!(0), dec!(8)).unwrap(), 0);
        assert_eq!(trailing_steps(dec!(16), dec!(8), dec!(8)).unwrap(), 1);
    }

    #[test]
    fn test_trailing_steps_rejects_zero_step() {
        assert!(trailing_steps(dec!(10), dec!(0), dec!(0)).is_err());
    }

    #[test]
    fn test_trailed_stop_loss_moves_protective_direction() {
        let stop = price(dec!(1000));
        assert_eq!(trailed_stop_loss(Side::Long, stop, 2, dec!(0.5)).unwrap().as_decimal(), dec!(1010));
        assert_eq!(trailed_stop_loss(Side::Short, stop, 2, dec!(0.5)).unwrap().as_decimal(), dec!(990));
        assert_eq!(trailed_stop_loss(Side::Long, stop, 0, dec!(0.5)).unwrap(), stop);
    }

    #[test]
    fn test_trailed_short_stop_cannot_cross_zero() {
        let stop = price(dec!(1000));
        assert!(matches!(
            trailed_stop_loss(Side::Short, stop, 200, dec!(1)),
            Err(DomainError::OutOfDomain(_))
        ));
    }

    // =========================================================================
    // Notional / Margin / PnL
    // =========================================================================

    #[test]
    fn test_margin_and_roi() {
        let size = Quantity::new(dec!(2)).unwrap();
        let entry = price(dec!(2000));
        assert_eq!(notional(size, entry), dec!(4000));
        assert_eq!(margin_used(size, entry, lev(100)), dec!(40));

        let pnl = unrealized_pnl(Side::Long, entry, price(dec!(2010)), size);
        assert_eq!(pnl, dec!(20));
        assert_eq!(roi_percent(pnl, dec!(40)).unwrap(), dec!(50));
        assert!(roi_percent(pnl, dec!(0)).is_err());
    }

    // =========================================================================
    // Properties
    // =========================================================================

    // =========================================================================
    // Sizing / Exchange precision
    // =========================================================================

    #[test]
    fn test_position_size_floors_to_lots() {
        // 1000 × 5% × 20x = 1000 notional / 2000 = 0.5 ETH, lot 0.3 -> 1 lot
        let size = position_size(dec!(1000), dec!(5), price(dec!(2000)), lev(20), dec!(0.3)).unwrap();
        assert_eq!(size.as_decimal(), dec!(0.3));

        // 10000 × 10% × 10x = 10000 notional / 2000 = 5 ETH in whole contracts
        let size = position_size(dec!(10000), dec!(10), price(dec!(2000)), lev(10), dec!(1)).unwrap();
        assert_eq!(size.as_decimal(), dec!(5));
    }

    #[test]
    fn test_position_size_never_below_one_lot() {
        let size = position_size(dec!(1), dec!(1), price(dec!(2000)), lev(1), dec!(0.01)).unwrap();
        assert_eq!(size.as_decimal(), dec!(0.01));
    }

    #[test]
    fn test_position_size_rejects_bad_inputs() {
        let entry = price(dec!(2000));
        assert!(matches!(
            position_size(dec!(0), dec!(10), entry, lev(10), dec!(0.01)),
            Err(DomainError::InvalidQuantity(_))
        ));
        assert!(matches!(
            position_size(dec!(1000), dec!(0), entry, lev(10), dec!(0.01)),
            Err(DomainError::InvalidPercent(_))
        ));
        assert!(matches!(
            position_size(dec!(1000), dec!(101), entry, lev(10), dec!(0.01)),
            Err(DomainError::InvalidPercent(_))
        ));
        assert!(matches!(
            position_size(dec!(1000), dec!(10), entry, lev(10), dec!(0)),
            Err(DomainError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_round_stop_to_tick_away_from_market() {
        let stop = price(dec!(2000.1982));
        assert_eq!(round_stop_to_tick(Side::Long, stop, dec!(0.01)).unwrap(), price(dec!(2000.19)));
        assert_eq!(round_stop_to_tick(Side::Short, stop, dec!(0.01)).unwrap(), price(dec!(2000.20)));
        assert_eq!(round_stop_to_tick(Side::Long, stop, dec!(0.5)).unwrap(), price(dec!(2000)));

        // Already on the grid
        let on_grid = price(dec!(1998.25));
        assert_eq!(round_stop_to_tick(Side::Short, on_grid, dec!(0.05)).unwrap(), on_grid);
    }

    #[test]
    fn test_round_stop_to_tick_rejects_bad_tick() {
        let stop = price(dec!(2000));
        assert!(round_stop_to_tick(Side::Long, stop, dec!(0)).is_err());
        assert!(matches!(
            round_stop_to_tick(Side::Long, price(dec!(0.004)), dec!(0.01)),
            Err(DomainError::OutOfDomain(_))
        ));
    }

    fn entry_strategy() -> impl Strategy<Value = Price> {
        (1i64..10_000_000i64).prop_map(|cents| Price::new(Decimal::new(cents, 2)).unwrap())
    }

    fn leverage_strategy() -> impl Strategy<Value = Leverage> {
        (1u32..=100u32).prop_map(|l| Leverage::from_u32(l).unwrap())
    }

    fn roi_strategy() -> impl Strategy<Value = Decimal> {
        // 0.01% .. 99.99% ROI
        (1i64..10_000i64).prop_map(|bp| Decimal::new(bp, 2))
    }

    proptest! {
        #[test]
        fn prop_stop_loss_on_adverse_side(entry in entry_strategy(), leverage in leverage_strategy(), roi in roi_strategy()) {
            prop_assert!(stop_loss_price(Side::Long, entry, roi, leverage).unwrap() < entry);
            prop_assert!(stop_loss_price(Side::Short, entry, roi, leverage).unwrap() > entry);
        }

        #[test]
        fn prop_take_profit_on_favorable_side(entry in entry_strategy(), leverage in leverage_strategy(), roi in roi_strategy()) {
            prop_assert!(take_profit_price(Side::Long, entry, roi, leverage).unwrap() > entry);
            prop_assert!(take_profit_price(Side::Short, entry, roi, leverage).unwrap() < entry);
        }

        #[test]
        fn prop_liquidation_beyond_half_roi_stop(
            entry in entry_strategy(),
            leverage in leverage_strategy(),
            mm_bp in 1i64..50i64,
        ) {
            let mm = Decimal::new(mm_bp, 2); // 0.01% .. 0.49%
            let long_stop = stop_loss_price(Side::Long, entry, dec!(50), leverage).unwrap();
            let short_stop = stop_loss_price(Side::Short, entry, dec!(50), leverage).unwrap();
            prop_assert!(liquidation_price(Side::Long, entry, leverage, mm).unwrap() < long_stop);
            prop_assert!(liquidation_price(Side::Short, entry, leverage, mm).unwrap() > short_stop);
        }

        #[test]
        fn prop_break_even_strictly_increasing(
            fee_bp in 1i64..20i64,
            low in 1u32..100u32,
            buffer_bp in 0i64..20i64,
        ) {
            let fee = Decimal::new(fee_bp, 4);
            let buffer = Decimal::new(buffer_bp, 4);
            let lower = fee_adjusted_break_even(fee, fee, lev(low), buffer).unwrap();
            let higher_lev = fee_adjusted_break_even(fee, fee, lev(low + 1), buffer).unwrap();
            let higher_buf = fee_adjusted_break_even(fee, fee, lev(low), buffer + dec!(0.0001)).unwrap();

            prop_assert!(higher_lev > lower);
            prop_assert!(higher_buf > lower);
            prop_assert!(lower >= (fee + fee) * Decimal::from(low) * Decimal::ONE_HUNDRED);
        }

        #[test]
        fn prop_trailing_steps_deterministic_and_non_negative(
            current in -10_000i64..10_000i64,
            last in -10_000i64..10_000i64,
            step in 1i64..1_000i64,
        ) {
            let (c, l, s) = (Decimal::new(current, 2), Decimal::new(last, 2), Decimal::new(step, 2));
            let first = trailing_steps(c, l, s).unwrap();
            prop_assert_eq!(first, trailing_steps(c, l, s).unwrap());
            if c <= l {
                prop_assert_eq!(first, 0);
            }
        }

        #[test]
        fn prop_trailed_stop_never_loosens(stop in entry_strategy(), steps in 0u32..50u32, move_bp in 0i64..100i64) {
            let mv = Decimal::new(move_bp, 2); // up to 0.99% per step
            prop_assert!(trailed_stop_loss(Side::Long, stop, steps, mv).unwrap() >= stop);
            prop_assert!(trailed_stop_loss(Side::Short, stop, steps, mv).unwrap() <= stop);
        }

        #[test]
        fn prop_rounded_stop_on_grid_and_not_tighter(stop in entry_strategy(), tick_exp in 0u32..4u32) {
            let tick = Decimal::new(1, tick_exp);
            let long = round_stop_to_tick(Side::Long, stop, tick);
            if let Ok(long) = long {
                prop_assert!(long <= stop);
                prop_assert_eq!((long.as_decimal() / tick).fract(), Decimal::ZERO);
            }
            let short = round_stop_to_tick(Side::Short, stop, tick).unwrap();
            prop_assert!(short >= stop);
            prop_assert!(short.as_decimal() - stop.as_decimal() < tick);
        }
    }
}
