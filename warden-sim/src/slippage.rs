//! Slippage models for backtest fill simulation.

use rust_decimal::Decimal;
use warden_domain::{Candle, OrderSide, Price};

use crate::config::{SimConfig, SlippageModel};
use crate::error::{SimError, SimResult};

/// Slippage percent (of price) for a taker fill under the configured model.
///
/// # Arguments
/// * `config` - Simulation configuration
/// * `bar` - Current bar, used by the volatility-scaled model
/// * `quoted_spread` - Absolute bid-ask spread, used by the spread model
/// * `reference` - Price the spread is measured against
pub fn slippage_percent(
    config: &SimConfig,
    bar: Option<&Candle>,
    quoted_spread: Option<Decimal>,
    reference: Price,
) -> Decimal {
    match config.slippage_model {
        SlippageModel::None => Decimal::ZERO,
        SlippageModel::Fixed => config.slippage_percent,
        SlippageModel::SpreadBased => match quoted_spread {
            Some(spread) if spread >= Decimal::ZERO => {
                config.spread_fraction * spread / reference.as_decimal() * Decimal::ONE_HUNDRED
            },
            _ => config.slippage_percent,
        },
        SlippageModel::VolScaled => {
            let range = bar.map(Candle::range_percent).unwrap_or(Decimal::ZERO);
            config.slippage_percent * (Decimal::ONE + config.vol_coefficient * range)
        },
    }
}

/// Move `price` against the order by `percent`.
///
/// For buys: pay more. For sells: receive less.
pub fn apply_adverse(price: Price, order_side: OrderSide, percent: Decimal) -> SimResult<Price> {
    shift(price, order_side, percent)
}

/// Move `price` in the order's favor by `percent`.
pub fn apply_favorable(price: Price, order_side: OrderSide, percent: Decimal) -> SimResult<Price> {
    shift(price, order_side, -percent)
}

/// Adverse cost in quote currency of filling at `fill` instead of `reference`.
///
/// Negative when the fill was better than the reference.
pub fn slippage_cost(order_side: OrderSide, reference: Price, fill: Price, size: Decimal) -> Decimal {
    let diff = fill.as_decimal() - reference.as_decimal();
    match order_side {
        OrderSide::Buy => diff * size,
        OrderSide::Sell => -diff * size,
    }
}

fn shift(price: Price, order_side: OrderSide, percent: Decimal) -> SimResult<Price> {
    let ratio = percent / Decimal::ONE_HUNDRED;
    let shifted = match order_side {
        OrderSide::Buy => price.as_decimal() * (Decimal::ONE + ratio),
        OrderSide::Sell => price.as_decimal() * (Decimal::ONE - ratio),
    };
    Price::new(shifted).map_err(|_| {
        SimError::InvalidOrder(format!("{}% slippage on {} leaves no positive price", percent, price))
    })
}
