//! Order fill simulation engine.
//!
//! Turns order intents into `FillResult`s under the configured fill and
//! slippage models. All randomness comes from the caller's seeded RNG, so a
//! backtest is reproducible from its seed.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use warden_domain::math;
use warden_domain::{Candle, OrderSide, Position, Price, Quantity, Side};

use crate::config::{FillModel, SimConfig};
use crate::error::{SimError, SimResult};
use crate::slippage::{apply_adverse, apply_favorable, slippage_cost, slippage_percent};

/// Resolution of the probability draw (1e-6).
const DRAW_SCALE: u32 = 1_000_000;

/// Which side of the book provided liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    Taker,
    Maker,
}

/// Result of order fill simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    /// Whether the order was filled.
    pub filled: bool,
    /// Fill price (if filled).
    pub fill_price: Option<Price>,
    /// Fill or attempt time.
    pub fill_time: DateTime<Utc>,
    /// Fee in quote currency.
    pub fee: Decimal,
    /// Adverse slippage cost in quote currency, negative when favorable.
    pub slippage: Decimal,
    /// Liquidity role of the fill.
    pub liquidity: Liquidity,
}

impl FillResult {
    /// Create a "no fill" result.
    pub fn no_fill(fill_time: DateTime<Utc>, liquidity: Liquidity) -> Self {
        Self {
            filled: false,
            fill_price: None,
            fill_time,
            fee: Decimal::ZERO,
            slippage: Decimal::ZERO,
            liquidity,
        }
    }
}

/// Mark-to-market valuation of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkToMarket {
    pub gross_pnl: Decimal,
    /// Gross minus fees paid and the estimated exit fee.
    ///
    /// Entry slippage already sits in the entry price, so this is what
    /// closing at the marked price would report as the trade's net PnL.
    pub net_pnl: Decimal,
    /// Leveraged ROI of the gross move, the figure the trailing policy uses.
    pub roi_percent: Decimal,
    pub net_roi_percent: Decimal,
}

/// Simulated exchange execution.
#[derive(Debug, Clone)]
pub struct ExecutionSimulator {
    config: SimConfig,
    quoted_spread: Option<Decimal>,
}

impl ExecutionSimulator {
    /// Create a simulator from a validated configuration.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            quoted_spread: None,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Set the current absolute bid-ask spread for the spread-based model.
    pub fn set_quoted_spread(&mut self, spread: Option<Decimal>) {
        self.quoted_spread = spread;
    }

    // =========================================================================
    // Entry
    // =========================================================================

    /// Simulate an entry order on `bar`.
    ///
    /// Taker entries always fill at mid plus adverse slippage. Probabilistic
    /// limit entries fill at the limit (plus maker slippage) only when the bar
    /// touches the limit and the draw succeeds; otherwise the result is
    /// `filled: false` and the caller may retry on the next bar.
    ///
    /// # Errors
    /// `SimError::InvalidOrder` when the limit model is used without a limit
    /// price.
    pub fn simulate_entry<R: Rng + ?Sized>(
        &self,
        side: Side,
        size: Quantity,
        mid_price: Price,
        limit_price: Option<Price>,
        bar: &Candle,
        rng: &mut R,
    ) -> SimResult<FillResult> {
        let order_side = side.entry_action();

        match self.config.fill_model {
            FillModel::Taker => {
                let pct = self.taker_slippage(Some(bar), mid_price);
                self.fill(order_side, size, mid_price, pct, bar.close_time, Liquidity::Taker)
            },
            FillModel::ProbabilisticLimit => {
                let limit = limit_price.ok_or_else(|| {
                    SimError::InvalidOrder("probabilistic_limit entry requires a limit price".into())
                })?;

                if !bar.touches(limit) || !self.draw(rng) {
                    return Ok(FillResult::no_fill(bar.close_time, Liquidity::Maker));
                }

                let pct =
                    self.taker_slippage(Some(bar), limit) * self.config.maker_slippage_factor;
                self.fill(order_side, size, limit, pct, bar.close_time, Liquidity::Maker)
            },
        }
    }

    // =========================================================================
    // Exits
    // =========================================================================

    /// Taker exit of a `side` position at `price`.
    pub fn simulate_exit(
        &self,
        side: Side,
        size: Quantity,
        price: Price,
        time: DateTime<Utc>,
        bar: Option<&Candle>,
    ) -> SimResult<FillResult> {
        let pct = self.taker_slippage(bar, price);
        self.fill(side.exit_action(), size, price, pct, time, Liquidity::Taker)
    }

    /// Stop-loss exit: taker with `stop_slippage_multiplier ×` adverse slippage.
    pub fn simulate_stop_loss(
        &self,
        side: Side,
        size: Quantity,
        trigger_price: Price,
        time: DateTime<Utc>,
        bar: Option<&Candle>,
    ) -> SimResult<FillResult> {
        let pct = self.taker_slippage(bar, trigger_price) * self.config.stop_slippage_multiplier;
        self.fill(side.exit_action(), size, trigger_price, pct, time, Liquidity::Taker)
    }

    /// Take-profit exit: taker with a small favorable slippage.
    pub fn simulate_take_profit(
        &self,
        side: Side,
        size: Quantity,
        target_price: Price,
        time: DateTime<Utc>,
    ) -> SimResult<FillResult> {
        let order_side = side.exit_action();
        let fill_price =
            apply_favorable(target_price, order_side, self.config.take_profit_slippage_percent)?;
        Ok(self.filled(order_side, size, target_price, fill_price, time, Liquidity::Taker))
    }

    // =========================================================================
    // Valuation
    // =========================================================================

    /// Value an open position at `price`.
    pub fn mark_to_market(&self, position: &Position, price: Price) -> SimResult<MarkToMarket> {
        let gross_pnl = position.unrealized_pnl(price);
        let estimated_exit_fee = math::notional(position.size, price) * self.config.taker_fee;
        let net_pnl = gross_pnl - position.fees_paid - estimated_exit_fee;

        Ok(MarkToMarket {
            gross_pnl,
            net_pnl,
            roi_percent: position.roi_at(price),
            net_roi_percent: math::roi_percent(net_pnl, position.margin_used)?,
        })
    }

    /// Price the market must reach for closing to be cost-neutral.
    ///
    /// Entry moved favorably by both fee rates, the slippage already paid
    /// (per unit notional) and the expected exit slippage.
    pub fn calculate_break_even(&self, position: &Position) -> SimResult<Price> {
        let entry_notional = math::notional(position.size, position.entry_price);
        let paid_slippage = if entry_notional.is_zero() {
            Decimal::ZERO
        } else {
            position.slippage_cost.max(Decimal::ZERO) / entry_notional
        };
        let exit_slippage =
            self.taker_slippage(None, position.entry_price) / Decimal::ONE_HUNDRED;

        let fraction =
            position.entry_fee_rate + position.exit_fee_rate + paid_slippage + exit_slippage;
        let price =
            position.entry_price.as_decimal() * (Decimal::ONE + position.side.direction() * fraction);

        Ok(Price::new(price)?)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn taker_slippage(&self, bar: Option<&Candle>, reference: Price) -> Decimal {
        slippage_percent(&self.config, bar, self.quoted_spread, reference)
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let sample = Decimal::from(rng.gen_range(0..DRAW_SCALE)) / Decimal::from(DRAW_SCALE);
        sample < self.config.limit_fill_probability
    }

    fn fill(
        &self,
        order_side: OrderSide,
        size: Quantity,
        reference: Price,
        slippage_pct: Decimal,
        time: DateTime<Utc>,
        liquidity: Liquidity,
    ) -> SimResult<FillResult> {
        let fill_price = apply_adverse(reference, order_side, slippage_pct)?;
        Ok(self.filled(order_side, size, reference, fill_price, time, liquidity))
    }

    fn filled(
        &self,
        order_side: OrderSide,
        size: Quantity,
        reference: Price,
        fill_price: Price,
        time: DateTime<Utc>,
        liquidity: Liquidity,
    ) -> FillResult {
        let fee_rate = match liquidity {
            Liquidity::Taker => self.config.taker_fee,
            Liquidity::Maker => self.config.maker_fee,
        };

        FillResult {
            filled: true,
            fill_price: Some(fill_price),
            fill_time: time,
            fee: math::notional(size, fill_price) * fee_rate,
            slippage: slippage_cost(order_side, reference, fill_price, size.as_decimal()),
            liquidity,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
