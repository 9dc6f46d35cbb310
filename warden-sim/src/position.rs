//! Bar-by-bar position simulation.
//!
//! `Open` → `Closed(Trade)`. On each bar the stop is checked first, then the
//! take-profit, then the position is marked at the close and the trailing
//! policy runs. A bar that touches both stop and target exits at the stop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use warden_domain::math::{stop_loss_price, take_profit_price};
use warden_domain::trailing::evaluate_stop;
use warden_domain::{
    Candle, ExitReason, Leverage, NewPosition, Position, Price, Quantity, Side, StopAdjustment,
    Symbol, Trade, TradeExit, TrailingConfig,
};

use crate::error::{SimError, SimResult};
use crate::execution::{ExecutionSimulator, FillResult, Liquidity, MarkToMarket};

/// Entry intent: what to open and how much ROI to risk and target.
#[derive(Debug, Clone)]
pub struct EntryOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub size: Quantity,
    pub leverage: Leverage,
    pub roi_risk: Decimal,
    pub roi_reward: Decimal,
}

/// Simulator lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SimState {
    Open(Position),
    Closed(Trade),
}

/// What happened on a bar.
#[derive(Debug, Clone, PartialEq)]
pub enum BarOutcome {
    /// Still open; `adjustment` is set when the stop moved.
    Held {
        mark: MarkToMarket,
        adjustment: Option<StopAdjustment>,
    },
    Closed(Trade),
}

/// Simulates a single position from entry fill to exit.
#[derive(Debug, Clone)]
pub struct PositionSimulator {
    execution: ExecutionSimulator,
    trailing: TrailingConfig,
    state: SimState,
}

impl PositionSimulator {
    /// Open from a filled entry, deriving stop-loss and take-profit from ROI.
    ///
    /// # Errors
    /// `SimError::NotFilled` for an unfilled entry, `SimError::Domain` when
    /// the derived levels fall outside the valid price domain.
    pub fn open(
        execution: ExecutionSimulator,
        trailing: TrailingConfig,
        order: EntryOrder,
        fill: &FillResult,
    ) -> SimResult<Self> {
        let entry_price = match (fill.filled, fill.fill_price) {
            (true, Some(price)) => price,
            _ => return Err(SimError::NotFilled),
        };
        trailing.validate()?;

        let entry_fee_rate = match fill.liquidity {
            Liquidity::Taker => execution.config().taker_fee,
            Liquidity::Maker => execution.config().maker_fee,
        };
        let exit_fee_rate = execution.config().taker_fee;

        let mut position = Position::open(NewPosition {
            symbol: order.symbol,
            side: order.side,
            entry_price,
            entry_time: fill.fill_time,
            size: order.size,
            leverage: order.leverage,
            stop_loss_price: stop_loss_price(order.side, entry_price, order.roi_risk, order.leverage)?,
            take_profit_price: Some(take_profit_price(
                order.side,
                entry_price,
                order.roi_reward,
                order.leverage,
            )?),
            entry_fee_rate,
            exit_fee_rate,
        })?;
        position.record_costs(fill.fee, fill.slippage);

        Ok(Self {
            execution,
            trailing,
            state: SimState::Open(position),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// The open position, if any.
    pub fn position(&self) -> Option<&Position> {
        match &self.state {
            SimState::Open(position) => Some(position),
            SimState::Closed(_) => None,
        }
    }

    /// The closing trade, if closed.
    pub fn trade(&self) -> Option<&Trade> {
        match &self.state {
            SimState::Open(_) => None,
            SimState::Closed(trade) => Some(trade),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SimState::Open(_))
    }

    /// Advance one bar.
    pub fn on_bar(&mut self, bar: &Candle) -> SimResult<BarOutcome> {
        let position = self.open_position()?;
        let side = position.side;
        let size = position.size;
        let stop = position.stop_loss_price;

        // 1. Stop-loss (gap-through fills at the open)
        if stop_touched(side, bar, stop) {
            let trigger = if stop_gapped(side, bar.open, stop) { bar.open } else { stop };
            let fill =
                self.execution.simulate_stop_loss(side, size, trigger, bar.close_time, Some(bar))?;
            return self.close_with(fill, ExitReason::StopLoss).map(BarOutcome::Closed);
        }

        // 2. Take-profit
        if let Some(target) = position.take_profit_price {
            if target_touched(side, bar, target) {
                let level = if target_gapped(side, bar.open, target) { bar.open } else { target };
                let fill = self.execution.simulate_take_profit(side, size, level, bar.close_time)?;
                return self.close_with(fill, ExitReason::TakeProfit).map(BarOutcome::Closed);
            }
        }

        // 3. Mark and trail
        let mark = self.execution.mark_to_market(position, bar.close)?;
        let adjustment = evaluate_stop(&position.trailing_input(bar.close), &self.trailing)?;

        let SimState::Open(position) = &mut self.state else {
            return Err(SimError::PositionClosed);
        };
        position.apply_adjustment(&adjustment)?;

        Ok(BarOutcome::Held {
            mark,
            adjustment: adjustment.moved().then_some(adjustment),
        })
    }

    /// Taker-close at the last known price.
    pub fn force_close(
        &mut self,
        price: Price,
        time: DateTime<Utc>,
        reason: ExitReason,
    ) -> SimResult<Trade> {
        let position = self.open_position()?;
        let fill = self.execution.simulate_exit(position.side, position.size, price, time, None)?;
        self.close_with(fill, reason)
    }

    /// Run bars until the position closes; force-close at the last bar's
    /// close if data runs out first.
    pub fn replay<'a, I>(&mut self, bars: I) -> SimResult<Trade>
    where
        I: IntoIterator<Item = &'a Candle>,
    {
        self.open_position()?;

        let mut last: Option<&Candle> = None;
        for bar in bars {
            if let BarOutcome::Closed(trade) = self.on_bar(bar)? {
                return Ok(trade);
            }
            last = Some(bar);
        }

        let bar = last.ok_or_else(|| SimError::NoData("replay needs at least one bar".into()))?;
        self.force_close(bar.close, bar.close_time, ExitReason::BacktestEnd)
    }

    fn open_position(&self) -> SimResult<&Position> {
        self.position().ok_or(SimError::PositionClosed)
    }

    fn close_with(&mut self, fill: FillResult, reason: ExitReason) -> SimResult<Trade> {
        let price = fill.fill_price.ok_or(SimError::NotFilled)?;
        let position = self.open_position()?.clone();
        let trade = position.close(TradeExit {
            price,
            time: fill.fill_time,
            fee: fill.fee,
            slippage: fill.slippage,
            reason,
        });
        self.state = SimState::Closed(trade.clone());
        Ok(trade)
    }
}

fn stop_touched(side: Side, bar: &Candle, stop: Price) -> bool {
    match side {
        Side::Long => bar.low <= stop,
        Side::Short => bar.high >= stop,
    }
}

fn stop_gapped(side: Side, open: Price, stop: Price) -> bool {
    match side {
        Side::Long => open <= stop,
        Side::Short => open >= stop,
    }
}

fn target_touched(side: Side, bar: &Candle, target: Price) -> bool {
    match side {
        Side::Long => bar.high >= target,
        Side::Short => bar.low <= target,
    }
}

fn target_gapped(side: Side, open: Price, target: Price) -> bool {
    match side {
        Side::Long => open >= target,
        Side::Short => open <= target,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, SlippageModel};
    use rust_decimal_macros::dec;
    use warden_domain::StopAdjustmentReason;

    fn price(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        let now = Utc::now();
        Candle::new(
            Symbol::from_pair("ETHUSDTM").unwrap(),
            price(open),
            price(high),
            price(low),
            price(close),
            dec!(100),
            now,
            now,
        )
        .unwrap()
    }

    fn frictionless() -> ExecutionSimulator {
        ExecutionSimulator::new(SimConfig {
            slippage_model: SlippageModel::None,
            take_profit_slippage_percent: dec!(0),
            ..SimConfig::default()
        })
        .unwrap()
    }

    fn trailing() -> TrailingConfig {
        TrailingConfig {
            step_percent: dec!(8),
            move_percent: dec!(0.1),
            break_even_buffer: dec!(0),
            activation_roi: dec!(10),
        }
    }

    fn entry_fill() -> FillResult {
        FillResult {
            filled: true,
            fill_price: Some(price(dec!(2000))),
            fill_time: Utc::now(),
            fee: dec!(2.4),
            slippage: dec!(0),
            liquidity: Liquidity::Taker,
        }
    }

    /// 100x, 9% ROI risk (stop 1998.2 long), 50% ROI reward (target 2010 long)
    fn simulator(side: Side) -> PositionSimulator {
        let order = EntryOrder {
            symbol: Symbol::from_pair("ETHUSDTM").unwrap(),
            side,
            size: Quantity::new(dec!(2)).unwrap(),
            leverage: Leverage::from_u32(100).unwrap(),
            roi_risk: dec!(9),
            roi_reward: dec!(50),
        };
        PositionSimulator::open(frictionless(), trailing(), order, &entry_fill()).unwrap()
    }

    #[test]
    fn test_open_derives_levels() {
        let sim = simulator(Side::Long);
        let position = sim.position().unwrap();

        assert_eq!(position.stop_loss_price.as_decimal(), dec!(1998.2));
        assert_eq!(position.take_profit_price.unwrap().as_decimal(), dec!(2010));
        assert_eq!(position.fees_paid, dec!(2.4));
    }

    #[test]
    fn test_open_rejects_unfilled_entry() {
        let order = EntryOrder {
            symbol: Symbol::from_pair("ETHUSDTM").unwrap(),
            side: Side::Long,
            size: Quantity::new(dec!(1)).unwrap(),
            leverage: Leverage::from_u32(10).unwrap(),
            roi_risk: dec!(9),
            roi_reward: dec!(50),
        };
        let fill = FillResult::no_fill(Utc::now(), Liquidity::Maker);

        let result = PositionSimulator::open(frictionless(), trailing(), order, &fill);
        assert!(matches!(result, Err(SimError::NotFilled)));
    }

    #[test]
    fn test_stop_loss_hit_closes_at_stop() {
        let mut sim = simulator(Side::Long);

        let outcome = sim.on_bar(&bar(dec!(2000), dec!(2001), dec!(1997), dec!(1999))).unwrap();
        let BarOutcome::Closed(trade) = outcome else {
            panic!("expected close");
        };

        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert_eq!(trade.exit_price.as_decimal(), dec!(1998.2));
        assert!(!sim.is_open());
    }

    #[test]
    fn test_gap_through_stop_fills_at_open() {
        let mut sim = simulator(Side::Long);

        let outcome = sim.on_bar(&bar(dec!(1995), dec!(1996), dec!(1990), dec!(1992))).unwrap();
        let BarOutcome::Closed(trade) = outcome else {
            panic!("expected close");
        };
        assert_eq!(trade.exit_price.as_decimal(), dec!(1995));
    }

    #[test]
    fn test_stop_wins_when_bar_touches_both() {
        let mut sim = simulator(Side::Short);
        // Short stop 2001.8, target 1990
        let outcome = sim.on_bar(&bar(dec!(2000), dec!(2002), dec!(1989), dec!(1995))).unwrap();
        let BarOutcome::Closed(trade) = outcome else {
            panic!("expected close");
        };
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_take_profit_hit() {
        let mut sim = simulator(Side::Short);

        let outcome = sim.on_bar(&bar(dec!(1995), dec!(1996), dec!(1989), dec!(1992))).unwrap();
        let BarOutcome::Closed(trade) = outcome else {
            panic!("expected close");
        };
        assert_eq!(trade.exit_reason, ExitReason::TakeProfit);
        assert_eq!(trade.exit_price.as_decimal(), dec!(1990));
        assert!(trade.gross_pnl > Decimal::ZERO);
    }

    #[test]
    fn test_trailing_moves_stop_and_holds() {
        let mut sim = simulator(Side::Long);

        // Close 2002.5 = 12.5% ROI: one trail step, past the 12% break-even
        let outcome = sim.on_bar(&bar(dec!(2000), dec!(2003), dec!(1999), dec!(2002.5))).unwrap();
        let BarOutcome::Held { adjustment, .. } = outcome else {
            panic!("expected hold");
        };

        // Trailed stop already sits above entry, so it wins over break-even
        let adjustment = adjustment.unwrap();
        assert_eq!(adjustment.reason, StopAdjustmentReason::Trailed);
        assert_eq!(sim.position().unwrap().stop_loss_price.as_decimal(), dec!(2000.1982));
        assert_eq!(sim.position().unwrap().last_trailed_roi, dec!(8));
        assert!(sim.position().unwrap().break_even_armed);
    }

    #[test]
    fn test_replay_force_closes_at_end() {
        let mut sim = simulator(Side::Long);
        let bars = vec![
            bar(dec!(2000), dec!(2001), dec!(1999), dec!(2000.5)),
            bar(dec!(2000.5), dec!(2001), dec!(1999), dec!(2001)),
        ];

        let trade = sim.replay(&bars).unwrap();
        assert_eq!(trade.exit_reason, ExitReason::BacktestEnd);
        assert_eq!(trade.exit_price.as_decimal(), dec!(2001));
    }

    #[test]
    fn test_closed_simulator_rejects_operations() {
        let mut sim = simulator(Side::Long);
        sim.force_close(price(dec!(2000)), Utc::now(), ExitReason::Forced).unwrap();

        assert!(matches!(
            sim.on_bar(&bar(dec!(2000), dec!(2001), dec!(1999), dec!(2000))),
            Err(SimError::PositionClosed)
        ));
        assert!(sim.force_close(price(dec!(2000)), Utc::now(), ExitReason::Forced).is_err());
        assert_eq!(sim.trade().unwrap().exit_reason, ExitReason::Forced);
    }

    #[test]
    fn test_replay_with_no_bars_is_error() {
        let mut sim = simulator(Side::Long);
        let bars: Vec<Candle> = Vec::new();
        assert!(matches!(sim.replay(&bars), Err(SimError::NoData(_))));
    }
}
