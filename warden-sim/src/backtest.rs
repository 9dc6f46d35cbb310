//! Single-symbol backtest driver.
//!
//! Consumes bars and externally generated entry signals, one position at a
//! time. A signal on bar `i` is attempted from bar `i + 1` onward (limit at
//! the signal bar's close) until it fills; unfilled probabilistic entries
//! retry on the next bar. Signals arriving while a position is open are
//! ignored.
//!
//! Entries are sized either at a fixed quantity or as a share of the
//! account balance, which compounds with each closed trade's net PnL.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_domain::{
    math, Candle, ExitReason, Leverage, Price, Quantity, Side, Symbol, Trade, TrailingConfig,
};

use crate::error::{SimError, SimResult};
use crate::execution::ExecutionSimulator;
use crate::position::{BarOutcome, EntryOrder, PositionSimulator};

/// Entry trigger from a signal generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub bar_index: usize,
    pub side: Side,
}

/// How each entry is sized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PositionSizing {
    /// Same quantity for every entry
    Fixed { size: Quantity },
    /// `position_percent` of the balance as margin, whole lots, at least one
    PercentOfBalance {
        /// Starting balance in quote currency
        balance: Decimal,
        position_percent: Decimal,
        lot_size: Decimal,
    },
}

impl PositionSizing {
    /// Size of an entry at `entry` with `balance` available.
    pub fn size_at(&self, balance: Decimal, entry: Price, leverage: Leverage) -> SimResult<Quantity> {
        match *self {
            PositionSizing::Fixed { size } => Ok(size),
            PositionSizing::PercentOfBalance {
                position_percent,
                lot_size,
                ..
            } => Ok(math::position_size(balance, position_percent, entry, leverage, lot_size)?),
        }
    }

    fn starting_balance(&self) -> Decimal {
        match *self {
            PositionSizing::Fixed { .. } => Decimal::ZERO,
            PositionSizing::PercentOfBalance { balance, .. } => balance,
        }
    }

    fn compounds(&self) -> bool {
        matches!(self, PositionSizing::PercentOfBalance { .. })
    }
}

/// Sizing and risk parameters applied to every entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub sizing: PositionSizing,
    pub leverage: Leverage,
    pub roi_risk: Decimal,
    pub roi_reward: Decimal,
    pub seed: u64,
}

/// Runs entries, exits and trailing over a bar series.
#[derive(Debug, Clone)]
pub struct Backtester {
    execution: ExecutionSimulator,
    trailing: TrailingConfig,
    params: BacktestParams,
}

struct PendingEntry {
    side: Side,
    limit: Price,
    signal_index: usize,
}

impl Backtester {
    pub fn new(
        execution: ExecutionSimulator,
        trailing: TrailingConfig,
        params: BacktestParams,
    ) -> SimResult<Self> {
        trailing.validate()?;
        Ok(Self {
            execution,
            trailing,
            params,
        })
    }

    /// Run the backtest and return closed trades in order.
    pub fn run(
        &self,
        symbol: &Symbol,
        bars: &[Candle],
        signals: &[EntrySignal],
    ) -> SimResult<Vec<Trade>> {
        let last_bar = bars.last().ok_or_else(|| SimError::NoData("empty bar series".into()))?;

        let signals: BTreeMap<usize, Side> =
            signals.iter().map(|s| (s.bar_index, s.side)).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        let mut trades = Vec::new();
        let mut open: Option<PositionSimulator> = None;
        let mut pending: Option<PendingEntry> = None;
        let mut balance = self.params.sizing.starting_balance();

        for (index, bar) in bars.iter().enumerate() {
            if let Some(sim) = open.as_mut() {
                if let BarOutcome::Closed(trade) = sim.on_bar(bar)? {
                    balance += trade.net_pnl;
                    trades.push(trade);
                    open = None;
                }
                continue;
            }

            if self.params.sizing.compounds() && balance <= Decimal::ZERO {
                debug!(bar = index, balance = %balance, "Balance exhausted; no further entries");
                break;
            }

            if let Some(entry) = pending.as_ref().filter(|p| p.signal_index < index) {
                let size = self.params.sizing.size_at(balance, entry.limit, self.params.leverage)?;
                let fill = self.execution.simulate_entry(
                    entry.side,
                    size,
                    bar.open,
                    Some(entry.limit),
                    bar,
                    &mut rng,
                )?;
                if fill.filled {
                    let order = EntryOrder {
                        symbol: symbol.clone(),
                        side: entry.side,
                        size,
                        leverage: self.params.leverage,
                        roi_risk: self.params.roi_risk,
                        roi_reward: self.params.roi_reward,
                    };
                    open = Some(PositionSimulator::open(
                        self.execution.clone(),
                        self.trailing.clone(),
                        order,
                        &fill,
                    )?);
                    pending = None;
                    continue;
                }
            }

            if let Some(side) = signals.get(&index) {
                pending = Some(PendingEntry {
                    side: *side,
                    limit: bar.close,
                    signal_index: index,
                });
            }
        }

        if let Some(mut sim) = open {
            trades.push(sim.force_close(last_bar.close, last_bar.close_time, ExitReason::BacktestEnd)?);
        }

        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FillModel, SimConfig};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn price(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    /// Gentle uptrend with a pullback
    fn bars() -> Vec<Candle> {
        let closes = [
            dec!(2000), dec!(2001), dec!(2002), dec!(2001.5), dec!(2003), dec!(2004),
            dec!(2003), dec!(2005), dec!(2006), dec!(2004), dec!(2007), dec!(2008),
        ];
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let open = if i == 0 { *close } else { closes[i - 1] };
                let high = open.max(*close) + dec!(0.5);
                let low = open.min(*close) - dec!(0.5);
                let open_time = start + Duration::minutes(i as i64);
                Candle::new(
                    Symbol::from_pair("ETHUSDTM").unwrap(),
                    price(open),
                    price(high),
                    price(low),
                    price(*close),
                    dec!(10),
                    open_time,
                    open_time + Duration::minutes(1),
                )
                .unwrap()
            })
            .collect()
    }

    fn backtester(fill_model: FillModel, seed: u64) -> Backtester {
        let sizing = PositionSizing::Fixed {
            size: Quantity::new(dec!(1)).unwrap(),
        };
        backtester_sized(fill_model, seed, sizing)
    }

    fn backtester_sized(fill_model: FillModel, seed: u64, sizing: PositionSizing) -> Backtester {
        let execution = ExecutionSimulator::new(SimConfig {
            fill_model,
            ..SimConfig::default()
        })
        .unwrap();
        let params = BacktestParams {
            sizing,
            leverage: Leverage::from_u32(50).unwrap(),
            roi_risk: dec!(20),
            roi_reward: dec!(40),
            seed,
        };
        Backtester::new(execution, TrailingConfig::default(), params).unwrap()
    }

    fn signals() -> Vec<EntrySignal> {
        vec![
            EntrySignal { bar_index: 0, side: Side::Long },
            EntrySignal { bar_index: 6, side: Side::Long },
        ]
    }

    #[test]
    fn test_identical_seeds_reproduce_trades() {
        let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
        let bars = bars();

        let strip = |trades: Vec<Trade>| {
            trades
                .into_iter()
                .map(|t| (t.entry_price, t.exit_price, t.net_pnl, t.exit_reason))
                .collect::<Vec<_>>()
        };

        let first = backtester(FillModel::ProbabilisticLimit, 11).run(&symbol, &bars, &signals()).unwrap();
        let second = backtester(FillModel::ProbabilisticLimit, 11).run(&symbol, &bars, &signals()).unwrap();

        assert_eq!(strip(first), strip(second));
    }

    #[test]
    fn test_taker_backtest_opens_and_closes() {
        let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
        let trades = backtester(FillModel::Taker, 1).run(&symbol, &bars(), &signals()).unwrap();

        assert!(!trades.is_empty());
        for trade in &trades {
            assert!(trade.net_pnl <= trade.gross_pnl);
        }
        let last = trades.last().unwrap();
        assert!(matches!(
            last.exit_reason,
            ExitReason::BacktestEnd | ExitReason::TakeProfit | ExitReason::StopLoss
        ));
    }

    #[test]
    fn test_empty_bars_is_error() {
        let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
        let result = backtester(FillModel::Taker, 1).run(&symbol, &[], &signals());
        assert!(matches!(result, Err(SimError::NoData(_))));
    }
    #[test]
    fn test_percent_of_balance_sizing() {
        let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
        let sizing = PositionSizing::PercentOfBalance {
            balance: dec!(1000),
            position_percent: dec!(10),
            lot_size: dec!(0.01),
        };

        let trades = backtester_sized(FillModel::Taker, 1, sizing).run(&symbol, &bars(), &signals()).unwrap();

        // 100 margin × 50x = 5000 notional at the 2000 signal close
        assert_eq!(trades[0].size.as_decimal(), dec!(2.50));
        for trade in &trades {
            assert_eq!((trade.size.as_decimal() / dec!(0.01)).fract(), Decimal::ZERO);
        }
    }

    #[test]
    fn test_sizing_rejects_bad_percent() {
        let sizing = PositionSizing::PercentOfBalance {
            balance: dec!(1000),
            position_percent: dec!(0),
            lot_size: dec!(0.01),
        };

        let result = sizing.size_at(dec!(1000), price(dec!(2000)), Leverage::from_u32(10).unwrap());
        assert!(matches!(result, Err(SimError::Domain(_))));
    }

    #[test]
    fn test_exhausted_balance_stops_entries() {
        let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
        let sizing = PositionSizing::PercentOfBalance {
            balance: dec!(0),
            position_percent: dec!(10),
            lot_size: dec!(0.01),
        };

        let trades = backtester_sized(FillModel::Taker, 1, sizing).run(&symbol, &bars(), &signals()).unwrap();
        assert!(trades.is_empty());
    }
}
