//! Warden Simulation Layer
//!
//! Deterministic fill and position simulation for backtesting. Shares only
//! the pure math and trailing policy with the live path.

#![warn(clippy::all)]

pub mod backtest;
pub mod config;
pub mod error;
pub mod execution;
pub mod position;
pub mod slippage;

pub use backtest::{BacktestParams, Backtester, EntrySignal, PositionSizing};
pub use config::{FillModel, SimConfig, SlippageModel};
pub use error::{SimError, SimResult};
pub use execution::{ExecutionSimulator, FillResult, Liquidity, MarkToMarket};
pub use position::{BarOutcome, EntryOrder, PositionSimulator, SimState};
