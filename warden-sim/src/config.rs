//! Simulation configuration.
//!
//! Serde (de)serializable so backtests can be driven from JSON files.
//! Missing fields fall back to the defaults below.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// How entry orders are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillModel {
    /// Immediate fill at mid plus adverse slippage.
    #[default]
    Taker,
    /// Resting limit order that fills with a fixed probability when touched.
    ProbabilisticLimit,
}

/// Slippage model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    /// No slippage.
    None,
    /// Constant `slippage_percent`.
    #[default]
    Fixed,
    /// Fraction of the quoted spread, fixed when no quote is known.
    SpreadBased,
    /// `slippage_percent` scaled by the bar's range.
    VolScaled,
}

/// Execution simulation parameters.
///
/// Percent fields are percents of price (`0.02` = 0.02%). Fee fields are
/// fractions of notional (`0.0006` = 0.06%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub fill_model: FillModel,
    pub slippage_model: SlippageModel,
    pub slippage_percent: Decimal,
    pub spread_fraction: Decimal,
    pub vol_coefficient: Decimal,
    pub taker_fee: Decimal,
    pub maker_fee: Decimal,
    /// Placeholder estimate, tune against real fill statistics.
    pub limit_fill_probability: Decimal,
    pub maker_slippage_factor: Decimal,
    pub stop_slippage_multiplier: Decimal,
    pub take_profit_slippage_percent: Decimal,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            fill_model: FillModel::Taker,
            slippage_model: SlippageModel::Fixed,
            slippage_percent: dec!(0.02),
            spread_fraction: dec!(0.5),
            vol_coefficient: dec!(0.1),
            taker_fee: dec!(0.0006),
            maker_fee: dec!(0.0002),
            limit_fill_probability: dec!(0.7),
            maker_slippage_factor: dec!(0.25),
            stop_slippage_multiplier: dec!(2),
            take_profit_slippage_percent: dec!(0.005),
        }
    }
}

impl SimConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges.
    pub fn validate(&self) -> SimResult<()> {
        let non_negative = [
            ("slippage_percent", self.slippage_percent),
            ("spread_fraction", self.spread_fraction),
            ("vol_coefficient", self.vol_coefficient),
            ("taker_fee", self.taker_fee),
            ("maker_fee", self.maker_fee),
            ("maker_slippage_factor", self.maker_slippage_factor),
            ("stop_slippage_multiplier", self.stop_slippage_multiplier),
            ("take_profit_slippage_percent", self.take_profit_slippage_percent),
        ];
        for (name, value) in non_negative {
            if value < Decimal::ZERO {
                return Err(SimError::InvalidConfig(format!("{} must be >= 0, got {}", name, value)));
            }
        }

        if self.limit_fill_probability < Decimal::ZERO || self.limit_fill_probability > Decimal::ONE
        {
            return Err(SimError::InvalidConfig(format!(
                "limit_fill_probability must be in [0, 1], got {}",
                self.limit_fill_probability
            )));
        }

        Ok(())
    }
}
