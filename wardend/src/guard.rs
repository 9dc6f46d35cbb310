//! Position guard: one task per protected position.
//!
//! The guard consumes price updates for its symbol and keeps the exchange
//! stop in step with the trailing policy:
//!
//! 1. Resting stop touched → the exchange stop filled; the position is flat
//! 2. Otherwise evaluate the trailing policy on the new ROI
//! 3. Stop moved → replace the exchange stop through the coordinator
//! 4. Protection lost on an earlier tick → re-drive it
//! 5. Persist position and stop state
//!
//! A guard ends when the position is flat, on a fatal protection failure,
//! when its price feed closes, or on cancellation.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use warden_domain::{
    evaluate_stop, is_stop_hit, math, ExitReason, Position, Price, Trade, TradeExit,
    TrailingConfig,
};
use warden_exec::{
    ExchangePort, ExecError, ExecResult, PriceUpdate, ProtectionState, ReplaceOutcome,
    StopReplaceCoordinator,
};
use warden_store::Store;

use crate::error::DaemonResult;

/// Why a guard stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardExit {
    /// Price crossed the stop; the exchange stop closed the position
    StopTriggered(Trade),
    /// Protection could not be restored; closed at market
    EmergencyClosed { order_id: String, trade: Trade },
    /// Emergency close failed; the position may be open without a stop
    Fatal(String),
    /// Price feed ended
    FeedClosed,
    /// Shutdown requested
    Cancelled,
}

/// Keeps one position's exchange stop aligned with the trailing policy.
pub struct PositionGuard<E: ExchangePort + 'static> {
    position: Position,
    coordinator: Arc<StopReplaceCoordinator<E>>,
    store: Arc<dyn Store>,
    trailing: TrailingConfig,
    cancel_token: CancellationToken,
    last_price: Option<Price>,
}

impl<E: ExchangePort + 'static> PositionGuard<E> {
    /// Create a guard for a position already tracked by `coordinator`.
    pub fn new(
        position: Position,
        coordinator: Arc<StopReplaceCoordinator<E>>,
        store: Arc<dyn Store>,
        trailing: TrailingConfig,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            position,
            coordinator,
            store,
            trailing,
            cancel_token,
            last_price: None,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Spawn the guard loop.
    pub fn spawn(self, prices: mpsc::Receiver<PriceUpdate>) -> JoinHandle<GuardExit> {
        tokio::spawn(self.run(prices))
    }

    async fn run(mut self, mut prices: mpsc::Receiver<PriceUpdate>) -> GuardExit {
        let symbol = self.position.symbol.clone();
        info!(
            symbol = %symbol,
            side = %self.position.side,
            entry = %self.position.entry_price,
            stop = %self.position.stop_loss_price,
            "Position guard started"
        );

        match self.protect().await {
            Ok(Some(exit)) => return exit,
            Ok(None) => {},
            Err(e) => error!(symbol = %symbol, error = %e, "Initial protection failed"),
        }

        let exit = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!(symbol = %symbol, "Position guard cancelled");
                    break GuardExit::Cancelled;
                }
                update = prices.recv() => {
                    let Some(update) = update else {
                        warn!(symbol = %symbol, "Price feed closed");
                        break GuardExit::FeedClosed;
                    };
                    if update.symbol != symbol {
                        continue;
                    }
                    match self.on_price(update.price).await {
                        Ok(Some(exit)) => break exit,
                        Ok(None) => {},
                        Err(e) => error!(symbol = %symbol, error = %e, "Error processing price update"),
                    }
                }
            }
        };

        info!(symbol = %symbol, exit = ?exit, "Position guard stopped");
        exit
    }

    /// Make sure a stop is resting before the first tick.
    ///
    /// A fresh machine has no order yet; a restored one may need its
    /// desired stop re-driven.
    pub async fn protect(&mut self) -> DaemonResult<Option<GuardExit>> {
        let symbol = self.position.symbol.clone();
        let stop = self.position.stop_loss_price;

        let result = match self.coordinator.snapshot(&symbol) {
            Some(snapshot)
                if snapshot.state == ProtectionState::Protected
                    && snapshot.current_order_id.is_none() =>
            {
                self.coordinator.replace_stop_order(&symbol, stop).await.map(Some)
            },
            Some(_) => self.coordinator.recover(&symbol, stop).await,
            None => Ok(None),
        };

        if let Some(exit) = self.handle_protection(result).await? {
            return Ok(Some(exit));
        }
        self.persist_stop().await?;
        Ok(None)
    }

    /// Process one price.
    pub async fn on_price(&mut self, price: Price) -> DaemonResult<Option<GuardExit>> {
        self.last_price = Some(price);
        let symbol = self.position.symbol.clone();

        let stop = self.resting_stop();
        if is_stop_hit(self.position.side, price, stop) {
            info!(symbol = %symbol, price = %price, stop = %stop, "Stop triggered");
            self.coordinator.untrack(&symbol);
            let trade = self.close(stop, ExitReason::StopLoss).await?;
            return Ok(Some(GuardExit::StopTriggered(trade)));
        }

        let adjustment = evaluate_stop(&self.position.trailing_input(price), &self.trailing)?;

        if adjustment.moved() {
            debug!(
                symbol = %symbol,
                from = %self.position.stop_loss_price,
                to = %adjustment.new_stop,
                reason = ?adjustment.reason,
                "Trailing stop moved"
            );
            let result = self.coordinator.replace_stop_order(&symbol, adjustment.new_stop).await;
            let applied = result.is_ok();

            if let Some(exit) = self.handle_protection(result.map(Some)).await? {
                return Ok(Some(exit));
            }
            if applied {
                self.position.apply_adjustment(&adjustment)?;
                self.store.save_position(&self.position).await?;
            }
        } else {
            let before = (self.position.last_trailed_roi, self.position.break_even_armed);
            self.position.apply_adjustment(&adjustment)?;
            if before != (self.position.last_trailed_roi, self.position.break_even_armed) {
                self.store.save_position(&self.position).await?;
            }

            if self.coordinator.state(&symbol).is_some_and(ProtectionState::needs_attention) {
                let result = self.coordinator.recover(&symbol, self.position.stop_loss_price).await;
                if let Some(exit) = self.handle_protection(result).await? {
                    return Ok(Some(exit));
                }
            }
        }

        self.persist_stop().await?;
        Ok(None)
    }

    /// Turn a coordinator result into a guard exit when the position is
    /// gone or beyond automated help.
    async fn handle_protection(
        &mut self,
        result: ExecResult<Option<ReplaceOutcome>>,
    ) -> DaemonResult<Option<GuardExit>> {
        let symbol = self.position.symbol.clone();

        match result {
            Ok(outcome) => {
                if let Some(outcome) = outcome {
                    debug!(symbol = %symbol, outcome = ?outcome, "Stop replacement finished");
                }
                Ok(None)
            },
            Err(ExecError::EmergencyCloseExecuted { order_id, .. }) => {
                let price = self.last_price.unwrap_or(self.position.stop_loss_price);
                let trade = self.close(price, ExitReason::Forced).await?;
                Ok(Some(GuardExit::EmergencyClosed { order_id, trade }))
            },
            Err(e) if e.is_fatal() => {
                error!(symbol = %symbol, error = %e, "Position left without protection; manual action required");
                self.persist_stop().await?;
                Ok(Some(GuardExit::Fatal(e.to_string())))
            },
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Stop replacement failed; will retry on next price");
                Ok(None)
            },
        }
    }

    /// Record the exit and forget the position.
    async fn close(&mut self, price: Price, reason: ExitReason) -> DaemonResult<Trade> {
        let symbol = self.position.symbol.clone();
        let fee = math::notional(self.position.size, price) * self.position.exit_fee_rate;

        let trade = self.position.clone().close(TradeExit {
            price,
            time: Utc::now(),
            fee,
            slippage: Decimal::ZERO,
            reason,
        });

        self.store.delete_position(&symbol).await?;
        self.store.delete(&symbol).await?;

        info!(
            symbol = %symbol,
            exit_price = %price,
            net_pnl = %trade.net_pnl,
            roi = %trade.roi_percent,
            reason = ?reason,
            "Position closed"
        );
        Ok(trade)
    }

    /// Trigger of the stop on the book: tick-rounded and possibly behind
    /// the policy stop after a failed replacement.
    fn resting_stop(&self) -> Price {
        self.coordinator
            .snapshot(&self.position.symbol)
            .and_then(|snapshot| snapshot.current_stop_price)
            .unwrap_or(self.position.stop_loss_price)
    }

    async fn persist_stop(&self) -> DaemonResult<()> {
        if let Some(snapshot) = self.coordinator.snapshot(&self.position.symbol) {
            self.store.save(&snapshot).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
