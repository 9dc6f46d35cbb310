//! Stop replacement coordinator.
//!
//! Owns one [`StopOrderStateMachine`] per tracked symbol and adds what a
//! single machine does not know about: retrying transient exchange failures
//! with exponential backoff, and closing the position at market once the
//! retry budget is gone.
//!
//! # Escalation
//!
//! ```text
//! transient failure ──► backoff ──► retry ... ──► retry budget exceeded
//!                                                       │
//!                                                       ▼
//!                                        reduce-only market close
//!                                         │ ok                 │ failed
//!                                         ▼                    ▼
//!                              EmergencyCloseExecuted   EmergencyCloseFailed
//! ```
//!
//! A position is closed at most once: concurrent callers that reach the
//! escalation share the first close.
//!
//! Every loss of protection is also broadcast as a [`ProtectionAlert`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, OnceCell};
use tracing::{error, info, warn};

use warden_domain::{Price, Symbol};

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangePort, OrderAck, StopOrderTemplate};
use crate::state_machine::{
    ProtectionState, SnapshotSink, StopOrderStateMachine, StopStateSnapshot, UpdateOutcome,
};

const ALERT_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Retry policy
// =============================================================================

/// Retry budget and backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Failures tolerated before the position is closed
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// `base_delay × 2^(attempt−1)` capped at `max_delay`, but never shorter
    /// than an exchange-provided `retry_after`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        match retry_after {
            Some(wait) => backoff.max(wait),
            None => backoff,
        }
    }
}

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertKind {
    /// Placement failed; the desired stop is not on the book
    ProtectionLost { retry_count: u32 },
    /// Retry budget exhausted
    Critical,
    EmergencyCloseExecuted { order_id: String },
    /// Position may be open without a stop
    EmergencyCloseFailed { reason: String },
}

/// Human-facing notification about a position's protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionAlert {
    pub symbol: Symbol,
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Result of [`StopReplaceCoordinator::replace_stop_order`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceOutcome {
    /// An in-flight replacement will apply the price
    Queued,
    Applied {
        order_id: String,
        /// Placement attempts made by this call
        attempts: u32,
        stale_order_ids: Vec<String>,
    },
    /// Another caller restored protection while this one was backing off
    Superseded { order_id: String },
}

struct TrackedPosition {
    machine: StopOrderStateMachine,
    template: StopOrderTemplate,
    /// Set by the first successful emergency close
    emergency: OnceCell<OrderAck>,
}

/// Per-symbol stop replacement with retry and emergency close.
pub struct StopReplaceCoordinator<E> {
    exchange: Arc<E>,
    retry: RetryConfig,
    positions: RwLock<HashMap<String, Arc<TrackedPosition>>>,
    alerts: broadcast::Sender<ProtectionAlert>,
    sink: Option<Arc<dyn SnapshotSink>>,
}

impl<E: ExchangePort> StopReplaceCoordinator<E> {
    pub fn new(exchange: Arc<E>, retry: RetryConfig) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            exchange,
            retry,
            positions: RwLock::new(HashMap::new()),
            alerts,
            sink: None,
        }
    }

    /// Persist each placement attempt to `sink` before it is sent.
    pub fn with_sink(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    /// Receive every alert raised after this call.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<ProtectionAlert> {
        self.alerts.subscribe()
    }

    /// Start tracking a position, optionally from a persisted snapshot.
    ///
    /// Returns the machine's state after restore.
    pub fn track(
        &self,
        template: StopOrderTemplate,
        snapshot: Option<StopStateSnapshot>,
    ) -> ExecResult<ProtectionState> {
        let key = template.symbol.as_pair();

        if let Some(snapshot) = &snapshot {
            if snapshot.symbol != template.symbol {
                return Err(ExecError::InvalidState(format!(
                    "snapshot for {} cannot restore {}",
                    snapshot.symbol, template.symbol
                )));
            }
        }

        let mut positions = self.positions.write().unwrap_or_else(PoisonError::into_inner);
        if positions.contains_key(&key) {
            return Err(ExecError::InvalidState(format!("{} is already tracked", key)));
        }

        let machine = match snapshot {
            Some(snapshot) => StopOrderStateMachine::restore(snapshot, self.retry.max_retries),
            None => StopOrderStateMachine::new(template.symbol.clone(), self.retry.max_retries),
        };
        let state = machine.state();
        info!(symbol = %key, state = %state, "Tracking position");

        positions.insert(
            key,
            Arc::new(TrackedPosition {
                machine,
                template,
                emergency: OnceCell::new(),
            }),
        );
        Ok(state)
    }

    /// Stop tracking a symbol, returning its final snapshot.
    pub fn untrack(&self, symbol: &Symbol) -> Option<StopStateSnapshot> {
        let removed = self
            .positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&symbol.as_pair());

        removed.map(|tracked| {
            info!(symbol = %symbol, "Untracked position");
            tracked.machine.snapshot()
        })
    }

    pub fn is_tracked(&self, symbol: &Symbol) -> bool {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&symbol.as_pair())
    }

    pub fn state(&self, symbol: &Symbol) -> Option<ProtectionState> {
        self.get(symbol).ok().map(|tracked| tracked.machine.state())
    }

    pub fn snapshot(&self, symbol: &Symbol) -> Option<StopStateSnapshot> {
        self.get(symbol).ok().map(|tracked| tracked.machine.snapshot())
    }

    /// Snapshots of every tracked position.
    pub fn snapshots(&self) -> Vec<StopStateSnapshot> {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|tracked| tracked.machine.snapshot())
            .collect()
    }

    /// Move the protective stop of `symbol` to `price`.
    ///
    /// # Errors
    ///
    /// - `ExecError::NotTracked` for an unknown symbol
    /// - Non-retryable placement errors, unchanged
    /// - `ExecError::EmergencyCloseExecuted` once the retry budget is
    ///   exceeded and the position was closed at market
    /// - `ExecError::EmergencyCloseFailed` if that close failed too
    pub async fn replace_stop_order(
        &self,
        symbol: &Symbol,
        price: Price,
    ) -> ExecResult<ReplaceOutcome> {
        let tracked = self.get(symbol)?;
        let mut price = price;
        let mut attempt: u32 = 1;

        loop {
            let result = tracked
                .machine
                .update_stop_with(
                    self.exchange.as_ref(),
                    price,
                    &tracked.template,
                    self.sink.as_deref(),
                )
                .await;

            let error = match result {
                Ok(UpdateOutcome::Queued) => return Ok(ReplaceOutcome::Queued),
                Ok(UpdateOutcome::Applied {
                    order_id,
                    stale_order_ids,
                }) => {
                    info!(
                        symbol = %symbol,
                        order_id = %order_id,
                        price = %price,
                        attempt,
                        "Stop order replaced"
                    );
                    return Ok(ReplaceOutcome::Applied {
                        order_id,
                        attempts: attempt,
                        stale_order_ids,
                    });
                },
                Err(e) => e,
            };

            match tracked.machine.state() {
                ProtectionState::Critical => {
                    // InvalidState means another caller already went critical
                    if !matches!(error, ExecError::InvalidState(_)) {
                        self.raise(
                            symbol,
                            AlertKind::Critical,
                            format!("retry budget exhausted: {}", error),
                        );
                    }
                    return Err(self.escalate(symbol, &tracked, &error).await);
                },
                ProtectionState::Unprotected => {
                    let retry_count = tracked.machine.retry_count();
                    self.raise(
                        symbol,
                        AlertKind::ProtectionLost { retry_count },
                        format!("stop placement failed: {}", error),
                    );
                },
                // Another caller moved the machine on after this failure
                ProtectionState::Protected | ProtectionState::Updating => {},
            }

            if !error.is_retryable() {
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt, error.retry_after());
            warn!(
                symbol = %symbol,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying stop replacement"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;

            if tracked.machine.state() == ProtectionState::Protected {
                if let Some(order_id) = tracked.machine.current_order_id() {
                    info!(symbol = %symbol, order_id = %order_id, "Stop restored by another caller");
                    return Ok(ReplaceOutcome::Superseded { order_id });
                }
            }
            price = tracked.machine.desired_stop_price().unwrap_or(price);
        }
    }

    /// Re-drive a position restored in `Unprotected` or `Critical`.
    ///
    /// Uses the persisted desired price, or `fallback` when none was
    /// recorded. Returns `None` if the position needs nothing.
    pub async fn recover(
        &self,
        symbol: &Symbol,
        fallback: Price,
    ) -> ExecResult<Option<ReplaceOutcome>> {
        let tracked = self.get(symbol)?;

        match tracked.machine.state() {
            ProtectionState::Protected | ProtectionState::Updating => Ok(None),
            ProtectionState::Critical => {
                warn!(symbol = %symbol, "Recovered position is critical");
                let cause = ExecError::InvalidState(format!("{} restored as critical", symbol));
                Err(self.escalate(symbol, &tracked, &cause).await)
            },
            ProtectionState::Unprotected => {
                let price = tracked.machine.desired_stop_price().unwrap_or(fallback);
                warn!(symbol = %symbol, price = %price, "Re-driving unprotected position");
                self.replace_stop_order(symbol, price).await.map(Some)
            },
        }
    }

    /// Close the position at market, bypassing the stop path.
    ///
    /// On success the symbol is no longer tracked. A close already in
    /// progress for the symbol is joined, not repeated.
    pub async fn emergency_close(&self, symbol: &Symbol) -> ExecResult<OrderAck> {
        let tracked = self.get(symbol)?;
        tracked
            .emergency
            .get_or_try_init(|| self.close_at_market(symbol, &tracked))
            .await
            .cloned()
    }

    /// Leave `Critical` after a human resolved the position.
    pub fn clear_critical(&self, symbol: &Symbol) -> ExecResult<()> {
        self.get(symbol)?.machine.clear_critical()?;
        info!(symbol = %symbol, "Critical state cleared");
        Ok(())
    }

    fn get(&self, symbol: &Symbol) -> ExecResult<Arc<TrackedPosition>> {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&symbol.as_pair())
            .cloned()
            .ok_or_else(|| ExecError::NotTracked(symbol.as_pair()))
    }

    async fn escalate(
        &self,
        symbol: &Symbol,
        tracked: &TrackedPosition,
        cause: &ExecError,
    ) -> ExecError {
        error!(symbol = %symbol, cause = %cause, "Stop protection lost; closing position at market");

        let close = tracked
            .emergency
            .get_or_try_init(|| self.close_at_market(symbol, tracked))
            .await;

        match close {
            Ok(ack) => ExecError::EmergencyCloseExecuted {
                symbol: symbol.as_pair(),
                order_id: ack.order_id.clone(),
            },
            Err(e) => e,
        }
    }

    async fn close_at_market(
        &self,
        symbol: &Symbol,
        tracked: &TrackedPosition,
    ) -> ExecResult<OrderAck> {
        let params = tracked.template.emergency_close_params();

        let ack = match self.exchange.place_order(&params).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(symbol = %symbol, error = %e, "FATAL: emergency close failed");
                self.raise(
                    symbol,
                    AlertKind::EmergencyCloseFailed {
                        reason: e.to_string(),
                    },
                    "emergency close failed; position may be unprotected".to_string(),
                );
                return Err(ExecError::EmergencyCloseFailed {
                    symbol: symbol.as_pair(),
                    reason: e.to_string(),
                });
            },
        };

        error!(symbol = %symbol, order_id = %ack.order_id, "Emergency close executed");

        // The reduce-only stop can no longer fill, but should not linger
        if let Some(stop_id) = tracked.machine.current_order_id() {
            if let Err(e) = self.exchange.cancel_stop_order(&stop_id).await {
                warn!(symbol = %symbol, order_id = %stop_id, error = %e, "Failed to cancel stale stop");
            }
        }

        self.untrack(symbol);
        self.raise(
            symbol,
            AlertKind::EmergencyCloseExecuted {
                order_id: ack.order_id.clone(),
            },
            format!("position closed at market by order {}", ack.order_id),
        );

        Ok(ack)
    }

    fn raise(&self, symbol: &Symbol, kind: AlertKind, message: String) {
        let alert = ProtectionAlert {
            symbol: symbol.clone(),
            kind,
            message,
            raised_at: Utc::now(),
        };
        // No subscribers is fine
        let _ = self.alerts.send(alert);
    }
}

// =============================================================================
// Tests
// =============================================================================
