//! Protective stop order state machine.
//!
//! One machine owns the resident stop order of one position. Replacement is
//! place-then-cancel: the new stop is on the book before the previous one is
//! removed, so a failure at any point leaves at least one stop resting.
//!
//! ```text
//!            update_stop             place ok
//! Protected ───────────► Updating ───────────► Protected
//!     ▲                     │ place failed
//!     │ place ok            ▼
//!     └──────────────── Unprotected ──(retry budget exceeded)──► Critical
//! ```
//!
//! While `Updating`, further requests land in a single pending slot and the
//! task already talking to the exchange picks up the latest one when it
//! finishes. The bookkeeping mutex is never held across an `.await`.
//!
//! Every placement carries a client order ID. A retry at the same price
//! reuses it, so a stop that reached the book before its ack was lost is
//! found again rather than doubled. The attempt is handed to a
//! [`SnapshotSink`] before the request goes out.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use warden_domain::{Price, Symbol};

use crate::error::{ExecError, ExecResult};
use crate::ports::{new_client_oid, ExchangePort, StopOrderTemplate};

// =============================================================================
// State
// =============================================================================

/// Protection state of a single position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionState {
    /// Resident stop matches the last completed request
    Protected,
    /// A replacement is in flight
    Updating,
    /// Last placement failed; the desired stop is not on the book
    Unprotected,
    /// Retry budget exhausted; automated replacement refused
    Critical,
}

impl ProtectionState {
    pub fn is_protected(self) -> bool {
        matches!(self, ProtectionState::Protected | ProtectionState::Updating)
    }

    pub fn needs_attention(self) -> bool {
        matches!(self, ProtectionState::Unprotected | ProtectionState::Critical)
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtectionState::Protected => "protected",
            ProtectionState::Updating => "updating",
            ProtectionState::Unprotected => "unprotected",
            ProtectionState::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// A stop price requested while another replacement was in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingUpdate {
    pub price: Price,
    pub requested_at: DateTime<Utc>,
}

/// A stop placement that has been sent but not confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopPlacement {
    /// Requested stop price, before tick rounding
    pub stop_price: Price,
    pub client_oid: String,
}

/// Persistable view of a machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopStateSnapshot {
    pub symbol: Symbol,
    pub state: ProtectionState,
    /// Exchange ID of the resident stop order
    pub current_order_id: Option<String>,
    /// Price of the resident stop order
    pub current_stop_price: Option<Price>,
    /// Most recently requested stop price
    pub desired_stop_price: Option<Price>,
    /// Unconfirmed placement; a retry at the same price reuses its client oid
    #[serde(default)]
    pub last_attempt: Option<StopPlacement>,
    pub retry_count: u32,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for snapshots taken mid-update.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn persist(&self, snapshot: &StopStateSnapshot) -> ExecResult<()>;
}

/// Result of a call to [`StopOrderStateMachine::update_stop`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Another task is replacing the stop and will apply this price
    Queued,
    /// The stop was replaced
    Applied {
        /// Resident order after all queued updates were drained
        order_id: String,
        /// Previous orders whose cancel failed; they may still rest on the book
        stale_order_ids: Vec<String>,
    },
}

#[derive(Debug)]
struct Inner {
    state: ProtectionState,
    current_order_id: Option<String>,
    current_stop_price: Option<Price>,
    desired_stop_price: Option<Price>,
    last_attempt: Option<StopPlacement>,
    pending: Option<PendingUpdate>,
    retry_count: u32,
    updated_at: DateTime<Utc>,
}

// =============================================================================
// State machine
// =============================================================================

/// Owns the protective stop order of one position.
#[derive(Debug)]
pub struct StopOrderStateMachine {
    symbol: Symbol,
    max_retries: u32,
    inner: Mutex<Inner>,
}

impl StopOrderStateMachine {
    /// New machine in `Protected` with no resident order.
    pub fn new(symbol: Symbol, max_retries: u32) -> Self {
        Self {
            symbol,
            max_retries,
            inner: Mutex::new(Inner {
                state: ProtectionState::Protected,
                current_order_id: None,
                current_stop_price: None,
                desired_stop_price: None,
                last_attempt: None,
                pending: None,
                retry_count: 0,
                updated_at: Utc::now(),
            }),
        }
    }

    /// Rehydrate a machine from a persisted snapshot.
    ///
    /// An in-flight update cannot survive a restart, and a `Protected` record
    /// without an order proves nothing; both restore as `Unprotected`.
    pub fn restore(snapshot: StopStateSnapshot, max_retries: u32) -> Self {
        let state = match snapshot.state {
            ProtectionState::Updating => ProtectionState::Unprotected,
            ProtectionState::Protected if snapshot.current_order_id.is_none() => {
                ProtectionState::Unprotected
            },
            other => other,
        };

        if state != snapshot.state {
            debug!(
                symbol = %snapshot.symbol,
                persisted = %snapshot.state,
                restored = %state,
                "Restored stop state downgraded"
            );
        }

        Self {
            symbol: snapshot.symbol,
            max_retries,
            inner: Mutex::new(Inner {
                state,
                current_order_id: snapshot.current_order_id,
                current_stop_price: snapshot.current_stop_price,
                desired_stop_price: snapshot.desired_stop_price,
                last_attempt: snapshot.last_attempt,
                pending: None,
                retry_count: snapshot.retry_count,
                updated_at: snapshot.updated_at,
            }),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn state(&self) -> ProtectionState {
        self.lock().state
    }

    pub fn current_order_id(&self) -> Option<String> {
        self.lock().current_order_id.clone()
    }

    pub fn current_stop_price(&self) -> Option<Price> {
        self.lock().current_stop_price
    }

    pub fn desired_stop_price(&self) -> Option<Price> {
        self.lock().desired_stop_price
    }

    pub fn last_attempt(&self) -> Option<StopPlacement> {
        self.lock().last_attempt.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    pub fn pending(&self) -> Option<PendingUpdate> {
        self.lock().pending
    }

    pub fn is_protected(&self) -> bool {
        self.state().is_protected()
    }

    pub fn needs_attention(&self) -> bool {
        self.state().needs_attention()
    }

    pub fn snapshot(&self) -> StopStateSnapshot {
        let inner = self.lock();
        StopStateSnapshot {
            symbol: self.symbol.clone(),
            state: inner.state,
            current_order_id: inner.current_order_id.clone(),
            current_stop_price: inner.current_stop_price,
            desired_stop_price: inner.desired_stop_price,
            last_attempt: inner.last_attempt.clone(),
            retry_count: inner.retry_count,
            updated_at: inner.updated_at,
        }
    }

    /// Move the resident stop to `new_price`.
    ///
    /// Returns `Queued` without touching the exchange if a replacement is
    /// already in flight. Otherwise drives the exchange until no pending
    /// update remains.
    ///
    /// # Errors
    ///
    /// - `ExecError::InvalidState` in `Critical`
    /// - Any placement error; the machine is then `Unprotected` (or
    ///   `Critical` once `retry_count` exceeds `max_retries`)
    pub async fn update_stop<E: ExchangePort + ?Sized>(
        &self,
        exchange: &E,
        new_price: Price,
        template: &StopOrderTemplate,
    ) -> ExecResult<UpdateOutcome> {
        self.update_stop_with(exchange, new_price, template, None).await
    }

    /// [`update_stop`](Self::update_stop), persisting the `Updating`
    /// snapshot to `sink` before each placement.
    ///
    /// A failed persist is logged and the placement goes ahead.
    pub async fn update_stop_with<E: ExchangePort + ?Sized>(
        &self,
        exchange: &E,
        new_price: Price,
        template: &StopOrderTemplate,
        sink: Option<&dyn SnapshotSink>,
    ) -> ExecResult<UpdateOutcome> {
        {
            let mut inner = self.lock();
            match inner.state {
                ProtectionState::Critical => {
                    return Err(ExecError::InvalidState(format!(
                        "{} is critical; clear it before replacing the stop",
                        self.symbol
                    )));
                },
                ProtectionState::Updating => {
                    inner.pending = Some(PendingUpdate {
                        price: new_price,
                        requested_at: Utc::now(),
                    });
                    inner.desired_stop_price = Some(new_price);
                    debug!(symbol = %self.symbol, price = %new_price, "Stop update queued");
                    return Ok(UpdateOutcome::Queued);
                },
                ProtectionState::Protected | ProtectionState::Unprotected => {
                    inner.state = ProtectionState::Updating;
                    inner.desired_stop_price = Some(new_price);
                    inner.updated_at = Utc::now();
                },
            }
        }

        let mut price = new_price;
        let mut stale_order_ids = Vec::new();

        loop {
            let client_oid = self.begin_attempt(price);

            if let Some(sink) = sink {
                if let Err(e) = sink.persist(&self.snapshot()).await {
                    warn!(symbol = %self.symbol, error = %e, "Failed to persist stop state before placement");
                }
            }

            let params = match template.stop_params(price, &client_oid) {
                Ok(params) => params,
                Err(e) => return Err(self.record_failure(price, e)),
            };
            let sent_price = params.stop_price.unwrap_or(price);

            let ack = match exchange.place_stop_order(&params).await {
                Ok(ack) => ack,
                Err(e) => return Err(self.record_failure(price, e)),
            };

            let previous = {
                let mut inner = self.lock();
                inner.retry_count = 0;
                inner.current_stop_price = Some(sent_price);
                inner.last_attempt = None;
                inner.updated_at = Utc::now();
                inner.current_order_id.replace(ack.order_id.clone())
            };
            // A deduplicated retry can return the order we already hold
            let previous = previous.filter(|id| *id != ack.order_id);
            debug!(
                symbol = %self.symbol,
                order_id = %ack.order_id,
                client_oid = %client_oid,
                price = %sent_price,
                "Stop order placed"
            );

            if let Some(previous) = previous {
                match exchange.cancel_stop_order(&previous).await {
                    Ok(true) => {
                        debug!(symbol = %self.symbol, order_id = %previous, "Previous stop cancelled")
                    },
                    Ok(false) => {
                        debug!(symbol = %self.symbol, order_id = %previous, "Previous stop already gone")
                    },
                    Err(e) => {
                        warn!(
                            symbol = %self.symbol,
                            order_id = %previous,
                            error = %e,
                            "Failed to cancel previous stop; it may still rest on the book"
                        );
                        stale_order_ids.push(previous);
                    },
                }
            }

            let next = {
                let mut inner = self.lock();
                match inner.pending.take() {
                    Some(pending) => Some(pending.price),
                    None => {
                        inner.state = ProtectionState::Protected;
                        inner.updated_at = Utc::now();
                        None
                    },
                }
            };

            match next {
                Some(next_price) => price = next_price,
                None => {
                    return Ok(UpdateOutcome::Applied {
                        order_id: ack.order_id,
                        stale_order_ids,
                    });
                },
            }
        }
    }

    /// Leave `Critical` after a human resolved the position.
    pub fn clear_critical(&self) -> ExecResult<()> {
        let mut inner = self.lock();
        if inner.state != ProtectionState::Critical {
            return Err(ExecError::InvalidState(format!(
                "{} is {}, not critical",
                self.symbol, inner.state
            )));
        }
        inner.state = ProtectionState::Unprotected;
        inner.retry_count = 0;
        inner.updated_at = Utc::now();
        Ok(())
    }

    /// Client oid for a placement at `price`, reusing the unconfirmed one.
    fn begin_attempt(&self, price: Price) -> String {
        let mut inner = self.lock();
        if let Some(attempt) = inner.last_attempt.as_ref().filter(|a| a.stop_price == price) {
            return attempt.client_oid.clone();
        }
        let client_oid = new_client_oid();
        inner.last_attempt = Some(StopPlacement {
            stop_price: price,
            client_oid: client_oid.clone(),
        });
        client_oid
    }

    fn record_failure(&self, attempted: Price, error: ExecError) -> ExecError {
        let mut inner = self.lock();
        inner.retry_count += 1;
        // A queued request is newer than the one that just failed
        inner.desired_stop_price = Some(inner.pending.take().map_or(attempted, |p| p.price));
        inner.state = if inner.retry_count > self.max_retries {
            ProtectionState::Critical
        } else {
            ProtectionState::Unprotected
        };
        inner.updated_at = Utc::now();

        warn!(
            symbol = %self.symbol,
            price = %attempted,
            retry_count = inner.retry_count,
            state = %inner.state,
            error = %error,
            "Stop placement failed"
        );
        error
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Tests
// =============================================================================
