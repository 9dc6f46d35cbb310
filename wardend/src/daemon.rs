//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Stop replace coordinator (one state machine per position)
//! - Position guards (one task per position)
//! - Store (positions and stop state)
//! - Market data (price updates)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Restore guarded positions and their stop state from the store
//! 4. Main loop (alerts, finished guards)
//! 5. Graceful shutdown on Ctrl-C or cancellation

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use warden_domain::{Position, Symbol};
use warden_exec::{
    AlertKind, ExchangePort, MarketDataPort, ProtectionAlert, StopOrderTemplate,
    StopReplaceCoordinator, StopStateSnapshot, StubExchange, StubMarketData, ValidatedExchange,
};
use warden_store::{JsonFileStore, MemoryStore, Store, StoreSink};

use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::guard::{GuardExit, PositionGuard};

/// How often finished guards are collected.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Daemon
// =============================================================================

/// The main Warden daemon.
pub struct Daemon<E: ExchangePort + 'static> {
    /// Configuration
    config: Config,
    /// Stop replacement for every guarded position
    coordinator: Arc<StopReplaceCoordinator<E>>,
    /// Price feed
    market_data: Arc<dyn MarketDataPort>,
    /// Store
    store: Arc<dyn Store>,
    /// Running guards by symbol
    guards: Mutex<HashMap<String, JoinHandle<GuardExit>>>,
    /// Shutdown token shared with every guard
    shutdown_token: CancellationToken,
}

impl Daemon<ValidatedExchange<StubExchange>> {
    /// Create a new daemon with stub exchange and market data (for
    /// testing/development).
    pub fn new_stub(config: Config) -> Self {
        let exchange = Arc::new(ValidatedExchange::new(StubExchange::new()));
        let market_data: Arc<dyn MarketDataPort> = Arc::new(StubMarketData::new());
        let store: Arc<dyn Store> = match &config.state_path {
            Some(path) => Arc::new(JsonFileStore::new(path.clone())),
            None => Arc::new(MemoryStore::new()),
        };

        Self::new(config, exchange, market_data, store)
    }
}

impl<E: ExchangePort + 'static> Daemon<E> {
    /// Create a new daemon with provided components.
    pub fn new(
        config: Config,
        exchange: Arc<E>,
        market_data: Arc<dyn MarketDataPort>,
        store: Arc<dyn Store>,
    ) -> Self {
        let sink = Arc::new(StoreSink::new(Arc::clone(&store)));
        let coordinator = Arc::new(
            StopReplaceCoordinator::new(exchange, config.protection.retry_config()).with_sink(sink),
        );

        Self {
            config,
            coordinator,
            market_data,
            store,
            guards: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn coordinator(&self) -> &Arc<StopReplaceCoordinator<E>> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Token that stops the daemon and every guard when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Number of running guards.
    pub fn guard_count(&self) -> usize {
        self.lock_guards().len()
    }

    /// Put a newly opened position under protection.
    pub async fn guard_position(&self, position: Position) -> DaemonResult<()> {
        self.store.save_position(&position).await?;
        self.start_guard(position, None).await
    }

    /// Restore every stored position with its persisted stop state.
    ///
    /// Returns the number of guards started.
    pub async fn restore_positions(&self) -> DaemonResult<usize> {
        let positions = self.store.find_positions().await?;
        let count = positions.len();

        if count == 0 {
            info!("No guarded positions to restore");
            return Ok(0);
        }

        for position in positions {
            let snapshot = self.store.load(&position.symbol).await?;
            info!(
                symbol = %position.symbol,
                stop = %position.stop_loss_price,
                state = ?snapshot.as_ref().map(|s| s.state),
                "Restoring guarded position"
            );
            self.start_guard(position, snapshot).await?;
        }

        info!(count, "Restored guarded positions from store");
        Ok(count)
    }

    async fn start_guard(
        &self,
        position: Position,
        snapshot: Option<StopStateSnapshot>,
    ) -> DaemonResult<()> {
        let key = position.symbol.as_pair();
        if self.lock_guards().contains_key(&key) {
            return Err(DaemonError::AlreadyGuarded(key));
        }

        let template =
            StopOrderTemplate::new(position.symbol.clone(), position.side, position.size)
                .with_tick_size(self.config.tick_size);
        self.coordinator.track(template, snapshot)?;

        let prices = match self.market_data.subscribe(&position.symbol).await {
            Ok(prices) => prices,
            Err(e) => {
                self.coordinator.untrack(&position.symbol);
                return Err(e.into());
            },
        };

        let guard = PositionGuard::new(
            position,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.store),
            self.config.trailing.clone(),
            self.shutdown_token.child_token(),
        );
        let handle = guard.spawn(prices);

        self.lock_guards().insert(key, handle);
        Ok(())
    }

    /// Wait for the guard of `symbol` to finish.
    ///
    /// Returns `None` if no guard runs for the symbol.
    pub async fn wait_for_guard(&self, symbol: &Symbol) -> Option<GuardExit> {
        let handle = self.lock_guards().remove(&symbol.as_pair())?;
        self.finish_guard(symbol.as_pair(), handle).await
    }

    /// Run the daemon.
    ///
    /// This method blocks until Ctrl-C or the shutdown token is cancelled.
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            max_retries = self.config.protection.max_retries,
            "Starting Warden daemon"
        );

        // 1. Restore guarded positions
        self.restore_positions().await?;

        // 2. Subscribe to protection alerts
        let mut alerts = self.coordinator.subscribe_alerts();
        let mut reap = tokio::time::interval(REAP_INTERVAL);

        // 3. Main loop
        info!("Entering main loop");
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown token cancelled");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }

                alert = alerts.recv() => {
                    match alert {
                        Ok(alert) => log_alert(&alert),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Alert receiver lagged");
                        }
                        Err(RecvError::Closed) => {}
                    }
                }

                _ = reap.tick() => {
                    self.reap_finished_guards().await;
                }
            }
        }

        // 4. Graceful shutdown
        self.shutdown().await
    }

    /// Stop every guard and persist the final stop state.
    pub async fn shutdown(&self) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");
        self.shutdown_token.cancel();

        let handles: Vec<(String, JoinHandle<GuardExit>)> =
            self.lock_guards().drain().collect();
        for (symbol, handle) in handles {
            self.finish_guard(symbol, handle).await;
        }

        let snapshots = self.coordinator.snapshots();
        for snapshot in &snapshots {
            self.store.save(snapshot).await?;
        }

        info!(tracked = snapshots.len(), "Shutdown complete");
        Ok(())
    }

    async fn reap_finished_guards(&self) {
        let finished: Vec<(String, JoinHandle<GuardExit>)> = {
            let mut guards = self.lock_guards();
            let symbols: Vec<String> = guards
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(symbol, _)| symbol.clone())
                .collect();
            symbols
                .into_iter()
                .filter_map(|symbol| guards.remove(&symbol).map(|handle| (symbol, handle)))
                .collect()
        };

        for (symbol, handle) in finished {
            self.finish_guard(symbol, handle).await;
        }
    }

    async fn finish_guard(&self, symbol: String, handle: JoinHandle<GuardExit>) -> Option<GuardExit> {
        match handle.await {
            Ok(exit) => {
                match &exit {
                    GuardExit::Fatal(reason) => {
                        error!(symbol = %symbol, reason = %reason, "Guard stopped: position needs manual action")
                    },
                    GuardExit::EmergencyClosed { order_id, .. } => {
                        error!(symbol = %symbol, order_id = %order_id, "Guard stopped after emergency close")
                    },
                    other => info!(symbol = %symbol, exit = ?other, "Guard finished"),
                }
                Some(exit)
            },
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Guard task panicked");
                None
            },
        }
    }

    fn lock_guards(&self) -> MutexGuard<'_, HashMap<String, JoinHandle<GuardExit>>> {
        self.guards.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_alert(alert: &ProtectionAlert) {
    match &alert.kind {
        AlertKind::ProtectionLost { retry_count } => warn!(
            symbol = %alert.symbol,
            retry_count,
            message = %alert.message,
            "ALERT: stop protection lost"
        ),
        AlertKind::Critical => error!(
            symbol = %alert.symbol,
            message = %alert.message,
            "ALERT: stop protection critical"
        ),
        AlertKind::EmergencyCloseExecuted { order_id } => error!(
            symbol = %alert.symbol,
            order_id = %order_id,
            "ALERT: emergency close executed"
        ),
        AlertKind::EmergencyCloseFailed { reason } => error!(
            symbol = %alert.symbol,
            reason = %reason,
            "ALERT: emergency close FAILED, position may be unprotected"
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
