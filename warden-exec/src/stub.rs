//! Stub implementations for testing.
//!
//! These implementations simulate exchange and market data behavior
//! without making real API calls. The exchange can be scripted to fail,
//! to respond slowly, and records every order it sees.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use warden_domain::{Price, Symbol};

use crate::error::ExecError;
use crate::ports::{ExchangePort, MarketDataPort, OrderAck, OrderParams, PriceUpdate};

// =============================================================================
// Stub Exchange
// =============================================================================

/// An order accepted by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedOrder {
    pub order_id: String,
    pub params: OrderParams,
}

#[derive(Default)]
struct StubState {
    order_counter: u64,
    place_attempts: usize,
    place_failures: VecDeque<ExecError>,
    persistent_place_failure: Option<ExecError>,
    lost_acks: usize,
    cancel_failures: VecDeque<ExecError>,
    order_failures: VecDeque<ExecError>,
    open_stops: HashMap<String, OrderParams>,
    placed_stops: Vec<RecordedOrder>,
    cancelled: Vec<String>,
    market_orders: Vec<RecordedOrder>,
}

/// Stub exchange for testing.
///
/// Stop orders rest in an in-memory book until cancelled. Failures are
/// consumed in FIFO order per operation. A stop placed again with a client
/// order ID the stub has already accepted returns the original ack, like an
/// exchange honoring idempotency keys.
pub struct StubExchange {
    state: Mutex<StubState>,
    latency: Duration,
}

impl StubExchange {
    /// Create a stub that answers immediately.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Create a stub that sleeps `latency` before every response.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            latency,
        }
    }

    /// Fail the next stop placement with `error`.
    pub fn fail_next_place(&self, error: ExecError) {
        self.lock().place_failures.push_back(error);
    }

    /// Fail every stop placement with `error` until cleared with `None`.
    pub fn fail_all_places(&self, error: Option<ExecError>) {
        self.lock().persistent_place_failure = error;
    }

    /// Accept the next stop placement but answer with a timeout.
    pub fn timeout_after_next_place(&self) {
        self.lock().lost_acks += 1;
    }

    /// Fail the next cancel with `error`.
    pub fn fail_next_cancel(&self, error: ExecError) {
        self.lock().cancel_failures.push_back(error);
    }

    /// Fail the next plain order (emergency close) with `error`.
    pub fn fail_next_order(&self, error: ExecError) {
        self.lock().order_failures.push_back(error);
    }

    /// Number of stop placement calls, including failed ones.
    pub fn place_attempts(&self) -> usize {
        self.lock().place_attempts
    }

    /// Successfully placed stops, in order.
    pub fn placed_stops(&self) -> Vec<RecordedOrder> {
        self.lock().placed_stops.clone()
    }

    /// Stops currently resting on the book.
    pub fn open_stops(&self) -> Vec<RecordedOrder> {
        let state = self.lock();
        let mut open: Vec<RecordedOrder> = state
            .open_stops
            .iter()
            .map(|(id, params)| RecordedOrder {
                order_id: id.clone(),
                params: params.clone(),
            })
            .collect();
        open.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        open
    }

    /// Order IDs cancelled, in order.
    pub fn cancelled_orders(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    /// Plain orders (emergency closes), in order.
    pub fn market_orders(&self) -> Vec<RecordedOrder> {
        self.lock().market_orders.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn respond(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl Default for StubExchange {
    fn default() -> Self {
        Self::new()
    }
}

fn next_order_id(state: &mut StubState) -> String {
    state.order_counter += 1;
    format!("STUB-{}", state.order_counter)
}

#[async_trait]
impl ExchangePort for StubExchange {
    async fn place_stop_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError> {
        self.respond().await;

        let mut state = self.lock();
        state.place_attempts += 1;

        if let Some(error) = state.place_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.persistent_place_failure.clone() {
            return Err(error);
        }

        let known = state
            .placed_stops
            .iter()
            .find(|order| order.params.client_oid == params.client_oid)
            .map(|order| order.order_id.clone());
        if let Some(order_id) = known {
            tracing::debug!(order_id = %order_id, client_oid = %params.client_oid, "Stub: duplicate client oid");
            return Ok(OrderAck {
                order_id,
                client_oid: params.client_oid.clone(),
                accepted_at: Utc::now(),
            });
        }

        let order_id = next_order_id(&mut state);
        state.open_stops.insert(order_id.clone(), params.clone());
        state.placed_stops.push(RecordedOrder {
            order_id: order_id.clone(),
            params: params.clone(),
        });
        tracing::debug!(order_id = %order_id, symbol = %params.symbol, "Stub: stop order placed");

        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            return Err(ExecError::Timeout(format!("no ack for {}", params.client_oid)));
        }

        Ok(OrderAck {
            order_id,
            client_oid: params.client_oid.clone(),
            accepted_at: Utc::now(),
        })
    }

    async fn cancel_stop_order(&self, order_id: &str) -> Result<bool, ExecError> {
        self.respond().await;

        let mut state = self.lock();
        if let Some(error) = state.cancel_failures.pop_front() {
            return Err(error);
        }

        let existed = state.open_stops.remove(order_id).is_some();
        if existed {
            state.cancelled.push(order_id.to_string());
        }
        tracing::debug!(order_id, existed, "Stub: stop order cancelled");
        Ok(existed)
    }

    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError> {
        self.respond().await;

        let mut state = self.lock();
        if let Some(error) = state.order_failures.pop_front() {
            return Err(error);
        }

        let order_id = next_order_id(&mut state);
        state.market_orders.push(RecordedOrder {
            order_id: order_id.clone(),
            params: params.clone(),
        });

        Ok(OrderAck {
            order_id,
            client_oid: params.client_oid.clone(),
            accepted_at: Utc::now(),
        })
    }
}

// =============================================================================
// Stub Market Data
// =============================================================================

/// Stub market data provider for testing.
///
/// Allows manual price injection for testing scenarios.
pub struct StubMarketData {
    /// Current prices by symbol
    prices: RwLock<HashMap<String, Price>>,
    /// Active subscriptions (symbol -> sender)
    subscriptions: RwLock<HashMap<String, mpsc::Sender<PriceUpdate>>>,
}

impl StubMarketData {
    /// Create a new stub market data provider.
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Set price and notify subscribers.
    pub async fn set_price(&self, symbol: &Symbol, price: Price) {
        self.inject_price_update(PriceUpdate {
            symbol: symbol.clone(),
            price,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Inject a price update to the subscriber of a symbol.
    pub async fn inject_price_update(&self, update: PriceUpdate) {
        let key = update.symbol.as_pair();
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), update.price);

        // Clone the sender so no lock is held across the send
        let sender = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        if let Some(sender) = sender {
            // Ignore send errors (subscriber may have dropped)
            let _ = sender.send(update).await;
        }
    }
}

impl Default for StubMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataPort for StubMarketData {
    async fn subscribe(&self, symbol: &Symbol) -> Result<mpsc::Receiver<PriceUpdate>, ExecError> {
        let (tx, rx) = mpsc::channel(100);

        let mut subscriptions = self.subscriptions.write().map_err(|e| {
            ExecError::InvalidState(format!("Failed to acquire subscription lock: {}", e))
        })?;
        subscriptions.insert(symbol.as_pair(), tx);

        Ok(rx)
    }

    async fn unsubscribe(&self, symbol: &Symbol) -> Result<(), ExecError> {
        let mut subscriptions = self.subscriptions.write().map_err(|e| {
            ExecError::InvalidState(format!("Failed to acquire subscription lock: {}", e))
        })?;
        subscriptions.remove(&symbol.as_pair());
        Ok(())
    }

    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError> {
        let prices = self
            .prices
            .read()
            .map_err(|e| ExecError::InvalidState(format!("Failed to acquire price lock: {}", e)))?;

        prices
            .get(&symbol.as_pair())
            .copied()
            .ok_or_else(|| ExecError::Transient(format!("No price for {}", symbol.as_pair())))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{new_client_oid, StopOrderTemplate};
    use rust_decimal_macros::dec;
    use warden_domain::{Quantity, Side};

    fn params(stop: rust_decimal::Decimal) -> OrderParams {
        StopOrderTemplate::new(
            Symbol::from_pair("ETHUSDTM").unwrap(),
            Side::Long,
            Quantity::new(dec!(1)).unwrap(),
        )
        .stop_params(Price::new(stop).unwrap(), &new_client_oid())
        .unwrap()
    }

    #[tokio::test]
    async fn test_stub_exchange_place_and_cancel() {
        let exchange = StubExchange::new();

        let ack = exchange.place_stop_order(&params(dec!(1990))).await.unwrap();
        assert_eq!(ack.order_id, "STUB-1");
        assert_eq!(exchange.open_stops().len(), 1);

        assert!(exchange.cancel_stop_order(&ack.order_id).await.unwrap());
        assert!(exchange.open_stops().is_empty());
        assert_eq!(exchange.cancelled_orders(), vec!["STUB-1".to_string()]);

        // Second cancel finds nothing
        assert!(!exchange.cancel_stop_order(&ack.order_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stub_exchange_scripted_failures() {
        let exchange = StubExchange::new();
        exchange.fail_next_place(ExecError::Transient("502".into()));

        assert!(exchange.place_stop_order(&params(dec!(1990))).await.is_err());
        assert!(exchange.place_stop_order(&params(dec!(1990))).await.is_ok());
        assert_eq!(exchange.place_attempts(), 2);
        assert_eq!(exchange.placed_stops().len(), 1);

        exchange.fail_all_places(Some(ExecError::Timeout("slow".into())));
        assert!(exchange.place_stop_order(&params(dec!(1991))).await.is_err());
        assert!(exchange.place_stop_order(&params(dec!(1991))).await.is_err());
        exchange.fail_all_places(None);
        assert!(exchange.place_stop_order(&params(dec!(1991))).await.is_ok());
    }

    #[tokio::test]
    async fn test_stub_exchange_dedupes_client_oid() {
        let exchange = StubExchange::new();
        let order = params(dec!(1990));

        let first = exchange.place_stop_order(&order).await.unwrap();
        let again = exchange.place_stop_order(&order).await.unwrap();

        assert_eq!(first.order_id, again.order_id);
        assert_eq!(exchange.open_stops().len(), 1);
        assert_eq!(exchange.place_attempts(), 2);
    }

    #[tokio::test]
    async fn test_stub_exchange_lost_ack_still_places() {
        let exchange = StubExchange::new();
        exchange.timeout_after_next_place();
        let order = params(dec!(1990));

        let result = exchange.place_stop_order(&order).await;
        assert!(matches!(result, Err(ExecError::Timeout(_))));
        assert_eq!(exchange.open_stops().len(), 1);

        // Retrying with the same client oid finds the order
        let ack = exchange.place_stop_order(&order).await.unwrap();
        assert_eq!(ack.order_id, "STUB-1");
        assert_eq!(exchange.open_stops().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stub_exchange_latency() {
        let exchange = StubExchange::with_latency(Duration::from_millis(50));
        let start = tokio::time::Instant::now();

        exchange.place_stop_order(&params(dec!(1990))).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_stub_market_data_subscription() {
        let market_data = StubMarketData::new();
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();

        let mut rx = market_data.subscribe(&symbol).await.unwrap();
        market_data.set_price(&symbol, Price::new(dec!(96000)).unwrap()).await;

        let update = rx.recv().await.unwrap();
        assert_eq!(update.price.as_decimal(), dec!(96000));
        assert_eq!(update.symbol.as_pair(), "BTCUSDT");
        assert_eq!(market_data.get_price(&symbol).await.unwrap().as_decimal(), dec!(96000));
    }

    #[tokio::test]
    async fn test_stub_market_data_unknown_symbol() {
        let market_data = StubMarketData::new();
        let symbol = Symbol::from_pair("BTCUSDT").unwrap();

        assert!(market_data.get_price(&symbol).await.is_err());
    }
}
