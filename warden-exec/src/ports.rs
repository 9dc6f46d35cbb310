//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (exchange, market data).
//! Adapters implement these ports for specific services (stub, futures
//! exchange, etc.).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_domain::{math, OrderSide, Price, Quantity, Side, Symbol};

use crate::error::{ExecError, ExecResult};

// =============================================================================
// Order parameters
// =============================================================================

/// Order execution type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Trigger direction of a stop order.
///
/// `Down` triggers when price falls to the stop, `Up` when it rises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopDirection {
    Up,
    Down,
}

impl StopDirection {
    /// Protective direction for a position side (long → down, short → up).
    pub fn protecting(side: Side) -> Self {
        match side {
            Side::Long => StopDirection::Down,
            Side::Short => StopDirection::Up,
        }
    }
}

/// Price series the stop trigger is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopPriceType {
    /// Last trade price
    #[default]
    Trade,
    /// Mark price
    Mark,
    /// Index price
    Index,
}

/// Parameters for any order sent to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price (limit orders only)
    pub price: Option<Price>,
    pub stop: Option<StopDirection>,
    pub stop_price: Option<Price>,
    pub stop_price_type: Option<StopPriceType>,
    pub size: Quantity,
    pub reduce_only: bool,
    /// Client order ID for idempotency
    pub client_oid: String,
}

/// Everything needed to (re)build the protective stop for one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOrderTemplate {
    pub symbol: Symbol,
    /// Side of the protected position
    pub position_side: Side,
    pub size: Quantity,
    pub stop_price_type: StopPriceType,
    /// Exchange price increment; stop prices are rounded onto it
    #[serde(default)]
    pub tick_size: Option<Decimal>,
}

impl StopOrderTemplate {
    pub fn new(symbol: Symbol, position_side: Side, size: Quantity) -> Self {
        Self {
            symbol,
            position_side,
            size,
            stop_price_type: StopPriceType::default(),
            tick_size: None,
        }
    }

    pub fn with_tick_size(mut self, tick_size: Option<Decimal>) -> Self {
        self.tick_size = tick_size;
        self
    }

    /// Stop price as it will rest on the exchange.
    pub fn rounded_stop(&self, stop_price: Price) -> ExecResult<Price> {
        match self.tick_size {
            Some(tick) => Ok(math::round_stop_to_tick(self.position_side, stop_price, tick)?),
            None => Ok(stop_price),
        }
    }

    /// Reduce-only market stop at `stop_price`, rounded to the tick.
    ///
    /// The caller owns `client_oid` so a retried placement can reuse it.
    pub fn stop_params(&self, stop_price: Price, client_oid: &str) -> ExecResult<OrderParams> {
        Ok(OrderParams {
            symbol: self.symbol.clone(),
            side: self.position_side.exit_action(),
            order_type: OrderType::Market,
            price: None,
            stop: Some(StopDirection::protecting(self.position_side)),
            stop_price: Some(self.rounded_stop(stop_price)?),
            stop_price_type: Some(self.stop_price_type),
            size: self.size,
            reduce_only: true,
            client_oid: client_oid.to_string(),
        })
    }

    /// Reduce-only market order closing the full size, no trigger.
    pub fn emergency_close_params(&self) -> OrderParams {
        OrderParams {
            symbol: self.symbol.clone(),
            side: self.position_side.exit_action(),
            order_type: OrderType::Market,
            price: None,
            stop: None,
            stop_price: None,
            stop_price_type: None,
            size: self.size,
            reduce_only: true,
            client_oid: new_client_oid(),
        }
    }
}

/// Fresh client order ID.
pub fn new_client_oid() -> String {
    Uuid::now_v7().to_string()
}

/// Exchange acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    /// Exchange-assigned order ID
    pub order_id: String,
    /// Client-provided order ID (for idempotency)
    pub client_oid: String,
    /// When the exchange accepted the order
    pub accepted_at: DateTime<Utc>,
}

// =============================================================================
// Exchange Port
// =============================================================================

/// Port for exchange operations (placing/canceling orders).
///
/// Implementations:
/// - `StubExchange` - For testing (scripted failures, latency)
/// - `ValidatedExchange` - Pre-flight validation around any adapter
///
/// Adapters map HTTP 429 to `ExecError::RateLimited`, network and 5xx
/// failures to `ExecError::Transient`, and their own deadlines to
/// `ExecError::Timeout`.
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Place a conditional (stop) order.
    async fn place_stop_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError>;

    /// Cancel a stop order.
    ///
    /// Returns `false` if the order was no longer open (already triggered or
    /// cancelled).
    async fn cancel_stop_order(&self, order_id: &str) -> Result<bool, ExecError>;

    /// Place a plain market or limit order.
    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError>;
}

#[async_trait]
impl<T: ExchangePort + ?Sized> ExchangePort for Arc<T> {
    async fn place_stop_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError> {
        (**self).place_stop_order(params).await
    }

    async fn cancel_stop_order(&self, order_id: &str) -> Result<bool, ExecError> {
        (**self).cancel_stop_order(order_id).await
    }

    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError> {
        (**self).place_order(params).await
    }
}

// =============================================================================
// Market Data Port
// =============================================================================

/// Port for market data subscriptions.
///
/// Implementations:
/// - `StubMarketData` - For testing (configurable price stream)
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Subscribe to price updates for a symbol.
    ///
    /// Returns a receiver that yields price updates.
    async fn subscribe(
        &self,
        symbol: &Symbol,
    ) -> Result<tokio::sync::mpsc::Receiver<PriceUpdate>, ExecError>;

    /// Unsubscribe from price updates.
    async fn unsubscribe(&self, symbol: &Symbol) -> Result<(), ExecError>;

    /// Get current snapshot price (without subscription).
    async fn get_price(&self, symbol: &Symbol) -> Result<Price, ExecError>;
}

/// Price update from market data feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Trading pair
    pub symbol: Symbol,
    /// Current price
    pub price: Price,
    /// Update timestamp
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
