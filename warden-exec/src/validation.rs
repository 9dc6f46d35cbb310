//! Pre-flight order validation.
//!
//! `ValidatedExchange` wraps any `ExchangePort` and rejects orders that
//! would be unsafe for a protective engine before they leave the process.
//! Every order routed through this layer is an exit: stops and emergency
//! closes. Entries go through a different path.

use async_trait::async_trait;
use tracing::warn;

use warden_domain::OrderSide;

use crate::error::{ExecError, ExecResult};
use crate::ports::{ExchangePort, OrderAck, OrderParams, OrderType, StopDirection};

/// Validation layer around an exchange adapter.
pub struct ValidatedExchange<E> {
    inner: E,
}

impl<E: ExchangePort> ValidatedExchange<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    /// Access the wrapped adapter.
    pub fn inner(&self) -> &E {
        &self.inner
    }
}

/// Checks shared by every exit order.
pub fn validate_exit_order(params: &OrderParams) -> ExecResult<()> {
    if !params.reduce_only {
        return Err(ExecError::Validation(format!(
            "{} exit order must be reduce_only",
            params.symbol
        )));
    }
    if params.order_type == OrderType::Limit && params.price.is_none() {
        return Err(ExecError::Validation("limit order requires a price".to_string()));
    }
    Ok(())
}

/// Checks for a protective stop order.
pub fn validate_stop_order(params: &OrderParams) -> ExecResult<()> {
    validate_exit_order(params)?;

    let direction = params
        .stop
        .ok_or_else(|| ExecError::Validation("stop order requires a direction".to_string()))?;
    if params.stop_price.is_none() {
        return Err(ExecError::Validation("stop order requires a stop price".to_string()));
    }

    let expected = match params.side {
        OrderSide::Sell => StopDirection::Down,
        OrderSide::Buy => StopDirection::Up,
    };
    if direction != expected {
        return Err(ExecError::Validation(format!(
            "{} stop must trigger {:?}, got {:?}",
            params.side, expected, direction
        )));
    }

    Ok(())
}

#[async_trait]
impl<E: ExchangePort> ExchangePort for ValidatedExchange<E> {
    async fn place_stop_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError> {
        if let Err(e) = validate_stop_order(params) {
            warn!(symbol = %params.symbol, client_oid = %params.client_oid, error = %e, "Stop order rejected before send");
            return Err(e);
        }
        self.inner.place_stop_order(params).await
    }

    async fn cancel_stop_order(&self, order_id: &str) -> Result<bool, ExecError> {
        if order_id.is_empty() {
            return Err(ExecError::Validation("empty order id".to_string()));
        }
        self.inner.cancel_stop_order(order_id).await
    }

    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck, ExecError> {
        if let Err(e) = validate_exit_order(params) {
            warn!(symbol = %params.symbol, client_oid = %params.client_oid, error = %e, "Order rejected before send");
            return Err(e);
        }
        self.inner.place_order(params).await
    }
}
