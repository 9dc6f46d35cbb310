//! Warden Execution Layer
//!
//! Keeps a protective stop order resting on the exchange for every open
//! position, and moves it without ever leaving the position naked.
//!
//! # Architecture
//!
//! ```text
//! PositionGuard → StopReplaceCoordinator → StopOrderStateMachine → ValidatedExchange → Exchange
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits defining interfaces for exchange and market data
//! - **Validation**: Pre-flight checks every order passes before leaving the process
//! - **State machine**: Place-then-cancel replacement with a single pending slot
//! - **Coordinator**: Retry with backoff, emergency close, alerts
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_exec::{RetryConfig, StopOrderTemplate, StopReplaceCoordinator, StubExchange, ValidatedExchange};
//! use std::sync::Arc;
//!
//! let exchange = Arc::new(ValidatedExchange::new(StubExchange::new()));
//! let coordinator = StopReplaceCoordinator::new(exchange, RetryConfig::default());
//!
//! coordinator.track(StopOrderTemplate::new(symbol.clone(), Side::Long, size), None)?;
//! coordinator.replace_stop_order(&symbol, stop_price).await?;
//! ```

#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod ports;
pub mod state_machine;
pub mod stub;
pub mod validation;

// Re-exports for convenience
pub use coordinator::{
    AlertKind, ProtectionAlert, ReplaceOutcome, RetryConfig, StopReplaceCoordinator,
};
pub use error::{ExecError, ExecResult};
pub use ports::{
    new_client_oid, ExchangePort, MarketDataPort, OrderAck, OrderParams, OrderType, PriceUpdate,
    StopDirection, StopOrderTemplate, StopPriceType,
};
pub use state_machine::{
    PendingUpdate, ProtectionState, SnapshotSink, StopOrderStateMachine, StopPlacement,
    StopStateSnapshot, UpdateOutcome,
};
pub use stub::{RecordedOrder, StubExchange, StubMarketData};
pub use validation::{validate_exit_order, validate_stop_order, ValidatedExchange};
