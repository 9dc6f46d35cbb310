//! Repository trait definitions (Ports)
//!
//! Implementations can be in-memory or file-backed; the daemon only sees
//! the trait.

use async_trait::async_trait;
use warden_domain::{Position, Symbol};
use warden_exec::StopStateSnapshot;

use crate::error::StoreError;

/// Durable record of each position's stop protection state.
///
/// Keyed by symbol: one protected position per symbol.
#[async_trait]
pub trait StopStateRepository: Send + Sync {
    /// Save a snapshot (insert or update)
    async fn save(&self, snapshot: &StopStateSnapshot) -> Result<(), StoreError>;

    /// Load the snapshot for a symbol
    async fn load(&self, symbol: &Symbol) -> Result<Option<StopStateSnapshot>, StoreError>;

    /// Load every snapshot, ordered by symbol
    async fn load_all(&self) -> Result<Vec<StopStateSnapshot>, StoreError>;

    /// Delete the snapshot for a symbol (no-op if absent)
    async fn delete(&self, symbol: &Symbol) -> Result<(), StoreError>;
}

/// Open positions under guard, keyed by symbol.
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// Save a position (insert or update)
    async fn save_position(&self, position: &Position) -> Result<(), StoreError>;

    /// Find the open position for a symbol
    async fn find_position(&self, symbol: &Symbol) -> Result<Option<Position>, StoreError>;

    /// Find every open position, ordered by symbol
    async fn find_positions(&self) -> Result<Vec<Position>, StoreError>;

    /// Forget a position once it is flat (no-op if absent)
    async fn delete_position(&self, symbol: &Symbol) -> Result<(), StoreError>;
}

/// Combined store interface
pub trait Store: StopStateRepository + PositionRepository {}

impl<T: StopStateRepository + PositionRepository> Store for T {}
