//! In-memory store implementation
//!
//! Used for testing and development without a state file.
//! Thread-safe using RwLock for concurrent access.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use warden_domain::{Position, Symbol};
use warden_exec::StopStateSnapshot;

use crate::error::StoreError;
use crate::repository::{PositionRepository, StopStateRepository};

/// In-memory store for testing
#[derive(Default)]
pub struct MemoryStore {
    stops: RwLock<BTreeMap<String, StopStateSnapshot>>,
    positions: RwLock<BTreeMap<String, Position>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stop snapshots
    pub fn stop_count(&self) -> usize {
        self.stops.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Get the number of positions
    pub fn position_count(&self) -> usize {
        self.positions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        self.stops.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.positions.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[async_trait]
impl StopStateRepository for MemoryStore {
    async fn save(&self, snapshot: &StopStateSnapshot) -> Result<(), StoreError> {
        self.stops
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.symbol.as_pair(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, symbol: &Symbol) -> Result<Option<StopStateSnapshot>, StoreError> {
        Ok(self
            .stops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&symbol.as_pair())
            .cloned())
    }

    async fn load_all(&self) -> Result<Vec<StopStateSnapshot>, StoreError> {
        Ok(self
            .stops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn delete(&self, symbol: &Symbol) -> Result<(), StoreError> {
        self.stops
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&symbol.as_pair());
        Ok(())
    }
}

#[async_trait]
impl PositionRepository for MemoryStore {
    async fn save_position(&self, position: &Position) -> Result<(), StoreError> {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(position.symbol.as_pair(), position.clone());
        Ok(())
    }

    async fn find_position(&self, symbol: &Symbol) -> Result<Option<Position>, StoreError> {
        Ok(self
            .positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&symbol.as_pair())
            .cloned())
    }

    async fn find_positions(&self) -> Result<Vec<Position>, StoreError> {
        Ok(self
            .positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn delete_position(&self, symbol: &Symbol) -> Result<(), StoreError> {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&symbol.as_pair());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use warden_domain::{Leverage, NewPosition, Price, Quantity, Side};
    use warden_exec::{ProtectionState, StopOrderStateMachine};

    fn snapshot(pair: &str) -> StopStateSnapshot {
        StopOrderStateMachine::new(Symbol::from_pair(pair).unwrap(), 3).snapshot()
    }

    fn position() -> Position {
        Position::open(NewPosition {
            symbol: Symbol::from_pair("ETHUSDTM").unwrap(),
            side: Side::Long,
            entry_price: Price::new(dec!(2000)).unwrap(),
            entry_time: Utc::now(),
            size: Quantity::new(dec!(1)).unwrap(),
            leverage: Leverage::from_u32(25).unwrap(),
            stop_loss_price: Price::new(dec!(1992.8)).unwrap(),
            take_profit_price: None,
            entry_fee_rate: dec!(0.0006),
            exit_fee_rate: dec!(0.0006),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = MemoryStore::new();
        let eth = Symbol::from_pair("ETHUSDTM").unwrap();

        assert!(store.load(&eth).await.unwrap().is_none());

        store.save(&snapshot("ETHUSDTM")).await.unwrap();
        let loaded = store.load(&eth).await.unwrap().unwrap();
        assert_eq!(loaded.state, ProtectionState::Protected);
        assert_eq!(store.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = MemoryStore::new();
        let mut first = snapshot("ETHUSDTM");
        store.save(&first).await.unwrap();

        first.state = ProtectionState::Unprotected;
        first.retry_count = 2;
        store.save(&first).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].retry_count, 2);
    }

    #[tokio::test]
    async fn test_load_all_is_ordered_and_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.save(&snapshot("XBTUSDTM")).await.unwrap();
        store.save(&snapshot("ETHUSDTM")).await.unwrap();

        let pairs: Vec<String> = store
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|s| s.symbol.as_pair())
            .collect();
        assert_eq!(pairs, vec!["ETHUSDTM".to_string(), "XBTUSDTM".to_string()]);

        let eth = Symbol::from_pair("ETHUSDTM").unwrap();
        store.delete(&eth).await.unwrap();
        store.delete(&eth).await.unwrap();
        assert_eq!(store.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_positions_are_independent_of_stops() {
        let store = MemoryStore::new();
        let position = position();

        store.save_position(&position).await.unwrap();
        assert_eq!(store.position_count(), 1);
        assert_eq!(store.stop_count(), 0);

        let found = store.find_position(&position.symbol).await.unwrap().unwrap();
        assert_eq!(found, position);

        store.delete_position(&position.symbol).await.unwrap();
        assert!(store.find_positions().await.unwrap().is_empty());

        store.save(&snapshot("ETHUSDTM")).await.unwrap();
        store.clear();
        assert_eq!(store.stop_count(), 0);
    }
}
