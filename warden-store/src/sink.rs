//! Adapter from a stop state repository to the execution layer's
//! [`SnapshotSink`].

use std::sync::Arc;

use async_trait::async_trait;
use warden_exec::{ExecError, ExecResult, SnapshotSink, StopStateSnapshot};

use crate::repository::StopStateRepository;

/// Writes pre-placement snapshots through to a repository.
pub struct StoreSink<S: ?Sized>(Arc<S>);

impl<S: ?Sized> StoreSink<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self(store)
    }
}

#[async_trait]
impl<S: StopStateRepository + ?Sized> SnapshotSink for StoreSink<S> {
    async fn persist(&self, snapshot: &StopStateSnapshot) -> ExecResult<()> {
        self.0
            .save(snapshot)
            .await
            .map_err(|e| ExecError::Persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use rust_decimal_macros::dec;
    use warden_domain::{Price, Quantity, Side, Symbol};
    use warden_exec::{ProtectionState, StopOrderStateMachine, StopOrderTemplate, StubExchange};

    #[tokio::test]
    async fn test_attempt_is_stored_before_placement() {
        let store = Arc::new(MemoryStore::new());
        let sink = StoreSink::new(Arc::clone(&store));
        let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
        let template = StopOrderTemplate::new(symbol.clone(), Side::Long, Quantity::new(dec!(1)).unwrap());
        let exchange = StubExchange::new();
        exchange.fail_next_place(ExecError::Transient("502".into()));
        let machine = StopOrderStateMachine::new(symbol.clone(), 3);

        let result = machine
            .update_stop_with(&exchange, Price::new(dec!(1990)).unwrap(), &template, Some(&sink))
            .await;
        assert!(result.is_err());

        // The placement failed, but the attempt it made was recorded first
        let stored = store.load(&symbol).await.unwrap().unwrap();
        assert_eq!(stored.state, ProtectionState::Updating);
        assert_eq!(stored.desired_stop_price, Some(Price::new(dec!(1990)).unwrap()));
        assert_eq!(stored.last_attempt, machine.last_attempt());
    }
}
