//! Warden Storage Layer
//!
//! Persists each guarded position and its stop protection state so a
//! restarted daemon knows which stop orders it owns and which positions
//! were left exposed.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing
//! - **JSON file store**: Atomic single-document persistence
//! - **Store sink**: Persists stop attempts before they reach the exchange
//!
//! # Usage
//!
//! ```rust
//! use warden_domain::Symbol;
//! use warden_exec::StopOrderStateMachine;
//! use warden_store::{MemoryStore, StopStateRepository};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let symbol = Symbol::from_pair("ETHUSDTM").unwrap();
//!
//!     let machine = StopOrderStateMachine::new(symbol.clone(), 3);
//!     store.save(&machine.snapshot()).await.unwrap();
//!
//!     let restored = store.load(&symbol).await.unwrap();
//!     assert!(restored.is_some());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod file;
mod memory;
mod repository;
mod sink;

// Re-exports
pub use error::{StoreError, StoreResult};
pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use repository::{PositionRepository, StopStateRepository, Store};
pub use sink::StoreSink;
