//! Warden Daemon Library
//!
//! Runtime that keeps an exchange stop resting behind every guarded
//! position.
//!
//! # Architecture
//!
//! ```text
//! Market Data → Position Guard → Trailing Policy
//!                     ↓
//!          Stop Replace Coordinator → Exchange
//!                     ↓
//!                   Store
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Position Guard**: One task per position, trails and re-drives the stop
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use wardend::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod guard;

// Re-exports for convenience
pub use config::{Config, Environment, ProtectionConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use guard::{GuardExit, PositionGuard};
