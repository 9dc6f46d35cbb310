//! Warden Daemon
//!
//! Guards open leveraged positions with exchange-side stop orders.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p wardend
//!
//! # Start with custom environment
//! WARDEN_ENV=test WARDEN_MAX_RETRIES=5 cargo run -p wardend
//! ```
//!
//! # Environment Variables
//!
//! - `WARDEN_ENV`: Environment (test, development, production)
//! - `WARDEN_MAX_RETRIES`: Failed replacements before emergency close (default: 3)
//! - `WARDEN_BACKOFF_BASE_MS`: First retry delay (default: 500)
//! - `WARDEN_BACKOFF_MAX_MS`: Retry delay ceiling (default: 10000)
//! - `WARDEN_TRAIL_STEP_PERCENT`: ROI step per trail (default: 8)
//! - `WARDEN_TRAIL_MOVE_PERCENT`: Stop move per step (default: 0.05)
//! - `WARDEN_TRAIL_ACTIVATION_ROI`: ROI that arms break-even (default: 10)
//! - `WARDEN_BREAK_EVEN_BUFFER`: Break-even offset (default: 0.0005)
//! - `WARDEN_TICK_SIZE`: Price increment stops are rounded to, empty for none (default: 0.01)
//! - `WARDEN_STATE_PATH`: State file, empty for in-memory (default: warden-state.json)
//! - `WARDEN_LOG_FORMAT`: `json` for structured logs, anything else for text

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wardend::{Config, Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::from_default_env()
        .add_directive("wardend=info".parse()?)
        .add_directive("warden_exec=info".parse()?);
    let json = std::env::var("WARDEN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        state_path = ?config.state_path,
        "Warden Daemon"
    );

    // Create and run daemon
    let daemon = Daemon::new_stub(config);
    daemon.run().await?;

    Ok(())
}
