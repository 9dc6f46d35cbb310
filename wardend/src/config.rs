//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use warden_domain::TrailingConfig;
use warden_exec::RetryConfig;

use crate::error::{DaemonError, DaemonResult};

const DEFAULT_STATE_PATH: &str = "warden-state.json";

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stop replacement retry budget
    pub protection: ProtectionConfig,

    /// Trailing and break-even policy
    pub trailing: TrailingConfig,

    /// Exchange price increment stop prices are rounded to; `None` sends
    /// them unrounded
    pub tick_size: Option<Decimal>,

    /// State file; `None` keeps state in memory only
    pub state_path: Option<PathBuf>,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// Retry budget and backoff for stop replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionConfig {
    /// Failures tolerated before emergency close
    pub max_retries: u32,
    /// First backoff delay in milliseconds
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds
    pub backoff_max_ms: u64,
}

impl ProtectionConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 10_000,
        }
    }
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (uses stubs, in-memory state)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let environment = Self::load_environment()?;
        let protection = Self::load_protection_config()?;
        let trailing = Self::load_trailing_config()?;
        let tick_size = Self::load_tick_size()?;
        let state_path = Self::load_state_path(environment);

        let config = Self {
            protection,
            trailing,
            tick_size,
            state_path,
            environment,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            protection: ProtectionConfig {
                max_retries: 3,
                backoff_base_ms: 10,
                backoff_max_ms: 100,
            },
            trailing: TrailingConfig::default(),
            tick_size: None,
            state_path: None,
            environment: Environment::Test,
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> DaemonResult<()> {
        self.trailing.validate()?;

        if let Some(tick) = self.tick_size.filter(|tick| *tick <= Decimal::ZERO) {
            return Err(DaemonError::Config(format!(
                "WARDEN_TICK_SIZE must be > 0, got {}",
                tick
            )));
        }
        if self.protection.backoff_base_ms > self.protection.backoff_max_ms {
            return Err(DaemonError::Config(format!(
                "WARDEN_BACKOFF_BASE_MS ({}) exceeds WARDEN_BACKOFF_MAX_MS ({})",
                self.protection.backoff_base_ms, self.protection.backoff_max_ms
            )));
        }
        Ok(())
    }

    fn load_environment() -> DaemonResult<Environment> {
        let env_str = env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string());

        match env_str.to_lowercase().as_str() {
            "test" => Ok(Environment::Test),
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(DaemonError::Config(format!(
                "Invalid WARDEN_ENV: {}. Expected: test, development, production",
                other
            ))),
        }
    }

    fn load_protection_config() -> DaemonResult<ProtectionConfig> {
        let defaults = ProtectionConfig::default();

        Ok(ProtectionConfig {
            max_retries: Self::load_parsed_env("WARDEN_MAX_RETRIES", defaults.max_retries)?,
            backoff_base_ms: Self::load_parsed_env(
                "WARDEN_BACKOFF_BASE_MS",
                defaults.backoff_base_ms,
            )?,
            backoff_max_ms: Self::load_parsed_env("WARDEN_BACKOFF_MAX_MS", defaults.backoff_max_ms)?,
        })
    }

    fn load_trailing_config() -> DaemonResult<TrailingConfig> {
        let defaults = TrailingConfig::default();

        Ok(TrailingConfig {
            step_percent: Self::load_decimal_env("WARDEN_TRAIL_STEP_PERCENT", defaults.step_percent)?,
            move_percent: Self::load_decimal_env("WARDEN_TRAIL_MOVE_PERCENT", defaults.move_percent)?,
            break_even_buffer: Self::load_decimal_env(
                "WARDEN_BREAK_EVEN_BUFFER",
                defaults.break_even_buffer,
            )?,
            activation_roi: Self::load_decimal_env(
                "WARDEN_TRAIL_ACTIVATION_ROI",
                defaults.activation_roi,
            )?,
        })
    }

    fn load_state_path(environment: Environment) -> Option<PathBuf> {
        match env::var("WARDEN_STATE_PATH") {
            Ok(path) if path.trim().is_empty() => None,
            Ok(path) => Some(PathBuf::from(path)),
            Err(_) if environment == Environment::Test => None,
            Err(_) => Some(PathBuf::from(DEFAULT_STATE_PATH)),
        }
    }

    fn load_tick_size() -> DaemonResult<Option<Decimal>> {
        match env::var("WARDEN_TICK_SIZE") {
            Ok(val) if val.trim().is_empty() => Ok(None),
            Ok(val) => Decimal::from_str(val.trim())
                .map(Some)
                .map_err(|_| DaemonError::Config(format!("Invalid WARDEN_TICK_SIZE value: {}", val))),
            Err(_) => Ok(Some(default_tick_size())),
        }
    }

    fn load_decimal_env(key: &str, default: Decimal) -> DaemonResult<Decimal> {
        match env::var(key) {
            Ok(val) => Decimal::from_str(&val)
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }

    fn load_parsed_env<T: FromStr>(key: &str, default: T) -> DaemonResult<T> {
        match env::var(key) {
            Ok(val) => val
                .trim()
                .parse::<T>()
                .map_err(|_| DaemonError::Config(format!("Invalid {} value: {}", key, val))),
            Err(_) => Ok(default),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protection: ProtectionConfig::default(),
            trailing: TrailingConfig::default(),
            tick_size: Some(default_tick_size()),
            state_path: Some(PathBuf::from(DEFAULT_STATE_PATH)),
            environment: Environment::Development,
        }
    }
}

fn default_tick_size() -> Decimal {
    Decimal::new(1, 2)
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.protection.max_retries, 3);
        assert_eq!(config.state_path, Some(PathBuf::from("warden-state.json")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.environment, Environment::Test);
        assert!(config.state_path.is_none());
        assert_eq!(
            config.protection.retry_config().base_delay,
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_trailing_defaults() {
        let config = Config::default();

        assert_eq!(config.trailing.step_percent, dec!(8));
        assert_eq!(config.trailing.move_percent, dec!(0.05));
        assert_eq!(config.trailing.activation_roi, dec!(10));
    }

    #[test]
    fn test_tick_size_defaults() {
        assert_eq!(Config::default().tick_size, Some(dec!(0.01)));
        assert_eq!(Config::test().tick_size, None);
    }

    #[test]
    fn test_validate_rejects_non_positive_tick() {
        let mut config = Config::test();
        config.tick_size = Some(dec!(0));
        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));

        config.tick_size = Some(dec!(0.5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = Config::test();
        config.protection.backoff_base_ms = 5_000;
        config.protection.backoff_max_ms = 100;

        assert!(matches!(config.validate(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_trailing() {
        let mut config = Config::test();
        config.trailing.step_percent = dec!(0);

        assert!(matches!(config.validate(), Err(DaemonError::Domain(_))));
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
