use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

/// Where ledger state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// In-process store, for simulations and local runs
    Memory,
}

/// Parameters of the mean-reverting GBM used to advance the reference price
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Annual drift
    pub mu: f64,
    /// Annual volatility
    pub sigma: f64,
    /// Step length in years (one hour by default)
    pub dt_years: f64,
    /// Price the process reverts towards; also the starting price of an empty series
    pub long_term_mean: Decimal,
    pub reversion_strength: f64,
    /// Lowest price the oracle will ever write
    pub floor_price: Decimal,
}

/// Background schedule
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub price_update_interval_secs: u64,
    pub payout_interval_secs: u64,
}

/// Bounded retry for webhook events that arrive before their record commits
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Payment processor webhook settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    pub tolerance_secs: i64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageBackend,
    pub oracle: OracleConfig,
    pub scheduler: SchedulerConfig,
    pub reconciler: ReconcilerConfig,
    pub webhook: WebhookConfig,
    pub audit_log_dir: String,
    pub log_level: String,
    pub environment: String,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

impl DatabaseConfig {
    /// Create database config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32);
        let acquire_timeout_secs = env_parse("DATABASE_ACQUIRE_TIMEOUT_SECS", 30u64);
        let idle_timeout_secs = env_parse("DATABASE_IDLE_TIMEOUT_SECS", 600u64); // 10 minutes
        let max_lifetime_secs = env_parse("DATABASE_MAX_LIFETIME_SECS", 1800u64); // 30 minutes
        let test_before_acquire = env_parse("DATABASE_TEST_BEFORE_ACQUIRE", true);

        if max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }

        if acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(Self {
            url,
            max_connections,
            acquire_timeout_secs,
            idle_timeout_secs,
            max_lifetime_secs,
            test_before_acquire,
        })
    }

    /// Get acquire timeout as Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get max lifetime as Duration
    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/bullion".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl OracleConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let long_term_mean = match env::var("ORACLE_LONG_TERM_MEAN") {
            Ok(raw) => Decimal::from_str(&raw)
                .map_err(|e| format!("Invalid ORACLE_LONG_TERM_MEAN {}: {}", raw, e))?,
            Err(_) => defaults.long_term_mean,
        };
        let floor_price = match env::var("ORACLE_FLOOR_PRICE") {
            Ok(raw) => Decimal::from_str(&raw)
                .map_err(|e| format!("Invalid ORACLE_FLOOR_PRICE {}: {}", raw, e))?,
            Err(_) => defaults.floor_price,
        };

        let config = Self {
            mu: env_parse("ORACLE_MU", defaults.mu),
            sigma: env_parse("ORACLE_SIGMA", defaults.sigma),
            dt_years: env_parse("ORACLE_DT_YEARS", defaults.dt_years),
            long_term_mean,
            reversion_strength: env_parse("ORACLE_REVERSION_STRENGTH", defaults.reversion_strength),
            floor_price,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err("ORACLE_SIGMA must be a non-negative number".to_string());
        }
        if !self.dt_years.is_finite() || self.dt_years <= 0.0 {
            return Err("ORACLE_DT_YEARS must be greater than 0".to_string());
        }
        if !self.mu.is_finite() || !self.reversion_strength.is_finite() {
            return Err("ORACLE_MU and ORACLE_REVERSION_STRENGTH must be finite".to_string());
        }
        if self.long_term_mean <= Decimal::ZERO {
            return Err("ORACLE_LONG_TERM_MEAN must be greater than 0".to_string());
        }
        if self.floor_price <= Decimal::ZERO {
            return Err("ORACLE_FLOOR_PRICE must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            mu: 0.03,
            sigma: 0.12,
            dt_years: 1.0 / (365.0 * 24.0),
            long_term_mean: Decimal::new(180000, 2),
            reversion_strength: 0.005,
            floor_price: Decimal::new(1, 2),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, String> {
        let price_update_interval_secs = env_parse("PRICE_UPDATE_INTERVAL_SECS", 3600u64);
        let payout_interval_secs = env_parse("PAYOUT_INTERVAL_SECS", 86400u64);

        if price_update_interval_secs == 0 || payout_interval_secs == 0 {
            return Err("Scheduler intervals must be greater than 0".to_string());
        }

        Ok(Self {
            price_update_interval_secs,
            payout_interval_secs,
        })
    }

    pub fn price_update_interval(&self) -> Duration {
        Duration::from_secs(self.price_update_interval_secs)
    }

    pub fn payout_interval(&self) -> Duration {
        Duration::from_secs(self.payout_interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            price_update_interval_secs: 3600,
            payout_interval_secs: 86400,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, String> {
        let max_attempts = env_parse("RECONCILE_MAX_ATTEMPTS", 5u32);
        let initial_backoff_ms = env_parse("RECONCILE_INITIAL_BACKOFF_MS", 200u64);
        let max_backoff_ms = env_parse("RECONCILE_MAX_BACKOFF_MS", 2000u64);

        if max_attempts == 0 {
            return Err("RECONCILE_MAX_ATTEMPTS must be greater than 0".to_string());
        }

        Ok(Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms: max_backoff_ms.max(initial_backoff_ms),
        })
    }

    /// Backoff before retry number `attempt` (1-based), doubling and capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        Self {
            secret: env::var("WEBHOOK_SECRET").unwrap_or_default(),
            tolerance_secs: env_parse("WEBHOOK_TOLERANCE_SECS", 300i64),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            tolerance_secs: 300,
        }
    }
}

impl AppConfig {
    /// Create application config from environment variables
    pub fn from_env() -> Result<Self, String> {
        let storage_raw = env::var("STORAGE_BACKEND").unwrap_or_else(|_| "postgres".to_string());
        let storage = StorageBackend::from_str(&storage_raw)
            .ok_or_else(|| format!("Invalid STORAGE_BACKEND: {}. Must be postgres or memory", storage_raw))?;

        let database = match storage {
            StorageBackend::Postgres => DatabaseConfig::from_env()?,
            StorageBackend::Memory => DatabaseConfig::default(),
        };

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let audit_log_dir = env::var("AUDIT_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

        // Validate log level
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL: {}. Must be one of: {:?}",
                log_level, valid_log_levels
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&environment.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT: {}. Must be one of: {:?}",
                environment, valid_environments
            ));
        }

        let webhook = WebhookConfig::from_env();
        if environment.eq_ignore_ascii_case("production") && webhook.secret.is_empty() {
            return Err("WEBHOOK_SECRET is required in production".to_string());
        }

        Ok(Self {
            database,
            storage,
            oracle: OracleConfig::from_env()?,
            scheduler: SchedulerConfig::from_env()?,
            reconciler: ReconcilerConfig::from_env()?,
            webhook,
            audit_log_dir,
            log_level: log_level.to_lowercase(),
            environment: environment.to_lowercase(),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Check if running in development
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Get database URL (convenience method)
    pub fn database_url(&self) -> &str {
        &self.database.url
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageBackend::Postgres,
            oracle: OracleConfig::default(),
            scheduler: SchedulerConfig::default(),
            reconciler: ReconcilerConfig::default(),
            webhook: WebhookConfig::default(),
            audit_log_dir: "./logs".to_string(),
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }
}
