use std::time::Duration;

use giftreg_core::crypto::DataKey;
use giftreg_core::engine::ReservationSettings;
use giftreg_core::reservation::DEFAULT_GUEST_TTL_DAYS;

use crate::auth::jwt::JwtConfig;

/// Default interval between expiry sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Server configuration loaded from environment variables.
///
/// All fields except the JWT secret have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background jobs to stop after shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub jwt: JwtConfig,
    pub reservations: ReservationConfig,
    /// Master key wrapping the PII data key. `None` disables encryption.
    pub pii_master_key: Option<DataKey>,
}

/// Reservation tunables.
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    /// Lifetime of a guest reservation in days (default: `30`).
    pub guest_ttl_days: i64,
    /// Seconds between expiry sweeps (default: `300`).
    pub sweep_interval_secs: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            guest_ttl_days: DEFAULT_GUEST_TTL_DAYS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl ReservationConfig {
    pub fn settings(&self) -> ReservationSettings {
        ReservationSettings {
            guest_ttl: chrono::Duration::days(self.guest_ttl_days),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                 |
    /// |-----------------------------------|-------------------------|
    /// | `HOST`                            | `0.0.0.0`               |
    /// | `PORT`                            | `3000`                  |
    /// | `CORS_ORIGINS`                    | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`            | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`           | `30`                    |
    /// | `GUEST_RESERVATION_TTL_DAYS`      | `30`                    |
    /// | `RESERVATION_SWEEP_INTERVAL_SECS` | `300`                   |
    /// | `PII_MASTER_KEY`                  | unset (plaintext PII)   |
    ///
    /// # Panics
    ///
    /// Panics on malformed values so misconfiguration fails at startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let guest_ttl_days: i64 = std::env::var("GUEST_RESERVATION_TTL_DAYS")
            .unwrap_or_else(|_| DEFAULT_GUEST_TTL_DAYS.to_string())
            .parse()
            .expect("GUEST_RESERVATION_TTL_DAYS must be a valid i64");
        assert!(guest_ttl_days > 0, "GUEST_RESERVATION_TTL_DAYS must be positive");

        let sweep_interval_secs: u64 = std::env::var("RESERVATION_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| DEFAULT_SWEEP_INTERVAL_SECS.to_string())
            .parse()
            .expect("RESERVATION_SWEEP_INTERVAL_SECS must be a valid u64");
        assert!(sweep_interval_secs > 0, "RESERVATION_SWEEP_INTERVAL_SECS must be positive");

        let pii_master_key = std::env::var("PII_MASTER_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| {
                DataKey::from_hex(v.trim())
                    .unwrap_or_else(|e| panic!("PII_MASTER_KEY must be 64 hex characters: {e}"))
            });

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            reservations: ReservationConfig {
                guest_ttl_days,
                sweep_interval_secs,
            },
            pii_master_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reservation_config_matches_engine_defaults() {
        let config = ReservationConfig::default();
        assert_eq!(config.settings().guest_ttl, ReservationSettings::default().guest_ttl);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
    }
}
