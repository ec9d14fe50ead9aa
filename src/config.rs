use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub throttling: ThrottlingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            workers: default_workers(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_url")]
    pub db: String,
    #[serde(default = "default_redis_url")]
    pub redis: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db: default_db_url(),
            redis: default_redis_url(),
        }
    }
}

/// The six configuration keys named in spec §4.5, plus the single
/// `throttling` mode toggle. Validated by [`ThrottlingConfig::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottlingConfig {
    /// `true` when `throttling = "soft"`; `false` (the default) means
    /// "hard" — every GLOBAL denial above the hard threshold, and no
    /// cooperative sleep is ever applied.
    #[serde(default)]
    pub throttling_soft_enabled: bool,
    #[serde(default = "default_soft_delay_ms")]
    pub soft_delay_ms: u64,
    #[serde(default = "default_global_soft_threshold")]
    pub global_soft_threshold: f64,
    #[serde(default = "default_global_warn_threshold")]
    pub global_warn_threshold: f64,
    #[serde(default = "default_global_full_threshold")]
    pub global_full_threshold: f64,
    #[serde(default = "default_global_hard_threshold")]
    pub global_hard_threshold: f64,
}

impl ThrottlingConfig {
    pub fn soft_enabled(&self) -> bool {
        self.throttling_soft_enabled
    }

    /// `0 < soft <= warn <= full <= hard`, and `soft_delay_ms` within
    /// `[0, 60000]` (spec §4.5).
    pub fn validate(&self) -> Result<()> {
        if !(self.global_soft_threshold > 0.0
            && self.global_soft_threshold <= self.global_warn_threshold
            && self.global_warn_threshold <= self.global_full_threshold
            && self.global_full_threshold <= self.global_hard_threshold)
        {
            return Err(AppError::MalformedRequest(format!(
                "threshold ladder must satisfy 0 < soft <= warn <= full <= hard, got soft={}, warn={}, full={}, hard={}",
                self.global_soft_threshold,
                self.global_warn_threshold,
                self.global_full_threshold,
                self.global_hard_threshold
            )));
        }
        if self.soft_delay_ms > 60_000 {
            return Err(AppError::MalformedRequest(format!(
                "soft_delay_ms must be within [0, 60000], got {}",
                self.soft_delay_ms
            )));
        }
        Ok(())
    }
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            throttling_soft_enabled: false,
            soft_delay_ms: default_soft_delay_ms(),
            global_soft_threshold: default_global_soft_threshold(),
            global_warn_threshold: default_global_warn_threshold(),
            global_full_threshold: default_global_full_threshold(),
            global_hard_threshold: default_global_hard_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    30
}

fn default_db_url() -> String {
    "sqlite://quotagate.db".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_soft_delay_ms() -> u64 {
    100
}

fn default_global_soft_threshold() -> f64 {
    0.80
}

fn default_global_warn_threshold() -> f64 {
    0.80
}

fn default_global_full_threshold() -> f64 {
    1.00
}

fn default_global_hard_threshold() -> f64 {
    1.20
}

impl Config {
    pub async fn load(path: &str) -> Result<Self> {
        use std::fs;

        let mut config: Config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)?,
            Err(_) => Self::default_for_env(),
        };

        config.apply_env_overrides();
        config.throttling.validate()?;
        Ok(config)
    }

    fn default_for_env() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            throttling: ThrottlingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(bind) = std::env::var("QUOTAGATE_BIND") {
            self.server.bind = bind;
        }
        if let Ok(port) = std::env::var("QUOTAGATE_PORT") {
            if let Ok(port_num) = port.parse() {
                self.server.port = port_num;
            }
        }
        if let Ok(db_url) = std::env::var("QUOTAGATE_DB_URL") {
            self.storage.db = db_url;
        }
        if let Ok(redis_url) = std::env::var("QUOTAGATE_REDIS_URL") {
            self.storage.redis = redis_url;
        }
        if let Ok(mode) = std::env::var("QUOTAGATE_THROTTLING") {
            self.throttling.throttling_soft_enabled = mode.eq_ignore_ascii_case("soft");
        }
        if let Ok(delay) = std::env::var("QUOTAGATE_SOFT_DELAY_MS") {
            if let Ok(delay_num) = delay.parse() {
                self.throttling.soft_delay_ms = delay_num;
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_for_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_ladder_is_valid() {
        ThrottlingConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_order_thresholds() {
        let mut cfg = ThrottlingConfig::default();
        cfg.global_warn_threshold = 0.5; // below soft
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_soft_delay_above_60s() {
        let mut cfg = ThrottlingConfig::default();
        cfg.soft_delay_ms = 60_001;
        assert!(cfg.validate().is_err());
    }
}
