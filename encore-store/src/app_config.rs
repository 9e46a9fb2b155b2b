use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub holds: HoldRules,
    #[serde(default)]
    pub seed: Vec<SeedOption>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HoldRules {
    #[serde(default = "default_lifetime")]
    pub lifetime_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_lifetime() -> u64 { 300 }
fn default_sweep_interval() -> u64 { 30 }

impl HoldRules {
    pub fn lifetime(&self) -> Result<chrono::Duration, config::ConfigError> {
        i64::try_from(self.lifetime_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                config::ConfigError::Message(format!(
                    "holds.lifetime_seconds out of range: {}",
                    self.lifetime_seconds
                ))
            })
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

impl Default for HoldRules {
    fn default() -> Self {
        Self {
            lifetime_seconds: default_lifetime(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

/// Seats provisioned at startup by the memory and redis backends
#[derive(Debug, Deserialize, Clone)]
pub struct SeedOption {
    pub option_id: i64,
    #[serde(default)]
    pub title: String,
    pub price: i64,
    #[serde(default)]
    pub reserve_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reserve_until: Option<DateTime<Utc>>,
    pub first_seat_id: i64,
    pub seat_count: u32,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `ENCORE_HOLDS__LIFETIME_SECONDS=60`
            .add_source(config::Environment::with_prefix("ENCORE").separator("__"))
            .build()?;

        s.try_deserialize::<Self>()?.validated()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize::<Self>()?
            .validated()
    }

    fn validated(self) -> Result<Self, config::ConfigError> {
        self.holds.lifetime()?;
        Ok(self)
    }
}
