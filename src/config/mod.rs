use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Complete Flockwatch configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlockwatchConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Simulation timing and retention
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Tick interval when a start request does not give one (seconds)
    #[serde(default = "default_interval_seconds")]
    pub default_interval_seconds: f64,
    /// Sleep jitter as a fraction of the interval (0.05 = ±5%)
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Floor for the jittered sleep (seconds)
    #[serde(default = "default_min_sleep_seconds")]
    pub min_sleep_seconds: f64,
    /// Readings older than this are pruned on every tick
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_interval_seconds() -> f64 {
    3.0
}

fn default_jitter_fraction() -> f64 {
    0.05
}

fn default_min_sleep_seconds() -> f64 {
    0.5
}

fn default_retention_days() -> i64 {
    30
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            default_interval_seconds: default_interval_seconds(),
            jitter_fraction: default_jitter_fraction(),
            min_sleep_seconds: default_min_sleep_seconds(),
            retention_days: default_retention_days(),
        }
    }
}

impl SimulationConfig {
    pub fn default_interval(&self) -> Duration {
        seconds(self.default_interval_seconds)
    }

    pub fn min_sleep(&self) -> Duration {
        seconds(self.min_sleep_seconds)
    }
}

/// Negative and NaN become zero; values too large for a Duration saturate.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("flockwatch.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Blocks a single owner may create
    #[serde(default = "default_max_blocks_per_owner")]
    pub max_blocks_per_owner: usize,
    /// Readings returned by the recent-history endpoint
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Alerts returned by the alert listing endpoints
    #[serde(default = "default_alerts_limit")]
    pub alerts_limit: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_blocks_per_owner() -> usize {
    3
}

fn default_history_limit() -> usize {
    200
}

fn default_alerts_limit() -> usize {
    50
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_blocks_per_owner: default_max_blocks_per_owner(),
            history_limit: default_history_limit(),
            alerts_limit: default_alerts_limit(),
        }
    }
}

impl FlockwatchConfig {
    /// Applies `FLOCKWATCH_DATABASE_PATH` and `FLOCKWATCH_BIND_ADDRESS` overrides.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("FLOCKWATCH_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Ok(addr) = std::env::var("FLOCKWATCH_BIND_ADDRESS") {
            self.api.bind_address = addr;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> anyhow::Result<FlockwatchConfig> {
    use anyhow::Context;

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: FlockwatchConfig =
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
