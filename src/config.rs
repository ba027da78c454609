//! Configuration for the prediction and backtest engine.

use serde::{Deserialize, Serialize};

use crate::features::FeatureConfig;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_starting_bankroll")]
    pub starting_bankroll: f64,
    /// Finishing positions that pay a place bet.
    #[serde(default = "default_place_paid_positions")]
    pub place_paid_positions: u32,
}

fn default_starting_bankroll() -> f64 {
    1000.0
}

fn default_place_paid_positions() -> u32 {
    3
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_bankroll: default_starting_bankroll(),
            place_paid_positions: default_place_paid_positions(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Run database path. In-memory when unset.
    #[serde(default)]
    pub db_path: Option<String>,
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (KEIBA_SERVER_PORT, etc.)
            .add_source(
                config::Environment::with_prefix("KEIBA")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
