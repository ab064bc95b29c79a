//! Simulation configuration with JSON loading and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub width: i32,
    pub height: i32,
    pub levels: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
            levels: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub grid: GridConfig,
    pub robots: usize,
    pub command_queue_capacity: usize,
    pub dispatch_interval_ms: u64,
    /// Multiplier on every simulated duration; 0 disables sleeping.
    pub time_scale: f64,
    pub seed: Option<u64>,
    pub min_stock: u32,
    pub max_stock: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            robots: 3,
            command_queue_capacity: 10,
            dispatch_interval_ms: 500,
            time_scale: 1.0,
            seed: None,
            min_stock: 5,
            max_stock: 20,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let GridConfig {
            width,
            height,
            levels,
        } = self.grid;
        if width <= 0 || height <= 0 || levels <= 0 {
            return Err(ConfigError::Invalid(format!(
                "grid dimensions must be > 0, got {width}x{height}x{levels}"
            )));
        }
        if self.robots == 0 {
            return Err(ConfigError::Invalid("robots must be > 0".to_string()));
        }
        // Robots start on level 0 outside the port row.
        let start_cells = width as usize * (height as usize).saturating_sub(1);
        if self.robots > start_cells {
            return Err(ConfigError::Invalid(format!(
                "{} robots do not fit into {start_cells} start cells",
                self.robots
            )));
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "command_queue_capacity must be > 0".to_string(),
            ));
        }
        if !self.time_scale.is_finite() || self.time_scale < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "time_scale must be a finite value >= 0, got {}",
                self.time_scale
            )));
        }
        if self.min_stock == 0 || self.min_stock > self.max_stock {
            return Err(ConfigError::Invalid(format!(
                "stock range {}..={} is empty",
                self.min_stock, self.max_stock
            )));
        }
        Ok(())
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}
