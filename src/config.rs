use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{FlowlinesError, Result, snap::SnapConfig};

/// Manager options. Every key is optional in TOML and falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// refuse ports other than `out` -> `in`, defaults to true
    pub enforce_port_direction: bool,
    /// allow connections that do not come from a preview line, defaults to false
    pub allow_direct_connection: bool,
    /// snap distance in world units, defaults to 40
    pub snap_threshold: f64,
    /// endpoints at or beyond this distance are not evaluated for snapping, defaults to 200
    pub snap_max_check_distance: f64,
    /// run the periodic cleanup sweep, defaults to true
    pub auto_cleanup: bool,
    /// cleanup period in milliseconds, defaults to 30000
    pub cleanup_interval_ms: u64,
    /// diagnosis period in milliseconds, defaults to 60000
    pub diagnosis_interval_ms: u64,
    /// edge ceiling per session, defaults to 1000
    pub max_edges: usize,
    /// connection ceiling per node and direction, defaults to 10
    pub max_connections_per_node: usize,
    /// route multi-item operations through the batcher, defaults to true
    pub enable_batch_operations: bool,
    /// gatekeeper group size and batcher chunk size, defaults to 10
    pub batch_size: usize,
    /// memo time-to-live in milliseconds, defaults to 5000
    pub cache_ttl_ms: u64,
    /// memo capacity, defaults to 1024
    pub cache_capacity: usize,
    /// spatial grid bucket size, defaults to 100
    pub spatial_cell_size: f64,
    /// calls slower than this emit `performance:warning`, defaults to 16
    pub performance_threshold_ms: u64,
    /// recreate a preview line after its connection is removed, defaults to true
    pub restore_previews: bool,
    /// initial distance of a preview line's free end below its source port, defaults to 80
    pub preview_length: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enforce_port_direction: true,
            allow_direct_connection: false,
            snap_threshold: 40.0,
            snap_max_check_distance: 200.0,
            auto_cleanup: true,
            cleanup_interval_ms: 30_000,
            diagnosis_interval_ms: 60_000,
            max_edges: 1000,
            max_connections_per_node: 10,
            enable_batch_operations: true,
            batch_size: 10,
            cache_ttl_ms: 5000,
            cache_capacity: 1024,
            spatial_cell_size: 100.0,
            performance_threshold_ms: 16,
            restore_previews: true,
            preview_length: 80.0,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| FlowlinesError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.snap_threshold.is_nan() || self.snap_threshold <= 0.0 {
            return Err(FlowlinesError::Config(format!("snap_threshold must be positive, got {}", self.snap_threshold)));
        }
        if self.snap_max_check_distance < self.snap_threshold {
            return Err(FlowlinesError::Config("snap_max_check_distance must not be below snap_threshold".to_string()));
        }
        if self.batch_size == 0 {
            return Err(FlowlinesError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_edges == 0 {
            return Err(FlowlinesError::Config("max_edges must be at least 1".to_string()));
        }
        if self.spatial_cell_size.is_nan() || self.spatial_cell_size <= 0.0 {
            return Err(FlowlinesError::Config("spatial_cell_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn performance_threshold(&self) -> Duration {
        Duration::from_millis(self.performance_threshold_ms)
    }

    pub fn snap_config(&self) -> SnapConfig {
        SnapConfig {
            threshold: self.snap_threshold,
            max_check_distance: self.snap_max_check_distance,
            preview_length: self.preview_length,
            cache_capacity: self.cache_capacity,
            cache_ttl: self.cache_ttl(),
            ..SnapConfig::default()
        }
    }
}
