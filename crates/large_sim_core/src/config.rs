//! Tunables for spatial partitioning.
//!
//! Every field has a serde default so a partial `[partition]` table in a TOML
//! file only needs to name the values it overrides.

use serde::{Deserialize, Serialize};

use crate::api::DRIVE_MAXIMUM_NUM_AGENTS;
use crate::api::INITIALIZE_MAXIMUM_NUM_AGENTS;
use crate::region::DEFAULT_REGION_SIZE;

fn default_leaf_size() -> f64 {
    DEFAULT_REGION_SIZE
}

fn default_quadtree_buffer() -> f64 {
    35.0
}

fn default_quadtree_size_buffer() -> f64 {
    1.0
}

fn default_agent_scope_fov_buffer() -> f64 {
    60.0
}

fn default_region_max_size() -> f64 {
    DEFAULT_REGION_SIZE
}

fn default_drive_max_agents() -> usize {
    DRIVE_MAXIMUM_NUM_AGENTS
}

fn default_initialize_max_agents() -> usize {
    INITIALIZE_MAXIMUM_NUM_AGENTS
}

fn default_retry_region_divisor() -> usize {
    15
}

fn default_max_quadtree_depth() -> u8 {
    16
}

/// Partitioning configuration shared by the drive and initialize partitioners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Default side length of a region
    #[serde(default = "default_leaf_size")]
    pub leaf_size: f64,
    /// Margin by which a quadtree leaf sees past its core area
    #[serde(default = "default_quadtree_buffer")]
    pub quadtree_buffer: f64,
    /// Added to the side of the bounding square around all agents
    #[serde(default = "default_quadtree_size_buffer")]
    pub quadtree_size_buffer: f64,
    /// Margin within which agents of other regions condition an initialize call
    #[serde(default = "default_agent_scope_fov_buffer")]
    pub agent_scope_fov_buffer: f64,
    /// Largest region size expected, used to pre-filter neighbouring regions
    #[serde(default = "default_region_max_size")]
    pub region_max_size: f64,
    /// Default agents per drive call; clamped to the backend limit
    #[serde(default = "default_drive_max_agents")]
    pub drive_max_agents: usize,
    /// Agents per initialize call; clamped to the backend limit
    #[serde(default = "default_initialize_max_agents")]
    pub initialize_max_agents: usize,
    /// Initialize attempts per region are `1 + regions / retry_region_divisor`
    #[serde(default = "default_retry_region_divisor")]
    pub retry_region_divisor: usize,
    /// Depth at which quadtree leaves stop subdividing
    #[serde(default = "default_max_quadtree_depth")]
    pub max_quadtree_depth: u8,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            leaf_size: default_leaf_size(),
            quadtree_buffer: default_quadtree_buffer(),
            quadtree_size_buffer: default_quadtree_size_buffer(),
            agent_scope_fov_buffer: default_agent_scope_fov_buffer(),
            region_max_size: default_region_max_size(),
            drive_max_agents: default_drive_max_agents(),
            initialize_max_agents: default_initialize_max_agents(),
            retry_region_divisor: default_retry_region_divisor(),
            max_quadtree_depth: default_max_quadtree_depth(),
        }
    }
}

impl PartitionConfig {
    /// Number of initialize attempts each region gets when `region_count`
    /// regions are being initialized.
    pub fn attempts_per_region(&self, region_count: usize) -> usize {
        1 + region_count / self.retry_region_divisor.max(1)
    }

    /// Checks the configuration for values the partitioners cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.leaf_size > 0.0) {
            return Err(format!("leaf_size must be positive, got {}", self.leaf_size));
        }
        if !(self.region_max_size > 0.0) {
            return Err(format!(
                "region_max_size must be positive, got {}",
                self.region_max_size
            ));
        }
        for (name, value) in [
            ("quadtree_buffer", self.quadtree_buffer),
            ("quadtree_size_buffer", self.quadtree_size_buffer),
            ("agent_scope_fov_buffer", self.agent_scope_fov_buffer),
        ] {
            if !(value >= 0.0) {
                return Err(format!("{name} must be non-negative, got {value}"));
            }
        }
        if self.drive_max_agents == 0 {
            return Err("drive_max_agents must be at least 1".to_string());
        }
        if self.initialize_max_agents == 0 {
            return Err("initialize_max_agents must be at least 1".to_string());
        }
        if self.retry_region_divisor == 0 {
            return Err("retry_region_divisor must be at least 1".to_string());
        }
        if self.max_quadtree_depth == 0 {
            return Err("max_quadtree_depth must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PartitionConfig::default();
        assert_eq!(config.leaf_size, 100.0);
        assert_eq!(config.quadtree_buffer, 35.0);
        assert_eq!(config.quadtree_size_buffer, 1.0);
        assert_eq!(config.agent_scope_fov_buffer, 60.0);
        assert_eq!(config.drive_max_agents, 100);
        assert_eq!(config.retry_region_divisor, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_attempts_per_region() {
        let config = PartitionConfig::default();
        assert_eq!(config.attempts_per_region(1), 1);
        assert_eq!(config.attempts_per_region(14), 1);
        assert_eq!(config.attempts_per_region(15), 2);
        assert_eq!(config.attempts_per_region(47), 4);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: PartitionConfig = toml::from_str("quadtree_buffer = 20.0\n").unwrap();
        assert_eq!(config.quadtree_buffer, 20.0);
        assert_eq!(config.agent_scope_fov_buffer, 60.0);
        assert_eq!(config.max_quadtree_depth, 16);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PartitionConfig::default();
        config.quadtree_buffer = -1.0;
        assert!(config.validate().unwrap_err().contains("quadtree_buffer"));

        let mut config = PartitionConfig::default();
        config.drive_max_agents = 0;
        assert!(config.validate().unwrap_err().contains("drive_max_agents"));

        let mut config = PartitionConfig::default();
        config.retry_region_divisor = 0;
        assert!(config.validate().is_err());

        let mut config = PartitionConfig::default();
        config.leaf_size = f64::NAN;
        assert!(config.validate().is_err());
    }
}
