//! Configuration management for the simulation runner.
//!
//! Handles loading and validation of the TOML configuration file and applies
//! command-line overrides on top of it.

use anyhow::Context;
use large_sim_core::{PartitionConfig, DRIVE_MAXIMUM_NUM_AGENTS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::CliArgs;

/// Application configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Spatial partitioning tunables
    #[serde(default)]
    pub partition: PartitionConfig,
    /// What to simulate
    pub simulation: SimulationSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Location name passed to every backend call
    pub location: String,
    /// Width of the simulated area in map units
    pub map_width: f64,
    /// Height of the simulated area in map units
    pub map_height: f64,
    /// Side of each initialization region; `partition.leaf_size` when unset
    #[serde(default)]
    pub region_stride: Option<f64>,
    /// Agents sampled in every region at startup
    pub agents_per_region: usize,
    /// Number of drive steps
    pub steps: usize,
    /// Seed for placement and sampling; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
    /// Dispatch drive calls concurrently
    #[serde(default)]
    pub concurrent: bool,
    /// Fail initialization instead of returning fewer agents
    #[serde(default)]
    pub return_exact_agents: bool,
    /// Per-call agent limit of the kinematic backend
    #[serde(default = "default_backend_max_agents")]
    pub backend_max_agents: usize,
    /// Where to write the final state as JSON, if anywhere
    #[serde(default)]
    pub output: Option<String>,
}

fn default_backend_max_agents() -> usize {
    DRIVE_MAXIMUM_NUM_AGENTS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            partition: PartitionConfig::default(),
            simulation: SimulationSettings {
                location: "kinematic:grid".to_string(),
                map_width: 400.0,
                map_height: 400.0,
                region_stride: None,
                agents_per_region: 30,
                steps: 20,
                seed: None,
                concurrent: true,
                return_exact_agents: false,
                backend_max_agents: default_backend_max_agents(),
                output: None,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(steps) = args.steps {
            self.simulation.steps = steps;
        }
        if let Some(seed) = args.seed {
            self.simulation.seed = Some(seed);
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(output) = &args.output {
            self.simulation.output = Some(output.to_string_lossy().to_string());
        }
    }

    /// Side of the regions the map is tiled into.
    pub fn region_stride(&self) -> f64 {
        self.simulation
            .region_stride
            .unwrap_or(self.partition.leaf_size)
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.simulation.output.as_ref().map(PathBuf::from)
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        self.partition.validate()?;

        let sim = &self.simulation;
        if sim.location.is_empty() {
            return Err("Simulation location cannot be empty".to_string());
        }
        if !(sim.map_width > 0.0) || !(sim.map_height > 0.0) {
            return Err(format!(
                "Map dimensions must be positive, got {}x{}",
                sim.map_width, sim.map_height
            ));
        }
        if !(self.region_stride() > 0.0) {
            return Err(format!(
                "Region stride must be positive, got {}",
                self.region_stride()
            ));
        }
        if sim.backend_max_agents == 0 {
            return Err("backend_max_agents must be at least 1".to_string());
        }
        if sim.agents_per_region > sim.backend_max_agents.min(self.partition.initialize_max_agents)
        {
            return Err(format!(
                "agents_per_region ({}) exceeds the agents one initialize call accepts",
                sim.agents_per_region
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.region_stride(), 100.0);
        assert_eq!(config.simulation.backend_max_agents, 100);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("large_sim.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        // The written default reads back unchanged.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[partition]
quadtree_buffer = 20.0
drive_max_agents = 50

[simulation]
location = "carla:Town03"
map_width = 800.0
map_height = 300.0
region_stride = 100.0
agents_per_region = 12
steps = 5
seed = 42
return_exact_agents = true
output = "state.json"

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.partition.quadtree_buffer, 20.0);
        assert_eq!(config.partition.drive_max_agents, 50);
        assert_eq!(config.partition.agent_scope_fov_buffer, 60.0);
        assert_eq!(config.simulation.location, "carla:Town03");
        assert_eq!(config.simulation.map_width, 800.0);
        assert_eq!(config.region_stride(), 100.0);
        assert_eq!(config.simulation.seed, Some(42));
        assert!(config.simulation.return_exact_agents);
        assert!(!config.simulation.concurrent);
        assert_eq!(config.simulation.backend_max_agents, 100);
        assert_eq!(config.output_path(), Some(PathBuf::from("state.json")));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "[simulation]\nsteps = \"ten\"\n")
            .await
            .unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::try_parse_from([
            "large_sim", "--steps", "3", "--seed", "9", "--json-logs", "-o", "out.json",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        config.apply_cli(&args);

        assert_eq!(config.simulation.steps, 3);
        assert_eq!(config.simulation.seed, Some(9));
        assert!(config.logging.json_format);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.output_path(), Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_region_stride_defaults_to_leaf_size() {
        let mut config = AppConfig::default();
        config.partition.leaf_size = 50.0;
        assert_eq!(config.region_stride(), 50.0);

        config.simulation.region_stride = Some(80.0);
        assert_eq!(config.region_stride(), 80.0);

        let mut config = AppConfig::default();
        config.partition.leaf_size = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_values() {
        let mut config = AppConfig::default();
        config.simulation.region_stride = Some(0.0);
        assert!(config.validate().unwrap_err().contains("stride"));

        let mut config = AppConfig::default();
        config.simulation.agents_per_region = 101;
        assert!(config.validate().unwrap_err().contains("agents_per_region"));

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));

        let mut config = AppConfig::default();
        config.partition.retry_region_divisor = 0;
        assert!(config.validate().is_err());
    }
}
