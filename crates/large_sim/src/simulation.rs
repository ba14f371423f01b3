//! Simulation loop: one partitioned initialize, then partitioned drive steps.

use large_sim_core::{
    regions_in_grid, AgentProperties, AgentState, DrivePartitioner, InitializePartitioner,
    KinematicModel, LargeDriveRequest, LargeInitializeRequest, PartitionResult, Point,
    RecurrentState,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Everything needed to continue or replay a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub location: String,
    /// Drive steps completed so far
    pub step: usize,
    pub agent_states: Vec<AgentState>,
    pub agent_properties: Vec<AgentProperties>,
    pub recurrent_states: Vec<RecurrentState>,
}

impl SimulationState {
    pub fn agent_count(&self) -> usize {
        self.agent_states.len()
    }

    /// Writes the state as pretty-printed JSON.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        info!("Wrote final state of {} agents to {}", self.agent_count(), path.display());
        Ok(())
    }
}

/// Drives a partitioned simulation against the in-process kinematic backend.
pub struct Simulation {
    config: AppConfig,
    backend: Arc<KinematicModel>,
    initializer: InitializePartitioner,
    driver: DrivePartitioner,
}

impl Simulation {
    pub fn new(config: AppConfig) -> Self {
        let backend = Arc::new(KinematicModel::new(config.simulation.backend_max_agents));
        let initializer = InitializePartitioner::new(backend.clone(), config.partition.clone());
        let driver = DrivePartitioner::new(backend.clone(), config.partition.clone());
        Self {
            config,
            backend,
            initializer,
            driver,
        }
    }

    /// Populates a grid of regions covering the map.
    pub async fn initialize(&self) -> PartitionResult<SimulationState> {
        let sim = &self.config.simulation;
        let regions = regions_in_grid(
            sim.map_width,
            sim.map_height,
            Point::new(0.0, 0.0),
            self.config.region_stride(),
        )?
        .into_iter()
        .map(|mut region| {
            region.agent_properties = vec![AgentProperties::car(); sim.agents_per_region];
            region
        })
        .collect::<Vec<_>>();
        info!("Initializing {} regions of {} agents", regions.len(), sim.agents_per_region);

        let mut request = LargeInitializeRequest::new(sim.location.clone(), regions)
            .exact(sim.return_exact_agents);
        request.random_seed = sim.seed;
        let response = self.initializer.large_initialize(request).await?;

        Ok(SimulationState {
            location: sim.location.clone(),
            step: 0,
            agent_states: response.agent_states,
            agent_properties: response.agent_properties,
            recurrent_states: response.recurrent_states,
        })
    }

    /// Advances every agent by one step.
    pub async fn step(&self, state: &SimulationState) -> PartitionResult<SimulationState> {
        let request = LargeDriveRequest::new(
            state.location.clone(),
            state.agent_states.clone(),
            state.agent_properties.clone(),
        )
        .with_recurrent_states(state.recurrent_states.clone())
        .concurrent(self.config.simulation.concurrent);
        let response = self.driver.large_drive(request).await?;

        Ok(SimulationState {
            location: state.location.clone(),
            step: state.step + 1,
            agent_states: response.agent_states,
            agent_properties: state.agent_properties.clone(),
            recurrent_states: response.recurrent_states,
        })
    }

    /// Runs the configured number of steps, stopping early once `shutdown`
    /// completes. A step in flight when that happens is discarded.
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<SimulationState>
    where
        F: Future<Output = ()>,
    {
        let mut state = self.initialize().await?;
        if state.agent_count() == 0 {
            warn!("No agents were initialized; nothing to drive");
            return Ok(state);
        }
        info!("Initialized {} agents", state.agent_count());

        tokio::pin!(shutdown);
        let steps = self.config.simulation.steps;
        while state.step < steps {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => None,
                next = self.step(&state) => Some(next),
            };
            match next {
                Some(next) => {
                    state = next?;
                    debug!("Step {}/{} done", state.step, steps);
                }
                None => {
                    info!("Stopping after {} of {} steps", state.step, steps);
                    break;
                }
            }
        }

        info!(
            "Simulation finished: {} agents, {} steps, {} drive calls, {} initialize calls, largest call {} agents",
            state.agent_count(),
            state.step,
            self.backend.drive_calls(),
            self.backend.initialize_calls(),
            self.backend.largest_call()
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use tempfile::TempDir;

    fn small_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.simulation.map_width = 200.0;
        config.simulation.map_height = 200.0;
        config.simulation.agents_per_region = 10;
        config.simulation.steps = 4;
        config.simulation.seed = Some(5);
        config.simulation.return_exact_agents = true;
        config
    }

    #[tokio::test]
    async fn test_run_completes_all_steps() {
        let simulation = Simulation::new(small_config());
        let state = simulation.run(pending()).await.unwrap();
        assert_eq!(state.step, 4);
        assert_eq!(state.agent_count(), 40);
        assert_eq!(state.recurrent_states.len(), 40);
        assert!(state.recurrent_states.iter().all(|r| r.0 == vec![4.0]));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let simulation = Simulation::new(small_config());
        let state = simulation.run(async {}).await.unwrap();
        assert_eq!(state.step, 0);
        assert_eq!(state.agent_count(), 40);
    }

    #[tokio::test]
    async fn test_seeded_runs_are_reproducible() {
        let first = Simulation::new(small_config()).run(pending()).await.unwrap();
        let second = Simulation::new(small_config()).run(pending()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_save_writes_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let simulation = Simulation::new(small_config());
        let state = simulation.initialize().await.unwrap();
        state.save(&path).await.unwrap();

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: SimulationState = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.location, state.location);
        assert_eq!(parsed.agent_count(), state.agent_count());
        assert_eq!(parsed.agent_properties, state.agent_properties);
        for (read, original) in parsed.agent_states.iter().zip(&state.agent_states) {
            assert!(read.center.distance(original.center) < 1e-9);
        }
    }
}
