//! # Partitioned Drive
//!
//! Advances an arbitrarily large population by one timestep using a drive
//! backend that only accepts a bounded number of agents per call.
//!
//! Each step builds a fresh quadtree over the current agent positions and
//! issues one call per non-empty leaf. A leaf's call carries its core agents
//! followed by its buffer agents, so the model sees the neighbours just across
//! the leaf boundary; only the core agents' results are kept. Results are
//! scattered back by each agent's index in the caller's list, so the output
//! order never depends on partition shape or call completion order.

use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::api::{DriveApi, DriveRequest, DriveResponse};
use crate::config::PartitionConfig;
use crate::error::{PartitionError, PartitionResult};
use crate::spatial::{bounding_square, QuadTree, QuadTreeNode};
use crate::types::{
    AgentProperties, AgentRecord, AgentState, InfractionIndicators, LightRecurrentState,
    RecurrentState,
};

/// Input to [`DrivePartitioner::large_drive`].
#[derive(Debug, Clone, PartialEq)]
pub struct LargeDriveRequest {
    pub location: String,
    pub agent_states: Vec<AgentState>,
    pub agent_properties: Vec<AgentProperties>,
    /// Omitted on the first step after a cold start
    pub recurrent_states: Option<Vec<RecurrentState>>,
    pub light_recurrent_states: Option<Vec<LightRecurrentState>>,
    pub get_infractions: bool,
    pub random_seed: Option<u64>,
    pub model_version: Option<String>,
    /// Agents per call; defaults to the configured limit and is clamped to
    /// the backend's hard maximum
    pub single_call_agent_limit: Option<usize>,
    /// Dispatch leaf calls concurrently instead of one after another
    pub concurrent: bool,
}

impl LargeDriveRequest {
    pub fn new(
        location: impl Into<String>,
        agent_states: Vec<AgentState>,
        agent_properties: Vec<AgentProperties>,
    ) -> Self {
        Self {
            location: location.into(),
            agent_states,
            agent_properties,
            recurrent_states: None,
            light_recurrent_states: None,
            get_infractions: false,
            random_seed: None,
            model_version: None,
            single_call_agent_limit: None,
            concurrent: false,
        }
    }

    pub fn with_recurrent_states(mut self, recurrent_states: Vec<RecurrentState>) -> Self {
        self.recurrent_states = Some(recurrent_states);
        self
    }

    pub fn with_call_limit(mut self, limit: usize) -> Self {
        self.single_call_agent_limit = Some(limit);
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    fn validate(&self) -> PartitionResult<()> {
        if self.agent_states.is_empty() {
            return Err(PartitionError::InvalidRequest(
                "large_drive needs at least one agent".to_string(),
            ));
        }
        if self.agent_states.len() != self.agent_properties.len() {
            return Err(PartitionError::InvalidRequest(format!(
                "{} agent states but {} agent properties",
                self.agent_states.len(),
                self.agent_properties.len()
            )));
        }
        if let Some(recurrent_states) = &self.recurrent_states {
            if recurrent_states.len() != self.agent_states.len() {
                return Err(PartitionError::InvalidRequest(format!(
                    "{} agent states but {} recurrent states",
                    self.agent_states.len(),
                    recurrent_states.len()
                )));
            }
        }
        Ok(())
    }

    /// The same request as a single bounded call.
    fn into_drive_request(self) -> DriveRequest {
        DriveRequest {
            location: self.location,
            agent_states: self.agent_states,
            agent_properties: self.agent_properties,
            recurrent_states: self.recurrent_states,
            light_recurrent_states: self.light_recurrent_states,
            get_infractions: self.get_infractions,
            random_seed: self.random_seed,
            model_version: self.model_version,
        }
    }

    fn records(&self) -> impl Iterator<Item = AgentRecord> + '_ {
        self.agent_states
            .iter()
            .zip(&self.agent_properties)
            .enumerate()
            .map(move |(global_index, (state, properties))| AgentRecord {
                state: *state,
                properties: properties.clone(),
                recurrent_state: self
                    .recurrent_states
                    .as_ref()
                    .map(|states| states[global_index].clone()),
                global_index,
            })
    }

    /// Request for one leaf: core agents first, then buffer context.
    fn leaf_request(&self, leaf: &QuadTreeNode) -> DriveRequest {
        let members: Vec<&AgentRecord> =
            leaf.core_members.iter().chain(&leaf.buffer_members).collect();

        DriveRequest {
            location: self.location.clone(),
            agent_states: members.iter().map(|m| m.state).collect(),
            agent_properties: members.iter().map(|m| m.properties.clone()).collect(),
            recurrent_states: self.recurrent_states.as_ref().map(|_| {
                members
                    .iter()
                    .map(|m| m.recurrent_state.clone().unwrap_or_default())
                    .collect()
            }),
            light_recurrent_states: self.light_recurrent_states.clone(),
            get_infractions: self.get_infractions,
            random_seed: self.random_seed,
            model_version: self.model_version.clone(),
        }
    }
}

/// Splits drive calls that exceed the backend's per-call agent limit.
pub struct DrivePartitioner {
    client: Arc<dyn DriveApi>,
    config: PartitionConfig,
}

impl DrivePartitioner {
    pub fn new(client: Arc<dyn DriveApi>, config: PartitionConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Agents per call after clamping to the backend's hard limit.
    pub fn call_capacity(&self, requested: Option<usize>) -> PartitionResult<usize> {
        let limit = self.client.max_agents_per_call();
        let requested = requested.unwrap_or(self.config.drive_max_agents);
        if requested == 0 {
            return Err(PartitionError::InvalidRequest(
                "single_call_agent_limit must be at least 1".to_string(),
            ));
        }
        if requested > limit {
            warn!(
                "Requested {} agents per drive call but the backend accepts at most {}; using {}",
                requested, limit, limit
            );
            return Ok(limit);
        }
        Ok(requested)
    }

    /// Drives every agent one step, splitting the work across as many
    /// bounded calls as needed.
    ///
    /// Index `i` of every per-agent output list describes the agent at index
    /// `i` of the request. Any failed leaf call fails the whole step.
    pub async fn large_drive(&self, request: LargeDriveRequest) -> PartitionResult<DriveResponse> {
        self.config.validate().map_err(PartitionError::Config)?;
        request.validate()?;
        let capacity = self.call_capacity(request.single_call_agent_limit)?;

        let root = bounding_square(&request.agent_states, self.config.quadtree_size_buffer)
            .ok_or_else(|| PartitionError::InvalidRequest("no agents to drive".to_string()))?;
        let tree = QuadTree::build(request.records(), capacity, root, &self.config)?;

        if tree.root().is_leaf() {
            debug!(
                "Driving {} agents in a single call",
                request.agent_states.len()
            );
            return Ok(self.client.drive(request.into_drive_request()).await?);
        }

        let leaves: Vec<&QuadTreeNode> = tree
            .leaf_nodes()
            .into_iter()
            .filter(|leaf| !leaf.core_members.is_empty())
            .collect();
        let stats = tree.get_stats();
        debug!(
            "Driving {} agents in {} calls (capacity {}, depth {}, {} buffer members)",
            request.agent_states.len(),
            leaves.len(),
            capacity,
            stats.current_depth,
            stats.buffer_members
        );

        let core_indices: Vec<Vec<usize>> = leaves
            .iter()
            .map(|leaf| leaf.core_members.iter().map(|m| m.global_index).collect())
            .collect();
        let leaf_requests: Vec<DriveRequest> =
            leaves.iter().map(|leaf| request.leaf_request(leaf)).collect();

        let responses = if request.concurrent {
            try_join_all(leaf_requests.into_iter().map(|r| self.client.drive(r))).await?
        } else {
            let mut responses = Vec::with_capacity(leaf_requests.len());
            for leaf_request in leaf_requests {
                responses.push(self.client.drive(leaf_request).await?);
            }
            responses
        };

        reassemble(request.agent_states.len(), request.get_infractions, &core_indices, responses)
    }
}

/// Scatters each leaf's kept results to their global positions.
fn reassemble(
    agent_count: usize,
    get_infractions: bool,
    core_indices: &[Vec<usize>],
    responses: Vec<DriveResponse>,
) -> PartitionResult<DriveResponse> {
    let mut states: Vec<Option<AgentState>> = vec![None; agent_count];
    let mut recurrent_states: Vec<Option<RecurrentState>> = vec![None; agent_count];
    let mut inside: Vec<Option<bool>> = vec![None; agent_count];
    let mut infractions: Vec<Option<InfractionIndicators>> = vec![None; agent_count];

    for (indices, response) in core_indices.iter().zip(&responses) {
        scatter(&mut states, indices, &response.agent_states)?;
        scatter(&mut recurrent_states, indices, &response.recurrent_states)?;
        scatter(&mut inside, indices, &response.is_inside_supported_area)?;
        if let Some(flags) = &response.infraction_indicators {
            scatter(&mut infractions, indices, flags)?;
        }
    }

    let first = responses.into_iter().next().ok_or(PartitionError::MalformedResponse {
        expected: agent_count,
        actual: 0,
    })?;

    Ok(DriveResponse {
        agent_states: gathered(states)?,
        recurrent_states: gathered(recurrent_states)?,
        is_inside_supported_area: gathered(inside)?,
        infraction_indicators: if get_infractions {
            infractions.into_iter().collect()
        } else {
            None
        },
        traffic_lights_states: first.traffic_lights_states,
        light_recurrent_states: first.light_recurrent_states,
        model_version: first.model_version,
    })
}

fn scatter<T: Clone>(target: &mut [Option<T>], indices: &[usize], source: &[T]) -> PartitionResult<()> {
    if source.len() < indices.len() {
        return Err(PartitionError::MalformedResponse {
            expected: indices.len(),
            actual: source.len(),
        });
    }
    for (value, &global_index) in source.iter().zip(indices) {
        target[global_index] = Some(value.clone());
    }
    Ok(())
}

fn gathered<T>(slots: Vec<Option<T>>) -> PartitionResult<Vec<T>> {
    let expected = slots.len();
    let filled: Vec<T> = slots.into_iter().flatten().collect();
    if filled.len() != expected {
        return Err(PartitionError::MalformedResponse {
            expected,
            actual: filled.len(),
        });
    }
    Ok(filled)
}
