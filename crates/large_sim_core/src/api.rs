//! # Remote Driving Model Interface
//!
//! The partitioners consume two bounded-capacity remote operations:
//!
//! - [`DriveApi::drive`] advances a bounded set of agents by one timestep
//! - [`InitializeApi::initialize`] realizes a bounded set of agents, sampling
//!   the ones that have no known state
//!
//! Both are opaque. Implementations own their transport, timeouts and any
//! retry of transient failures; the partitioners only see the final outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    AgentProperties, AgentState, InfractionIndicators, LightRecurrentState, Point, RecurrentState,
    TrafficLightStates,
};

/// Hard per-call agent limit of the hosted driving model.
pub const DRIVE_MAXIMUM_NUM_AGENTS: usize = 100;

/// Hard per-call agent limit of the hosted initialize endpoint.
pub const INITIALIZE_MAXIMUM_NUM_AGENTS: usize = 100;

// ============================================================================
// Errors
// ============================================================================

/// Whether retrying the same call can reasonably succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    Transient,
    Permanent,
}

/// A failure reported by a remote call.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message} ({kind:?})")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permanent, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

// ============================================================================
// Drive
// ============================================================================

/// Input to a single bounded drive call. All agent lists share one length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveRequest {
    pub location: String,
    pub agent_states: Vec<AgentState>,
    pub agent_properties: Vec<AgentProperties>,
    pub recurrent_states: Option<Vec<RecurrentState>>,
    pub light_recurrent_states: Option<Vec<LightRecurrentState>>,
    pub get_infractions: bool,
    pub random_seed: Option<u64>,
    pub model_version: Option<String>,
}

/// Output of a single bounded drive call, co-indexed with the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveResponse {
    pub agent_states: Vec<AgentState>,
    pub recurrent_states: Vec<RecurrentState>,
    pub is_inside_supported_area: Vec<bool>,
    pub infraction_indicators: Option<Vec<InfractionIndicators>>,
    pub traffic_lights_states: Option<TrafficLightStates>,
    pub light_recurrent_states: Option<Vec<LightRecurrentState>>,
    pub model_version: String,
}

/// The bounded remote drive operation.
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Largest number of agents a single call accepts.
    fn max_agents_per_call(&self) -> usize {
        DRIVE_MAXIMUM_NUM_AGENTS
    }

    async fn drive(&self, request: DriveRequest) -> Result<DriveResponse, RemoteError>;
}

// ============================================================================
// Initialize
// ============================================================================

/// Input to a single bounded initialize call.
///
/// `agent_properties` may be longer than each entry of `states_history`: the
/// trailing properties describe agents the model should sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub location: String,
    pub agent_properties: Vec<AgentProperties>,
    /// One list of predefined agent states per historical timestep
    pub states_history: Option<Vec<Vec<AgentState>>>,
    pub traffic_light_state_history: Option<Vec<TrafficLightStates>>,
    /// Where on the map the sampled agents should be placed
    pub location_of_interest: Option<Point>,
    pub get_infractions: bool,
    pub random_seed: Option<u64>,
    pub model_version: Option<String>,
}

impl InitializeRequest {
    /// Number of agents with a predefined state in this request.
    pub fn predefined_count(&self) -> usize {
        self.states_history
            .as_ref()
            .and_then(|history| history.last())
            .map_or(0, |states| states.len())
    }
}

/// Output of a bounded initialize call. May hold fewer agents than requested.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub agent_states: Vec<AgentState>,
    pub agent_properties: Vec<AgentProperties>,
    pub recurrent_states: Vec<RecurrentState>,
    pub is_inside_supported_area: Option<Vec<bool>>,
    pub infraction_indicators: Option<Vec<InfractionIndicators>>,
    pub traffic_lights_states: Option<TrafficLightStates>,
    pub light_recurrent_states: Option<Vec<LightRecurrentState>>,
    pub model_version: String,
}

impl InitializeResponse {
    /// Number of agents fully described by the response.
    pub fn len(&self) -> usize {
        self.agent_states
            .len()
            .min(self.agent_properties.len())
            .min(self.recurrent_states.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps only the agents at the given indices, in the given order.
    pub(crate) fn select(&self, indices: &[usize]) -> InitializeResponse {
        fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
            indices.iter().filter_map(|&i| items.get(i).cloned()).collect()
        }
        InitializeResponse {
            agent_states: pick(&self.agent_states, indices),
            agent_properties: pick(&self.agent_properties, indices),
            recurrent_states: pick(&self.recurrent_states, indices),
            is_inside_supported_area: self
                .is_inside_supported_area
                .as_ref()
                .map(|flags| pick(flags, indices)),
            infraction_indicators: self
                .infraction_indicators
                .as_ref()
                .map(|flags| pick(flags, indices)),
            traffic_lights_states: self.traffic_lights_states.clone(),
            light_recurrent_states: self.light_recurrent_states.clone(),
            model_version: self.model_version.clone(),
        }
    }
}

/// The bounded remote initialize operation.
#[async_trait]
pub trait InitializeApi: Send + Sync {
    fn max_agents_per_call(&self) -> usize {
        INITIALIZE_MAXIMUM_NUM_AGENTS
    }

    async fn initialize(&self, request: InitializeRequest)
        -> Result<InitializeResponse, RemoteError>;
}
