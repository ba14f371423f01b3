//! # Partitioned Initialize
//!
//! Realizes an arbitrarily large starting population with an initialize
//! backend that only accepts a bounded number of agents per call.
//!
//! The work happens in three phases:
//!
//! 1. **Placement** - agents with a known state go to the region with the
//!    nearest center, agents to be sampled go to a random region
//! 2. **Per-region calls** - regions are initialized one at a time, each call
//!    conditioned on the agents other regions already hold near it
//! 3. **Consolidation** - per-region results are merged so that every
//!    caller-supplied agent comes back at its original index, followed by any
//!    remaining sampled agents
//!
//! A region that keeps failing either fails the whole call (exact mode) or is
//! degraded to its predefined agents and skipped (best-effort mode).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::{InitializeApi, InitializeRequest, InitializeResponse, RemoteError};
use crate::config::PartitionConfig;
use crate::error::{PartitionError, PartitionResult};
use crate::region::Region;
use crate::types::{AgentProperties, AgentState, TrafficLightStates};

/// `(region index, slot within that region)` for every caller-supplied agent,
/// indexed by the agent's position in the caller's lists. A slot past the end
/// of its region's result marks an agent that was dropped.
pub type RegionMap = Vec<(usize, usize)>;

/// Slot recorded for an agent whose region dropped it.
const DROPPED_SLOT: usize = usize::MAX;

/// Input to [`InitializePartitioner::large_initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct LargeInitializeRequest {
    pub location: String,
    /// Regions to populate; agent properties they already carry are sampled
    /// in addition to the agents below
    pub regions: Vec<Region>,
    /// Properties of every caller-supplied agent; the first
    /// `agent_states.len()` entries belong to agents with a known state
    pub agent_properties: Vec<AgentProperties>,
    pub agent_states: Vec<AgentState>,
    pub traffic_light_state_history: Option<Vec<TrafficLightStates>>,
    pub get_infractions: bool,
    pub random_seed: Option<u64>,
    pub model_version: Option<String>,
    /// Fail instead of returning fewer agents than requested
    pub return_exact_agents: bool,
}

impl LargeInitializeRequest {
    pub fn new(location: impl Into<String>, regions: Vec<Region>) -> Self {
        Self {
            location: location.into(),
            regions,
            agent_properties: Vec::new(),
            agent_states: Vec::new(),
            traffic_light_state_history: None,
            get_infractions: false,
            random_seed: None,
            model_version: None,
            return_exact_agents: false,
        }
    }

    pub fn with_agents(
        mut self,
        agent_properties: Vec<AgentProperties>,
        agent_states: Vec<AgentState>,
    ) -> Self {
        self.agent_properties = agent_properties;
        self.agent_states = agent_states;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn exact(mut self, return_exact_agents: bool) -> Self {
        self.return_exact_agents = return_exact_agents;
        self
    }

    fn validate(&self) -> PartitionResult<()> {
        if self.regions.is_empty() {
            return Err(PartitionError::InvalidRequest(
                "large_initialize needs at least one region".to_string(),
            ));
        }
        if self.agent_properties.len() < self.agent_states.len() {
            return Err(PartitionError::InvalidRequest(format!(
                "{} agent states but only {} agent properties",
                self.agent_states.len(),
                self.agent_properties.len()
            )));
        }
        if let Some(region) = self.regions.iter().find(|r| !(r.size > 0.0)) {
            return Err(PartitionError::InvalidRequest(format!(
                "{} has a non-positive size",
                region.describe()
            )));
        }
        for region in &self.regions {
            if region.agent_properties.len() < region.agent_states.len() {
                return Err(PartitionError::InvalidRequest(format!(
                    "{} holds more states than properties",
                    region.describe()
                )));
            }
        }
        Ok(())
    }
}

/// Places caller-supplied agents into regions.
///
/// Agents with a known state go, in input order, to the region whose center is
/// nearest (the first such region on ties) and are recorded after that
/// region's existing predefined agents. The remaining agents only have
/// properties; each is appended to a region chosen uniformly at random.
pub fn insert_agents_into_nearest_regions<R: Rng>(
    regions: &mut [Region],
    agent_properties: &[AgentProperties],
    agent_states: &[AgentState],
    rng: &mut R,
) -> PartitionResult<RegionMap> {
    if regions.is_empty() {
        return Err(PartitionError::InvalidRequest(
            "cannot place agents without regions".to_string(),
        ));
    }
    if agent_properties.len() < agent_states.len() {
        return Err(PartitionError::InvalidRequest(format!(
            "{} agent states but only {} agent properties",
            agent_states.len(),
            agent_properties.len()
        )));
    }

    let mut region_map = RegionMap::with_capacity(agent_properties.len());

    for (state, properties) in agent_states.iter().zip(agent_properties) {
        let region_index = nearest_region(regions, state);
        let region = &mut regions[region_index];
        let slot = region.agent_states.len();
        region.agent_states.push(*state);
        region.agent_properties.insert(slot, properties.clone());
        region_map.push((region_index, slot));
    }

    for properties in &agent_properties[agent_states.len()..] {
        let region_index = rng.gen_range(0..regions.len());
        let region = &mut regions[region_index];
        region.agent_properties.push(properties.clone());
        region_map.push((region_index, region.agent_properties.len() - 1));
    }

    Ok(region_map)
}

fn nearest_region(regions: &[Region], state: &AgentState) -> usize {
    let mut best = (0, f64::INFINITY);
    for (index, region) in regions.iter().enumerate() {
        let distance = region.center.distance(state.center);
        if distance < best.1 {
            best = (index, distance);
        }
    }
    best.0
}

/// Merges per-region results into one response.
///
/// Agents listed in `region_map` come first, in global order, followed by
/// every other agent the regions returned, region by region. In exact mode an
/// agent that cannot be found is an error; otherwise it is left out.
pub fn consolidate_all_responses(
    region_responses: &[Option<InitializeResponse>],
    region_map: &RegionMap,
    return_exact_agents: bool,
) -> PartitionResult<InitializeResponse> {
    let mut consolidated = Consolidated::default();
    let mut consumed: Vec<Vec<bool>> = region_responses
        .iter()
        .map(|response| vec![false; response.as_ref().map_or(0, |r| r.len())])
        .collect();

    let mut unresolved = 0;
    for (global_index, &(region_index, slot)) in region_map.iter().enumerate() {
        let response = region_responses
            .get(region_index)
            .and_then(|r| r.as_ref())
            .filter(|r| slot < r.len());
        match response {
            Some(response) => {
                consolidated.push(response, slot);
                consumed[region_index][slot] = true;
            }
            None if return_exact_agents => {
                error!(
                    "Agent {} has no result in region {} slot {}",
                    global_index, region_index, slot
                );
                return Err(PartitionError::UnresolvedAgentMapping {
                    global_index,
                    region_index,
                    slot,
                });
            }
            None => unresolved += 1,
        }
    }
    if unresolved > 0 {
        warn!(
            "{} of {} requested agents could not be initialized and were dropped",
            unresolved,
            region_map.len()
        );
    }

    for (region_index, response) in region_responses.iter().enumerate() {
        if let Some(response) = response {
            for slot in 0..response.len() {
                if !consumed[region_index][slot] {
                    consolidated.push(response, slot);
                }
            }
        }
    }

    let last = region_responses.iter().rev().flatten().next();
    Ok(consolidated.finish(last))
}

#[derive(Default)]
struct Consolidated {
    agent_states: Vec<AgentState>,
    agent_properties: Vec<AgentProperties>,
    recurrent_states: Vec<crate::types::RecurrentState>,
    inside: Vec<Option<bool>>,
    infractions: Vec<Option<crate::types::InfractionIndicators>>,
}

impl Consolidated {
    fn push(&mut self, response: &InitializeResponse, slot: usize) {
        self.agent_states.push(response.agent_states[slot]);
        self.agent_properties.push(response.agent_properties[slot].clone());
        self.recurrent_states.push(response.recurrent_states[slot].clone());
        self.inside.push(
            response
                .is_inside_supported_area
                .as_ref()
                .and_then(|flags| flags.get(slot).copied()),
        );
        self.infractions.push(
            response
                .infraction_indicators
                .as_ref()
                .and_then(|flags| flags.get(slot).copied()),
        );
    }

    fn finish(self, last: Option<&InitializeResponse>) -> InitializeResponse {
        InitializeResponse {
            agent_states: self.agent_states,
            agent_properties: self.agent_properties,
            recurrent_states: self.recurrent_states,
            is_inside_supported_area: self.inside.into_iter().collect(),
            infraction_indicators: last
                .and_then(|r| r.infraction_indicators.as_ref())
                .and_then(|_| self.infractions.into_iter().collect()),
            traffic_lights_states: last.and_then(|r| r.traffic_lights_states.clone()),
            light_recurrent_states: last.and_then(|r| r.light_recurrent_states.clone()),
            model_version: last.map(|r| r.model_version.clone()).unwrap_or_default(),
        }
    }
}

/// Agents from other regions that condition one region's call.
struct ConditionalAgents {
    states: Vec<AgentState>,
    properties: Vec<AgentProperties>,
}

/// Splits initialize calls across regions that each fit in one call.
pub struct InitializePartitioner {
    client: Arc<dyn InitializeApi>,
    config: PartitionConfig,
}

impl InitializePartitioner {
    pub fn new(client: Arc<dyn InitializeApi>, config: PartitionConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    fn call_capacity(&self) -> usize {
        self.config
            .initialize_max_agents
            .min(self.client.max_agents_per_call())
    }

    /// Initializes every region's agents plus the caller-supplied ones.
    ///
    /// Agents with a known state come back first, at their original indices,
    /// provided every region succeeded.
    pub async fn large_initialize(
        &self,
        mut request: LargeInitializeRequest,
    ) -> PartitionResult<InitializeResponse> {
        self.config.validate().map_err(PartitionError::Config)?;
        request.validate()?;

        let mut rng = match request.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut regions = std::mem::take(&mut request.regions);
        let mut region_map = insert_agents_into_nearest_regions(
            &mut regions,
            &request.agent_properties,
            &request.agent_states,
            &mut rng,
        )?;

        let responses = self
            .initialize_regions(&mut regions, &mut region_map, &request)
            .await?;
        let response =
            consolidate_all_responses(&responses, &region_map, request.return_exact_agents)?;

        info!(
            "Initialized {} agents across {} regions",
            response.agent_states.len(),
            regions.len()
        );
        Ok(response)
    }

    /// Initializes regions one at a time, in order.
    ///
    /// On return every region holds its own realized agents, and the result
    /// for region `i` is at index `i` (`None` for a region that produced
    /// nothing). Entries of `region_map` follow their agents when a region
    /// keeps only part of its result.
    pub async fn initialize_regions(
        &self,
        regions: &mut [Region],
        region_map: &mut RegionMap,
        request: &LargeInitializeRequest,
    ) -> PartitionResult<Vec<Option<InitializeResponse>>> {
        let capacity = self.call_capacity();
        if let Some(region) = regions.iter().find(|r| r.agent_properties.len() > capacity) {
            return Err(PartitionError::InvalidRequest(format!(
                "{} holds {} agents but a call accepts at most {}",
                region.describe(),
                region.agent_properties.len(),
                capacity
            )));
        }

        let attempts = self.config.attempts_per_region(regions.len());
        let mut responses = Vec::with_capacity(regions.len());

        for region_index in 0..regions.len() {
            if regions[region_index].agent_properties.is_empty() {
                debug!("Region {} has no agents, skipping", region_index);
                responses.push(None);
                continue;
            }

            let own_count = regions[region_index].agent_properties.len();
            let conditional =
                self.conditional_agents(regions, region_index, capacity - own_count);
            let response = self
                .initialize_region(region_index, regions, &conditional, request, attempts)
                .await?;
            if let Some((_, kept_slots)) = &response {
                remap_region_slots(region_map, region_index, kept_slots);
            }
            responses.push(response.map(|(response, _)| response));
        }

        Ok(responses)
    }

    /// Collects agents of other regions within the conditioning scope of
    /// region `region_index`, nearest first, at most `limit` of them.
    fn conditional_agents(
        &self,
        regions: &[Region],
        region_index: usize,
        limit: usize,
    ) -> ConditionalAgents {
        let region = &regions[region_index];
        let scope = region.size + self.config.agent_scope_fov_buffer;
        let reach = self.config.region_max_size + self.config.agent_scope_fov_buffer;

        let mut candidates: Vec<(f64, AgentState, AgentProperties)> = Vec::new();
        for (other_index, other) in regions.iter().enumerate() {
            if other_index == region_index || other.center.distance(region.center) > reach {
                continue;
            }
            for (state, properties) in other.agent_states.iter().zip(&other.agent_properties) {
                let distance = state.center.distance(region.center);
                if distance <= scope {
                    candidates.push((distance, *state, properties.clone()));
                }
            }
        }

        if candidates.len() > limit {
            debug!(
                "Region {}: keeping the nearest {} of {} conditional agents",
                region_index,
                limit,
                candidates.len()
            );
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
            candidates.truncate(limit);
        }

        let (states, properties) = candidates
            .into_iter()
            .map(|(_, state, properties)| (state, properties))
            .unzip();
        ConditionalAgents { states, properties }
    }

    fn region_request(
        &self,
        region_index: usize,
        region: &Region,
        conditional: &ConditionalAgents,
        request: &LargeInitializeRequest,
        include_sampled: bool,
    ) -> InitializeRequest {
        let predefined = region.agent_states.len();
        let own_properties = if include_sampled {
            &region.agent_properties[..]
        } else {
            &region.agent_properties[..predefined]
        };

        let states: Vec<AgentState> = conditional
            .states
            .iter()
            .chain(&region.agent_states)
            .copied()
            .collect();
        let properties: Vec<AgentProperties> = conditional
            .properties
            .iter()
            .chain(own_properties)
            .cloned()
            .collect();

        InitializeRequest {
            location: request.location.clone(),
            agent_properties: properties,
            states_history: if states.is_empty() { None } else { Some(vec![states]) },
            traffic_light_state_history: request.traffic_light_state_history.clone(),
            location_of_interest: Some(region.center),
            get_infractions: request.get_infractions,
            random_seed: request
                .random_seed
                .map(|seed| seed.wrapping_add(region_index as u64)),
            model_version: request.model_version.clone(),
        }
    }

    async fn initialize_region(
        &self,
        region_index: usize,
        regions: &mut [Region],
        conditional: &ConditionalAgents,
        request: &LargeInitializeRequest,
        attempts: usize,
    ) -> PartitionResult<Option<(InitializeResponse, Vec<usize>)>> {
        let region_request =
            self.region_request(region_index, &regions[region_index], conditional, request, true);
        debug!(
            "Region {}: {} conditional, {} predefined, {} to sample",
            region_index,
            conditional.states.len(),
            regions[region_index].agent_states.len(),
            regions[region_index].agent_properties.len() - regions[region_index].agent_states.len()
        );

        match self.call_with_retries(region_index, region_request, attempts).await {
            Ok(response) => {
                let (kept, kept_slots) = self.own_agents(
                    &regions[region_index],
                    conditional.states.len(),
                    &response,
                    !request.return_exact_agents,
                );
                store(&mut regions[region_index], &kept);
                Ok(Some((kept, kept_slots)))
            }
            Err((tries, last_error)) if request.return_exact_agents => {
                error!(
                    "Region {} failed after {} attempts: {}",
                    region_index, tries, last_error
                );
                Err(PartitionError::RegionInitializationExhausted {
                    region_index,
                    attempts: tries,
                    last_error,
                })
            }
            Err((tries, last_error)) => {
                warn!(
                    "Region {} failed after {} attempts ({}); continuing without its sampled agents",
                    region_index, tries, last_error
                );
                let region = &mut regions[region_index];
                if region.agent_states.is_empty() {
                    region.clear_agents();
                    return Ok(None);
                }

                let reduced = self.region_request(region_index, region, conditional, request, false);
                let response = self.client.initialize(reduced).await?;
                let (kept, kept_slots) =
                    self.own_agents(region, conditional.states.len(), &response, false);
                store(region, &kept);
                Ok(Some((kept, kept_slots)))
            }
        }
    }

    /// Calls the backend until it succeeds, the attempts run out or it
    /// reports a permanent failure.
    async fn call_with_retries(
        &self,
        region_index: usize,
        region_request: InitializeRequest,
        attempts: usize,
    ) -> Result<InitializeResponse, (usize, RemoteError)> {
        let mut tries = 0;
        loop {
            tries += 1;
            match self.client.initialize(region_request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() && tries < attempts => {
                    debug!(
                        "Region {} attempt {}/{} failed: {}",
                        region_index, tries, attempts, e
                    );
                }
                Err(e) => return Err((tries, e)),
            }
        }
    }

    /// Drops the conditional agents from a response and, when `drop_strays`
    /// is set, any sampled agent that landed outside the region's core.
    ///
    /// Also returns the region slot each kept agent had in the request.
    fn own_agents(
        &self,
        region: &Region,
        conditional_count: usize,
        response: &InitializeResponse,
        drop_strays: bool,
    ) -> (InitializeResponse, Vec<usize>) {
        let predefined = region.agent_states.len();
        let kept: Vec<usize> = (conditional_count..response.len())
            .filter(|&index| {
                let own_slot = index - conditional_count;
                !drop_strays
                    || own_slot < predefined
                    || region.is_inside(response.agent_states[index].center)
            })
            .collect();

        let returned = response.len().saturating_sub(conditional_count);
        if kept.len() < returned {
            debug!(
                "Dropped {} sampled agents outside {}",
                returned - kept.len(),
                region.describe()
            );
        }
        let kept_slots = kept.iter().map(|index| index - conditional_count).collect();
        (response.select(&kept), kept_slots)
    }
}

/// Points the map entries of one region at the slots its agents hold after
/// filtering. `kept_slots[new]` is the slot the agent had before.
fn remap_region_slots(region_map: &mut RegionMap, region_index: usize, kept_slots: &[usize]) {
    if kept_slots.iter().enumerate().all(|(new, &old)| new == old) {
        return;
    }
    for entry in region_map.iter_mut().filter(|(region, _)| *region == region_index) {
        entry.1 = kept_slots
            .iter()
            .position(|&old| old == entry.1)
            .unwrap_or(DROPPED_SLOT);
    }
}

fn store(region: &mut Region, kept: &InitializeResponse) {
    region.agent_states = kept.agent_states.clone();
    region.agent_properties = kept.agent_properties.clone();
    region.recurrent_states = kept.recurrent_states.clone();
}
