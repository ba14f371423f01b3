//! # Kinematic Backend
//!
//! A local stand-in for the hosted driving model. Agents move at constant
//! speed along their heading, and sampled agents are scattered uniformly
//! around the location of interest. It enforces the same per-call agent limit
//! as the hosted service, which makes it useful for offline runs and for
//! exercising the partitioners.
//!
//! Failures can be scripted to test retry and degradation paths.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::trace;

use crate::api::{
    DriveApi, DriveRequest, DriveResponse, InitializeApi, InitializeRequest, InitializeResponse,
    RemoteError, DRIVE_MAXIMUM_NUM_AGENTS,
};
use crate::types::{
    AgentProperties, AgentState, AgentType, InfractionIndicators, LightRecurrentState, Point,
    RecurrentState, TrafficLightState, TrafficLightStates,
};

/// Seconds advanced by one drive call.
pub const TIME_STEP: f64 = 0.1;

const MODEL_VERSION: &str = "kinematic-1";

/// Distance under which two agents count as colliding.
const COLLISION_DISTANCE: f64 = 1.0;

/// Constant-velocity driving model with scripted failures.
#[derive(Debug)]
pub struct KinematicModel {
    max_agents: usize,
    /// Side of the square, centred on the location of interest, in which
    /// agents are sampled
    sampling_extent: f64,
    drive_calls: AtomicUsize,
    initialize_calls: AtomicUsize,
    largest_call: AtomicUsize,
    /// Seed for calls that do not bring their own
    next_seed: AtomicU64,
    failing_initialize_calls: AtomicUsize,
    rejected_sampling_sites: Mutex<Vec<Point>>,
}

impl Default for KinematicModel {
    fn default() -> Self {
        Self::new(DRIVE_MAXIMUM_NUM_AGENTS)
    }
}

impl KinematicModel {
    pub fn new(max_agents: usize) -> Self {
        Self {
            max_agents,
            sampling_extent: 100.0,
            drive_calls: AtomicUsize::new(0),
            initialize_calls: AtomicUsize::new(0),
            largest_call: AtomicUsize::new(0),
            next_seed: AtomicU64::new(0),
            failing_initialize_calls: AtomicUsize::new(0),
            rejected_sampling_sites: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sampling_extent(mut self, extent: f64) -> Self {
        self.sampling_extent = extent;
        self
    }

    /// Makes the next `count` initialize calls fail transiently.
    pub fn fail_next_initialize_calls(&self, count: usize) {
        self.failing_initialize_calls.store(count, Ordering::SeqCst);
    }

    /// Makes every initialize call centred on `site` that asks for sampled
    /// agents fail permanently. Calls with only predefined agents still work.
    pub fn reject_sampling_at(&self, site: Point) {
        if let Ok(mut sites) = self.rejected_sampling_sites.lock() {
            sites.push(site);
        }
    }

    pub fn drive_calls(&self) -> usize {
        self.drive_calls.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    /// Most agents seen in a single call of either kind.
    pub fn largest_call(&self) -> usize {
        self.largest_call.load(Ordering::SeqCst)
    }

    fn check_capacity(&self, agents: usize) -> Result<(), RemoteError> {
        self.largest_call.fetch_max(agents, Ordering::SeqCst);
        if agents > self.max_agents {
            return Err(RemoteError::permanent(format!(
                "{} agents exceed the limit of {} per call",
                agents, self.max_agents
            )));
        }
        Ok(())
    }

    fn rng_for(&self, seed: Option<u64>) -> StdRng {
        let seed = seed.unwrap_or_else(|| self.next_seed.fetch_add(1, Ordering::SeqCst));
        StdRng::seed_from_u64(seed)
    }

    fn sampling_rejected(&self, site: Option<Point>) -> bool {
        let Some(site) = site else {
            return false;
        };
        self.rejected_sampling_sites
            .lock()
            .map(|sites| sites.contains(&site))
            .unwrap_or(false)
    }

    fn take_scripted_failure(&self) -> bool {
        self.failing_initialize_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Moves one agent along its heading for one time step.
fn advance(state: &AgentState) -> AgentState {
    let distance = state.speed * TIME_STEP;
    AgentState {
        center: Point::new(
            state.center.x + distance * state.orientation.cos(),
            state.center.y + distance * state.orientation.sin(),
        ),
        ..*state
    }
}

/// Recurrent state counting the steps an agent has been driven.
fn next_recurrent(previous: Option<&RecurrentState>) -> RecurrentState {
    let steps = previous.and_then(|r| r.0.first().copied()).unwrap_or(0.0);
    RecurrentState(vec![steps + 1.0])
}

/// Seconds a light stays in one phase.
const LIGHT_PHASE: f64 = 10.0;

/// Advances a light's phase clock, moving to the next phase when it runs out.
fn tick_light(light: &LightRecurrentState) -> LightRecurrentState {
    let time_remaining = light.time_remaining - TIME_STEP;
    if time_remaining > 0.0 {
        return LightRecurrentState { time_remaining, ..*light };
    }
    LightRecurrentState {
        state: (light.state + 1.0) % 3.0,
        time_remaining: LIGHT_PHASE,
    }
}

fn light_color(light: &LightRecurrentState) -> TrafficLightState {
    match light.state.round() as i64 {
        0 => TrafficLightState::Green,
        1 => TrafficLightState::Yellow,
        _ => TrafficLightState::Red,
    }
}

fn collisions(states: &[AgentState]) -> Vec<InfractionIndicators> {
    let mut infractions = vec![InfractionIndicators::default(); states.len()];
    for i in 0..states.len() {
        for j in (i + 1)..states.len() {
            if states[i].center.distance(states[j].center) < COLLISION_DISTANCE {
                infractions[i].collisions = true;
                infractions[j].collisions = true;
            }
        }
    }
    infractions
}

fn with_default_dimensions(properties: &AgentProperties) -> AgentProperties {
    let (length, width, rear_axis_offset) = match properties.agent_type {
        AgentType::Car => (4.5, 2.0, 1.4),
        AgentType::Pedestrian => (0.8, 0.8, 0.0),
    };
    AgentProperties {
        length: properties.length.or(Some(length)),
        width: properties.width.or(Some(width)),
        rear_axis_offset: properties.rear_axis_offset.or(Some(rear_axis_offset)),
        ..properties.clone()
    }
}

#[async_trait]
impl DriveApi for KinematicModel {
    fn max_agents_per_call(&self) -> usize {
        self.max_agents
    }

    async fn drive(&self, request: DriveRequest) -> Result<DriveResponse, RemoteError> {
        self.drive_calls.fetch_add(1, Ordering::SeqCst);
        let count = request.agent_states.len();
        self.check_capacity(count)?;
        if request.agent_properties.len() != count {
            return Err(RemoteError::permanent(format!(
                "{} agent states but {} agent properties",
                count,
                request.agent_properties.len()
            )));
        }
        trace!("Driving {} agents in {}", count, request.location);

        let agent_states: Vec<AgentState> = request.agent_states.iter().map(advance).collect();
        let recurrent_states = (0..count)
            .map(|i| {
                next_recurrent(request.recurrent_states.as_ref().and_then(|r| r.get(i)))
            })
            .collect();

        let (traffic_lights_states, light_recurrent_states) = match request.light_recurrent_states
        {
            Some(lights) => {
                let lights: Vec<LightRecurrentState> = lights.iter().map(tick_light).collect();
                let states: TrafficLightStates = lights
                    .iter()
                    .enumerate()
                    .map(|(id, light)| (id as u64, light_color(light)))
                    .collect();
                (Some(states), Some(lights))
            }
            None => (None, None),
        };

        Ok(DriveResponse {
            infraction_indicators: request.get_infractions.then(|| collisions(&agent_states)),
            is_inside_supported_area: vec![true; count],
            agent_states,
            recurrent_states,
            traffic_lights_states,
            light_recurrent_states,
            model_version: request
                .model_version
                .unwrap_or_else(|| MODEL_VERSION.to_string()),
        })
    }
}

#[async_trait]
impl InitializeApi for KinematicModel {
    fn max_agents_per_call(&self) -> usize {
        self.max_agents
    }

    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<InitializeResponse, RemoteError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        let count = request.agent_properties.len();
        self.check_capacity(count)?;

        if self.take_scripted_failure() {
            return Err(RemoteError::transient("scripted initialize failure"));
        }

        let predefined = request.predefined_count();
        if predefined > count {
            return Err(RemoteError::permanent(format!(
                "{} predefined states but {} agent properties",
                predefined, count
            )));
        }
        if predefined < count && self.sampling_rejected(request.location_of_interest) {
            return Err(RemoteError::permanent("no drivable area to sample agents"));
        }

        let site = request.location_of_interest.unwrap_or_default();
        let half = self.sampling_extent / 2.0;
        let mut rng = self.rng_for(request.random_seed);
        let mut agent_states: Vec<AgentState> = request
            .states_history
            .as_ref()
            .and_then(|history| history.last().cloned())
            .unwrap_or_default();
        while agent_states.len() < count {
            agent_states.push(AgentState {
                center: Point::new(
                    site.x + rng.gen_range(-half..half),
                    site.y + rng.gen_range(-half..half),
                ),
                orientation: rng.gen_range(-PI..PI),
                speed: rng.gen_range(0.0..10.0),
            });
        }
        trace!("Initialized {} agents around ({}, {})", count, site.x, site.y);

        let traffic_lights_states = request
            .traffic_light_state_history
            .as_ref()
            .and_then(|history| history.last().cloned())
            .or_else(|| Some(TrafficLightStates::from([(0, TrafficLightState::Green)])));

        Ok(InitializeResponse {
            agent_properties: request.agent_properties.iter().map(with_default_dimensions).collect(),
            recurrent_states: vec![RecurrentState::default(); count],
            is_inside_supported_area: Some(vec![true; count]),
            infraction_indicators: request.get_infractions.then(|| collisions(&agent_states)),
            agent_states,
            traffic_lights_states,
            light_recurrent_states: None,
            model_version: request
                .model_version
                .unwrap_or_else(|| MODEL_VERSION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_request(states: Vec<AgentState>) -> DriveRequest {
        DriveRequest {
            location: "test:map".to_string(),
            agent_properties: vec![AgentProperties::car(); states.len()],
            agent_states: states,
            recurrent_states: None,
            light_recurrent_states: None,
            get_infractions: false,
            random_seed: None,
            model_version: None,
        }
    }

    fn initialize_request(count: usize, site: Point) -> InitializeRequest {
        InitializeRequest {
            location: "test:map".to_string(),
            agent_properties: vec![AgentProperties::car(); count],
            states_history: None,
            traffic_light_state_history: None,
            location_of_interest: Some(site),
            get_infractions: false,
            random_seed: Some(3),
            model_version: None,
        }
    }

    #[tokio::test]
    async fn test_drive_moves_along_heading() {
        let model = KinematicModel::default();
        let request = drive_request(vec![AgentState::new(0.0, 0.0, 0.0, 10.0)]);
        let response = model.drive(request).await.unwrap();

        let moved = response.agent_states[0];
        assert!((moved.center.x - 1.0).abs() < 1e-9);
        assert!(moved.center.y.abs() < 1e-9);
        assert_eq!(moved.speed, 10.0);
        assert_eq!(response.recurrent_states[0], RecurrentState(vec![1.0]));
        assert_eq!(response.model_version, MODEL_VERSION);
    }

    #[tokio::test]
    async fn test_drive_enforces_call_limit() {
        let model = KinematicModel::new(2);
        let states = vec![AgentState::new(0.0, 0.0, 0.0, 0.0); 3];
        let err = model.drive(drive_request(states)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(model.largest_call(), 3);
    }

    #[tokio::test]
    async fn test_drive_reports_collisions() {
        let model = KinematicModel::default();
        let mut request = drive_request(vec![
            AgentState::new(0.0, 0.0, 0.0, 0.0),
            AgentState::new(0.5, 0.0, 0.0, 0.0),
            AgentState::new(20.0, 0.0, 0.0, 0.0),
        ]);
        request.get_infractions = true;
        let response = model.drive(request).await.unwrap();
        let hits: Vec<bool> = response
            .infraction_indicators
            .unwrap()
            .iter()
            .map(|i| i.collisions)
            .collect();
        assert_eq!(hits, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_traffic_lights_cycle() {
        let model = KinematicModel::default();
        let mut request = drive_request(vec![AgentState::new(0.0, 0.0, 0.0, 0.0)]);
        request.light_recurrent_states = Some(vec![
            LightRecurrentState { state: 0.0, time_remaining: 0.05 },
            LightRecurrentState { state: 2.0, time_remaining: 5.0 },
        ]);
        let response = model.drive(request).await.unwrap();

        let lights = response.traffic_lights_states.unwrap();
        assert_eq!(lights[&0u64], TrafficLightState::Yellow);
        assert_eq!(lights[&1u64], TrafficLightState::Red);
        let carried = response.light_recurrent_states.unwrap();
        assert_eq!(carried[0].time_remaining, LIGHT_PHASE);
    }

    #[tokio::test]
    async fn test_initialize_keeps_predefined_and_samples_near_site() {
        let model = KinematicModel::default();
        let site = Point::new(200.0, -50.0);
        let predefined = AgentState::new(190.0, -40.0, 1.0, 2.0);
        let mut request = initialize_request(5, site);
        request.states_history = Some(vec![vec![predefined]]);

        let response = model.initialize(request.clone()).await.unwrap();
        assert_eq!(response.len(), 5);
        assert_eq!(response.agent_states[0], predefined);
        for state in &response.agent_states[1..] {
            assert!((state.center.x - site.x).abs() <= 50.0);
            assert!((state.center.y - site.y).abs() <= 50.0);
        }
        assert_eq!(response.agent_properties[1].length, Some(4.5));

        // Same seed, same agents.
        let again = model.initialize(request).await.unwrap();
        assert_eq!(again.agent_states, response.agent_states);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let model = KinematicModel::default();
        model.fail_next_initialize_calls(2);
        let site = Point::new(0.0, 0.0);

        assert!(model.initialize(initialize_request(1, site)).await.unwrap_err().is_transient());
        assert!(model.initialize(initialize_request(1, site)).await.is_err());
        assert!(model.initialize(initialize_request(1, site)).await.is_ok());

        model.reject_sampling_at(site);
        let err = model.initialize(initialize_request(1, site)).await.unwrap_err();
        assert!(!err.is_transient());

        let mut predefined_only = initialize_request(1, site);
        predefined_only.states_history = Some(vec![vec![AgentState::new(1.0, 1.0, 0.0, 0.0)]]);
        assert!(model.initialize(predefined_only).await.is_ok());
        assert_eq!(model.initialize_calls(), 5);
    }
}
