//! # Core Type Definitions
//!
//! Plain data types shared by the partitioners and the remote API layer.
//!
//! ## Key Types
//!
//! - [`Point`] - 2D map position in map units
//! - [`AgentState`] - kinematic state of one agent at one timestep
//! - [`AgentProperties`] - static description of an agent (car or pedestrian)
//! - [`RecurrentState`] - opaque blob the driving model threads between calls
//! - [`AgentRecord`] - an agent tagged with its position in the caller's list

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{PartitionError, PartitionResult};

// ============================================================================
// Geometry
// ============================================================================

/// A position on the map, in map units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

// ============================================================================
// Agents
// ============================================================================

/// Kinematic state of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Position of the agent's center
    pub center: Point,
    /// Heading in radians, counter-clockwise from the +x axis
    pub orientation: f64,
    /// Speed in map units per second
    pub speed: f64,
}

impl AgentState {
    pub fn new(x: f64, y: f64, orientation: f64, speed: f64) -> Self {
        Self {
            center: Point::new(x, y),
            orientation,
            speed,
        }
    }
}

/// Discriminant for the kinds of agents the driving model understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Car,
    Pedestrian,
}

/// Static agent description.
///
/// Every dimension is optional: agents whose dimensions are left empty get
/// them sampled by the remote initialize call. Use [`AgentProperties::new`]
/// when dimensions are known so they are validated once, up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProperties {
    pub agent_type: AgentType,
    /// Bounding box length in map units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<f64>,
    /// Bounding box width in map units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    /// Distance from the center to the rear axle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rear_axis_offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    /// Point the agent is trying to reach, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waypoint: Option<Point>,
}

impl AgentProperties {
    /// Builds fully specified properties, rejecting non-physical dimensions.
    pub fn new(
        agent_type: AgentType,
        length: f64,
        width: f64,
        rear_axis_offset: f64,
        max_speed: Option<f64>,
    ) -> PartitionResult<Self> {
        if !(length > 0.0) || !(width > 0.0) {
            return Err(PartitionError::InvalidRequest(format!(
                "agent dimensions must be positive, got length {length} width {width}"
            )));
        }
        if let Some(max_speed) = max_speed {
            if !(max_speed >= 0.0) {
                return Err(PartitionError::InvalidRequest(format!(
                    "max_speed must be non-negative, got {max_speed}"
                )));
            }
        }
        Ok(Self {
            agent_type,
            length: Some(length),
            width: Some(width),
            rear_axis_offset: Some(rear_axis_offset),
            max_speed,
            waypoint: None,
        })
    }

    /// A car whose dimensions are left for the model to sample.
    pub fn car() -> Self {
        Self::of_type(AgentType::Car)
    }

    /// A pedestrian whose dimensions are left for the model to sample.
    pub fn pedestrian() -> Self {
        Self::of_type(AgentType::Pedestrian)
    }

    fn of_type(agent_type: AgentType) -> Self {
        Self {
            agent_type,
            length: None,
            width: None,
            rear_axis_offset: None,
            max_speed: None,
            waypoint: None,
        }
    }

    pub fn with_waypoint(mut self, waypoint: Point) -> Self {
        self.waypoint = Some(waypoint);
        self
    }
}

/// Opaque per-agent memory returned by the driving model.
///
/// The contents are never inspected here; they only travel alongside the
/// agent they belong to.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecurrentState(pub Vec<f32>);

/// Per-agent infraction flags reported by the driving model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfractionIndicators {
    pub collisions: bool,
    pub offroad: bool,
    pub wrong_way: bool,
}

// ============================================================================
// Traffic lights
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLightState {
    Red,
    Yellow,
    Green,
}

/// Light id to current state, for every light at the location.
pub type TrafficLightStates = HashMap<u64, TrafficLightState>;

/// Recurrent state for one light group, carried between drive calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightRecurrentState {
    pub state: f64,
    pub time_remaining: f64,
}

// ============================================================================
// Partitioning records
// ============================================================================

/// An agent tagged with its index in the caller's original list.
///
/// `global_index` is the join key used to put partitioned results back in
/// the caller's order.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub state: AgentState,
    pub properties: AgentProperties,
    pub recurrent_state: Option<RecurrentState>,
    pub global_index: usize,
}

impl AgentRecord {
    pub fn position(&self) -> Point {
        self.state.center
    }
}
