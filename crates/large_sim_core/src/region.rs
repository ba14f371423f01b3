//! Square map regions owning co-indexed agent lists.

use serde::{Deserialize, Serialize};

use crate::error::{PartitionError, PartitionResult};
use crate::types::{AgentProperties, AgentState, Point, RecurrentState};

/// Default side length of a region, in map units.
pub const DEFAULT_REGION_SIZE: f64 = 100.0;

/// An axis-aligned square area of the map and the agents associated with it.
///
/// Index `i` in the three lists describes one agent. While agents are being
/// placed for initialization the property list may run ahead of the other two
/// (trailing agents are still to be sampled); [`Region::is_complete`] reports
/// whether the lists are fully aligned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub center: Point,
    pub size: f64,
    #[serde(default)]
    pub agent_states: Vec<AgentState>,
    #[serde(default)]
    pub agent_properties: Vec<AgentProperties>,
    #[serde(default)]
    pub recurrent_states: Vec<RecurrentState>,
}

impl Region {
    /// Creates an empty square region.
    pub fn new_empty(center: Point, size: f64) -> Self {
        Self {
            center,
            size,
            agent_states: Vec::new(),
            agent_properties: Vec::new(),
            recurrent_states: Vec::new(),
        }
    }

    /// Creates a square region holding the given agents.
    ///
    /// Every state needs properties, and recurrent states are either absent or
    /// one per state. Fails with [`PartitionError::InvalidGeometry`] if any
    /// state lies outside the square.
    pub fn create_square(
        center: Point,
        size: f64,
        agent_states: Vec<AgentState>,
        agent_properties: Vec<AgentProperties>,
        recurrent_states: Vec<RecurrentState>,
    ) -> PartitionResult<Self> {
        if !(size > 0.0) {
            return Err(PartitionError::InvalidRequest(format!(
                "region size must be positive, got {size}"
            )));
        }
        if agent_properties.len() < agent_states.len() {
            return Err(PartitionError::InvalidRequest(format!(
                "{} agent states but only {} agent properties",
                agent_states.len(),
                agent_properties.len()
            )));
        }
        if !recurrent_states.is_empty() && recurrent_states.len() != agent_states.len() {
            return Err(PartitionError::InvalidRequest(format!(
                "{} recurrent states for {} agent states",
                recurrent_states.len(),
                agent_states.len()
            )));
        }
        let region = Self {
            center,
            size,
            agent_states,
            agent_properties,
            recurrent_states,
        };
        if let Some(outside) = region.agent_states.iter().find(|s| !region.is_inside(s.center)) {
            return Err(PartitionError::InvalidGeometry {
                position: outside.center,
                context: region.describe(),
            });
        }
        Ok(region)
    }

    pub fn half_size(&self) -> f64 {
        self.size / 2.0
    }

    /// Lower-left corner.
    pub fn min(&self) -> Point {
        Point::new(self.center.x - self.half_size(), self.center.y - self.half_size())
    }

    /// Upper-right corner.
    pub fn max(&self) -> Point {
        Point::new(self.center.x + self.half_size(), self.center.y + self.half_size())
    }

    /// Closed-interval containment test on both axes.
    ///
    /// A point on an edge shared by two adjacent regions is inside both.
    pub fn is_inside(&self, point: Point) -> bool {
        let (min, max) = (self.min(), self.max());
        point.x >= min.x && point.x <= max.x && point.y >= min.y && point.y <= max.y
    }

    /// An empty square with the same center, grown by `margin` on every side.
    pub fn expanded(&self, margin: f64) -> Region {
        Region::new_empty(self.center, self.size + 2.0 * margin)
    }

    pub fn insert_agent(
        &mut self,
        state: AgentState,
        properties: AgentProperties,
        recurrent_state: RecurrentState,
    ) {
        self.agent_states.push(state);
        self.agent_properties.push(properties);
        self.recurrent_states.push(recurrent_state);
    }

    pub fn clear_agents(&mut self) {
        self.agent_states.clear();
        self.agent_properties.clear();
        self.recurrent_states.clear();
    }

    /// Number of agents with a known state.
    pub fn len(&self) -> usize {
        self.agent_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agent_states.is_empty() && self.agent_properties.is_empty()
    }

    /// Whether all three lists have the same length.
    pub fn is_complete(&self) -> bool {
        self.agent_states.len() == self.agent_properties.len()
            && self.agent_properties.len() == self.recurrent_states.len()
    }

    pub(crate) fn describe(&self) -> String {
        format!(
            "region centered at ({}, {}) with size {}",
            self.center.x, self.center.y, self.size
        )
    }
}

/// Tiles a `width` x `height` area centered at `map_center` with square
/// regions of side `stride`, row by row from the lower-left corner.
///
/// The last row and column may extend past the area when the dimensions are
/// not multiples of `stride`.
pub fn regions_in_grid(
    width: f64,
    height: f64,
    map_center: Point,
    stride: f64,
) -> PartitionResult<Vec<Region>> {
    if !(stride > 0.0) || !(width > 0.0) || !(height > 0.0) {
        return Err(PartitionError::InvalidRequest(format!(
            "grid dimensions must be positive (width {width}, height {height}, stride {stride})"
        )));
    }

    let columns = (width / stride).ceil() as usize;
    let rows = (height / stride).ceil() as usize;
    let origin = Point::new(map_center.x - width / 2.0, map_center.y - height / 2.0);

    let mut regions = Vec::with_capacity(columns * rows);
    for row in 0..rows {
        for column in 0..columns {
            let center = Point::new(
                origin.x + stride * (column as f64 + 0.5),
                origin.y + stride * (row as f64 + 0.5),
            );
            regions.push(Region::new_empty(center, stride));
        }
    }
    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_inside_is_closed_on_every_edge() {
        let region = Region::new_empty(Point::new(0.0, 0.0), 100.0);
        assert!(region.is_inside(Point::new(0.0, 0.0)));
        assert!(region.is_inside(Point::new(50.0, 50.0)));
        assert!(region.is_inside(Point::new(-50.0, -50.0)));
        assert!(region.is_inside(Point::new(-50.0, 12.0)));
        assert!(!region.is_inside(Point::new(50.001, 0.0)));
        assert!(!region.is_inside(Point::new(0.0, -50.001)));
    }

    #[test]
    fn test_shared_edge_belongs_to_both_neighbours() {
        let west = Region::new_empty(Point::new(-50.0, 0.0), 100.0);
        let east = Region::new_empty(Point::new(50.0, 0.0), 100.0);
        let on_edge = Point::new(0.0, 10.0);
        assert!(west.is_inside(on_edge));
        assert!(east.is_inside(on_edge));
    }

    #[test]
    fn test_create_square_rejects_outside_states() {
        let inside = AgentState::new(10.0, 10.0, 0.0, 1.0);
        let outside = AgentState::new(80.0, 0.0, 0.0, 1.0);

        let ok = Region::create_square(
            Point::new(0.0, 0.0),
            100.0,
            vec![inside],
            vec![AgentProperties::car()],
            vec![RecurrentState::default()],
        );
        assert!(ok.is_ok());

        let err = Region::create_square(
            Point::new(0.0, 0.0),
            100.0,
            vec![inside, outside],
            vec![AgentProperties::car(); 2],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, PartitionError::InvalidGeometry { position, .. } if position.x == 80.0));
    }

    #[test]
    fn test_create_square_rejects_misaligned_lists() {
        let states = vec![AgentState::new(1.0, 1.0, 0.0, 0.0); 2];
        let create = |properties: usize, recurrent: usize| {
            Region::create_square(
                Point::new(0.0, 0.0),
                100.0,
                states.clone(),
                vec![AgentProperties::car(); properties],
                vec![RecurrentState::default(); recurrent],
            )
        };

        assert!(matches!(create(1, 2), Err(PartitionError::InvalidRequest(_))));
        assert!(matches!(create(2, 1), Err(PartitionError::InvalidRequest(_))));
        // Trailing properties describe agents still to be sampled.
        let region = create(3, 0).unwrap();
        assert!(!region.is_complete());
        assert!(create(2, 2).unwrap().is_complete());
    }

    #[test]
    fn test_insert_and_clear() {
        let mut region = Region::new_empty(Point::new(0.0, 0.0), 100.0);
        region.insert_agent(
            AgentState::new(1.0, 2.0, 0.0, 0.0),
            AgentProperties::car(),
            RecurrentState(vec![0.5]),
        );
        assert_eq!(region.len(), 1);
        assert!(region.is_complete());

        region.agent_properties.push(AgentProperties::pedestrian());
        assert!(!region.is_complete());

        region.clear_agents();
        assert!(region.is_empty());
        assert!(region.is_complete());
    }

    #[test]
    fn test_expanded_keeps_center() {
        let region = Region::new_empty(Point::new(10.0, -5.0), 100.0);
        let buffer = region.expanded(35.0);
        assert_eq!(buffer.center, region.center);
        assert_eq!(buffer.size, 170.0);
        assert!(buffer.is_inside(Point::new(94.0, -5.0)));
        assert!(!region.is_inside(Point::new(94.0, -5.0)));
    }

    #[test]
    fn test_regions_in_grid() {
        let regions = regions_in_grid(200.0, 100.0, Point::new(0.0, 0.0), 100.0).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].center, Point::new(-50.0, 0.0));
        assert_eq!(regions[1].center, Point::new(50.0, 0.0));

        let regions = regions_in_grid(250.0, 250.0, Point::new(0.0, 0.0), 100.0).unwrap();
        assert_eq!(regions.len(), 9);
        assert!(regions.iter().all(|r| r.size == 100.0));

        assert!(regions_in_grid(100.0, 100.0, Point::new(0.0, 0.0), 0.0).is_err());
    }
}
