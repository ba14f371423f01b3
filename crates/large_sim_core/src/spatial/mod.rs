//! Spatial partitioning of agents into bounded per-call batches
//!
//! The quadtree here is rebuilt from scratch for every partitioned call; it
//! keeps no state between simulation steps, so agents entering or leaving the
//! map need no incremental maintenance.

mod quadtree;

// Re-export public types
pub use quadtree::{NodeStats, QuadTree, QuadTreeNode, QuadTreeStats};

use crate::region::Region;
use crate::types::{AgentState, Point};

/// Smallest square covering every agent position, with `size_buffer` added
/// to its side so agents never sit exactly on the outer edge.
///
/// Returns `None` when there are no agents.
pub fn bounding_square(states: &[AgentState], size_buffer: f64) -> Option<Region> {
    let first = states.first()?.center;
    let (mut min, mut max) = (first, first);
    for state in &states[1..] {
        min.x = min.x.min(state.center.x);
        min.y = min.y.min(state.center.y);
        max.x = max.x.max(state.center.x);
        max.y = max.y.max(state.center.y);
    }

    let center = Point::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0);
    let size = (max.x - min.x).max(max.y - min.y) + size_buffer;
    Some(Region::new_empty(center, size))
}
