//! Capacity-bounded quadtree used to split agents into per-call batches.
//!
//! Every leaf owns a core region, whose agents it is authoritative for, and a
//! buffer region grown by a fixed margin, whose extra agents it only sees as
//! context. A leaf never holds more than `capacity` agents in total.

use crate::config::PartitionConfig;
use crate::error::{PartitionError, PartitionResult};
use crate::region::Region;
use crate::types::{AgentRecord, Point};

/// A node in the quadtree.
#[derive(Debug, Clone)]
pub struct QuadTreeNode {
    /// Maximum core plus buffer members held by a leaf
    pub capacity: usize,
    /// Authoritative area; agents are recorded here only while a leaf
    pub region: Region,
    /// `region` grown by the buffer margin on all four sides
    pub region_buffer: Region,
    /// Child nodes (NW, NE, SW, SE) - None if leaf
    pub children: Option<Box<[QuadTreeNode; 4]>>,
    /// Agents owned by this leaf
    pub core_members: Vec<AgentRecord>,
    /// Agents visible to this leaf as context only
    pub buffer_members: Vec<AgentRecord>,
    /// Current depth in tree
    pub depth: u8,
    buffer_margin: f64,
    max_depth: u8,
}

impl QuadTreeNode {
    pub fn new(capacity: usize, region: Region, buffer_margin: f64, depth: u8, max_depth: u8) -> Self {
        let region_buffer = region.expanded(buffer_margin);
        Self {
            capacity,
            region,
            region_buffer,
            children: None,
            core_members: Vec::new(),
            buffer_members: Vec::new(),
            depth,
            buffer_margin,
            max_depth,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn member_count(&self) -> usize {
        self.core_members.len() + self.buffer_members.len()
    }

    /// Inserts a record into this subtree.
    ///
    /// `placed` tells whether the record is already owned by another leaf, in
    /// which case it can only be taken as buffer context. Returns whether the
    /// record became a core member somewhere in this subtree.
    pub fn insert(&mut self, record: &AgentRecord, placed: bool) -> bool {
        let position = record.position();
        let in_core = self.region.is_inside(position);
        if !in_core && !self.region_buffer.is_inside(position) {
            return false;
        }

        if self.is_leaf() {
            if self.member_count() < self.capacity {
                return self.admit(record, in_core && !placed);
            }
            if self.depth >= self.max_depth {
                // Full and not allowed to split; the record is not taken here.
                return false;
            }
            self.subdivide();
        }

        self.insert_into_children(record, placed)
    }

    fn admit(&mut self, record: &AgentRecord, as_core: bool) -> bool {
        let target = if as_core {
            &mut self.region
        } else {
            &mut self.region_buffer
        };
        target.insert_agent(
            record.state,
            record.properties.clone(),
            record.recurrent_state.clone().unwrap_or_default(),
        );

        if as_core {
            self.core_members.push(record.clone());
        } else {
            self.buffer_members.push(record.clone());
        }
        as_core
    }

    fn insert_into_children(&mut self, record: &AgentRecord, placed: bool) -> bool {
        let mut placed_here = false;
        if let Some(children) = &mut self.children {
            for child in children.iter_mut() {
                placed_here |= child.insert(record, placed || placed_here);
            }
        }
        placed_here
    }

    /// Splits this leaf into four quadrants and hands its members down.
    fn subdivide(&mut self) {
        let quarter = self.region.size / 4.0;
        let half = self.region.size / 2.0;
        let Point { x, y } = self.region.center;
        let child_depth = self.depth + 1;
        let child = |cx: f64, cy: f64| {
            QuadTreeNode::new(
                self.capacity,
                Region::new_empty(Point::new(cx, cy), half),
                self.buffer_margin,
                child_depth,
                self.max_depth,
            )
        };

        self.children = Some(Box::new([
            // NW (0): top-left
            child(x - quarter, y + quarter),
            // NE (1): top-right
            child(x + quarter, y + quarter),
            // SW (2): bottom-left
            child(x - quarter, y - quarter),
            // SE (3): bottom-right
            child(x + quarter, y - quarter),
        ]));

        self.region.clear_agents();
        self.region_buffer.clear_agents();

        let core_members = std::mem::take(&mut self.core_members);
        let buffer_members = std::mem::take(&mut self.buffer_members);
        for record in &core_members {
            self.insert_into_children(record, false);
        }
        for record in &buffer_members {
            self.insert_into_children(record, true);
        }
    }

    /// Collects every leaf of this subtree.
    pub fn leaf_nodes(&self) -> Vec<&QuadTreeNode> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a QuadTreeNode>) {
        match &self.children {
            None => leaves.push(self),
            Some(children) => {
                for child in children.iter() {
                    child.collect_leaves(leaves);
                }
            }
        }
    }

    /// Gets statistics about this subtree
    pub fn get_stats(&self) -> NodeStats {
        let mut stats = NodeStats {
            core_members: self.core_members.len(),
            buffer_members: self.buffer_members.len(),
            max_depth: self.depth,
            leaf_nodes: 0,
            non_empty_leaves: 0,
            internal_nodes: 0,
        };

        match &self.children {
            None => {
                stats.leaf_nodes = 1;
                if !self.core_members.is_empty() {
                    stats.non_empty_leaves = 1;
                }
            }
            Some(children) => {
                stats.internal_nodes = 1;
                for child in children.iter() {
                    let child_stats = child.get_stats();
                    stats.core_members += child_stats.core_members;
                    stats.buffer_members += child_stats.buffer_members;
                    stats.max_depth = stats.max_depth.max(child_stats.max_depth);
                    stats.leaf_nodes += child_stats.leaf_nodes;
                    stats.non_empty_leaves += child_stats.non_empty_leaves;
                    stats.internal_nodes += child_stats.internal_nodes;
                }
            }
        }

        stats
    }
}

/// Structure of a subtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub core_members: usize,
    pub buffer_members: usize,
    pub max_depth: u8,
    pub leaf_nodes: usize,
    /// Leaves owning at least one core member
    pub non_empty_leaves: usize,
    pub internal_nodes: usize,
}

/// Quadtree built from scratch for a single partitioned call.
pub struct QuadTree {
    root: QuadTreeNode,
    stats: QuadTreeStats,
}

impl QuadTree {
    /// Creates an empty tree whose root covers `region`.
    pub fn new(capacity: usize, region: Region, buffer_margin: f64, max_depth: u8) -> Self {
        Self {
            root: QuadTreeNode::new(capacity, region, buffer_margin, 0, max_depth),
            stats: QuadTreeStats::default(),
        }
    }

    /// Builds a tree holding every record, each owned by exactly one leaf.
    ///
    /// Fails with [`PartitionError::InvalidGeometry`] for a record outside the
    /// root and [`PartitionError::InvalidRequest`] when the depth limit keeps
    /// some records from finding room in a leaf.
    pub fn build(
        records: impl IntoIterator<Item = AgentRecord>,
        capacity: usize,
        root: Region,
        config: &PartitionConfig,
    ) -> PartitionResult<Self> {
        if capacity == 0 {
            return Err(PartitionError::InvalidRequest(
                "quadtree capacity must be at least 1".to_string(),
            ));
        }

        let mut tree = Self::new(capacity, root, config.quadtree_buffer, config.max_quadtree_depth);
        let mut expected = 0;
        for record in records {
            expected += 1;
            if !tree.root.region.is_inside(record.position()) {
                return Err(PartitionError::InvalidGeometry {
                    position: record.position(),
                    context: format!("quadtree root {}", tree.root.region.describe()),
                });
            }
            tree.insert(&record);
        }

        // Core members can also be dropped while a full leaf at maximum depth
        // receives its parent's members, so count what actually landed.
        let owned = tree.root.get_stats().core_members;
        if owned != expected {
            return Err(PartitionError::InvalidRequest(format!(
                "too many co-located agents: {} of {} fit within depth {} at capacity {}",
                owned, expected, config.max_quadtree_depth, capacity
            )));
        }
        Ok(tree)
    }

    /// Inserts a record not yet owned by any leaf.
    pub fn insert(&mut self, record: &AgentRecord) -> bool {
        let placed = self.root.insert(record, false);
        if placed {
            self.stats.records_inserted += 1;
        } else {
            self.stats.records_rejected += 1;
        }
        placed
    }

    pub fn root(&self) -> &QuadTreeNode {
        &self.root
    }

    pub fn leaf_nodes(&self) -> Vec<&QuadTreeNode> {
        self.root.leaf_nodes()
    }

    /// Core regions of every leaf.
    pub fn leaf_regions(&self) -> Vec<&Region> {
        self.leaf_nodes().into_iter().map(|leaf| &leaf.region).collect()
    }

    pub fn get_stats(&self) -> QuadTreeStats {
        let node_stats = self.root.get_stats();
        QuadTreeStats {
            current_depth: node_stats.max_depth,
            leaf_nodes: node_stats.leaf_nodes,
            non_empty_leaves: node_stats.non_empty_leaves,
            internal_nodes: node_stats.internal_nodes,
            buffer_members: node_stats.buffer_members,
            ..self.stats.clone()
        }
    }
}

/// Insertion counters and tree shape for one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuadTreeStats {
    pub records_inserted: usize,
    pub records_rejected: usize,
    pub current_depth: u8,
    pub leaf_nodes: usize,
    pub non_empty_leaves: usize,
    pub internal_nodes: usize,
    pub buffer_members: usize,
}

impl Default for QuadTreeStats {
    fn default() -> Self {
        Self {
            records_inserted: 0,
            records_rejected: 0,
            current_depth: 0,
            leaf_nodes: 1, // Start with root as leaf
            non_empty_leaves: 0,
            internal_nodes: 0,
            buffer_members: 0,
        }
    }
}
