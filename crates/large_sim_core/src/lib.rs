//! # Large Sim Core
//!
//! Spatial partitioning for driving-model backends that cap the number of
//! agents per call. Large scenes are split into regions that each fit in one
//! call, the calls are dispatched, and the results are reassembled so callers
//! see a single response in their own agent order.
//!
//! ## Core Features
//!
//! - **Quadtree Partitioning**: Agents are split into leaves of bounded
//!   capacity, each leaf carrying a buffer of neighbouring agents as context
//! - **Order Preservation**: Every agent is tagged with its original index, so
//!   responses always come back in the caller's order
//! - **Concurrent Dispatch**: Leaf calls can run concurrently or one at a time
//! - **Region Initialization**: Large starting populations are built region by
//!   region, each call conditioned on what neighbouring regions already hold
//! - **Failure Policy**: Regions that keep failing either abort the call or are
//!   degraded to their predefined agents
//!
//! ## Quick Start Example
//!
//! ```rust
//! use large_sim_core::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), PartitionError> {
//! let backend = Arc::new(KinematicModel::new(10));
//! let partitioner = DrivePartitioner::new(backend, PartitionConfig::default());
//!
//! let states: Vec<AgentState> = (0..40)
//!     .map(|i| AgentState::new((i % 8) as f64 * 40.0, (i / 8) as f64 * 40.0, 0.0, 5.0))
//!     .collect();
//! let properties = vec![AgentProperties::car(); states.len()];
//!
//! let request = LargeDriveRequest::new("carla:Town03", states, properties);
//! let response = partitioner.large_drive(request).await?;
//! assert_eq!(response.agent_states.len(), 40);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod drive;
pub mod error;
pub mod initialize;
pub mod kinematic;
pub mod region;
pub mod spatial;
pub mod types;

// Re-export commonly used types for convenience
pub use api::{
    DriveApi, DriveRequest, DriveResponse, InitializeApi, InitializeRequest, InitializeResponse,
    RemoteError, RemoteErrorKind, DRIVE_MAXIMUM_NUM_AGENTS, INITIALIZE_MAXIMUM_NUM_AGENTS,
};
pub use config::PartitionConfig;
pub use drive::{DrivePartitioner, LargeDriveRequest};
pub use error::{PartitionError, PartitionResult};
pub use initialize::{
    consolidate_all_responses, insert_agents_into_nearest_regions, InitializePartitioner,
    LargeInitializeRequest, RegionMap,
};
pub use kinematic::KinematicModel;
pub use region::{regions_in_grid, Region, DEFAULT_REGION_SIZE};
pub use spatial::{bounding_square, QuadTree, QuadTreeStats};
pub use types::*;
