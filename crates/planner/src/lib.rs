//! Physical plan and distribution model for Wavefront queries.
//!
//! Two plan representations live here:
//! - [`plan`]: the arena-backed tree the planner and fragmenter operate on.
//! - [`fragment`]: the serde wire tree dispatched to compute nodes.
//!
//! [`distribution`] bridges them, lowering planner distributions to wire
//! exchange descriptors.

pub mod distribution;
pub mod fragment;
pub mod plan;

pub use distribution::Distribution;
pub use fragment::{
    DataChunk, DistributionInfo, DistributionMode, ExchangeInfo, ExchangeSource, FragmentNode,
    FragmentNodeBody, HostAddr, PlanFragment, TaskLocator, TaskOutputId,
};
pub use plan::{NodeBody, PlanArena, PlanNode, PlanNodeId};
