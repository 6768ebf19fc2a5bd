//! Stage-based distributed query scheduler.
//!
//! Takes an optimized physical plan, cuts it into stages at exchange
//! boundaries, assigns each stage a set of compute workers, and dispatches
//! serialized per-task plan fragments so that parallel tasks fetch
//! correctly-partitioned data from their upstream stages.
//!
//! Module map:
//! - [`query`]: fragmenting a plan into a stage DAG.
//! - [`stage`]: stage lifecycle and per-task fragment serialization.
//! - [`query_manager`]: worker assignment, dispatch, results, cancellation.
//! - [`worker`]: cluster membership.
//! - [`streaming`]: the persistent-actor analogue used for materialized
//!   views.
//! - [`grpc`] (feature `grpc`): tonic clients for the compute and meta
//!   services.

pub mod query;
pub mod query_manager;
pub mod stage;
pub mod streaming;
pub mod worker;

#[cfg(feature = "grpc")]
pub mod grpc;

pub use query::{Fragmenter, Query, StageGraph};
pub use query_manager::{ComputeClient, QueryManager, QueryResultFetcher};
pub use stage::{QueryStage, ScheduledQueryStage, ScheduledStage};
pub use worker::{WorkerNode, WorkerNodeManager};
