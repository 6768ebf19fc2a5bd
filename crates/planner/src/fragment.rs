//! Wire representation of dispatched plan fragments.
//!
//! Responsibilities:
//! - Define the self-contained, serde-serializable plan tree a compute node
//!   receives ([`FragmentNode`] / [`PlanFragment`]).
//! - Define exchange addressing: which upstream task, which output slot, on
//!   which host ([`ExchangeSource`]).
//!
//! Unlike the arena tree, fragment trees own their children inline and carry
//! no stage-boundary markers; every exchange has been resolved to concrete
//! upstream sources before serialization.

use arrow_schema::Field;
use serde::{Deserialize, Serialize};
use wave_common::{QueryId, StageId, TaskId};

use crate::plan::{
    ColumnOrder, FilterNode, HashAggNode, HashJoinNode, Literal, MaterializeNode, ProjectNode,
    ScanNode, TopNNode, ValuesNode,
};

/// Network address of a compute node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddr {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Globally unique task address: (query, stage, task).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskLocator {
    pub query_id: QueryId,
    pub stage_id: StageId,
    pub task_id: TaskId,
}

/// One output slot of one task.
///
/// A producer task partitions its output into `output_count` slots; consumer
/// task `k` reads slot `k` from every producer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskOutputId {
    pub task: TaskLocator,
    pub output_id: u32,
}

/// Where a consumer fetches one upstream partition from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeSource {
    pub task_output_id: TaskOutputId,
    pub host: HostAddr,
}

/// Wire-level partitioning mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    Single,
    Hash,
    Broadcast,
    RoundRobin,
}

/// Hash-partitioning detail, present only in `Hash` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionInfo {
    pub keys: Vec<usize>,
}

/// How a fragment partitions its output for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub mode: DistributionMode,
    /// Number of output slots, equal to the consumer stage's parallelism.
    pub output_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub distribution: Option<DistributionInfo>,
}

/// Serialized plan node, self-contained with inline children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentNode {
    pub identity: String,
    #[serde(flatten)]
    pub body: FragmentNodeBody,
    pub children: Vec<FragmentNode>,
}

/// Operator payload of a wire node.
///
/// Tagged union: the tag names the operator so a compute node can route on
/// it without peeking into payload fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FragmentNodeBody {
    Scan(ScanNode),
    Filter(FilterNode),
    Project(ProjectNode),
    HashAgg(HashAggNode),
    HashJoin(HashJoinNode),
    TopN(TopNNode),
    Values(ValuesNode),
    Materialize(MaterializeNode),
    Exchange {
        sources: Vec<ExchangeSource>,
        input_schema: Vec<Field>,
    },
    MergeSortExchange {
        sources: Vec<ExchangeSource>,
        input_schema: Vec<Field>,
        column_orders: Vec<ColumnOrder>,
    },
}

/// Everything one task needs to run: its plan tree plus how to partition its
/// own output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFragment {
    pub root: FragmentNode,
    pub exchange_info: ExchangeInfo,
}

/// Row batch returned from task output streams.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataChunk {
    pub fields: Vec<Field>,
    /// Row-major values; each inner vec lines up with `fields`.
    pub rows: Vec<Vec<Literal>>,
}

impl DataChunk {
    pub fn cardinality(&self) -> usize {
        self.rows.len()
    }
}
