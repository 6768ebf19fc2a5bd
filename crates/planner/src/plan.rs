//! Arena-backed physical plan trees.
//!
//! Responsibilities:
//! - Own every plan node of a query in one flat arena, addressed by
//!   [`PlanNodeId`]; nodes reference children by id, never by pointer.
//! - Keep nodes immutable after insertion so stage fragmenting can slice the
//!   tree without cloning subtrees.
//!
//! The arena tree is the planner-side representation. The serialized form
//! shipped to compute nodes is a separate tree of [`crate::fragment::FragmentNode`]
//! values, produced per task at dispatch time.

use arrow_schema::{DataType, Field};
use serde::{Deserialize, Serialize};
use wave_catalog::TableId;

use crate::distribution::Distribution;

/// Index of a node in a [`PlanArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanNodeId(pub u32);

impl std::fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One immutable node of a physical plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
    /// Human-readable operator description, used in logs and EXPLAIN output.
    pub identity: String,
    pub body: NodeBody,
    pub children: Vec<PlanNodeId>,
}

/// Flat store of all plan nodes for one query.
///
/// Nodes are append-only; ids handed out by [`PlanArena::alloc`] stay valid
/// for the arena's lifetime.
#[derive(Debug, Clone, Default)]
pub struct PlanArena {
    nodes: Vec<PlanNode>,
}

impl PlanArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node and return its id.
    pub fn alloc(&mut self, identity: impl Into<String>, body: NodeBody, children: Vec<PlanNodeId>) -> PlanNodeId {
        let id = PlanNodeId(self.nodes.len() as u32);
        self.nodes.push(PlanNode {
            identity: identity.into(),
            body,
            children,
        });
        id
    }

    /// Panics if `id` was not allocated by this arena.
    pub fn node(&self, id: PlanNodeId) -> &PlanNode {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Operator payloads.
///
/// `Exchange` and `MergeSortExchange` only ever appear in arena trees; the
/// fragmenter cuts the plan at those nodes and replaces them with per-task
/// exchange sources during serialization.
#[derive(Debug, Clone)]
pub enum NodeBody {
    Scan(ScanNode),
    Filter(FilterNode),
    Project(ProjectNode),
    HashAgg(HashAggNode),
    HashJoin(HashJoinNode),
    TopN(TopNNode),
    Values(ValuesNode),
    Materialize(MaterializeNode),
    Exchange(ExchangeNode),
    MergeSortExchange(MergeSortExchangeNode),
}

impl NodeBody {
    /// True for the exchange variants that delimit stage boundaries.
    pub fn is_exchange(&self) -> bool {
        matches!(self, NodeBody::Exchange(_) | NodeBody::MergeSortExchange(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanNode {
    pub table_id: TableId,
    pub table_name: String,
    /// Positions of the columns to read, in output order.
    pub column_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterNode {
    pub predicate: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectNode {
    pub exprs: Vec<Expr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashAggNode {
    pub group_keys: Vec<usize>,
    pub agg_calls: Vec<AggCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashJoinNode {
    pub join_type: JoinType,
    pub left_keys: Vec<usize>,
    pub right_keys: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopNNode {
    pub column_orders: Vec<ColumnOrder>,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuesNode {
    /// Row-major literal tuples.
    pub rows: Vec<Vec<Literal>>,
    pub fields: Vec<ValuesField>,
}

/// Field description for `Values`, kept separate from arrow's `Field` so the
/// node stays plain-serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuesField {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializeNode {
    pub table_id: TableId,
    pub table_name: String,
    /// Primary-key column positions in the input, in key order.
    pub primary_key_indices: Vec<usize>,
}

/// Stage-boundary marker in the arena tree. Serialization replaces this with
/// concrete upstream task sources.
#[derive(Debug, Clone)]
pub struct ExchangeNode {
    /// How the upstream stage's output is distributed to this consumer.
    pub distribution: Distribution,
    /// Schema of the rows crossing this boundary.
    pub input_schema: Vec<Field>,
}

/// Exchange that additionally merges sorted upstream streams, preserving
/// `column_orders` across the boundary.
#[derive(Debug, Clone)]
pub struct MergeSortExchangeNode {
    pub exchange: ExchangeNode,
    pub column_orders: Vec<ColumnOrder>,
}

/// Scalar expression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    InputRef { index: usize },
    Literal { value: Literal },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggCall {
    pub kind: AggKind,
    /// Argument column positions; empty for `count(*)`.
    pub args: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

/// Sort key: column position plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOrder {
    pub index: usize,
    pub desc: bool,
}
