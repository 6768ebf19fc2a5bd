//! Per-query stages and their serialization into dispatchable fragments.
//!
//! Responsibilities:
//! - Model the two stage lifecycle states as distinct types: [`QueryStage`]
//!   (topology only) and [`ScheduledQueryStage`] (worker assignments and
//!   consumer fan-out resolved). Parallelism-dependent operations exist only
//!   on the scheduled type, so calling them too early is a compile error.
//! - Serialize a scheduled stage's plan subtree for one task, rewriting every
//!   exchange boundary into concrete upstream task addresses.

use std::collections::HashMap;

use wave_common::{Result, StageId, TaskId, WaveError};
use wave_planner::fragment::{
    ExchangeSource, FragmentNode, FragmentNodeBody, PlanFragment, TaskLocator, TaskOutputId,
};
use wave_planner::plan::NodeBody;
use wave_planner::{Distribution, PlanNodeId};

use crate::query::Query;
use crate::worker::WorkerNode;

/// A stage before worker assignment: its plan subtree root and declared
/// output distribution. Built once by the fragmenter, immutable after.
#[derive(Debug, Clone)]
pub struct QueryStage {
    pub id: StageId,
    /// Root of this stage's subtree in the query's plan arena. Nested
    /// exchange nodes under it belong to this stage as boundary markers;
    /// the subtrees below them belong to other stages.
    pub root: PlanNodeId,
    /// How this stage's output rows are spread across its consumer's tasks.
    pub distribution: Distribution,
}

impl QueryStage {
    pub fn new(id: StageId, root: PlanNodeId, distribution: Distribution) -> Self {
        Self {
            id,
            root,
            distribution,
        }
    }

    /// Resolve this stage with worker assignments.
    ///
    /// `exchange_sources` must cover every upstream stage this stage reads
    /// from; gaps surface as internal errors at serialization time.
    /// `consumer_parallelism` sizes the exchange fan-out baked into this
    /// stage's serialized output (1 for the query root).
    ///
    /// Panics when `workers` is empty: a scheduled stage with zero tasks is
    /// a scheduling bug, not a runtime condition.
    pub fn schedule(
        &self,
        exchange_sources: HashMap<StageId, ScheduledStage>,
        workers: Vec<WorkerNode>,
        consumer_parallelism: u32,
    ) -> ScheduledQueryStage {
        assert!(!workers.is_empty(), "stage {} scheduled with no workers", self.id);
        ScheduledQueryStage {
            id: self.id,
            root: self.root,
            distribution: self.distribution.clone(),
            exchange_sources,
            workers,
            consumer_parallelism,
        }
    }
}

/// Worker-assignment record for one stage: task id `k` runs on
/// `assignments[k]`. Read-only once built.
#[derive(Debug, Clone)]
pub struct ScheduledStage {
    assignments: Vec<WorkerNode>,
}

impl ScheduledStage {
    pub fn new(assignments: Vec<WorkerNode>) -> Self {
        Self { assignments }
    }

    pub fn task_count(&self) -> u32 {
        self.assignments.len() as u32
    }

    pub fn worker(&self, task_id: TaskId) -> &WorkerNode {
        &self.assignments[task_id.0 as usize]
    }
}

/// A stage with resolved workers, upstream assignments, and consumer fan-out.
#[derive(Debug, Clone)]
pub struct ScheduledQueryStage {
    pub id: StageId,
    pub root: PlanNodeId,
    pub distribution: Distribution,
    exchange_sources: HashMap<StageId, ScheduledStage>,
    workers: Vec<WorkerNode>,
    consumer_parallelism: u32,
}

impl ScheduledQueryStage {
    /// Number of parallel tasks, one per assigned worker. Always > 0.
    pub fn parallelism(&self) -> u32 {
        self.workers.len() as u32
    }

    pub fn workers(&self) -> &[WorkerNode] {
        &self.workers
    }

    pub fn consumer_parallelism(&self) -> u32 {
        self.consumer_parallelism
    }

    /// Record of this stage's own task placement, for downstream consumers.
    pub fn as_scheduled(&self) -> ScheduledStage {
        ScheduledStage::new(self.workers.clone())
    }

    /// Serialize this stage's subtree for task `task_id`.
    ///
    /// Exchange markers are rewritten into one source per upstream task,
    /// all requesting output slot `task_id`: consumer task `k` reads slot
    /// `k` from every producer. The query is passed in for the exchange
    /// node → producing stage lookup; stages hold no back-reference.
    pub fn to_plan_fragment(&self, query: &Query, task_id: TaskId) -> Result<PlanFragment> {
        let root = self.rewrite_node(query, self.root, task_id)?;
        Ok(PlanFragment {
            root,
            exchange_info: self.distribution.to_exchange_info(self.consumer_parallelism),
        })
    }

    fn rewrite_node(&self, query: &Query, node_id: PlanNodeId, task_id: TaskId) -> Result<FragmentNode> {
        let node = query.arena.node(node_id);
        let body = match &node.body {
            NodeBody::Exchange(ex) => FragmentNodeBody::Exchange {
                sources: self.exchange_sources_for(query, node_id, task_id)?,
                input_schema: ex.input_schema.clone(),
            },
            NodeBody::MergeSortExchange(mse) => FragmentNodeBody::MergeSortExchange {
                sources: self.exchange_sources_for(query, node_id, task_id)?,
                input_schema: mse.exchange.input_schema.clone(),
                column_orders: mse.column_orders.clone(),
            },
            NodeBody::Scan(n) => FragmentNodeBody::Scan(n.clone()),
            NodeBody::Filter(n) => FragmentNodeBody::Filter(n.clone()),
            NodeBody::Project(n) => FragmentNodeBody::Project(n.clone()),
            NodeBody::HashAgg(n) => FragmentNodeBody::HashAgg(n.clone()),
            NodeBody::HashJoin(n) => FragmentNodeBody::HashJoin(n.clone()),
            NodeBody::TopN(n) => FragmentNodeBody::TopN(n.clone()),
            NodeBody::Values(n) => FragmentNodeBody::Values(n.clone()),
            NodeBody::Materialize(n) => FragmentNodeBody::Materialize(n.clone()),
        };

        // Children below an exchange belong to the producing stage and are
        // not serialized into this fragment.
        let children = if node.body.is_exchange() {
            Vec::new()
        } else {
            node.children
                .iter()
                .map(|&child| self.rewrite_node(query, child, task_id))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(FragmentNode {
            identity: node.identity.clone(),
            body,
            children,
        })
    }

    fn exchange_sources_for(
        &self,
        query: &Query,
        exchange_node: PlanNodeId,
        task_id: TaskId,
    ) -> Result<Vec<ExchangeSource>> {
        let source_stage_id = query.exchange_source(exchange_node)?;
        let scheduled = self.exchange_sources.get(&source_stage_id).ok_or_else(|| {
            WaveError::Internal(format!("stage {source_stage_id} has not been scheduled"))
        })?;

        let sources = (0..scheduled.task_count())
            .map(|producer_task| {
                let producer = TaskId(producer_task);
                ExchangeSource {
                    task_output_id: TaskOutputId {
                        task: TaskLocator {
                            query_id: query.query_id.clone(),
                            stage_id: source_stage_id,
                            task_id: producer,
                        },
                        output_id: task_id.0,
                    },
                    host: scheduled.worker(producer).host.clone(),
                }
            })
            .collect();
        Ok(sources)
    }
}
