//! Whole-query stage DAG: splitting a plan into stages and ordering them.
//!
//! Responsibilities:
//! - Cut an arena plan tree at exchange boundaries into a DAG of
//!   [`QueryStage`]s ([`Fragmenter`]).
//! - Record which stage produces the data behind each exchange node, and the
//!   stage dependency edges, for dependency-ordered scheduling
//!   ([`StageGraph`]).

use std::collections::{BTreeMap, HashMap};

use wave_catalog::CatalogReader;
use wave_common::{QueryId, Result, StageId, WaveError};
use wave_planner::plan::NodeBody;
use wave_planner::{Distribution, PlanArena, PlanNodeId};

use crate::stage::QueryStage;

/// One submitted statement: its plan arena plus the stage DAG cut from it.
/// Immutable after fragmenting; dropped when the query finishes.
#[derive(Debug)]
pub struct Query {
    pub query_id: QueryId,
    pub arena: PlanArena,
    pub stage_graph: StageGraph,
}

impl Query {
    pub fn root_stage_id(&self) -> StageId {
        self.stage_graph.root_stage_id
    }

    /// Stage producing the data consumed through `exchange_node`.
    ///
    /// Absence means the plan was split incorrectly, an internal error.
    pub fn exchange_source(&self, exchange_node: PlanNodeId) -> Result<StageId> {
        self.stage_graph
            .exchange_to_stage
            .get(&exchange_node)
            .copied()
            .ok_or_else(|| {
                WaveError::Internal(format!(
                    "no producing stage recorded for exchange node {exchange_node}"
                ))
            })
    }
}

/// Stage DAG for one query. Edges point from consumer to the upstream
/// producers it reads from.
#[derive(Debug)]
pub struct StageGraph {
    pub root_stage_id: StageId,
    stages: BTreeMap<StageId, QueryStage>,
    /// consumer stage -> upstream stages it consumes, in exchange order.
    dependencies: HashMap<StageId, Vec<StageId>>,
    /// exchange plan node -> stage producing its input.
    exchange_to_stage: HashMap<PlanNodeId, StageId>,
}

impl StageGraph {
    pub fn stage(&self, id: StageId) -> &QueryStage {
        &self.stages[&id]
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Upstream stages `id` directly reads from.
    pub fn dependencies(&self, id: StageId) -> &[StageId] {
        self.dependencies.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Stages with no upstream dependencies: the first wave of work a query
    /// can run.
    pub fn leaf_stages(&self) -> Vec<StageId> {
        self.stages
            .keys()
            .copied()
            .filter(|id| self.dependencies(*id).is_empty())
            .collect()
    }

    /// Stage ids ordered so that every stage appears after all stages it
    /// depends on (upstream-first). Deterministic for a given graph.
    pub fn stage_ids_by_topo_order(&self) -> Vec<StageId> {
        let mut order = Vec::with_capacity(self.stages.len());
        let mut visited = std::collections::HashSet::new();
        // BTreeMap iteration keeps the output stable across runs.
        for &id in self.stages.keys() {
            self.visit_post_order(id, &mut visited, &mut order);
        }
        order
    }

    fn visit_post_order(
        &self,
        id: StageId,
        visited: &mut std::collections::HashSet<StageId>,
        order: &mut Vec<StageId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        for &dep in self.dependencies(id) {
            self.visit_post_order(dep, visited, order);
        }
        order.push(id);
    }
}

#[derive(Debug, Default)]
struct StageGraphBuilder {
    stages: BTreeMap<StageId, QueryStage>,
    dependencies: HashMap<StageId, Vec<StageId>>,
    exchange_to_stage: HashMap<PlanNodeId, StageId>,
}

impl StageGraphBuilder {
    fn add_stage(&mut self, stage: QueryStage) {
        self.dependencies.entry(stage.id).or_default();
        self.stages.insert(stage.id, stage);
    }

    /// Record that `consumer` reads `producer`'s output through
    /// `exchange_node`.
    fn link(&mut self, consumer: StageId, exchange_node: PlanNodeId, producer: StageId) {
        self.dependencies.entry(consumer).or_default().push(producer);
        self.exchange_to_stage.insert(exchange_node, producer);
    }

    fn build(self, root_stage_id: StageId) -> StageGraph {
        StageGraph {
            root_stage_id,
            stages: self.stages,
            dependencies: self.dependencies,
            exchange_to_stage: self.exchange_to_stage,
        }
    }
}

/// Cuts a physical plan into stages at exchange boundaries.
///
/// Stage ids are allocated root-first: the root stage is always id 0, so
/// smaller ids are closer to the client.
#[derive(Debug, Clone)]
pub struct Fragmenter {
    catalog: CatalogReader,
}

impl Fragmenter {
    pub fn new(catalog: CatalogReader) -> Self {
        Self { catalog }
    }

    pub fn split(&self, query_id: QueryId, arena: PlanArena, root: PlanNodeId) -> Result<Query> {
        let mut builder = StageGraphBuilder::default();
        let mut next_stage_id = 0_u32;
        // The root stage delivers the final result to a single consumer.
        let root_stage_id = self.new_stage(
            &arena,
            root,
            Distribution::Single,
            &mut builder,
            &mut next_stage_id,
        )?;
        Ok(Query {
            query_id,
            arena,
            stage_graph: builder.build(root_stage_id),
        })
    }

    fn new_stage(
        &self,
        arena: &PlanArena,
        root: PlanNodeId,
        distribution: Distribution,
        builder: &mut StageGraphBuilder,
        next_stage_id: &mut u32,
    ) -> Result<StageId> {
        let id = StageId(*next_stage_id);
        *next_stage_id += 1;
        builder.add_stage(QueryStage::new(id, root, distribution));
        self.visit(arena, root, id, builder, next_stage_id)?;
        Ok(id)
    }

    fn visit(
        &self,
        arena: &PlanArena,
        node_id: PlanNodeId,
        current_stage: StageId,
        builder: &mut StageGraphBuilder,
        next_stage_id: &mut u32,
    ) -> Result<()> {
        let node = arena.node(node_id);
        match &node.body {
            NodeBody::Exchange(ex) => {
                let input = Self::exchange_input(node_id, &node.children)?;
                let child_stage = self.new_stage(
                    arena,
                    input,
                    ex.distribution.clone(),
                    builder,
                    next_stage_id,
                )?;
                builder.link(current_stage, node_id, child_stage);
            }
            NodeBody::MergeSortExchange(mse) => {
                let input = Self::exchange_input(node_id, &node.children)?;
                let child_stage = self.new_stage(
                    arena,
                    input,
                    mse.exchange.distribution.clone(),
                    builder,
                    next_stage_id,
                )?;
                builder.link(current_stage, node_id, child_stage);
            }
            NodeBody::Scan(scan) => {
                // Catch stale plans before anything is dispatched.
                self.catalog.read(|c| c.get(scan.table_id).map(|_| ()))?;
                if !node.children.is_empty() {
                    return Err(WaveError::Planning(format!(
                        "scan of table '{}' must be a leaf node",
                        scan.table_name
                    )));
                }
            }
            _ => {
                for &child in &node.children {
                    self.visit(arena, child, current_stage, builder, next_stage_id)?;
                }
            }
        }
        Ok(())
    }

    fn exchange_input(node_id: PlanNodeId, children: &[PlanNodeId]) -> Result<PlanNodeId> {
        match children {
            [input] => Ok(*input),
            _ => Err(WaveError::Planning(format!(
                "exchange node {node_id} must have exactly one input, found {}",
                children.len()
            ))),
        }
    }
}
