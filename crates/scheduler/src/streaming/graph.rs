//! Stream fragment graphs and their compilation into actor descriptors.
//!
//! The batch scheduler wires one-shot tasks through exchanges; here the same
//! distribution model wires long-lived actors through dispatchers. Where a
//! batch stage is augmented once with its full worker set, a merge node's
//! upstream list grows incrementally as producer actors are placed, because
//! actor graphs are built actor-by-actor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wave_common::{Result, WaveError};
use wave_planner::plan::{
    AggCall, Expr, MaterializeNode, ScanNode,
};
use wave_planner::Distribution;

/// How an actor routes its output rows to downstream actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherType {
    /// Partition by hashed key columns.
    Hash,
    /// Every downstream actor receives every row.
    Broadcast,
    /// Exactly one downstream actor.
    Simple,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatcher {
    pub dispatcher_type: DispatcherType,
    /// Hash key columns; empty unless `Hash`.
    pub column_indices: Vec<usize>,
}

impl Dispatcher {
    /// Streaming analogue of lowering a distribution to an exchange
    /// descriptor. `Random` and `Any` have no streaming counterpart.
    pub fn for_distribution(distribution: &Distribution) -> Result<Self> {
        match distribution {
            Distribution::Hash { keys } => Ok(Self {
                dispatcher_type: DispatcherType::Hash,
                column_indices: keys.clone(),
            }),
            Distribution::Broadcast => Ok(Self {
                dispatcher_type: DispatcherType::Broadcast,
                column_indices: vec![],
            }),
            Distribution::Single => Ok(Self {
                dispatcher_type: DispatcherType::Simple,
                column_indices: vec![],
            }),
            Distribution::Random | Distribution::Any => Err(WaveError::Unsupported(format!(
                "distribution {distribution:?} has no streaming dispatcher"
            ))),
        }
    }
}

/// Fan-in point collecting the outputs of upstream actors.
///
/// `upstream_actor_ids` starts empty and is filled in during actor
/// placement, one producer fragment at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeNode {
    pub upstream_actor_ids: Vec<u32>,
}

impl MergeNode {
    pub fn add_upstream(&mut self, actor_id: u32) {
        self.upstream_actor_ids.push(actor_id);
    }
}

/// One operator in a streaming pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamNode {
    pub identity: String,
    #[serde(flatten)]
    pub body: StreamNodeBody,
    pub children: Vec<StreamNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StreamNodeBody {
    /// Change-stream source reading a table.
    Source(ScanNode),
    Merge(MergeNode),
    Filter { predicate: Expr },
    Project { exprs: Vec<Expr> },
    HashAgg { group_keys: Vec<usize>, agg_calls: Vec<AggCall> },
    Materialize(MaterializeNode),
}

/// One pipeline of stream operators between dispatcher boundaries, before
/// actor placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamFragment {
    pub id: u32,
    pub node: StreamNode,
    /// How this fragment's actors route output downstream.
    pub dispatcher: Dispatcher,
    pub parallelism: u32,
    /// Fragments whose output feeds this fragment's merge node.
    pub upstream_fragment_ids: Vec<u32>,
}

/// DAG of stream fragments for one materialized view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFragmentGraph {
    fragments: BTreeMap<u32, StreamFragment>,
}

impl StreamFragmentGraph {
    pub fn add_fragment(&mut self, fragment: StreamFragment) {
        self.fragments.insert(fragment.id, fragment);
    }

    pub fn fragment(&self, id: u32) -> Option<&StreamFragment> {
        self.fragments.get(&id)
    }

    pub fn fragments(&self) -> impl Iterator<Item = &StreamFragment> {
        self.fragments.values()
    }
}

/// Persistent actor descriptor: the streaming analogue of a task's plan
/// fragment, with merges resolved to concrete upstream actor ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamActor {
    pub actor_id: u32,
    pub fragment_id: u32,
    pub dispatcher: Dispatcher,
    pub node: StreamNode,
}

/// Places actors for a fragment graph.
///
/// Upstream fragments are placed before downstream ones so that each merge
/// node can name its producer actors.
#[derive(Debug, Default)]
pub struct StreamGraphBuilder {
    next_actor_id: u32,
}

impl StreamGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, graph: &StreamFragmentGraph) -> Result<Vec<StreamActor>> {
        let mut actor_ids_by_fragment: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut actors = Vec::new();

        for fragment_id in self.placement_order(graph)? {
            let fragment = graph
                .fragment(fragment_id)
                .ok_or_else(|| {
                    WaveError::Internal(format!("unknown stream fragment {fragment_id}"))
                })?;
            let mut ids = Vec::with_capacity(fragment.parallelism as usize);
            for _ in 0..fragment.parallelism.max(1) {
                let actor_id = self.next_actor_id;
                self.next_actor_id += 1;
                ids.push(actor_id);

                let mut node = fragment.node.clone();
                for &upstream_fragment in &fragment.upstream_fragment_ids {
                    let upstream_actors =
                        actor_ids_by_fragment.get(&upstream_fragment).ok_or_else(|| {
                            WaveError::Internal(format!(
                                "fragment {upstream_fragment} placed after its consumer"
                            ))
                        })?;
                    for &upstream in upstream_actors {
                        add_upstream_to_merges(&mut node, upstream);
                    }
                }
                actors.push(StreamActor {
                    actor_id,
                    fragment_id,
                    dispatcher: fragment.dispatcher.clone(),
                    node,
                });
            }
            actor_ids_by_fragment.insert(fragment_id, ids);
        }
        Ok(actors)
    }

    /// Upstream-first fragment order via post-order traversal.
    fn placement_order(&self, graph: &StreamFragmentGraph) -> Result<Vec<u32>> {
        let mut order = Vec::new();
        let mut visited = std::collections::HashSet::new();
        for fragment in graph.fragments() {
            self.visit(graph, fragment.id, &mut visited, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        graph: &StreamFragmentGraph,
        id: u32,
        visited: &mut std::collections::HashSet<u32>,
        order: &mut Vec<u32>,
    ) -> Result<()> {
        if !visited.insert(id) {
            return Ok(());
        }
        let fragment = graph
            .fragment(id)
            .ok_or_else(|| WaveError::Internal(format!("unknown stream fragment {id}")))?;
        for &upstream in &fragment.upstream_fragment_ids {
            self.visit(graph, upstream, visited, order)?;
        }
        order.push(id);
        Ok(())
    }
}

fn add_upstream_to_merges(node: &mut StreamNode, actor_id: u32) {
    if let StreamNodeBody::Merge(merge) = &mut node.body {
        merge.add_upstream(actor_id);
    }
    for child in &mut node.children {
        add_upstream_to_merges(child, actor_id);
    }
}
