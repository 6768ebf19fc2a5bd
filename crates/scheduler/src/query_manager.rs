//! Query scheduling engine: worker assignment, dependency-ordered dispatch,
//! result fetch, and cancellation.
//!
//! Responsibilities:
//! - Assign workers to every stage of a query, then dispatch serialized task
//!   fragments upstream-first so each producer's exchange fan-out is sized
//!   by its already-resolved consumer.
//! - Track active queries for cancellation; a cancelled query stops
//!   dispatching and terminates its result stream without affecting other
//!   queries.
//!
//! Worker policy: singleton-output stages get one worker; every other stage
//! gets one task per available worker, capped by
//! `SchedulerConfig::stage_parallelism`. Workers are taken round-robin from
//! a snapshot of the registry, so membership changes mid-schedule do not
//! affect the query being placed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wave_common::{global_metrics, QueryId, Result, SchedulerConfig, StageId, TaskId, WaveError};
use wave_planner::fragment::{DataChunk, PlanFragment, TaskLocator, TaskOutputId};
use wave_planner::Distribution;

use crate::query::Query;
use crate::stage::ScheduledStage;
use crate::worker::{WorkerNode, WorkerNodeManager};

/// RPC surface of a compute node, as consumed by the scheduler.
///
/// Implemented over gRPC in production (see the `grpc` module) and by
/// in-process mocks in tests.
#[tonic::async_trait]
pub trait ComputeClient: Send + Sync + 'static {
    async fn dispatch_task(
        &self,
        worker: &WorkerNode,
        task: TaskLocator,
        fragment: PlanFragment,
    ) -> Result<()>;

    async fn get_data(
        &self,
        worker: &WorkerNode,
        output: TaskOutputId,
    ) -> Result<BoxStream<'static, Result<DataChunk>>>;

    async fn abort_task(&self, worker: &WorkerNode, task: TaskLocator) -> Result<()>;
}

/// Schedules and dispatches queries against the current cluster membership.
///
/// Independent queries schedule concurrently; within one query, stages go
/// out in strict dependency order.
pub struct QueryManager<C: ComputeClient> {
    config: SchedulerConfig,
    worker_node_manager: WorkerNodeManager,
    compute_client: Arc<C>,
    /// Cancellation handles for in-flight queries. Shared with each query's
    /// result fetcher so fully-drained queries deregister themselves.
    active: ActiveQueries,
}

type ActiveQueries = Arc<Mutex<HashMap<QueryId, watch::Sender<bool>>>>;

fn deregister(active: &ActiveQueries, query_id: &QueryId) {
    let mut active = active.lock().expect("active query map lock poisoned");
    if active.remove(query_id).is_some() {
        global_metrics().set_active_queries(active.len() as i64);
    }
}

impl<C: ComputeClient> QueryManager<C> {
    pub fn new(
        config: SchedulerConfig,
        worker_node_manager: WorkerNodeManager,
        compute_client: Arc<C>,
    ) -> Self {
        Self {
            config,
            worker_node_manager,
            compute_client,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queries currently tracked for cancellation.
    pub fn active_query_count(&self) -> usize {
        self.active
            .lock()
            .expect("active query map lock poisoned")
            .len()
    }

    pub fn worker_node_manager(&self) -> &WorkerNodeManager {
        &self.worker_node_manager
    }

    /// Schedule and dispatch every stage of `query`, returning a fetcher for
    /// the root stage's result stream.
    ///
    /// Any dispatch failure aborts the whole query: already-dispatched tasks
    /// are aborted best-effort and the error is returned to the caller. No
    /// per-task retry is attempted; the caller may resubmit the statement.
    pub async fn schedule(&self, query: Query) -> Result<QueryResultFetcher<C>> {
        let metrics = global_metrics();
        metrics.inc_queries_submitted();
        let started = Instant::now();
        let cancel_rx = self.register(&query.query_id);

        let result = self.schedule_inner(&query, &cancel_rx).await;
        metrics.observe_schedule_seconds(started.elapsed().as_secs_f64());

        match result {
            Ok(fetcher) => Ok(fetcher),
            Err(err) => {
                metrics.inc_queries_failed();
                self.finish(&query.query_id);
                Err(err)
            }
        }
    }

    async fn schedule_inner(
        &self,
        query: &Query,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<QueryResultFetcher<C>> {
        let metrics = global_metrics();
        let workers = self.worker_node_manager.list_available_workers();
        if workers.is_empty() {
            return Err(WaveError::Cluster(
                "no compute workers available".to_string(),
            ));
        }

        let topo_order = query.stage_graph.stage_ids_by_topo_order();
        info!(
            query_id = %query.query_id,
            stages = topo_order.len(),
            workers = workers.len(),
            "scheduling query"
        );

        // Phase A: fix every stage's worker set before anything serializes.
        // A producer's exchange fan-out is its consumer's parallelism, so
        // all parallelisms must be known up front.
        let mut cursor = 0_usize;
        let mut assignments: HashMap<StageId, Vec<WorkerNode>> = HashMap::new();
        for &stage_id in &topo_order {
            let stage = query.stage_graph.stage(stage_id);
            let parallelism = self.stage_parallelism(&stage.distribution, workers.len());
            let mut assigned = Vec::with_capacity(parallelism as usize);
            for _ in 0..parallelism {
                assigned.push(workers[cursor % workers.len()].clone());
                cursor += 1;
            }
            debug!(
                query_id = %query.query_id,
                stage_id = %stage_id,
                parallelism,
                "assigned workers"
            );
            metrics.inc_stages_scheduled();
            assignments.insert(stage_id, assigned);
        }

        let consumers = consumer_map(query);

        // Phase B: serialize and dispatch, upstream-first.
        let mut dispatched: Vec<(WorkerNode, TaskLocator)> = Vec::new();
        for &stage_id in &topo_order {
            let stage = query.stage_graph.stage(stage_id);
            let consumer_parallelism = match consumers.get(&stage_id) {
                Some(consumer) => assignments[consumer].len() as u32,
                // Root stage: a single client-side consumer.
                None => 1,
            };
            let exchange_sources = query
                .stage_graph
                .dependencies(stage_id)
                .iter()
                .map(|dep| (*dep, ScheduledStage::new(assignments[dep].clone())))
                .collect();
            let scheduled = stage.schedule(
                exchange_sources,
                assignments[&stage_id].clone(),
                consumer_parallelism,
            );

            for task in 0..scheduled.parallelism() {
                if *cancel_rx.borrow() {
                    self.abort_dispatched(&dispatched).await;
                    return Err(WaveError::Cancelled(query.query_id.to_string()));
                }
                let task_id = TaskId(task);
                let locator = TaskLocator {
                    query_id: query.query_id.clone(),
                    stage_id,
                    task_id,
                };
                let fragment = scheduled.to_plan_fragment(query, task_id)?;
                let worker = &scheduled.workers()[task as usize];
                if let Err(err) = self
                    .compute_client
                    .dispatch_task(worker, locator.clone(), fragment)
                    .await
                {
                    metrics.inc_dispatch_failures(stage_id.0);
                    warn!(
                        query_id = %query.query_id,
                        stage_id = %stage_id,
                        task_id = %task_id,
                        worker = worker.id,
                        error = %err,
                        "task dispatch failed, aborting query"
                    );
                    self.abort_dispatched(&dispatched).await;
                    return Err(err);
                }
                metrics.inc_tasks_dispatched(stage_id.0);
                dispatched.push((worker.clone(), locator));
            }
        }

        let root_stage_id = query.root_stage_id();
        let sources = assignments[&root_stage_id]
            .iter()
            .enumerate()
            .map(|(task, worker)| {
                (
                    worker.clone(),
                    TaskOutputId {
                        task: TaskLocator {
                            query_id: query.query_id.clone(),
                            stage_id: root_stage_id,
                            task_id: TaskId(task as u32),
                        },
                        // The root stage has one consumer, so one slot.
                        output_id: 0,
                    },
                )
            })
            .collect();

        Ok(QueryResultFetcher {
            query_id: query.query_id.clone(),
            sources,
            compute_client: Arc::clone(&self.compute_client),
            cancel_rx: cancel_rx.clone(),
            active: Arc::clone(&self.active),
        })
    }

    fn stage_parallelism(&self, distribution: &Distribution, worker_count: usize) -> u32 {
        match distribution {
            Distribution::Single => 1,
            _ => {
                let cap = self
                    .config
                    .stage_parallelism
                    .unwrap_or(worker_count as u32)
                    .max(1);
                cap.min(worker_count as u32)
            }
        }
    }

    async fn abort_dispatched(&self, dispatched: &[(WorkerNode, TaskLocator)]) {
        for (worker, locator) in dispatched {
            if let Err(err) = self.compute_client.abort_task(worker, locator.clone()).await {
                warn!(
                    query_id = %locator.query_id,
                    stage_id = %locator.stage_id,
                    task_id = %locator.task_id,
                    error = %err,
                    "failed to abort dispatched task"
                );
            }
        }
    }

    fn register(&self, query_id: &QueryId) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        let mut active = self.active.lock().expect("active query map lock poisoned");
        active.insert(query_id.clone(), tx);
        global_metrics().set_active_queries(active.len() as i64);
        rx
    }

    /// Cancel an in-flight query. Dispatch stops at the next task boundary
    /// and its result stream ends with a cancellation error. Unknown ids are
    /// a no-op (the query already finished).
    pub fn cancel_query(&self, query_id: &QueryId) {
        let mut active = self.active.lock().expect("active query map lock poisoned");
        if let Some(tx) = active.remove(query_id) {
            let _ = tx.send(true);
            global_metrics().inc_queries_cancelled();
            global_metrics().set_active_queries(active.len() as i64);
            info!(query_id = %query_id, "query cancelled");
        }
    }

    /// Drop tracking state for a query whose fetcher will never be drained
    /// (e.g. the caller discarded it). Drained fetchers deregister
    /// themselves.
    pub fn finish(&self, query_id: &QueryId) {
        deregister(&self.active, query_id);
    }
}

/// Consumer stage of each non-root stage. The fragmenter cuts a tree, so
/// every stage has at most one consumer.
fn consumer_map(query: &Query) -> HashMap<StageId, StageId> {
    let mut consumers = HashMap::new();
    for &stage_id in &query.stage_graph.stage_ids_by_topo_order() {
        for &dep in query.stage_graph.dependencies(stage_id) {
            consumers.insert(dep, stage_id);
        }
    }
    consumers
}

/// Streams the root stage's output back to the caller, task by task.
pub struct QueryResultFetcher<C: ComputeClient> {
    query_id: QueryId,
    sources: Vec<(WorkerNode, TaskOutputId)>,
    compute_client: Arc<C>,
    cancel_rx: watch::Receiver<bool>,
    active: ActiveQueries,
}

impl<C: ComputeClient> std::fmt::Debug for QueryResultFetcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResultFetcher")
            .field("query_id", &self.query_id)
            .finish_non_exhaustive()
    }
}

impl<C: ComputeClient> QueryResultFetcher<C> {
    pub fn query_id(&self) -> &QueryId {
        &self.query_id
    }

    /// Result chunks from every root task, in task order. Cancellation is
    /// observed at chunk boundaries and ends the stream with an error.
    /// Reaching any terminal state (drained, error, cancelled) deregisters
    /// the query from the manager's active set.
    pub fn into_stream(self) -> BoxStream<'static, Result<DataChunk>> {
        let QueryResultFetcher {
            query_id,
            sources,
            compute_client,
            cancel_rx,
            active,
        } = self;

        struct State<C: ComputeClient> {
            query_id: QueryId,
            remaining: std::vec::IntoIter<(WorkerNode, TaskOutputId)>,
            current: Option<BoxStream<'static, Result<DataChunk>>>,
            compute_client: Arc<C>,
            cancel_rx: watch::Receiver<bool>,
            active: ActiveQueries,
        }

        impl<C: ComputeClient> State<C> {
            fn done(&self) {
                deregister(&self.active, &self.query_id);
            }
        }

        let state = State {
            query_id,
            remaining: sources.into_iter(),
            current: None,
            compute_client,
            cancel_rx,
            active,
        };

        Box::pin(futures::stream::try_unfold(state, |mut state| async move {
            loop {
                if *state.cancel_rx.borrow() {
                    state.done();
                    return Err(WaveError::Cancelled(state.query_id.to_string()));
                }
                match state.current.as_mut() {
                    Some(stream) => match stream.next().await {
                        Some(Ok(chunk)) => return Ok(Some((chunk, state))),
                        Some(Err(err)) => {
                            state.done();
                            return Err(err);
                        }
                        None => state.current = None,
                    },
                    None => match state.remaining.next() {
                        Some((worker, output)) => {
                            match state.compute_client.get_data(&worker, output).await {
                                Ok(stream) => state.current = Some(stream),
                                Err(err) => {
                                    state.done();
                                    return Err(err);
                                }
                            }
                        }
                        None => {
                            state.done();
                            return Ok(None);
                        }
                    },
                }
            }
        }))
    }
}
