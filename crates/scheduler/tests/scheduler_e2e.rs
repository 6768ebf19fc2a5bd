//! End-to-end scheduling tests against an in-process mock compute cluster.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arrow_schema::{DataType, Field};
use futures::stream::BoxStream;
use futures::StreamExt;
use wave_catalog::{Catalog, CatalogReader, ColumnCatalog, ColumnId, TableCatalog, TableId};
use wave_common::{QueryId, Result, SchedulerConfig, StageId, TaskId, WaveError};
use wave_planner::fragment::{
    DataChunk, DistributionMode, FragmentNodeBody, PlanFragment, TaskLocator, TaskOutputId,
};
use wave_planner::plan::{
    ExchangeNode, HashAggNode, HashJoinNode, JoinType, Literal, NodeBody, PlanArena, ScanNode,
};
use wave_planner::{Distribution, HostAddr};
use wave_scheduler::query_manager::ComputeClient;
use wave_scheduler::{Fragmenter, Query, QueryManager, WorkerNode, WorkerNodeManager};

#[derive(Default)]
struct MockComputeClient {
    dispatched: Mutex<Vec<(u32, TaskLocator, PlanFragment)>>,
    aborted: Mutex<Vec<TaskLocator>>,
    fail_on_stage: Option<StageId>,
}

impl MockComputeClient {
    fn failing_on(stage: StageId) -> Self {
        Self {
            fail_on_stage: Some(stage),
            ..Default::default()
        }
    }

    fn dispatched(&self) -> Vec<(u32, TaskLocator, PlanFragment)> {
        self.dispatched.lock().unwrap().clone()
    }

    fn fragments_for_stage(&self, stage: StageId) -> Vec<(TaskLocator, PlanFragment)> {
        self.dispatched()
            .into_iter()
            .filter(|(_, locator, _)| locator.stage_id == stage)
            .map(|(_, locator, fragment)| (locator, fragment))
            .collect()
    }
}

#[tonic::async_trait]
impl ComputeClient for MockComputeClient {
    async fn dispatch_task(
        &self,
        worker: &WorkerNode,
        task: TaskLocator,
        fragment: PlanFragment,
    ) -> Result<()> {
        if self.fail_on_stage == Some(task.stage_id) {
            return Err(WaveError::Cluster(format!(
                "worker {} rejected task {}",
                worker.id, task.task_id
            )));
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((worker.id, task, fragment));
        Ok(())
    }

    async fn get_data(
        &self,
        _worker: &WorkerNode,
        output: TaskOutputId,
    ) -> Result<BoxStream<'static, Result<DataChunk>>> {
        let chunk = DataChunk {
            fields: vec![Field::new("k", DataType::Int32, true)],
            rows: vec![vec![Literal::Int64(output.task.task_id.0 as i64)]],
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(chunk)])))
    }

    async fn abort_task(&self, _worker: &WorkerNode, task: TaskLocator) -> Result<()> {
        self.aborted.lock().unwrap().push(task);
        Ok(())
    }
}

fn test_catalog() -> CatalogReader {
    let mut catalog = Catalog::new();
    for (id, name) in [(1, "t1"), (2, "t2")] {
        catalog.register_table(TableCatalog::new(
            TableId(id),
            name,
            vec![
                ColumnCatalog {
                    id: ColumnId(0),
                    name: "k".to_string(),
                    data_type: DataType::Int32,
                    is_hidden: false,
                },
                ColumnCatalog {
                    id: ColumnId(1),
                    name: "v".to_string(),
                    data_type: DataType::Int64,
                    is_hidden: false,
                },
            ],
            vec![0],
        ));
    }
    CatalogReader::new(catalog)
}

fn workers(n: u32) -> Vec<WorkerNode> {
    (1..=n)
        .map(|id| WorkerNode {
            id,
            host: HostAddr {
                host: format!("10.0.0.{id}"),
                port: 5688,
            },
        })
        .collect()
}

fn manager(client: Arc<MockComputeClient>, worker_count: u32) -> QueryManager<MockComputeClient> {
    QueryManager::new(
        SchedulerConfig::default(),
        WorkerNodeManager::with_workers(workers(worker_count)),
        client,
    )
}

fn scan_node(table: u32, name: &str) -> NodeBody {
    NodeBody::Scan(ScanNode {
        table_id: TableId(table),
        table_name: name.to_string(),
        column_indices: vec![0, 1],
    })
}

fn exchange_node(distribution: Distribution) -> NodeBody {
    NodeBody::Exchange(ExchangeNode {
        distribution,
        input_schema: vec![
            Field::new("k", DataType::Int32, true),
            Field::new("v", DataType::Int64, true),
        ],
    })
}

/// Scan only, no exchange anywhere.
fn singleton_query() -> Query {
    let mut arena = PlanArena::new();
    let scan = arena.alloc("Scan { table: t1 }", scan_node(1, "t1"), vec![]);
    Fragmenter::new(test_catalog())
        .split(QueryId::new(), arena, scan)
        .unwrap()
}

/// Singleton agg over a hash-partitioned scan.
fn two_stage_query() -> Query {
    let mut arena = PlanArena::new();
    let scan = arena.alloc("Scan { table: t1 }", scan_node(1, "t1"), vec![]);
    let exchange = arena.alloc(
        "Exchange { dist: hash([0]) }",
        exchange_node(Distribution::hash(vec![0])),
        vec![scan],
    );
    let agg = arena.alloc(
        "HashAgg { group: [0] }",
        NodeBody::HashAgg(HashAggNode {
            group_keys: vec![0],
            agg_calls: vec![],
        }),
        vec![exchange],
    );
    Fragmenter::new(test_catalog())
        .split(QueryId::new(), arena, agg)
        .unwrap()
}

/// Broadcast join: build side broadcast to a hash-parallel join stage, then
/// a singleton root. Stage ids: 0 root, 1 join, 2 build scan, 3 probe scan.
fn broadcast_join_query() -> Query {
    let mut arena = PlanArena::new();
    let build_scan = arena.alloc("Scan { table: t1 }", scan_node(1, "t1"), vec![]);
    let probe_scan = arena.alloc("Scan { table: t2 }", scan_node(2, "t2"), vec![]);
    let build_exchange = arena.alloc(
        "Exchange { dist: broadcast }",
        exchange_node(Distribution::Broadcast),
        vec![build_scan],
    );
    let probe_exchange = arena.alloc(
        "Exchange { dist: hash([0]) }",
        exchange_node(Distribution::hash(vec![0])),
        vec![probe_scan],
    );
    let join = arena.alloc(
        "HashJoin { on: t1.k = t2.k }",
        NodeBody::HashJoin(HashJoinNode {
            join_type: JoinType::Inner,
            left_keys: vec![0],
            right_keys: vec![0],
        }),
        vec![build_exchange, probe_exchange],
    );
    let root_exchange = arena.alloc(
        "Exchange { dist: single }",
        exchange_node(Distribution::Single),
        vec![join],
    );
    let agg = arena.alloc(
        "HashAgg { group: [] }",
        NodeBody::HashAgg(HashAggNode {
            group_keys: vec![],
            agg_calls: vec![],
        }),
        vec![root_exchange],
    );
    Fragmenter::new(test_catalog())
        .split(QueryId::new(), arena, agg)
        .unwrap()
}

#[tokio::test]
async fn singleton_query_dispatches_one_unrewritten_task() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 1);

    let fetcher = manager.schedule(singleton_query()).await.unwrap();

    let dispatched = client.dispatched();
    assert_eq!(dispatched.len(), 1);
    let (_, locator, fragment) = &dispatched[0];
    assert_eq!(locator.task_id, TaskId(0));
    assert!(matches!(fragment.root.body, FragmentNodeBody::Scan(_)));
    assert!(fragment.root.children.is_empty());
    assert_eq!(fragment.exchange_info.mode, DistributionMode::Single);

    let chunks: Vec<_> = fetcher.into_stream().collect().await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].as_ref().unwrap().cardinality(), 1);
}

#[tokio::test]
async fn hash_producers_feed_singleton_consumer() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 3);

    manager.schedule(two_stage_query()).await.unwrap();

    // Scan stage: 3 tasks, hash output sized for the single consumer.
    let scan_fragments = client.fragments_for_stage(StageId(1));
    assert_eq!(scan_fragments.len(), 3);
    for (_, fragment) in &scan_fragments {
        assert_eq!(fragment.exchange_info.mode, DistributionMode::Hash);
        assert_eq!(fragment.exchange_info.output_count, 1);
        assert_eq!(
            fragment.exchange_info.distribution.as_ref().unwrap().keys,
            vec![0]
        );
    }

    // Root stage: one task reading slot 0 of all three producers.
    let root_fragments = client.fragments_for_stage(StageId(0));
    assert_eq!(root_fragments.len(), 1);
    let (locator, fragment) = &root_fragments[0];
    assert_eq!(locator.task_id, TaskId(0));
    match &fragment.root.children[0].body {
        FragmentNodeBody::Exchange { sources, input_schema } => {
            assert_eq!(sources.len(), 3);
            for (p, src) in sources.iter().enumerate() {
                assert_eq!(src.task_output_id.output_id, 0);
                assert_eq!(src.task_output_id.task.stage_id, StageId(1));
                assert_eq!(src.task_output_id.task.task_id, TaskId(p as u32));
            }
            assert_eq!(input_schema.len(), 2);
        }
        other => panic!("expected exchange under agg, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_consumers_see_every_producer_task() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 4);

    manager.schedule(broadcast_join_query()).await.unwrap();

    // Join stage runs at full parallelism.
    let join_fragments = client.fragments_for_stage(StageId(1));
    assert_eq!(join_fragments.len(), 4);

    let build_parallelism = client.fragments_for_stage(StageId(2)).len();
    assert_eq!(build_parallelism, 4);

    for (locator, fragment) in &join_fragments {
        let k = locator.task_id.0;
        match &fragment.root.children[0].body {
            FragmentNodeBody::Exchange { sources, .. } => {
                // Full fan-out: every consumer task references every
                // build-side producer task, all at slot k.
                assert_eq!(sources.len(), build_parallelism);
                for src in sources {
                    assert_eq!(src.task_output_id.output_id, k);
                    assert_eq!(src.task_output_id.task.stage_id, StageId(2));
                }
            }
            other => panic!("expected broadcast exchange, got {other:?}"),
        }
    }

    // Both producers feeding the join agree on its fan-out.
    for producer in [StageId(2), StageId(3)] {
        for (_, fragment) in client.fragments_for_stage(producer) {
            assert_eq!(fragment.exchange_info.output_count, 4);
        }
    }
}

#[tokio::test]
async fn dispatch_order_respects_stage_dependencies() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 4);

    let query = broadcast_join_query();
    let dependencies: HashMap<StageId, Vec<StageId>> = query
        .stage_graph
        .stage_ids_by_topo_order()
        .into_iter()
        .map(|id| (id, query.stage_graph.dependencies(id).to_vec()))
        .collect();

    manager.schedule(query).await.unwrap();

    let order: Vec<TaskLocator> = client
        .dispatched()
        .into_iter()
        .map(|(_, locator, _)| locator)
        .collect();
    let first_dispatch = |stage: StageId| order.iter().position(|l| l.stage_id == stage).unwrap();
    let last_dispatch = |stage: StageId| order.iter().rposition(|l| l.stage_id == stage).unwrap();

    for (stage, deps) in &dependencies {
        for dep in deps {
            assert!(
                last_dispatch(*dep) < first_dispatch(*stage),
                "stage {stage} dispatched before its upstream {dep}"
            );
        }
    }
}

#[tokio::test]
async fn scheduling_fails_without_workers() {
    let client = Arc::new(MockComputeClient::default());
    let manager = QueryManager::new(
        SchedulerConfig::default(),
        WorkerNodeManager::new(),
        Arc::clone(&client),
    );

    let err = manager.schedule(singleton_query()).await.unwrap_err();
    assert!(matches!(err, WaveError::Cluster(_)));
    assert!(client.dispatched().is_empty());
}

#[tokio::test]
async fn dispatch_failure_aborts_already_dispatched_tasks() {
    // The root stage (id 0) dispatches last, so every scan task is already
    // out when its dispatch fails.
    let client = Arc::new(MockComputeClient::failing_on(StageId(0)));
    let manager = manager(Arc::clone(&client), 3);

    let err = manager.schedule(two_stage_query()).await.unwrap_err();
    assert!(matches!(err, WaveError::Cluster(_)));

    let aborted = client.aborted.lock().unwrap().clone();
    assert_eq!(aborted.len(), 3);
    assert!(aborted.iter().all(|l| l.stage_id == StageId(1)));
}

#[tokio::test]
async fn cancellation_terminates_result_stream() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 3);

    let query = two_stage_query();
    let query_id = query.query_id.clone();
    let fetcher = manager.schedule(query).await.unwrap();

    manager.cancel_query(&query_id);

    let mut stream = fetcher.into_stream();
    match stream.next().await {
        Some(Err(WaveError::Cancelled(_))) => {}
        other => panic!("expected cancellation error, got {other:?}"),
    }
}

#[tokio::test]
async fn cancelling_one_query_leaves_others_running() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 3);

    let cancelled = two_stage_query();
    let cancelled_id = cancelled.query_id.clone();
    let surviving = two_stage_query();

    let cancelled_fetcher = manager.schedule(cancelled).await.unwrap();
    let surviving_fetcher = manager.schedule(surviving).await.unwrap();

    manager.cancel_query(&cancelled_id);

    let mut dead = cancelled_fetcher.into_stream();
    assert!(matches!(
        dead.next().await,
        Some(Err(WaveError::Cancelled(_)))
    ));

    let chunks: Vec<_> = surviving_fetcher.into_stream().collect().await;
    assert!(chunks.iter().all(|c| c.is_ok()));
    assert_eq!(chunks.len(), 1);
}

#[tokio::test]
async fn drained_result_stream_deregisters_query() {
    let client = Arc::new(MockComputeClient::default());
    let manager = manager(Arc::clone(&client), 3);

    let fetcher = manager.schedule(two_stage_query()).await.unwrap();
    assert_eq!(manager.active_query_count(), 1);

    let chunks: Vec<_> = fetcher.into_stream().collect().await;
    assert!(chunks.iter().all(|c| c.is_ok()));
    assert_eq!(manager.active_query_count(), 0);

    // An abandoned fetcher is cleaned up through finish() instead.
    let abandoned = manager.schedule(two_stage_query()).await.unwrap();
    let query_id = abandoned.query_id().clone();
    assert_eq!(manager.active_query_count(), 1);
    drop(abandoned);
    manager.finish(&query_id);
    assert_eq!(manager.active_query_count(), 0);
}

#[tokio::test]
async fn stage_parallelism_cap_limits_fan_out() {
    let client = Arc::new(MockComputeClient::default());
    let manager = QueryManager::new(
        SchedulerConfig {
            stage_parallelism: Some(2),
        },
        WorkerNodeManager::with_workers(workers(4)),
        Arc::clone(&client),
    );

    manager.schedule(two_stage_query()).await.unwrap();
    assert_eq!(client.fragments_for_stage(StageId(1)).len(), 2);
    // Singleton stages ignore the cap.
    assert_eq!(client.fragments_for_stage(StageId(0)).len(), 1);
}
