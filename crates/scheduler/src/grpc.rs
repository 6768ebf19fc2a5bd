//! gRPC client implementations of the compute and meta RPC surfaces.
//!
//! RPC schema source: `proto/wave_scheduler.proto`.
//!
//! Compute-node RPCs (generated under [`v1`]):
//! - `DispatchTask`, `GetData` (stream), `AbortTask`
//!
//! Meta-service RPCs:
//! - `CreateMaterializedView`, `DropMaterializedView`, `Flush`
//!
//! Plan fragments and stream graphs travel as JSON payloads inside the
//! protobuf envelope; the envelope itself only carries addressing and
//! status.

use std::collections::HashMap;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::Mutex;
use tonic::transport::Channel;
use wave_catalog::TableId;
use wave_common::{Result, WaveError};
use wave_planner::fragment::{DataChunk, PlanFragment, TaskLocator, TaskOutputId};
use wave_planner::HostAddr;

use crate::query_manager::ComputeClient;
use crate::streaming::{MetaClient, StreamFragmentGraph};
use crate::worker::WorkerNode;

#[allow(missing_docs)]
pub mod v1 {
    tonic::include_proto!("wave.scheduler.v1");
}

use v1::compute_service_client::ComputeServiceClient;
use v1::meta_service_client::MetaServiceClient;

fn connect_error(host: &HostAddr, err: tonic::transport::Error) -> WaveError {
    WaveError::Cluster(format!("failed to connect to {host}: {err}"))
}

fn rpc_error(err: tonic::Status) -> WaveError {
    WaveError::Cluster(format!("rpc failed: {err}"))
}

fn check_status(status: Option<v1::Status>) -> Result<()> {
    match status {
        None => Ok(()),
        Some(s) if s.code == 0 => Ok(()),
        Some(s) => Err(WaveError::Internal(format!(
            "remote returned status {}: {}",
            s.code, s.message
        ))),
    }
}

fn proto_locator(task: &TaskLocator) -> v1::TaskLocator {
    v1::TaskLocator {
        query_id: task.query_id.0.clone(),
        stage_id: task.stage_id.0,
        task_id: task.task_id.0,
    }
}

/// Compute-node client that maintains one channel per worker host.
#[derive(Default)]
pub struct GrpcComputeClient {
    channels: Mutex<HashMap<HostAddr, ComputeServiceClient<Channel>>>,
}

impl GrpcComputeClient {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, host: &HostAddr) -> Result<ComputeServiceClient<Channel>> {
        let mut channels = self.channels.lock().await;
        if let Some(client) = channels.get(host) {
            return Ok(client.clone());
        }
        let endpoint = format!("http://{host}");
        let client = ComputeServiceClient::connect(endpoint)
            .await
            .map_err(|e| connect_error(host, e))?;
        channels.insert(host.clone(), client.clone());
        Ok(client)
    }
}

#[tonic::async_trait]
impl ComputeClient for GrpcComputeClient {
    async fn dispatch_task(
        &self,
        worker: &WorkerNode,
        task: TaskLocator,
        fragment: PlanFragment,
    ) -> Result<()> {
        let payload = serde_json::to_vec(&fragment)
            .map_err(|e| WaveError::Internal(format!("failed to encode plan fragment: {e}")))?;
        let mut client = self.client(&worker.host).await?;
        let response = client
            .dispatch_task(v1::DispatchTaskRequest {
                task: Some(proto_locator(&task)),
                plan_fragment_json: payload,
            })
            .await
            .map_err(rpc_error)?;
        check_status(response.into_inner().status)
    }

    async fn get_data(
        &self,
        worker: &WorkerNode,
        output: TaskOutputId,
    ) -> Result<BoxStream<'static, Result<DataChunk>>> {
        let mut client = self.client(&worker.host).await?;
        let response = client
            .get_data(v1::GetDataRequest {
                task: Some(proto_locator(&output.task)),
                output_id: output.output_id,
            })
            .await
            .map_err(rpc_error)?;
        let stream = response.into_inner().map(|payload| {
            let payload = payload.map_err(rpc_error)?;
            serde_json::from_slice::<DataChunk>(&payload.chunk_json)
                .map_err(|e| WaveError::Internal(format!("failed to decode data chunk: {e}")))
        });
        Ok(Box::pin(stream))
    }

    async fn abort_task(&self, worker: &WorkerNode, task: TaskLocator) -> Result<()> {
        let mut client = self.client(&worker.host).await?;
        let response = client
            .abort_task(v1::AbortTaskRequest {
                task: Some(proto_locator(&task)),
            })
            .await
            .map_err(rpc_error)?;
        check_status(response.into_inner().status)
    }
}

/// Meta-service client over a single channel.
pub struct GrpcMetaClient {
    client: Mutex<MetaServiceClient<Channel>>,
}

impl GrpcMetaClient {
    pub async fn connect(host: &HostAddr) -> Result<Self> {
        let endpoint = format!("http://{host}");
        let client = MetaServiceClient::connect(endpoint)
            .await
            .map_err(|e| connect_error(host, e))?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[tonic::async_trait]
impl MetaClient for GrpcMetaClient {
    async fn create_materialized_view(
        &self,
        table_id: TableId,
        graph: &StreamFragmentGraph,
    ) -> Result<()> {
        let payload = serde_json::to_vec(graph)
            .map_err(|e| WaveError::Internal(format!("failed to encode stream graph: {e}")))?;
        let mut client = self.client.lock().await;
        let response = client
            .create_materialized_view(v1::CreateMaterializedViewRequest {
                table_id: table_id.0,
                stream_graph_json: payload,
            })
            .await
            .map_err(rpc_error)?;
        check_status(response.into_inner().status)
    }

    async fn drop_materialized_view(&self, table_id: TableId) -> Result<()> {
        let mut client = self.client.lock().await;
        let response = client
            .drop_materialized_view(v1::DropMaterializedViewRequest {
                table_id: table_id.0,
            })
            .await
            .map_err(rpc_error)?;
        check_status(response.into_inner().status)
    }

    async fn flush(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        let response = client
            .flush(v1::FlushRequest {})
            .await
            .map_err(rpc_error)?;
        check_status(response.into_inner().status)
    }
}
