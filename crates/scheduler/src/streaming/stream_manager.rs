//! Materialized-view lifecycle against the meta service.

use std::sync::Arc;

use tracing::info;
use wave_catalog::{CatalogReader, TableCatalog, TableId};
use wave_common::Result;

use super::graph::StreamFragmentGraph;

/// RPC surface of the meta service, as consumed by the stream manager.
/// Each call maps to one DDL round-trip; a non-OK status from the service
/// surfaces as an internal error.
#[tonic::async_trait]
pub trait MetaClient: Send + Sync + 'static {
    async fn create_materialized_view(
        &self,
        table_id: TableId,
        graph: &StreamFragmentGraph,
    ) -> Result<()>;

    async fn drop_materialized_view(&self, table_id: TableId) -> Result<()>;

    async fn flush(&self) -> Result<()>;
}

/// Drives materialized-view DDL: ships the fragment graph to the meta
/// service and keeps the local catalog in step with it.
pub struct StreamManager<M: MetaClient> {
    meta_client: Arc<M>,
    catalog: CatalogReader,
}

impl<M: MetaClient> StreamManager<M> {
    pub fn new(meta_client: Arc<M>, catalog: CatalogReader) -> Self {
        Self {
            meta_client,
            catalog,
        }
    }

    /// Create a materialized view backed by `graph`. The catalog entry is
    /// registered only after the meta service accepts the graph.
    pub async fn create_materialized_view(
        &self,
        table: TableCatalog,
        graph: StreamFragmentGraph,
    ) -> Result<()> {
        let table_id = table.id;
        self.meta_client
            .create_materialized_view(table_id, &graph)
            .await?;
        self.catalog.write(|c| {
            c.register_table(table);
            Ok(())
        })?;
        info!(table_id = %table_id, "materialized view created");
        Ok(())
    }

    pub async fn drop_materialized_view(&self, table_id: TableId) -> Result<()> {
        self.meta_client.drop_materialized_view(table_id).await?;
        self.catalog.write(|c| c.drop_table(table_id))?;
        info!(table_id = %table_id, "materialized view dropped");
        Ok(())
    }

    /// Force a barrier through all streaming jobs and wait for it.
    pub async fn flush(&self) -> Result<()> {
        self.meta_client.flush().await
    }
}
