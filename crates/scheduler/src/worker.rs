//! Compute-node membership.
//!
//! Responsibilities:
//! - Track the set of live compute workers the scheduler may place tasks on.
//! - Serve point-in-time snapshots for scheduling; membership changes made
//!   while a query is being scheduled do not affect that query.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use wave_planner::HostAddr;

/// One registered compute worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: u32,
    pub host: HostAddr,
}

/// Shared, mutable view of cluster membership.
///
/// Reads vastly outnumber writes; a `std` RwLock is enough since no lock is
/// held across await points.
#[derive(Debug, Clone, Default)]
pub struct WorkerNodeManager {
    workers: Arc<RwLock<Vec<WorkerNode>>>,
}

impl WorkerNodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(workers: Vec<WorkerNode>) -> Self {
        Self {
            workers: Arc::new(RwLock::new(workers)),
        }
    }

    /// Register a worker; replaces any existing entry with the same id.
    pub fn add_worker(&self, worker: WorkerNode) {
        let mut guard = self.workers.write().expect("worker list lock poisoned");
        guard.retain(|w| w.id != worker.id);
        guard.push(worker);
    }

    pub fn remove_worker(&self, id: u32) {
        let mut guard = self.workers.write().expect("worker list lock poisoned");
        guard.retain(|w| w.id != id);
    }

    /// Snapshot of all currently registered workers.
    pub fn list_available_workers(&self) -> Vec<WorkerNode> {
        self.workers
            .read()
            .expect("worker list lock poisoned")
            .clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.read().expect("worker list lock poisoned").len()
    }
}
