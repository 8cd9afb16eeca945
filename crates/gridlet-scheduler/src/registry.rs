//! Worker registry boundary
//!
//! Registration and discovery semantics live outside the admission core;
//! this is the seam where an external registry hands capacities in and
//! takes handles out. Handles and every bucket they own disappear with
//! deregistration; nothing survives a process restart.

use crate::worker::WorkerHandle;
use gridlet_core::{GridletError, GridletResult, WorkerCapacity, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registered workers indexed by id
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, Arc<WorkerHandle>>>,
}

impl WorkerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker with the given capacity, returning its handle
    pub async fn register(&self, capacity: WorkerCapacity) -> Arc<WorkerHandle> {
        let handle = Arc::new(WorkerHandle::new(capacity));
        info!(
            worker = %handle.id,
            cpus = handle.capacity.cpus,
            mem_physical = handle.capacity.memory_physical,
            gpus = handle.capacity.gpus.len(),
            "Worker registered"
        );
        self.workers.write().await.insert(handle.id, handle.clone());
        handle
    }

    /// Drop a worker and every usage bucket it owns
    pub async fn deregister(&self, id: WorkerId) -> GridletResult<()> {
        match self.workers.write().await.remove(&id) {
            Some(_) => {
                debug!(worker = %id, "Worker deregistered");
                Ok(())
            }
            None => Err(GridletError::WorkerNotFound(id.to_string())),
        }
    }

    /// Look up a worker handle
    pub async fn get(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        self.workers.read().await.get(&id).cloned()
    }

    /// Number of registered workers
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    /// Current utilization of every registered worker
    ///
    /// Read-only ranking input for an external placement policy; the
    /// registry itself never picks a worker.
    pub async fn utilization_snapshot(&self) -> Vec<(WorkerId, f64)> {
        let handles: Vec<Arc<WorkerHandle>> =
            self.workers.read().await.values().cloned().collect();

        let mut snapshot = Vec::with_capacity(handles.len());
        for handle in handles {
            snapshot.push((handle.id, handle.utilization().await));
        }
        snapshot
    }
}
