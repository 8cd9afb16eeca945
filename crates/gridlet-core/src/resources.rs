//! Task requirement and worker capacity type definitions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a registered worker
pub type WorkerId = Uuid;

/// Categories of pipeline tasks the scheduler places
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Pull raw inputs into the pipeline
    Ingest,
    /// CPU-heavy intermediate transformation
    Transform,
    /// Memory-heavy encoding of transformed data
    Encode,
    /// Validate produced artifacts
    Verify,
    /// Publish final outputs
    Finalize,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Ingest => write!(f, "ingest"),
            TaskKind::Transform => write!(f, "transform"),
            TaskKind::Encode => write!(f, "encode"),
            TaskKind::Verify => write!(f, "verify"),
            TaskKind::Finalize => write!(f, "finalize"),
        }
    }
}

/// How a task's CPU-thread need scales with the size of the worker it lands on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadDemand {
    /// A flat number of threads, independent of worker size
    Fixed(u64),
    /// Every core the worker has
    AllCores,
    /// A fraction of the worker's cores, rounded up, never below one
    CoreFraction { numer: u64, denom: u64 },
}

impl ThreadDemand {
    /// Number of CPU-thread-equivalents consumed on a worker with
    /// `worker_cpus` cores
    pub fn threads_for(&self, worker_cpus: u64) -> u64 {
        match *self {
            ThreadDemand::Fixed(n) => n,
            ThreadDemand::AllCores => worker_cpus,
            ThreadDemand::CoreFraction { numer, denom } => {
                let denom = denom.max(1);
                (worker_cpus * numer).div_ceil(denom).max(1)
            }
        }
    }
}

/// What a pending task needs from the worker that admits it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResources {
    /// Task category
    pub kind: TaskKind,
    /// Guaranteed resident-set floor in bytes
    pub min_memory: u64,
    /// Worst-case footprint in bytes; the gap above `min_memory` may spill
    /// to swap
    pub max_memory: u64,
    /// Fixed per-task overhead counted against physical memory at admission
    pub base_min_memory: u64,
    /// Whether the task can run a GPU stage
    pub gpu_capable: bool,
    /// CPU-thread demand
    pub threads: ThreadDemand,
}

impl TaskResources {
    /// Create a requirement with a flat thread count and no GPU stage
    pub fn new(kind: TaskKind, min_memory: u64, max_memory: u64, threads: u64) -> Self {
        Self {
            kind,
            min_memory,
            max_memory,
            base_min_memory: 0,
            gpu_capable: false,
            threads: ThreadDemand::Fixed(threads),
        }
    }

    /// Thread-equivalents consumed on a worker with the given core count
    pub fn threads_for(&self, worker_cpus: u64) -> u64 {
        self.threads.threads_for(worker_cpus)
    }
}

/// A GPU installed on a worker
///
/// Admission only consumes the device count; identity is kept for
/// diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDevice {
    /// Device index on the worker
    pub index: u32,
    /// Device name
    pub name: String,
    /// Total memory in bytes
    pub memory_total: u64,
}

impl GpuDevice {
    /// Create a device entry
    pub fn new(index: u32, name: String, memory_total: u64) -> Self {
        Self {
            index,
            name,
            memory_total,
        }
    }
}

/// What a worker offers, fixed for the lifetime of its registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCapacity {
    /// Number of CPU threads
    pub cpus: u64,
    /// Physical memory in bytes
    pub memory_physical: u64,
    /// Swap in bytes
    pub memory_swap: u64,
    /// Bytes reserved for the worker process itself, not task work
    pub memory_reserved: u64,
    /// Installed GPU devices
    pub gpus: Vec<GpuDevice>,
    /// When set, the worker admits every task regardless of budgets
    pub ignore_resource_limits: bool,
}

impl WorkerCapacity {
    /// Create a capacity with no GPUs, no reserved memory, and limits
    /// enforced
    pub fn new(cpus: u64, memory_physical: u64, memory_swap: u64) -> Self {
        Self {
            cpus,
            memory_physical,
            memory_swap,
            memory_reserved: 0,
            gpus: Vec::new(),
            ignore_resource_limits: false,
        }
    }

    /// Total memory admissible in the worst case
    pub fn memory_virtual(&self) -> u64 {
        self.memory_physical + self.memory_swap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threads_for_fixed() {
        let demand = ThreadDemand::Fixed(4);
        assert_eq!(demand.threads_for(8), 4);
        assert_eq!(demand.threads_for(64), 4);
    }

    #[test]
    fn test_threads_for_all_cores() {
        let demand = ThreadDemand::AllCores;
        assert_eq!(demand.threads_for(8), 8);
        assert_eq!(demand.threads_for(64), 64);
    }

    #[test]
    fn test_threads_for_fraction_rounds_up() {
        let half = ThreadDemand::CoreFraction { numer: 1, denom: 2 };
        assert_eq!(half.threads_for(8), 4);
        assert_eq!(half.threads_for(7), 4);
        // Never below one thread, even on tiny workers
        let eighth = ThreadDemand::CoreFraction { numer: 1, denom: 8 };
        assert_eq!(eighth.threads_for(2), 1);
    }

    #[test]
    fn test_task_resources_new() {
        let need = TaskResources::new(TaskKind::Verify, 1024, 2048, 2);
        assert_eq!(need.base_min_memory, 0);
        assert!(!need.gpu_capable);
        assert_eq!(need.threads_for(16), 2);
    }

    #[test]
    fn test_memory_virtual() {
        let capacity = WorkerCapacity::new(8, 16, 4);
        assert_eq!(capacity.memory_virtual(), 20);
    }

    #[test]
    fn test_task_kind_display() {
        assert_eq!(TaskKind::Ingest.to_string(), "ingest");
        assert_eq!(TaskKind::Finalize.to_string(), "finalize");
    }
}
