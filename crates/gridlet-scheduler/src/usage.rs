//! Per-bucket resource usage accounting and the admission gate

use gridlet_core::{AdmissionConfig, QuotaTable, TaskKind, TaskResources, WorkerCapacity, WorkerId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

const MIB: u64 = 1024 * 1024;

/// In-flight resource consumption for one usage bucket of a worker
///
/// A worker accounts each bucket (active, preparing, one per open
/// scheduling window) independently. The struct owns no lock: every
/// mutation happens under the `tokio::sync::Mutex` of the worker handle
/// that holds the bucket, and the wait condition is bound to that same
/// lock. State is process-lifetime only; nothing here persists.
#[derive(Debug, Default)]
pub struct ResourceUsage {
    /// Sum of thread-equivalents reserved by admitted tasks
    pub cpu_in_use: u64,
    /// Running sum of reserved minimum memory in bytes
    pub mem_min_in_use: u64,
    /// Running sum of reserved worst-case memory in bytes
    pub mem_max_in_use: u64,
    /// Number of admitted GPU-capable tasks
    pub gpu_in_use: u32,
    /// True iff `gpu_in_use > 0`
    pub gpu_busy: bool,
    /// Concurrent task counts for quota-tracked kinds
    pub kind_counts: HashMap<TaskKind, u32>,
    /// Wait condition shared by callers blocked on this bucket; created on
    /// first contention, not at construction
    waiters: Option<Arc<Notify>>,
}

impl ResourceUsage {
    /// Create a zero-valued bucket
    pub fn new() -> Self {
        Self::default()
    }

    /// Concurrent count currently tracked for a kind
    pub fn kind_count(&self, kind: TaskKind) -> u32 {
        self.kind_counts.get(&kind).copied().unwrap_or(0)
    }

    /// Handle to the bucket's wait condition, creating it on first use
    pub(crate) fn waiters(&mut self) -> Arc<Notify> {
        self.waiters
            .get_or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wake every caller blocked on this bucket, if any ever waited
    ///
    /// Broadcast, not signal-one: freed resources may satisfy any subset
    /// of heterogeneous pending requests, so every waiter re-evaluates.
    pub(crate) fn wake_waiters(&self) {
        if let Some(waiters) = &self.waiters {
            waiters.notify_waiters();
        }
    }

    /// Decide whether this bucket can accept `need` right now
    ///
    /// Pure with respect to accounting state; the only output besides the
    /// verdict is a debug event naming the dimension that failed and its
    /// shortfall. Checks run in order: physical memory floor, virtual
    /// memory ceiling, CPU budget, GPU slots, per-kind quota. A worker
    /// with `ignore_resource_limits` admits unconditionally.
    pub fn can_admit(
        &self,
        need: &TaskResources,
        worker: WorkerId,
        caller: &str,
        capacity: &WorkerCapacity,
        config: &AdmissionConfig,
    ) -> bool {
        if capacity.ignore_resource_limits {
            return true;
        }

        // The guaranteed minimum footprint of all promised work plus this
        // task must fit in physical RAM.
        let min_need_mem =
            capacity.memory_reserved + self.mem_min_in_use + need.min_memory + need.base_min_memory;
        if min_need_mem > capacity.memory_physical {
            debug!(
                worker = %worker,
                caller,
                need_mib = min_need_mem / MIB,
                have_mib = capacity.memory_physical / MIB,
                "not admitting: not enough physical memory"
            );
            return false;
        }

        // The worst case only has to fit with swap.
        let max_need_mem =
            capacity.memory_reserved + self.mem_max_in_use + need.max_memory + need.base_min_memory;
        if max_need_mem > capacity.memory_virtual() {
            debug!(
                worker = %worker,
                caller,
                need_mib = max_need_mem / MIB,
                have_mib = capacity.memory_virtual() / MIB,
                "not admitting: not enough virtual memory"
            );
            return false;
        }

        let need_threads = need.threads_for(capacity.cpus);
        if self.cpu_in_use + need_threads > capacity.cpus {
            debug!(
                worker = %worker,
                caller,
                need_threads,
                in_use = self.cpu_in_use,
                cpus = capacity.cpus,
                "not admitting: not enough CPU threads"
            );
            return false;
        }

        if !capacity.gpus.is_empty()
            && need.gpu_capable
            && !config.gpu_policy.admits(capacity.gpus.len(), self.gpu_in_use)
        {
            debug!(
                worker = %worker,
                caller,
                installed = capacity.gpus.len(),
                in_use = self.gpu_in_use,
                policy = ?config.gpu_policy,
                "not admitting: GPU slots exhausted"
            );
            return false;
        }

        if let Some(max) = config.quotas.limit(need.kind) {
            let running = self.kind_count(need.kind);
            if running >= max {
                debug!(
                    worker = %worker,
                    caller,
                    kind = %need.kind,
                    running,
                    max,
                    "not admitting: kind quota reached"
                );
                return false;
            }
        }

        true
    }

    /// Record an admitted requirement
    ///
    /// Must be balanced by a [`release`](Self::release) with identical
    /// requirement values; pairs need not nest but must balance.
    pub fn reserve(&mut self, capacity: &WorkerCapacity, need: &TaskResources, quotas: &QuotaTable) {
        if need.gpu_capable {
            self.gpu_in_use += 1;
            self.gpu_busy = true;
        }

        if quotas.tracks(need.kind) {
            *self.kind_counts.entry(need.kind).or_insert(0) += 1;
        }

        self.cpu_in_use += need.threads_for(capacity.cpus);
        self.mem_min_in_use += need.min_memory;
        self.mem_max_in_use += need.max_memory;
    }

    /// Exact inverse of [`reserve`](Self::reserve), for the same
    /// requirement values
    pub fn release(&mut self, capacity: &WorkerCapacity, need: &TaskResources, quotas: &QuotaTable) {
        if need.gpu_capable {
            self.gpu_in_use = self.gpu_in_use.saturating_sub(1);
            self.gpu_busy = self.gpu_in_use > 0;
        }

        if quotas.tracks(need.kind) {
            if let Some(count) = self.kind_counts.get_mut(&need.kind) {
                *count = count.saturating_sub(1);
            }
        }

        self.cpu_in_use = self.cpu_in_use.saturating_sub(need.threads_for(capacity.cpus));
        self.mem_min_in_use = self.mem_min_in_use.saturating_sub(need.min_memory);
        self.mem_max_in_use = self.mem_max_in_use.saturating_sub(need.max_memory);
    }

    /// Load on this bucket as the worst fractional pressure across CPU,
    /// physical memory, and virtual memory
    ///
    /// The max (not a weighted sum) reports the single tightest bottleneck
    /// dimension, which is what a placement policy needs to avoid the
    /// worst-fitting resource. Zero-capacity dimensions contribute nothing.
    pub fn utilization(&self, capacity: &WorkerCapacity) -> f64 {
        let mut max = 0.0;

        if capacity.cpus > 0 {
            max = self.cpu_in_use as f64 / capacity.cpus as f64;
        }

        if capacity.memory_physical > 0 {
            let mem_min = (self.mem_min_in_use + capacity.memory_reserved) as f64
                / capacity.memory_physical as f64;
            if mem_min > max {
                max = mem_min;
            }
        }

        if capacity.memory_virtual() > 0 {
            let mem_max = (self.mem_max_in_use + capacity.memory_reserved) as f64
                / capacity.memory_virtual() as f64;
            if mem_max > max {
                max = mem_max;
            }
        }

        max
    }
}
