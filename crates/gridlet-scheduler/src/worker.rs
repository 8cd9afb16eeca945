//! Worker handles: usage buckets, scheduling windows, and utilization

use crate::reservation::with_reserved_resources;
use crate::usage::ResourceUsage;
use chrono::{DateTime, Utc};
use gridlet_core::{AdmissionConfig, GridletResult, TaskResources, WorkerCapacity, WorkerId};
use std::future::Future;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Selects one of the two always-present usage buckets of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageBucket {
    /// Tasks currently executing
    Active,
    /// Tasks mid-preparation (fetching inputs, warming caches)
    Preparing,
}

/// The always-present buckets of a worker, guarded together by the
/// per-worker lock
#[derive(Debug, Default)]
pub struct WorkerUsage {
    /// Tasks currently executing
    pub active: ResourceUsage,
    /// Tasks mid-preparation
    pub preparing: ResourceUsage,
}

impl WorkerUsage {
    /// Borrow the selected bucket
    pub fn bucket(&self, bucket: UsageBucket) -> &ResourceUsage {
        match bucket {
            UsageBucket::Active => &self.active,
            UsageBucket::Preparing => &self.preparing,
        }
    }

    /// Mutably borrow the selected bucket
    pub fn bucket_mut(&mut self, bucket: UsageBucket) -> &mut ResourceUsage {
        match bucket {
            UsageBucket::Active => &mut self.active,
            UsageBucket::Preparing => &mut self.preparing,
        }
    }
}

/// Resources pre-allocated into one open scheduling window
#[derive(Debug, Default)]
pub struct ScheduleWindow {
    /// Usage promised to tasks assigned to the window but not yet started
    pub allocated: ResourceUsage,
}

/// Handle to one registered worker
///
/// Capacity is immutable for the registration lifetime and readable
/// without a lock. The accounting buckets own no synchronization of their
/// own; they borrow the handle's locks.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Worker identifier
    pub id: WorkerId,
    /// What the worker offers
    pub capacity: WorkerCapacity,
    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
    /// Active and preparing buckets behind the per-worker lock
    pub usage: Mutex<WorkerUsage>,
    /// Open scheduling windows, locked independently of `usage`
    pub windows: Mutex<Vec<ScheduleWindow>>,
}

impl WorkerHandle {
    /// Create a handle with zeroed usage for a newly registered worker
    pub fn new(capacity: WorkerCapacity) -> Self {
        Self {
            id: Uuid::new_v4(),
            capacity,
            registered_at: Utc::now(),
            usage: Mutex::new(WorkerUsage::default()),
            windows: Mutex::new(Vec::new()),
        }
    }

    /// Admit `need` on one of this worker's buckets, run `work`, release
    ///
    /// Forwards to [`with_reserved_resources`] with the handle's own lock.
    pub async fn with_reserved<T, F, Fut>(
        &self,
        bucket: UsageBucket,
        caller: &str,
        config: &AdmissionConfig,
        need: &TaskResources,
        work: F,
    ) -> GridletResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GridletResult<T>>,
    {
        with_reserved_resources(
            self.id,
            caller,
            &self.capacity,
            config,
            need,
            &self.usage,
            bucket,
            work,
        )
        .await
    }

    /// Open a new scheduling window, returning its index
    pub async fn open_window(&self) -> usize {
        let mut windows = self.windows.lock().await;
        windows.push(ScheduleWindow::default());
        windows.len() - 1
    }

    /// Tear down a scheduling window, discarding its pre-allocations
    pub async fn close_window(&self, index: usize) -> Option<ScheduleWindow> {
        let mut windows = self.windows.lock().await;
        if index < windows.len() {
            Some(windows.remove(index))
        } else {
            None
        }
    }

    /// Total load across every usage bucket of this worker
    ///
    /// Each group of buckets is read under its own lock, released before
    /// the next is taken: the sum is an approximation, not an atomic
    /// snapshot across buckets. A transactionally consistent read would
    /// need a worker-wide lock on every poll.
    pub async fn utilization(&self) -> f64 {
        let mut total = {
            let usage = self.usage.lock().await;
            usage.active.utilization(&self.capacity) + usage.preparing.utilization(&self.capacity)
        };

        let windows = self.windows.lock().await;
        for window in windows.iter() {
            total += window.allocated.utilization(&self.capacity);
        }

        total
    }
}
