//! gridlet-scheduler: admission control and usage accounting for workers
//!
//! This crate answers one question under concurrency: can this worker,
//! right now, accept this task without violating its resource budget?
//! It provides:
//! - Per-bucket usage accounting and the admission gate
//! - Blocking reservation of resources around a unit of work
//! - Worker handles, scheduling windows, and the utilization estimator
//! - The worker registry boundary

pub mod registry;
pub mod reservation;
pub mod usage;
pub mod worker;

pub use registry::WorkerRegistry;
pub use reservation::with_reserved_resources;
pub use usage::ResourceUsage;
pub use worker::{ScheduleWindow, UsageBucket, WorkerHandle, WorkerUsage};
