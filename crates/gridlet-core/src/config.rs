//! Admission policy configuration
//!
//! Everything the admission gate treats as tunable lives here: the GPU
//! slot policy and the per-kind parallelism quota table. Values are
//! configuration data, not literals inside admission code.

use crate::{GridletError, TaskKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tunable admission policy for a scheduler instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// GPU admission policy
    #[serde(default)]
    pub gpu_policy: GpuAdmissionPolicy,
    /// Per-kind parallelism quotas
    #[serde(default)]
    pub quotas: QuotaTable,
}

impl AdmissionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, GridletError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GridletError::Config(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| GridletError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Which way the GPU slot comparison runs
///
/// The comparison direction is a deployment choice, so it is a named,
/// selectable policy rather than an inequality buried in the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GpuAdmissionPolicy {
    /// One concurrent GPU task per installed device
    #[default]
    ExclusivePerDevice,
    /// The opposite comparison: rejects while the in-use count is at or
    /// below the installed device count, so workers with devices refuse
    /// GPU work outright
    Inverted,
}

impl GpuAdmissionPolicy {
    /// Whether one more GPU task may start, given the installed device
    /// count and the number already admitted
    pub fn admits(&self, installed: usize, in_use: u32) -> bool {
        match self {
            GpuAdmissionPolicy::ExclusivePerDevice => (in_use as usize) < installed,
            GpuAdmissionPolicy::Inverted => (in_use as usize) > installed,
        }
    }
}

/// Per-kind concurrency quotas
///
/// Presence in the table means the kind's concurrent count is tracked on
/// every bucket; an entry with a limit is additionally enforced by the
/// admission gate. Kinds absent from the table are neither tracked nor
/// gated. Turning enforcement on or off for a kind is a data change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuotaTable {
    kinds: HashMap<TaskKind, KindQuota>,
}

/// Quota entry for one task kind
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct KindQuota {
    /// Maximum concurrently admitted tasks of the kind; `None` tracks the
    /// count without gating on it
    pub max_concurrent: Option<u32>,
}

impl Default for QuotaTable {
    fn default() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(
            TaskKind::Ingest,
            KindQuota {
                max_concurrent: Some(4),
            },
        );
        kinds.insert(
            TaskKind::Transform,
            KindQuota {
                max_concurrent: Some(2),
            },
        );
        // Counted for observability; not gated
        kinds.insert(
            TaskKind::Encode,
            KindQuota {
                max_concurrent: None,
            },
        );
        Self { kinds }
    }
}

impl QuotaTable {
    /// Table with no tracked kinds
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Whether the kind's concurrent count is tracked at all
    pub fn tracks(&self, kind: TaskKind) -> bool {
        self.kinds.contains_key(&kind)
    }

    /// The enforced limit for the kind, if any
    pub fn limit(&self, kind: TaskKind) -> Option<u32> {
        self.kinds.get(&kind).and_then(|q| q.max_concurrent)
    }

    /// Set or replace the quota entry for a kind
    pub fn set(&mut self, kind: TaskKind, max_concurrent: Option<u32>) {
        self.kinds.insert(kind, KindQuota { max_concurrent });
    }
}
