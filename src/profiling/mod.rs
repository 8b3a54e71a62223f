//! Kernel profiling hooks
//!
//! The runtime reports every kernel launch to an optional [`KernelProfiler`]
//! bound at materialization. Without one, launches are not timed at all.
//!
//! # Modules
//!
//! - [`launch_stats`] - in-memory per-kernel statistics collector

pub mod launch_stats;

use std::fmt::Debug;
use std::time::Duration;

use crate::config::Arch;

pub use launch_stats::{KernelStats, LaunchStatsProfiler};

/// One completed (CPU) or submitted-and-synchronized (GPU) kernel launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    /// Kernel name as declared in the module metadata
    pub kernel: String,
    /// Entry point symbol of the task that ran
    pub task: String,
    pub arch: Arch,
    pub duration: Duration,
}

impl LaunchRecord {
    pub fn new(
        kernel: impl Into<String>,
        task: impl Into<String>,
        arch: Arch,
        duration: Duration,
    ) -> Self {
        LaunchRecord {
            kernel: kernel.into(),
            task: task.into(),
            arch,
            duration,
        }
    }
}

/// Capability to collect launch events.
///
/// Records may arrive from the backend's queue thread, so implementations
/// must be thread-safe and should return quickly.
pub trait KernelProfiler: Send + Sync + Debug {
    fn record_launch(&self, record: LaunchRecord);
}
