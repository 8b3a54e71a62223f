//! Common test utilities for integration tests
//!
//! - [`fixtures`] writes artifact directories into temp dirs
//! - [`mpm88`] is the MPM88 particle simulation as host-linked CPU kernels
//! - [`tempfile_helpers`] wraps `tempfile` with error context
//!
//! Tests that create sessions run `#[serial]` so timing-sensitive profiler
//! assertions are not disturbed by other tests' kernel threads.

#![allow(dead_code)]

pub mod fixtures;
pub mod mpm88;
pub mod tempfile_helpers;

use std::sync::Arc;

use aotforge::config::CompileConfig;
use aotforge::memory::MemoryPool;
use aotforge::profiling::{KernelProfiler, LaunchStatsProfiler};
use aotforge::program::{Program, RuntimeExecutor};
pub use serial_test::serial;

/// Install the test subscriber once (honours `AOTFORGE_LOG_LEVEL`)
pub fn init_test_logging() {
    aotforge::logging::init_logging_default();
}

/// Materialized CPU session with default configuration
pub fn cpu_runtime() -> anyhow::Result<RuntimeExecutor> {
    runtime_with(CompileConfig::default().with_cpu_max_num_threads(4), None)
}

/// CPU session reporting launches to a [`LaunchStatsProfiler`] the test keeps
pub fn profiled_cpu_runtime() -> anyhow::Result<(RuntimeExecutor, Arc<LaunchStatsProfiler>)> {
    let stats = Arc::new(LaunchStatsProfiler::new());
    let profiler: Arc<dyn KernelProfiler> = stats.clone();
    let runtime = runtime_with(
        CompileConfig::default().with_cpu_max_num_threads(4),
        Some(profiler),
    )?;
    Ok((runtime, stats))
}

/// Two-phase startup: program, pool against its device handle, materialize
pub fn runtime_with(
    config: CompileConfig,
    profiler: Option<Arc<dyn KernelProfiler>>,
) -> anyhow::Result<RuntimeExecutor> {
    init_test_logging();
    let program = Program::new(config.clone());
    let pool = MemoryPool::new(config.arch, &program.compute_device())?;
    Ok(program.materialize_runtime(pool, profiler)?)
}
