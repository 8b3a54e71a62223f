//! Per-kernel launch statistics collector.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use aotforge::config::Arch;
//! use aotforge::profiling::{KernelProfiler, LaunchRecord, LaunchStatsProfiler};
//!
//! let profiler = LaunchStatsProfiler::new();
//! profiler.record_launch(LaunchRecord::new("p2g", "p2g_c0", Arch::Cpu, Duration::from_micros(40)));
//!
//! let stats = profiler.stats("p2g").unwrap();
//! assert_eq!(stats.launch_count, 1);
//! println!("{}", profiler.report());
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use crate::profiling::{KernelProfiler, LaunchRecord};

/// Aggregated timings of one kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelStats {
    pub kernel: String,
    pub launch_count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl KernelStats {
    fn first(record: &LaunchRecord) -> Self {
        KernelStats {
            kernel: record.kernel.clone(),
            launch_count: 1,
            total: record.duration,
            min: record.duration,
            max: record.duration,
        }
    }

    fn add(&mut self, duration: Duration) {
        self.launch_count += 1;
        self.total = self.total.saturating_add(duration);
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
    }

    pub fn average(&self) -> Duration {
        if self.launch_count == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total.as_nanos() / u128::from(self.launch_count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

#[derive(Debug, Default)]
struct StatsState {
    by_kernel: HashMap<String, KernelStats>,
    sequence: Vec<String>,
}

/// In-memory [`KernelProfiler`] keeping per-kernel statistics and the order
/// in which kernels were launched.
///
/// Used as the session profiler when `CompileConfig::kernel_profiler` is set
/// and the caller does not bring its own collector.
#[derive(Debug, Default)]
pub struct LaunchStatsProfiler {
    state: Mutex<StatsState>,
}

impl LaunchStatsProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics for one kernel, if it was ever launched
    pub fn stats(&self, kernel: &str) -> Option<KernelStats> {
        self.state.lock().ok()?.by_kernel.get(kernel).cloned()
    }

    /// All statistics, sorted by total time (descending)
    pub fn all_stats(&self) -> Vec<KernelStats> {
        let mut stats: Vec<KernelStats> = match self.state.lock() {
            Ok(state) => state.by_kernel.values().cloned().collect(),
            Err(_) => return Vec::new(),
        };
        stats.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.kernel.cmp(&b.kernel)));
        stats
    }

    pub fn launch_count(&self, kernel: &str) -> u64 {
        self.stats(kernel).map(|s| s.launch_count).unwrap_or(0)
    }

    pub fn total_launches(&self) -> u64 {
        self.state
            .lock()
            .map(|s| s.sequence.len() as u64)
            .unwrap_or(0)
    }

    /// Kernel names in launch order
    pub fn launch_sequence(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.sequence.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.by_kernel.clear();
            state.sequence.clear();
        }
    }

    /// Human readable summary table
    pub fn report(&self) -> String {
        let stats = self.all_stats();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<32} {:>8} {:>12} {:>12} {:>12} {:>12}",
            "kernel", "launches", "total_us", "avg_us", "min_us", "max_us"
        );
        for s in &stats {
            let _ = writeln!(
                out,
                "{:<32} {:>8} {:>12} {:>12} {:>12} {:>12}",
                s.kernel,
                s.launch_count,
                s.total.as_micros(),
                s.average().as_micros(),
                s.min.as_micros(),
                s.max.as_micros()
            );
        }
        out
    }
}

impl KernelProfiler for LaunchStatsProfiler {
    fn record_launch(&self, record: LaunchRecord) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.sequence.push(record.kernel.clone());
        match state.by_kernel.get_mut(&record.kernel) {
            Some(stats) => stats.add(record.duration),
            None => {
                let stats = KernelStats::first(&record);
                state.by_kernel.insert(record.kernel, stats);
            }
        }
    }
}
