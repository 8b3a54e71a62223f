//! Graph Dispatch Benchmark Suite
//!
//! Measures host-side overhead of the CPU backend:
//! - Graph::run enqueue cost (binding + type checks), without synchronizing
//! - run + synchronize round trip for graphs of increasing length
//! - Memory pool allocate/free with and without the per-size cache
//!
//! Run with: `cargo bench --bench graph_dispatch_bench`

use std::hint::black_box;
use std::time::{Duration, Instant};

use aotforge::aot::{cpu, AotModuleParams, METADATA_FILE};
use aotforge::backend::cpu::{HostSymbolTable, LaunchContext};
use aotforge::config::CompileConfig;
use aotforge::memory::MemoryPool;
use aotforge::program::{Program, RuntimeExecutor};
use aotforge::value::{ArgMap, IValue, PrimitiveType};

// ============================================================================
// Benchmark Harness
// ============================================================================

struct Benchmark {
    name: String,
    iterations: usize,
    warmup_iterations: usize,
}

impl Benchmark {
    fn new(name: &str, iterations: usize) -> Self {
        Benchmark {
            name: name.to_string(),
            iterations,
            warmup_iterations: iterations.min(10),
        }
    }

    fn run<F, R>(&self, mut f: F) -> BenchmarkResult
    where
        F: FnMut() -> R,
    {
        for _ in 0..self.warmup_iterations {
            black_box(f());
        }

        let mut durations = Vec::with_capacity(self.iterations);
        for _ in 0..self.iterations {
            let start = Instant::now();
            black_box(f());
            durations.push(start.elapsed());
        }

        BenchmarkResult {
            name: self.name.clone(),
            durations,
        }
    }
}

struct BenchmarkResult {
    name: String,
    durations: Vec<Duration>,
}

impl BenchmarkResult {
    fn report(&self) {
        let mut sorted = self.durations.clone();
        sorted.sort();
        if sorted.is_empty() {
            return;
        }
        let total: Duration = sorted.iter().sum();
        let avg = total / sorted.len() as u32;
        let p50 = sorted[sorted.len() / 2];
        let p99 = sorted[(sorted.len() * 99) / 100];

        println!("\n=== {} ===", self.name);
        println!("Iterations: {}", sorted.len());
        println!("Average: {:?}", avg);
        println!("Min:     {:?}", sorted[0]);
        println!("Max:     {:?}", sorted[sorted.len() - 1]);
        println!("P50:     {:?}", p50);
        println!("P99:     {:?}", p99);
    }
}

// ============================================================================
// Fixture
// ============================================================================

unsafe extern "C-unwind" fn bump(ctx: *const LaunchContext) {
    let ctx = &*ctx;
    let data = ctx.array_slice_mut::<f32>(0);
    let k: f32 = ctx.scalar(1);
    for v in data.iter_mut() {
        *v += k;
    }
}

/// Module with one graph per length, each dispatching `bump` that many times
fn write_module(dir: &std::path::Path, lengths: &[usize]) {
    let graphs: Vec<String> = lengths
        .iter()
        .map(|n| {
            let dispatch = r#"{"kernel": "bump", "args": [{"param": "x", "symbol": "x"}, {"param": "k", "symbol": "k"}]}"#;
            format!(
                r#"{{"name": "chain_{}", "dispatches": [{}]}}"#,
                n,
                vec![dispatch; *n].join(", ")
            )
        })
        .collect();
    let metadata = format!(
        r#"{{
            "version": 1,
            "arch": "cpu",
            "kernels": [{{
                "name": "bump",
                "params": [
                    {{"name": "x", "kind": "ndarray", "dtype": "f32", "field_dim": 1}},
                    {{"name": "k", "kind": "scalar", "dtype": "f32"}}
                ],
                "tasks": [{{"symbol": "bump_c0"}}]
            }}],
            "graphs": [{}]
        }}"#,
        graphs.join(", ")
    );
    std::fs::write(dir.join(METADATA_FILE), metadata).expect("write metadata");
}

fn runtime() -> RuntimeExecutor {
    let config = CompileConfig::default();
    let program = Program::new(config.clone());
    let pool = MemoryPool::new(config.arch, &program.compute_device()).expect("pool");
    program.materialize_runtime(pool, None).expect("materialize")
}

// ============================================================================
// Benchmarks
// ============================================================================

fn benchmark_graph_dispatch(runtime: &RuntimeExecutor, dir: &std::path::Path, lengths: &[usize]) {
    let symbols = HostSymbolTable::new().with("bump_c0", bump);
    let module = cpu::make_aot_module(AotModuleParams::new(dir, runtime).with_host_symbols(symbols))
        .expect("load module");
    let x = runtime
        .allocate_ndarray(PrimitiveType::F32, &[1024], &[])
        .expect("allocate");

    for &n in lengths {
        let graph = module.get_graph(&format!("chain_{}", n)).expect("graph");
        let mut args = ArgMap::new();
        args.insert("x".to_string(), IValue::from(&x));
        args.insert("k".to_string(), IValue::from(1.0f32));

        Benchmark::new(&format!("enqueue chain of {}", n), 200)
            .run(|| graph.run(&args).expect("run"))
            .report();
        runtime.synchronize().expect("sync");

        Benchmark::new(&format!("run + synchronize chain of {}", n), 200)
            .run(|| {
                graph.run(&args).expect("run");
                runtime.synchronize().expect("sync")
            })
            .report();
    }
}

fn benchmark_pool(runtime: &RuntimeExecutor) {
    for size in [256usize, 64 * 1024, 4 * 1024 * 1024] {
        Benchmark::new(&format!("allocate/free {} bytes (cached)", size), 1000)
            .run(|| {
                let a = runtime.allocate_memory_ndarray(size).expect("allocate");
                runtime.deallocate_memory_ndarray(a).expect("free")
            })
            .report();

        Benchmark::new(&format!("allocate/free {} bytes (uncached)", size), 200)
            .run(|| {
                let a = runtime.allocate_memory_ndarray(size).expect("allocate");
                runtime.deallocate_memory_ndarray(a).expect("free");
                runtime.release_cached_memory().expect("release")
            })
            .report();
    }
    if let Ok(stats) = runtime.pool_stats() {
        println!("\n{}", stats);
    }
}

fn main() {
    println!("====================================");
    println!("aotforge Graph Dispatch Benchmark");
    println!("====================================");

    let lengths = [1usize, 8, 64];
    let dir = tempfile::tempdir().expect("tempdir");
    write_module(dir.path(), &lengths);

    let runtime = runtime();
    println!("Device: {}", runtime.device_name());

    benchmark_graph_dispatch(&runtime, dir.path(), &lengths);
    benchmark_pool(&runtime);

    println!("\n====================================");
    println!("Benchmark Complete");
    println!("====================================");
}
