//! MPM88 graph execution end to end
//!
//! Mirrors how an application drives a precompiled simulation: two-phase
//! startup, load the module, run `init`, then `update` on the state `init`
//! wrote.

mod common;

use aotforge::aot::{cpu, make_aot_module, AotModuleParams};
use aotforge::config::{aot_folder_from_env, Arch};
use common::mpm88::{self, Mpm88State, NR_PARTICLES, SUBSTEPS};
use common::tempfile_helpers::create_temp_dir;
use common::{cpu_runtime, profiled_cpu_runtime, serial};

#[test]
#[serial]
fn test_mpm88_cpu() -> anyhow::Result<()> {
    let runtime = cpu_runtime()?;
    let dir = create_temp_dir()?;
    mpm88::module().write(dir.path())?;

    let module = cpu::make_aot_module(
        AotModuleParams::new(dir.path(), &runtime).with_host_symbols(mpm88::host_symbols()),
    )?;
    let state = Mpm88State::allocate(&runtime)?;

    let g_init = module.get_graph("init")?;
    g_init.run(&state.init_args())?;
    runtime.synchronize()?;

    let j = runtime.read_ndarray::<f32>(&state.j)?;
    assert!(j.iter().all(|&v| v == 1.0));
    let v = runtime.read_ndarray::<f32>(&state.v)?;
    assert!(v.chunks_exact(2).all(|c| *c == [0.0, -1.0]));
    let x0 = runtime.read_ndarray::<f32>(&state.x)?;
    assert!(x0.iter().all(|&c| (0.2..0.6).contains(&c)));

    let g_update = module.get_graph("update")?;
    g_update.run(&state.update_args())?;
    runtime.synchronize()?;

    let pos = runtime.read_ndarray::<f32>(&state.pos)?;
    assert_eq!(pos.len(), NR_PARTICLES * 3);
    assert!(pos.iter().all(|p| p.is_finite()));
    assert!(pos.chunks_exact(3).all(|p| p[2] == 0.0));

    // Particles start falling at unit speed.
    let mean_y0: f32 = x0.iter().skip(1).step_by(2).sum::<f32>() / NR_PARTICLES as f32;
    let mean_y1: f32 = pos.iter().skip(1).step_by(3).sum::<f32>() / NR_PARTICLES as f32;
    assert!(mean_y1 < mean_y0, "mean y {} -> {}", mean_y0, mean_y1);

    let j = runtime.read_ndarray::<f32>(&state.j)?;
    assert!(j.iter().all(|&v| v.is_finite() && v > 0.0));
    Ok(())
}

#[test]
#[serial]
fn test_mpm88_dispatch_order() -> anyhow::Result<()> {
    let (runtime, stats) = profiled_cpu_runtime()?;
    let dir = create_temp_dir()?;
    mpm88::module().write(dir.path())?;
    let module = cpu::make_aot_module(
        AotModuleParams::new(dir.path(), &runtime).with_host_symbols(mpm88::host_symbols()),
    )?;
    let state = Mpm88State::allocate(&runtime)?;

    module.get_graph("init")?.run(&state.init_args())?;
    module.get_graph("update")?.run(&state.update_args())?;
    runtime.synchronize()?;

    let update = module.get_graph("update")?;
    let mut expected = vec!["init_particles".to_string()];
    expected.extend(update.nodes().iter().map(|n| n.kernel_name().to_string()));
    assert_eq!(stats.launch_sequence(), expected);
    assert_eq!(stats.launch_count("substep_p2g"), SUBSTEPS as u64);
    assert_eq!(stats.launch_count("fill_pos"), 1);
    Ok(())
}

#[test]
#[serial]
fn test_mpm88_is_deterministic() -> anyhow::Result<()> {
    let runtime = cpu_runtime()?;
    let dir = create_temp_dir()?;
    mpm88::module().write(dir.path())?;
    let module = cpu::make_aot_module(
        AotModuleParams::new(dir.path(), &runtime).with_host_symbols(mpm88::host_symbols()),
    )?;

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let state = Mpm88State::allocate(&runtime)?;
        module.get_graph("init")?.run(&state.init_args())?;
        module.get_graph("update")?.run(&state.update_args())?;
        outputs.push(runtime.read_ndarray::<f32>(&state.pos)?);
    }
    assert_eq!(outputs[0], outputs[1]);
    Ok(())
}

#[test]
#[serial]
fn test_mpm88_update_graph_arguments() -> anyhow::Result<()> {
    let runtime = cpu_runtime()?;
    let dir = create_temp_dir()?;
    mpm88::module().write(dir.path())?;
    let module = cpu::make_aot_module(
        AotModuleParams::new(dir.path(), &runtime).with_host_symbols(mpm88::host_symbols()),
    )?;

    let mut symbols: Vec<String> = module
        .get_graph("update")?
        .arguments()
        .iter()
        .map(|a| a.symbol.clone())
        .collect();
    symbols.sort();
    assert_eq!(symbols, ["C", "J", "grid_m", "grid_v", "pos", "v", "x"]);
    assert_eq!(module.graph_names(), ["init", "update"]);
    Ok(())
}

/// Runs a compiled artifact directory when `AOTFORGE_AOT_FOLDER_PATH` points
/// at one; skipped otherwise.
#[test]
#[serial]
fn test_mpm88_from_env_folder() -> anyhow::Result<()> {
    let Some(folder) = aot_folder_from_env() else {
        eprintln!("AOTFORGE_AOT_FOLDER_PATH not set - skipping");
        return Ok(());
    };
    let metadata = aotforge::aot::ModuleMetadata::read_from_dir(&folder)?;
    if metadata.arch != Arch::Cpu {
        eprintln!("artifact targets {} - skipping CPU run", metadata.arch);
        return Ok(());
    }

    let runtime = cpu_runtime()?;
    let module = make_aot_module(Arch::Cpu, AotModuleParams::new(&folder, &runtime))?;
    let state = Mpm88State::allocate(&runtime)?;
    module.get_graph("init")?.run(&state.init_args())?;
    runtime.synchronize()?;
    module.get_graph("update")?.run(&state.update_args())?;
    runtime.synchronize()?;
    Ok(())
}

#[cfg(feature = "cuda")]
#[test]
#[serial]
fn test_mpm88_cuda_from_env_folder() -> anyhow::Result<()> {
    use aotforge::config::CompileConfig;

    let Some(folder) = aot_folder_from_env() else {
        eprintln!("AOTFORGE_AOT_FOLDER_PATH not set - skipping");
        return Ok(());
    };
    let metadata = aotforge::aot::ModuleMetadata::read_from_dir(&folder)?;
    if metadata.arch != Arch::Cuda {
        return Ok(());
    }
    let runtime = match common::runtime_with(CompileConfig::for_arch(Arch::Cuda), None) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("CUDA unavailable ({}) - skipping", e);
            return Ok(());
        }
    };
    let module = make_aot_module(Arch::Cuda, AotModuleParams::new(&folder, &runtime))?;
    let state = Mpm88State::allocate(&runtime)?;
    module.get_graph("init")?.run(&state.init_args())?;
    runtime.synchronize()?;
    module.get_graph("update")?.run(&state.update_args())?;
    runtime.synchronize()?;
    Ok(())
}
