use std::path::PathBuf;

use aotforge::aot::{make_aot_module, AotModuleParams, ModuleMetadata};
use aotforge::config::{aot_folder_from_env, CompileConfig, AOT_FOLDER_ENV};
use aotforge::logging::{init_with_config, LoggingConfig};
use aotforge::memory::MemoryPool;
use aotforge::program::Program;
use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "inspect-aot", version)]
#[command(about = "Inspect an aotforge artifact directory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print kernels and graphs described by metadata.json
    Show {
        /// Artifact directory (defaults to $AOTFORGE_AOT_FOLDER_PATH)
        path: Option<PathBuf>,
        /// Also list each graph's dispatch nodes
        #[arg(long)]
        nodes: bool,
    },
    /// Load the module on its backend and report the result
    Load {
        /// Artifact directory (defaults to $AOTFORGE_AOT_FOLDER_PATH)
        path: Option<PathBuf>,
    },
}

fn resolve_path(path: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    path.or_else(aot_folder_from_env)
        .with_context(|| format!("no artifact directory given and {} is not set", AOT_FOLDER_ENV))
}

fn show(path: PathBuf, nodes: bool) -> anyhow::Result<()> {
    let metadata = ModuleMetadata::read_from_dir(&path)?;
    metadata.validate(&path)?;

    println!("Module: {}", path.display());
    println!("Backend: {}", metadata.arch);
    println!("Metadata version: {}", metadata.version);

    println!("\n=== Kernels ({}) ===", metadata.kernels.len());
    for kernel in &metadata.kernels {
        let params: Vec<String> = kernel
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.signature))
            .collect();
        println!("{}({}) [{} tasks]", kernel.name, params.join(", "), kernel.tasks.len());
        for task in &kernel.tasks {
            match &task.file {
                Some(file) => println!("    {} in {}", task.symbol, file),
                None => println!("    {} (host symbol)", task.symbol),
            }
        }
    }

    println!("\n=== Graphs ({}) ===", metadata.graphs.len());
    for graph in &metadata.graphs {
        println!("{} [{} dispatches]", graph.name, graph.dispatches.len());
        if nodes {
            for (i, dispatch) in graph.dispatches.iter().enumerate() {
                let args: Vec<String> = dispatch
                    .args
                    .iter()
                    .map(|b| format!("{}={}", b.param, b.symbol))
                    .collect();
                println!("    {}. {}({})", i + 1, dispatch.kernel, args.join(", "));
            }
        }
    }
    Ok(())
}

fn load(path: PathBuf) -> anyhow::Result<()> {
    let metadata = ModuleMetadata::read_from_dir(&path)?;
    let config = CompileConfig::from_env()?.with_arch(metadata.arch);

    let program = Program::new(config.clone());
    let pool = MemoryPool::new(config.arch, &program.compute_device())?;
    let runtime = program
        .materialize_runtime(pool, None)
        .context("failed to bring up the backend")?;

    let module = make_aot_module(config.arch, AotModuleParams::new(&path, &runtime))?;
    println!("Loaded {} on {}", path.display(), runtime.device_name());
    println!("Kernels: {}", module.kernel_names().join(", "));
    println!("Graphs: {}", module.graph_names().join(", "));
    for name in module.graph_names() {
        let graph = module.get_graph(name)?;
        let args: Vec<String> = graph
            .arguments()
            .iter()
            .map(|a| format!("{}: {}", a.symbol, a.signature))
            .collect();
        println!("  {}({})", name, args.join(", "));
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_with_config(&LoggingConfig::from_env())?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Show { path, nodes } => show(resolve_path(path)?, nodes),
        Commands::Load { path } => load(resolve_path(path)?),
    }
}
