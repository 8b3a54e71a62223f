//! Session configuration
//!
//! [`CompileConfig`] is set once per session and read by the program, the
//! memory pool and the module loaders. It can be built programmatically or
//! from `AOTFORGE_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AotForgeError, ForgeResult};

/// Environment variable for the target backend (`cpu`, `cuda`, `amdgpu`)
pub const ARCH_ENV: &str = "AOTFORGE_ARCH";

/// Environment variable enabling the kernel profiler (`1`/`true`)
pub const KERNEL_PROFILER_ENV: &str = "AOTFORGE_KERNEL_PROFILER";

/// Environment variable selecting the device ordinal for GPU backends
pub const DEVICE_ENV: &str = "AOTFORGE_DEVICE";

/// Environment variable capping CPU kernel threads
pub const CPU_THREADS_ENV: &str = "AOTFORGE_CPU_THREADS";

/// Environment variable commonly used to point at an artifact directory
pub const AOT_FOLDER_ENV: &str = "AOTFORGE_AOT_FOLDER_PATH";

/// Target hardware backend
///
/// The serialized name doubles as the backend tag in artifact metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// Host CPU
    #[serde(alias = "x64", alias = "arm64", alias = "host")]
    Cpu,
    /// NVIDIA GPU through the CUDA driver
    Cuda,
    /// AMD GPU through the HIP runtime
    #[serde(alias = "hip", alias = "rocm")]
    Amdgpu,
}

impl Arch {
    /// Canonical backend tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Cpu => "cpu",
            Arch::Cuda => "cuda",
            Arch::Amdgpu => "amdgpu",
        }
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self, Arch::Cpu)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = AotForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cpu" | "x64" | "arm64" | "host" => Ok(Arch::Cpu),
            "cuda" => Ok(Arch::Cuda),
            "amdgpu" | "hip" | "rocm" => Ok(Arch::Amdgpu),
            other => Err(AotForgeError::InvalidConfiguration(format!(
                "unknown arch '{}'",
                other
            ))),
        }
    }
}

/// Immutable per-session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileConfig {
    /// Backend the session runs on
    pub arch: Arch,

    /// Create a launch-statistics profiler when none is supplied
    pub kernel_profiler: bool,

    /// Device ordinal for GPU backends
    pub device_ordinal: usize,

    /// Worker threads for CPU kernels (`None` = one per core)
    pub cpu_max_num_threads: Option<usize>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            arch: Arch::Cpu,
            kernel_profiler: false,
            device_ordinal: 0,
            cpu_max_num_threads: None,
        }
    }
}

impl CompileConfig {
    /// Create a new config with default values (CPU, no profiler)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config targeting `arch`
    pub fn for_arch(arch: Arch) -> Self {
        Self::default().with_arch(arch)
    }

    /// Set target backend
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// Enable or disable the default kernel profiler
    pub fn with_kernel_profiler(mut self, enabled: bool) -> Self {
        self.kernel_profiler = enabled;
        self
    }

    /// Set GPU device ordinal
    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }

    /// Cap CPU kernel threads
    pub fn with_cpu_max_num_threads(mut self, threads: usize) -> Self {
        self.cpu_max_num_threads = Some(threads);
        self
    }

    /// Build a config from `AOTFORGE_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> ForgeResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> ForgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CompileConfig::default();

        if let Some(arch) = lookup(ARCH_ENV) {
            config.arch = arch.parse()?;
        }

        if let Some(flag) = lookup(KERNEL_PROFILER_ENV) {
            config.kernel_profiler = parse_flag(KERNEL_PROFILER_ENV, &flag)?;
        }

        if let Some(ordinal) = lookup(DEVICE_ENV) {
            config.device_ordinal = ordinal.trim().parse().map_err(|_| {
                AotForgeError::InvalidConfiguration(format!(
                    "{} must be a device ordinal, got '{}'",
                    DEVICE_ENV, ordinal
                ))
            })?;
        }

        if let Some(threads) = lookup(CPU_THREADS_ENV) {
            let threads: usize = threads.trim().parse().map_err(|_| {
                AotForgeError::InvalidConfiguration(format!(
                    "{} must be a thread count, got '{}'",
                    CPU_THREADS_ENV, threads
                ))
            })?;
            if threads == 0 {
                return Err(AotForgeError::InvalidConfiguration(format!(
                    "{} must be > 0",
                    CPU_THREADS_ENV
                )));
            }
            config.cpu_max_num_threads = Some(threads);
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> ForgeResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(AotForgeError::InvalidConfiguration(format!(
            "{} must be a boolean flag, got '{}'",
            key, other
        ))),
    }
}

/// Artifact directory named by `AOTFORGE_AOT_FOLDER_PATH`, if set
pub fn aot_folder_from_env() -> Option<PathBuf> {
    std::env::var_os(AOT_FOLDER_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}
