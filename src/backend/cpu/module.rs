//! Resolution of CPU task entry points

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::backend::cpu::launch::KernelEntry;
use crate::error::{AotForgeError, ForgeResult, ModuleLoadErrorKind};

/// A compiled CPU kernel library (`.so`, `.dylib`, `.dll`)
pub struct CpuLibrary {
    path: PathBuf,
    lib: Library,
}

impl fmt::Debug for CpuLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuLibrary").field("path", &self.path).finish()
    }
}

impl CpuLibrary {
    /// Load a kernel library. Failures are reported against `module_path`.
    pub fn open(module_path: &Path, file: &Path) -> ForgeResult<Self> {
        // SAFETY: loading runs the library's initializers; artifact
        // directories are trusted compiler output.
        let lib = unsafe { Library::new(file) }.map_err(|e| {
            AotForgeError::module_load(
                module_path,
                ModuleLoadErrorKind::InvalidPayload(format!(
                    "cannot load '{}': {}",
                    file.display(),
                    e
                )),
            )
        })?;
        tracing::debug!("CpuLibrary::open: loaded {}", file.display());
        Ok(CpuLibrary {
            path: file.to_path_buf(),
            lib,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a task entry point. The returned pointer is valid for as long
    /// as this library is alive.
    pub fn entry(&self, module_path: &Path, symbol: &str) -> ForgeResult<KernelEntry> {
        // SAFETY: task symbols follow the `KernelEntry` ABI by contract.
        let sym = unsafe { self.lib.get::<KernelEntry>(symbol.as_bytes()) }.map_err(|e| {
            AotForgeError::module_load(
                module_path,
                ModuleLoadErrorKind::InvalidPayload(format!(
                    "symbol '{}' not found in '{}': {}",
                    symbol,
                    self.path.display(),
                    e
                )),
            )
        })?;
        Ok(*sym)
    }
}

/// Entry points linked into the host process, for tasks whose metadata
/// names no library file.
#[derive(Debug, Clone, Default)]
pub struct HostSymbolTable {
    entries: HashMap<String, KernelEntry>,
}

impl HostSymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, symbol: impl Into<String>, entry: KernelEntry) -> &mut Self {
        self.entries.insert(symbol.into(), entry);
        self
    }

    pub fn with(mut self, symbol: impl Into<String>, entry: KernelEntry) -> Self {
        self.register(symbol, entry);
        self
    }

    pub fn get(&self, symbol: &str) -> Option<KernelEntry> {
        self.entries.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::launch::LaunchContext;

    unsafe extern "C-unwind" fn noop(_ctx: *const LaunchContext) {}

    #[test]
    fn test_symbol_table() {
        let table = HostSymbolTable::new().with("noop_c0", noop);
        assert!(table.contains("noop_c0"));
        assert!(table.get("noop_c0").is_some());
        assert!(table.get("missing").is_none());
        assert_eq!(table.len(), 1);
        assert!(!table.is_empty());
    }

    #[test]
    fn test_missing_library_is_invalid_payload() {
        let err = CpuLibrary::open(Path::new("/tmp/module"), Path::new("/nonexistent/kernels.so"))
            .unwrap_err();
        assert!(matches!(
            err.module_load_kind(),
            Some(ModuleLoadErrorKind::InvalidPayload(_))
        ));
    }
}
