use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MEMORY_MB: u32 = 128;
pub const DEFAULT_TIMEOUT_SECS: u32 = 15;
pub const DEFAULT_RUNTIME: &str = "nodejs20.x";

/// Session-scoped identity handed out by the deployer at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "fn#{}", self.0) }
}

/// Network placement passed through to the control plane untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpcConfig {
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// A declared compute function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    /// Entry point as `module.export`, e.g. `quote.get` for `quote.js`.
    pub handler: String,
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub memory_size: Option<u32>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub vpc: Option<VpcConfig>,
}

impl FunctionSpec {
    pub fn new(name: impl Into<String>, handler: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
            files,
            description: String::new(),
            runtime: None,
            memory_size: None,
            timeout: None,
            environment: BTreeMap::new(),
            vpc: None,
        }
    }

    pub fn memory_mb(&self) -> u32 { self.memory_size.unwrap_or(DEFAULT_MEMORY_MB) }
    pub fn timeout_secs(&self) -> u32 { self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS) }
    pub fn runtime(&self) -> &str { self.runtime.as_deref().unwrap_or(DEFAULT_RUNTIME) }

    /// Module part of the handler (`quote` in `quote.get`).
    pub fn entry_module(&self) -> Option<&str> {
        let (module, export) = self.handler.rsplit_once('.')?;
        if module.is_empty() || export.is_empty() { return None; }
        Some(module)
    }

    /// The declared file the handler's module resolves to.
    pub fn entry_file(&self) -> Option<&Path> {
        let module = self.entry_module()?;
        self.files
            .iter()
            .map(PathBuf::as_path)
            .find(|f| f.file_stem().and_then(|s| s.to_str()) == Some(module))
    }
}
