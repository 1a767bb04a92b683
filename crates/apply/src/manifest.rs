//! YAML deploy manifests.
//!
//! ```yaml
//! config: { api_name: GedditQuoteFetcher, stage: dev }
//! functions:
//!   - name: Geddit-Quotes
//!     handler: quote.get
//!     files: [quote.js]
//!     triggers:
//!       - { kind: api, method: GET, path: "/quote/{quoteId}", content_type: application/json }
//!       - { kind: event, name: nightly, schedule: "rate(1 day)" }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use gantry_core::{ApiTrigger, EventTrigger, FunctionId, FunctionSpec, HttpMethod, PartialConfig, Trigger};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Deployer;

fn max_manifest_bytes() -> usize {
    std::env::var("GANTRY_MAX_MANIFEST_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(1_000_000) // 1 MiB default
}

fn default_content_type() -> String { "application/json".to_string() }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TriggerEntry {
    Api {
        method: HttpMethod,
        path: String,
        #[serde(default = "default_content_type")]
        content_type: String,
    },
    Event {
        name: String,
        schedule: String,
        #[serde(default)]
        description: String,
    },
}

impl TriggerEntry {
    fn bind(&self, function: FunctionId) -> Trigger {
        match self {
            TriggerEntry::Api { method, path, content_type } => {
                ApiTrigger::new(function, *method, path, content_type.clone()).into()
            }
            TriggerEntry::Event { name, schedule, description } => EventTrigger {
                function,
                name: name.clone(),
                description: description.clone(),
                schedule: schedule.clone(),
            }
            .into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionEntry {
    #[serde(flatten)]
    pub spec: FunctionSpec,
    #[serde(default)]
    pub triggers: Vec<TriggerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub config: PartialConfig,
    #[serde(default)]
    pub functions: Vec<FunctionEntry>,
    /// Directory relative file paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let max = max_manifest_bytes();
        let len = std::fs::metadata(path).with_context(|| format!("reading {}", path.display()))?.len() as usize;
        if len > max {
            return Err(anyhow!("manifest {} too large: {} bytes (max {})", path.display(), len, max));
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, &base_dir).with_context(|| format!("loading manifest {}", path.display()))
    }

    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let max = max_manifest_bytes();
        if text.len() > max {
            return Err(anyhow!("manifest too large: {} bytes (max {})", text.len(), max));
        }
        let mut manifest: Manifest = serde_yaml::from_str(text).context("parsing manifest yaml")?;
        manifest.base_dir = base_dir.to_path_buf();
        debug!(functions = manifest.functions.len(), base = %base_dir.display(), "parsed manifest");
        Ok(manifest)
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() { file.to_path_buf() } else { self.base_dir.join(file) }
    }

    /// Register every function, each followed by its triggers, in declaration order.
    pub fn register_into(&self, deployer: &mut Deployer) -> Result<Vec<FunctionId>> {
        let mut ids = Vec::with_capacity(self.functions.len());
        for entry in &self.functions {
            let mut spec = entry.spec.clone();
            spec.files = spec.files.iter().map(|f| self.resolve(f)).collect();
            let name = spec.name.clone();
            let id = deployer.register_function(spec).with_context(|| format!("function '{}'", name))?.id;
            for trigger in &entry.triggers {
                deployer.register_trigger(trigger.bind(id)).with_context(|| format!("trigger of '{}'", name))?;
            }
            ids.push(id);
        }
        Ok(ids)
    }
}
