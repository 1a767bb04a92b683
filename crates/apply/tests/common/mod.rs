#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use gantry_apply::Deployer;
use gantry_core::{ClientConfig, Credentials, DeployerConfig, FunctionSpec, PartialConfig};
use gantry_plane::{MemoryPlane, Op};

pub const REGION: &str = "ap-southeast-2";
pub const ACCOUNT: &str = "123456789012";

pub fn config() -> DeployerConfig {
    PartialConfig {
        api_name: Some("GedditQuoteFetcher".into()),
        stage: Some("dev".into()),
        region: Some(REGION.into()),
        account_id: Some(ACCOUNT.into()),
        access_key_id: Some("AKIDEXAMPLE".into()),
        secret_access_key: Some("secret".into()),
        role: Some(format!("arn:aws:iam::{}:role/lambda", ACCOUNT)),
    }
    .into_config()
}

pub fn plane() -> Arc<MemoryPlane> {
    Arc::new(MemoryPlane::new(ClientConfig {
        region: REGION.into(),
        account_id: ACCOUNT.into(),
        credentials: Credentials::default(),
    }))
}

/// Scratch directory holding `quote.js`.
pub struct Sources {
    pub dir: tempfile::TempDir,
}

impl Sources {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quote.js"), "exports.get = async () => ({ quote: 'hi' });\n").unwrap();
        Self { dir }
    }

    pub fn file(&self, name: &str) -> PathBuf { self.dir.path().join(name) }

    pub fn quotes(&self) -> FunctionSpec {
        FunctionSpec::new("Geddit-Quotes", "quote.get", vec![self.file("quote.js")])
    }
}

pub fn deployer(config: DeployerConfig, plane: &Arc<MemoryPlane>) -> Deployer {
    Deployer::new(config, plane.clone())
}

/// Index of the first recorded call of `op`.
pub fn first(plane: &MemoryPlane, op: Op) -> usize {
    plane.calls().iter().position(|c| c.op == op).unwrap_or_else(|| panic!("no {:?} call", op))
}
