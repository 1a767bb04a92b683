//! Gantry apply: the reconciliation engine.
//!
//! [`Deployer`] collects functions and triggers, then converges a [`ControlPlane`]
//! onto them. Every remote object is looked up first and only created when absent, so
//! running `deploy` twice against the same plane is safe. Permissions and schedule
//! rules are the exception: they are deleted and recreated on every run.
//!
//! [`ControlPlane`]: gantry_plane::ControlPlane

#![forbid(unsafe_code)]

mod api_binder;
mod deployer;
mod event_binder;
mod function;
pub mod manifest;
mod publisher;
pub mod tree;

use gantry_core::{ConfigError, FunctionId};
use gantry_package::PackageError;
use gantry_plane::PlaneError;
use serde::{Deserialize, Serialize};

pub use deployer::{Deployer, RegisteredFunction};
pub use manifest::Manifest;
pub use tree::ResourceTree;

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("registration: {0}")]
    Registration(String),
    #[error("registration: {0}")]
    Package(#[from] PackageError),
    #[error("binding: trigger references unregistered function {0}")]
    Binding(FunctionId),
    #[error("a deploy is already running on this deployer")]
    AlreadyDeploying,
    #[error("api container has no root resource '/'")]
    MissingRoot,
    #[error("remote: {0}")]
    Remote(#[from] PlaneError),
}

/// What one `deploy` session changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub container_created: bool,
    /// Paths created this session, parents first.
    pub resources_created: Vec<String>,
    pub methods_created: usize,
    pub method_responses_created: usize,
    pub integrations_created: usize,
    pub integration_responses_created: usize,
    pub permissions_replaced: usize,
    pub permissions_failed: usize,
    pub rules_replaced: usize,
    pub rules_failed: usize,
    pub targets_attached: usize,
    pub snapshots_created: usize,
    pub functions_created: usize,
    pub functions_updated: usize,
    /// `METHOD url` for every bound route, in binding order.
    pub invoke_urls: Vec<String>,
}

impl DeployReport {
    /// True when no looked-up object had to be created.
    pub fn converged(&self) -> bool {
        !self.container_created
            && self.resources_created.is_empty()
            && self.methods_created == 0
            && self.method_responses_created == 0
            && self.integrations_created == 0
            && self.integration_responses_created == 0
            && self.snapshots_created == 0
            && self.functions_created == 0
    }
}
