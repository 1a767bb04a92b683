use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gantry_core::{path, DeployerConfig, FunctionId, FunctionSpec, Trigger};
use gantry_package::{Artifact, ArtifactPackager, TarGzPackager};
use gantry_plane::{ControlPlane, FunctionConfiguration};
use metrics::{counter, histogram};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::{api_binder, event_binder, function, publisher, DeployError, DeployReport, ResourceTree};

/// A function accepted by [`Deployer::register_function`]. Frozen once returned.
#[derive(Debug, Clone)]
pub struct RegisteredFunction {
    pub id: FunctionId,
    pub spec: FunctionSpec,
    /// `{stage}-{name}`, the remote function name.
    pub qualified_name: String,
    pub artifact: Artifact,
}

/// Clears the in-progress flag on every exit path, including a dropped future.
struct DeployGuard<'a>(&'a AtomicBool);

impl<'a> DeployGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, DeployError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DeployError::AlreadyDeploying)?;
        Ok(Self(flag))
    }
}

impl Drop for DeployGuard<'_> {
    fn drop(&mut self) { self.0.store(false, Ordering::Release); }
}

pub struct Deployer {
    config: DeployerConfig,
    plane: Arc<dyn ControlPlane>,
    packager: Arc<dyn ArtifactPackager>,
    functions: Vec<RegisteredFunction>,
    triggers: Vec<Trigger>,
    next_id: u32,
    deploying: AtomicBool,
}

impl Deployer {
    pub fn new(config: DeployerConfig, plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            config,
            plane,
            packager: Arc::new(TarGzPackager),
            functions: Vec::new(),
            triggers: Vec::new(),
            next_id: 1,
            deploying: AtomicBool::new(false),
        }
    }

    pub fn with_packager(mut self, packager: Arc<dyn ArtifactPackager>) -> Self {
        self.packager = packager;
        self
    }

    pub fn config(&self) -> &DeployerConfig { &self.config }

    pub fn functions(&self) -> &[RegisteredFunction] { &self.functions }

    pub fn triggers(&self) -> &[Trigger] { &self.triggers }

    /// Validate and package `spec`, assigning it the next function id.
    pub fn register_function(&mut self, spec: FunctionSpec) -> Result<RegisteredFunction, DeployError> {
        if let Some(missing) = spec.files.iter().find(|f| !f.is_file()) {
            return Err(DeployError::Registration(format!("file '{}' does not exist", missing.display())));
        }
        if spec.entry_file().is_none() {
            return Err(DeployError::Registration(format!(
                "handler '{}' of '{}' matches none of the declared files",
                spec.handler, spec.name
            )));
        }
        let qualified_name = self.config.qualified_name(&spec.name);
        if self.functions.iter().any(|f| f.qualified_name == qualified_name) {
            return Err(DeployError::Registration(format!("function '{}' is already registered", qualified_name)));
        }

        let artifact = self.packager.package(&spec)?;
        let id = FunctionId(self.next_id);
        self.next_id += 1;
        info!(function = %qualified_name, id = %id, bytes = artifact.bytes.len(), "registered function");
        let registered = RegisteredFunction { id, spec, qualified_name, artifact };
        self.functions.push(registered.clone());
        Ok(registered)
    }

    pub fn register_trigger(&mut self, trigger: impl Into<Trigger>) -> Result<(), DeployError> {
        let mut trigger = trigger.into();
        let id = trigger.function();
        if !self.functions.iter().any(|f| f.id == id) {
            return Err(DeployError::Binding(id));
        }
        if let Trigger::Api(api) = &mut trigger {
            api.path = path::normalize(&api.path);
        }
        self.triggers.push(trigger);
        Ok(())
    }

    /// Converge the plane onto every registered function and trigger.
    ///
    /// Fails fast: the first fatal error aborts the session with no rollback.
    pub async fn deploy(&self) -> Result<DeployReport, DeployError> {
        let t0 = std::time::Instant::now();
        counter!("deploy_attempts", 1u64);
        let result = self.deploy_guarded().await;
        match &result {
            Ok(report) => {
                histogram!("deploy_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("deploy_ok", 1u64);
                info!(
                    took_ms = %t0.elapsed().as_millis(),
                    functions = self.functions.len(),
                    triggers = self.triggers.len(),
                    resources_created = report.resources_created.len(),
                    "deploy complete"
                );
            }
            Err(e) => {
                counter!("deploy_err", 1u64);
                warn!(error = %e, "deploy failed");
            }
        }
        result
    }

    async fn deploy_guarded(&self) -> Result<DeployReport, DeployError> {
        self.config.validate()?;
        let _guard = DeployGuard::acquire(&self.deploying)?;
        self.run_session().await
    }

    async fn run_session(&self) -> Result<DeployReport, DeployError> {
        let plane = self.plane.as_ref();
        let mut report = DeployReport::default();

        let mut tree = if self.triggers.iter().any(Trigger::is_api) {
            let tree = ResourceTree::resolve_container(plane, &self.config.api_name).await?;
            report.container_created = tree.container_created();
            Some(tree)
        } else {
            None
        };

        let mut deployed: FxHashMap<FunctionId, FunctionConfiguration> = FxHashMap::default();
        for registered in &self.functions {
            let remote = function::upsert_function(plane, &self.config, registered, &mut report).await?;
            deployed.insert(registered.id, remote);
        }

        let mut to_publish: Vec<&str> = Vec::new();
        for trigger in &self.triggers {
            let remote = deployed.get(&trigger.function()).ok_or(DeployError::Binding(trigger.function()))?;
            match trigger {
                Trigger::Api(api) => {
                    let Some(tree) = tree.as_mut() else { return Err(DeployError::MissingRoot) };
                    let resource = tree.upsert(plane, &api.path).await?;
                    api_binder::bind(plane, &self.config, tree.api(), remote, api, &resource, &mut report).await?;
                    to_publish.push(remote.function_name.as_str());
                }
                Trigger::Event(event) => {
                    event_binder::bind(plane, &self.config, remote, event, &mut report).await?;
                }
            }
        }

        if let Some(tree) = &tree {
            report.resources_created = tree.created().to_vec();
            for function_name in to_publish {
                publisher::publish(plane, &self.config, tree.api(), function_name, &mut report).await?;
            }
        }
        Ok(report)
    }
}
