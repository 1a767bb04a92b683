//! In-process control plane.
//!
//! Models every object kind the reconciler touches with the same existence rules a
//! hosted control plane applies (parents must exist, duplicate creates conflict, rules
//! with targets cannot be deleted). Every call is appended to an ordered log before it
//! runs. State can be exported and restored between runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use base64::Engine as _;
use gantry_core::{arn, ClientConfig};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::{
    ControlPlane, CreateFunction, Deployment, FunctionConfiguration, FunctionSettings, Integration,
    IntegrationResponse, Method, MethodKey, MethodResponse, Permission, PlaneError, PlaneResult, Resource,
    RestApi, Rule, RuleTarget, UpdateFunctionCode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    ListRestApis,
    CreateRestApi,
    ListResources,
    CreateResource,
    GetMethod,
    PutMethod,
    GetMethodResponse,
    PutMethodResponse,
    GetIntegration,
    PutIntegration,
    GetIntegrationResponse,
    PutIntegrationResponse,
    ListDeployments,
    CreateDeployment,
    GetFunction,
    CreateFunction,
    UpdateFunctionCode,
    UpdateFunctionConfiguration,
    AddPermission,
    RemovePermission,
    PutRule,
    DeleteRule,
    ListTargets,
    RemoveTargets,
    PutTargets,
}

/// One recorded control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Binding {
    method: Method,
    responses: BTreeMap<String, MethodResponse>,
    integration: Option<Integration>,
    integration_responses: BTreeMap<String, IntegrationResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredFunction {
    config: FunctionConfiguration,
    policy: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRule {
    rule: Rule,
    targets: Vec<RuleTarget>,
}

/// Full exported state of a [`MemoryPlane`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaneState {
    rest_apis: Vec<RestApi>,
    resources: BTreeMap<String, Vec<Resource>>,
    bindings: BTreeMap<String, Binding>,
    deployments: BTreeMap<String, Vec<Deployment>>,
    functions: BTreeMap<String, StoredFunction>,
    rules: BTreeMap<String, StoredRule>,
}

impl PlaneState {
    pub fn rest_apis(&self) -> &[RestApi] { &self.rest_apis }

    pub fn resources(&self, rest_api_id: &str) -> &[Resource] {
        self.resources.get(rest_api_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn deployments(&self, rest_api_id: &str) -> &[Deployment] {
        self.deployments.get(rest_api_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn method(&self, key: &MethodKey) -> Option<&Method> {
        self.bindings.get(&key.to_string()).map(|b| &b.method)
    }

    pub fn integration(&self, key: &MethodKey) -> Option<&Integration> {
        self.bindings.get(&key.to_string()).and_then(|b| b.integration.as_ref())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionConfiguration> {
        self.functions.get(name).map(|f| &f.config)
    }

    pub fn permissions(&self, function_name: &str) -> &[Permission] {
        self.functions.get(function_name).map(|f| f.policy.as_slice()).unwrap_or_default()
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name).map(|r| &r.rule)
    }

    pub fn targets(&self, rule: &str) -> &[RuleTarget] {
        self.rules.get(rule).map(|r| r.targets.as_slice()).unwrap_or_default()
    }

    fn resource_exists(&self, key: &MethodKey) -> PlaneResult<()> {
        let nodes = self
            .resources
            .get(&key.rest_api_id)
            .ok_or_else(|| PlaneError::not_found("rest api", &key.rest_api_id))?;
        if nodes.iter().any(|r| r.id == key.resource_id) {
            Ok(())
        } else {
            Err(PlaneError::not_found("resource", &key.resource_id))
        }
    }

    fn binding(&self, key: &MethodKey) -> PlaneResult<&Binding> {
        self.resource_exists(key)?;
        self.bindings.get(&key.to_string()).ok_or_else(|| PlaneError::not_found("method", key.to_string()))
    }

    fn binding_mut(&mut self, key: &MethodKey) -> PlaneResult<&mut Binding> {
        self.resource_exists(key)?;
        self.bindings.get_mut(&key.to_string()).ok_or_else(|| PlaneError::not_found("method", key.to_string()))
    }

    fn stored_function(&mut self, name: &str) -> PlaneResult<&mut StoredFunction> {
        self.functions.get_mut(name).ok_or_else(|| PlaneError::not_found("function", name))
    }

    fn stored_rule(&mut self, name: &str) -> PlaneResult<&mut StoredRule> {
        self.rules.get_mut(name).ok_or_else(|| PlaneError::not_found("rule", name))
    }
}

struct Inner {
    state: PlaneState,
    calls: Vec<Call>,
    failures: FxHashMap<Op, PlaneError>,
    holds: FxHashMap<Op, oneshot::Receiver<()>>,
}

pub struct MemoryPlane {
    client: ClientConfig,
    inner: Mutex<Inner>,
}

fn new_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(10);
    id
}

fn now_ts() -> i64 { chrono::Utc::now().timestamp() }

fn code_digest(code: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Sha256::digest(code))
}

fn next_version(current: &str, publish: bool) -> String {
    if !publish { return "$LATEST".to_string(); }
    let n = current.parse::<u64>().unwrap_or(0);
    (n + 1).to_string()
}

impl MemoryPlane {
    pub fn new(client: ClientConfig) -> Self {
        Self::with_state(client, PlaneState::default())
    }

    pub fn with_state(client: ClientConfig, state: PlaneState) -> Self {
        Self {
            client,
            inner: Mutex::new(Inner { state, calls: Vec::new(), failures: FxHashMap::default(), holds: FxHashMap::default() }),
        }
    }

    fn lock(&self) -> PlaneResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| PlaneError::Unavailable("memory plane lock poisoned".into()))
    }

    /// Snapshot of the current state.
    pub fn export(&self) -> PlaneResult<PlaneState> {
        Ok(self.lock()?.state.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().map(|i| i.calls.clone()).unwrap_or_default()
    }

    pub fn count(&self, op: Op) -> usize {
        self.lock().map(|i| i.calls.iter().filter(|c| c.op == op).count()).unwrap_or(0)
    }

    /// Targets of every recorded call of `op`, in call order.
    pub fn targets_of(&self, op: Op) -> Vec<String> {
        self.lock()
            .map(|i| i.calls.iter().filter(|c| c.op == op).map(|c| c.target.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut inner) = self.lock() { inner.calls.clear(); }
    }

    /// Make every subsequent call of `op` fail with `err` until cleared.
    pub fn fail(&self, op: Op, err: PlaneError) {
        if let Ok(mut inner) = self.lock() { inner.failures.insert(op, err); }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut inner) = self.lock() { inner.failures.clear(); }
    }

    /// Pause the next call of `op` (after it is recorded) until the returned sender fires or drops.
    pub fn hold(&self, op: Op) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut inner) = self.lock() { inner.holds.insert(op, rx); }
        tx
    }

    async fn enter(&self, op: Op, target: impl Into<String>) -> PlaneResult<()> {
        let target = target.into();
        debug!(op = ?op, target = %target, "memory plane call");
        let hold = {
            let mut inner = self.lock()?;
            inner.calls.push(Call { op, target });
            inner.holds.remove(&op)
        };
        if let Some(rx) = hold {
            let _ = rx.await;
        }
        match self.lock()?.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ControlPlane for MemoryPlane {
    async fn list_rest_apis(&self) -> PlaneResult<Vec<RestApi>> {
        self.enter(Op::ListRestApis, "*").await?;
        Ok(self.lock()?.state.rest_apis.clone())
    }

    async fn create_rest_api(&self, name: &str) -> PlaneResult<RestApi> {
        self.enter(Op::CreateRestApi, name).await?;
        let mut inner = self.lock()?;
        let api = RestApi { id: new_id(), name: name.to_string(), created_at: now_ts() };
        let root = Resource { id: new_id(), parent_id: None, path: "/".to_string(), path_part: None };
        inner.state.resources.insert(api.id.clone(), vec![root]);
        inner.state.rest_apis.push(api.clone());
        Ok(api)
    }

    async fn list_resources(&self, rest_api_id: &str) -> PlaneResult<Vec<Resource>> {
        self.enter(Op::ListResources, rest_api_id).await?;
        let inner = self.lock()?;
        inner.state.resources.get(rest_api_id).cloned().ok_or_else(|| PlaneError::not_found("rest api", rest_api_id))
    }

    async fn create_resource(&self, rest_api_id: &str, parent_id: &str, path_part: &str) -> PlaneResult<Resource> {
        self.enter(Op::CreateResource, format!("{}/{}", parent_id, path_part)).await?;
        let mut inner = self.lock()?;
        let nodes = inner
            .state
            .resources
            .get_mut(rest_api_id)
            .ok_or_else(|| PlaneError::not_found("rest api", rest_api_id))?;
        let parent_path = nodes
            .iter()
            .find(|r| r.id == parent_id)
            .map(|r| r.path.clone())
            .ok_or_else(|| PlaneError::not_found("resource", parent_id))?;
        let path = if parent_path == "/" { format!("/{}", path_part) } else { format!("{}/{}", parent_path, path_part) };
        if nodes.iter().any(|r| r.path == path) {
            return Err(PlaneError::Conflict(format!("resource '{}' already exists", path)));
        }
        let resource = Resource { id: new_id(), parent_id: Some(parent_id.to_string()), path, path_part: Some(path_part.to_string()) };
        nodes.push(resource.clone());
        Ok(resource)
    }

    async fn get_method(&self, key: &MethodKey) -> PlaneResult<Option<Method>> {
        self.enter(Op::GetMethod, key.to_string()).await?;
        let inner = self.lock()?;
        inner.state.resource_exists(key)?;
        Ok(inner.state.bindings.get(&key.to_string()).map(|b| b.method.clone()))
    }

    async fn put_method(&self, key: &MethodKey, method: Method) -> PlaneResult<Method> {
        self.enter(Op::PutMethod, key.to_string()).await?;
        let mut inner = self.lock()?;
        inner.state.resource_exists(key)?;
        let k = key.to_string();
        if inner.state.bindings.contains_key(&k) {
            return Err(PlaneError::Conflict(format!("method '{}' already exists", k)));
        }
        inner.state.bindings.insert(
            k,
            Binding { method: method.clone(), responses: BTreeMap::new(), integration: None, integration_responses: BTreeMap::new() },
        );
        Ok(method)
    }

    async fn get_method_response(&self, key: &MethodKey, status_code: &str) -> PlaneResult<Option<MethodResponse>> {
        self.enter(Op::GetMethodResponse, format!("{}/{}", key, status_code)).await?;
        let inner = self.lock()?;
        Ok(inner.state.binding(key)?.responses.get(status_code).cloned())
    }

    async fn put_method_response(&self, key: &MethodKey, response: MethodResponse) -> PlaneResult<MethodResponse> {
        self.enter(Op::PutMethodResponse, format!("{}/{}", key, response.status_code)).await?;
        let mut inner = self.lock()?;
        inner.state.binding_mut(key)?.responses.insert(response.status_code.clone(), response.clone());
        Ok(response)
    }

    async fn get_integration(&self, key: &MethodKey) -> PlaneResult<Option<Integration>> {
        self.enter(Op::GetIntegration, key.to_string()).await?;
        let inner = self.lock()?;
        Ok(inner.state.binding(key)?.integration.clone())
    }

    async fn put_integration(&self, key: &MethodKey, integration: Integration) -> PlaneResult<Integration> {
        self.enter(Op::PutIntegration, key.to_string()).await?;
        let mut inner = self.lock()?;
        inner.state.binding_mut(key)?.integration = Some(integration.clone());
        Ok(integration)
    }

    async fn get_integration_response(&self, key: &MethodKey, status_code: &str) -> PlaneResult<Option<IntegrationResponse>> {
        self.enter(Op::GetIntegrationResponse, format!("{}/{}", key, status_code)).await?;
        let inner = self.lock()?;
        let binding = inner.state.binding(key)?;
        if binding.integration.is_none() {
            return Err(PlaneError::not_found("integration", key.to_string()));
        }
        Ok(binding.integration_responses.get(status_code).cloned())
    }

    async fn put_integration_response(&self, key: &MethodKey, response: IntegrationResponse) -> PlaneResult<IntegrationResponse> {
        self.enter(Op::PutIntegrationResponse, format!("{}/{}", key, response.status_code)).await?;
        let mut inner = self.lock()?;
        let binding = inner.state.binding_mut(key)?;
        if binding.integration.is_none() {
            return Err(PlaneError::not_found("integration", key.to_string()));
        }
        binding.integration_responses.insert(response.status_code.clone(), response.clone());
        Ok(response)
    }

    async fn list_deployments(&self, rest_api_id: &str) -> PlaneResult<Vec<Deployment>> {
        self.enter(Op::ListDeployments, rest_api_id).await?;
        let inner = self.lock()?;
        if !inner.state.resources.contains_key(rest_api_id) {
            return Err(PlaneError::not_found("rest api", rest_api_id));
        }
        Ok(inner.state.deployments.get(rest_api_id).cloned().unwrap_or_default())
    }

    async fn create_deployment(&self, rest_api_id: &str, stage_name: &str, description: &str) -> PlaneResult<Deployment> {
        self.enter(Op::CreateDeployment, format!("{}/{}", rest_api_id, description)).await?;
        let mut inner = self.lock()?;
        if !inner.state.resources.contains_key(rest_api_id) {
            return Err(PlaneError::not_found("rest api", rest_api_id));
        }
        let deployment = Deployment {
            id: new_id(),
            description: description.to_string(),
            stage_name: stage_name.to_string(),
            created_at: now_ts(),
        };
        inner.state.deployments.entry(rest_api_id.to_string()).or_default().push(deployment.clone());
        Ok(deployment)
    }

    async fn get_function(&self, function_name: &str) -> PlaneResult<Option<FunctionConfiguration>> {
        self.enter(Op::GetFunction, function_name).await?;
        Ok(self.lock()?.state.functions.get(function_name).map(|f| f.config.clone()))
    }

    async fn create_function(&self, request: CreateFunction) -> PlaneResult<FunctionConfiguration> {
        let name = request.settings.function_name.clone();
        self.enter(Op::CreateFunction, name.as_str()).await?;
        let mut inner = self.lock()?;
        if inner.state.functions.contains_key(&name) {
            return Err(PlaneError::Conflict(format!("function '{}' already exists", name)));
        }
        let config = FunctionConfiguration {
            function_arn: arn::function_arn(&self.client.region, &self.client.account_id, &name),
            function_name: name.clone(),
            settings: request.settings,
            code_sha256: code_digest(&request.code),
            code_size: request.code.len() as u64,
            version: next_version("0", request.publish),
            last_modified: chrono::Utc::now().to_rfc3339(),
        };
        inner.state.functions.insert(name, StoredFunction { config: config.clone(), policy: Vec::new() });
        Ok(config)
    }

    async fn update_function_code(&self, request: UpdateFunctionCode) -> PlaneResult<FunctionConfiguration> {
        self.enter(Op::UpdateFunctionCode, request.function_name.as_str()).await?;
        let mut inner = self.lock()?;
        let stored = inner.state.stored_function(&request.function_name)?;
        let config = &mut stored.config;
        config.code_sha256 = code_digest(&request.code);
        config.code_size = request.code.len() as u64;
        config.version = next_version(&config.version, request.publish);
        config.last_modified = chrono::Utc::now().to_rfc3339();
        Ok(config.clone())
    }

    async fn update_function_configuration(&self, settings: FunctionSettings) -> PlaneResult<FunctionConfiguration> {
        self.enter(Op::UpdateFunctionConfiguration, settings.function_name.as_str()).await?;
        let mut inner = self.lock()?;
        let stored = inner.state.stored_function(&settings.function_name)?;
        stored.config.settings = settings;
        stored.config.last_modified = chrono::Utc::now().to_rfc3339();
        Ok(stored.config.clone())
    }

    async fn add_permission(&self, permission: Permission) -> PlaneResult<()> {
        self.enter(Op::AddPermission, permission.statement_id.as_str()).await?;
        let mut inner = self.lock()?;
        let stored = inner.state.stored_function(&permission.function_name)?;
        if stored.policy.iter().any(|p| p.statement_id == permission.statement_id) {
            return Err(PlaneError::Conflict(format!("statement '{}' already exists", permission.statement_id)));
        }
        stored.policy.push(permission);
        Ok(())
    }

    async fn remove_permission(&self, function_name: &str, statement_id: &str) -> PlaneResult<()> {
        self.enter(Op::RemovePermission, statement_id).await?;
        let mut inner = self.lock()?;
        let stored = inner.state.stored_function(function_name)?;
        let idx = stored
            .policy
            .iter()
            .position(|p| p.statement_id == statement_id)
            .ok_or_else(|| PlaneError::not_found("permission", statement_id))?;
        stored.policy.remove(idx);
        Ok(())
    }

    async fn put_rule(&self, rule: Rule) -> PlaneResult<String> {
        self.enter(Op::PutRule, rule.name.as_str()).await?;
        let mut inner = self.lock()?;
        let rule_arn = arn::rule_arn(&self.client.region, &self.client.account_id, &rule.name);
        match inner.state.rules.get_mut(&rule.name) {
            Some(stored) => stored.rule = rule,
            None => {
                inner.state.rules.insert(rule.name.clone(), StoredRule { rule, targets: Vec::new() });
            }
        }
        Ok(rule_arn)
    }

    async fn delete_rule(&self, name: &str) -> PlaneResult<()> {
        self.enter(Op::DeleteRule, name).await?;
        let mut inner = self.lock()?;
        if !inner.state.stored_rule(name)?.targets.is_empty() {
            return Err(PlaneError::Conflict(format!("rule '{}' still has targets", name)));
        }
        inner.state.rules.remove(name);
        Ok(())
    }

    async fn list_targets_by_rule(&self, rule: &str) -> PlaneResult<Vec<RuleTarget>> {
        self.enter(Op::ListTargets, rule).await?;
        let mut inner = self.lock()?;
        Ok(inner.state.stored_rule(rule)?.targets.clone())
    }

    async fn remove_targets(&self, rule: &str, ids: &[String]) -> PlaneResult<()> {
        self.enter(Op::RemoveTargets, rule).await?;
        let mut inner = self.lock()?;
        inner.state.stored_rule(rule)?.targets.retain(|t| !ids.contains(&t.id));
        Ok(())
    }

    async fn put_targets(&self, rule: &str, targets: Vec<RuleTarget>) -> PlaneResult<()> {
        self.enter(Op::PutTargets, rule).await?;
        let mut inner = self.lock()?;
        let stored = inner.state.stored_rule(rule)?;
        for target in targets {
            match stored.targets.iter_mut().find(|t| t.id == target.id) {
                Some(existing) => *existing = target,
                None => stored.targets.push(target),
            }
        }
        Ok(())
    }
}
