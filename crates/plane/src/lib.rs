//! Gantry control plane: the capability surface the reconciler drives.
//!
//! The trait is provider-agnostic. Every lookup returns `PlaneResult<Option<T>>`:
//! `Ok(None)` means the object is absent, `Err` means the call itself failed.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use gantry_core::{HttpMethod, VpcConfig};
use serde::{Deserialize, Serialize};

pub mod memory;

pub use memory::{Call, MemoryPlane, Op, PlaneState};

/// Control-plane failures. Absence is not an error on lookups; see [`ControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaneError {
    #[error("not_found: {kind} '{key}'")]
    NotFound { kind: &'static str, key: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl PlaneError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        PlaneError::NotFound { kind, key: key.into() }
    }

    pub fn is_not_found(&self) -> bool { matches!(self, PlaneError::NotFound { .. }) }
}

pub type PlaneResult<T> = Result<T, PlaneError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApi {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

/// One materialized path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub parent_id: Option<String>,
    pub path: String,
    pub path_part: Option<String>,
}

/// Addresses a method: (container, resource, verb).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub rest_api_id: String,
    pub resource_id: String,
    pub http_method: HttpMethod,
}

impl MethodKey {
    pub fn new(rest_api_id: &str, resource_id: &str, http_method: HttpMethod) -> Self {
        Self { rest_api_id: rest_api_id.to_string(), resource_id: resource_id.to_string(), http_method }
    }
}

impl std::fmt::Display for MethodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.rest_api_id, self.resource_id, self.http_method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub authorization_type: String,
    pub request_parameters: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodResponse {
    pub status_code: String,
    pub response_models: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub integration_type: String,
    /// Verb used toward the backend, independent of the public method.
    pub integration_http_method: HttpMethod,
    pub uri: String,
    pub content_handling: String,
    pub request_templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationResponse {
    pub status_code: String,
    pub response_templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub description: String,
    pub stage_name: String,
    pub created_at: i64,
}

/// Function settings that can be applied without touching code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSettings {
    pub function_name: String,
    pub runtime: String,
    pub role: String,
    pub handler: String,
    pub description: String,
    pub memory_size: u32,
    pub timeout: u32,
    pub environment: BTreeMap<String, String>,
    pub vpc: Option<VpcConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFunction {
    pub settings: FunctionSettings,
    pub code: Vec<u8>,
    pub publish: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFunctionCode {
    pub function_name: String,
    pub code: Vec<u8>,
    pub publish: bool,
}

/// Remote view of a function after create/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    pub function_name: String,
    pub function_arn: String,
    pub settings: FunctionSettings,
    pub code_sha256: String,
    pub code_size: u64,
    pub version: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub statement_id: String,
    pub function_name: String,
    pub action: String,
    pub principal: String,
    pub source_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub schedule_expression: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    pub id: String,
    pub arn: String,
}

/// Provider-agnostic control-plane surface.
///
/// `get_*` lookups return `Ok(None)` when the addressed object is absent and `Err` for
/// anything else, including a missing *parent* object.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    // API containers and the resource tree
    async fn list_rest_apis(&self) -> PlaneResult<Vec<RestApi>>;
    async fn create_rest_api(&self, name: &str) -> PlaneResult<RestApi>;
    async fn list_resources(&self, rest_api_id: &str) -> PlaneResult<Vec<Resource>>;
    async fn create_resource(&self, rest_api_id: &str, parent_id: &str, path_part: &str) -> PlaneResult<Resource>;

    // Method / integration bindings
    async fn get_method(&self, key: &MethodKey) -> PlaneResult<Option<Method>>;
    async fn put_method(&self, key: &MethodKey, method: Method) -> PlaneResult<Method>;
    async fn get_method_response(&self, key: &MethodKey, status_code: &str) -> PlaneResult<Option<MethodResponse>>;
    async fn put_method_response(&self, key: &MethodKey, response: MethodResponse) -> PlaneResult<MethodResponse>;
    async fn get_integration(&self, key: &MethodKey) -> PlaneResult<Option<Integration>>;
    async fn put_integration(&self, key: &MethodKey, integration: Integration) -> PlaneResult<Integration>;
    async fn get_integration_response(&self, key: &MethodKey, status_code: &str) -> PlaneResult<Option<IntegrationResponse>>;
    async fn put_integration_response(&self, key: &MethodKey, response: IntegrationResponse) -> PlaneResult<IntegrationResponse>;

    // Deployment snapshots
    async fn list_deployments(&self, rest_api_id: &str) -> PlaneResult<Vec<Deployment>>;
    async fn create_deployment(&self, rest_api_id: &str, stage_name: &str, description: &str) -> PlaneResult<Deployment>;

    // Functions
    async fn get_function(&self, function_name: &str) -> PlaneResult<Option<FunctionConfiguration>>;
    async fn create_function(&self, request: CreateFunction) -> PlaneResult<FunctionConfiguration>;
    async fn update_function_code(&self, request: UpdateFunctionCode) -> PlaneResult<FunctionConfiguration>;
    async fn update_function_configuration(&self, settings: FunctionSettings) -> PlaneResult<FunctionConfiguration>;

    // Invocation permissions
    async fn add_permission(&self, permission: Permission) -> PlaneResult<()>;
    async fn remove_permission(&self, function_name: &str, statement_id: &str) -> PlaneResult<()>;

    // Schedule rules and their targets
    async fn put_rule(&self, rule: Rule) -> PlaneResult<String>;
    async fn delete_rule(&self, name: &str) -> PlaneResult<()>;
    async fn list_targets_by_rule(&self, rule: &str) -> PlaneResult<Vec<RuleTarget>>;
    async fn remove_targets(&self, rule: &str, ids: &[String]) -> PlaneResult<()>;
    async fn put_targets(&self, rule: &str, targets: Vec<RuleTarget>) -> PlaneResult<()>;
}
