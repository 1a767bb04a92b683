//! Deployer configuration: identity, credentials, naming.
//!
//! Values arrive in layers (manifest, environment, CLI flags) as [`PartialConfig`]
//! and are flattened into a [`DeployerConfig`]. `validate` runs at deploy time and
//! reports every problem at once.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single configuration violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
    Missing(&'static str),
    StageNotAlphanumeric(String),
}

impl fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigProblem::Missing(field) => write!(f, "no '{}' set", field),
            ConfigProblem::StageNotAlphanumeric(stage) => {
                write!(f, "stage '{}' must contain only ASCII letters and digits", stage)
            }
        }
    }
}

/// Every violation found while validating a [`DeployerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {}", join_problems(.problems))]
pub struct ConfigError {
    pub problems: Vec<ConfigProblem>,
}

fn join_problems(problems: &[ConfigProblem]) -> String {
    problems.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("; ")
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Explicit client settings handed to a control-plane implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub region: String,
    pub account_id: String,
    pub credentials: Credentials,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct DeployerConfig {
    pub api_name: String,
    pub stage_name: String,
    pub region: String,
    pub account_id: String,
    pub credentials: Credentials,
    pub role: String,
}

impl fmt::Debug for DeployerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployerConfig")
            .field("api_name", &self.api_name)
            .field("stage_name", &self.stage_name)
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .field("credentials", &self.credentials)
            .field("role", &self.role)
            .finish()
    }
}

impl DeployerConfig {
    /// Check completeness and naming rules, collecting every violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields: [(&'static str, &str); 7] = [
            ("account_id", &self.account_id),
            ("region", &self.region),
            ("access_key_id", &self.credentials.access_key_id),
            ("secret_access_key", &self.credentials.secret_access_key),
            ("api_name", &self.api_name),
            ("role", &self.role),
            ("stage_name", &self.stage_name),
        ];
        let mut problems: Vec<ConfigProblem> = fields
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| ConfigProblem::Missing(*name))
            .collect();
        if !self.stage_name.is_empty() && !self.stage_name.chars().all(|c| c.is_ascii_alphanumeric()) {
            problems.push(ConfigProblem::StageNotAlphanumeric(self.stage_name.clone()));
        }
        if problems.is_empty() { Ok(()) } else { Err(ConfigError { problems }) }
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            credentials: self.credentials.clone(),
        }
    }

    /// Stage-qualified remote name for a declared function.
    pub fn qualified_name(&self, function_name: &str) -> String {
        format!("{}-{}", self.stage_name, function_name)
    }
}

/// One configuration layer. Later layers win field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub api_name: Option<String>,
    pub stage: Option<String>,
    pub region: Option<String>,
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub role: Option<String>,
}

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
}

impl PartialConfig {
    /// Read the `GANTRY_*` variables, falling back to the usual AWS names where they exist.
    pub fn from_env() -> Self {
        Self {
            api_name: env_first(&["GANTRY_API_NAME"]),
            stage: env_first(&["GANTRY_STAGE"]),
            region: env_first(&["GANTRY_REGION", "AWS_REGION"]),
            account_id: env_first(&["GANTRY_ACCOUNT_ID", "AWS_ACCOUNT_ID"]),
            access_key_id: env_first(&["GANTRY_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"]),
            secret_access_key: env_first(&["GANTRY_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"]),
            role: env_first(&["GANTRY_ROLE"]),
        }
    }

    /// Overlay `other` on top of `self`.
    pub fn merge(self, other: PartialConfig) -> Self {
        Self {
            api_name: other.api_name.or(self.api_name),
            stage: other.stage.or(self.stage),
            region: other.region.or(self.region),
            account_id: other.account_id.or(self.account_id),
            access_key_id: other.access_key_id.or(self.access_key_id),
            secret_access_key: other.secret_access_key.or(self.secret_access_key),
            role: other.role.or(self.role),
        }
    }

    /// Flatten into a config; absent fields stay empty and are caught by `validate`.
    pub fn into_config(self) -> DeployerConfig {
        DeployerConfig {
            api_name: self.api_name.unwrap_or_default(),
            stage_name: self.stage.unwrap_or_default(),
            region: self.region.unwrap_or_default(),
            account_id: self.account_id.unwrap_or_default(),
            credentials: Credentials {
                access_key_id: self.access_key_id.unwrap_or_default(),
                secret_access_key: self.secret_access_key.unwrap_or_default(),
            },
            role: self.role.unwrap_or_default(),
        }
    }
}
