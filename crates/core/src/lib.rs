//! Gantry core types: declared functions, triggers, deployer config and the
//! path/identity helpers every other crate agrees on.

#![forbid(unsafe_code)]

pub mod arn;
pub mod config;
pub mod function;
pub mod path;
pub mod trigger;

pub use config::{ClientConfig, ConfigError, ConfigProblem, Credentials, DeployerConfig, PartialConfig};
pub use function::{FunctionId, FunctionSpec, VpcConfig, DEFAULT_MEMORY_MB, DEFAULT_RUNTIME, DEFAULT_TIMEOUT_SECS};
pub use trigger::{ApiTrigger, EventTrigger, HttpMethod, Trigger};
