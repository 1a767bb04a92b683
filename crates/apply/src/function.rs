use gantry_core::DeployerConfig;
use gantry_plane::{ControlPlane, CreateFunction, FunctionConfiguration, FunctionSettings, UpdateFunctionCode};
use metrics::counter;
use tracing::info;

use crate::{DeployError, DeployReport, RegisteredFunction};

fn settings_for(config: &DeployerConfig, function: &RegisteredFunction) -> FunctionSettings {
    let spec = &function.spec;
    FunctionSettings {
        function_name: function.qualified_name.clone(),
        runtime: spec.runtime().to_string(),
        role: config.role.clone(),
        handler: spec.handler.clone(),
        description: spec.description.clone(),
        memory_size: spec.memory_mb(),
        timeout: spec.timeout_secs(),
        environment: spec.environment.clone(),
        vpc: spec.vpc.clone(),
    }
}

/// Create the function, or push new code and then settings to an existing one.
pub(crate) async fn upsert_function(
    plane: &dyn ControlPlane,
    config: &DeployerConfig,
    function: &RegisteredFunction,
    report: &mut DeployReport,
) -> Result<FunctionConfiguration, DeployError> {
    let name = &function.qualified_name;
    let settings = settings_for(config, function);
    match plane.get_function(name).await? {
        Some(existing) => {
            let code_changed = existing.code_sha256 != function.artifact.sha256;
            plane
                .update_function_code(UpdateFunctionCode {
                    function_name: name.clone(),
                    code: function.artifact.bytes.clone(),
                    publish: true,
                })
                .await?;
            let updated = plane.update_function_configuration(settings).await?;
            info!(function = %name, version = %updated.version, code_changed, "updated function");
            counter!("functions_updated_total", 1u64);
            report.functions_updated += 1;
            Ok(updated)
        }
        None => {
            let created = plane
                .create_function(CreateFunction { settings, code: function.artifact.bytes.clone(), publish: true })
                .await?;
            info!(function = %name, arn = %created.function_arn, "created function");
            counter!("functions_created_total", 1u64);
            report.functions_created += 1;
            Ok(created)
        }
    }
}
