use gantry_core::{arn, DeployerConfig};
use gantry_plane::{ControlPlane, RestApi};
use tracing::{debug, info};

use crate::{DeployError, DeployReport};

/// Publish the stage for `function_name` unless a snapshot for the pair already exists.
pub(crate) async fn publish(
    plane: &dyn ControlPlane,
    config: &DeployerConfig,
    api: &RestApi,
    function_name: &str,
    report: &mut DeployReport,
) -> Result<(), DeployError> {
    let description = arn::snapshot_description(&config.stage_name, function_name);
    let deployments = plane.list_deployments(&api.id).await?;
    if let Some(found) = deployments.iter().find(|d| d.description == description) {
        debug!(snapshot = %description, id = %found.id, "snapshot exists");
        return Ok(());
    }
    let created = plane.create_deployment(&api.id, &config.stage_name, &description).await?;
    info!(snapshot = %description, id = %created.id, stage = %config.stage_name, "created snapshot");
    report.snapshots_created += 1;
    Ok(())
}
