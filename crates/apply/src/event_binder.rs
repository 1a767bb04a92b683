//! Schedule trigger binding: invoke permission, rule and its single target.

use gantry_core::{arn, DeployerConfig, EventTrigger};
use gantry_plane::{ControlPlane, FunctionConfiguration, Permission, Rule, RuleTarget};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::{DeployError, DeployReport};

pub(crate) async fn bind(
    plane: &dyn ControlPlane,
    config: &DeployerConfig,
    function: &FunctionConfiguration,
    trigger: &EventTrigger,
    report: &mut DeployReport,
) -> Result<(), DeployError> {
    // The statement id doubles as the rule name.
    let statement_id = arn::event_statement_id(&function.function_name, &trigger.name);
    let fn_name = &function.function_name;

    match plane.remove_permission(fn_name, &statement_id).await {
        Ok(()) => info!(statement = %statement_id, "removed permission"),
        Err(e) => debug!(statement = %statement_id, error = %e, "no permission removed"),
    }
    let permission = Permission {
        statement_id: statement_id.clone(),
        function_name: fn_name.clone(),
        action: arn::INVOKE_ACTION.into(),
        principal: arn::EVENTS_PRINCIPAL.into(),
        source_arn: arn::rule_arn(&config.region, &config.account_id, &statement_id),
    };
    match plane.add_permission(permission).await {
        Ok(()) => {
            info!(statement = %statement_id, "added permission");
            report.permissions_replaced += 1;
        }
        Err(e) => {
            warn!(statement = %statement_id, error = %e, "add permission failed");
            counter!("permission_create_failed_total", 1u64);
            report.permissions_failed += 1;
        }
    }

    match plane.delete_rule(&statement_id).await {
        Ok(()) => info!(rule = %statement_id, "deleted rule"),
        Err(e) => debug!(rule = %statement_id, error = %e, "no rule deleted"),
    }
    let rule = Rule {
        name: statement_id.clone(),
        schedule_expression: trigger.schedule.clone(),
        description: trigger.description.clone(),
    };
    match plane.put_rule(rule).await {
        Ok(rule_arn) => {
            info!(rule = %statement_id, arn = %rule_arn, schedule = %trigger.schedule, "put rule");
            report.rules_replaced += 1;
        }
        Err(e) => {
            warn!(rule = %statement_id, error = %e, "put rule failed; skipping targets");
            counter!("rule_create_failed_total", 1u64);
            report.rules_failed += 1;
            return Ok(());
        }
    }

    let existing = plane.list_targets_by_rule(&statement_id).await?;
    if !existing.is_empty() {
        let ids: Vec<String> = existing.into_iter().map(|t| t.id).collect();
        plane.remove_targets(&statement_id, &ids).await?;
        info!(rule = %statement_id, removed = ids.len(), "removed rule targets");
    }
    let target = RuleTarget { id: statement_id.clone(), arn: function.function_arn.clone() };
    plane.put_targets(&statement_id, vec![target]).await?;
    info!(rule = %statement_id, function = %fn_name, "attached rule target");
    report.targets_attached += 1;
    Ok(())
}
