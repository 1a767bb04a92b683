//! HTTP trigger binding: method, responses, integration and invoke permission.

use std::collections::BTreeMap;

use gantry_core::{arn, ApiTrigger, DeployerConfig, HttpMethod};
use gantry_plane::{
    ControlPlane, FunctionConfiguration, Integration, IntegrationResponse, Method, MethodKey, MethodResponse, Permission,
    Resource, RestApi,
};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::{DeployError, DeployReport};

const STATUS_OK: &str = "200";
const JSON: &str = "application/json";

/// Mapping template handing the whole request to the function as one JSON document.
const REQUEST_TEMPLATE: &str = r#"{
  "body": $input.json('$'),
  "headers": {
    #foreach($header in $input.params().header.keySet())
    "$header": "$util.escapeJavaScript($input.params().header.get($header))" #if($foreach.hasNext),#end
    #end
  },
  "method": "$context.httpMethod",
  "params": {
    #foreach($param in $input.params().path.keySet())
    "$param": "$util.escapeJavaScript($input.params().path.get($param))" #if($foreach.hasNext),#end
    #end
  },
  "query": {
    #foreach($queryParam in $input.params().querystring.keySet())
    "$queryParam": "$util.escapeJavaScript($input.params().querystring.get($queryParam))" #if($foreach.hasNext),#end
    #end
  },
  "path": {
    #foreach($param in $input.params().path.keySet())
    "$param": "$util.escapeJavaScript($input.params().path.get($param))" #if($foreach.hasNext),#end
    #end
  }
}"#;

pub(crate) async fn bind(
    plane: &dyn ControlPlane,
    config: &DeployerConfig,
    api: &RestApi,
    function: &FunctionConfiguration,
    trigger: &ApiTrigger,
    resource: &Resource,
    report: &mut DeployReport,
) -> Result<(), DeployError> {
    let key = MethodKey::new(&api.id, &resource.id, trigger.method);
    let route = format!("{} {}", trigger.method, trigger.path);
    let url = arn::invoke_url(&api.id, &config.region, &config.stage_name, &trigger.path);

    match plane.get_method(&key).await? {
        Some(_) => debug!(route = %route, "method unchanged"),
        None => {
            let method = Method { authorization_type: "NONE".into(), request_parameters: BTreeMap::new() };
            plane.put_method(&key, method).await?;
            info!(route = %route, url = %url, "created method");
            report.methods_created += 1;
        }
    }

    match plane.get_method_response(&key, STATUS_OK).await? {
        Some(_) => debug!(route = %route, "method response unchanged"),
        None => {
            let response = MethodResponse {
                status_code: STATUS_OK.into(),
                response_models: BTreeMap::from([(trigger.content_type.clone(), "Empty".to_string())]),
            };
            plane.put_method_response(&key, response).await?;
            info!(route = %route, content_type = %trigger.content_type, "created method response");
            report.method_responses_created += 1;
        }
    }

    match plane.get_integration(&key).await? {
        Some(_) => debug!(route = %route, "integration unchanged"),
        None => {
            let integration = Integration {
                integration_type: "AWS".into(),
                integration_http_method: HttpMethod::Post,
                uri: arn::invocation_uri(&config.region, &function.function_arn),
                content_handling: "CONVERT_TO_TEXT".into(),
                request_templates: BTreeMap::from([(JSON.to_string(), REQUEST_TEMPLATE.to_string())]),
            };
            plane.put_integration(&key, integration).await?;
            info!(route = %route, function = %function.function_name, "created integration");
            report.integrations_created += 1;
        }
    }

    match plane.get_integration_response(&key, STATUS_OK).await? {
        Some(_) => debug!(route = %route, "integration response unchanged"),
        None => {
            let response = IntegrationResponse {
                status_code: STATUS_OK.into(),
                response_templates: BTreeMap::from([(JSON.to_string(), String::new())]),
            };
            plane.put_integration_response(&key, response).await?;
            info!(route = %route, "created integration response");
            report.integration_responses_created += 1;
        }
    }

    report.invoke_urls.push(format!("{} {}", trigger.method, url));
    replace_permission(plane, config, api, function, trigger, report).await;
    Ok(())
}

async fn replace_permission(
    plane: &dyn ControlPlane,
    config: &DeployerConfig,
    api: &RestApi,
    function: &FunctionConfiguration,
    trigger: &ApiTrigger,
    report: &mut DeployReport,
) {
    let statement_id = arn::api_statement_id(&config.stage_name, &api.name, &function.function_name);
    let fn_name = &function.function_name;

    match plane.remove_permission(fn_name, &statement_id).await {
        Ok(()) => info!(statement = %statement_id, "removed permission"),
        Err(e) => debug!(statement = %statement_id, error = %e, "no permission removed"),
    }

    let permission = Permission {
        statement_id: statement_id.clone(),
        function_name: fn_name.clone(),
        action: arn::INVOKE_ACTION.into(),
        principal: arn::API_PRINCIPAL.into(),
        source_arn: arn::execute_api_arn(&config.region, &config.account_id, &api.id, trigger.method, &trigger.path),
    };
    let source_arn = permission.source_arn.clone();
    match plane.add_permission(permission).await {
        Ok(()) => {
            info!(statement = %statement_id, source = %source_arn, "added permission");
            report.permissions_replaced += 1;
        }
        Err(e) => {
            warn!(statement = %statement_id, error = %e, "add permission failed");
            counter!("permission_create_failed_total", 1u64);
            report.permissions_failed += 1;
        }
    }
}
