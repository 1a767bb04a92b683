//! Deterministic identities: statement ids, snapshot descriptions and ARNs.

use crate::path;
use crate::trigger::HttpMethod;

pub const API_PRINCIPAL: &str = "apigateway.amazonaws.com";
pub const EVENTS_PRINCIPAL: &str = "events.amazonaws.com";
pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// Statement id granting an API container access to a function.
///
/// There is one grant per (stage, container, function), not per route: when a function
/// backs several routes, each binding replaces the grant and only the last route's source
/// ARN survives.
pub fn api_statement_id(stage: &str, api_name: &str, function_name: &str) -> String {
    format!("{}-{}-{}", stage, api_name, function_name)
}

/// Statement id (and rule name) for a schedule trigger.
pub fn event_statement_id(function_name: &str, rule_name: &str) -> String {
    format!("{}-{}", function_name, rule_name)
}

/// Description that identifies a deployment snapshot for (stage, function).
pub fn snapshot_description(stage: &str, function_name: &str) -> String {
    format!("{}__{}", stage, function_name)
}

pub fn function_arn(region: &str, account_id: &str, function_name: &str) -> String {
    format!("arn:aws:lambda:{}:{}:function:{}", region, account_id, function_name)
}

pub fn rule_arn(region: &str, account_id: &str, rule_name: &str) -> String {
    format!("arn:aws:events:{}:{}:rule/{}", region, account_id, rule_name)
}

/// Source ARN scoped to one method and path of a container; `{param}` segments become `*`.
pub fn execute_api_arn(region: &str, account_id: &str, api_id: &str, method: HttpMethod, route: &str) -> String {
    format!(
        "arn:aws:execute-api:{}:{}:{}/*/{}{}",
        region,
        account_id,
        api_id,
        method.arn_segment(),
        path::wildcard_params(route)
    )
}

pub fn invocation_uri(region: &str, function_arn: &str) -> String {
    format!("arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations", region, function_arn)
}

/// Public URL a route is served on once the stage is deployed.
pub fn invoke_url(api_id: &str, region: &str, stage: &str, route: &str) -> String {
    format!("https://{}.execute-api.{}.amazonaws.com/{}{}", api_id, region, stage, route)
}
