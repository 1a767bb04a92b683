mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use common::*;
use gantry_apply::{DeployError, Deployer, Manifest};
use gantry_core::{arn, ApiTrigger, ConfigProblem, EventTrigger, FunctionSpec, HttpMethod, VpcConfig};
use gantry_package::{Artifact, ArtifactPackager, PackageError};
use gantry_plane::{ControlPlane, MethodKey, Op, PlaneError, RuleTarget};
use sha2::{Digest, Sha256};

#[tokio::test]
async fn quote_fetcher_end_to_end() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/quote/{quoteId}", "application/json")).unwrap();

    let report = d.deploy().await.unwrap();
    assert!(report.container_created);
    assert_eq!(report.resources_created, vec!["/quote".to_string(), "/quote/{quoteId}".to_string()]);
    assert_eq!(report.functions_created, 1);
    assert_eq!(
        (report.methods_created, report.method_responses_created, report.integrations_created, report.integration_responses_created),
        (1, 1, 1, 1)
    );
    assert_eq!(report.permissions_replaced, 1);
    assert_eq!(report.snapshots_created, 1);

    let state = plane.export().unwrap();
    assert_eq!(state.rest_apis().len(), 1);
    let api = &state.rest_apis()[0];
    assert_eq!(api.name, "GedditQuoteFetcher");

    let leaf = state.resources(&api.id).iter().find(|r| r.path == "/quote/{quoteId}").unwrap().clone();
    let key = MethodKey::new(&api.id, &leaf.id, HttpMethod::Get);
    assert_eq!(state.method(&key).unwrap().authorization_type, "NONE");
    let integration = state.integration(&key).unwrap();
    assert_eq!(integration.integration_type, "AWS");
    assert_eq!(integration.integration_http_method, HttpMethod::Post);
    assert_eq!(integration.content_handling, "CONVERT_TO_TEXT");
    let fn_arn = arn::function_arn(REGION, ACCOUNT, "dev-Geddit-Quotes");
    assert_eq!(integration.uri, arn::invocation_uri(REGION, &fn_arn));
    assert!(integration.request_templates["application/json"].contains("\"query\""));

    let perms = state.permissions("dev-Geddit-Quotes");
    assert_eq!(perms.len(), 1);
    assert_eq!(perms[0].statement_id, "dev-GedditQuoteFetcher-dev-Geddit-Quotes");
    assert_eq!(perms[0].principal, "apigateway.amazonaws.com");
    assert_eq!(perms[0].source_arn, format!("arn:aws:execute-api:{}:{}:{}/*/GET/quote/*", REGION, ACCOUNT, api.id));

    let snapshots = state.deployments(&api.id);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].description, "dev__dev-Geddit-Quotes");
    assert_eq!(snapshots[0].stage_name, "dev");
    assert_eq!(
        report.invoke_urls,
        vec![format!("GET https://{}.execute-api.{}.amazonaws.com/dev/quote/{{quoteId}}", api.id, REGION)]
    );

    // second session converges without creating anything
    plane.clear_calls();
    let again = d.deploy().await.unwrap();
    assert!(again.converged(), "{:?}", again);
    assert_eq!(again.functions_updated, 1);
    for op in [Op::CreateRestApi, Op::CreateResource, Op::PutMethod, Op::PutIntegration, Op::CreateDeployment, Op::CreateFunction] {
        assert_eq!(plane.count(op), 0, "{:?}", op);
    }
    assert_eq!(plane.count(Op::RemovePermission), 1);
    assert_eq!(plane.count(Op::AddPermission), 1);
    assert!(first(&plane, Op::RemovePermission) < first(&plane, Op::AddPermission));
    assert!(first(&plane, Op::UpdateFunctionCode) < first(&plane, Op::UpdateFunctionConfiguration));
    assert_eq!(plane.export().unwrap().permissions("dev-Geddit-Quotes").len(), 1);
    assert_eq!(again.invoke_urls, report.invoke_urls);
}

#[tokio::test]
async fn dependents_are_created_after_their_dependencies() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/a/b/c", "application/json")).unwrap();
    d.deploy().await.unwrap();

    assert_eq!(plane.targets_of(Op::CreateResource).iter().map(|t| t.rsplit('/').next().unwrap().to_string()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    let order = [
        Op::CreateRestApi,
        Op::CreateFunction,
        Op::CreateResource,
        Op::PutMethod,
        Op::PutMethodResponse,
        Op::PutIntegration,
        Op::PutIntegrationResponse,
        Op::AddPermission,
        Op::CreateDeployment,
    ];
    let positions: Vec<usize> = order.iter().map(|op| first(&plane, *op)).collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", positions);
}

#[tokio::test]
async fn config_problems_are_reported_together_before_any_remote_call() {
    let src = Sources::new();
    let plane = plane();
    let mut cfg = config();
    cfg.region.clear();
    cfg.role.clear();
    cfg.stage_name = "dev-1".into();
    let mut d = deployer(cfg, &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/quote", "application/json")).unwrap();

    match d.deploy().await {
        Err(DeployError::Configuration(e)) => assert_eq!(
            e.problems,
            vec![
                ConfigProblem::Missing("region"),
                ConfigProblem::Missing("role"),
                ConfigProblem::StageNotAlphanumeric("dev-1".into()),
            ]
        ),
        other => panic!("expected configuration error, got {:?}", other),
    }
    assert!(plane.calls().is_empty());
}

#[tokio::test]
async fn lookup_failure_aborts_and_releases_guard() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/quote", "application/json")).unwrap();

    plane.fail(Op::GetMethod, PlaneError::Unavailable("throttled".into()));
    let err = d.deploy().await.unwrap_err();
    assert!(matches!(err, DeployError::Remote(PlaneError::Unavailable(_))), "{:?}", err);
    assert_eq!(plane.count(Op::PutMethod), 0);
    assert_eq!(plane.count(Op::CreateDeployment), 0);

    plane.clear_failures();
    let report = d.deploy().await.unwrap();
    assert_eq!(report.methods_created, 1);
    assert!(report.resources_created.is_empty());
}

#[tokio::test]
async fn permission_failures_are_counted_not_fatal() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/quote", "application/json")).unwrap();

    plane.fail(Op::AddPermission, PlaneError::Rejected("policy too large".into()));
    let report = d.deploy().await.unwrap();
    assert_eq!(report.permissions_failed, 1);
    assert_eq!(report.permissions_replaced, 0);
    assert_eq!(report.snapshots_created, 1);
}

#[tokio::test]
async fn one_snapshot_per_stage_and_function() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/quote", "application/json")).unwrap();
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Post, "/quote", "application/json")).unwrap();

    let report = d.deploy().await.unwrap();
    assert_eq!(report.methods_created, 2);
    assert_eq!(report.snapshots_created, 1);
    assert_eq!(plane.count(Op::ListDeployments), 2);

    let again = d.deploy().await.unwrap();
    assert_eq!(again.snapshots_created, 0);
    let api_id = plane.export().unwrap().rest_apis()[0].id.clone();
    assert_eq!(plane.export().unwrap().deployments(&api_id).len(), 1);
}

#[tokio::test]
async fn schedule_trigger_replaces_rule_targets() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(EventTrigger {
        function: f.id,
        name: "nightly".into(),
        description: "Nightly refresh".into(),
        schedule: "rate(1 day)".into(),
    })
    .unwrap();

    let report = d.deploy().await.unwrap();
    assert_eq!((report.rules_replaced, report.targets_attached, report.permissions_replaced), (1, 1, 1));
    // no api trigger, no container
    assert_eq!(plane.count(Op::ListRestApis), 0);

    let statement = "dev-Geddit-Quotes-nightly";
    let state = plane.export().unwrap();
    let rule = state.rule(statement).unwrap();
    assert_eq!(rule.schedule_expression, "rate(1 day)");
    assert_eq!(rule.description, "Nightly refresh");
    let fn_arn = arn::function_arn(REGION, ACCOUNT, "dev-Geddit-Quotes");
    assert_eq!(state.targets(statement), &[RuleTarget { id: statement.into(), arn: fn_arn }]);
    let perm = &state.permissions("dev-Geddit-Quotes")[0];
    assert_eq!(perm.principal, "events.amazonaws.com");
    assert_eq!(perm.source_arn, format!("arn:aws:events:{}:{}:rule/{}", REGION, ACCOUNT, statement));
    assert_eq!(plane.count(Op::RemoveTargets), 0);

    plane.clear_calls();
    d.deploy().await.unwrap();
    assert_eq!(plane.count(Op::RemoveTargets), 1);
    assert_eq!(plane.export().unwrap().targets(statement).len(), 1);
}

#[tokio::test]
async fn rule_failure_skips_targets_but_target_failure_is_fatal() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(EventTrigger { function: f.id, name: "poll".into(), description: String::new(), schedule: "rate(5 minutes)".into() })
        .unwrap();

    plane.fail(Op::PutRule, PlaneError::Rejected("bad schedule".into()));
    let report = d.deploy().await.unwrap();
    assert_eq!(report.rules_failed, 1);
    assert_eq!(report.targets_attached, 0);
    assert_eq!(plane.count(Op::ListTargets), 0);

    plane.clear_failures();
    plane.fail(Op::PutTargets, PlaneError::Unavailable("down".into()));
    assert!(matches!(d.deploy().await, Err(DeployError::Remote(_))));
}

#[tokio::test]
async fn manifest_registers_functions_then_triggers() {
    let src = Sources::new();
    let manifest_path = src.file("gantry.yaml");
    std::fs::write(
        &manifest_path,
        r#"
config: { api_name: FromManifest, stage: qa }
functions:
  - name: Geddit-Quotes
    handler: quote.get
    files: [quote.js]
    triggers:
      - { kind: api, method: GET, path: "/quote/{quoteId}" }
      - { kind: event, name: warm, schedule: "rate(5 minutes)" }
"#,
    )
    .unwrap();

    let manifest = Manifest::load(&manifest_path).unwrap();
    let layered = manifest.config.clone().merge(gantry_core::PartialConfig {
        stage: Some("prod".into()),
        ..Default::default()
    });
    let mut cfg = config();
    cfg.api_name = layered.api_name.clone().unwrap();
    cfg.stage_name = layered.stage.clone().unwrap();

    let plane = plane();
    let mut d = deployer(cfg, &plane);
    let ids = manifest.register_into(&mut d).unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(d.triggers().len(), 2);
    assert!(d.triggers()[0].is_api());

    let report = d.deploy().await.unwrap();
    assert_eq!(report.functions_created, 1);
    let state = plane.export().unwrap();
    assert_eq!(state.rest_apis()[0].name, "FromManifest");
    assert!(state.function("prod-Geddit-Quotes").is_some());
    assert!(state.rule("prod-Geddit-Quotes-warm").is_some());
}

/// Packager that hands out fixed bytes and records what it was asked to package.
struct FixedPackager {
    bytes: Vec<u8>,
    packaged: Mutex<Vec<String>>,
}

impl ArtifactPackager for FixedPackager {
    fn package(&self, spec: &FunctionSpec) -> Result<Artifact, PackageError> {
        self.packaged.lock().unwrap().push(spec.name.clone());
        Ok(Artifact {
            bytes: self.bytes.clone(),
            sha256: base64::engine::general_purpose::STANDARD.encode(Sha256::digest(&self.bytes)),
            entries: vec!["quote.js".into()],
        })
    }
}

#[tokio::test]
async fn custom_packager_bytes_reach_the_plane() {
    let src = Sources::new();
    let plane = plane();
    let packager = Arc::new(FixedPackager { bytes: b"stub-bytes".to_vec(), packaged: Mutex::new(Vec::new()) });
    let mut d = Deployer::new(config(), plane.clone()).with_packager(packager.clone());
    let f = d.register_function(src.quotes()).unwrap();
    assert_eq!(f.artifact.bytes, b"stub-bytes".to_vec());
    d.register_trigger(ApiTrigger::new(f.id, HttpMethod::Get, "/quote", "application/json")).unwrap();

    d.deploy().await.unwrap();
    assert_eq!(*packager.packaged.lock().unwrap(), vec!["Geddit-Quotes".to_string()]);
    let state = plane.export().unwrap();
    let created = state.function("dev-Geddit-Quotes").unwrap();
    assert_eq!(created.code_size, 10);
    assert_eq!(created.code_sha256, f.artifact.sha256);
}

#[tokio::test]
async fn function_settings_reach_the_plane_and_updates_apply() {
    let src = Sources::new();
    let plane = plane();
    let mut spec = src.quotes();
    spec.description = "Fetches quotes".into();
    spec.environment = BTreeMap::from([("LOG_LEVEL".to_string(), "info".to_string())]);
    spec.vpc = Some(VpcConfig { subnet_ids: vec!["subnet-1".into()], security_group_ids: vec!["sg-1".into()] });

    let mut d = deployer(config(), &plane);
    d.register_function(spec.clone()).unwrap();
    let report = d.deploy().await.unwrap();
    assert_eq!(report.functions_created, 1);

    let state = plane.export().unwrap();
    let created = state.function("dev-Geddit-Quotes").unwrap();
    let settings = &created.settings;
    assert_eq!(settings.function_name, "dev-Geddit-Quotes");
    assert_eq!(settings.runtime, "nodejs20.x");
    assert_eq!((settings.memory_size, settings.timeout), (128, 15));
    assert_eq!(settings.handler, "quote.get");
    assert_eq!(settings.role, config().role);
    assert_eq!(settings.description, "Fetches quotes");
    assert_eq!(settings.environment["LOG_LEVEL"], "info");
    assert_eq!(settings.vpc, spec.vpc);
    assert_eq!(created.version, "1");

    spec.memory_size = Some(512);
    spec.environment.insert("LOG_LEVEL".into(), "debug".into());
    let mut next = deployer(config(), &plane);
    next.register_function(spec).unwrap();
    plane.clear_calls();
    let report = next.deploy().await.unwrap();
    assert_eq!((report.functions_created, report.functions_updated), (0, 1));
    assert_eq!(plane.count(Op::CreateFunction), 0);

    let state = plane.export().unwrap();
    let updated = state.function("dev-Geddit-Quotes").unwrap();
    assert_eq!(updated.settings.memory_size, 512);
    assert_eq!(updated.settings.timeout, 15);
    assert_eq!(updated.settings.environment["LOG_LEVEL"], "debug");
    assert_eq!(updated.version, "2");
}

#[tokio::test]
async fn stale_rule_targets_are_replaced() {
    let src = Sources::new();
    let plane = plane();
    let mut d = deployer(config(), &plane);
    let f = d.register_function(src.quotes()).unwrap();
    d.register_trigger(EventTrigger {
        function: f.id,
        name: "nightly".into(),
        description: String::new(),
        schedule: "rate(1 day)".into(),
    })
    .unwrap();
    d.deploy().await.unwrap();

    // a renamed function left its target behind
    let statement = "dev-Geddit-Quotes-nightly";
    let stale = RuleTarget { id: "old-fn".into(), arn: arn::function_arn(REGION, ACCOUNT, "dev-Old") };
    plane.put_targets(statement, vec![stale]).await.unwrap();
    assert_eq!(plane.export().unwrap().targets(statement).len(), 2);

    d.deploy().await.unwrap();
    let state = plane.export().unwrap();
    let fn_arn = arn::function_arn(REGION, ACCOUNT, "dev-Geddit-Quotes");
    assert_eq!(state.targets(statement), &[RuleTarget { id: statement.into(), arn: fn_arn }]);
}
