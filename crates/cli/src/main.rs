use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gantry_apply::{DeployReport, Deployer, Manifest};
use gantry_core::{DeployerConfig, PartialConfig};
use gantry_persist::{load_plane, save_plane, state_key, SqliteStore};
use gantry_plane::MemoryPlane;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gantryctl", version, about = "Gantry: reconcile serverless functions and their triggers")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(clap::Args, Debug)]
struct Target {
    /// Deploy manifest (YAML)
    #[arg(short = 'f', long = "manifest", default_value = "gantry.yaml")]
    manifest: PathBuf,
    /// Stage name; overrides manifest and GANTRY_STAGE
    #[arg(long = "stage")]
    stage: Option<String>,
    /// API container name; overrides manifest and GANTRY_API_NAME
    #[arg(long = "api-name")]
    api_name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register every function and trigger in the manifest and converge the plane
    Deploy {
        #[command(flatten)]
        target: Target,
        /// Local state database (default: GANTRY_DB_PATH or ~/.gantry/gantry.db)
        #[arg(long = "state")]
        state: Option<PathBuf>,
        /// Start from an empty plane and do not save the result
        #[arg(long = "ephemeral", action = ArgAction::SetTrue)]
        ephemeral: bool,
    },
    /// Load the manifest and check configuration without touching the plane
    Validate {
        #[command(flatten)]
        target: Target,
    },
}

fn init_tracing() {
    let env = std::env::var("GANTRY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GANTRY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GANTRY_METRICS_ADDR; expected host:port");
        }
    }
}

/// manifest < environment < flags
fn layered_config(manifest: &Manifest, target: &Target) -> DeployerConfig {
    let flags = PartialConfig { stage: target.stage.clone(), api_name: target.api_name.clone(), ..Default::default() };
    manifest.config.clone().merge(PartialConfig::from_env()).merge(flags).into_config()
}

fn open_store(path: Option<&PathBuf>) -> Result<SqliteStore> {
    match path {
        Some(p) => SqliteStore::open(&p.to_string_lossy()),
        None => SqliteStore::open_default(),
    }
}

fn print_report(report: &DeployReport, output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(report)?),
        Output::Human => {
            if report.container_created {
                println!("+ api container");
            }
            for path in &report.resources_created {
                println!("+ resource {}", path);
            }
            println!(
                "functions: {} created, {} updated",
                report.functions_created, report.functions_updated
            );
            println!(
                "bindings: {} methods, {} method responses, {} integrations, {} integration responses",
                report.methods_created,
                report.method_responses_created,
                report.integrations_created,
                report.integration_responses_created
            );
            println!(
                "permissions: {} replaced, {} failed; rules: {} replaced, {} failed; targets: {}",
                report.permissions_replaced,
                report.permissions_failed,
                report.rules_replaced,
                report.rules_failed,
                report.targets_attached
            );
            println!("snapshots: {} created", report.snapshots_created);
            for url in &report.invoke_urls {
                println!("  {}", url);
            }
            if report.converged() {
                println!("already converged");
            }
        }
    }
    Ok(())
}

async fn run_deploy(target: Target, state: Option<PathBuf>, ephemeral: bool, output: Output) -> Result<()> {
    let manifest = Manifest::load(&target.manifest)?;
    let config = layered_config(&manifest, &target);
    let client = config.client();
    let key = state_key(&client.account_id, &client.region);

    let store = if ephemeral { None } else { Some(open_store(state.as_ref())?) };
    let prior = match &store {
        Some(store) => load_plane(store, &key)?,
        None => None,
    };
    info!(key = %key, restored = prior.is_some(), "local plane ready");
    let plane = Arc::new(match prior {
        Some(state) => MemoryPlane::with_state(client, state),
        None => MemoryPlane::new(client),
    });

    let mut deployer = Deployer::new(config, plane.clone());
    manifest.register_into(&mut deployer)?;
    let report = deployer.deploy().await.context("deploy")?;

    if let Some(store) = &store {
        let exported = plane.export().context("exporting plane state")?;
        save_plane(store, &key, &exported)?;
    }
    print_report(&report, output)
}

fn run_validate(target: Target, output: Output) -> Result<()> {
    let manifest = Manifest::load(&target.manifest)?;
    let config = layered_config(&manifest, &target);
    config.validate()?;
    let triggers: usize = manifest.functions.iter().map(|f| f.triggers.len()).sum();
    match output {
        Output::Human => println!(
            "ok: {} functions, {} triggers, stage '{}', api '{}'",
            manifest.functions.len(),
            triggers,
            config.stage_name,
            config.api_name
        ),
        Output::Json => println!(
            "{}",
            serde_json::json!({ "functions": manifest.functions.len(), "triggers": triggers, "stage": config.stage_name, "api_name": config.api_name })
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Deploy { target, state, ephemeral } => {
            info!(manifest = %target.manifest.display(), ephemeral, "deploy invoked");
            run_deploy(target, state, ephemeral, cli.output).await
        }
        Commands::Validate { target } => run_validate(target, cli.output),
    };

    if let Err(e) = result {
        error!(error = ?e, "command failed");
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
