//! `ivh`: the Infrastructure Validation Harness CLI.
//!
//! Provisions ephemeral instances of the MINITRUE Backup & Recovery
//! Terraform module, validates the provisioned Azure state against the
//! declared invariants, and tears everything down. Suites run in
//! parallel, each in its own isolated deployment context.

mod report;
mod suite;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ivh_common::BaseConfig;
use ivh_common::engine::TerraformCli;
use ivh_common::orchestrator::Orchestrator;
use ivh_azure::{ArmClient, credentials};

use suite::SuiteCtx;

#[derive(Debug, Parser)]
#[command(
    name = "ivh",
    version,
    about = "Provision, validate, and tear down the MINITRUE backup topology"
)]
struct Cli {
    /// Path to ivh.toml. Defaults to ./ivh.toml when present, otherwise
    /// built-in defaults plus environment overrides.
    #[arg(long, global = true, env = "IVH_CONFIG")]
    config: Option<PathBuf>,

    /// Terraform binary to invoke.
    #[arg(long, global = true, default_value = "terraform", env = "IVH_TERRAFORM_BIN")]
    terraform_bin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run validation suites (provision, validate, destroy).
    Run {
        /// Suites to run (repeatable). Defaults to every registered suite.
        #[arg(long = "suite")]
        suites: Vec<String>,

        /// Leave provisioned resources in place for post-mortem inspection.
        #[arg(long)]
        keep: bool,

        /// Per-fixture wall-clock deadline (e.g. "45m").
        #[arg(long)]
        deadline: Option<String>,

        /// Emit the run summary as JSON instead of the human report.
        #[arg(long)]
        json: bool,
    },

    /// Fast plan-only sanity check; creates no resources and needs no
    /// Azure credentials.
    Plan,

    /// List registered suites.
    List,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ivh=info,ivh_common=info,ivh_azure=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<BaseConfig> {
    let config = match &cli.config {
        Some(path) => BaseConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None if Path::new("ivh.toml").is_file() => {
            BaseConfig::load(Path::new("ivh.toml")).context("loading ./ivh.toml")?
        }
        None => BaseConfig::from_env(".")?,
    };
    if !config.module_dir.is_dir() {
        bail!(
            "terraform module directory {} does not exist ({})",
            config.module_dir.display(),
            ivh_common::errors::ErrorCode::ConfigModuleDirMissing
        );
    }
    Ok(config)
}

fn build_engine(cli: &Cli, config: &BaseConfig) -> Arc<TerraformCli> {
    Arc::new(
        TerraformCli::new(cli.terraform_bin.clone())
            .with_apply_timeout(config.apply_timeout)
            .with_destroy_timeout(config.destroy_timeout),
    )
}

async fn cmd_run(
    cli: &Cli,
    suites: Vec<String>,
    keep: bool,
    deadline: Option<String>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let config = Arc::new(load_config(cli)?);

    // No credential, no run: the provider singleton is constructed once
    // and shared read-only by every fixture.
    let token_provider = match credentials::shared() {
        Ok(provider) => provider,
        Err(err) => bail!("credential provider initialization failed: {err}"),
    };
    let arm = Arc::new(ArmClient::new(token_provider));

    let selected = suite::select(&suites)?;
    let engine = build_engine(cli, &config);
    let deadline = deadline
        .map(|raw| humantime::parse_duration(&raw))
        .transpose()
        .context("parsing --deadline")?;

    let mut orchestrator = Orchestrator::new();
    if let Some(limit) = deadline {
        orchestrator = orchestrator.with_fixture_deadline(limit);
    }

    info!(suites = selected.len(), keep, "starting validation run");
    let jobs = selected
        .iter()
        .map(|def| {
            let ctx = SuiteCtx {
                config: config.clone(),
                engine: engine.clone(),
                arm: Some(arm.clone()),
                keep,
            };
            (def.name.to_string(), suite::future(def.name, ctx))
        })
        .collect();

    let summary = orchestrator.run_all(jobs).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", report::render(&summary));
    }

    Ok(if summary.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_plan(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = Arc::new(load_config(cli)?);
    let engine = build_engine(cli, &config);
    let ctx = SuiteCtx {
        config,
        engine,
        arm: None,
        keep: false,
    };

    let summary = Orchestrator::new()
        .run_all(vec![("plan".to_string(), suite::future("plan", ctx))])
        .await;
    print!("{}", report::render(&summary));

    Ok(if summary.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_list() -> ExitCode {
    println!("Registered suites:");
    for def in suite::REGISTRY {
        println!("  {:<12} {}", def.name, def.description);
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            ref suites,
            keep,
            ref deadline,
            json,
        } => cmd_run(&cli, suites.clone(), keep, deadline.clone(), json).await,
        Commands::Plan => cmd_plan(&cli).await,
        Commands::List => Ok(cmd_list()),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}
