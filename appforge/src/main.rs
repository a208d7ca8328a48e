//! Autonomous app builder.
//!
//! Drives an external code-generation agent from one natural-language
//! product description to a verified, compiling project. Pipeline state
//! (config, plan, pass artifacts) lives under `.appforge/` in the project
//! directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use appforge::core::cancel::CancelSlot;
use appforge::exit_codes;
use appforge::fix::CompileStatus;
use appforge::io::agent::ClaudeAgent;
use appforge::io::compiler::CommandBuildRunner;
use appforge::io::config::load_config;
use appforge::io::http::ManagementApi;
use appforge::io::paths::ForgePaths;
use appforge::io::plan_store::load_plan;
use appforge::io::verify::{SourceRootResolver, verify_files};
use appforge::logging;
use appforge::pipeline::{BuildRunResult, PipelineDeps, PipelineRequest, run_pipeline};
use appforge::provider::database::{self, DatabaseProvider};
use appforge::provider::payments::PaymentsProvider;
use appforge::provider::{ProviderRegistry, SetupCapability, write_provider_config};

/// Management-API base URL for the database provider; unset disables it.
const DB_URL_ENV: &str = "APPFORGE_DB_URL";

#[derive(Parser)]
#[command(
    name = "appforge",
    version,
    about = "Autonomous app builder driving a code-generation agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an app from a product description.
    Build {
        /// What to build, in plain language.
        description: String,
        /// App name; also the default source root and build target.
        #[arg(short, long)]
        name: String,
        /// Project directory (created state lives under `.appforge/`).
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Reference image consulted during analysis; repeatable.
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Build target (scheme/product); defaults to the app name.
        #[arg(long)]
        target: Option<String>,
    },
    /// Re-verify an existing project against its stored plan.
    Verify {
        #[arg(short, long)]
        name: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Inspect and set up integration providers.
    Providers {
        #[command(subcommand)]
        action: ProvidersAction,
    },
}

#[derive(Subcommand)]
enum ProvidersAction {
    /// List registered providers and their capabilities.
    List,
    /// Acquire credentials for a provider and store its configuration.
    Connect {
        provider: String,
        /// App name the credentials are scoped to.
        #[arg(short, long)]
        name: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
    /// Remove a provider's external resources and stored configuration.
    Disconnect {
        provider: String,
        #[arg(short, long)]
        name: String,
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Build {
            description,
            name,
            project_dir,
            images,
            target,
        } => cmd_build(description, name, project_dir, images, target),
        Command::Verify { name, project_dir } => cmd_verify(name, project_dir),
        Command::Providers { action } => match action {
            ProvidersAction::List => cmd_providers_list(),
            ProvidersAction::Connect {
                provider,
                name,
                project_dir,
            } => cmd_providers_connect(provider, name, project_dir),
            ProvidersAction::Disconnect {
                provider,
                name,
                project_dir,
            } => cmd_providers_disconnect(provider, name, project_dir),
        },
    }
}

fn cmd_build(
    description: String,
    name: String,
    project_dir: PathBuf,
    images: Vec<PathBuf>,
    target: Option<String>,
) -> Result<i32> {
    let registry = default_registry()?;
    // The slot is wired through the agent; embedding callers can hold a
    // clone and call `cancel()` to kill the in-flight pass.
    let cancel = Arc::new(CancelSlot::new());
    let agent = ClaudeAgent::new(cancel);

    let paths = ForgePaths::new(&project_dir);
    let config = load_config(&paths.config_path)?;
    let builder = CommandBuildRunner::new(config.build.command.clone());

    let request = PipelineRequest {
        description,
        app_name: name,
        project_root: project_dir,
        image_paths: images,
        target,
    };
    let deps = PipelineDeps {
        agent: &agent,
        builder: &builder,
        registry: &registry,
        resolver: &SourceRootResolver,
        launcher: None,
    };

    let result = run_pipeline(&request, &deps)?;
    print_summary(&result);

    if !result.final_report.complete {
        return Ok(exit_codes::INCOMPLETE);
    }
    if !result.compile.confirmed() {
        return Ok(exit_codes::NO_COMPILE);
    }
    Ok(exit_codes::OK)
}

fn cmd_verify(name: String, project_dir: PathBuf) -> Result<i32> {
    let paths = ForgePaths::new(&project_dir);
    let plan = load_plan(&paths.plan_path)?;
    let files = plan.ordered_files();
    let report = verify_files(&paths.root, &name, &files, &SourceRootResolver);

    println!(
        "{}/{} planned files verified",
        report.valid_count, report.total_planned
    );
    for status in report.unresolved() {
        println!(
            "  {}: {}",
            status.path,
            status.reason.as_deref().unwrap_or("unresolved")
        );
    }
    if report.complete {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::INCOMPLETE)
    }
}

fn cmd_providers_list() -> Result<i32> {
    let registry = default_registry()?;
    for provider in registry.iter() {
        let mut capabilities = Vec::new();
        if provider.setup().is_some() {
            capabilities.push("setup");
        }
        if provider.prompt().is_some() {
            capabilities.push("prompt");
        }
        if provider.tools().is_some() {
            capabilities.push("tools");
        }
        if provider.provisioning().is_some() {
            capabilities.push("provisioning");
        }
        println!(
            "{} ({}): {}",
            provider.id(),
            provider.display_name(),
            capabilities.join(", ")
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_providers_connect(provider: String, name: String, project_dir: PathBuf) -> Result<i32> {
    let registry = default_registry()?;
    let setup = setup_capability(&registry, &provider)?;
    let config = setup
        .acquire(&name)
        .with_context(|| format!("connect {provider}"))?;

    let paths = ForgePaths::new(&project_dir);
    paths.ensure_layout()?;
    write_provider_config(&paths.provider_config_path(&provider), &config)?;
    println!("{provider} connected for {name}");
    Ok(exit_codes::OK)
}

fn cmd_providers_disconnect(provider: String, name: String, project_dir: PathBuf) -> Result<i32> {
    let registry = default_registry()?;
    let setup = setup_capability(&registry, &provider)?;
    setup
        .remove(&name)
        .with_context(|| format!("disconnect {provider}"))?;

    let paths = ForgePaths::new(&project_dir);
    let config_path = paths.provider_config_path(&provider);
    if config_path.exists() {
        std::fs::remove_file(&config_path)
            .with_context(|| format!("remove {}", config_path.display()))?;
    }
    println!("{provider} disconnected for {name}");
    Ok(exit_codes::OK)
}

fn setup_capability<'a>(
    registry: &'a ProviderRegistry,
    provider_id: &str,
) -> Result<&'a dyn SetupCapability> {
    let provider = registry
        .get(provider_id)
        .with_context(|| format!("unknown provider {provider_id}"))?;
    provider
        .setup()
        .with_context(|| format!("provider {provider_id} has no setup capability"))
}

/// Providers available to every run. The database provider needs its
/// management API configured via environment; without it only prompt-level
/// integrations are registered.
fn default_registry() -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Box::new(PaymentsProvider))?;

    if let (Ok(base_url), Ok(token)) = (
        std::env::var(DB_URL_ENV),
        std::env::var(database::TOKEN_ENV),
    ) {
        let query_url = format!("{}/v1/query", base_url.trim_end_matches('/'));
        let api = ManagementApi::new(base_url, token).context("database management api")?;
        registry.register(Box::new(DatabaseProvider::new(api, query_url)))?;
    }

    Ok(registry)
}

fn print_summary(result: &BuildRunResult) {
    println!();
    for outcome in &result.milestones {
        let state = if outcome.complete { "complete" } else { "incomplete" };
        println!(
            "milestone {}: {} ({} pass(es))",
            outcome.milestone.as_str(),
            state,
            outcome.passes_used
        );
    }
    println!(
        "files: {}/{} verified",
        result.final_report.valid_count, result.final_report.total_planned
    );
    for path in &result.unresolved {
        println!("  unresolved: {path}");
    }
    match &result.compile {
        CompileStatus::Succeeded { attempts } => {
            println!("build: confirmed ({attempts} attempt(s))");
        }
        CompileStatus::Unconfirmed { attempts, .. } => {
            println!("build: unconfirmed after {attempts} attempt(s)");
        }
    }
    for created in &result.provisioned {
        println!("provisioned: {created}");
    }
    for warning in &result.warnings {
        println!("warning: {warning}");
    }
    let totals = result.totals;
    println!(
        "usage: {} passes, {} in / {} out tokens, ${:.2}",
        totals.passes, totals.input_tokens, totals.output_tokens, totals.cost_usd
    );
}
