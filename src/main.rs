use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use muse::config::MuseConfig;
use muse::orchestrator::Orchestrator;
use muse::request::ContentRequest;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "muse")]
#[command(version, about = "AI-powered content campaign orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to muse.toml. Defaults to ./muse.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a campaign end to end
    Run {
        #[arg(short, long)]
        brand: String,
        #[arg(short, long)]
        objective: String,
        #[arg(short, long, default_value = "3")]
        days: u32,
        /// Plan only, skip asset production
        #[arg(long)]
        no_build: bool,
        /// Produce visuals without text overlays
        #[arg(long)]
        no_text: bool,
        /// Style reference image accompanying the request
        #[arg(long)]
        style_ref: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        max_retries: u32,
    },
    /// Resolve and print the worker plan without executing it
    Plan {
        #[arg(short, long)]
        brand: String,
        #[arg(short, long)]
        objective: String,
        #[arg(long)]
        no_build: bool,
        #[arg(long)]
        no_text: bool,
        #[arg(long)]
        style_ref: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        max_retries: u32,
    },
    /// Start the REST + chat server
    Serve {
        #[arg(short, long, default_value = "3141")]
        port: u16,
    },
}

fn build_request(
    brand: String,
    objective: String,
    days: u32,
    no_build: bool,
    no_text: bool,
    style_ref: Option<PathBuf>,
    max_retries: u32,
) -> ContentRequest {
    let mut request = ContentRequest::new(brand, objective);
    request.days = days.clamp(muse::request::MIN_DAYS, muse::request::MAX_DAYS);
    request.build = !no_build;
    request.include_text = !no_text;
    request.style_ref_present = style_ref.is_some();
    request.max_retries = max_retries;
    request
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => MuseConfig::load(path)?,
        None => MuseConfig::load_or_default(std::path::Path::new("."))
            .context("failed to load muse.toml")?,
    };

    match cli.command {
        Commands::Run {
            brand,
            objective,
            days,
            no_build,
            no_text,
            style_ref,
            max_retries,
        } => {
            let request =
                build_request(brand, objective, days, no_build, no_text, style_ref, max_retries);
            let orchestrator = Orchestrator::from_config(config);
            let result = orchestrator.run_campaign(request).await?;
            println!("run {} finished: {:?}", result.run_id, result.status);
            for outcome in &result.trace {
                if outcome.skipped {
                    println!(
                        "  {} skipped ({})",
                        outcome.kind,
                        outcome.reason.as_deref().unwrap_or("")
                    );
                } else {
                    println!(
                        "  {} attempt {}: {}",
                        outcome.kind,
                        outcome.attempt,
                        if outcome.success { "ok" } else { "failed" }
                    );
                }
            }
            if let Some(artifact) = &result.artifact_ref {
                println!("artifact: {}", artifact.display());
            }
        }
        Commands::Plan {
            brand,
            objective,
            no_build,
            no_text,
            style_ref,
            max_retries,
        } => {
            let request =
                build_request(brand, objective, 3, no_build, no_text, style_ref, max_retries);
            let orchestrator = Orchestrator::from_config(config);
            let plan = orchestrator.preview_plan(&request).await;
            println!("mode: {:?}", plan.mode);
            for step in &plan.steps {
                println!(
                    "  {}: {} ({})",
                    step.kind,
                    if step.will_run { "run" } else { "skip" },
                    step.reason
                );
            }
        }
        Commands::Serve { port } => {
            muse::server::serve(config, port).await?;
        }
    }

    Ok(())
}
