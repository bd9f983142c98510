use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde_json::{json, Value};

use fairfound_agents::api::{explanation_for, JobManager, JobRequest};
use fairfound_agents::{logging, Config};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a profile and print the pipeline result with its explanation
    Run {
        /// JSON file with form_fields, cv_data, github_data and portfolio_data
        #[arg(short, long)]
        input: PathBuf,

        /// Owner of the profile
        #[arg(short, long, default_value = "cli-user")]
        user_id: String,
    },
    /// List registered agents
    Agents,
    /// Print the execution order
    Plan,
    /// Print the registry health report
    Health,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path).with_context(|| format!("loading {}", path.display()))?;
            config.apply_env();
            config.validate()?;
            config
        }
        None => Config::load().context("loading configuration")?,
    };
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    // A second subscriber is only possible in tests; ignore it here
    let _ = logging::init(&level);

    match cli.command {
        Command::Run { input, user_id } => run(config, input, user_id).await,
        Command::Agents => {
            let manager = JobManager::new(config)?;
            for agent in manager.list_registered_agents() {
                let d = &agent.descriptor;
                let deps = if d.dependencies.is_empty() {
                    "-".to_string()
                } else {
                    d.dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
                };
                println!(
                    "{:<22} {:<10} {:<9} deps: {}",
                    d.id.bright_white().bold(),
                    format!("{:?}", d.kind).to_lowercase(),
                    if d.required { "required".green() } else { "optional".yellow() },
                    deps
                );
            }
            Ok(())
        }
        Command::Plan => {
            let manager = JobManager::new(config)?;
            let order = manager.registry().execution_order()?;
            for (i, id) in order.iter().enumerate() {
                println!("{:>3}. {}", i + 1, id);
            }
            Ok(())
        }
        Command::Health => {
            let manager = JobManager::new(config)?;
            let report = manager.registry().health_report();
            let status = if report.plannable { "plannable".bright_green() } else { "not plannable".bright_red() };
            println!("{} {} agents, {}", "Registry:".bright_yellow(), report.agent_count, status);
            for missing in &report.missing_dependencies {
                println!("  {} {} -> {}", "missing".red(), missing.agent, missing.dependency);
            }
            if let Some(cycle) = &report.cycle {
                println!("  {} {}", "cycle".red(), cycle.join(" -> "));
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn run(config: Config, input: PathBuf, user_id: String) -> Result<()> {
    let raw = tokio::fs::read_to_string(&input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let payload: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {}", input.display()))?;

    let wait = config.orchestrator.pipeline_timeout() + Duration::from_secs(5);
    let manager = JobManager::new(config)?;
    let job_id = manager.submit_job(JobRequest { user_id, input: payload }).await?;
    let result = manager.wait_for(&job_id, wait).await?;
    let explanation = explanation_for(&result).ok();

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "result": result, "explanation": explanation }))?
    );
    if !result.is_success() {
        eprintln!(
            "{} {}",
            "[ERROR]".bright_red(),
            result.error.as_deref().unwrap_or("pipeline did not complete")
        );
        process::exit(1);
    }
    Ok(())
}
