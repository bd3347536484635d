//! AgentFlow
//!
//! Runs the HTTP API, or operates on the database directly from the command
//! line.

use agentflow::actions::AgentFlow;
use agentflow::cli::{AgentArgs, Cli, Command, RunArgs, ServeArgs, TasksArgs};
use agentflow::config::{Config, ConfigLoader, ConfigPaths};
use agentflow::db::Database;
use agentflow::effects::spawn_effect_worker;
use agentflow::engine::Engine;
use agentflow::format::{OutputFormat, format_agent_tasks_markdown, tasks_to_json};
use agentflow::notify::notifier_for;
use agentflow::server::{AppState, start_server};
use agentflow::vault::{Vault, VaultError};
use anyhow::{Result, anyhow};
use clap::Parser;
use std::fs::OpenOptions;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log, cli.verbose)?;

    if let Some(Command::Keygen) = cli.command {
        println!("{}", Vault::generate_key()?);
        return Ok(());
    }

    // An explicit --config stands in for AGENTFLOW_CONFIG_PATH
    let explicit_config = cli.config.clone();
    let mut loader = ConfigLoader::load_with_env(ConfigPaths::discover(), |key| {
        if key == "AGENTFLOW_CONFIG_PATH"
            && let Some(ref path) = explicit_config
        {
            return Some(path.clone());
        }
        std::env::var(key).ok()
    })?;
    for source in loader.sources() {
        info!(path = %source.display(), "Loaded config");
    }

    let config = loader.config_mut();
    if let Some(db_path) = &cli.database {
        config.server.db_path = db_path.into();
    }
    if let Some(Command::Serve(ref args)) = cli.command {
        apply_serve_overrides(config, args);
    }
    let config = loader.into_config();

    config.ensure_db_dir()?;
    let db = Database::open(&config.server.db_path)?;
    info!(path = %config.server.db_path.display(), "Database opened");

    let vault = open_vault(&config)?;
    let notifier = notifier_for(
        config.notifications.webhook_url.as_deref(),
        config.notifications.timeout(),
    )?;
    let (effects, _worker) = spawn_effect_worker(db.clone(), notifier);
    let flow = AgentFlow::new(db, config, effects.clone(), vault);

    let result = match cli.command {
        Some(Command::Run(args)) => run_agent(&flow, args).await,
        Some(Command::RestartCheck(args)) => restart_check(&flow, args),
        Some(Command::Tasks(args)) => print_tasks(&flow, args),
        Some(Command::Serve(_)) | None => serve(flow).await,
        Some(Command::Keygen) => Ok(()),
    };

    // Drain audit rows and notifications before exiting
    effects.flush().await;
    result
}

fn init_tracing(log: &str, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    match log {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

fn apply_serve_overrides(config: &mut Config, args: &ServeArgs) {
    if let Some(ref host) = args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
}

/// Key storage is disabled, not defaulted, when no key is configured.
fn open_vault(config: &Config) -> Result<Option<Vault>> {
    match Vault::from_env(&config.vault.key_env) {
        Ok(vault) => Ok(Some(vault)),
        Err(VaultError::MissingKey(var)) => {
            warn!(
                "${} is not set; API key storage is disabled. Generate one with `agentflow keygen`.",
                var
            );
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn serve(flow: AgentFlow) -> Result<()> {
    let addr = flow.config.bind_addr();
    let (shutdown_tx, bound, handle) = start_server(AppState::new(flow), &addr).await?;
    info!("API available at http://{}/api", bound);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());
    handle.await?;
    Ok(())
}

async fn run_agent(flow: &AgentFlow, args: RunArgs) -> Result<()> {
    let agent = flow
        .db
        .get_agent(&args.agent_id)?
        .ok_or_else(|| anyhow!("Agent not found: {}", args.agent_id))?;
    let llm = flow.provider_for_agent(&agent)?;
    let engine = Engine::new(flow.clone());

    let output = if args.once {
        serde_json::to_string_pretty(&engine.step(&agent.id, llm.as_ref()).await?)?
    } else {
        serde_json::to_string_pretty(&engine.run(&agent.id, llm.as_ref()).await?)?
    };
    println!("{}", output);
    Ok(())
}

fn restart_check(flow: &AgentFlow, args: AgentArgs) -> Result<()> {
    let agent = flow
        .db
        .get_agent(&args.agent_id)?
        .ok_or_else(|| anyhow!("Agent not found: {}", args.agent_id))?;
    // Operator replay on the owner's behalf
    let outcome = flow.check_agent_restart(&agent.owner_id, &agent.id)?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn print_tasks(flow: &AgentFlow, args: TasksArgs) -> Result<()> {
    let agent = flow
        .db
        .get_agent(&args.agent_id)?
        .ok_or_else(|| anyhow!("Agent not found: {}", args.agent_id))?;
    let tasks = flow.db.list_tasks_for_agent(&agent.id)?;

    let format = args
        .format
        .map(OutputFormat::from)
        .unwrap_or(flow.config.server.default_format);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tasks_to_json(&tasks))?),
        OutputFormat::Markdown => print!("{}", format_agent_tasks_markdown(&agent, &tasks)),
    }
    Ok(())
}
