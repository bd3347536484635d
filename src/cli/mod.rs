//! CLI command definitions for agentflow
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Json,
    Markdown,
}

impl From<FormatArg> for crate::format::OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => crate::format::OutputFormat::Json,
            FormatArg::Markdown => crate::format::OutputFormat::Markdown,
        }
    }
}

/// AgentFlow server and operator tools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API (default if no subcommand given)
    Serve(ServeArgs),

    /// Run the execution engine for one agent
    Run(RunArgs),

    /// Resume an agent if none of its dependencies block it any more
    RestartCheck(AgentArgs),

    /// Print an agent's tasks
    Tasks(TasksArgs),

    /// Generate a new encryption key for the API key vault
    Keygen,
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Agent to run
    pub agent_id: String,

    /// Run a single step instead of the bounded loop
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    pub agent_id: String,
}

#[derive(Args, Debug)]
pub struct TasksArgs {
    pub agent_id: String,

    /// Output format (defaults to server.default_format)
    #[arg(short, long, value_enum)]
    pub format: Option<FormatArg>,
}
