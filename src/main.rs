use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "quorum")]
#[command(version, about = "Multi-agent pull-request collaboration")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .quorum/, a default quorum.toml, and the experiment records
    Init {
        /// Experiment name (defaults to the project directory name)
        #[arg(short, long)]
        name: Option<String>,
        /// Number of collaborating agents
        #[arg(long)]
        agents: Option<i64>,
    },
    /// Drive all agents round-robin until a pull request needs a decision
    Run {
        /// Stop after this many rounds
        #[arg(long)]
        rounds: Option<usize>,
    },
    /// List pull requests with approval counts
    Prs {
        /// Filter by status: open, merged, closed
        #[arg(long)]
        status: Option<String>,
    },
    /// Inspect or decide one pull request
    Pr {
        #[command(subcommand)]
        command: PrCommands,
    },
    /// List questions waiting for an answer
    Questions,
    /// Answer a pending question
    Answer { id: i64, text: String },
    /// Show recent status updates
    Updates {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show each agent's current vote
    Votes,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PrCommands {
    /// Show a pull request with its reviews
    Show { number: i64 },
    /// Mark a pull request as merged
    Merge { number: i64 },
    /// Close a pull request without merging
    Close { number: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default quorum.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init { name, agents } => {
            cmd::cmd_init(&project_dir, name.as_deref(), *agents)?;
        }
        Commands::Run { rounds } => {
            cmd::cmd_run(&cli, project_dir, *rounds).await?;
        }
        Commands::Prs { status } => cmd::cmd_prs(&project_dir, status.as_deref())?,
        Commands::Pr { command } => cmd::cmd_pr(&project_dir, command.clone())?,
        Commands::Questions => cmd::cmd_questions(&project_dir)?,
        Commands::Answer { id, text } => cmd::cmd_answer(&project_dir, *id, text)?,
        Commands::Updates { limit } => cmd::cmd_updates(&project_dir, *limit)?,
        Commands::Votes => cmd::cmd_votes(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
