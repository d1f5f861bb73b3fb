//! Round-robin agent execution: `quorum run`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quorum::quorum_config::ToolSettings;
use quorum::tools::{
    CoordinationTools, LocalSandbox, SandboxTools, ToolContext, ToolRegistry, UserTools,
};

use super::super::Cli;
use super::open_workspace;

/// Tool groups in routing order: sandbox, coordination, user.
fn agent_tools(ctx: ToolContext, workspace_dir: PathBuf, settings: &ToolSettings) -> ToolRegistry {
    ToolRegistry::new(ctx)
        .with_group(SandboxTools::new(
            Arc::new(LocalSandbox::new(workspace_dir)),
            Duration::from_secs(settings.command_timeout_secs),
        ))
        .with_group(CoordinationTools)
        .with_group(UserTools::new(
            Duration::from_millis(settings.question_poll_interval_ms),
            Duration::from_secs(settings.question_default_timeout_secs),
        ))
}

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, rounds: Option<usize>) -> Result<()> {
    use quorum::driver::{DriverOutcome, run_round_robin};
    use quorum::engine::prompts::build_system_prompt;
    use quorum::engine::{AgentSession, ModelClient, ProcessModel};
    use quorum::logging;
    use quorum::store::DbHandle;
    use tokio_util::sync::CancellationToken;

    let workspace = open_workspace(&project_dir, cli.verbose)?;
    let config = workspace.config;
    config.ensure_directories()?;
    let _log_guard = logging::init(config.verbose, Some(&config.log_dir))?;

    for warning in config.quorum_config().validate() {
        tracing::warn!("Config: {}", warning);
    }

    let experiment = workspace.experiment;
    let repository = workspace.repository;
    let db = DbHandle::new(workspace.db);
    let model: Arc<dyn ModelClient> = Arc::new(
        ProcessModel::new(config.model_command(), config.model_timeout())
            .with_working_dir(&config.project_dir),
    );
    let settings = config.engine_settings();
    let tool_settings = config.tool_settings().clone();

    let mut sessions = Vec::new();
    for agent_index in 0..experiment.agent_count {
        let workspace_dir = config.agent_workspace(agent_index);
        std::fs::create_dir_all(&workspace_dir)?;

        let tools = agent_tools(
            ToolContext {
                experiment_id: experiment.id,
                agent_index,
                repository_id: repository.id,
                db: db.clone(),
            },
            workspace_dir,
            &tool_settings,
        );

        let prompt = build_system_prompt(agent_index, experiment.agent_count, &repository.main_branch);
        sessions.push(
            AgentSession::new(db.clone(), model.clone(), tools, settings.clone(), prompt).await?,
        );
    }

    let stop = CancellationToken::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    println!(
        "Running {} agents on experiment #{} '{}'",
        experiment.agent_count, experiment.id, experiment.name
    );

    match run_round_robin(&mut sessions, stop, rounds).await {
        DriverOutcome::Paused { agent, pr_number } => {
            println!("PR #{} fully approved, awaiting decision", pr_number);
            println!("(paused by agent {})", agent);
            println!(
                "Run `quorum pr merge {0}` or `quorum pr close {0}`, then `quorum run` to continue.",
                pr_number
            );
        }
        DriverOutcome::Stopped => {
            println!("Stopped.");
        }
        DriverOutcome::Failed { agent, error } => {
            anyhow::bail!("Agent {} failed: {}", agent, error);
        }
    }

    Ok(())
}
