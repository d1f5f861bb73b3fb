//! Configuration view and validation commands: `quorum config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use quorum::quorum_config::{QuorumConfig, QuorumToml};

    let config = QuorumConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Quorum Configuration");
            println!("====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No quorum.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            println!("[experiment]");
            println!("  name = \"{}\"", config.experiment_name());
            println!("  model = \"{}\"", toml.experiment.model);
            println!("  agent_count = {}", toml.experiment.agent_count);
            println!("  problem_file = \"{}\"", toml.experiment.problem_file.display());
            println!();
            println!("[model]");
            println!("  context_budget = {}", toml.model.context_budget);
            println!("  max_output_tokens = {}", toml.model.max_output_tokens);
            println!("  request_timeout_secs = {}", toml.model.request_timeout_secs);
            println!();
            println!("[retry]");
            println!("  max_attempts = {}", toml.retry.max_attempts);
            println!("  base_delay_ms = {}", toml.retry.base_delay_ms);
            println!("  max_delay_ms = {}", toml.retry.max_delay_ms);
            println!();
            println!("[tools]");
            println!("  max_parallel = {}", toml.tools.max_parallel);
            println!("  command_timeout_secs = {}", toml.tools.command_timeout_secs);
            println!("  question_poll_interval_ms = {}", toml.tools.question_poll_interval_ms);
            println!(
                "  question_default_timeout_secs = {}",
                toml.tools.question_default_timeout_secs
            );
            println!();
            println!("[repository]");
            println!("  path = \"{}\"", toml.repository.path.display());
            println!("  main_branch = \"{}\"", toml.repository.main_branch);
            println!();

            println!("Effective values (with env overrides):");
            println!("  model_command = \"{}\"", toml.model_command());
            println!("  context_budget = {}", toml.context_budget());
            println!("  agent_count = {}", toml.agent_count());
            println!();
            if !config_path.exists() {
                println!("Run 'quorum config init' to create a quorum.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("quorum.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            std::fs::create_dir_all(&config.quorum_dir)?;
            QuorumToml::default().save(&config_path)?;

            println!("Created quorum.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [experiment] name, model, agent_count");
            println!("  - [model] command, context_budget");
            println!("  - [tools] max_parallel, question timeouts");
            println!();
        }
    }

    Ok(())
}
