//! Project initialization: `quorum init`.

use anyhow::{Context, Result};

use quorum::config::Config;
use quorum::quorum_config::QuorumToml;
use quorum::store::Db;

pub fn cmd_init(project_dir: &std::path::Path, name: Option<&str>, agents: Option<i64>) -> Result<()> {
    let config = Config::new(project_dir.to_path_buf(), false)?;
    config.ensure_directories()?;

    let config_path = config.quorum_config().config_file();
    let created_config = !config_path.exists();
    let mut toml = QuorumToml::load_or_default(&config.quorum_dir)?;
    if let Some(name) = name {
        toml.experiment.name = Some(name.to_string());
    }
    if let Some(agents) = agents {
        if agents < 1 {
            anyhow::bail!("--agents must be at least 1, got {}", agents);
        }
        toml.experiment.agent_count = agents;
    }
    if created_config || name.is_some() || agents.is_some() {
        toml.save(&config_path)?;
    }

    // Reload so environment overrides apply on top of the saved file.
    let config = Config::new(project_dir.to_path_buf(), false)?;
    let db = Db::new(&config.db_path).context("Failed to open database")?;

    if let Some(experiment) = db.latest_experiment()? {
        println!(
            "Quorum project already initialized at {}",
            config.quorum_dir.display()
        );
        println!(
            "Experiment #{} '{}' with {} agents.",
            experiment.id, experiment.name, experiment.agent_count
        );
        return Ok(());
    }

    let qc = config.quorum_config();
    let experiment = db.create_experiment(
        &qc.experiment_name(),
        &config.read_problem()?,
        &qc.toml.experiment.model,
        config.agent_count(),
    )?;
    let repository = db.create_repository(
        experiment.id,
        &qc.repository_path().display().to_string(),
        &qc.toml.repository.remote_url,
        &qc.toml.repository.main_branch,
    )?;

    println!("Initialized quorum project at {}", config.quorum_dir.display());
    println!();
    println!("Created:");
    println!("  .quorum/");
    println!("  ├── quorum.toml   # Configuration (use `quorum config show`)");
    println!("  ├── quorum.db     # Pull requests, reviews, conversation logs");
    println!("  ├── logs/         # Daily JSON logs");
    println!("  └── agents/       # Per-agent working directories");
    println!();
    println!(
        "Experiment #{} '{}' with {} agents on {} ({}).",
        experiment.id,
        experiment.name,
        experiment.agent_count,
        repository.path,
        repository.main_branch
    );
    if experiment.problem.trim().is_empty() {
        println!();
        println!(
            "No problem statement found at {}. Agents will see an empty problem.",
            qc.problem_file().display()
        );
    }
    println!();
    println!("Next step: run `quorum run` to start the agents.");

    Ok(())
}
