//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                          |
//! |-----------------|-------------------------------------------|
//! | `project`       | `Init`                                    |
//! | `run`           | `Run`                                     |
//! | `pr`            | `Prs`, `Pr`, `Votes`                      |
//! | `inbox`         | `Questions`, `Answer`, `Updates`          |
//! | `config`        | `Config`                                  |

pub mod config;
pub mod inbox;
pub mod pr;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use inbox::{cmd_answer, cmd_questions, cmd_updates};
pub use pr::{cmd_pr, cmd_prs, cmd_votes};
pub use project::cmd_init;
pub use run::cmd_run;

use anyhow::{Context, Result};
use std::path::Path;

use quorum::config::Config;
use quorum::store::Db;
use quorum::store::models::{Experiment, Repository};

/// An initialized project: its configuration, database, and current experiment.
pub struct Workspace {
    pub config: Config,
    pub db: Db,
    pub experiment: Experiment,
    pub repository: Repository,
}

pub fn open_workspace(project_dir: &Path, verbose: bool) -> Result<Workspace> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    if !config.db_path.exists() {
        anyhow::bail!("Project not initialized. Run 'quorum init' first.");
    }
    let db = Db::new(&config.db_path)?;
    let experiment = db
        .latest_experiment()?
        .context("No experiment found. Run 'quorum init' first.")?;
    let repository = db
        .repository_for_experiment(experiment.id)?
        .with_context(|| format!("Experiment {} has no repository", experiment.id))?;
    Ok(Workspace {
        config,
        db,
        experiment,
        repository,
    })
}
