use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{EngineSettings, RetryPolicy};
use crate::quorum_config::{QuorumConfig, ToolSettings};

/// Runtime configuration for Quorum.
///
/// Resolves the paths under `.quorum/` and the effective settings (file,
/// then environment, then CLI) into the shapes the engine and tools take.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub quorum_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub agents_dir: PathBuf,
    pub verbose: bool,
    quorum_config: QuorumConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let quorum_config = QuorumConfig::with_cli_args(project_dir, verbose)?;
        Ok(Self {
            project_dir: quorum_config.project_dir.clone(),
            quorum_dir: quorum_config.quorum_dir.clone(),
            db_path: quorum_config.db_path(),
            log_dir: quorum_config.log_dir(),
            agents_dir: quorum_config.agents_dir(),
            verbose,
            quorum_config,
        })
    }

    pub fn quorum_config(&self) -> &QuorumConfig {
        &self.quorum_config
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.quorum_dir).context("Failed to create .quorum directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(&self.agents_dir).context("Failed to create agents directory")?;
        Ok(())
    }

    /// Working directory for one agent's shell commands.
    pub fn agent_workspace(&self, agent_index: i64) -> PathBuf {
        self.agents_dir.join(format!("agent-{}", agent_index))
    }

    /// The problem statement, or an empty string if the file does not exist.
    pub fn read_problem(&self) -> Result<String> {
        read_optional(&self.quorum_config.problem_file())
    }

    pub fn model_command(&self) -> String {
        self.quorum_config.toml.model_command()
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.quorum_config.toml.model.request_timeout_secs)
    }

    pub fn agent_count(&self) -> i64 {
        self.quorum_config.toml.agent_count()
    }

    pub fn tool_settings(&self) -> &ToolSettings {
        &self.quorum_config.toml.tools
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let toml = &self.quorum_config.toml;
        EngineSettings {
            model: toml.experiment.model.clone(),
            context_budget: toml.context_budget(),
            max_output_tokens: toml.model.max_output_tokens,
            max_parallel: toml.tools.max_parallel,
            retry: RetryPolicy::from(&toml.retry),
            turn_start: toml.turn_start.clone(),
        }
    }
}

fn read_optional(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_paths_live_under_quorum_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(config.verbose);
        assert_eq!(config.db_path, root.join(".quorum/quorum.db"));
        assert_eq!(config.log_dir, root.join(".quorum/logs"));
        assert_eq!(
            config.agent_workspace(2),
            root.join(".quorum/agents/agent-2")
        );
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.log_dir.exists());
        assert!(config.agents_dir.exists());
    }

    #[test]
    fn test_missing_problem_reads_empty() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.read_problem().unwrap(), "");

        fs::write(dir.path().join("PROBLEM.md"), "Make the parser fast").unwrap();
        assert_eq!(config.read_problem().unwrap(), "Make the parser fast");
    }

    #[test]
    fn test_engine_settings_follow_file() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".quorum")).unwrap();
        fs::write(
            dir.path().join(".quorum/quorum.toml"),
            "[model]\nmax_output_tokens = 1024\n\n[tools]\nmax_parallel = 2\n\n[retry]\nmax_attempts = 2\n",
        )
        .unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let settings = config.engine_settings();
        assert_eq!(settings.max_output_tokens, 1024);
        assert_eq!(settings.max_parallel, 2);
        assert_eq!(settings.retry.max_attempts, 2);
    }
}
