//! Integration tests for the quorum CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a quorum Command
fn quorum() -> Command {
    cargo_bin_cmd!("quorum")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn init_project(dir: &TempDir, agents: &str) {
    quorum()
        .current_dir(dir.path())
        .args(["init", "--agents", agents])
        .env_remove("QUORUM_AGENT_COUNT")
        .assert()
        .success();
}

/// Write a model bridge script and return the command that runs it.
fn model_script(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("model.sh");
    fs::write(&path, body).unwrap();
    format!("sh {}", path.display())
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_quorum_help() {
        quorum()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Multi-agent"));
    }

    #[test]
    fn test_quorum_version() {
        quorum().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_structure() {
        let dir = create_temp_project();
        fs::write(dir.path().join("PROBLEM.md"), "Make the parser faster").unwrap();

        quorum()
            .current_dir(dir.path())
            .args(["init", "--name", "parser", "--agents", "2"])
            .env_remove("QUORUM_AGENT_COUNT")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized quorum project"))
            .stdout(predicate::str::contains("'parser' with 2 agents"));

        assert!(dir.path().join(".quorum/quorum.toml").exists());
        assert!(dir.path().join(".quorum/quorum.db").exists());
        assert!(dir.path().join(".quorum/logs").exists());
        assert!(dir.path().join(".quorum/agents").exists());

        let toml = fs::read_to_string(dir.path().join(".quorum/quorum.toml")).unwrap();
        assert!(toml.contains("agent_count = 2"));
    }

    #[test]
    fn test_init_twice_keeps_experiment() {
        let dir = create_temp_project();
        init_project(&dir, "3");

        quorum()
            .current_dir(dir.path())
            .arg("init")
            .env_remove("QUORUM_AGENT_COUNT")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"))
            .stdout(predicate::str::contains("Experiment #1"));
    }

    #[test]
    fn test_init_rejects_zero_agents() {
        let dir = create_temp_project();
        quorum()
            .current_dir(dir.path())
            .args(["init", "--agents", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("at least 1"));
    }

    #[test]
    fn test_commands_require_init() {
        let dir = create_temp_project();
        quorum()
            .current_dir(dir.path())
            .arg("prs")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Project not initialized"));
    }
}

// =============================================================================
// Human-facing records
// =============================================================================

mod records {
    use super::*;

    #[test]
    fn test_empty_project_listings() {
        let dir = create_temp_project();
        init_project(&dir, "2");

        for (args, expected) in [
            (vec!["prs"], "No pull requests"),
            (vec!["questions"], "No pending questions"),
            (vec!["updates"], "No status updates"),
            (vec!["votes"], "No votes yet"),
        ] {
            quorum()
                .current_dir(dir.path())
                .args(&args)
                .assert()
                .success()
                .stdout(predicate::str::contains(expected));
        }
    }

    #[test]
    fn test_prs_rejects_unknown_status() {
        let dir = create_temp_project();
        init_project(&dir, "2");
        quorum()
            .current_dir(dir.path())
            .args(["prs", "--status", "draft"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("draft"));
    }

    #[test]
    fn test_merge_missing_pr_fails() {
        let dir = create_temp_project();
        init_project(&dir, "2");
        quorum()
            .current_dir(dir.path())
            .args(["pr", "merge", "7"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Pull request #7 not found"));
    }

    #[test]
    fn test_answer_missing_question_fails() {
        let dir = create_temp_project();
        init_project(&dir, "2");
        quorum()
            .current_dir(dir.path())
            .args(["answer", "42", "yes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Question 42 not found"));
    }
}

// =============================================================================
// Config
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        quorum()
            .current_dir(dir.path())
            .args(["config", "show"])
            .env_remove("QUORUM_CONTEXT_BUDGET")
            .assert()
            .success()
            .stdout(predicate::str::contains("No quorum.toml found"))
            .stdout(predicate::str::contains("context_budget = 150000"));
    }

    #[test]
    fn test_config_init_then_validate() {
        let dir = create_temp_project();
        quorum()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created quorum.toml"));

        quorum()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .env_remove("QUORUM_AGENT_COUNT")
            .env_remove("QUORUM_CONTEXT_BUDGET")
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".quorum")).unwrap();
        fs::write(
            dir.path().join(".quorum/quorum.toml"),
            "[tools]\nmax_parallel = 0\n",
        )
        .unwrap();

        quorum()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("max_parallel is 0"));
    }
}

// =============================================================================
// Running agents against a scripted model bridge
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_run_stops_after_rounds() {
        let dir = create_temp_project();
        init_project(&dir, "2");
        let cmd = model_script(
            &dir,
            "cat > /dev/null\necho '{\"content\":[{\"type\":\"text\",\"text\":\"nothing to do\"}]}'\n",
        );

        quorum()
            .current_dir(dir.path())
            .args(["run", "--rounds", "2"])
            .env("QUORUM_MODEL_CMD", cmd)
            .assert()
            .success()
            .stdout(predicate::str::contains("Running 2 agents"))
            .stdout(predicate::str::contains("Stopped."));
    }

    #[test]
    fn test_run_pauses_on_full_approval_then_human_merges() {
        let dir = create_temp_project();
        init_project(&dir, "2");
        let cmd = model_script(
            &dir,
            r#"req=$(cat)
case "$req" in
  *"You are agent 1 "*)
    echo '{"content":[{"type":"tool_call","id":"r1","name":"review_pull_request","arguments":{"pr_number":1,"decision":"approve","content":"LGTM"}}]}'
    ;;
  *)
    echo '{"content":[{"type":"tool_call","id":"c1","name":"create_pull_request","arguments":{"title":"Fix parser","source_branch":"fix-parser"}}]}'
    ;;
esac
"#,
        );

        quorum()
            .current_dir(dir.path())
            .args(["run", "--rounds", "3"])
            .env("QUORUM_MODEL_CMD", &cmd)
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "PR #1 fully approved, awaiting decision",
            ));

        quorum()
            .current_dir(dir.path())
            .arg("prs")
            .assert()
            .success()
            .stdout(predicate::str::contains("#1 [open] Fix parser"))
            .stdout(predicate::str::contains("fully approved"));

        quorum()
            .current_dir(dir.path())
            .args(["pr", "show", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("agent 1 - approve"))
            .stdout(predicate::str::contains("LGTM"));

        quorum()
            .current_dir(dir.path())
            .args(["pr", "merge", "1"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Pull request #1 merged"));

        quorum()
            .current_dir(dir.path())
            .args(["prs", "--status", "merged"])
            .assert()
            .success()
            .stdout(predicate::str::contains("#1 [merged]"));

        // A decided pull request cannot be reopened or closed.
        quorum()
            .current_dir(dir.path())
            .args(["pr", "close", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cannot move from merged to closed"));
    }

    #[test]
    fn test_run_fails_on_unparsable_model_output() {
        let dir = create_temp_project();
        init_project(&dir, "2");
        let cmd = model_script(&dir, "cat > /dev/null\necho 'not json'\n");

        quorum()
            .current_dir(dir.path())
            .args(["run", "--rounds", "1"])
            .env("QUORUM_MODEL_CMD", cmd)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Agent 0 failed"));
    }
}
