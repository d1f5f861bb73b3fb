//! Pull request inspection and human disposition: `quorum prs`, `quorum pr`, `quorum votes`.

use anyhow::{Context, Result, anyhow};

use quorum::approval::ApprovalStatus;
use quorum::store::models::PrStatus;

use super::super::PrCommands;
use super::open_workspace;

pub fn cmd_prs(project_dir: &std::path::Path, status: Option<&str>) -> Result<()> {
    let filter = status
        .map(|s| s.parse::<PrStatus>().map_err(|e| anyhow!(e)))
        .transpose()?;
    let ws = open_workspace(project_dir, false)?;

    let prs = ws.db.list_pull_requests(ws.repository.id, filter)?;
    if prs.is_empty() {
        println!("No pull requests");
        return Ok(());
    }
    for pr in prs {
        let reviews = ws.db.list_reviews(pr.id)?;
        let approval = ApprovalStatus::evaluate(&pr, &reviews, ws.experiment.agent_count);
        println!("{} - {}", pr.header(), approval);
    }
    Ok(())
}

pub fn cmd_pr(project_dir: &std::path::Path, command: PrCommands) -> Result<()> {
    let ws = open_workspace(project_dir, false)?;
    let repository_id = ws.repository.id;

    match command {
        PrCommands::Show { number } => {
            let pr = ws
                .db
                .get_pull_request(repository_id, number)?
                .with_context(|| format!("Pull request #{} not found", number))?;
            let reviews = ws.db.list_reviews(pr.id)?;
            let approval = ApprovalStatus::evaluate(&pr, &reviews, ws.experiment.agent_count);

            println!("{}", pr.header());
            println!("Approval: {}", approval);
            if !pr.description.trim().is_empty() {
                println!();
                println!("{}", pr.description.trim());
            }
            println!();
            if reviews.is_empty() {
                println!("No reviews yet.");
            }
            for review in reviews {
                let decision = review.decision.map(|d| d.as_str()).unwrap_or("no decision");
                println!("agent {} - {}", review.reviewer, decision);
                for line in review.content.lines() {
                    println!("  {}", line);
                }
            }
        }
        PrCommands::Merge { number } => {
            let pr = ws
                .db
                .update_pull_request_status(repository_id, number, PrStatus::Merged)?;
            println!("Pull request #{} merged", pr.number);
        }
        PrCommands::Close { number } => {
            let pr = ws
                .db
                .update_pull_request_status(repository_id, number, PrStatus::Closed)?;
            println!("Pull request #{} closed", pr.number);
        }
    }
    Ok(())
}

pub fn cmd_votes(project_dir: &std::path::Path) -> Result<()> {
    let ws = open_workspace(project_dir, false)?;
    let votes = ws.db.list_votes(ws.experiment.id)?;
    if votes.is_empty() {
        println!("No votes yet");
        return Ok(());
    }
    for vote in votes {
        println!("agent {} -> PR #{}", vote.agent_index, vote.pr_number);
    }
    Ok(())
}
