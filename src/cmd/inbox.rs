//! Questions and status updates: `quorum questions`, `quorum answer`, `quorum updates`.

use anyhow::Result;

use quorum::store::models::QuestionStatus;

use super::open_workspace;

pub fn cmd_questions(project_dir: &std::path::Path) -> Result<()> {
    let ws = open_workspace(project_dir, false)?;
    let pending = ws
        .db
        .list_questions(ws.experiment.id, Some(QuestionStatus::Pending))?;
    if pending.is_empty() {
        println!("No pending questions");
        return Ok(());
    }
    for q in pending {
        println!("[{}] agent {} ({}): {}", q.id, q.agent_index, q.created_at, q.question);
    }
    println!();
    println!("Answer with `quorum answer <ID> \"<text>\"`.");
    Ok(())
}

pub fn cmd_answer(project_dir: &std::path::Path, id: i64, text: &str) -> Result<()> {
    let ws = open_workspace(project_dir, false)?;
    let question = ws.db.answer_question(id, text)?;
    println!("Answered question {} from agent {}", question.id, question.agent_index);
    Ok(())
}

pub fn cmd_updates(project_dir: &std::path::Path, limit: usize) -> Result<()> {
    let ws = open_workspace(project_dir, false)?;
    let updates = ws.db.recent_status_updates(ws.experiment.id, limit)?;
    if updates.is_empty() {
        println!("No status updates");
        return Ok(());
    }
    for update in updates {
        println!("#{} agent {} [{}] {}", update.id, update.agent_index, update.kind, update.created_at);
        for line in update.content.lines() {
            println!("  {}", line);
        }
    }
    Ok(())
}
