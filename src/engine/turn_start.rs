//! Synthetic turn-start messages.

use anyhow::{Context, Result};

use crate::approval::ApprovalStatus;
use crate::quorum_config::TurnStartSettings;
use crate::store::DbHandle;
use crate::store::models::{PrStatus, PullRequest, ReviewDecision, StatusUpdate};

/// Everything a turn-start message shows one agent.
#[derive(Debug, Clone, Default)]
pub struct TurnStartDigest {
    pub agent_index: i64,
    pub own_open: Vec<(PullRequest, ApprovalStatus)>,
    pub awaiting_review: Vec<PullRequest>,
    /// Most recent first.
    pub updates: Vec<StatusUpdate>,
}

impl TurnStartDigest {
    /// Collect the digest for `agent_index` in one database round trip.
    pub async fn load(
        db: &DbHandle,
        experiment_id: i64,
        repository_id: i64,
        agent_index: i64,
        settings: &TurnStartSettings,
    ) -> Result<Self> {
        let limit = settings.status_update_count;
        db.call(move |db| {
            let agent_count = db
                .get_experiment(experiment_id)?
                .with_context(|| format!("Experiment {} not found", experiment_id))?
                .agent_count;

            let mut own_open = Vec::new();
            let mut awaiting_review = Vec::new();
            for pr in db.list_pull_requests(repository_id, Some(PrStatus::Open))? {
                let reviews = db.list_reviews(pr.id)?;
                if pr.author == agent_index {
                    let status = ApprovalStatus::evaluate(&pr, &reviews, agent_count);
                    own_open.push((pr, status));
                    continue;
                }
                let approved_by_me = reviews.iter().any(|r| {
                    r.reviewer == agent_index && r.decision == Some(ReviewDecision::Approve)
                });
                if !approved_by_me {
                    awaiting_review.push(pr);
                }
            }

            let updates = db.recent_status_updates(experiment_id, limit)?;
            Ok(Self {
                agent_index,
                own_open,
                awaiting_review,
                updates,
            })
        })
        .await
    }

    /// Render as the text of a turn-start user message.
    pub fn render(&self, char_cap: usize) -> String {
        let mut out = format!(
            "New turn for agent {}. Continue working on the problem; call get_problem_description if you need it again.\n",
            self.agent_index
        );

        out.push_str("\n## Your open pull requests\n");
        if self.own_open.is_empty() {
            out.push_str("(none)\n");
        }
        for (pr, status) in &self.own_open {
            out.push_str(&format!("{} - {}\n", pr.header(), status));
        }

        out.push_str("\n## Pull requests awaiting your review\n");
        if self.awaiting_review.is_empty() {
            out.push_str("(none)\n");
        }
        for pr in &self.awaiting_review {
            out.push_str(&pr.header());
            out.push('\n');
        }

        out.push_str("\n## Recent status updates\n");
        if self.updates.is_empty() {
            out.push_str("(none)\n");
        }
        for update in &self.updates {
            out.push_str(&format!(
                "- agent {} [{}] {}\n",
                update.agent_index,
                update.kind,
                truncate_chars(update.content.trim(), char_cap)
            ));
        }

        out
    }
}

/// Cut `text` to at most `cap` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(cap).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Db;
    use crate::store::models::StatusUpdateKind;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdefgh", 3), "abc...");
        assert_eq!(truncate_chars("ééééé", 2), "éé...");
    }

    #[test]
    fn test_empty_sections_render_none() {
        let digest = TurnStartDigest {
            agent_index: 1,
            ..Default::default()
        };
        let text = digest.render(100);
        assert!(text.starts_with("New turn for agent 1."));
        assert_eq!(text.matches("(none)").count(), 3);
    }

    #[tokio::test]
    async fn test_digest_splits_own_and_awaiting_review() {
        let db = DbHandle::new(Db::new_in_memory().unwrap());
        let (exp, repo) = db
            .call(|db| {
                let exp = db.create_experiment("demo", "", "m", 3)?;
                let repo = db.create_repository(exp.id, "/tmp/r", "", "main")?;
                // #1 by agent 0, #2 and #3 by agent 1, #4 by agent 2 (closed)
                db.create_pull_request(repo.id, 0, "Mine", "", "mine", "main")?;
                db.create_pull_request(repo.id, 1, "Theirs", "", "theirs", "main")?;
                db.create_pull_request(repo.id, 1, "Reviewed", "", "reviewed", "main")?;
                db.create_pull_request(repo.id, 2, "Closed", "", "closed", "main")?;
                db.update_pull_request_status(repo.id, 4, PrStatus::Closed)?;
                db.submit_review(repo.id, 3, 0, Some(ReviewDecision::Approve), "")?;
                db.submit_review(repo.id, 2, 0, Some(ReviewDecision::Comment), "question")?;
                db.submit_review(repo.id, 1, 2, Some(ReviewDecision::Approve), "")?;
                for i in 0..4 {
                    db.create_status_update(exp.id, 1, StatusUpdateKind::Progress, &format!("update {} {}", i, "x".repeat(50)))?;
                }
                Ok((exp.id, repo.id))
            })
            .await
            .unwrap();

        let settings = TurnStartSettings {
            status_update_count: 2,
            status_update_char_cap: 10,
        };
        let digest = TurnStartDigest::load(&db, exp, repo, 0, &settings).await.unwrap();

        assert_eq!(digest.own_open.len(), 1);
        assert_eq!(digest.own_open[0].0.number, 1);
        assert_eq!(digest.own_open[0].1.approvals, 1);
        let awaiting: Vec<i64> = digest.awaiting_review.iter().map(|p| p.number).collect();
        assert_eq!(awaiting, vec![2]);
        assert_eq!(digest.updates.len(), 2);
        assert!(digest.updates[0].content.starts_with("update 3"));

        let text = digest.render(settings.status_update_char_cap);
        assert!(text.contains("#1 [open] Mine (author: agent 0, mine -> main) - 1/2 approvals"));
        assert!(text.contains("#2 [open] Theirs"));
        assert!(!text.contains("Reviewed"));
        assert!(text.contains("- agent 1 [progress] update 3 x..."));
    }
}
