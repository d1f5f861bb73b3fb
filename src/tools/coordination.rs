//! Pull-request coordination tools.
//!
//! These are the only channel between agents: every record written here is
//! visible to every other agent of the experiment.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{ToolContext, ToolGroup, ToolSchema, parse_args};
use crate::approval::ApprovalStatus;
use crate::errors::ToolError;
use crate::store::db::{Db, ReviewSubmission};
use crate::store::models::{PrStatus, PullRequest, Review, ReviewDecision, StatusUpdateKind};

#[derive(Debug, Deserialize)]
struct CreatePullRequestArgs {
    title: String,
    #[serde(default)]
    description: String,
    source_branch: String,
    #[serde(default)]
    target_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListPullRequestsArgs {
    #[serde(default)]
    status: Option<PrStatus>,
}

#[derive(Debug, Deserialize)]
struct PrNumberArgs {
    pr_number: i64,
}

#[derive(Debug, Deserialize)]
struct ReviewArgs {
    pr_number: i64,
    decision: ReviewDecision,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StatusUpdateArgs {
    #[serde(rename = "type")]
    kind: StatusUpdateKind,
    content: String,
}

pub struct CoordinationTools;

impl CoordinationTools {
    async fn with_db<R, F>(ctx: &ToolContext, f: F) -> Result<R, ToolError>
    where
        F: FnOnce(&Db) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        ctx.db.call(f).await.map_err(ToolError::Storage)
    }

    async fn create_pull_request(&self, ctx: &ToolContext, args: CreatePullRequestArgs) -> Result<String, ToolError> {
        if args.title.trim().is_empty() {
            return Err(ToolError::InvalidArguments("title must not be empty".into()));
        }
        if args.source_branch.trim().is_empty() {
            return Err(ToolError::InvalidArguments("source_branch must not be empty".into()));
        }
        let repository_id = ctx.repository_id;
        let author = ctx.agent_index;

        let repository = Self::with_db(ctx, move |db| db.get_repository(repository_id))
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("Repository {}", repository_id)))?;
        let target = args
            .target_branch
            .filter(|b| !b.trim().is_empty())
            .unwrap_or(repository.main_branch);

        let pr = Self::with_db(ctx, move |db| {
            db.create_pull_request(
                repository_id,
                author,
                &args.title,
                &args.description,
                &args.source_branch,
                &target,
            )
        })
        .await?;
        info!(agent = author, pr = pr.number, "Pull request created");
        Ok(format!("Created pull request {}", pr.header()))
    }

    async fn list_pull_requests(&self, ctx: &ToolContext, args: ListPullRequestsArgs) -> Result<String, ToolError> {
        let repository_id = ctx.repository_id;
        let prs = Self::with_db(ctx, move |db| db.list_pull_requests(repository_id, args.status)).await?;
        if prs.is_empty() {
            return Ok("No pull requests".to_string());
        }
        Ok(prs.iter().map(PullRequest::header).collect::<Vec<_>>().join("\n"))
    }

    async fn get_pull_request(&self, ctx: &ToolContext, args: PrNumberArgs) -> Result<String, ToolError> {
        let repository_id = ctx.repository_id;
        let experiment_id = ctx.experiment_id;
        let number = args.pr_number;

        let found = Self::with_db(ctx, move |db| {
            let Some(pr) = db.get_pull_request(repository_id, number)? else {
                return Ok(None);
            };
            let reviews = db.list_reviews(pr.id)?;
            let agent_count = db
                .get_experiment(experiment_id)?
                .map(|e| e.agent_count)
                .unwrap_or(1);
            Ok(Some((pr, reviews, agent_count)))
        })
        .await?;
        let (pr, reviews, agent_count) =
            found.ok_or_else(|| ToolError::NotFound(format!("Pull request #{}", number)))?;

        let approval = ApprovalStatus::evaluate(&pr, &reviews, agent_count);
        Ok(render_pull_request(&pr, &reviews, &approval))
    }

    async fn review_pull_request(&self, ctx: &ToolContext, args: ReviewArgs) -> Result<String, ToolError> {
        let repository_id = ctx.repository_id;
        let reviewer = ctx.agent_index;
        let number = args.pr_number;

        let submission = Self::with_db(ctx, move |db| {
            db.submit_review(repository_id, number, reviewer, Some(args.decision), &args.content)
        })
        .await?;

        match submission {
            ReviewSubmission::Recorded { review, approval } => {
                info!(
                    agent = reviewer,
                    pr = number,
                    decision = %args.decision,
                    fully_approved = approval.is_fully_approved(),
                    "Review recorded"
                );
                let decision = review
                    .decision
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "none".to_string());
                Ok(format!(
                    "Review recorded on pull request #{}: {} ({})",
                    number, decision, approval
                ))
            }
            ReviewSubmission::SelfReview => Err(ToolError::SelfReview { pr_number: number }),
            ReviewSubmission::PullRequestNotFound => {
                Err(ToolError::NotFound(format!("Pull request #{}", number)))
            }
        }
    }

    async fn vote_for_solution(&self, ctx: &ToolContext, args: PrNumberArgs) -> Result<String, ToolError> {
        let repository_id = ctx.repository_id;
        let experiment_id = ctx.experiment_id;
        let agent_index = ctx.agent_index;
        let number = args.pr_number;

        let vote = Self::with_db(ctx, move |db| {
            if db.get_pull_request(repository_id, number)?.is_none() {
                return Ok(None);
            }
            db.upsert_vote(experiment_id, agent_index, number).map(Some)
        })
        .await?
        .ok_or_else(|| ToolError::NotFound(format!("Pull request #{}", number)))?;

        info!(agent = agent_index, pr = vote.pr_number, "Vote recorded");
        Ok(format!("Your vote is now for pull request #{}", vote.pr_number))
    }

    async fn get_problem_description(&self, ctx: &ToolContext) -> Result<String, ToolError> {
        let experiment_id = ctx.experiment_id;
        let experiment = Self::with_db(ctx, move |db| db.get_experiment(experiment_id))
            .await?
            .ok_or_else(|| ToolError::NotFound(format!("Experiment {}", experiment_id)))?;
        if experiment.problem.trim().is_empty() {
            return Ok("(no problem description provided)".to_string());
        }
        Ok(experiment.problem)
    }

    async fn publish_status_update(&self, ctx: &ToolContext, args: StatusUpdateArgs) -> Result<String, ToolError> {
        if args.content.trim().is_empty() {
            return Err(ToolError::InvalidArguments("content must not be empty".into()));
        }
        let experiment_id = ctx.experiment_id;
        let agent_index = ctx.agent_index;
        let update = Self::with_db(ctx, move |db| {
            db.create_status_update(experiment_id, agent_index, args.kind, &args.content)
        })
        .await?;
        Ok(format!("Published {} status update #{}", update.kind, update.id))
    }
}

fn render_pull_request(pr: &PullRequest, reviews: &[Review], approval: &ApprovalStatus) -> String {
    let mut out = pr.header();
    out.push_str("\n\n");
    if pr.description.trim().is_empty() {
        out.push_str("(no description)");
    } else {
        out.push_str(pr.description.trim());
    }
    out.push_str(&format!("\n\nApproval: {}\n\nReviews:", approval));
    if reviews.is_empty() {
        out.push_str("\n(none)");
    }
    for review in reviews {
        let decision = review
            .decision
            .map(|d| d.to_string())
            .unwrap_or_else(|| "no decision".to_string());
        out.push_str(&format!("\n- agent {}: {}", review.reviewer, decision));
        if !review.content.trim().is_empty() {
            for line in review.content.trim().lines() {
                out.push_str(&format!("\n  {}", line));
            }
        }
    }
    out
}

#[async_trait]
impl ToolGroup for CoordinationTools {
    fn name(&self) -> &'static str {
        "coordination"
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema::new(
                "create_pull_request",
                "Open a pull request from a branch you pushed. target_branch defaults to the main branch.",
                json!({
                    "type": "object",
                    "properties": {
                        "title": {"type": "string"},
                        "description": {"type": "string"},
                        "source_branch": {"type": "string"},
                        "target_branch": {"type": "string"}
                    },
                    "required": ["title", "source_branch"]
                }),
            ),
            ToolSchema::new(
                "list_pull_requests",
                "List pull requests, one per line, optionally filtered by status.",
                json!({
                    "type": "object",
                    "properties": {
                        "status": {"type": "string", "enum": ["open", "closed", "merged"]}
                    }
                }),
            ),
            ToolSchema::new(
                "get_pull_request",
                "Show a pull request with its description, approval state and reviews.",
                json!({
                    "type": "object",
                    "properties": {"pr_number": {"type": "integer"}},
                    "required": ["pr_number"]
                }),
            ),
            ToolSchema::new(
                "review_pull_request",
                "Review another agent's pull request. A later review from you replaces your earlier one. \
                 You cannot review your own pull requests.",
                json!({
                    "type": "object",
                    "properties": {
                        "pr_number": {"type": "integer"},
                        "decision": {"type": "string", "enum": ["approve", "request_changes", "comment"]},
                        "content": {"type": "string"}
                    },
                    "required": ["pr_number", "decision"]
                }),
            ),
            ToolSchema::new(
                "vote_for_solution",
                "Vote for the pull request you consider the best solution. Replaces your previous vote.",
                json!({
                    "type": "object",
                    "properties": {"pr_number": {"type": "integer"}},
                    "required": ["pr_number"]
                }),
            ),
            ToolSchema::new(
                "get_problem_description",
                "Return the problem statement for this run.",
                json!({"type": "object", "properties": {}}),
            ),
            ToolSchema::new(
                "publish_status_update",
                "Share a status update with the other agents.",
                json!({
                    "type": "object",
                    "properties": {
                        "type": {"type": "string", "enum": ["todo_list", "progress", "question"]},
                        "content": {"type": "string"}
                    },
                    "required": ["type", "content"]
                }),
            ),
        ]
    }

    async fn call(&self, ctx: &ToolContext, tool: &str, arguments: Value) -> Result<String, ToolError> {
        match tool {
            "create_pull_request" => self.create_pull_request(ctx, parse_args(arguments)?).await,
            "list_pull_requests" => self.list_pull_requests(ctx, parse_args(arguments)?).await,
            "get_pull_request" => self.get_pull_request(ctx, parse_args(arguments)?).await,
            "review_pull_request" => self.review_pull_request(ctx, parse_args(arguments)?).await,
            "vote_for_solution" => self.vote_for_solution(ctx, parse_args(arguments)?).await,
            "get_problem_description" => self.get_problem_description(ctx).await,
            "publish_status_update" => self.publish_status_update(ctx, parse_args(arguments)?).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}
