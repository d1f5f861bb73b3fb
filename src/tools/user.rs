//! Human-in-the-loop questions.
//!
//! `ask_user_question` writes a pending row to `questions` and polls it until
//! someone answers (`quorum answer ID TEXT`) or the timeout elapses. Only the
//! calling tool invocation waits; sibling tool calls keep running.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::info;

use super::{ToolContext, ToolGroup, ToolSchema, parse_args};
use crate::errors::ToolError;
use crate::store::models::{Question, QuestionStatus};

/// Upper bound on how long one question may block its tool call.
pub const MAX_QUESTION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Deserialize)]
struct AskArgs {
    question: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

pub struct UserTools {
    poll_interval: Duration,
    default_timeout: Duration,
}

impl UserTools {
    pub fn new(poll_interval: Duration, default_timeout: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(10)),
            default_timeout,
        }
    }

    async fn ask(&self, ctx: &ToolContext, args: AskArgs) -> Result<String, ToolError> {
        if args.question.trim().is_empty() {
            return Err(ToolError::InvalidArguments("question must not be empty".into()));
        }
        let wait = args
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(MAX_QUESTION_TIMEOUT);
        let experiment_id = ctx.experiment_id;
        let agent_index = ctx.agent_index;

        let question = ctx
            .db
            .call(move |db| db.create_question(experiment_id, agent_index, &args.question))
            .await
            .map_err(ToolError::Storage)?;
        let id = question.id;
        info!(agent = agent_index, question = id, "Waiting for a human answer");

        let started = Instant::now();
        let deadline = started.checked_add(wait).unwrap_or(started);
        loop {
            let current = ctx
                .db
                .call(move |db| db.get_question(id))
                .await
                .map_err(ToolError::Storage)?
                .ok_or_else(|| ToolError::NotFound(format!("Question {}", id)))?;
            if current.status != QuestionStatus::Pending {
                return Ok(describe(&current, wait));
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }

        // An answer that lands between the last poll and here still wins.
        let final_state = ctx
            .db
            .call(move |db| db.expire_question(id))
            .await
            .map_err(ToolError::Storage)?;
        Ok(describe(&final_state, wait))
    }
}

fn describe(question: &Question, waited: Duration) -> String {
    match (question.status, question.answer.as_deref()) {
        (QuestionStatus::Answered, Some(answer)) => format!("User answered: {}", answer),
        _ => format!(
            "timeout: no answer after {} second(s). Proceed with your best judgement.",
            waited.as_secs()
        ),
    }
}

#[async_trait]
impl ToolGroup for UserTools {
    fn name(&self) -> &'static str {
        "user"
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        vec![ToolSchema::new(
            "ask_user_question",
            "Ask the human operator a question and wait for the answer. \
             Returns a timeout notice if nobody answers in time.",
            json!({
                "type": "object",
                "properties": {
                    "question": {"type": "string"},
                    "timeout_seconds": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_QUESTION_TIMEOUT.as_secs(),
                        "description": format!("Defaults to {}", self.default_timeout.as_secs())
                    }
                },
                "required": ["question"]
            }),
        )]
    }

    async fn call(&self, ctx: &ToolContext, tool: &str, arguments: Value) -> Result<String, ToolError> {
        match tool {
            "ask_user_question" => self.ask(ctx, parse_args(arguments)?).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Db, DbHandle};

    async fn ctx() -> ToolContext {
        let db = DbHandle::new(Db::new_in_memory().unwrap());
        let experiment_id = db
            .call(|db| db.create_experiment("demo", "", "m", 2).map(|e| e.id))
            .await
            .unwrap();
        ToolContext {
            experiment_id,
            agent_index: 1,
            repository_id: 0,
            db,
        }
    }

    #[tokio::test]
    async fn test_unanswered_question_times_out_without_error() {
        let ctx = ctx().await;
        let tools = UserTools::new(Duration::from_millis(50), Duration::from_secs(300));
        let started = std::time::Instant::now();
        let text = tools
            .call(&ctx, "ask_user_question", json!({"question": "x", "timeout_seconds": 1}))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert!(text.starts_with("timeout"));
        assert!(elapsed >= Duration::from_millis(950));
        assert!(elapsed < Duration::from_secs(3));

        let experiment_id = ctx.experiment_id;
        let questions = ctx
            .db
            .call(move |db| db.list_questions(experiment_id, None))
            .await
            .unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].status, QuestionStatus::Timeout);
    }

    #[tokio::test]
    async fn test_answer_is_picked_up_by_polling() {
        let ctx = ctx().await;
        let tools = UserTools::new(Duration::from_millis(20), Duration::from_secs(5));

        let db = ctx.db.clone();
        let experiment_id = ctx.experiment_id;
        let answerer = tokio::spawn(async move {
            loop {
                let pending = db
                    .call(move |db| db.list_questions(experiment_id, Some(QuestionStatus::Pending)))
                    .await
                    .unwrap();
                if let Some(q) = pending.first() {
                    let id = q.id;
                    db.call(move |db| db.answer_question(id, "use SQLite"))
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let text = tools
            .call(&ctx, "ask_user_question", json!({"question": "Which store?"}))
            .await
            .unwrap();
        answerer.await.unwrap();
        assert_eq!(text, "User answered: use SQLite");
    }

    #[tokio::test]
    async fn test_huge_timeout_is_capped_and_still_answerable() {
        let ctx = ctx().await;
        let tools = UserTools::new(Duration::from_millis(20), Duration::from_secs(5));

        let db = ctx.db.clone();
        let experiment_id = ctx.experiment_id;
        let answerer = tokio::spawn(async move {
            loop {
                let pending = db
                    .call(move |db| db.list_questions(experiment_id, Some(QuestionStatus::Pending)))
                    .await
                    .unwrap();
                if let Some(q) = pending.first() {
                    let id = q.id;
                    db.call(move |db| db.answer_question(id, "go ahead"))
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let text = tokio::time::timeout(
            Duration::from_secs(5),
            tools.call(
                &ctx,
                "ask_user_question",
                json!({"question": "Proceed?", "timeout_seconds": u64::MAX}),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        answerer.await.unwrap();
        assert_eq!(text, "User answered: go ahead");

        let questions = ctx
            .db
            .call(move |db| db.list_questions(experiment_id, None))
            .await
            .unwrap();
        assert_eq!(questions[0].status, QuestionStatus::Answered);
    }

    #[test]
    fn test_schema_advertises_timeout_cap() {
        let tools = UserTools::new(Duration::from_millis(20), Duration::from_secs(1));
        let schema = &tools.schemas()[0].input_schema;
        assert_eq!(
            schema["properties"]["timeout_seconds"]["maximum"],
            json!(MAX_QUESTION_TIMEOUT.as_secs())
        );
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let ctx = ctx().await;
        let tools = UserTools::new(Duration::from_millis(20), Duration::from_secs(1));
        let err = tools
            .call(&ctx, "ask_user_question", json!({"question": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
