//! Tick engine.
//!
//! One [`AgentSession`] per agent. Each [`AgentSession::tick`] runs one cycle:
//!
//! 1. stop here if a fully-approved pull request is waiting for a human
//! 2. append a turn-start message if the previous turn ended
//! 3. render the log through the [`ContextWindow`]
//! 4. call the model with retry
//! 5. run requested tools concurrently, results kept in request order
//! 6. append the response and its tool results together
//! 7. check for a fully-approved pull request and pause if one exists

pub mod model;
pub mod prompts;
pub mod retry;
pub mod turn_start;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalStatus, first_fully_approved};
use crate::context::ContextWindow;
use crate::conversation::{ContentPart, Message, NewMessage, Role, ToolCall};
use crate::errors::TickError;
use crate::quorum_config::TurnStartSettings;
use crate::store::DbHandle;
use crate::tools::ToolRegistry;

pub use model::{ModelClient, ModelRequest, ModelResponse, ProcessModel, RequestMessage};
pub use retry::RetryPolicy;
pub use turn_start::TurnStartDigest;

/// Knobs for one agent session.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub model: String,
    pub context_budget: usize,
    pub max_output_tokens: u32,
    pub max_parallel: usize,
    pub retry: RetryPolicy,
    pub turn_start: TurnStartSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4".to_string(),
            context_budget: 150_000,
            max_output_tokens: 8192,
            max_parallel: 4,
            retry: RetryPolicy::default(),
            turn_start: TurnStartSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// The last turn ended; the next tick opens a new one.
    NeedsUserTurn,
    /// Tool results are waiting for the model.
    HasPendingTurn,
    /// A pull request is fully approved and waits for a human.
    Paused { pr_number: i64 },
    /// The last tick failed fatally.
    Failed,
}

/// Non-error result of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The model answered; `tool_calls` tools ran.
    Continued { tool_calls: usize },
    /// The model returned nothing; nothing was appended.
    Idle,
    /// Stop ticking until a human merges or closes this pull request.
    Paused { pr_number: i64 },
}

pub struct AgentSession {
    experiment_id: i64,
    agent_index: i64,
    db: DbHandle,
    model: Arc<dyn ModelClient>,
    tools: ToolRegistry,
    window: ContextWindow,
    settings: EngineSettings,
    system_prompt: String,
    state: AgentState,
}

impl AgentSession {
    /// Resume (or start) the session for the agent the registry was built for.
    pub async fn new(
        db: DbHandle,
        model: Arc<dyn ModelClient>,
        tools: ToolRegistry,
        settings: EngineSettings,
        system_prompt: String,
    ) -> anyhow::Result<Self> {
        let experiment_id = tools.context().experiment_id;
        let agent_index = tools.context().agent_index;

        let (cursor, last, approved) = db
            .call(move |db| {
                let cursor = db.load_cursor(experiment_id, agent_index)?;
                let last = db.list_messages(experiment_id, agent_index)?.pop();
                let statuses = db.open_pull_request_approvals(experiment_id)?;
                let approved = first_fully_approved(statuses.iter().map(|(_, status)| status));
                Ok((cursor, last, approved))
            })
            .await?;
        // A pause outlives the process: an approved PR still waiting for a
        // human keeps a resumed session paused.
        let state = match approved {
            Some(status) => AgentState::Paused {
                pr_number: status.pr_number,
            },
            None => state_after(last.as_ref()),
        };

        Ok(Self {
            experiment_id,
            agent_index,
            db,
            model,
            tools,
            window: ContextWindow::from_cursor(cursor),
            settings,
            system_prompt,
            state,
        })
    }

    pub fn agent_index(&self) -> i64 {
        self.agent_index
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn window(&self) -> &ContextWindow {
        &self.window
    }

    /// Run one tick. See the module docs for the steps.
    pub async fn tick(&mut self) -> Result<TickOutcome, TickError> {
        match self.run_tick().await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(agent = self.agent_index, error = %err, "Tick failed");
                self.state = AgentState::Failed;
                Err(err)
            }
        }
    }

    async fn run_tick(&mut self) -> Result<TickOutcome, TickError> {
        // Another agent's review may have completed an approval since the last tick.
        if let Some(status) = self.fully_approved().await? {
            debug!(agent = self.agent_index, pr = status.pr_number, "Paused before model call");
            self.state = AgentState::Paused {
                pr_number: status.pr_number,
            };
            return Ok(TickOutcome::Paused {
                pr_number: status.pr_number,
            });
        }

        let experiment_id = self.experiment_id;
        let agent_index = self.agent_index;
        let mut messages = self
            .db
            .call(move |db| db.list_messages(experiment_id, agent_index))
            .await?;

        if messages.last().is_none_or(|m| m.role == Role::Agent) {
            let turn_start = self.turn_start_message().await?;
            let appended = self
                .db
                .call(move |db| db.append_messages(experiment_id, agent_index, &[turn_start]))
                .await?;
            messages.extend(appended);
            info!(agent = agent_index, position = messages.len() - 1, "Turn started");
        }

        let request = self.render(&messages).await?;

        let model = self.model.clone();
        let response = self
            .settings
            .retry
            .run(|| model.complete(&request))
            .await?;

        if response.content.is_empty() {
            debug!(agent = agent_index, "Empty model response, nothing appended");
            self.state = state_after(messages.last());
            return Ok(TickOutcome::Idle);
        }

        let calls: Vec<ToolCall> = response
            .content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect();

        let tools = &self.tools;
        let results: Vec<_> = stream::iter(calls.iter())
            .map(|call| tools.dispatch(call))
            .buffered(self.settings.max_parallel.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_error).count();
        let mut batch = vec![NewMessage::agent(response.content, response.usage)];
        if !results.is_empty() {
            batch.push(NewMessage::tool_results(results));
        }
        self.db
            .call(move |db| db.append_messages(experiment_id, agent_index, &batch))
            .await?;

        info!(
            agent = agent_index,
            tool_calls = calls.len(),
            failed,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Tick complete"
        );

        self.state = if calls.is_empty() {
            AgentState::NeedsUserTurn
        } else {
            AgentState::HasPendingTurn
        };

        if let Some(status) = self.fully_approved().await? {
            info!(
                agent = agent_index,
                pr = status.pr_number,
                "PR #{} fully approved, awaiting decision",
                status.pr_number
            );
            self.state = AgentState::Paused {
                pr_number: status.pr_number,
            };
            return Ok(TickOutcome::Paused {
                pr_number: status.pr_number,
            });
        }

        Ok(TickOutcome::Continued {
            tool_calls: calls.len(),
        })
    }

    async fn turn_start_message(&self) -> Result<NewMessage, TickError> {
        let ctx = self.tools.context();
        let digest = TurnStartDigest::load(
            &self.db,
            ctx.experiment_id,
            ctx.repository_id,
            ctx.agent_index,
            &self.settings.turn_start,
        )
        .await?;
        Ok(NewMessage::user_text(
            digest.render(self.settings.turn_start.status_update_char_cap),
        ))
    }

    /// Fit the log into the budget and build the request, persisting any cursor move.
    async fn render(&mut self, messages: &[Message]) -> Result<ModelRequest, TickError> {
        let before = self.window;
        let schemas = self.tools.schemas();
        let base = ModelRequest {
            model: self.settings.model.clone(),
            system: self.system_prompt.clone(),
            messages: Vec::new(),
            tools: schemas,
            max_output_tokens: self.settings.max_output_tokens,
        };

        let model = self.model.clone();
        let mut probe = base.clone();
        let window = self
            .window
            .render(messages, self.settings.context_budget, |window| {
                probe.messages = window.iter().map(RequestMessage::from).collect();
                model.count_tokens(&probe)
            })?;

        if self.window != before {
            let cursor = self.window.cursor();
            let (experiment_id, agent_index) = (self.experiment_id, self.agent_index);
            info!(
                agent = agent_index,
                loop_start = cursor.loop_start,
                inner_start = cursor.inner_start,
                "Context window truncated"
            );
            self.db
                .call(move |db| db.save_cursor(experiment_id, agent_index, cursor))
                .await?;
        }

        Ok(ModelRequest {
            messages: window.iter().map(RequestMessage::from).collect(),
            ..base
        })
    }

    async fn fully_approved(&self) -> Result<Option<ApprovalStatus>, TickError> {
        let experiment_id = self.experiment_id;
        let statuses = self
            .db
            .call(move |db| db.open_pull_request_approvals(experiment_id))
            .await?;
        Ok(first_fully_approved(statuses.iter().map(|(_, status)| status)))
    }
}

fn state_after(last: Option<&Message>) -> AgentState {
    match last {
        Some(message) if message.role == Role::User => AgentState::HasPendingTurn,
        _ => AgentState::NeedsUserTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::estimate_json_tokens;
    use crate::errors::{ModelError, ToolError};
    use crate::store::Db;
    use crate::tools::{CoordinationTools, ToolContext, ToolGroup, ToolSchema};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays canned responses and records every request it sees.
    struct ScriptedModel {
        responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(reply(vec![ContentPart::text("nothing left to do")])))
        }

        /// Messages only, so budgets in tests are easy to reason about.
        fn count_tokens(&self, request: &ModelRequest) -> usize {
            request.messages.iter().map(estimate_json_tokens).sum()
        }
    }

    /// Sleeps for `ms` milliseconds, then echoes it.
    struct Sleepy;

    #[async_trait]
    impl ToolGroup for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }

        fn schemas(&self) -> Vec<ToolSchema> {
            vec![ToolSchema::new("sleep_ms", "Sleep", json!({"type": "object"}))]
        }

        async fn call(&self, _: &ToolContext, _: &str, arguments: Value) -> Result<String, ToolError> {
            let ms = arguments["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(format!("slept {}", ms))
        }
    }

    fn reply(content: Vec<ContentPart>) -> ModelResponse {
        ModelResponse {
            content,
            usage: Default::default(),
            stop_reason: None,
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ContentPart {
        ContentPart::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }

    fn fast_settings() -> EngineSettings {
        EngineSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        }
    }

    async fn fixture(agent_count: i64) -> (DbHandle, i64, i64) {
        let db = DbHandle::new(Db::new_in_memory().unwrap());
        let ids = db
            .call(move |db| {
                let exp = db.create_experiment("demo", "Fix it", "m", agent_count)?;
                let repo = db.create_repository(exp.id, "/tmp/repo", "", "main")?;
                Ok((exp.id, repo.id))
            })
            .await
            .unwrap();
        (db, ids.0, ids.1)
    }

    async fn session(
        db: &DbHandle,
        (experiment_id, repository_id): (i64, i64),
        agent_index: i64,
        model: Arc<ScriptedModel>,
        settings: EngineSettings,
    ) -> AgentSession {
        let tools = ToolRegistry::new(ToolContext {
            experiment_id,
            agent_index,
            repository_id,
            db: db.clone(),
        })
        .with_group(CoordinationTools)
        .with_group(Sleepy);
        AgentSession::new(db.clone(), model, tools, settings, "system".into())
            .await
            .unwrap()
    }

    async fn log(db: &DbHandle, experiment_id: i64, agent_index: i64) -> Vec<Message> {
        db.call(move |db| db.list_messages(experiment_id, agent_index))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_tick_opens_turn_and_runs_tools() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![Ok(reply(vec![
            ContentPart::text("Looking around"),
            call("c1", "list_pull_requests", json!({})),
        ]))]);
        let mut agent = session(&db, (exp, repo), 0, model.clone(), fast_settings()).await;
        assert_eq!(agent.state(), AgentState::NeedsUserTurn);

        let outcome = agent.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Continued { tool_calls: 1 });
        assert_eq!(agent.state(), AgentState::HasPendingTurn);

        let messages = log(&db, exp, 0).await;
        assert_eq!(messages.len(), 3);
        assert!(messages[0].is_turn_start());
        assert!(messages[0].text().contains("## Pull requests awaiting your review"));
        assert!(messages[1].is_tool_request());
        let results: Vec<_> = messages[2].tool_results().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[0].content, "No pull requests");

        let requests = model.requests();
        assert_eq!(requests[0].system, "system");
        assert_eq!(requests[0].messages.len(), 1);
        assert!(requests[0].tools.iter().any(|t| t.name == "review_pull_request"));
    }

    #[tokio::test]
    async fn test_results_keep_request_order() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![Ok(reply(vec![
            call("slow", "sleep_ms", json!({"ms": 200})),
            call("fast", "sleep_ms", json!({"ms": 1})),
            call("bad", "no_such_tool", json!({})),
        ]))]);
        let mut agent = session(&db, (exp, repo), 0, model, fast_settings()).await;
        agent.tick().await.unwrap();

        let messages = log(&db, exp, 0).await;
        let results: Vec<_> = messages[2].tool_results().cloned().collect();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "fast", "bad"]);
        assert!(!results[0].is_error);
        assert!(!results[1].is_error);
        assert!(results[2].is_error);
        assert_eq!(results[2].name, "no_such_tool");
    }

    #[tokio::test]
    async fn test_empty_response_appends_nothing() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![Ok(reply(vec![])), Ok(reply(vec![]))]);
        let mut agent = session(&db, (exp, repo), 0, model.clone(), fast_settings()).await;

        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(log(&db, exp, 0).await.len(), 1);

        // The turn-start is still the last message, so no second one is added.
        assert_eq!(agent.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(log(&db, exp, 0).await.len(), 1);
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_text_only_reply_ends_turn() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![
            Ok(reply(vec![ContentPart::text("All done for now")])),
            Ok(reply(vec![ContentPart::text("Still done")])),
        ]);
        let mut agent = session(&db, (exp, repo), 0, model.clone(), fast_settings()).await;

        assert_eq!(
            agent.tick().await.unwrap(),
            TickOutcome::Continued { tool_calls: 0 }
        );
        assert_eq!(agent.state(), AgentState::NeedsUserTurn);
        agent.tick().await.unwrap();

        let messages = log(&db, exp, 0).await;
        assert_eq!(messages.len(), 4);
        assert!(messages[2].is_turn_start());
        // The second request replays the whole log so far.
        assert_eq!(model.requests()[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![
            Err(ModelError::Transient("overloaded".into())),
            Ok(reply(vec![ContentPart::text("ok")])),
        ]);
        let mut agent = session(&db, (exp, repo), 0, model.clone(), fast_settings()).await;
        agent.tick().await.unwrap();
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_tick() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(
            (0..3)
                .map(|_| Err(ModelError::Transient("down".into())))
                .collect(),
        );
        let mut agent = session(&db, (exp, repo), 0, model, fast_settings()).await;
        let err = agent.tick().await.unwrap_err();
        assert!(matches!(err, TickError::Model { attempts: 3, .. }));
        assert_eq!(agent.state(), AgentState::Failed);
        // Only the turn-start was appended.
        assert_eq!(log(&db, exp, 0).await.len(), 1);
    }

    #[tokio::test]
    async fn test_overflow_is_fatal() {
        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![]);
        let settings = EngineSettings {
            context_budget: 5,
            ..fast_settings()
        };
        let mut agent = session(&db, (exp, repo), 0, model.clone(), settings).await;
        let err = agent.tick().await.unwrap_err();
        assert!(matches!(err, TickError::ContextOverflow { budget: 5, .. }));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_truncation_persists_cursor() {
        let (db, exp, repo) = fixture(2).await;
        let round = |id: &str| {
            Ok(reply(vec![
                ContentPart::text("x".repeat(2000)),
                call(id, "list_pull_requests", json!({})),
            ]))
        };
        let model = ScriptedModel::new(vec![round("r1"), round("r2"), round("r3"), round("r4")]);
        let settings = EngineSettings {
            context_budget: 1400,
            ..fast_settings()
        };
        let mut agent = session(&db, (exp, repo), 0, model.clone(), settings).await;
        for _ in 0..4 {
            agent.tick().await.unwrap();
        }

        let requests = model.requests();
        assert_eq!(requests[2].messages.len(), 5);
        // Fourth request drops the first round but keeps the turn-start.
        let fourth = &requests[3];
        assert_eq!(fourth.messages.len(), 5);
        assert!(fourth.messages[0].content.iter().all(ContentPart::is_text));
        assert_eq!(agent.window().inner_start(), 3);

        let cursor = db.call(move |db| db.load_cursor(exp, 0)).await.unwrap();
        assert_eq!(cursor.loop_start, 0);
        assert_eq!(cursor.inner_start, 3);

        // A fresh session resumes from the stored cursor.
        let resumed = session(&db, (exp, repo), 0, ScriptedModel::new(vec![]), fast_settings()).await;
        assert_eq!(resumed.window().inner_start(), 3);
        assert_eq!(resumed.state(), AgentState::HasPendingTurn);
    }

    #[tokio::test]
    async fn test_pause_when_pr_fully_approved() {
        let (db, exp, repo) = fixture(2).await;
        db.call(move |db| db.create_pull_request(repo, 0, "Fix", "", "fix", "main"))
            .await
            .unwrap();

        let model = ScriptedModel::new(vec![Ok(reply(vec![call(
            "rv",
            "review_pull_request",
            json!({"pr_number": 1, "decision": "approve", "content": "ship it"}),
        )]))]);
        let mut reviewer = session(&db, (exp, repo), 1, model.clone(), fast_settings()).await;
        assert_eq!(
            reviewer.tick().await.unwrap(),
            TickOutcome::Paused { pr_number: 1 }
        );
        assert_eq!(reviewer.state(), AgentState::Paused { pr_number: 1 });

        // While the PR stays approved, ticking does not call the model.
        assert_eq!(
            reviewer.tick().await.unwrap(),
            TickOutcome::Paused { pr_number: 1 }
        );
        assert_eq!(model.requests().len(), 1);

        // Once a human merges it, the agent resumes.
        db.call(move |db| db.update_pull_request_status(repo, 1, crate::store::models::PrStatus::Merged))
            .await
            .unwrap();
        assert!(matches!(
            reviewer.tick().await.unwrap(),
            TickOutcome::Continued { .. }
        ));
    }

    #[tokio::test]
    async fn test_restarted_session_stays_paused_on_approved_pr() {
        use crate::store::models::ReviewDecision;

        let (db, exp, repo) = fixture(2).await;
        db.call(move |db| {
            db.create_pull_request(repo, 0, "Fix", "", "fix", "main")?;
            db.submit_review(repo, 1, 1, Some(ReviewDecision::Approve), "")?;
            Ok(())
        })
        .await
        .unwrap();

        let model = ScriptedModel::new(vec![Ok(reply(vec![call(
            "c2",
            "create_pull_request",
            json!({"title": "Another", "source_branch": "another"}),
        )]))]);
        let mut author = session(&db, (exp, repo), 0, model.clone(), fast_settings()).await;
        assert_eq!(author.state(), AgentState::Paused { pr_number: 1 });

        assert_eq!(
            author.tick().await.unwrap(),
            TickOutcome::Paused { pr_number: 1 }
        );
        assert!(model.requests().is_empty());
        assert!(log(&db, exp, 0).await.is_empty());
        let prs = db
            .call(move |db| db.list_pull_requests(repo, None))
            .await
            .unwrap();
        assert_eq!(prs.len(), 1);
    }

    #[tokio::test]
    async fn test_running_session_pauses_on_approval_by_another_agent() {
        use crate::store::models::ReviewDecision;

        let (db, exp, repo) = fixture(2).await;
        let model = ScriptedModel::new(vec![Ok(reply(vec![call(
            "c1",
            "create_pull_request",
            json!({"title": "Fix", "source_branch": "fix"}),
        )]))]);
        let mut author = session(&db, (exp, repo), 0, model.clone(), fast_settings()).await;
        assert_eq!(
            author.tick().await.unwrap(),
            TickOutcome::Continued { tool_calls: 1 }
        );

        db.call(move |db| db.submit_review(repo, 1, 1, Some(ReviewDecision::Approve), "ok"))
            .await
            .unwrap();

        assert_eq!(
            author.tick().await.unwrap(),
            TickOutcome::Paused { pr_number: 1 }
        );
        assert_eq!(model.requests().len(), 1);
    }
}
