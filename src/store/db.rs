use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;
use crate::approval::ApprovalStatus;
use crate::conversation::{Message, NewMessage, Role, Usage};

/// Async-safe handle to the quorum database.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, so synchronous SQLite I/O never ties up
/// async worker threads. The mutex also serialises writers inside this
/// process, which is what makes the review upsert + approval check atomic.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Result of [`Db::submit_review`].
#[derive(Debug, Clone)]
pub enum ReviewSubmission {
    Recorded {
        review: Review,
        approval: ApprovalStatus,
    },
    SelfReview,
    PullRequestNotFound,
}

pub struct Db {
    conn: Connection,
}

impl Db {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        // WAL lets `quorum answer` write while a run holds the database open.
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS experiments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    problem TEXT NOT NULL DEFAULT '',
                    model TEXT NOT NULL,
                    agent_count INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS repositories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
                    path TEXT NOT NULL,
                    remote_url TEXT NOT NULL DEFAULT '',
                    main_branch TEXT NOT NULL DEFAULT 'main',
                    next_pr_number INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS pull_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                    number INTEGER NOT NULL,
                    author INTEGER NOT NULL,
                    source_branch TEXT NOT NULL,
                    target_branch TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'open',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(repository_id, number)
                );

                CREATE TABLE IF NOT EXISTS reviews (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pull_request_id INTEGER NOT NULL REFERENCES pull_requests(id) ON DELETE CASCADE,
                    reviewer INTEGER NOT NULL,
                    decision TEXT,
                    content TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(pull_request_id, reviewer)
                );

                CREATE TABLE IF NOT EXISTS votes (
                    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
                    agent_index INTEGER NOT NULL,
                    pr_number INTEGER NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (experiment_id, agent_index)
                );

                CREATE TABLE IF NOT EXISTS status_updates (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
                    agent_index INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
                    agent_index INTEGER NOT NULL,
                    question TEXT NOT NULL,
                    answer TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    answered_at TEXT
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
                    agent_index INTEGER NOT NULL,
                    position INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    input_tokens INTEGER NOT NULL DEFAULT 0,
                    output_tokens INTEGER NOT NULL DEFAULT 0,
                    cost_usd REAL NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(experiment_id, agent_index, position)
                );

                CREATE TABLE IF NOT EXISTS agent_cursors (
                    experiment_id INTEGER NOT NULL REFERENCES experiments(id) ON DELETE CASCADE,
                    agent_index INTEGER NOT NULL,
                    loop_start INTEGER NOT NULL DEFAULT 0,
                    inner_start INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (experiment_id, agent_index)
                );

                CREATE INDEX IF NOT EXISTS idx_repositories_experiment ON repositories(experiment_id);
                CREATE INDEX IF NOT EXISTS idx_pull_requests_status ON pull_requests(repository_id, status);
                CREATE INDEX IF NOT EXISTS idx_reviews_pr ON reviews(pull_request_id);
                CREATE INDEX IF NOT EXISTS idx_status_updates_experiment ON status_updates(experiment_id);
                CREATE INDEX IF NOT EXISTS idx_questions_status ON questions(experiment_id, status);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Experiments & repositories ────────────────────────────────────

    pub fn create_experiment(
        &self,
        name: &str,
        problem: &str,
        model: &str,
        agent_count: i64,
    ) -> Result<Experiment> {
        if agent_count < 1 {
            anyhow::bail!("An experiment needs at least one agent, got {}", agent_count);
        }
        self.conn
            .execute(
                "INSERT INTO experiments (name, problem, model, agent_count) VALUES (?1, ?2, ?3, ?4)",
                params![name, problem, model, agent_count],
            )
            .context("Failed to insert experiment")?;
        let id = self.conn.last_insert_rowid();
        self.get_experiment(id)?
            .context("Experiment not found after insert")
    }

    pub fn get_experiment(&self, id: i64) -> Result<Option<Experiment>> {
        self.conn
            .query_row(
                "SELECT id, name, problem, model, agent_count, created_at FROM experiments WHERE id = ?1",
                params![id],
                experiment_from_row,
            )
            .optional()
            .context("Failed to query experiment")
    }

    /// The most recently created experiment, used when the CLI is not told which one.
    pub fn latest_experiment(&self) -> Result<Option<Experiment>> {
        self.conn
            .query_row(
                "SELECT id, name, problem, model, agent_count, created_at FROM experiments ORDER BY id DESC LIMIT 1",
                [],
                experiment_from_row,
            )
            .optional()
            .context("Failed to query latest experiment")
    }

    pub fn create_repository(
        &self,
        experiment_id: i64,
        path: &str,
        remote_url: &str,
        main_branch: &str,
    ) -> Result<Repository> {
        self.conn
            .execute(
                "INSERT INTO repositories (experiment_id, path, remote_url, main_branch) VALUES (?1, ?2, ?3, ?4)",
                params![experiment_id, path, remote_url, main_branch],
            )
            .context("Failed to insert repository")?;
        let id = self.conn.last_insert_rowid();
        self.get_repository(id)?
            .context("Repository not found after insert")
    }

    pub fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        self.conn
            .query_row(
                "SELECT id, experiment_id, path, remote_url, main_branch, created_at FROM repositories WHERE id = ?1",
                params![id],
                repository_from_row,
            )
            .optional()
            .context("Failed to query repository")
    }

    /// The experiment's primary (first) repository.
    pub fn repository_for_experiment(&self, experiment_id: i64) -> Result<Option<Repository>> {
        self.conn
            .query_row(
                "SELECT id, experiment_id, path, remote_url, main_branch, created_at
                 FROM repositories WHERE experiment_id = ?1 ORDER BY id LIMIT 1",
                params![experiment_id],
                repository_from_row,
            )
            .optional()
            .context("Failed to query repository for experiment")
    }

    // ── Pull requests ─────────────────────────────────────────────────

    /// Insert a PR with the repository's next number.
    ///
    /// The counter lives on the repository row and only ever increments, so
    /// numbers are never reused even if a PR row is later deleted.
    pub fn create_pull_request(
        &self,
        repository_id: i64,
        author: i64,
        title: &str,
        description: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<PullRequest> {
        // Use unchecked_transaction so the counter bump and insert are atomic.
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let number: i64 = tx
            .query_row(
                "SELECT next_pr_number FROM repositories WHERE id = ?1",
                params![repository_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read next PR number")?
            .with_context(|| format!("Repository {} not found", repository_id))?;

        tx.execute(
            "UPDATE repositories SET next_pr_number = ?1 WHERE id = ?2",
            params![number + 1, repository_id],
        )
        .context("Failed to bump PR counter")?;

        tx.execute(
            "INSERT INTO pull_requests (repository_id, number, author, source_branch, target_branch, title, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![repository_id, number, author, source_branch, target_branch, title, description],
        )
        .context("Failed to insert pull request")?;

        tx.commit().context("Failed to commit pull request")?;
        self.get_pull_request(repository_id, number)?
            .context("Pull request not found after insert")
    }

    pub fn get_pull_request(&self, repository_id: i64, number: i64) -> Result<Option<PullRequest>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE pr.repository_id = ?1 AND pr.number = ?2", PR_SELECT),
                params![repository_id, number],
                PullRequestRow::from_row,
            )
            .optional()
            .context("Failed to query pull request")?;
        row.map(PullRequestRow::into_pull_request).transpose()
    }

    /// PRs in a repository, oldest first, optionally filtered by status.
    pub fn list_pull_requests(
        &self,
        repository_id: i64,
        status: Option<PrStatus>,
    ) -> Result<Vec<PullRequest>> {
        let status = status.map(|s| s.as_str());
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE pr.repository_id = ?1 AND (?2 IS NULL OR pr.status = ?2) ORDER BY pr.number",
                PR_SELECT
            ))
            .context("Failed to prepare list_pull_requests")?;
        let rows = stmt
            .query_map(params![repository_id, status], PullRequestRow::from_row)
            .context("Failed to query pull requests")?;
        let mut prs = Vec::new();
        for row in rows {
            prs.push(row.context("Failed to read pull request row")?.into_pull_request()?);
        }
        Ok(prs)
    }

    /// Open PRs across every repository of an experiment.
    pub fn list_open_pull_requests(&self, experiment_id: i64) -> Result<Vec<PullRequest>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE r.experiment_id = ?1 AND pr.status = 'open' ORDER BY pr.repository_id, pr.number",
                PR_SELECT
            ))
            .context("Failed to prepare list_open_pull_requests")?;
        let rows = stmt
            .query_map(params![experiment_id], PullRequestRow::from_row)
            .context("Failed to query open pull requests")?;
        let mut prs = Vec::new();
        for row in rows {
            prs.push(row.context("Failed to read pull request row")?.into_pull_request()?);
        }
        Ok(prs)
    }

    /// Move an open PR to a terminal state. Any other transition is rejected.
    pub fn update_pull_request_status(
        &self,
        repository_id: i64,
        number: i64,
        status: PrStatus,
    ) -> Result<PullRequest> {
        let pr = self
            .get_pull_request(repository_id, number)?
            .with_context(|| format!("Pull request #{} not found", number))?;
        if !pr.status.can_transition_to(status) {
            anyhow::bail!(
                "Pull request #{} cannot move from {} to {}",
                number,
                pr.status,
                status
            );
        }
        self.conn
            .execute(
                "UPDATE pull_requests SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), pr.id],
            )
            .context("Failed to update pull request status")?;
        self.get_pull_request(repository_id, number)?
            .context("Pull request not found after status update")
    }

    /// Remove a pull request row. Only exercised by tests that check
    /// numbers stay unique after a deletion.
    #[cfg(test)]
    pub fn delete_pull_request(&self, repository_id: i64, number: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM pull_requests WHERE repository_id = ?1 AND number = ?2",
                params![repository_id, number],
            )
            .context("Failed to delete pull request")?;
        Ok(affected > 0)
    }

    // ── Reviews & approval ────────────────────────────────────────────

    /// Upsert `reviewer`'s review and recompute the PR's approval state.
    ///
    /// Both happen in one transaction so two concurrent reviews can never
    /// both observe the pre-approval state.
    pub fn submit_review(
        &self,
        repository_id: i64,
        number: i64,
        reviewer: i64,
        decision: Option<ReviewDecision>,
        content: &str,
    ) -> Result<ReviewSubmission> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let Some(pr) = self.get_pull_request(repository_id, number)? else {
            return Ok(ReviewSubmission::PullRequestNotFound);
        };
        if pr.author == reviewer {
            return Ok(ReviewSubmission::SelfReview);
        }

        tx.execute(
            "INSERT INTO reviews (pull_request_id, reviewer, decision, content)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(pull_request_id, reviewer) DO UPDATE SET
                decision = excluded.decision,
                content = excluded.content,
                updated_at = datetime('now')",
            params![pr.id, reviewer, decision.map(|d| d.as_str()), content],
        )
        .context("Failed to upsert review")?;

        let reviews = self.list_reviews(pr.id)?;
        let agent_count = self.agent_count_for_repository(repository_id)?;
        let approval = ApprovalStatus::evaluate(&pr, &reviews, agent_count);
        let review = reviews
            .into_iter()
            .find(|r| r.reviewer == reviewer)
            .context("Review not found after upsert")?;

        tx.commit().context("Failed to commit review")?;
        Ok(ReviewSubmission::Recorded { review, approval })
    }

    pub fn list_reviews(&self, pull_request_id: i64) -> Result<Vec<Review>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, pull_request_id, reviewer, decision, content, created_at, updated_at
                 FROM reviews WHERE pull_request_id = ?1 ORDER BY reviewer",
            )
            .context("Failed to prepare list_reviews")?;
        let rows = stmt
            .query_map(params![pull_request_id], |row| {
                Ok(ReviewRow {
                    id: row.get(0)?,
                    pull_request_id: row.get(1)?,
                    reviewer: row.get(2)?,
                    decision: row.get(3)?,
                    content: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })
            .context("Failed to query reviews")?;
        let mut reviews = Vec::new();
        for row in rows {
            reviews.push(row.context("Failed to read review row")?.into_review()?);
        }
        Ok(reviews)
    }

    /// Approval state of every open PR in the experiment, recomputed from reviews.
    pub fn open_pull_request_approvals(
        &self,
        experiment_id: i64,
    ) -> Result<Vec<(PullRequest, ApprovalStatus)>> {
        let experiment = self
            .get_experiment(experiment_id)?
            .with_context(|| format!("Experiment {} not found", experiment_id))?;
        let mut result = Vec::new();
        for pr in self.list_open_pull_requests(experiment_id)? {
            let reviews = self.list_reviews(pr.id)?;
            let status = ApprovalStatus::evaluate(&pr, &reviews, experiment.agent_count);
            result.push((pr, status));
        }
        Ok(result)
    }

    fn agent_count_for_repository(&self, repository_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT e.agent_count FROM experiments e
                 JOIN repositories r ON r.experiment_id = e.id WHERE r.id = ?1",
                params![repository_id],
                |row| row.get(0),
            )
            .context("Failed to read agent count")
    }

    // ── Votes ─────────────────────────────────────────────────────────

    pub fn upsert_vote(&self, experiment_id: i64, agent_index: i64, pr_number: i64) -> Result<Vote> {
        self.conn
            .execute(
                "INSERT INTO votes (experiment_id, agent_index, pr_number) VALUES (?1, ?2, ?3)
                 ON CONFLICT(experiment_id, agent_index) DO UPDATE SET
                    pr_number = excluded.pr_number,
                    updated_at = datetime('now')",
                params![experiment_id, agent_index, pr_number],
            )
            .context("Failed to upsert vote")?;
        self.conn
            .query_row(
                "SELECT experiment_id, agent_index, pr_number, updated_at FROM votes
                 WHERE experiment_id = ?1 AND agent_index = ?2",
                params![experiment_id, agent_index],
                vote_from_row,
            )
            .context("Vote not found after upsert")
    }

    pub fn list_votes(&self, experiment_id: i64) -> Result<Vec<Vote>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT experiment_id, agent_index, pr_number, updated_at FROM votes
                 WHERE experiment_id = ?1 ORDER BY agent_index",
            )
            .context("Failed to prepare list_votes")?;
        let rows = stmt
            .query_map(params![experiment_id], vote_from_row)
            .context("Failed to query votes")?;
        let mut votes = Vec::new();
        for row in rows {
            votes.push(row.context("Failed to read vote row")?);
        }
        Ok(votes)
    }

    // ── Status updates ────────────────────────────────────────────────

    pub fn create_status_update(
        &self,
        experiment_id: i64,
        agent_index: i64,
        kind: StatusUpdateKind,
        content: &str,
    ) -> Result<StatusUpdate> {
        self.conn
            .execute(
                "INSERT INTO status_updates (experiment_id, agent_index, kind, content) VALUES (?1, ?2, ?3, ?4)",
                params![experiment_id, agent_index, kind.as_str(), content],
            )
            .context("Failed to insert status update")?;
        let id = self.conn.last_insert_rowid();
        let mut updates = self.query_status_updates("WHERE id = ?1", params![id])?;
        updates.pop().context("Status update not found after insert")
    }

    /// Most recent first.
    pub fn recent_status_updates(&self, experiment_id: i64, limit: usize) -> Result<Vec<StatusUpdate>> {
        self.query_status_updates(
            "WHERE experiment_id = ?1 ORDER BY id DESC LIMIT ?2",
            params![experiment_id, limit as i64],
        )
    }

    fn query_status_updates(
        &self,
        clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<StatusUpdate>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT id, experiment_id, agent_index, kind, content, created_at FROM status_updates {}",
                clause
            ))
            .context("Failed to prepare status update query")?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query status updates")?;
        let mut updates = Vec::new();
        for row in rows {
            let (id, experiment_id, agent_index, kind, content, created_at) =
                row.context("Failed to read status update row")?;
            updates.push(StatusUpdate {
                id,
                experiment_id,
                agent_index,
                kind: StatusUpdateKind::from_str(&kind).map_err(|e| anyhow::anyhow!(e))?,
                content,
                created_at,
            });
        }
        Ok(updates)
    }

    // ── Questions ─────────────────────────────────────────────────────

    pub fn create_question(&self, experiment_id: i64, agent_index: i64, question: &str) -> Result<Question> {
        self.conn
            .execute(
                "INSERT INTO questions (experiment_id, agent_index, question) VALUES (?1, ?2, ?3)",
                params![experiment_id, agent_index, question],
            )
            .context("Failed to insert question")?;
        let id = self.conn.last_insert_rowid();
        self.get_question(id)?.context("Question not found after insert")
    }

    pub fn get_question(&self, id: i64) -> Result<Option<Question>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", QUESTION_SELECT),
                params![id],
                QuestionRow::from_row,
            )
            .optional()
            .context("Failed to query question")?;
        row.map(QuestionRow::into_question).transpose()
    }

    pub fn list_questions(&self, experiment_id: i64, status: Option<QuestionStatus>) -> Result<Vec<Question>> {
        let status = status.map(|s| s.as_str());
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE experiment_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY id",
                QUESTION_SELECT
            ))
            .context("Failed to prepare list_questions")?;
        let rows = stmt
            .query_map(params![experiment_id, status], QuestionRow::from_row)
            .context("Failed to query questions")?;
        let mut questions = Vec::new();
        for row in rows {
            questions.push(row.context("Failed to read question row")?.into_question()?);
        }
        Ok(questions)
    }

    /// Record a human answer. Only pending questions can be answered.
    pub fn answer_question(&self, id: i64, answer: &str) -> Result<Question> {
        let affected = self
            .conn
            .execute(
                "UPDATE questions SET answer = ?1, status = 'answered', answered_at = datetime('now')
                 WHERE id = ?2 AND status = 'pending'",
                params![answer, id],
            )
            .context("Failed to answer question")?;
        let question = self
            .get_question(id)?
            .with_context(|| format!("Question {} not found", id))?;
        if affected == 0 {
            anyhow::bail!("Question {} is already {}", id, question.status);
        }
        Ok(question)
    }

    /// Mark a still-pending question as timed out and return its final state.
    ///
    /// If an answer landed just before the deadline it wins.
    pub fn expire_question(&self, id: i64) -> Result<Question> {
        self.conn
            .execute(
                "UPDATE questions SET status = 'timeout' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )
            .context("Failed to expire question")?;
        self.get_question(id)?
            .with_context(|| format!("Question {} not found", id))
    }

    // ── Conversation log ──────────────────────────────────────────────

    /// Append messages to an agent's log in one transaction.
    ///
    /// Positions continue from the current last position.
    pub fn append_messages(
        &self,
        experiment_id: i64,
        agent_index: i64,
        messages: &[NewMessage],
    ) -> Result<Vec<Message>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let last: Option<i64> = tx
            .query_row(
                "SELECT MAX(position) FROM messages WHERE experiment_id = ?1 AND agent_index = ?2",
                params![experiment_id, agent_index],
                |row| row.get(0),
            )
            .context("Failed to read last message position")?;
        let mut position = last.map_or(0, |p| p + 1);

        let mut appended = Vec::with_capacity(messages.len());
        for message in messages {
            let content =
                serde_json::to_string(&message.content).context("Failed to serialize message content")?;
            tx.execute(
                "INSERT INTO messages (experiment_id, agent_index, position, role, content, input_tokens, output_tokens, cost_usd)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    experiment_id,
                    agent_index,
                    position,
                    message.role.as_str(),
                    content,
                    message.usage.input_tokens as i64,
                    message.usage.output_tokens as i64,
                    message.usage.cost_usd,
                ],
            )
            .context("Failed to insert message")?;
            appended.push(Message {
                experiment_id,
                agent_index,
                position,
                role: message.role,
                content: message.content.clone(),
                usage: message.usage,
            });
            position += 1;
        }

        tx.commit().context("Failed to commit messages")?;
        Ok(appended)
    }

    /// An agent's full log in position order.
    pub fn list_messages(&self, experiment_id: i64, agent_index: i64) -> Result<Vec<Message>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT experiment_id, agent_index, position, role, content, input_tokens, output_tokens, cost_usd
                 FROM messages WHERE experiment_id = ?1 AND agent_index = ?2 ORDER BY position",
            )
            .context("Failed to prepare list_messages")?;
        let rows = stmt
            .query_map(params![experiment_id, agent_index], MessageRow::from_row)
            .context("Failed to query messages")?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.context("Failed to read message row")?.into_message()?);
        }
        Ok(messages)
    }

    pub fn load_cursor(&self, experiment_id: i64, agent_index: i64) -> Result<AgentCursor> {
        let cursor = self
            .conn
            .query_row(
                "SELECT loop_start, inner_start FROM agent_cursors WHERE experiment_id = ?1 AND agent_index = ?2",
                params![experiment_id, agent_index],
                |row| {
                    Ok(AgentCursor {
                        loop_start: row.get(0)?,
                        inner_start: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query agent cursor")?;
        Ok(cursor.unwrap_or_default())
    }

    /// Persist cursors; stored values never move backwards.
    pub fn save_cursor(&self, experiment_id: i64, agent_index: i64, cursor: AgentCursor) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO agent_cursors (experiment_id, agent_index, loop_start, inner_start)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(experiment_id, agent_index) DO UPDATE SET
                    loop_start = MAX(agent_cursors.loop_start, excluded.loop_start),
                    inner_start = MAX(agent_cursors.inner_start, excluded.inner_start)",
                params![experiment_id, agent_index, cursor.loop_start, cursor.inner_start],
            )
            .context("Failed to save agent cursor")?;
        Ok(())
    }
}

// ── Row helpers ───────────────────────────────────────────────────────

const PR_SELECT: &str = "SELECT pr.id, r.experiment_id, pr.repository_id, pr.number, pr.author, pr.source_branch,
        pr.target_branch, pr.title, pr.description, pr.status, pr.created_at, pr.updated_at
    FROM pull_requests pr JOIN repositories r ON r.id = pr.repository_id";

const QUESTION_SELECT: &str = "SELECT id, experiment_id, agent_index, question, answer, status, created_at, answered_at FROM questions";

fn experiment_from_row(row: &Row<'_>) -> rusqlite::Result<Experiment> {
    Ok(Experiment {
        id: row.get(0)?,
        name: row.get(1)?,
        problem: row.get(2)?,
        model: row.get(3)?,
        agent_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        experiment_id: row.get(1)?,
        path: row.get(2)?,
        remote_url: row.get(3)?,
        main_branch: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        experiment_id: row.get(0)?,
        agent_index: row.get(1)?,
        pr_number: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

struct PullRequestRow {
    id: i64,
    experiment_id: i64,
    repository_id: i64,
    number: i64,
    author: i64,
    source_branch: String,
    target_branch: String,
    title: String,
    description: String,
    status: String,
    created_at: String,
    updated_at: String,
}

impl PullRequestRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            experiment_id: row.get(1)?,
            repository_id: row.get(2)?,
            number: row.get(3)?,
            author: row.get(4)?,
            source_branch: row.get(5)?,
            target_branch: row.get(6)?,
            title: row.get(7)?,
            description: row.get(8)?,
            status: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_pull_request(self) -> Result<PullRequest> {
        Ok(PullRequest {
            id: self.id,
            experiment_id: self.experiment_id,
            repository_id: self.repository_id,
            number: self.number,
            author: self.author,
            source_branch: self.source_branch,
            target_branch: self.target_branch,
            title: self.title,
            description: self.description,
            status: PrStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ReviewRow {
    id: i64,
    pull_request_id: i64,
    reviewer: i64,
    decision: Option<String>,
    content: String,
    created_at: String,
    updated_at: String,
}

impl ReviewRow {
    fn into_review(self) -> Result<Review> {
        let decision = self
            .decision
            .as_deref()
            .map(ReviewDecision::from_str)
            .transpose()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(Review {
            id: self.id,
            pull_request_id: self.pull_request_id,
            reviewer: self.reviewer,
            decision,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct QuestionRow {
    id: i64,
    experiment_id: i64,
    agent_index: i64,
    question: String,
    answer: Option<String>,
    status: String,
    created_at: String,
    answered_at: Option<String>,
}

impl QuestionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            experiment_id: row.get(1)?,
            agent_index: row.get(2)?,
            question: row.get(3)?,
            answer: row.get(4)?,
            status: row.get(5)?,
            created_at: row.get(6)?,
            answered_at: row.get(7)?,
        })
    }

    fn into_question(self) -> Result<Question> {
        Ok(Question {
            id: self.id,
            experiment_id: self.experiment_id,
            agent_index: self.agent_index,
            question: self.question,
            answer: self.answer,
            status: QuestionStatus::from_str(&self.status).map_err(|e| anyhow::anyhow!(e))?,
            created_at: self.created_at,
            answered_at: self.answered_at,
        })
    }
}

struct MessageRow {
    experiment_id: i64,
    agent_index: i64,
    position: i64,
    role: String,
    content: String,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            experiment_id: row.get(0)?,
            agent_index: row.get(1)?,
            position: row.get(2)?,
            role: row.get(3)?,
            content: row.get(4)?,
            input_tokens: row.get(5)?,
            output_tokens: row.get(6)?,
            cost_usd: row.get(7)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        Ok(Message {
            experiment_id: self.experiment_id,
            agent_index: self.agent_index,
            position: self.position,
            role: Role::from_str(&self.role).map_err(|e| anyhow::anyhow!(e))?,
            content: serde_json::from_str(&self.content)
                .context("Failed to parse message content")?,
            usage: Usage {
                input_tokens: self.input_tokens.max(0) as u64,
                output_tokens: self.output_tokens.max(0) as u64,
                cost_usd: self.cost_usd,
            },
        })
    }
}
