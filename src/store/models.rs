use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: i64,
    pub name: String,
    pub problem: String,
    pub model: String,
    pub agent_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub experiment_id: i64,
    pub path: String,
    pub remote_url: String,
    pub main_branch: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Closed,
    Merged,
}

impl PrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    /// Only open PRs can move, and only to a terminal state.
    pub fn can_transition_to(&self, next: PrStatus) -> bool {
        matches!(
            (self, next),
            (PrStatus::Open, PrStatus::Merged) | (PrStatus::Open, PrStatus::Closed)
        )
    }
}

impl std::fmt::Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "merged" => Ok(Self::Merged),
            _ => Err(format!("Invalid pull request status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: i64,
    pub experiment_id: i64,
    pub repository_id: i64,
    pub number: i64,
    pub author: i64,
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub status: PrStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl PullRequest {
    /// One-line summary used in tool output and turn-start messages.
    pub fn header(&self) -> String {
        format!(
            "#{} [{}] {} (author: agent {}, {} -> {})",
            self.number,
            self.status,
            self.title,
            self.author,
            self.source_branch,
            self.target_branch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    RequestChanges,
    Comment,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::RequestChanges => "request_changes",
            Self::Comment => "comment",
        }
    }
}

impl std::fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "request_changes" => Ok(Self::RequestChanges),
            "comment" => Ok(Self::Comment),
            _ => Err(format!(
                "Invalid review decision '{}'. Valid values: approve, request_changes, comment",
                s
            )),
        }
    }
}

/// One row per (pull request, reviewer); a later review replaces the earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub pull_request_id: i64,
    pub reviewer: i64,
    pub decision: Option<ReviewDecision>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

/// An agent's current pick for the winning solution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub experiment_id: i64,
    pub agent_index: i64,
    pub pr_number: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusUpdateKind {
    TodoList,
    Progress,
    Question,
}

impl StatusUpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TodoList => "todo_list",
            Self::Progress => "progress",
            Self::Question => "question",
        }
    }
}

impl std::fmt::Display for StatusUpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusUpdateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo_list" => Ok(Self::TodoList),
            "progress" => Ok(Self::Progress),
            "question" => Ok(Self::Question),
            _ => Err(format!(
                "Invalid status update type '{}'. Valid values: todo_list, progress, question",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub id: i64,
    pub experiment_id: i64,
    pub agent_index: i64,
    pub kind: StatusUpdateKind,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Pending,
    Answered,
    Timeout,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "answered" => Ok(Self::Answered),
            "timeout" => Ok(Self::Timeout),
            _ => Err(format!("Invalid question status: {}", s)),
        }
    }
}

/// A question an agent asked a human, answered out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub experiment_id: i64,
    pub agent_index: i64,
    pub question: String,
    pub answer: Option<String>,
    pub status: QuestionStatus,
    pub created_at: String,
    pub answered_at: Option<String>,
}

/// Persisted context-window cursors for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCursor {
    pub loop_start: i64,
    pub inner_start: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_status_only_leaves_open() {
        assert!(PrStatus::Open.can_transition_to(PrStatus::Merged));
        assert!(PrStatus::Open.can_transition_to(PrStatus::Closed));
        assert!(!PrStatus::Open.can_transition_to(PrStatus::Open));
        assert!(!PrStatus::Merged.can_transition_to(PrStatus::Closed));
        assert!(!PrStatus::Closed.can_transition_to(PrStatus::Open));
    }

    #[test]
    fn review_decision_rejects_unknown_values() {
        assert_eq!(
            "request_changes".parse::<ReviewDecision>().unwrap(),
            ReviewDecision::RequestChanges
        );
        let err = "lgtm".parse::<ReviewDecision>().unwrap_err();
        assert!(err.contains("approve, request_changes, comment"));
    }

    #[test]
    fn pr_header_names_number_status_and_branches() {
        let pr = PullRequest {
            id: 1,
            experiment_id: 1,
            repository_id: 1,
            number: 3,
            author: 2,
            source_branch: "fix-parser".into(),
            target_branch: "main".into(),
            title: "Fix parser".into(),
            description: String::new(),
            status: PrStatus::Open,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(
            pr.header(),
            "#3 [open] Fix parser (author: agent 2, fix-parser -> main)"
        );
    }

    #[test]
    fn status_update_kind_parses_snake_case() {
        assert_eq!(
            "todo_list".parse::<StatusUpdateKind>().unwrap(),
            StatusUpdateKind::TodoList
        );
        assert!("todo".parse::<StatusUpdateKind>().is_err());
    }
}
