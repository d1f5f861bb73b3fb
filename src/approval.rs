//! Pull-request approval state machine.
//!
//! A read-side projection over the current review rows of open pull requests.
//! Nothing is persisted here; every query recomputes from the reviews, so the
//! only write that needs care is the review upsert itself (see
//! [`Db::submit_review`](crate::store::db::Db::submit_review), which upserts
//! and re-evaluates inside one transaction).
//!
//! | Input                          | Rule                                         |
//! |--------------------------------|----------------------------------------------|
//! | reviews with decision approve  | counted once per distinct non-author reviewer |
//! | any request_changes            | blocks the PR regardless of approvals         |
//! | required approvals             | `agent_count - 1`, never below zero           |

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::store::models::{PrStatus, PullRequest, Review, ReviewDecision};

/// Derived approval state for one pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatus {
    pub pr_number: i64,
    pub approvals: usize,
    pub required: usize,
    pub blocked: bool,
    pub open: bool,
}

impl ApprovalStatus {
    /// Compute the status of `pr` from its current reviews.
    pub fn evaluate(pr: &PullRequest, reviews: &[Review], agent_count: i64) -> Self {
        let approvers: BTreeSet<i64> = reviews
            .iter()
            .filter(|r| r.reviewer != pr.author)
            .filter(|r| r.decision == Some(ReviewDecision::Approve))
            .map(|r| r.reviewer)
            .collect();
        let blocked = reviews
            .iter()
            .any(|r| r.decision == Some(ReviewDecision::RequestChanges));

        Self {
            pr_number: pr.number,
            approvals: approvers.len(),
            required: required_approvals(agent_count),
            blocked,
            open: pr.status == PrStatus::Open,
        }
    }

    /// Enough approvals, nothing blocking, and still open.
    ///
    /// With `required == 0` (a single-agent run) any open PR without a
    /// `request_changes` review qualifies immediately.
    pub fn is_fully_approved(&self) -> bool {
        self.open && !self.blocked && self.approvals >= self.required
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} approvals", self.approvals, self.required)?;
        if self.blocked {
            write!(f, ", changes requested")?;
        }
        if self.is_fully_approved() {
            write!(f, ", fully approved")?;
        }
        Ok(())
    }
}

/// Every agent except the author must approve.
pub fn required_approvals(agent_count: i64) -> usize {
    agent_count.saturating_sub(1).max(0) as usize
}

/// The first fully-approved PR (lowest number), if any.
pub fn first_fully_approved<'a>(
    statuses: impl IntoIterator<Item = &'a ApprovalStatus>,
) -> Option<ApprovalStatus> {
    statuses
        .into_iter()
        .filter(|s| s.is_fully_approved())
        .min_by_key(|s| s.pr_number)
        .copied()
}
