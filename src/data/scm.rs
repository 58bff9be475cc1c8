//! Pull-request data exchanged with SCM plugins, and the merge-readiness policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pull request an SCM plugin found for a session's branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrInfo {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub repo: String,
    pub branch: String,
    pub base_branch: String,
    #[serde(default)]
    pub is_draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Passing,
    Failing,
    Pending,
    /// No checks configured
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    pub status: CiStatus,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    ReviewRequired,
    /// Repository has no review requirement
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub state: ReviewState,
    #[serde(default)]
    pub body: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// An unresolved human review comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: String,
    pub author: String,
    pub body: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    pub url: String,
}

/// A comment left by a bot (linters, security scanners, review bots).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomatedComment {
    pub id: String,
    pub bot_name: String,
    pub body: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    pub url: String,
}

/// Whether a pull request can be merged right now, and if not, why.
///
/// Derived from live PR state on every call; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReadiness {
    pub mergeable: bool,
    pub ci_passing: bool,
    pub approved: bool,
    pub no_conflicts: bool,
    /// Ordered so the first entry is the primary reason
    pub blockers: Vec<String>,
}

impl MergeReadiness {
    /// Aggregate PR facts into a readiness verdict.
    ///
    /// Blockers are appended in a fixed order: CI, changes requested,
    /// review required, conflicts, draft. Ready iff there are no blockers.
    pub fn evaluate(
        ci: CiStatus,
        decision: ReviewDecision,
        has_conflicts: bool,
        is_draft: bool,
    ) -> Self {
        let mut blockers = Vec::new();

        let ci_passing = matches!(ci, CiStatus::Passing | CiStatus::None);
        match ci {
            CiStatus::Failing => blockers.push("CI is failing".to_string()),
            CiStatus::Pending => blockers.push("CI checks are still running".to_string()),
            CiStatus::Passing | CiStatus::None => {}
        }

        let approved = matches!(decision, ReviewDecision::Approved | ReviewDecision::None);
        match decision {
            ReviewDecision::ChangesRequested => {
                blockers.push("Changes requested in review".to_string())
            }
            ReviewDecision::ReviewRequired => blockers.push("Review required".to_string()),
            ReviewDecision::Approved | ReviewDecision::None => {}
        }

        if has_conflicts {
            blockers.push("Merge conflicts".to_string());
        }

        if is_draft {
            blockers.push("PR is still a draft".to_string());
        }

        Self {
            mergeable: blockers.is_empty(),
            ci_passing,
            approved,
            no_conflicts: !has_conflicts,
            blockers,
        }
    }

    pub fn primary_blocker(&self) -> Option<&str> {
        self.blockers.first().map(String::as_str)
    }
}

/// Condensed PR status persisted on the session to detect PR transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Draft,
    CiFailing,
    ChangesRequested,
    Approved,
    Mergeable,
    Merged,
    Closed,
}

impl PrStatus {
    /// Collapse live PR facts into one status, most terminal first.
    pub fn derive(
        pr: &PrInfo,
        state: PrState,
        ci: CiStatus,
        decision: ReviewDecision,
        readiness: &MergeReadiness,
    ) -> Self {
        match state {
            PrState::Merged => return Self::Merged,
            PrState::Closed => return Self::Closed,
            PrState::Open => {}
        }

        if ci == CiStatus::Failing {
            Self::CiFailing
        } else if decision == ReviewDecision::ChangesRequested {
            Self::ChangesRequested
        } else if pr.is_draft {
            Self::Draft
        } else if readiness.mergeable {
            Self::Mergeable
        } else if decision == ReviewDecision::Approved {
            Self::Approved
        } else {
            Self::Open
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged | Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Draft => "draft",
            Self::CiFailing => "ci_failing",
            Self::ChangesRequested => "changes_requested",
            Self::Approved => "approved",
            Self::Mergeable => "mergeable",
            Self::Merged => "merged",
            Self::Closed => "closed",
        }
    }
}
