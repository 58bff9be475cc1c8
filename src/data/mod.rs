//! Core data model: sessions, runtime handles, activity states.

pub mod event;
pub mod scm;

pub use event::{EventPriority, EventType, NotifyAction, OrchestratorEvent};
pub use scm::{
    AutomatedComment, CiCheck, CiStatus, MergeReadiness, PrInfo, PrState, PrStatus, Review,
    ReviewComment, ReviewDecision, ReviewState,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One tracked run of a coding agent against a project/branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    /// Set once a working branch exists
    #[serde(default)]
    pub branch: Option<String>,
    pub agent_name: String,
    /// Absent until launched, or after the runtime was torn down
    #[serde(default)]
    pub runtime_handle: Option<RuntimeHandle>,
    #[serde(default)]
    pub issue_id: Option<String>,
    #[serde(default)]
    pub last_known_activity: ActivityState,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_pr_status: Option<PrStatus>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            branch: None,
            agent_name: agent_name.into(),
            runtime_handle: None,
            issue_id: None,
            last_known_activity: ActivityState::Unknown,
            last_checked_at: None,
            last_pr_status: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_runtime(mut self, handle: RuntimeHandle) -> Self {
        self.runtime_handle = Some(handle);
        self
    }

    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    /// Apply a lifecycle patch in place.
    pub fn apply(&mut self, patch: &SessionPatch) {
        if let Some(activity) = patch.last_known_activity {
            self.last_known_activity = activity;
        }
        if let Some(checked_at) = patch.last_checked_at {
            self.last_checked_at = Some(checked_at);
        }
        if let Some(pr_status) = patch.last_pr_status {
            self.last_pr_status = Some(pr_status);
        }
    }
}

/// The fields the lifecycle manager is allowed to write.
///
/// Every other session field is owned by whoever launched the session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionPatch {
    pub last_known_activity: Option<ActivityState>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_pr_status: Option<PrStatus>,
}

impl SessionPatch {
    pub fn checked_at(at: DateTime<Utc>) -> Self {
        Self {
            last_checked_at: Some(at),
            ..Default::default()
        }
    }

    pub fn with_activity(mut self, activity: ActivityState) -> Self {
        self.last_known_activity = Some(activity);
        self
    }

    pub fn with_pr_status(mut self, status: PrStatus) -> Self {
        self.last_pr_status = Some(status);
        self
    }
}

/// Opaque binding to the mechanism hosting a session's process.
///
/// `id` and `data` are interpreted only by the runtime plugin named by
/// `runtime_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeHandle {
    pub runtime_name: String,
    pub id: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

impl RuntimeHandle {
    pub fn new(runtime_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            runtime_name: runtime_name.into(),
            id: id.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

/// Whether a session's agent is working, waiting, gone, or indeterminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Idle,
    Active,
    Exited,
    #[default]
    Unknown,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Exited => "exited",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why an activity check could not settle on a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "failures")]
pub enum UnknownReason {
    /// Evidence exists but cannot be scoped to this session
    Ambiguous,
    /// The agent plugin does not implement activity detection
    NotSupported,
    /// The agent plugin failed this many times in a row
    RepeatedFailures(u32),
}

/// Result of asking an agent plugin what a session is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ActivityDetection {
    Known(ActivityState),
    Unknown(UnknownReason),
}

impl ActivityDetection {
    /// Wrap a state, folding `ActivityState::Unknown` into `Unknown(Ambiguous)`.
    pub fn known(state: ActivityState) -> Self {
        match state {
            ActivityState::Unknown => Self::Unknown(UnknownReason::Ambiguous),
            state => Self::Known(state),
        }
    }

    pub fn state(&self) -> ActivityState {
        match self {
            Self::Known(state) => *state,
            Self::Unknown(_) => ActivityState::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

/// Information handed to an agent plugin when building a launch command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentLaunchConfig {
    pub session_id: String,
    pub project_id: String,
    pub workspace_path: Option<String>,
    pub prompt: Option<String>,
    pub issue_id: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub permissions: Option<String>,
}

/// What an agent plugin can tell us about the conversation behind a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSessionInfo {
    pub summary: Option<String>,
    pub agent_session_id: Option<String>,
    pub cost_usd: Option<f64>,
}
