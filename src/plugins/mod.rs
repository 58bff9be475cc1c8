//! Capability interfaces for the five extension points.
//!
//! Every backend is a variant behind one of these traits, selected by name
//! through the [`PluginRegistry`]. The core never inspects concrete types.

pub mod builtin;
pub mod registry;

pub use registry::{PluginFactory, PluginRegistry};

use crate::data::{
    ActivityDetection, ActivityState, AgentLaunchConfig, AgentSessionInfo, AutomatedComment,
    CiCheck, CiStatus, MergeReadiness, NotifyAction, OrchestratorEvent, PrInfo, PrState, Review,
    ReviewComment, ReviewDecision, RuntimeHandle, Session, UnknownReason,
};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Plugin-specific options from configuration.
pub type PluginOptions = HashMap<String, serde_json::Value>;

/// A named extension point in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginSlot {
    Agent,
    Runtime,
    Scm,
    Notifier,
    Terminal,
}

impl PluginSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Runtime => "runtime",
            Self::Scm => "scm",
            Self::Notifier => "notifier",
            Self::Terminal => "terminal",
        }
    }
}

impl fmt::Display for PluginSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A constructed plugin instance, tagged by slot.
#[derive(Clone)]
pub enum Plugin {
    Agent(Arc<dyn Agent>),
    Runtime(Arc<dyn Runtime>),
    Scm(Arc<dyn Scm>),
    Notifier(Arc<dyn Notifier>),
    Terminal(Arc<dyn Terminal>),
}

impl Plugin {
    pub fn slot(&self) -> PluginSlot {
        match self {
            Self::Agent(_) => PluginSlot::Agent,
            Self::Runtime(_) => PluginSlot::Runtime,
            Self::Scm(_) => PluginSlot::Scm,
            Self::Notifier(_) => PluginSlot::Notifier,
            Self::Terminal(_) => PluginSlot::Terminal,
        }
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plugin::{}", self.slot())
    }
}

/// A coding-assistant CLI: how to launch it and how to tell what it is doing.
///
/// Implementations must not keep per-call mutable state; one instance is
/// shared by every concurrent session check.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Shell command that starts the agent for a session.
    fn launch_command(&self, config: &AgentLaunchConfig) -> String;

    /// Extra environment for the launched process.
    fn environment(&self, config: &AgentLaunchConfig) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("CONDUCTOR_SESSION_ID".to_string(), config.session_id.clone());
        env
    }

    /// Classify a chunk of terminal output.
    fn detect_activity(&self, output: &str) -> ActivityState;

    /// Best-effort activity for a live session.
    ///
    /// Must return `Unknown(Ambiguous)` when evidence cannot be scoped to
    /// this session rather than guessing.
    async fn activity_state(&self, _session: &Session) -> Result<ActivityDetection> {
        Ok(ActivityDetection::Unknown(UnknownReason::NotSupported))
    }

    /// Whether the agent process itself (not just its host) is alive.
    async fn is_process_running(&self, handle: &RuntimeHandle) -> Result<bool>;

    async fn session_info(&self, _session: &Session) -> Result<Option<AgentSessionInfo>> {
        Ok(None)
    }
}

/// How a session's process is hosted (multiplexer pane, bare process, ...).
#[async_trait]
pub trait Runtime: Send + Sync {
    fn name(&self) -> &str;

    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool>;
}

/// Merge strategies an SCM plugin may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

/// Source control host: pull requests, CI, reviews.
#[async_trait]
pub trait Scm: Send + Sync {
    fn name(&self) -> &str;

    async fn detect_pr(&self, session: &Session) -> Result<Option<PrInfo>>;

    async fn pr_state(&self, pr: &PrInfo) -> Result<PrState>;

    async fn merge_pr(&self, pr: &PrInfo, method: MergeMethod) -> Result<()>;

    async fn close_pr(&self, pr: &PrInfo) -> Result<()>;

    async fn ci_checks(&self, pr: &PrInfo) -> Result<Vec<CiCheck>>;

    async fn ci_summary(&self, pr: &PrInfo) -> Result<CiStatus>;

    async fn reviews(&self, pr: &PrInfo) -> Result<Vec<Review>>;

    async fn review_decision(&self, pr: &PrInfo) -> Result<ReviewDecision>;

    async fn pending_comments(&self, pr: &PrInfo) -> Result<Vec<ReviewComment>>;

    async fn automated_comments(&self, pr: &PrInfo) -> Result<Vec<AutomatedComment>>;

    /// Live readiness; implementations should build it with
    /// [`MergeReadiness::evaluate`] so blocker order stays consistent.
    async fn mergeability(&self, pr: &PrInfo) -> Result<MergeReadiness>;
}

/// Where a freeform message is posted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyContext {
    pub session_id: Option<String>,
    pub project_id: Option<String>,
    pub channel: Option<String>,
}

/// Delivers events to an operator.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &OrchestratorEvent) -> Result<()>;

    async fn notify_with_actions(
        &self,
        event: &OrchestratorEvent,
        _actions: &[NotifyAction],
    ) -> Result<()> {
        self.notify(event).await
    }

    /// Post a freeform message; returns a transport message id when one exists.
    async fn post(&self, _message: &str, _context: &NotifyContext) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Terminal integration that can bring a session into view.
#[async_trait]
pub trait Terminal: Send + Sync {
    fn name(&self) -> &str;

    async fn open_session(&self, session: &Session) -> Result<()>;

    async fn is_session_open(&self, session: &Session) -> Result<bool>;
}
