//! Orchestrator events emitted on state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "session.working")]
    SessionWorking,
    #[serde(rename = "session.idle")]
    SessionIdle,
    #[serde(rename = "session.exited")]
    SessionExited,
    #[serde(rename = "pr.created")]
    PrCreated,
    #[serde(rename = "pr.merged")]
    PrMerged,
    #[serde(rename = "pr.closed")]
    PrClosed,
    #[serde(rename = "ci.failed")]
    CiFailed,
    #[serde(rename = "review.changes_requested")]
    ReviewChangesRequested,
    #[serde(rename = "review.approved")]
    ReviewApproved,
    #[serde(rename = "merge.ready")]
    MergeReady,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionWorking => "session.working",
            Self::SessionIdle => "session.idle",
            Self::SessionExited => "session.exited",
            Self::PrCreated => "pr.created",
            Self::PrMerged => "pr.merged",
            Self::PrClosed => "pr.closed",
            Self::CiFailed => "ci.failed",
            Self::ReviewChangesRequested => "review.changes_requested",
            Self::ReviewApproved => "review.approved",
            Self::MergeReady => "merge.ready",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Notification urgency; routing is configured per priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Urgent,
    Action,
    Warning,
    Info,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::Action => "action",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        [Self::Urgent, Self::Action, Self::Warning, Self::Info].into_iter()
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// An immutable fact about a state change.
///
/// Fields are private so an event cannot be altered after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: EventType,
    priority: EventPriority,
    session_id: String,
    project_id: String,
    timestamp: DateTime<Utc>,
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl OrchestratorEvent {
    pub fn new(
        event_type: EventType,
        priority: EventPriority,
        session_id: impl Into<String>,
        project_id: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            priority,
            session_id: session_id.into(),
            project_id: project_id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            data,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn priority(&self) -> EventPriority {
        self.priority
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }
}

/// A follow-up an operator can take from a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyAction {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl NotifyAction {
    pub fn callback(label: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: None,
            callback: Some(callback.into()),
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: Some(url.into()),
            callback: None,
        }
    }
}
