//! Which state changes become events, and at what priority.

use crate::data::{
    ActivityState, EventPriority, EventType, MergeReadiness, NotifyAction, OrchestratorEvent,
    PrInfo, PrStatus, Session,
};
use serde_json::json;

/// An event plus the operator actions that accompany it.
#[derive(Debug, Clone)]
pub struct Transition {
    pub event: OrchestratorEvent,
    pub actions: Vec<NotifyAction>,
}

/// Event for an activity change, or `None` when nothing qualifies.
///
/// Every change to a known state yields exactly one event. `pr_status` is the
/// freshest PR status; an exit after the PR merged or closed is expected.
pub fn activity_transition(
    session: &Session,
    from: ActivityState,
    to: ActivityState,
    pr_status: Option<PrStatus>,
) -> Option<Transition> {
    if from == to {
        return None;
    }

    let mut actions = Vec::new();
    let (event_type, priority, message) = match to {
        ActivityState::Unknown => return None,
        ActivityState::Idle if from == ActivityState::Active => {
            actions.push(NotifyAction::callback(
                "Open session",
                format!("session.open:{}", session.id),
            ));
            (
                EventType::SessionIdle,
                EventPriority::Action,
                "Agent finished working and needs input".to_string(),
            )
        }
        ActivityState::Idle => (
            EventType::SessionIdle,
            EventPriority::Info,
            "Agent is idle".to_string(),
        ),
        ActivityState::Active if from == ActivityState::Exited => (
            EventType::SessionWorking,
            EventPriority::Info,
            "Agent is running again".to_string(),
        ),
        ActivityState::Active => (
            EventType::SessionWorking,
            EventPriority::Info,
            "Agent is working".to_string(),
        ),
        ActivityState::Exited => {
            let expected = pr_status.is_some_and(|s| s.is_terminal());
            if expected {
                (
                    EventType::SessionExited,
                    EventPriority::Warning,
                    "Agent exited after its PR was closed out".to_string(),
                )
            } else {
                (
                    EventType::SessionExited,
                    EventPriority::Urgent,
                    "Agent exited unexpectedly".to_string(),
                )
            }
        }
    };

    let event = OrchestratorEvent::new(
        event_type,
        priority,
        &session.id,
        &session.project_id,
        message,
        json!({
            "from": from,
            "to": to,
            "agent": session.agent_name,
            "branch": session.branch,
            "issue_id": session.issue_id,
        }),
    );

    Some(Transition { event, actions })
}

/// Event for a PR status change.
///
/// Returning to open or draft from another status is not announced; the
/// first sighting of a PR is.
pub fn pr_transition(
    session: &Session,
    from: Option<PrStatus>,
    to: PrStatus,
    pr: &PrInfo,
    readiness: Option<&MergeReadiness>,
) -> Option<Transition> {
    if from == Some(to) {
        return None;
    }

    let mut actions = Vec::new();
    let (event_type, priority, message) = match to {
        PrStatus::Open | PrStatus::Draft if from.is_none() => (
            EventType::PrCreated,
            EventPriority::Info,
            format!("PR #{} opened: {}", pr.number, pr.title),
        ),
        PrStatus::Open | PrStatus::Draft => return None,
        PrStatus::CiFailing => (
            EventType::CiFailed,
            EventPriority::Warning,
            format!("CI is failing on PR #{}", pr.number),
        ),
        PrStatus::ChangesRequested => (
            EventType::ReviewChangesRequested,
            EventPriority::Action,
            format!("Changes requested on PR #{}", pr.number),
        ),
        PrStatus::Approved => (
            EventType::ReviewApproved,
            EventPriority::Info,
            format!("PR #{} approved", pr.number),
        ),
        PrStatus::Mergeable => {
            actions.push(NotifyAction::link("View PR", &pr.url));
            actions.push(NotifyAction::callback(
                "Merge",
                format!("pr.merge:{}", session.id),
            ));
            (
                EventType::MergeReady,
                EventPriority::Action,
                format!("PR #{} is ready to merge", pr.number),
            )
        }
        PrStatus::Merged => (
            EventType::PrMerged,
            EventPriority::Action,
            format!("PR #{} merged", pr.number),
        ),
        PrStatus::Closed => (
            EventType::PrClosed,
            EventPriority::Info,
            format!("PR #{} closed without merging", pr.number),
        ),
    };

    let event = OrchestratorEvent::new(
        event_type,
        priority,
        &session.id,
        &session.project_id,
        message,
        json!({
            "from": from,
            "to": to,
            "pr": { "number": pr.number, "url": pr.url, "title": pr.title },
            "blockers": readiness.map(|r| r.blockers.clone()).unwrap_or_default(),
        }),
    );

    Some(Transition { event, actions })
}
