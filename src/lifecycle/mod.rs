//! Lifecycle manager: the polling engine.
//!
//! Each tick lists every session and fans out one check per session. A
//! session whose previous check is still running is skipped, so at most one
//! check per session is ever in flight and `last_known_activity` has a
//! single writer at a time.
//!
//! Per-session check:
//!
//! ```text
//!  get session ──► resolve agent ──► runtime alive? ──no──► exited
//!                                         │yes
//!                                  agent process running? ──no──► exited
//!                                         │yes
//!                                  agent.activity_state()
//!                                         │
//!            unknown ◄────────────────────┼──────────────► known
//!       (keep last state,                 │           (diff, persist,
//!        no event)                        │            emit one event)
//!                                  SCM: PR status diff ──► PR events
//! ```

pub mod transitions;

pub use transitions::{activity_transition, pr_transition, Transition};

use crate::config::{Config, PollingConfig, ProjectConfig};
use crate::data::{
    ActivityDetection, ActivityState, MergeReadiness, OrchestratorEvent, PrState, PrStatus,
    Session, SessionPatch, UnknownReason,
};
use crate::error::{CheckError, ConfigurationError};
use crate::events::{DeliveryOutcome, EventRouter};
use crate::plugins::{Agent, PluginRegistry};
use crate::sessions::SessionStore;
use crate::util::{call_with_timeout, try_send_or_log};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What one completed session check observed and did.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub session_id: String,
    pub checked_at: DateTime<Utc>,
    pub previous: ActivityState,
    pub detection: ActivityDetection,
    /// `last_known_activity` after the check
    pub current: ActivityState,
    pub pr_status: Option<PrStatus>,
    pub events: Vec<OrchestratorEvent>,
    pub deliveries: Vec<DeliveryOutcome>,
    /// SCM failure; does not fail the activity check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scm_error: Option<String>,
}

impl CheckReport {
    pub fn transitioned(&self) -> bool {
        self.previous != self.current
    }
}

/// Counts for one tick across all sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub sessions: usize,
    pub checked: usize,
    /// Sessions whose previous check was still running
    pub skipped: usize,
    pub transitioned: usize,
    pub errored: usize,
    pub events: usize,
}

struct PrCheck {
    status: PrStatus,
    transition: Option<Transition>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    registry: Arc<PluginRegistry>,
    store: Arc<dyn SessionStore>,
    router: Arc<EventRouter>,
    projects: HashMap<String, ProjectConfig>,
    polling: PollingConfig,
    in_flight: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, u32>>,
    event_tx: Mutex<Option<mpsc::Sender<OrchestratorEvent>>>,
}

/// Marks a session as being checked; released on drop.
struct InFlightGuard {
    inner: Arc<Inner>,
    session_id: String,
}

impl InFlightGuard {
    fn claim(inner: &Arc<Inner>, session_id: &str) -> Option<Self> {
        if !lock(&inner.in_flight).insert(session_id.to_string()) {
            return None;
        }
        Some(Self {
            inner: Arc::clone(inner),
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.session_id);
    }
}

pub struct LifecycleManager {
    inner: Arc<Inner>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        registry: Arc<PluginRegistry>,
        store: Arc<dyn SessionStore>,
        router: Arc<EventRouter>,
        config: &Config,
    ) -> Self {
        Self::from_parts(
            registry,
            store,
            router,
            config.polling.clone(),
            config.projects.clone(),
        )
    }

    pub fn from_parts(
        registry: Arc<PluginRegistry>,
        store: Arc<dyn SessionStore>,
        router: Arc<EventRouter>,
        polling: PollingConfig,
        projects: HashMap<String, ProjectConfig>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                store,
                router,
                projects,
                polling,
                in_flight: Mutex::new(HashSet::new()),
                failures: Mutex::new(HashMap::new()),
                event_tx: Mutex::new(None),
            }),
            ticker: Mutex::new(None),
        }
    }

    /// Receive a copy of every emitted event. Replaces any earlier subscriber.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *lock(&self.inner.event_tx) = Some(tx);
        rx
    }

    /// Begin ticking every `interval`. Restarting replaces the old timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        let mut ticker = lock(&self.ticker);
        if let Some(previous) = ticker.take() {
            previous.abort();
        }

        let inner = Arc::clone(&self.inner);
        let period = interval.max(Duration::from_millis(1));
        *ticker = Some(tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                // Don't wait for stragglers; in-flight sessions are skipped.
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let summary = inner.tick().await;
                    tracing::debug!(?summary, "tick finished");
                });
            }
        }));
        tracing::info!("Lifecycle polling started every {:?}", period);
    }

    /// Stop scheduling ticks. Checks already running finish on their own.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
            tracing::info!("Lifecycle polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one tick now and wait for every check it dispatched.
    pub async fn tick(&self) -> TickSummary {
        self.inner.tick().await
    }

    /// Check a single session out of band.
    ///
    /// Fails with `InFlight` if a tick is currently checking the session.
    pub async fn check(&self, session_id: &str) -> Result<CheckReport, CheckError> {
        let _guard = InFlightGuard::claim(&self.inner, session_id)
            .ok_or_else(|| CheckError::InFlight(session_id.to_string()))?;
        self.inner.run_check(session_id).await
    }

    /// Sessions with a check currently running.
    pub fn in_flight(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.in_flight).iter().cloned().collect();
        ids.sort();
        ids
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
    }
}

impl Inner {
    async fn tick(self: &Arc<Self>) -> TickSummary {
        let sessions = match self.store.list().await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!("Failed to list sessions: {:#}", e);
                return TickSummary::default();
            }
        };

        // Forget failure counts of sessions that are no longer tracked
        let ids: HashSet<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        lock(&self.failures).retain(|id, _| ids.contains(id.as_str()));

        let mut summary = TickSummary {
            sessions: sessions.len(),
            ..Default::default()
        };

        let mut handles = Vec::with_capacity(sessions.len());
        for session in sessions {
            let Some(guard) = InFlightGuard::claim(self, &session.id) else {
                tracing::debug!("Check for {} still in flight, skipping", session.id);
                summary.skipped += 1;
                continue;
            };

            let inner = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let _guard = guard;
                inner.run_check(&session.id).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(report)) => {
                    summary.checked += 1;
                    summary.events += report.events.len();
                    if report.transitioned() {
                        summary.transitioned += 1;
                    }
                }
                Ok(Err(e)) => {
                    summary.errored += 1;
                    tracing::warn!("Check failed: {}", e);
                }
                Err(e) => {
                    summary.errored += 1;
                    tracing::error!("Check task panicked: {}", e);
                }
            }
        }

        summary
    }

    async fn run_check(&self, session_id: &str) -> Result<CheckReport, CheckError> {
        let session = self
            .store
            .get(session_id)
            .await
            .map_err(|e| store_error(session_id, e))?
            .ok_or_else(|| CheckError::SessionNotFound(session_id.to_string()))?;

        let agent = self
            .registry
            .agent(&session.agent_name)
            .map_err(|source| config_error(&session, source))?;

        let detection = match self.detect_activity(&session, agent.as_ref()).await {
            Ok(detection) => {
                lock(&self.failures).remove(&session.id);
                detection
            }
            Err(e @ CheckError::External { .. }) => {
                let failures = {
                    let mut failures = lock(&self.failures);
                    let count = failures.entry(session.id.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                let max = self.polling.max_consecutive_failures;
                if failures < max {
                    return Err(e);
                }
                if failures == max {
                    tracing::warn!(
                        "{} failed {} times in a row, treating activity as unknown: {}",
                        session.id,
                        failures,
                        e
                    );
                }
                ActivityDetection::Unknown(UnknownReason::RepeatedFailures(failures))
            }
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let previous = session.last_known_activity;
        let mut patch = SessionPatch::checked_at(now);
        let mut report = CheckReport {
            session_id: session.id.clone(),
            checked_at: now,
            previous,
            detection,
            current: previous,
            pr_status: session.last_pr_status,
            events: Vec::new(),
            deliveries: Vec::new(),
            scm_error: None,
        };

        let mut pending = Vec::new();
        let mut pr_events = Vec::new();

        let pr_check = match self.check_pr(&session).await {
            Ok(pr_check) => pr_check,
            Err(e) => {
                tracing::warn!("PR check failed: {}", e);
                report.scm_error = Some(e.to_string());
                None
            }
        };
        if let Some(pr_check) = pr_check {
            if session.last_pr_status != Some(pr_check.status) {
                patch = patch.with_pr_status(pr_check.status);
                report.pr_status = Some(pr_check.status);
            }
            pr_events.extend(pr_check.transition);
        }

        // Unknown never overwrites the last known state.
        if let ActivityDetection::Known(state) = detection {
            if state != previous {
                patch = patch.with_activity(state);
                report.current = state;
                pending.extend(activity_transition(
                    &session,
                    previous,
                    state,
                    report.pr_status,
                ));
            }
        }

        self.store
            .update(&session.id, patch)
            .await
            .map_err(|e| store_error(&session.id, e))?;

        if report.transitioned() {
            tracing::info!("{}: {} -> {}", session.id, previous, report.current);
        }

        // Activity events go out before PR events.
        pending.append(&mut pr_events);
        for transition in pending {
            let deliveries = self.emit(&transition).await;
            report.deliveries.extend(deliveries);
            report.events.push(transition.event);
        }

        Ok(report)
    }

    /// Resolve the current activity, short-circuiting to exited when the
    /// host or the agent process is gone.
    async fn detect_activity(
        &self,
        session: &Session,
        agent: &dyn Agent,
    ) -> Result<ActivityDetection, CheckError> {
        let Some(handle) = &session.runtime_handle else {
            return Ok(ActivityDetection::Known(ActivityState::Exited));
        };

        let runtime = self
            .registry
            .runtime(&handle.runtime_name)
            .map_err(|source| config_error(session, source))?;

        if !self
            .call(session, "runtime liveness check", runtime.is_alive(handle))
            .await?
        {
            return Ok(ActivityDetection::Known(ActivityState::Exited));
        }

        if !self
            .call(session, "agent process check", agent.is_process_running(handle))
            .await?
        {
            return Ok(ActivityDetection::Known(ActivityState::Exited));
        }

        let detection = self
            .call(session, "activity detection", agent.activity_state(session))
            .await?;

        Ok(match detection {
            ActivityDetection::Known(state) => ActivityDetection::known(state),
            unknown => unknown,
        })
    }

    /// Current PR status for sessions whose project tracks PRs.
    async fn check_pr(&self, session: &Session) -> Result<Option<PrCheck>, CheckError> {
        if session.branch.is_none() {
            return Ok(None);
        }
        let Some(scm_name) = self
            .projects
            .get(&session.project_id)
            .and_then(|project| project.scm.as_deref())
        else {
            return Ok(None);
        };

        let scm = self
            .registry
            .scm(scm_name)
            .map_err(|source| config_error(session, source))?;

        let Some(pr) = self.call(session, "PR detection", scm.detect_pr(session)).await? else {
            return Ok(None);
        };

        let state = self.call(session, "PR state", scm.pr_state(&pr)).await?;

        let (status, readiness) = match state {
            PrState::Merged => (PrStatus::Merged, None),
            PrState::Closed => (PrStatus::Closed, None),
            PrState::Open => {
                let ci = self.call(session, "CI summary", scm.ci_summary(&pr)).await?;
                let decision = self
                    .call(session, "review decision", scm.review_decision(&pr))
                    .await?;
                let readiness: MergeReadiness = self
                    .call(session, "mergeability", scm.mergeability(&pr))
                    .await?;
                let status = PrStatus::derive(&pr, state, ci, decision, &readiness);
                (status, Some(readiness))
            }
        };

        let transition =
            pr_transition(session, session.last_pr_status, status, &pr, readiness.as_ref());

        Ok(Some(PrCheck { status, transition }))
    }

    async fn call<T, F>(&self, session: &Session, operation: &str, fut: F) -> Result<T, CheckError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        call_with_timeout(operation, self.polling.plugin_timeout(), fut)
            .await
            .map_err(|source| CheckError::External {
                session_id: session.id.clone(),
                source,
            })
    }

    async fn emit(&self, transition: &Transition) -> Vec<DeliveryOutcome> {
        let outcomes = if transition.actions.is_empty() {
            self.router.route(&transition.event).await
        } else {
            self.router
                .route_with_actions(&transition.event, &transition.actions)
                .await
        };

        // A slow subscriber loses events rather than stalling the check
        let mut guard = lock(&self.event_tx);
        if guard.as_ref().is_some_and(|tx| tx.is_closed()) {
            *guard = None;
        }
        if let Some(tx) = guard.as_ref() {
            try_send_or_log(tx, transition.event.clone(), "event");
        }

        outcomes
    }
}

fn config_error(session: &Session, source: ConfigurationError) -> CheckError {
    CheckError::Configuration {
        session_id: session.id.clone(),
        source,
    }
}

fn store_error(session_id: &str, e: anyhow::Error) -> CheckError {
    CheckError::Store {
        session_id: session_id.to_string(),
        message: format!("{e:#}"),
    }
}
