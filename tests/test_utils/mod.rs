//! Test utilities and fakes for conductor tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use conductor::config::{DeliveryConfig, PollingConfig, ProjectConfig};
use conductor::data::{
    ActivityDetection, ActivityState, AgentLaunchConfig, AutomatedComment, CiCheck, CiStatus,
    EventPriority, EventType, MergeReadiness, NotifyAction, OrchestratorEvent, PrInfo, PrState,
    Review, ReviewComment, ReviewDecision, RuntimeHandle, Session,
};
use conductor::plugins::{Agent, MergeMethod, Notifier, Runtime, Scm};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Session with a live fake runtime, as most tests want it.
pub fn live_session(id: &str) -> Session {
    Session::new(id, "app", "fake").with_runtime(RuntimeHandle::new("fake", id))
}

pub fn test_polling() -> PollingConfig {
    PollingConfig {
        interval_secs: 1,
        plugin_timeout_secs: 5,
        max_consecutive_failures: 3,
    }
}

/// Retries without meaningful waiting.
pub fn fast_delivery(retries: u32) -> DeliveryConfig {
    DeliveryConfig {
        retries,
        retry_delay_ms: 1,
        max_concurrent: None,
        timeout_secs: 5,
    }
}

pub fn projects_with_scm(scm: &str) -> HashMap<String, ProjectConfig> {
    let mut projects = HashMap::new();
    projects.insert(
        "app".to_string(),
        ProjectConfig {
            scm: Some(scm.to_string()),
            repo: Some("acme/app".to_string()),
            ..Default::default()
        },
    );
    projects
}

pub fn sample_pr() -> PrInfo {
    PrInfo {
        number: 42,
        url: "https://github.com/acme/app/pull/42".to_string(),
        title: "Add retry policy".to_string(),
        repo: "acme/app".to_string(),
        branch: "feat/retry".to_string(),
        base_branch: "main".to_string(),
        is_draft: false,
    }
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Default)]
struct AgentState {
    /// Returned once each before falling back to `current`
    script: Mutex<VecDeque<Result<ActivityDetection, String>>>,
    current: Mutex<Option<ActivityDetection>>,
    process_running: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
    entered: Notify,
}

/// Agent whose activity answers are scripted by the test.
#[derive(Clone)]
pub struct FakeAgent {
    state: Arc<AgentState>,
}

impl FakeAgent {
    pub fn new(initial: ActivityState) -> Self {
        let agent = Self {
            state: Arc::new(AgentState::default()),
        };
        agent.state.process_running.store(true, Ordering::SeqCst);
        agent.set(ActivityDetection::known(initial));
        agent
    }

    pub fn set(&self, detection: ActivityDetection) {
        *self.state.current.lock().unwrap() = Some(detection);
    }

    pub fn set_state(&self, state: ActivityState) {
        self.set(ActivityDetection::known(state));
    }

    pub fn fail_next(&self, times: usize) {
        let mut script = self.state.script.lock().unwrap();
        for _ in 0..times {
            script.push_back(Err("agent probe failed".to_string()));
        }
    }

    pub fn set_process_running(&self, running: bool) {
        self.state.process_running.store(running, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Hold every activity call until the returned handle is notified.
    pub fn block(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.state.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Resolves once an activity call is waiting on the gate.
    pub async fn entered(&self) {
        self.state.entered.notified().await;
    }
}

#[async_trait]
impl Agent for FakeAgent {
    fn name(&self) -> &str {
        "fake"
    }

    fn launch_command(&self, config: &AgentLaunchConfig) -> String {
        format!("fake-agent --session {}", config.session_id)
    }

    fn detect_activity(&self, output: &str) -> ActivityState {
        if output.trim_end().ends_with('>') {
            ActivityState::Idle
        } else {
            ActivityState::Active
        }
    }

    async fn activity_state(&self, _session: &Session) -> Result<ActivityDetection> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.state.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.state.entered.notify_one();
            gate.notified().await;
        }

        if let Some(next) = self.state.script.lock().unwrap().pop_front() {
            return next.map_err(|e| anyhow!(e));
        }
        let current = *self.state.current.lock().unwrap();
        Ok(current.unwrap_or(ActivityDetection::known(ActivityState::Unknown)))
    }

    async fn is_process_running(&self, _handle: &RuntimeHandle) -> Result<bool> {
        Ok(self.state.process_running.load(Ordering::SeqCst))
    }
}

// ============================================================================
// Runtime
// ============================================================================

#[derive(Clone)]
pub struct FakeRuntime {
    alive: Arc<AtomicBool>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_alive(&self, _handle: &RuntimeHandle) -> Result<bool> {
        Ok(self.alive.load(Ordering::SeqCst))
    }
}

// ============================================================================
// SCM
// ============================================================================

#[derive(Debug, Clone)]
pub struct FakePr {
    pub info: Option<PrInfo>,
    pub state: PrState,
    pub ci: CiStatus,
    pub decision: ReviewDecision,
    pub has_conflicts: bool,
}

impl Default for FakePr {
    fn default() -> Self {
        Self {
            info: None,
            state: PrState::Open,
            ci: CiStatus::Pending,
            decision: ReviewDecision::ReviewRequired,
            has_conflicts: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeScm {
    pr: Arc<Mutex<FakePr>>,
    fail: Arc<AtomicBool>,
}

impl FakeScm {
    pub fn update(&self, f: impl FnOnce(&mut FakePr)) {
        f(&mut self.pr.lock().unwrap());
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn snapshot(&self) -> Result<FakePr> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("scm unreachable"));
        }
        Ok(self.pr.lock().unwrap().clone())
    }
}

#[async_trait]
impl Scm for FakeScm {
    fn name(&self) -> &str {
        "fake-scm"
    }

    async fn detect_pr(&self, _session: &Session) -> Result<Option<PrInfo>> {
        Ok(self.snapshot()?.info)
    }

    async fn pr_state(&self, _pr: &PrInfo) -> Result<PrState> {
        Ok(self.snapshot()?.state)
    }

    async fn merge_pr(&self, _pr: &PrInfo, _method: MergeMethod) -> Result<()> {
        self.update(|pr| pr.state = PrState::Merged);
        Ok(())
    }

    async fn close_pr(&self, _pr: &PrInfo) -> Result<()> {
        self.update(|pr| pr.state = PrState::Closed);
        Ok(())
    }

    async fn ci_checks(&self, _pr: &PrInfo) -> Result<Vec<CiCheck>> {
        Ok(Vec::new())
    }

    async fn ci_summary(&self, _pr: &PrInfo) -> Result<CiStatus> {
        Ok(self.snapshot()?.ci)
    }

    async fn reviews(&self, _pr: &PrInfo) -> Result<Vec<Review>> {
        Ok(Vec::new())
    }

    async fn review_decision(&self, _pr: &PrInfo) -> Result<ReviewDecision> {
        Ok(self.snapshot()?.decision)
    }

    async fn pending_comments(&self, _pr: &PrInfo) -> Result<Vec<ReviewComment>> {
        Ok(Vec::new())
    }

    async fn automated_comments(&self, _pr: &PrInfo) -> Result<Vec<AutomatedComment>> {
        Ok(Vec::new())
    }

    async fn mergeability(&self, pr: &PrInfo) -> Result<MergeReadiness> {
        let snapshot = self.snapshot()?;
        Ok(MergeReadiness::evaluate(
            snapshot.ci,
            snapshot.decision,
            snapshot.has_conflicts,
            pr.is_draft,
        ))
    }
}

// ============================================================================
// Notifier
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub event_type: EventType,
    pub priority: EventPriority,
    pub session_id: String,
    pub actions: Vec<String>,
}

#[derive(Default)]
struct NotifierState {
    received: Mutex<Vec<Received>>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
}

/// Records every delivery; can be told to fail the next N attempts.
#[derive(Clone)]
pub struct RecordingNotifier {
    name: String,
    state: Arc<NotifierState>,
}

impl RecordingNotifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(NotifierState::default()),
        }
    }

    pub fn failing(name: &str, times: u32) -> Self {
        let notifier = Self::new(name);
        notifier.state.failures_left.store(times, Ordering::SeqCst);
        notifier
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    fn record(&self, event: &OrchestratorEvent, actions: &[NotifyAction]) -> Result<()> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("{} transport unavailable", self.name));
        }

        self.state.received.lock().unwrap().push(Received {
            event_type: event.event_type(),
            priority: event.priority(),
            session_id: event.session_id().to_string(),
            actions: actions.iter().map(|a| a.label.clone()).collect(),
        });
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, event: &OrchestratorEvent) -> Result<()> {
        self.record(event, &[])
    }

    async fn notify_with_actions(
        &self,
        event: &OrchestratorEvent,
        actions: &[NotifyAction],
    ) -> Result<()> {
        self.record(event, actions)
    }
}

/// Holds each delivery for a while and records the highest number of
/// deliveries running at once across every clone sharing `peak`.
#[derive(Clone)]
pub struct SlowNotifier {
    name: String,
    hold: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SlowNotifier {
    pub fn new(name: &str, hold: Duration, peak: &Arc<AtomicUsize>) -> Self {
        Self {
            name: name.to_string(),
            hold,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(peak),
        }
    }

    /// Share the running count with `other`, so `peak` covers both.
    pub fn sharing(mut self, other: &SlowNotifier) -> Self {
        self.active = Arc::clone(&other.active);
        self
    }
}

#[async_trait]
impl Notifier for SlowNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, _event: &OrchestratorEvent) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
