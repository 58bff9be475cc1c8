//! Built-in notifiers: structured log output and a shell hook.

use super::timeout_option;
use crate::data::{NotifyAction, OrchestratorEvent};
use crate::plugins::{Notifier, NotifyContext, PluginOptions};
use crate::util::run_command;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Writes events to the tracing log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &OrchestratorEvent) -> Result<()> {
        tracing::info!(
            event_id = %event.id(),
            session = %event.session_id(),
            project = %event.project_id(),
            priority = %event.priority(),
            "{}: {}",
            event.event_type(),
            event.message()
        );
        Ok(())
    }

    async fn notify_with_actions(
        &self,
        event: &OrchestratorEvent,
        actions: &[NotifyAction],
    ) -> Result<()> {
        self.notify(event).await?;
        for action in actions {
            tracing::info!(session = %event.session_id(), "  action: {}", action.label);
        }
        Ok(())
    }

    async fn post(&self, message: &str, context: &NotifyContext) -> Result<Option<String>> {
        tracing::info!(
            session = ?context.session_id,
            channel = ?context.channel,
            "{}",
            message
        );
        Ok(None)
    }
}

/// Runs a shell hook per event.
///
/// The hook sees `CONDUCTOR_EVENT`, `CONDUCTOR_SESSION_ID`,
/// `CONDUCTOR_PRIORITY` and the full event as `CONDUCTOR_EVENT_JSON`. A
/// non-zero exit counts as a failed delivery.
pub struct CommandNotifier {
    command: String,
    timeout: Duration,
}

impl CommandNotifier {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Build from `command` (required) and `timeout_secs` options.
    pub fn from_options(options: &PluginOptions) -> Result<Self> {
        let command = options
            .get("command")
            .and_then(|v| v.as_str())
            .context("missing required option 'command'")?;
        Ok(Self::new(command, timeout_option(options)))
    }

    async fn run(&self, envs: &[(&str, &str)]) -> Result<()> {
        let output = run_command("sh", &["-c", &self.command], envs, self.timeout).await?;
        if !output.success {
            anyhow::bail!(
                "hook '{}' exited unsuccessfully: {}",
                self.command,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    fn name(&self) -> &str {
        "command"
    }

    async fn notify(&self, event: &OrchestratorEvent) -> Result<()> {
        self.notify_with_actions(event, &[]).await
    }

    async fn notify_with_actions(
        &self,
        event: &OrchestratorEvent,
        actions: &[NotifyAction],
    ) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        let actions_json =
            serde_json::to_string(actions).context("Failed to serialize actions")?;
        self.run(&[
            ("CONDUCTOR_EVENT", event.event_type().as_str()),
            ("CONDUCTOR_SESSION_ID", event.session_id()),
            ("CONDUCTOR_PRIORITY", event.priority().as_str()),
            ("CONDUCTOR_EVENT_JSON", json.as_str()),
            ("CONDUCTOR_ACTIONS_JSON", actions_json.as_str()),
        ])
        .await
    }

    async fn post(&self, message: &str, context: &NotifyContext) -> Result<Option<String>> {
        self.run(&[
            ("CONDUCTOR_MESSAGE", message),
            (
                "CONDUCTOR_SESSION_ID",
                context.session_id.as_deref().unwrap_or(""),
            ),
        ])
        .await?;
        Ok(None)
    }
}
