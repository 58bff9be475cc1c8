//! Utility functions and helpers.

use crate::error::ExternalError;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Send a value through a channel without waiting, logging a warning if it
/// is full or closed.
pub fn try_send_or_log<T>(tx: &mpsc::Sender<T>, value: T, context: &str) {
    if let Err(e) = tx.try_send(value) {
        tracing::warn!("Failed to send {}: {}", context, e);
    }
}

/// Await a plugin call under a hard deadline.
///
/// Both a timeout and an error from the call itself map to `ExternalError`.
pub async fn call_with_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    fut: F,
) -> std::result::Result<T, ExternalError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ExternalError::failed(operation, &e)),
        Err(_) => Err(ExternalError::TimedOut {
            operation: operation.to_string(),
            after: timeout,
        }),
    }
}

/// Captured result of an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run an external program, killing it if it outlives `timeout`.
pub async fn run_command(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    for (key, value) in envs {
        command.env(key, value);
    }

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| anyhow::anyhow!("{} timed out after {}s", program, timeout.as_secs()))?
        .with_context(|| format!("Failed to run {}", program))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
