//! Runtime liveness checks for tmux panes and bare OS processes.

use crate::data::RuntimeHandle;
use crate::plugins::Runtime;
use crate::util::run_command;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Sessions hosted in a tmux session; `handle.id` is the tmux session name.
pub struct TmuxRuntime {
    timeout: Duration,
}

impl TmuxRuntime {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Runtime for TmuxRuntime {
    fn name(&self) -> &str {
        "tmux"
    }

    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool> {
        // `=` forces an exact match instead of tmux's prefix matching.
        let target = format!("={}", handle.id);
        let output = run_command("tmux", &["has-session", "-t", &target], &[], self.timeout).await?;
        Ok(output.success)
    }
}

/// Sessions running as plain child processes.
///
/// The pid comes from `handle.data["pid"]`, falling back to `handle.id`.
pub struct ProcessRuntime {
    timeout: Duration,
}

impl ProcessRuntime {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Extract the pid a process handle points at.
///
/// Zero and anything past `i32::MAX` are rejected: `kill` would read them as
/// the caller's process group or a negative group id.
pub fn handle_pid(handle: &RuntimeHandle) -> Result<u32> {
    let pid: u32 = match handle.data.get("pid") {
        Some(pid) if pid.is_u64() => pid
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .with_context(|| format!("pid {} out of range", pid))?,
        Some(pid) if pid.is_string() => {
            let s = pid.as_str().unwrap_or_default();
            s.trim().parse().with_context(|| format!("invalid pid '{}'", s))?
        }
        _ => handle
            .id
            .trim()
            .parse()
            .with_context(|| format!("runtime handle '{}' has no pid", handle.id))?,
    };
    anyhow::ensure!(
        pid != 0 && i32::try_from(pid).is_ok(),
        "pid {} does not name a single process",
        pid
    );
    Ok(pid)
}

#[async_trait]
impl Runtime for ProcessRuntime {
    fn name(&self) -> &str {
        "process"
    }

    async fn is_alive(&self, handle: &RuntimeHandle) -> Result<bool> {
        let pid = handle_pid(handle)?.to_string();
        // Signal 0 probes for existence without delivering anything.
        let output = run_command("kill", &["-0", &pid], &[], self.timeout).await?;
        Ok(output.success)
    }
}
