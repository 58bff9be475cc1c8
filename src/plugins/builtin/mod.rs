//! Built-in runtime and notifier plugins.
//!
//! Concrete agents, SCM hosts and chat transports live outside this crate and
//! are registered by the embedding application.

pub mod notifier;
pub mod runtime;

pub use notifier::{CommandNotifier, LogNotifier};
pub use runtime::{ProcessRuntime, TmuxRuntime};

use super::{PluginOptions, PluginRegistry};
use std::time::Duration;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Register every built-in plugin.
pub fn register_builtins(registry: &PluginRegistry) {
    registry.register_runtime("tmux", |options| {
        Ok(TmuxRuntime::new(timeout_option(options)))
    });
    registry.register_runtime("process", |options| {
        Ok(ProcessRuntime::new(timeout_option(options)))
    });
    registry.register_notifier("log", |_| Ok(LogNotifier));
    registry.register_notifier("command", CommandNotifier::from_options);
}

/// `timeout_secs` option, falling back to the default command timeout.
pub fn timeout_option(options: &PluginOptions) -> Duration {
    options
        .get("timeout_secs")
        .and_then(|v| v.as_u64())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT)
}
