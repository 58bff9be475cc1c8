//! Error taxonomy for the orchestration core.
//!
//! Errors are contained at the smallest unit that can fail on its own: one
//! session's check or one notifier's delivery. Ambiguous activity is not an
//! error at all; it is `ActivityDetection::Unknown`.

use crate::plugins::PluginSlot;
use std::time::Duration;
use thiserror::Error;

/// Unknown plugin, wrong slot, or missing required option.
///
/// Fatal to the operation that asked for it, never to the poll loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("no {slot} plugin registered under name '{name}'")]
    PluginNotRegistered { slot: PluginSlot, name: String },

    #[error("plugin '{name}' was registered as {slot} but its factory built a {actual}")]
    SlotMismatch {
        slot: PluginSlot,
        name: String,
        actual: PluginSlot,
    },

    #[error("failed to construct {slot} plugin '{name}': {reason}")]
    PluginConstruction {
        slot: PluginSlot,
        name: String,
        reason: String,
    },

    #[error("notifier '{0}' has no [notifiers.{0}] configuration and no plugin of that name")]
    UnknownNotifier(String),
}

/// A process invocation or HTTP call failed or timed out.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalError {
    #[error("{operation} failed: {message}")]
    Failed { operation: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    TimedOut { operation: String, after: Duration },
}

impl ExternalError {
    pub fn failed(operation: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::Failed {
            operation: operation.into(),
            message: format!("{err:#}"),
        }
    }
}

/// Why a single session check did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("a check for session '{0}' is already in flight")]
    InFlight(String),

    #[error("session '{session_id}': {source}")]
    Configuration {
        session_id: String,
        #[source]
        source: ConfigurationError,
    },

    #[error("session '{session_id}': {source}")]
    External {
        session_id: String,
        #[source]
        source: ExternalError,
    },

    #[error("session store error for '{session_id}': {message}")]
    Store { session_id: String, message: String },
}

impl CheckError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}
