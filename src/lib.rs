//! Conductor - supervisor for coding-agent sessions
//!
//! Polls every session's activity and pull request, turns state changes into
//! prioritized events, and routes those events to notifiers.

pub mod config;
pub mod data;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod plugins;
pub mod sessions;
pub mod util;
