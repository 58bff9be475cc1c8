use crate::data::EventPriority;
use crate::plugins::PluginOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Static configuration; read once at startup, reloading requires a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default = "default_notifiers")]
    pub notifiers: HashMap<String, NotifierConfig>,
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            delivery: DeliveryConfig::default(),
            routing: RoutingConfig::default(),
            notifiers: default_notifiers(),
            projects: HashMap::new(),
            sessions: SessionsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Hard deadline for every plugin call made during a check
    #[serde(default = "default_plugin_timeout")]
    pub plugin_timeout_secs: u64,
    /// Consecutive plugin failures before a session is reported as unknown
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_plugin_timeout() -> u64 {
    30
}

fn default_max_failures() -> u32 {
    3
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            plugin_timeout_secs: default_plugin_timeout(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Retries after the first failed attempt
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Attempt n waits n * retry_delay_ms before running
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Global cap on concurrent notifier deliveries; unlimited when unset
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Deadline for a single delivery attempt
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay() -> u64 {
    1000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            max_concurrent: None,
            timeout_secs: default_delivery_timeout(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Ordered notifier names per priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_route")]
    pub urgent: Vec<String>,
    #[serde(default = "default_route")]
    pub action: Vec<String>,
    #[serde(default = "default_route")]
    pub warning: Vec<String>,
    #[serde(default = "default_route")]
    pub info: Vec<String>,
}

fn default_route() -> Vec<String> {
    vec!["log".to_string()]
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            urgent: default_route(),
            action: default_route(),
            warning: default_route(),
            info: default_route(),
        }
    }
}

impl RoutingConfig {
    pub fn notifiers_for(&self, priority: EventPriority) -> &[String] {
        match priority {
            EventPriority::Urgent => &self.urgent,
            EventPriority::Action => &self.action,
            EventPriority::Warning => &self.warning,
            EventPriority::Info => &self.info,
        }
    }

    /// Route every priority to the same notifiers.
    pub fn uniform(names: &[&str]) -> Self {
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        Self {
            urgent: names.clone(),
            action: names.clone(),
            warning: names.clone(),
            info: names,
        }
    }
}

/// A configured notifier: which plugin builds it, and with what options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub plugin: String,
    #[serde(flatten)]
    pub options: PluginOptions,
}

impl NotifierConfig {
    pub fn new(plugin: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            options: PluginOptions::new(),
        }
    }
}

fn default_notifiers() -> HashMap<String, NotifierConfig> {
    let mut notifiers = HashMap::new();
    notifiers.insert("log".to_string(), NotifierConfig::new("log"));
    notifiers
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// SCM plugin used for PR tracking; PRs are not tracked when unset
    #[serde(default)]
    pub scm: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            scm: None,
            repo: None,
            default_branch: default_branch(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// JSON session file; defaults to the data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "conductor")
        .context("Could not determine config directory")
}

pub fn config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn default_sessions_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("sessions.json"))
}

impl Config {
    pub fn sessions_path(&self) -> Result<PathBuf> {
        match &self.sessions.path {
            Some(p) => Ok(p.clone()),
            None => default_sessions_path(),
        }
    }
}

/// Load configuration.
///
/// An explicit path must exist. Without one, a missing default file yields
/// the built-in defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found at {}", p.display());
            }
            p.to_path_buf()
        }
        None => {
            let p = default_config_path()?;
            if !p.exists() {
                tracing::debug!("No config at {}, using defaults", p.display());
                return Ok(Config::default());
            }
            p
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
}

pub fn parse(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}
