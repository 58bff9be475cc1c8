use crate::config::{Config, DeliveryConfig, NotifierConfig, RoutingConfig};
use crate::data::{EventPriority, NotifyAction, OrchestratorEvent};
use crate::error::ConfigurationError;
use crate::plugins::{Notifier, PluginRegistry, PluginSlot};
use crate::util::call_with_timeout;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

/// Result of delivering one event to one notifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryOutcome {
    pub notifier: String,
    pub success: bool,
    /// Attempts made; zero when the notifier could not be constructed
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn delivered(notifier: &str, attempts: u32) -> Self {
        Self {
            notifier: notifier.to_string(),
            success: true,
            attempts,
            error: None,
        }
    }

    fn failed(notifier: &str, attempts: u32, error: String) -> Self {
        Self {
            notifier: notifier.to_string(),
            success: false,
            attempts,
            error: Some(error),
        }
    }
}

/// Maps events to notifiers and delivers them.
///
/// Deduplication is not done here: the lifecycle manager only emits an event
/// when state actually changes.
pub struct EventRouter {
    registry: Arc<PluginRegistry>,
    routing: RoutingConfig,
    notifiers: HashMap<String, NotifierConfig>,
    policy: DeliveryConfig,
    throttle: Option<Arc<Semaphore>>,
    instances: Mutex<HashMap<String, Arc<dyn Notifier>>>,
}

impl EventRouter {
    pub fn new(registry: Arc<PluginRegistry>, config: &Config) -> Self {
        Self::from_parts(
            registry,
            config.routing.clone(),
            config.notifiers.clone(),
            config.delivery.clone(),
        )
    }

    pub fn from_parts(
        registry: Arc<PluginRegistry>,
        routing: RoutingConfig,
        notifiers: HashMap<String, NotifierConfig>,
        policy: DeliveryConfig,
    ) -> Self {
        let throttle = policy
            .max_concurrent
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        Self {
            registry,
            routing,
            notifiers,
            policy,
            throttle,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver an event to every notifier routed for its priority.
    pub async fn route(&self, event: &OrchestratorEvent) -> Vec<DeliveryOutcome> {
        self.route_with_actions(event, &[]).await
    }

    /// Like [`route`](Self::route), but hands `actions` to each notifier.
    ///
    /// Outcomes are returned in routing order. One notifier exhausting its
    /// retries never stops delivery to the others.
    pub async fn route_with_actions(
        &self,
        event: &OrchestratorEvent,
        actions: &[NotifyAction],
    ) -> Vec<DeliveryOutcome> {
        let mut seen = HashSet::new();
        let names: Vec<&str> = self
            .routing
            .notifiers_for(event.priority())
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect();

        if names.is_empty() {
            tracing::debug!(
                "No notifiers routed for {} priority, dropping {}",
                event.priority(),
                event.event_type()
            );
            return Vec::new();
        }

        join_all(names.into_iter().map(|name| self.deliver(name, event, actions))).await
    }

    /// Resolve a notifier name to an instance, caching it for later events.
    ///
    /// A name without `[notifiers.<name>]` falls back to the plugin of the
    /// same name with default options.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Notifier>, ConfigurationError> {
        if let Some(notifier) = self.cache().get(name) {
            return Ok(Arc::clone(notifier));
        }

        let notifier = match self.notifiers.get(name) {
            Some(config) => self
                .registry
                .create_notifier(&config.plugin, &config.options)?,
            None if self.registry.is_registered(PluginSlot::Notifier, name) => {
                self.registry.notifier(name)?
            }
            None => return Err(ConfigurationError::UnknownNotifier(name.to_string())),
        };

        Ok(Arc::clone(
            self.cache().entry(name.to_string()).or_insert(notifier),
        ))
    }

    /// Routed names that cannot be resolved, for startup diagnostics.
    pub fn unresolvable(&self) -> Vec<(String, ConfigurationError)> {
        let mut seen = HashSet::new();
        EventPriority::all()
            .flat_map(|priority| self.routing.notifiers_for(priority).iter())
            .filter(|name| seen.insert(name.as_str()))
            .filter_map(|name| self.resolve(name).err().map(|e| (name.clone(), e)))
            .collect()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Notifier>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn deliver(
        &self,
        name: &str,
        event: &OrchestratorEvent,
        actions: &[NotifyAction],
    ) -> DeliveryOutcome {
        let notifier = match self.resolve(name) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Cannot deliver {} to '{}': {}", event.id(), name, e);
                return DeliveryOutcome::failed(name, 0, e.to_string());
            }
        };

        let max_attempts = self.policy.retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.retry_delay() * (attempt - 1)).await;
            }

            let _permit = match &self.throttle {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };

            let operation = format!("notifier '{}'", name);
            let result = if actions.is_empty() {
                call_with_timeout(&operation, self.policy.timeout(), notifier.notify(event)).await
            } else {
                call_with_timeout(
                    &operation,
                    self.policy.timeout(),
                    notifier.notify_with_actions(event, actions),
                )
                .await
            };

            match result {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!("'{}' delivered {} on attempt {}", name, event.id(), attempt);
                    }
                    return DeliveryOutcome::delivered(name, attempt);
                }
                Err(e) => {
                    tracing::debug!(
                        "'{}' attempt {}/{} for {} failed: {}",
                        name,
                        attempt,
                        max_attempts,
                        event.id(),
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        tracing::warn!(
            "Giving up delivering {} ({}) to '{}' after {} attempts: {}",
            event.event_type(),
            event.session_id(),
            name,
            max_attempts,
            last_error
        );
        DeliveryOutcome::failed(name, max_attempts, last_error)
    }
}
