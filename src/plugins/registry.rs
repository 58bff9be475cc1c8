//! Plugin registry: (slot, name) -> factory, with lazily constructed instances.
//!
//! One registry is created at startup and handed to every component that
//! needs lookups. It holds no session state, so it can be shared read-only
//! across all concurrent lifecycle checks.

use super::{Agent, Notifier, Plugin, PluginOptions, PluginSlot, Runtime, Scm, Terminal};
use crate::error::ConfigurationError;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Builds a plugin instance from its options.
pub type PluginFactory = Arc<dyn Fn(&PluginOptions) -> Result<Plugin> + Send + Sync>;

type Key = (PluginSlot, String);

#[derive(Default)]
pub struct PluginRegistry {
    factories: RwLock<HashMap<Key, PluginFactory>>,
    instances: RwLock<HashMap<Key, Plugin>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under (slot, name).
    ///
    /// Returns `false` and keeps the existing factory if the name is already
    /// taken in that slot.
    pub fn register(&self, slot: PluginSlot, name: &str, factory: PluginFactory) -> bool {
        let mut factories = write(&self.factories);
        let key = (slot, name.to_string());
        if factories.contains_key(&key) {
            tracing::debug!("{} plugin '{}' already registered, ignoring", slot, name);
            return false;
        }
        factories.insert(key, factory);
        true
    }

    pub fn is_registered(&self, slot: PluginSlot, name: &str) -> bool {
        read(&self.factories).contains_key(&(slot, name.to_string()))
    }

    /// All registered (slot, name) pairs, sorted.
    pub fn registered(&self) -> Vec<(PluginSlot, String)> {
        let mut keys: Vec<_> = read(&self.factories).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolve a shared instance, constructing it with default options on
    /// first use.
    pub fn get(&self, slot: PluginSlot, name: &str) -> Result<Plugin, ConfigurationError> {
        let key = (slot, name.to_string());
        if let Some(plugin) = read(&self.instances).get(&key) {
            return Ok(plugin.clone());
        }

        let plugin = self.create(slot, name, &PluginOptions::new())?;

        // Another caller may have won the race; keep the first instance.
        let mut instances = write(&self.instances);
        Ok(instances.entry(key).or_insert(plugin).clone())
    }

    /// Construct a fresh, uncached instance with the given options.
    pub fn create(
        &self,
        slot: PluginSlot,
        name: &str,
        options: &PluginOptions,
    ) -> Result<Plugin, ConfigurationError> {
        let factory = read(&self.factories)
            .get(&(slot, name.to_string()))
            .cloned()
            .ok_or_else(|| ConfigurationError::PluginNotRegistered {
                slot,
                name: name.to_string(),
            })?;

        let plugin = factory(options).map_err(|e| ConfigurationError::PluginConstruction {
            slot,
            name: name.to_string(),
            reason: format!("{e:#}"),
        })?;

        if plugin.slot() != slot {
            return Err(ConfigurationError::SlotMismatch {
                slot,
                name: name.to_string(),
                actual: plugin.slot(),
            });
        }

        tracing::debug!("constructed {} plugin '{}'", slot, name);
        Ok(plugin)
    }
}

macro_rules! typed_slot {
    ($register:ident, $get:ident, $create:ident, $variant:ident, $trait:ident) => {
        impl PluginRegistry {
            pub fn $register<F, P>(&self, name: &str, factory: F) -> bool
            where
                F: Fn(&PluginOptions) -> Result<P> + Send + Sync + 'static,
                P: $trait + 'static,
            {
                self.register(
                    PluginSlot::$variant,
                    name,
                    Arc::new(move |options: &PluginOptions| {
                        Ok(Plugin::$variant(Arc::new(factory(options)?)))
                    }),
                )
            }

            pub fn $get(&self, name: &str) -> Result<Arc<dyn $trait>, ConfigurationError> {
                match self.get(PluginSlot::$variant, name)? {
                    Plugin::$variant(plugin) => Ok(plugin),
                    other => Err(ConfigurationError::SlotMismatch {
                        slot: PluginSlot::$variant,
                        name: name.to_string(),
                        actual: other.slot(),
                    }),
                }
            }

            pub fn $create(
                &self,
                name: &str,
                options: &PluginOptions,
            ) -> Result<Arc<dyn $trait>, ConfigurationError> {
                match self.create(PluginSlot::$variant, name, options)? {
                    Plugin::$variant(plugin) => Ok(plugin),
                    other => Err(ConfigurationError::SlotMismatch {
                        slot: PluginSlot::$variant,
                        name: name.to_string(),
                        actual: other.slot(),
                    }),
                }
            }
        }
    };
}

typed_slot!(register_agent, agent, create_agent, Agent, Agent);
typed_slot!(register_runtime, runtime, create_runtime, Runtime, Runtime);
typed_slot!(register_scm, scm, create_scm, Scm, Scm);
typed_slot!(register_notifier, notifier, create_notifier, Notifier, Notifier);
typed_slot!(register_terminal, terminal, create_terminal, Terminal, Terminal);
