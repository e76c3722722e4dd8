//! Addressable namespace of running saga instances.
//!
//! Instances are registered under a name derived deterministically from
//! their correlation key, so anything that knows the key can reach the
//! instance without holding a reference to it. A name is taken by at most
//! one instance at a time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors returned by [`InstanceRegistry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An instance is already registered under this name
    #[error("instance already exists: {0}")]
    AlreadyExists(String),

    /// A writer panicked while holding the registry lock
    #[error("instance registry lock poisoned")]
    Poisoned,
}

/// Map from instance name to instance handle.
///
/// Cloning the registry shares the underlying map.
#[derive(Debug)]
pub struct InstanceRegistry<H> {
    instances: Arc<RwLock<HashMap<String, H>>>,
}

impl<H> Clone for InstanceRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            instances: Arc::clone(&self.instances),
        }
    }
}

impl<H> Default for InstanceRegistry<H> {
    fn default() -> Self {
        Self {
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<H: Clone> InstanceRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyExists`] if the name is taken.
    pub fn insert(&self, name: impl Into<String>, handle: H) -> Result<(), RegistryError> {
        let name = name.into();
        let mut instances = self.instances.write().map_err(|_| RegistryError::Poisoned)?;

        if instances.contains_key(&name) {
            return Err(RegistryError::AlreadyExists(name));
        }

        tracing::debug!(instance = %name, "Instance registered");
        instances.insert(name, handle);
        Ok(())
    }

    /// Look up the instance registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the lock is poisoned.
    pub fn get(&self, name: &str) -> Result<Option<H>, RegistryError> {
        let instances = self.instances.read().map_err(|_| RegistryError::Poisoned)?;
        Ok(instances.get(name).cloned())
    }

    /// Remove and return the instance registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the lock is poisoned.
    pub fn remove(&self, name: &str) -> Result<Option<H>, RegistryError> {
        let mut instances = self.instances.write().map_err(|_| RegistryError::Poisoned)?;
        let removed = instances.remove(name);
        if removed.is_some() {
            tracing::debug!(instance = %name, "Instance deregistered");
        }
        Ok(removed)
    }

    /// Names of all registered instances, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Poisoned`] if the lock is poisoned.
    pub fn names(&self) -> Result<Vec<String>, RegistryError> {
        let instances = self.instances.read().map_err(|_| RegistryError::Poisoned)?;
        let mut names: Vec<String> = instances.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
