use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::error::BridgeError;

use super::backend::VisionBackend;
use super::SharedVision;

/// Named vision backends.
///
/// Backends are wrapped in `Mutex` because every collaborator call takes `&mut self`.
pub struct VisionRegistry {
    backends: BTreeMap<String, SharedVision>,
    default_name: Option<String>,
}

impl VisionRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::backends::StubBackend::new());
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: VisionBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("vision backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SharedVision> {
        self.backends.get(name).cloned()
    }

    pub fn default_backend(&self) -> Option<SharedVision> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Resolve a configured backend name, warming it up before first use.
    pub fn select(&self, name: &str) -> Result<SharedVision> {
        let backend = self.get(name).ok_or_else(|| BridgeError::DeviceUnavailable {
            device: format!("vision:{}", name),
            reason: format!("not built in; available: {}", self.list().join(", ")),
        })?;
        backend
            .lock()
            .map_err(|_| anyhow!("vision backend lock poisoned"))?
            .warm_up()?;
        Ok(backend)
    }

    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

impl Default for VisionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
