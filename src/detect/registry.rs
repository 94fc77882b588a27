use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::{CpuBackend, CpuBackendConfig, StubBackend};

/// Registry of detector backends available to the recorder.
///
/// The session controller owns its detector exclusively, so backends are
/// handed out by value with `take` rather than shared.
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn DetectorBackend>>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: BTreeMap::new(),
            default_name: None,
        }
    }

    /// Registry preloaded with the built-in backends (`cpu` is the default).
    pub fn with_builtin(cpu: CpuBackendConfig) -> Self {
        let mut registry = Self::new();
        registry.register(CpuBackend::new(cpu));
        registry.register(StubBackend::new());
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Remove a backend by name and hand ownership to the caller.
    pub fn take(&mut self, name: &str) -> Result<Box<dyn DetectorBackend>> {
        let backend = self.backends.remove(name).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        if self.default_name.as_deref() == Some(name) {
            self.default_name = None;
        }
        Ok(backend)
    }

    /// Remove the default backend and hand ownership to the caller.
    pub fn take_default(&mut self) -> Result<Box<dyn DetectorBackend>> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no default detector backend"))?;
        self.take(&name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_defaults_to_cpu() {
        let mut registry = BackendRegistry::with_builtin(CpuBackendConfig::default());
        assert_eq!(registry.list(), vec!["cpu".to_string(), "stub".to_string()]);
        assert_eq!(registry.default_name(), Some("cpu"));

        let backend = registry.take_default().expect("default backend");
        assert_eq!(backend.name(), "cpu");
        assert!(registry.default_name().is_none());
        assert_eq!(registry.list(), vec!["stub".to_string()]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let mut registry = BackendRegistry::with_builtin(CpuBackendConfig::default());
        assert!(registry.set_default("yolo").is_err());
        let err = registry.take("yolo").err().expect("missing backend");
        assert!(err.to_string().contains("cpu, stub"));
    }

    #[test]
    fn set_default_switches_backend() -> Result<()> {
        let mut registry = BackendRegistry::with_builtin(CpuBackendConfig::default());
        registry.set_default("stub")?;
        assert_eq!(registry.take_default()?.name(), "stub");
        Ok(())
    }
}
