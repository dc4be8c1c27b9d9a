use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};

use crate::config::TrayConfig;

use super::backend::DetectorBackend;
use super::backends::StubBackend;

/// Shared handle to a loaded backend.
pub type SharedBackend = Arc<Mutex<dyn DetectorBackend>>;

/// Thread-safe registry of detector backends.
///
/// Backends are wrapped in `Mutex` because `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, SharedBackend>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<B: DetectorBackend + 'static>(&mut self, backend: B) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<SharedBackend> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    /// List registered backends, sorted by name.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the warm-up hook on the default backend.
    pub fn warm_up_default(&self) -> Result<()> {
        let backend = self
            .default_backend()
            .ok_or_else(|| anyhow!("no detector backend registered"))?;
        let mut guard = backend
            .lock()
            .map_err(|_| anyhow!("default backend lock poisoned"))?;
        guard.warm_up()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the registry described by the configuration and select its backend.
///
/// The stub backend is always registered; the tract backend is loaded only when
/// selected, since loading a model is expensive.
pub fn registry_from_config(cfg: &TrayConfig) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();

    let stub = match &cfg.model.fixture_path {
        Some(path) => StubBackend::from_json_file(path)?,
        None => StubBackend::new(),
    };
    registry.register(stub);

    if cfg.model.backend == "tract" {
        register_tract(&mut registry, cfg)?;
    }

    registry.set_default(&cfg.model.backend)?;
    registry
        .warm_up_default()
        .with_context(|| format!("warm-up of backend '{}' failed", cfg.model.backend))?;
    log::info!(
        "detector backends registered: {:?} (default: {})",
        registry.list(),
        cfg.model.backend
    );
    Ok(registry)
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, cfg: &TrayConfig) -> Result<()> {
    let path = cfg
        .model
        .path
        .as_ref()
        .ok_or_else(|| anyhow!("model.path is required for the tract backend"))?;
    let backend = super::backends::TractBackend::new(
        path,
        cfg.model.input_size,
        cfg.model.class_names.clone(),
    )?
    .with_iou_threshold(cfg.detection.iou_threshold);
    log::info!("loaded ONNX model from {}", path.display());
    registry.register(backend);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, _cfg: &TrayConfig) -> Result<()> {
    Err(anyhow!(
        "backend 'tract' requested but this build lacks the backend-tract feature"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectParams, Detection};
    use image::RgbImage;

    struct NamedBackend(&'static str);

    impl DetectorBackend for NamedBackend {
        fn name(&self) -> &'static str {
            self.0
        }

        fn detect(&mut self, _image: &RgbImage, _params: &DetectParams) -> Result<Vec<Detection>> {
            Ok(vec![Detection {
                class_id: 0,
                class_name: self.0.to_string(),
                confidence: 1.0,
                bbox: BoundingBox::new(0, 0, 1, 1).unwrap(),
            }])
        }
    }

    #[test]
    fn first_registered_backend_is_default() {
        let mut registry = BackendRegistry::new();
        registry.register(NamedBackend("alpha"));
        registry.register(NamedBackend("beta"));
        assert_eq!(registry.default_name(), Some("alpha"));
        assert_eq!(registry.list(), vec!["alpha", "beta"]);

        registry.set_default("beta").unwrap();
        let backend = registry.default_backend().unwrap();
        let detections = backend
            .lock()
            .unwrap()
            .detect(&RgbImage::new(2, 2), &DetectParams::default())
            .unwrap();
        assert_eq!(detections[0].class_name, "beta");
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = BackendRegistry::new();
        registry.register(NamedBackend("alpha"));
        assert!(registry.set_default("missing").is_err());
        assert_eq!(registry.default_name(), Some("alpha"));
    }

    #[test]
    fn default_config_selects_stub() {
        let registry = registry_from_config(&TrayConfig::default()).unwrap();
        assert_eq!(registry.default_name(), Some("stub"));
    }
}
