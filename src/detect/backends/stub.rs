use std::path::Path;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectParams, Detection};

/// Stub backend for testing and demos. Replays a fixed detection list.
///
/// The list is filtered through `DetectParams` like a real model would be,
/// so threshold and class-filter settings behave the same end to end.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
}

impl StubBackend {
    /// A backend that never detects anything.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    /// Load a JSON array of detections, e.g.
    /// `[{"class_id":0,"class_name":"egg","confidence":0.9,"box":[10,10,50,50]}]`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read fixture {}: {}", path.display(), e))?;
        let detections = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid fixture {}: {}", path.display(), e))?;
        Ok(Self { detections })
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>> {
        Ok(self
            .detections
            .iter()
            .filter(|d| params.admits(d))
            .cloned()
            .collect())
    }
}
