use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::DetectParams;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CLASS_NAMES: [&str; 2] = ["egg", "empty"];
const DEFAULT_JPEG_QUALITY: u8 = 90;

const KNOWN_BACKENDS: [&str; 2] = ["stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct TrayConfigFile {
    api: Option<ApiConfigFile>,
    detection: Option<DetectionConfigFile>,
    model: Option<ModelConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    classes_to_track: Option<Vec<u32>>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    backend: Option<String>,
    path: Option<PathBuf>,
    input_size: Option<u32>,
    class_names: Option<Vec<String>>,
    fixture_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    format: Option<OutputFormat>,
    jpeg_quality: Option<u8>,
    status_banner: Option<bool>,
}

/// Process-wide configuration. Loaded once at startup, read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TrayConfig {
    pub api_addr: String,
    pub max_upload_bytes: usize,
    pub detection: DetectionSettings,
    pub model: ModelSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub classes_to_track: Option<Vec<u32>>,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub backend: String,
    pub path: Option<PathBuf>,
    pub input_size: u32,
    pub class_names: Vec<String>,
    pub fixture_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSettings {
    pub format: OutputFormat,
    pub jpeg_quality: u8,
    pub status_banner: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            status_banner: true,
        }
    }
}

/// Encoding of the annotated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self::from_file(TrayConfigFile::default())
    }
}

impl TrayConfig {
    /// Load from the file named by `TRAY_CONFIG` (if any), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TrayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Detection parameters handed to the detector on every call.
    pub fn detect_params(&self) -> DetectParams {
        DetectParams {
            confidence_threshold: self.detection.confidence_threshold,
            classes_to_track: self.detection.classes_to_track.clone(),
        }
    }

    fn from_file(file: TrayConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let output_defaults = OutputSettings::default();

        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            detection: DetectionSettings {
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                classes_to_track: detection.classes_to_track,
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            model: ModelSettings {
                backend: model.backend.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                path: model.path,
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                class_names: model.class_names.unwrap_or_else(|| {
                    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
                }),
                fixture_path: model.fixture_path,
            },
            output: OutputSettings {
                format: output.format.unwrap_or(output_defaults.format),
                jpeg_quality: output.jpeg_quality.unwrap_or(output_defaults.jpeg_quality),
                status_banner: output.status_banner.unwrap_or(output_defaults.status_banner),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("TRAY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(bytes) = non_empty_env("TRAY_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("TRAY_MAX_UPLOAD_BYTES must be an integer number of bytes"))?;
        }
        if let Some(threshold) = non_empty_env("TRAY_CONFIDENCE_THRESHOLD") {
            self.detection.confidence_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("TRAY_CONFIDENCE_THRESHOLD must be a number"))?;
        }
        if let Ok(classes) = std::env::var("TRAY_CLASSES") {
            self.detection.classes_to_track = parse_class_ids(&classes)?;
        }
        if let Some(backend) = non_empty_env("TRAY_BACKEND") {
            self.model.backend = backend;
        }
        if let Some(path) = non_empty_env("TRAY_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty_env("TRAY_FIXTURE_PATH") {
            self.model.fixture_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Check ranges and normalize fields. Call again after overriding values in code.
    pub fn validate(&mut self) -> Result<()> {
        let threshold = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within 0..=1, got {}",
                threshold
            ));
        }
        let iou = self.detection.iou_threshold;
        if !(0.0..=1.0).contains(&iou) {
            return Err(anyhow!("iou_threshold must be within 0..=1, got {}", iou));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model input_size must be greater than zero"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }

        self.model.backend = self.model.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.model.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}'; expected one of {:?}",
                self.model.backend,
                KNOWN_BACKENDS
            ));
        }
        if self.model.backend == "tract" && self.model.path.is_none() {
            return Err(anyhow!("the tract backend requires model.path (TRAY_MODEL_PATH)"));
        }
        if let Some(classes) = &mut self.detection.classes_to_track {
            classes.sort_unstable();
            classes.dedup();
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse a comma separated class-id list. An empty list clears the filter.
pub fn parse_class_ids(value: &str) -> Result<Option<Vec<u32>>> {
    let ids = split_csv(value)
        .into_iter()
        .map(|entry| {
            entry
                .parse::<u32>()
                .map_err(|_| anyhow!("invalid class id '{}'", entry))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(if ids.is_empty() { None } else { Some(ids) })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
