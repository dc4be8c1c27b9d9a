//! Tray analysis: detect, classify, annotate, verdict.

use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};

use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::error::{DecodingError, ImageError, ImageFormatHint};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::{OutputFormat, OutputSettings, TrayConfig};
use crate::detect::{DetectParams, Detection, SharedBackend};
use crate::error::AnalyzeError;
use crate::overlay::{self, BannerStyle, OverlayStyle};

/// What a detection means for the tray, decided once from the class name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    Egg,
    Empty,
}

impl SlotKind {
    /// `"egg"` (any case) is an egg; every other class counts as an empty slot.
    pub fn classify(class_name: &str) -> Self {
        if class_name.eq_ignore_ascii_case("egg") {
            SlotKind::Egg
        } else {
            SlotKind::Empty
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            SlotKind::Egg => overlay::POSITIVE_COLOR,
            SlotKind::Empty => overlay::NEGATIVE_COLOR,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrayStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Not OK")]
    NotOk,
}

impl TrayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrayStatus::Ok => "OK",
            TrayStatus::NotOk => "Not OK",
        }
    }

    pub fn banner_text(&self) -> String {
        format!("Tray: {}", self.as_str())
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            TrayStatus::Ok => overlay::POSITIVE_COLOR,
            TrayStatus::NotOk => overlay::NEGATIVE_COLOR,
        }
    }
}

/// Running tally of classified detections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrayCounts {
    pub eggs: u32,
    pub empty_slots: u32,
}

impl TrayCounts {
    pub fn record(&mut self, kind: SlotKind) {
        match kind {
            SlotKind::Egg => self.eggs += 1,
            SlotKind::Empty => self.empty_slots += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.eggs + self.empty_slots
    }

    /// A tray passes only when no empty slot was seen.
    pub fn status(&self) -> TrayStatus {
        if self.empty_slots == 0 {
            TrayStatus::Ok
        } else {
            TrayStatus::NotOk
        }
    }
}

/// Annotated pixels and verdict, before encoding.
#[derive(Clone, Debug)]
pub struct Inspection {
    pub counts: TrayCounts,
    pub status: TrayStatus,
    pub image: RgbImage,
}

/// Outcome of one analysis call.
#[derive(Clone, Debug, PartialEq)]
pub struct TrayResult {
    pub num_eggs: u32,
    pub num_empty_slots: u32,
    pub tray_status: TrayStatus,
    pub annotated_image: Vec<u8>,
    pub format: OutputFormat,
}

impl TrayResult {
    pub fn to_report(&self) -> TrayReport {
        TrayReport {
            num_eggs: self.num_eggs,
            num_empty_slots: self.num_empty_slots,
            tray_status: self.tray_status,
            annotated_image_base64: BASE64.encode(&self.annotated_image),
        }
    }
}

/// JSON shape returned to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrayReport {
    pub num_eggs: u32,
    pub num_empty_slots: u32,
    pub tray_status: TrayStatus,
    pub annotated_image_base64: String,
}

/// Runs the per-image pipeline against a shared, already loaded detector.
#[derive(Clone)]
pub struct TrayAnalyzer {
    detector: SharedBackend,
    params: DetectParams,
    output: OutputSettings,
    overlay_style: OverlayStyle,
    banner_style: BannerStyle,
}

impl TrayAnalyzer {
    pub fn new(detector: SharedBackend, params: DetectParams) -> Self {
        Self {
            detector,
            params,
            output: OutputSettings::default(),
            overlay_style: OverlayStyle::default(),
            banner_style: BannerStyle::default(),
        }
    }

    pub fn from_config(detector: SharedBackend, cfg: &TrayConfig) -> Self {
        Self::new(detector, cfg.detect_params()).with_output(cfg.output)
    }

    pub fn with_output(mut self, output: OutputSettings) -> Self {
        self.output = output;
        self
    }

    /// Name of the backend serving this analyzer.
    pub fn backend_name(&self) -> Result<&'static str, AnalyzeError> {
        let guard = self
            .detector
            .lock()
            .map_err(|_| AnalyzeError::DetectorFailure(anyhow!("detector lock poisoned")))?;
        Ok(guard.name())
    }

    /// Decode, inspect and re-encode one tray photograph.
    pub fn analyze(&self, image_bytes: &[u8]) -> Result<TrayResult, AnalyzeError> {
        let decoded = decode_image(image_bytes)?;
        let inspection = self.inspect(decoded)?;
        let annotated_image = encode(&inspection.image, &self.output)?;

        log::info!(
            "tray analyzed: eggs={} empty_slots={} status={} ({} bytes in, {} bytes out)",
            inspection.counts.eggs,
            inspection.counts.empty_slots,
            inspection.status.as_str(),
            image_bytes.len(),
            annotated_image.len()
        );

        Ok(TrayResult {
            num_eggs: inspection.counts.eggs,
            num_empty_slots: inspection.counts.empty_slots,
            tray_status: inspection.status,
            annotated_image,
            format: self.output.format,
        })
    }

    /// Run detection on decoded pixels and draw every overlay, without encoding.
    pub fn inspect(&self, mut image: RgbImage) -> Result<Inspection, AnalyzeError> {
        let detections = self.run_detector(&image)?;

        let mut counts = TrayCounts::default();
        for detection in detections {
            let kind = SlotKind::classify(&detection.class_name);
            let named_empty = detection.class_name.to_ascii_lowercase().starts_with("empty");
            if kind == SlotKind::Empty && !named_empty {
                log::warn!(
                    "class '{}' is not an egg class and will be counted as an empty slot",
                    detection.class_name
                );
            }
            log::debug!(
                "detection {} ({:.2}) at {:?} -> {:?}",
                detection.class_name,
                detection.confidence,
                <[i32; 4]>::from(detection.bbox),
                kind
            );
            counts.record(kind);
            let label = overlay::detection_label(&detection.class_name, detection.confidence);
            overlay::render_overlay(
                &mut image,
                &detection.bbox,
                kind.color(),
                &label,
                &self.overlay_style,
            );
        }

        let status = counts.status();
        if self.output.status_banner {
            overlay::draw_status_banner(
                &mut image,
                &status.banner_text(),
                status.color(),
                overlay::BANNER_TEXT_COLOR,
                &self.banner_style,
            );
        }

        Ok(Inspection {
            counts,
            status,
            image,
        })
    }

    fn run_detector(&self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzeError> {
        let mut guard = self
            .detector
            .lock()
            .map_err(|_| AnalyzeError::DetectorFailure(anyhow!("detector lock poisoned")))?;
        // A panicking backend fails this call only. The guard is released
        // normally afterwards, so the lock is not poisoned.
        match panic::catch_unwind(AssertUnwindSafe(|| guard.detect(image, &self.params))) {
            Ok(result) => result.map_err(AnalyzeError::DetectorFailure),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log::error!("detector backend '{}' panicked: {}", guard.name(), message);
                Err(AnalyzeError::DetectorFailure(anyhow!(
                    "detector panicked: {}",
                    message
                )))
            }
        }
    }
}

/// Decode upload bytes into RGB pixels.
///
/// JPEG decoding is lenient about truncated streams and fills the missing
/// rows, so a JPEG must end with its end-of-image marker to be accepted.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, AnalyzeError> {
    if matches!(image::guess_format(bytes), Ok(ImageFormat::Jpeg)) && !has_jpeg_eoi(bytes) {
        return Err(AnalyzeError::InvalidImage(ImageError::Decoding(
            DecodingError::new(
                ImageFormatHint::Exact(ImageFormat::Jpeg),
                "truncated JPEG stream: missing end-of-image marker",
            ),
        )));
    }
    let decoded = image::load_from_memory(bytes).map_err(AnalyzeError::InvalidImage)?;
    Ok(decoded.to_rgb8())
}

/// Trailing zero or whitespace padding after the marker is tolerated.
fn has_jpeg_eoi(bytes: &[u8]) -> bool {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
        .map_or(0, |idx| idx + 1);
    bytes[..end].ends_with(&[0xFF, 0xD9])
}

/// Encode annotated pixels in the configured format.
pub fn encode(image: &RgbImage, output: &OutputSettings) -> Result<Vec<u8>, AnalyzeError> {
    let mut buf = Cursor::new(Vec::new());
    let (w, h) = image.dimensions();
    let encoded = match output.format {
        OutputFormat::Jpeg => JpegEncoder::new_with_quality(&mut buf, output.jpeg_quality)
            .write_image(image.as_raw(), w, h, ExtendedColorType::Rgb8),
        OutputFormat::Png => {
            PngEncoder::new(&mut buf).write_image(image.as_raw(), w, h, ExtendedColorType::Rgb8)
        }
    };
    encoded.map_err(AnalyzeError::Encode)?;
    Ok(buf.into_inner())
}
