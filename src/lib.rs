//! Egg tray inspector.
//!
//! Takes a photograph of an egg tray, runs an object detector over it, counts
//! eggs and empty slots, and returns an annotated copy of the image with a
//! pass/fail verdict.
//!
//! # Module Structure
//!
//! - `detect`: detector backends, detection types, YOLO output decoding
//! - `tray`: the per-image pipeline (`TrayAnalyzer`) and its report types
//! - `overlay`: box, label and banner drawing on `RgbImage`
//! - `config`: file + environment configuration
//! - `api`: HTTP prediction endpoint
//! - `error`: analysis error kinds

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod overlay;
pub mod tray;

pub use config::{OutputFormat, OutputSettings, TrayConfig};
pub use detect::{BoundingBox, DetectParams, Detection, DetectorBackend, StubBackend};
pub use error::AnalyzeError;
pub use tray::{SlotKind, TrayAnalyzer, TrayReport, TrayResult, TrayStatus};
