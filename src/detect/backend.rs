use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{DetectParams, Detection};

/// Detector backend trait.
///
/// A backend wraps one loaded model. It is constructed once at startup and
/// shared behind a `Mutex`, so `detect` calls are serialized even when the
/// underlying runtime is not safe for concurrent inference.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded RGB image.
    ///
    /// Implementations must honour `params.confidence_threshold` and
    /// `params.classes_to_track`, and must not retain the image past the call.
    fn detect(&mut self, image: &RgbImage, params: &DetectParams) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
