use thiserror::Error;

/// Terminal failures of one tray analysis. There are no partial results.
#[derive(Error, Debug)]
pub enum AnalyzeError {
    /// Input bytes could not be decoded into a pixel buffer.
    #[error("invalid image: {0}")]
    InvalidImage(#[source] image::ImageError),

    /// The detector backend failed, or its lock was poisoned by an earlier panic.
    #[error("detector failure: {0:#}")]
    DetectorFailure(#[source] anyhow::Error),

    /// The annotated image could not be re-encoded.
    #[error("failed to encode annotated image: {0}")]
    Encode(#[source] image::ImageError),
}

impl AnalyzeError {
    /// Caller-side errors are reported as client errors, everything else as server errors.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalyzeError::InvalidImage(_))
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzeError::InvalidImage(_) => "invalid_image",
            AnalyzeError::DetectorFailure(_) => "detector_failure",
            AnalyzeError::Encode(_) => "encode_failure",
        }
    }
}
