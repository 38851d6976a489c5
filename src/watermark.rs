//! Watermark seam — post-processing applied to photos before delivery.
//!
//! Image compositing itself is a pluggable collaborator; the scheduler only
//! depends on this trait. `PassThrough` ships as the default implementation
//! and returns the payload untouched.

use std::path::Path;

use async_trait::async_trait;

use crate::error::WatermarkError;

/// Applies a watermark overlay to an image payload.
#[async_trait]
pub trait Watermarker: Send + Sync {
    /// Returns the watermarked image bytes.
    async fn apply(&self, image: Vec<u8>, watermark: &Path) -> Result<Vec<u8>, WatermarkError>;
}

/// No-op watermarker — verifies the overlay file exists, then returns the
/// payload unchanged.
pub struct PassThrough;

#[async_trait]
impl Watermarker for PassThrough {
    async fn apply(&self, image: Vec<u8>, watermark: &Path) -> Result<Vec<u8>, WatermarkError> {
        tokio::fs::metadata(watermark).await?;
        Ok(image)
    }
}
