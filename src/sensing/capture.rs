use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::DynamicImage;

/// Capture primitive for the primary display. Implementations are platform
/// bridges (or mocks in tests) returning encoded image bytes; they may fail
/// transiently and are retried by the sampler.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture_primary(&self) -> Result<Vec<u8>>;
}

/// A downscaled capture of the primary display. Frames are immutable once
/// produced; the sampler keeps a small history of them for fallback use.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: DynamicImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
