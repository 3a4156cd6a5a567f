use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Text recognized from an image region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f64,
}

impl RecognizedText {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// A text-recognition backend. The service tries a platform-accelerated
/// primary engine first when one is configured, then a general-purpose
/// fallback. Engines receive PNG-encoded bytes of the already cropped and
/// downscaled region.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;
    async fn recognize(&self, png_bytes: &[u8]) -> Result<RecognizedText>;
}
