use anyhow::{Context, Result};
use image::DynamicImage;
use log::{debug, warn};
use std::io::Cursor;
use std::sync::Arc;
use tokio::time::Duration;

use super::engine::{OcrEngine, RecognizedText};

/// Browsers whose address bar we know how to crop out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chrome,
    Firefox,
    Safari,
    Edge,
    Brave,
    Opera,
    Chromium,
}

impl BrowserKind {
    /// Matches an application name against the known browsers
    /// (case-insensitive substring).
    pub fn from_app_name(app_name: &str) -> Option<Self> {
        let lower = app_name.to_lowercase();
        const TABLE: &[(&str, BrowserKind)] = &[
            ("firefox", BrowserKind::Firefox),
            ("safari", BrowserKind::Safari),
            ("edge", BrowserKind::Edge),
            ("brave", BrowserKind::Brave),
            ("opera", BrowserKind::Opera),
            ("chromium", BrowserKind::Chromium),
            ("chrome", BrowserKind::Chrome),
        ];
        TABLE
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, kind)| *kind)
    }

    /// Height of the band at the top of a capture that contains the address
    /// bar. Chromium-family browsers share the default.
    pub fn address_bar_height(&self) -> u32 {
        match self {
            BrowserKind::Firefox => 110,
            BrowserKind::Safari => 100,
            _ => 120,
        }
    }
}

/// Pixel region of an image, used to focus recognition on a band.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Bound on one recognition call, covering preprocessing and both engines.
    pub timeout: Duration,
    /// Downscale applied to the (cropped) region before recognition.
    pub downscale: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            downscale: 0.5,
        }
    }
}

/// Region-focused text recognition with a primary/fallback engine strategy.
///
/// Recognition failure never aborts a decision cycle: when every path fails
/// the service returns empty text at zero confidence.
pub struct TextRecognitionService {
    primary: Option<Arc<dyn OcrEngine>>,
    fallback: Arc<dyn OcrEngine>,
    config: OcrConfig,
}

impl TextRecognitionService {
    pub fn new(
        primary: Option<Arc<dyn OcrEngine>>,
        fallback: Arc<dyn OcrEngine>,
        config: OcrConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
        }
    }

    /// Recognizes text in `image`, optionally restricted to `region`.
    pub async fn recognize(&self, image: &DynamicImage, region: Option<Region>) -> RecognizedText {
        let bounded = tokio::time::timeout(self.config.timeout, self.recognize_inner(image, region));
        match bounded.await {
            Ok(result) => result,
            Err(_) => {
                warn!("text recognition timed out after {:?}", self.config.timeout);
                RecognizedText::empty()
            }
        }
    }

    /// Crops to the browser's address-bar band before recognizing.
    pub async fn recognize_address_bar(
        &self,
        image: &DynamicImage,
        browser: BrowserKind,
    ) -> RecognizedText {
        let band_height = browser.address_bar_height().min(image.height());
        if band_height == 0 || image.width() == 0 {
            return RecognizedText::empty();
        }
        let region = Region {
            x: 0,
            y: 0,
            width: image.width(),
            height: band_height,
        };
        self.recognize(image, Some(region)).await
    }

    async fn recognize_inner(
        &self,
        image: &DynamicImage,
        region: Option<Region>,
    ) -> RecognizedText {
        let prepared = match self.prepare(image.clone(), region).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("recognition preprocessing failed: {err:#}");
                return RecognizedText::empty();
            }
        };

        if let Some(primary) = &self.primary {
            match primary.recognize(&prepared).await {
                Ok(result) => {
                    debug!(
                        "{} recognized {} chars (confidence {:.2})",
                        primary.name(),
                        result.text.len(),
                        result.confidence
                    );
                    return result;
                }
                Err(err) => {
                    warn!(
                        "{} failed, falling back to {}: {err:#}",
                        primary.name(),
                        self.fallback.name()
                    );
                }
            }
        }

        match self.fallback.recognize(&prepared).await {
            Ok(result) => result,
            Err(err) => {
                warn!("{} failed, returning empty text: {err:#}", self.fallback.name());
                RecognizedText::empty()
            }
        }
    }

    /// Crop, downscale, and PNG-encode off the async runtime.
    async fn prepare(&self, image: DynamicImage, region: Option<Region>) -> Result<Vec<u8>> {
        let downscale = self.config.downscale;
        tokio::task::spawn_blocking(move || {
            let cropped = match region {
                Some(region) => {
                    let width = region.width.min(image.width().saturating_sub(region.x));
                    let height = region.height.min(image.height().saturating_sub(region.y));
                    if width == 0 || height == 0 {
                        anyhow::bail!("region lies outside the image");
                    }
                    image.crop_imm(region.x, region.y, width, height)
                }
                None => image,
            };

            let width = ((cropped.width() as f32 * downscale) as u32).max(1);
            let height = ((cropped.height() as f32 * downscale) as u32).max(1);
            let scaled = cropped.resize_exact(width, height, image::imageops::FilterType::Triangle);

            let mut buf = Cursor::new(Vec::new());
            scaled
                .write_to(&mut buf, image::ImageFormat::Png)
                .context("failed to encode region for recognition")?;
            Ok(buf.into_inner())
        })
        .await
        .context("recognition preprocessing worker join failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubEngine {
        name: &'static str,
        reply: Result<RecognizedText, String>,
        calls: AtomicU32,
    }

    impl StubEngine {
        fn ok(name: &'static str, text: &str, confidence: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok(RecognizedText {
                    text: text.to_string(),
                    confidence,
                }),
                calls: AtomicU32::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Err("engine unavailable".to_string()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrEngine for StubEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn recognize(&self, _png_bytes: &[u8]) -> Result<RecognizedText> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .map_err(|message| anyhow::anyhow!(message))
        }
    }

    struct HangingEngine;

    #[async_trait]
    impl OcrEngine for HangingEngine {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn recognize(&self, _png_bytes: &[u8]) -> Result<RecognizedText> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(RecognizedText::empty())
        }
    }

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            400,
            300,
            image::Rgba([255, 255, 255, 255]),
        ))
    }

    #[tokio::test]
    async fn primary_engine_short_circuits_the_fallback() {
        let primary = StubEngine::ok("native", "https://docs.rs", 0.92);
        let fallback = StubEngine::ok("universal", "should not run", 0.5);
        let service = TextRecognitionService::new(
            Some(primary.clone()),
            fallback.clone(),
            OcrConfig::default(),
        );

        let result = service.recognize(&test_image(), None).await;
        assert_eq!(result.text, "https://docs.rs");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn primary_failure_falls_back() {
        let primary = StubEngine::failing("native");
        let fallback = StubEngine::ok("universal", "github.com", 0.6);
        let service = TextRecognitionService::new(
            Some(primary.clone()),
            fallback.clone(),
            OcrConfig::default(),
        );

        let result = service.recognize(&test_image(), None).await;
        assert_eq!(result.text, "github.com");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn total_failure_degrades_to_empty_text() {
        let service = TextRecognitionService::new(
            Some(StubEngine::failing("native")),
            StubEngine::failing("universal"),
            OcrConfig::default(),
        );

        let result = service.recognize(&test_image(), None).await;
        assert!(result.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn recognition_is_time_bounded() {
        let service = TextRecognitionService::new(
            None,
            Arc::new(HangingEngine),
            OcrConfig::default(),
        );

        let result = service.recognize(&test_image(), None).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn address_bar_band_is_clamped_to_the_image() {
        let fallback = StubEngine::ok("universal", "", 0.0);
        let service = TextRecognitionService::new(None, fallback, OcrConfig::default());

        // 40 px tall image; the Safari band (100 px) must clamp, not fail.
        let short = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            400,
            40,
            image::Rgba([0, 0, 0, 255]),
        ));
        let result = service.recognize_address_bar(&short, BrowserKind::Safari).await;
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn browser_detection_matches_substrings() {
        assert_eq!(
            BrowserKind::from_app_name("Google Chrome"),
            Some(BrowserKind::Chrome)
        );
        assert_eq!(
            BrowserKind::from_app_name("firefox developer edition"),
            Some(BrowserKind::Firefox)
        );
        assert_eq!(BrowserKind::from_app_name("Visual Studio Code"), None);
    }

    #[test]
    fn band_heights_follow_the_lookup_table() {
        assert_eq!(BrowserKind::Chrome.address_bar_height(), 120);
        assert_eq!(BrowserKind::Firefox.address_bar_height(), 110);
        assert_eq!(BrowserKind::Safari.address_bar_height(), 100);
        assert_eq!(BrowserKind::Brave.address_bar_height(), 120);
    }
}
