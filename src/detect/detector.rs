use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;
use tokio::time::Instant;

use crate::classify::ClassificationService;
use crate::context::ContextCache;
use crate::ocr::{extract_domain, BrowserKind, TextRecognitionService};
use crate::sensing::Frame;
use crate::window::WindowSnapshot;

use super::rules::{any_rule_matches, in_safety_net, is_known_safe_app};
use super::types::{DetectedContent, DetectionMethod, DetectionVerdict};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Classification results below this confidence are never surfaced as a
    /// distraction; uncertainty favors the user.
    pub classification_floor: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            classification_floor: 0.7,
        }
    }
}

/// Tiered decision engine. Ordered tiers, first match wins:
/// known-safe app, always-blocked, always-allowed, safety-net blocklist,
/// AI classification, default. Fails closed: an internal error becomes a
/// distraction verdict at half confidence.
pub struct DistractionDetector {
    context: Arc<ContextCache>,
    ocr: Arc<TextRecognitionService>,
    classifier: Arc<ClassificationService>,
    config: DetectorConfig,
}

impl DistractionDetector {
    pub fn new(
        context: Arc<ContextCache>,
        ocr: Arc<TextRecognitionService>,
        classifier: Arc<ClassificationService>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            context,
            ocr,
            classifier,
            config,
        }
    }

    pub async fn detect(
        &self,
        session_id: &str,
        window: &WindowSnapshot,
        frame: Option<&Frame>,
    ) -> DetectionVerdict {
        let started = Instant::now();
        match self.run_tiers(session_id, window, frame, started).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!("detection failed, failing closed: {err:#}");
                DetectionVerdict {
                    is_distraction: true,
                    confidence: 0.5,
                    detected_domain: None,
                    detected_url: None,
                    reason: format!("detection error: {err:#}"),
                    method: DetectionMethod::Error,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        }
    }

    async fn run_tiers(
        &self,
        session_id: &str,
        window: &WindowSnapshot,
        frame: Option<&Frame>,
        started: Instant,
    ) -> Result<DetectionVerdict> {
        let verdict = |is_distraction: bool,
                       confidence: f64,
                       content: &DetectedContent,
                       reason: String,
                       method: DetectionMethod| DetectionVerdict {
            is_distraction,
            confidence,
            detected_domain: content.domain.clone(),
            detected_url: content.url.clone(),
            reason,
            method,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let mut content = DetectedContent {
            window_title: window.window_title.clone(),
            ..DetectedContent::default()
        };

        // Known-safe applications short-circuit everything.
        if is_known_safe_app(&window.app_name) {
            return Ok(verdict(
                false,
                1.0,
                &content,
                "safe application".to_string(),
                DetectionMethod::AppName,
            ));
        }

        // Recognize a domain only for browsers with a frame on hand.
        // Recognition failure leaves the domain unset and the remaining
        // tiers work from the application name alone.
        if let (Some(browser), Some(frame)) = (BrowserKind::from_app_name(&window.app_name), frame)
        {
            let recognized = self.ocr.recognize_address_bar(&frame.image, browser).await;
            if !recognized.is_empty() {
                let matched = extract_domain(&recognized.text);
                content.domain = matched.domain;
                content.url = matched.url;
                content.recognized_text = recognized.text;
            } else {
                debug!("address-bar recognition came back empty for {}", window.app_name);
            }
        }

        let rules = self.context.session_rules(session_id).await;
        let process = window.process_name.as_deref();
        let domain = content.domain.as_deref();

        if any_rule_matches(&rules.always_blocked, &window.app_name, process, domain) {
            return Ok(verdict(
                true,
                1.0,
                &content,
                "always-blocked rule".to_string(),
                DetectionMethod::AlwaysBlocked,
            ));
        }

        if any_rule_matches(&rules.always_allowed, &window.app_name, process, domain) {
            return Ok(verdict(
                false,
                1.0,
                &content,
                "always-allowed rule".to_string(),
                DetectionMethod::AlwaysAllowed,
            ));
        }

        if let Some(domain) = domain {
            if in_safety_net(domain) {
                return Ok(verdict(
                    true,
                    0.95,
                    &content,
                    "safety-net blocklist".to_string(),
                    DetectionMethod::SafetyNet,
                ));
            }
        }

        if let Some(task_context) = self.context.task_context(session_id).await {
            let result = self.classifier.classify(&content, &task_context).await;
            let is_distraction =
                result.is_distraction && result.confidence >= self.config.classification_floor;
            return Ok(verdict(
                is_distraction,
                result.confidence,
                &content,
                result.reason,
                DetectionMethod::AiClassification,
            ));
        }

        Ok(verdict(
            true,
            0.5,
            &content,
            "no task context".to_string(),
            DetectionMethod::Default,
        ))
    }
}
