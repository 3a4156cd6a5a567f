use serde::{Deserialize, Serialize};

/// What the current decision cycle saw on screen. Ephemeral: derived per
/// cycle, fused into a verdict, and discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedContent {
    pub domain: Option<String>,
    pub url: Option<String>,
    pub window_title: String,
    pub recognized_text: String,
}

/// Which tier of the decision chain produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    AppName,
    AlwaysBlocked,
    AlwaysAllowed,
    SafetyNet,
    AiClassification,
    Default,
    Error,
}

/// Immutable verdict for one decision cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionVerdict {
    pub is_distraction: bool,
    pub confidence: f64,
    pub detected_domain: Option<String>,
    pub detected_url: Option<String>,
    pub reason: String,
    pub method: DetectionMethod,
    pub elapsed_ms: u64,
}
