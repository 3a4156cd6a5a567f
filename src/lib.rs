//! Attention-monitoring core.
//!
//! Given a declared task and optional reference materials, the monitor
//! repeatedly samples what the user is looking at (active window, on-screen
//! text) and decides, with escalating confidence, whether the current
//! activity is on-task or a distraction, ultimately driving a visual block
//! when confidence is high.
//!
//! The crate owns the monitoring and decision pipeline: a state machine over
//! attention levels, an adaptive screen sampler, tile-based change
//! detection, region-focused text recognition with a primary/fallback
//! strategy, AI content classification behind a circuit breaker, and a
//! tiered distraction decision engine. Persistence, authentication, the
//! dashboard, reference ingestion, and the on-screen blocking surface are
//! external collaborators reached through the traits in this crate
//! ([`window::WindowQuery`], [`sensing::ScreenCapture`], [`ocr::OcrEngine`],
//! [`classify::ReasoningBackend`], [`context::SessionStore`],
//! [`monitor::BlockingSurface`], [`monitor::ActivitySink`]).

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod detect;
pub mod monitor;
pub mod ocr;
pub mod resilience;
pub mod sensing;
pub mod state_machine;
pub mod window;

use std::sync::Arc;

pub use config::MonitorConfig;
pub use monitor::SessionMonitor;
pub use state_machine::{AttentionState, MonitoringStateMachine};

/// The external collaborators a monitor needs.
pub struct ExternalDeps {
    pub window_query: Arc<dyn window::WindowQuery>,
    pub capture: Arc<dyn sensing::ScreenCapture>,
    /// Platform-accelerated recognition engine, when one is available.
    pub ocr_primary: Option<Arc<dyn ocr::OcrEngine>>,
    pub ocr_fallback: Arc<dyn ocr::OcrEngine>,
    pub backend: Arc<dyn classify::ReasoningBackend>,
    pub store: Arc<dyn context::SessionStore>,
    pub surface: Arc<dyn monitor::BlockingSurface>,
    pub sink: Arc<dyn monitor::ActivitySink>,
}

/// Wires the full pipeline together with the given configuration.
pub fn build_monitor(deps: ExternalDeps, config: MonitorConfig) -> SessionMonitor {
    let observer = window::WindowObserver::new(deps.window_query, config.window);
    let sampler = sensing::ScreenSampler::new(deps.capture, config.sampler);
    let change = Arc::new(sensing::ChangeDetector::new(config.change));
    let ocr_service = Arc::new(ocr::TextRecognitionService::new(
        deps.ocr_primary,
        deps.ocr_fallback,
        config.ocr,
    ));
    let classifier = Arc::new(classify::ClassificationService::new(
        deps.backend,
        config.classifier,
    ));
    let context_cache = Arc::new(context::ContextCache::new(deps.store, config.context_ttl));
    let detector = Arc::new(detect::DistractionDetector::new(
        context_cache,
        ocr_service,
        classifier,
        config.detector,
    ));
    let state_machine = MonitoringStateMachine::new(config.ambiguous_timeout);

    SessionMonitor::new(
        monitor::MonitorParts {
            observer,
            sampler,
            change,
            detector,
            state_machine,
            surface: deps.surface,
            sink: deps.sink,
        },
        config.session,
    )
}
