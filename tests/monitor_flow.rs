//! Decision-loop scenarios: escalation to RED drives the blocking surface,
//! safe content keeps it hidden, pause stops the flow of activity.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

use focusguard::classify::ReasoningBackend;
use focusguard::config::MonitorConfig;
use focusguard::context::{SessionStore, TaskContext};
use focusguard::detect::Rule;
use focusguard::monitor::{
    ActivityRecord, ActivitySink, BlockZone, BlockingSurface, EscalationConfig,
    SessionMonitorConfig,
};
use focusguard::ocr::{OcrEngine, RecognizedText};
use focusguard::sensing::ScreenCapture;
use focusguard::window::{WindowBounds, WindowMetadata, WindowQuery};
use focusguard::{build_monitor, AttentionState, ExternalDeps};

struct FixedWindow {
    app: &'static str,
    title: &'static str,
}

#[async_trait]
impl WindowQuery for FixedWindow {
    async fn active_window(&self) -> Result<WindowMetadata> {
        Ok(WindowMetadata {
            app_name: self.app.to_string(),
            window_title: self.title.to_string(),
            bounds: WindowBounds {
                x: 0.0,
                y: 0.0,
                width: 1280.0,
                height: 720.0,
            },
        })
    }
}

struct PngCapture;

#[async_trait]
impl ScreenCapture for PngCapture {
    async fn capture_primary(&self) -> Result<Vec<u8>> {
        let image = image::RgbaImage::from_pixel(320, 200, image::Rgba([240, 240, 240, 255]));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, image::ImageFormat::Png)?;
        Ok(buf.into_inner())
    }
}

struct NoCapture;

#[async_trait]
impl ScreenCapture for NoCapture {
    async fn capture_primary(&self) -> Result<Vec<u8>> {
        anyhow::bail!("display unavailable")
    }
}

struct FixedOcr {
    text: &'static str,
}

#[async_trait]
impl OcrEngine for FixedOcr {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn recognize(&self, _png_bytes: &[u8]) -> Result<RecognizedText> {
        Ok(RecognizedText {
            text: self.text.to_string(),
            confidence: 0.9,
        })
    }
}

struct EmptyStore;

#[async_trait]
impl SessionStore for EmptyStore {
    async fn task_context(&self, _session_id: &str) -> Result<Option<TaskContext>> {
        Ok(None)
    }

    async fn always_allowed(&self, _session_id: &str) -> Result<Vec<Rule>> {
        Ok(Vec::new())
    }

    async fn always_blocked(&self, _session_id: &str) -> Result<Vec<Rule>> {
        Ok(Vec::new())
    }
}

struct UnusedBackend {
    calls: AtomicU32,
}

#[async_trait]
impl ReasoningBackend for UnusedBackend {
    fn name(&self) -> &'static str {
        "unused"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("{}".to_string())
    }
}

#[derive(Default)]
struct RecordingSurface {
    shows: Mutex<Vec<Vec<BlockZone>>>,
    hides: AtomicU32,
}

#[async_trait]
impl BlockingSurface for RecordingSurface {
    async fn show(&self, zones: Vec<BlockZone>, _display_bounds: WindowBounds) {
        self.shows.lock().unwrap().push(zones);
    }

    async fn hide(&self) {
        self.hides.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ActivityRecord>>,
}

#[async_trait]
impl ActivitySink for RecordingSink {
    async fn record(&self, record: ActivityRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        session: SessionMonitorConfig {
            decision_period: Duration::from_millis(25),
            max_consecutive_crashes: 3,
            escalation: EscalationConfig::default(),
        },
        ..MonitorConfig::default()
    }
}

struct Harness {
    surface: Arc<RecordingSurface>,
    sink: Arc<RecordingSink>,
    backend: Arc<UnusedBackend>,
}

fn build(
    window: FixedWindow,
    capture: Arc<dyn ScreenCapture>,
    ocr_text: &'static str,
) -> (focusguard::SessionMonitor, Harness) {
    let _ = env_logger::builder().is_test(true).try_init();
    let surface = Arc::new(RecordingSurface::default());
    let sink = Arc::new(RecordingSink::default());
    let backend = Arc::new(UnusedBackend {
        calls: AtomicU32::new(0),
    });

    let monitor = build_monitor(
        ExternalDeps {
            window_query: Arc::new(window),
            capture,
            ocr_primary: None,
            ocr_fallback: Arc::new(FixedOcr { text: ocr_text }),
            backend: backend.clone(),
            store: Arc::new(EmptyStore),
            surface: surface.clone(),
            sink: sink.clone(),
        },
        fast_config(),
    );

    (
        monitor,
        Harness {
            surface,
            sink,
            backend,
        },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn safety_net_distraction_escalates_to_red_and_blocks() {
    let (monitor, harness) = build(
        FixedWindow {
            app: "Safari",
            title: "watch later",
        },
        Arc::new(PngCapture),
        "https://youtube.com/watch?v=abc",
    );

    monitor.start("session-1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let status = monitor.status().await;
    assert_eq!(status.attention_state, AttentionState::Red);

    let shows = harness.surface.shows.lock().unwrap();
    assert!(!shows.is_empty(), "blocking surface was never shown");
    let zone = &shows[0][0];
    assert_eq!(zone.reason, "youtube.com");
    assert!(zone.w > 0.0 && zone.h > 0.0);
    drop(shows);

    // The safety net decided; the classifier must never have been consulted.
    assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 0);

    let stats = monitor.stats();
    assert!(stats.distractions_detected > 0);
    assert!(stats.blocks_applied > 0);

    monitor.stop().await;
    let status = monitor.status().await;
    assert!(!status.monitoring);
    assert_eq!(status.attention_state, AttentionState::Green);
    assert!(harness.surface.hides.load(Ordering::SeqCst) > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn safe_application_stays_green_and_unblocked() {
    let (monitor, harness) = build(
        FixedWindow {
            app: "Code",
            title: "lib.rs",
        },
        Arc::new(PngCapture),
        "",
    );

    monitor.start("session-2").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(monitor.status().await.attention_state, AttentionState::Green);
    assert!(harness.surface.shows.lock().unwrap().is_empty());
    assert_eq!(harness.backend.calls.load(Ordering::SeqCst), 0);

    let records = harness.sink.records.lock().unwrap();
    assert!(records
        .iter()
        .any(|record| record.is_distraction == Some(false)));
    drop(records);

    monitor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ticks_are_skipped_without_a_frame() {
    let (monitor, harness) = build(
        FixedWindow {
            app: "Safari",
            title: "watch later",
        },
        Arc::new(NoCapture),
        "https://youtube.com/watch",
    );

    monitor.start("session-3").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Capture never succeeds, so no decision is ever made.
    assert_eq!(monitor.status().await.attention_state, AttentionState::Green);
    assert!(harness.surface.shows.lock().unwrap().is_empty());

    monitor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_stops_decisions_and_resume_restarts_them() {
    let (monitor, harness) = build(
        FixedWindow {
            app: "Notes",
            title: "scratch",
        },
        Arc::new(PngCapture),
        "",
    );

    monitor.start("session-4").await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    monitor.pause().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let count_at_pause = harness.sink.records.lock().unwrap().len();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        harness.sink.records.lock().unwrap().len(),
        count_at_pause,
        "records kept flowing while paused"
    );

    monitor.resume().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.sink.records.lock().unwrap().len() > count_at_pause);

    monitor.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_the_same_session_twice_is_rejected() {
    let (monitor, _harness) = build(
        FixedWindow {
            app: "Notes",
            title: "scratch",
        },
        Arc::new(PngCapture),
        "",
    );

    monitor.start("session-5").await.unwrap();
    assert!(monitor.start("session-5").await.is_err());

    // A different session takes over cleanly.
    monitor.start("session-6").await.unwrap();
    assert_eq!(
        monitor.status().await.session_id.as_deref(),
        Some("session-6")
    );
    monitor.stop().await;
}
