use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::detect::{DistractionDetector, DetectionVerdict};
use crate::sensing::{ChangeDetector, ScreenSampler};
use crate::state_machine::{AttentionState, MonitoringStateMachine};
use crate::window::{WindowObserver, WindowSnapshot};

use super::activity::{ActivityRecord, ActivitySink, ActivityType};
use super::overlay::{blocking_zone, BlockingSurface};
use super::stats::UsageStats;

/// Escalation shape: higher confidence escalates faster, de-escalation only
/// after sustained calm. The exact constants are tuning, not contract.
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Confidence needed to push YELLOW into AMBIGUOUS.
    pub ambiguous_confidence: f64,
    /// Confidence that jumps straight from YELLOW to RED.
    pub red_confidence: f64,
    /// How long YELLOW/AMBIGUOUS must stay calm before returning to GREEN.
    pub calm_dwell: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            ambiguous_confidence: 0.8,
            red_confidence: 0.9,
            calm_dwell: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionMonitorConfig {
    /// Period of the decision loop.
    pub decision_period: Duration,
    /// Consecutive crashed ticks before the monitor stops itself.
    pub max_consecutive_crashes: u32,
    pub escalation: EscalationConfig,
}

impl Default for SessionMonitorConfig {
    fn default() -> Self {
        Self {
            decision_period: Duration::from_secs(5),
            max_consecutive_crashes: 3,
            escalation: EscalationConfig::default(),
        }
    }
}

/// Next attention state given the current one and this tick's verdict.
/// `time_in_state` is how long the current state has been held.
pub fn derive_next_state(
    current: AttentionState,
    verdict: &DetectionVerdict,
    time_in_state: Duration,
    config: &EscalationConfig,
) -> AttentionState {
    if verdict.is_distraction {
        match current {
            AttentionState::Green => AttentionState::Yellow,
            AttentionState::Yellow if verdict.confidence >= config.red_confidence => {
                AttentionState::Red
            }
            AttentionState::Yellow if verdict.confidence >= config.ambiguous_confidence => {
                AttentionState::Ambiguous
            }
            AttentionState::Yellow => AttentionState::Yellow,
            AttentionState::Ambiguous => AttentionState::Red,
            AttentionState::Red => AttentionState::Red,
        }
    } else {
        match current {
            AttentionState::Red => AttentionState::Yellow,
            AttentionState::Yellow | AttentionState::Ambiguous
                if time_in_state >= config.calm_dwell =>
            {
                AttentionState::Green
            }
            other => other,
        }
    }
}

/// Everything the session monitor orchestrates.
pub struct MonitorParts {
    pub observer: Arc<WindowObserver>,
    pub sampler: Arc<ScreenSampler>,
    pub change: Arc<ChangeDetector>,
    pub detector: Arc<DistractionDetector>,
    pub state_machine: MonitoringStateMachine,
    pub surface: Arc<dyn BlockingSurface>,
    pub sink: Arc<dyn ActivitySink>,
}

struct Control {
    session_id: Option<String>,
    paused: bool,
    cancel: Option<CancellationToken>,
    loop_handle: Option<JoinHandle<()>>,
}

struct TickMemory {
    window: WindowSnapshot,
    verdict: DetectionVerdict,
}

/// Current monitor state for embedders.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub paused: bool,
    pub session_id: Option<String>,
    pub attention_state: AttentionState,
    pub last_error: Option<String>,
}

struct MonitorInner {
    parts: MonitorParts,
    config: SessionMonitorConfig,
    control: Mutex<Control>,
    stats: std::sync::Mutex<UsageStats>,
    memory: std::sync::Mutex<Option<TickMemory>>,
    last_transition: std::sync::Mutex<Instant>,
    last_tick: std::sync::Mutex<Option<Instant>>,
    last_error: std::sync::Mutex<Option<String>>,
}

/// Orchestrator: wires observer, sampler, change detector, distraction
/// detector, state machine, blocking surface, and activity sink into a
/// fixed-period decision loop.
#[derive(Clone)]
pub struct SessionMonitor {
    inner: Arc<MonitorInner>,
}

impl SessionMonitor {
    pub fn new(parts: MonitorParts, config: SessionMonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                parts,
                config,
                control: Mutex::new(Control {
                    session_id: None,
                    paused: false,
                    cancel: None,
                    loop_handle: None,
                }),
                stats: std::sync::Mutex::new(UsageStats::default()),
                memory: std::sync::Mutex::new(None),
                last_transition: std::sync::Mutex::new(Instant::now()),
                last_tick: std::sync::Mutex::new(None),
                last_error: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Begins monitoring `session_id`. A monitor already watching a
    /// different session is stopped first.
    pub async fn start(&self, session_id: &str) -> Result<()> {
        {
            let control = self.inner.control.lock().await;
            if let Some(active) = &control.session_id {
                if active == session_id {
                    bail!("monitoring already active for session {session_id}");
                }
            }
        }
        if self.is_monitoring().await {
            info!("switching sessions, stopping previous monitor first");
            self.stop().await;
        }

        *self.inner.stats.lock().unwrap_or_else(|p| p.into_inner()) = UsageStats::default();
        *self.inner.memory.lock().unwrap_or_else(|p| p.into_inner()) = None;
        *self.inner.last_error.lock().unwrap_or_else(|p| p.into_inner()) = None;
        *self.inner.last_tick.lock().unwrap_or_else(|p| p.into_inner()) = None;
        *self
            .inner
            .last_transition
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Instant::now();

        self.inner.parts.state_machine.reset();
        self.inner.parts.observer.clear_cache().await;
        Arc::clone(&self.inner.parts.observer).start().await;
        Arc::clone(&self.inner.parts.sampler)
            .start(self.inner.parts.state_machine.subscribe(), None)
            .await;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let monitor = self.clone();
        let session = session_id.to_string();
        let handle = tokio::spawn(async move {
            monitor.decision_loop(session, token).await;
        });

        let mut control = self.inner.control.lock().await;
        control.session_id = Some(session_id.to_string());
        control.paused = false;
        control.cancel = Some(cancel);
        control.loop_handle = Some(handle);

        info!("monitoring started for session {session_id}");
        self.emit_state_record(session_id, "monitoring started").await;
        Ok(())
    }

    /// Stops monitoring: cancels the loop, stops sub-components, hides the
    /// blocking surface, and resets the state machine and change detector.
    pub async fn stop(&self) {
        let (session_id, cancel, handle) = {
            let mut control = self.inner.control.lock().await;
            (
                control.session_id.take(),
                control.cancel.take(),
                control.loop_handle.take(),
            )
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        self.shutdown_components().await;

        if let Some(session_id) = session_id {
            info!("monitoring stopped for session {session_id}");
            self.emit_state_record(&session_id, "monitoring stopped").await;
        }
    }

    /// Stops only the screen sampler and hides the blocking surface; the
    /// window observer keeps running and decision ticks are skipped.
    pub async fn pause(&self) {
        let mut control = self.inner.control.lock().await;
        if control.session_id.is_none() || control.paused {
            return;
        }
        control.paused = true;
        drop(control);

        self.inner.parts.sampler.stop().await;
        self.inner.parts.surface.hide().await;
        info!("monitoring paused");
    }

    pub async fn resume(&self) {
        let mut control = self.inner.control.lock().await;
        if control.session_id.is_none() || !control.paused {
            return;
        }
        control.paused = false;
        drop(control);

        Arc::clone(&self.inner.parts.sampler)
            .start(self.inner.parts.state_machine.subscribe(), None)
            .await;
        info!("monitoring resumed");
    }

    pub async fn is_monitoring(&self) -> bool {
        self.inner.control.lock().await.session_id.is_some()
    }

    pub async fn status(&self) -> MonitorStatus {
        let control = self.inner.control.lock().await;
        MonitorStatus {
            monitoring: control.session_id.is_some(),
            paused: control.paused,
            session_id: control.session_id.clone(),
            attention_state: self.inner.parts.state_machine.state(),
            last_error: self
                .inner
                .last_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
        }
    }

    pub fn stats(&self) -> UsageStats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn decision_loop(self, session_id: String, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.decision_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut window_changes = self.inner.parts.observer.changes();
        let mut crashes: u32 = 0;

        loop {
            let immediate = tokio::select! {
                _ = ticker.tick() => false,
                changed = window_changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    true
                }
                _ = cancel.cancelled() => {
                    debug!("decision loop shutting down");
                    break;
                }
            };

            if self.inner.control.lock().await.paused {
                continue;
            }
            if immediate {
                debug!("window change announced, running an immediate decision tick");
            }

            match self.tick(&session_id).await {
                Ok(()) => crashes = 0,
                Err(err) => {
                    crashes += 1;
                    error!(
                        "decision tick crashed ({crashes}/{}): {err:#}",
                        self.inner.config.max_consecutive_crashes
                    );
                    if crashes >= self.inner.config.max_consecutive_crashes {
                        let message = format!(
                            "monitoring stopped after {crashes} consecutive crashed ticks: {err:#}"
                        );
                        error!("{message}");
                        *self
                            .inner
                            .last_error
                            .lock()
                            .unwrap_or_else(|p| p.into_inner()) = Some(message);

                        // Tear down inline; stop() would deadlock waiting on
                        // this very task.
                        let mut control = self.inner.control.lock().await;
                        control.session_id = None;
                        control.cancel = None;
                        control.loop_handle = None;
                        drop(control);
                        self.shutdown_components().await;
                        break;
                    }
                }
            }
        }
    }

    /// One decision cycle: sense, detect, transition, block/unblock, record.
    async fn tick(&self, session_id: &str) -> Result<()> {
        let Some(window) = self.inner.parts.observer.active_window().await else {
            debug!("no window snapshot available, skipping tick");
            return Ok(());
        };
        let Some(frame) = self.inner.parts.sampler.latest_frame() else {
            debug!("no frame available, skipping tick");
            return Ok(());
        };

        let delta = {
            let change = Arc::clone(&self.inner.parts.change);
            let frame = frame.clone();
            tokio::task::spawn_blocking(move || change.changed_tiles(&frame))
                .await
                .context("tile hash worker join failed")?
        };

        // Nothing changed on screen and the window is the same: reuse the
        // previous verdict instead of re-running recognition/classification.
        let remembered = self
            .inner
            .memory
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .filter(|memory| delta.is_unchanged() && !memory.window.differs_from(&window))
            .map(|memory| memory.verdict.clone());

        let verdict = match remembered {
            Some(verdict) => {
                debug!(
                    "screen static ({} tiles), reusing previous verdict",
                    delta.total_tiles
                );
                verdict
            }
            None => {
                self.inner
                    .parts
                    .detector
                    .detect(session_id, &window, Some(&frame))
                    .await
            }
        };

        let current = self.inner.parts.state_machine.state();
        let time_in_state = self
            .inner
            .last_transition
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed();
        let next = derive_next_state(
            current,
            &verdict,
            time_in_state,
            &self.inner.config.escalation,
        );

        let mut transitioned = false;
        if next != current {
            let reason = format!(
                "detection: {} ({:?})",
                if verdict.is_distraction {
                    "distraction"
                } else {
                    "safe"
                },
                verdict.method
            );
            transitioned = self.inner.parts.state_machine.transition_to(next, &reason);
            if transitioned {
                *self
                    .inner
                    .last_transition
                    .lock()
                    .unwrap_or_else(|p| p.into_inner()) = Instant::now();
            } else {
                debug!("transition to {next} skipped, will re-evaluate next tick");
            }
        }

        // Detection preceded the transition; the surface update comes last.
        let effective = self.inner.parts.state_machine.state();
        let blocked = effective == AttentionState::Red && verdict.is_distraction;
        if blocked {
            let reason = verdict
                .detected_domain
                .clone()
                .unwrap_or_else(|| "distraction".to_string());
            let zone = blocking_zone(&window.bounds, &reason);
            self.inner
                .parts
                .surface
                .show(vec![zone], window.bounds)
                .await;
        } else {
            self.inner.parts.surface.hide().await;
        }

        let elapsed_secs = {
            let mut last_tick = self
                .inner
                .last_tick
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            let elapsed = last_tick
                .map(|at| at.elapsed().as_secs())
                .unwrap_or(self.inner.config.decision_period.as_secs());
            *last_tick = Some(Instant::now());
            elapsed
        };
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record_tick(effective, elapsed_secs, verdict.is_distraction, blocked);

        if transitioned {
            self.emit_state_record(session_id, &format!("{current} -> {effective}"))
                .await;
        }

        let mut record = ActivityRecord::new(
            session_id,
            if verdict.is_distraction {
                ActivityType::DistractionDetected
            } else {
                ActivityType::Observation
            },
            effective,
        );
        record.app_name = Some(window.app_name.clone());
        record.window_title = Some(window.window_title.clone());
        record.detected_domain = verdict.detected_domain.clone();
        record.detected_url = verdict.detected_url.clone();
        record.is_distraction = Some(verdict.is_distraction);
        record.is_blocked = Some(blocked);
        record.method = Some(verdict.method);
        record.metadata = json!({
            "confidence": verdict.confidence,
            "reason": verdict.reason.clone(),
            "changedTiles": delta.changed_count(),
            "totalTiles": delta.total_tiles,
        });
        if let Err(err) = self.inner.parts.sink.record(record).await {
            warn!("activity sink write failed: {err:#}");
        }

        *self.inner.memory.lock().unwrap_or_else(|p| p.into_inner()) =
            Some(TickMemory { window, verdict });

        Ok(())
    }

    async fn shutdown_components(&self) {
        self.inner.parts.sampler.stop().await;
        self.inner.parts.observer.stop().await;
        self.inner.parts.surface.hide().await;
        self.inner.parts.state_machine.reset();
        self.inner.parts.change.clear();
    }

    async fn emit_state_record(&self, session_id: &str, reason: &str) {
        let mut record = ActivityRecord::new(
            session_id,
            ActivityType::StateChange,
            self.inner.parts.state_machine.state(),
        );
        record.metadata = json!({ "reason": reason });
        if let Err(err) = self.inner.parts.sink.record(record).await {
            warn!("activity sink write failed: {err:#}");
        }
    }
}
