use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use image::imageops::FilterType;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::resilience::{retry_with_backoff, Backoff};
use crate::state_machine::AttentionState;

use super::capture::{Frame, ScreenCapture};

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Capture period per attention state, calmest to most alert.
    pub period_green: Duration,
    pub period_yellow: Duration,
    pub period_ambiguous: Duration,
    pub period_red: Duration,
    /// Bound on a single capture attempt.
    pub capture_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    /// Fixed downscale applied to every capture before storage.
    pub downscale: f32,
    /// Frames retained for fallback when a capture attempt fails.
    pub history_size: usize,
    /// Consecutive failures (with no history) before the period is doubled.
    pub degrade_after_failures: u32,
    /// Ceiling for the degraded period.
    pub max_period: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period_green: Duration::from_secs(25),
            period_yellow: Duration::from_secs(10),
            period_ambiguous: Duration::from_secs(5),
            period_red: Duration::from_millis(2500),
            capture_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(250),
            downscale: 0.5,
            history_size: 3,
            degrade_after_failures: 3,
            max_period: Duration::from_secs(50),
        }
    }
}

impl SamplerConfig {
    pub fn period_for(&self, state: AttentionState) -> Duration {
        match state {
            AttentionState::Green => self.period_green,
            AttentionState::Yellow => self.period_yellow,
            AttentionState::Ambiguous => self.period_ambiguous,
            AttentionState::Red => self.period_red,
        }
    }
}

struct SamplerCell {
    history: VecDeque<Frame>,
    consecutive_failures: u32,
}

/// Periodically captures the primary display at a frequency keyed to the
/// attention state, downscales every frame, and keeps a small history for
/// fallback when capture fails.
pub struct ScreenSampler {
    capture: Arc<dyn ScreenCapture>,
    config: SamplerConfig,
    cell: std::sync::Mutex<SamplerCell>,
    /// Held across a capture; a second caller short-circuits to history.
    capture_guard: Mutex<()>,
    frame_tx: watch::Sender<Option<Frame>>,
    run: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ScreenSampler {
    pub fn new(capture: Arc<dyn ScreenCapture>, config: SamplerConfig) -> Arc<Self> {
        let (frame_tx, _) = watch::channel(None);
        Arc::new(Self {
            capture,
            config,
            cell: std::sync::Mutex::new(SamplerCell {
                history: VecDeque::new(),
                consecutive_failures: 0,
            }),
            capture_guard: Mutex::new(()),
            frame_tx,
            run: Mutex::new(None),
        })
    }

    /// Starts the capture loop. The period follows `state_rx` unless
    /// `period_override` pins it. Idempotent.
    pub async fn start(
        self: Arc<Self>,
        state_rx: watch::Receiver<AttentionState>,
        period_override: Option<Duration>,
    ) {
        let mut slot = self.run.lock().await;
        if slot.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sampler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            sampler.run_loop(state_rx, period_override, token).await;
        });

        *slot = Some((cancel, handle));
    }

    pub async fn stop(&self) {
        if let Some((cancel, handle)) = self.run.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    /// Captures one frame now. Reentrancy-guarded: if a capture is already in
    /// flight this short-circuits to the last successful frame. Bounded per
    /// attempt and retried with backoff; after all retries the last frame is
    /// returned if one exists, otherwise the failure propagates.
    pub async fn capture_once(&self) -> Result<Frame> {
        let _guard = match self.capture_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("capture already in flight, serving last frame");
                return self
                    .latest_frame()
                    .ok_or_else(|| anyhow!("capture in flight and no prior frame exists"));
            }
        };

        let capture = Arc::clone(&self.capture);
        let timeout = self.config.capture_timeout;
        let attempt = retry_with_backoff(
            "screen capture",
            self.config.max_attempts,
            Backoff::Fixed(self.config.retry_backoff),
            |_| {
                let capture = Arc::clone(&capture);
                async move {
                    match tokio::time::timeout(timeout, capture.capture_primary()).await {
                        Ok(result) => result,
                        Err(_) => Err(anyhow!("capture timed out after {timeout:?}")),
                    }
                }
            },
        )
        .await;

        let decoded = match attempt {
            Ok(bytes) => self.decode_and_downscale(bytes).await,
            Err(err) => Err(err),
        };

        match decoded {
            Ok(frame) => {
                let mut cell = self.lock_cell();
                cell.consecutive_failures = 0;
                cell.history.push_back(frame.clone());
                while cell.history.len() > self.config.history_size {
                    cell.history.pop_front();
                }
                drop(cell);
                self.frame_tx.send_replace(Some(frame.clone()));
                Ok(frame)
            }
            Err(err) => {
                let mut cell = self.lock_cell();
                cell.consecutive_failures += 1;
                let fallback = cell.history.back().cloned();
                drop(cell);
                match fallback {
                    Some(frame) => {
                        warn!("capture failed, serving last successful frame: {err:#}");
                        Ok(frame)
                    }
                    None => Err(err.context("capture failed with no frame history")),
                }
            }
        }
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.lock_cell().history.back().cloned()
    }

    /// Latest frame as a watch channel for event-driven consumers.
    pub fn subscribe_frames(&self) -> watch::Receiver<Option<Frame>> {
        self.frame_tx.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock_cell().consecutive_failures
    }

    async fn run_loop(
        self: Arc<Self>,
        mut state_rx: watch::Receiver<AttentionState>,
        period_override: Option<Duration>,
        cancel: CancellationToken,
    ) {
        let base_for = |state: AttentionState| {
            period_override.unwrap_or_else(|| self.config.period_for(state))
        };

        let mut base = base_for(*state_rx.borrow());
        let mut current = base;
        let mut ticker = tokio::time::interval(current);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("screen sampler started (period {current:?})");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.capture_once().await {
                        warn!("sampler tick failed: {err:#}");
                    }

                    let desired = self.effective_period(base);
                    if desired != current {
                        debug!("sampler period {current:?} -> {desired:?}");
                        current = desired;
                        ticker = tokio::time::interval(current);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        // Consume the immediate first tick of a fresh interval.
                        ticker.tick().await;
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow();
                    base = base_for(state);
                    current = self.effective_period(base);
                    debug!("attention state {state}, sampler period now {current:?}");
                    ticker = tokio::time::interval(current);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;
                }
                _ = cancel.cancelled() => {
                    info!("screen sampler shutting down");
                    break;
                }
            }
        }
    }

    /// Doubles the period (capped) while capture keeps failing with nothing
    /// in history, to reduce load until it succeeds again.
    fn effective_period(&self, base: Duration) -> Duration {
        let cell = self.lock_cell();
        if cell.consecutive_failures >= self.config.degrade_after_failures
            && cell.history.is_empty()
        {
            (base * 2).min(self.config.max_period)
        } else {
            base
        }
    }

    async fn decode_and_downscale(&self, bytes: Vec<u8>) -> Result<Frame> {
        let downscale = self.config.downscale;
        tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes).context("failed to decode capture")?;
            let width = ((image.width() as f32 * downscale) as u32).max(1);
            let height = ((image.height() as f32 * downscale) as u32).max(1);
            let image = image.resize_exact(width, height, FilterType::Triangle);
            Ok(Frame {
                image,
                captured_at: Utc::now(),
            })
        })
        .await
        .context("downscale worker join failed")?
    }

    fn lock_cell(&self) -> std::sync::MutexGuard<'_, SamplerCell> {
        self.cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
